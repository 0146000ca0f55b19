use std::path::{Path, PathBuf};
use tracing::debug;

use super::api::{ensure_callback_name, CallbackDecl, EntryKind, PluginApi};
use super::native::NativePlugin;
use super::script::ScriptPlugin;
use crate::error::LoadError;

/// Builds [`LoadedPlugin`]s, picking the loading strategy from the entry suffix
pub struct PluginLoader;

/// A loaded plugin behind the uniform `on*` calling surface
pub struct LoadedPlugin {
    pub kind: EntryKind,
    pub entry: PathBuf,
    inner: Box<dyn PluginApi>,
}

impl PluginLoader {
    /// Load the entry point at `entry`
    ///
    /// `capabilities` is the manifest's capability list; callback
    /// declarations in it are resolved eagerly by native plugins.
    ///
    /// # Errors
    /// Returns [`LoadError::UnsupportedEntryKind`] for unknown suffixes, or the
    /// error of the selected strategy
    pub fn load(entry: &Path, capabilities: &[String]) -> Result<LoadedPlugin, LoadError> {
        let kind = EntryKind::from_path(entry)
            .ok_or_else(|| LoadError::UnsupportedEntryKind(entry.to_path_buf()))?;
        let declared = CallbackDecl::from_capabilities(capabilities);
        debug!("Loading {:?} entry {}", kind, entry.display());

        let inner: Box<dyn PluginApi> = match kind {
            EntryKind::Script => {
                let plugin = ScriptPlugin::load(entry)?;
                let exposed = plugin.callbacks();
                if let Some(decl) = declared.iter().find(|d| !exposed.contains(&d.name)) {
                    return Err(LoadError::SymbolNotFound(decl.name.clone()));
                }
                Box::new(plugin)
            }
            EntryKind::Native => Box::new(NativePlugin::open(entry, &declared)?),
        };

        Ok(LoadedPlugin {
            kind,
            entry: entry.to_path_buf(),
            inner,
        })
    }
}

impl LoadedPlugin {
    /// Call callback `name`; names outside the `on*` convention are refused
    ///
    /// # Errors
    /// Returns [`LoadError::IllegalCallbackName`], [`LoadError::SymbolNotFound`],
    /// or the callback's own failure
    pub fn call(&mut self, name: &str, arg: Option<&str>) -> Result<Option<String>, LoadError> {
        ensure_callback_name(name)?;
        self.inner.call(name, arg)
    }

    #[must_use]
    pub fn callbacks(&self) -> Vec<String> {
        self.inner.callbacks()
    }
}
