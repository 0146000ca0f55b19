//! Plugin manager: install, uninstall, list and run plugins under one root.

use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::archive;
use crate::config::Config;
use crate::error::{LoadError, PluginError, ValidationError};
use crate::hooks::{HookContext, HookRunner};
use crate::manifest::{self, Hook, Manifest, RawManifest, MANIFEST_FILE};
use crate::plugins::{LoadedPlugin, PluginLoader};
use crate::workspace::{self, Workspace};

const LOCK_FILE: &str = ".lock";

/// An installed plugin
#[derive(Debug, Clone, Serialize)]
pub struct PluginRecord {
    #[serde(flatten)]
    pub manifest: Manifest,
    pub path: PathBuf,
}

/// Outcome of a batch uninstall
#[derive(Debug, Default)]
pub struct UninstallReport {
    /// Plugins removed, in request order
    pub removed: Vec<String>,
    /// Plugins left in place, with the reason
    pub failed: Vec<(String, PluginError)>,
}

impl UninstallReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Progress of one install attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStage {
    Start,
    Extracted,
    ManifestLoaded,
    Validated,
    Loaded,
    Installed,
}

/// Owns the plugin root and the workspace namespace
#[derive(Debug)]
pub struct PluginManager {
    root: PathBuf,
    temp: PathBuf,
    lock_root: bool,
}

/// Exclusive claim on the plugin root, released on drop
struct RootLock {
    path: PathBuf,
}

impl RootLock {
    fn acquire(root: &Path) -> Result<Self, PluginError> {
        let path = root.join(LOCK_FILE);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                // Informational only; the file's existence is the lock
                let _ = writeln!(file, "{}", std::process::id());
                Ok(Self { path })
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(PluginError::Locked(path)),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for RootLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

impl PluginManager {
    /// Create a manager, creating the plugin root and temp namespace if absent
    ///
    /// # Errors
    /// Returns an error if either directory cannot be created
    pub fn new(config: Config) -> Result<Self, PluginError> {
        fs::create_dir_all(&config.plugin_root)?;
        fs::create_dir_all(&config.temp_dir)?;
        debug!("Plugin root: {}", config.plugin_root.display());

        Ok(Self {
            root: config.plugin_root,
            temp: config.temp_dir,
            lock_root: config.lock_root,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn temp_dir(&self) -> &Path {
        &self.temp
    }

    fn lock(&self) -> Result<Option<RootLock>, PluginError> {
        if self.lock_root {
            RootLock::acquire(&self.root).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Install the plugin packaged in `archive`
    ///
    /// Nothing is left under the plugin root unless every stage succeeds.
    ///
    /// # Errors
    /// Returns the reason the first failing stage gave
    pub fn install<P: AsRef<Path>>(&self, archive: P) -> Result<PluginRecord, PluginError> {
        let archive = archive.as_ref();
        let mut stage = InstallStage::Start;

        match self.install_stages(archive, &mut stage) {
            Ok(record) => {
                info!(
                    "Installed {} {} into {}",
                    record.manifest.name,
                    record.manifest.version,
                    record.path.display()
                );
                Ok(record)
            }
            Err(e) => {
                warn!(
                    "Install of {} failed after stage {:?}: {}",
                    archive.display(),
                    stage,
                    e
                );
                Err(e)
            }
        }
    }

    fn install_stages(
        &self,
        archive: &Path,
        stage: &mut InstallStage,
    ) -> Result<PluginRecord, PluginError> {
        if !archive.is_file() {
            return Err(PluginError::FileNotFound(archive.to_path_buf()));
        }
        let _lock = self.lock()?;

        let ws = Workspace::create(self.temp.join(archive::stem(archive)), Some(archive))?;
        archive::unpack(archive, ws.path())?;
        advance(stage, InstallStage::Extracted);

        let content = archive::content_root(ws.path());
        let raw = RawManifest::load_from_dir(&content)?;
        advance(stage, InstallStage::ManifestLoaded);

        let manifest = manifest::validate(&raw, &content)?;
        let dest = self.root.join(&manifest.name);
        if dest.exists() {
            return Err(PluginError::AlreadyInstalled(manifest.name));
        }
        advance(stage, InstallStage::Validated);

        if let Some(script) = manifest.hook(Hook::PreInstall) {
            HookRunner::run(
                &content.join(script),
                &HookContext {
                    plugin: &manifest.name,
                    dir: &content,
                    hook: Hook::PreInstall,
                },
            )?;
        }
        let entry = manifest
            .resolve_entry(&content)
            .ok_or_else(|| ValidationError::EntryUnresolvable(manifest.main.clone()))?;
        let plugin = PluginLoader::load(&entry, &manifest.capability)?;
        debug!(
            "{} loaded {:?} entry {}, exposing {:?}",
            manifest.name,
            plugin.kind,
            plugin.entry.display(),
            plugin.callbacks()
        );
        // Release the entry (and any library handle) before its files move
        drop(plugin);
        advance(stage, InstallStage::Loaded);

        workspace::relocate(&content, &dest)?;
        drop(ws);
        advance(stage, InstallStage::Installed);

        if let Some(script) = manifest.hook(Hook::PostInstall) {
            let ctx = HookContext {
                plugin: &manifest.name,
                dir: &dest,
                hook: Hook::PostInstall,
            };
            if let Err(e) = HookRunner::run(&dest.join(script), &ctx) {
                warn!("{} installed, but its post-install hook failed: {}", manifest.name, e);
            }
        }

        Ok(PluginRecord {
            manifest,
            path: dest,
        })
    }

    /// Uninstall every plugin in `names`
    ///
    /// All names are checked before anything is removed. A plugin that fails
    /// to uninstall stays installed and is reported; the rest of the batch
    /// still runs.
    ///
    /// # Errors
    /// Returns [`PluginError::PluginNotFound`] for an unknown name, or
    /// [`PluginError::Locked`] if the root is held
    pub fn uninstall(&self, names: &[String]) -> Result<UninstallReport, PluginError> {
        let _lock = self.lock()?;

        let dirs = names
            .iter()
            .map(|name| self.installed_dir(name).map(|dir| (name, dir)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut report = UninstallReport::default();
        for (name, dir) in dirs {
            match self.uninstall_one(name, &dir) {
                Ok(()) => report.removed.push(name.clone()),
                Err(e) => {
                    warn!("Failed to uninstall {}: {}", name, e);
                    report.failed.push((name.clone(), e));
                }
            }
        }

        Ok(report)
    }

    fn uninstall_one(&self, name: &str, dir: &Path) -> Result<(), PluginError> {
        let manifest = match self.read_manifest(dir) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!("Removing {} without running hooks: {}", name, e);
                None
            }
        };
        let hook_script = |hook| manifest.as_ref().and_then(|m| m.hook(hook)).map(|s| dir.join(s));

        if let Some(script) = hook_script(Hook::PreUninstall) {
            HookRunner::run(
                &script,
                &HookContext {
                    plugin: name,
                    dir,
                    hook: Hook::PreUninstall,
                },
            )?;
        }

        let post = match hook_script(Hook::PostUninstall) {
            Some(script) => Some(HookRunner::detach(&script, &self.temp, name)?),
            None => None,
        };

        if let Err(e) = fs::remove_dir_all(dir) {
            if let Some(script) = &post {
                discard(script);
            }
            return Err(e.into());
        }
        info!("Uninstalled {}", name);

        if let Some(script) = post {
            let ctx = HookContext {
                plugin: name,
                dir: &self.temp,
                hook: Hook::PostUninstall,
            };
            if let Err(e) = HookRunner::run(&script, &ctx) {
                warn!("{} removed, but its post-uninstall hook failed: {}", name, e);
            }
            discard(&script);
        }

        Ok(())
    }

    /// Installed plugins sorted by name, restricted to `names` when non-empty
    ///
    /// # Errors
    /// Returns [`PluginError::PluginNotFound`] for a requested name that is
    /// not installed, or an error reading the plugin root
    pub fn list(&self, names: &[String]) -> Result<Vec<PluginRecord>, PluginError> {
        let mut records = Vec::new();

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if hidden || !entry.file_type()?.is_dir() {
                continue;
            }
            match self.read_manifest(&path) {
                Ok(manifest) => records.push(PluginRecord { manifest, path }),
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }
        records.sort_by(|a, b| a.manifest.name.cmp(&b.manifest.name));

        if names.is_empty() {
            return Ok(records);
        }
        if let Some(missing) = names
            .iter()
            .find(|name| !records.iter().any(|r| &r.manifest.name == *name))
        {
            return Err(PluginError::PluginNotFound(missing.clone()));
        }
        records.retain(|r| names.contains(&r.manifest.name));
        Ok(records)
    }

    /// Load the entry point of plugin `name`
    ///
    /// # Errors
    /// Returns [`PluginError::PluginNotFound`] if it is not installed, or the
    /// loader's error
    pub fn load(&self, name: &str) -> Result<LoadedPlugin, PluginError> {
        let dir = self.installed_dir(name)?;
        let manifest = self.read_manifest(&dir)?;
        let entry = manifest
            .resolve_entry(&dir)
            .ok_or_else(|| ValidationError::EntryUnresolvable(manifest.main.clone()))?;
        Ok(PluginLoader::load(&entry, &manifest.capability)?)
    }

    /// Call `function` on plugin `name`, passing `arg` as text
    ///
    /// # Errors
    /// Returns [`PluginError::PluginNotFound`], [`PluginError::FunctionNotFound`],
    /// or the load/call failure
    pub fn run(
        &self,
        name: &str,
        function: &str,
        arg: Option<&str>,
    ) -> Result<Option<String>, PluginError> {
        let mut plugin = self.load(name)?;
        debug!("Running {}.{}", name, function);
        plugin.call(function, arg).map_err(|e| match e {
            LoadError::SymbolNotFound(function) => PluginError::FunctionNotFound {
                plugin: name.to_string(),
                function,
            },
            other => other.into(),
        })
    }

    fn installed_dir(&self, name: &str) -> Result<PathBuf, PluginError> {
        let single_component = Path::new(name).components().count() == 1
            && !name.starts_with('.')
            && !name.contains(['/', '\\']);
        let dir = self.root.join(name);
        if single_component && dir.join(MANIFEST_FILE).is_file() {
            Ok(dir)
        } else {
            Err(PluginError::PluginNotFound(name.to_string()))
        }
    }

    fn read_manifest(&self, dir: &Path) -> Result<Manifest, PluginError> {
        let raw = RawManifest::load_from_dir(dir)?;
        Ok(manifest::validate(&raw, dir)?)
    }
}

fn discard(script: &Path) {
    if let Err(e) = fs::remove_file(script) {
        warn!("Failed to remove hook copy {}: {}", script.display(), e);
    }
}

fn advance(stage: &mut InstallStage, next: InstallStage) {
    debug!("Install stage {:?} -> {:?}", stage, next);
    *stage = next;
}
