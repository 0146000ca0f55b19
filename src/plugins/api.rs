/// Plugin API definitions shared by both loading strategies
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

use crate::error::LoadError;

/// Marker value a script's service table must carry in its `service` field
pub const SERVICE_MARKER: &str = "vdm-plugin";

static CALLBACK_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^on[A-Z][A-Za-z0-9_]*$").expect("valid callback regex"));

/// How an entry point gets loaded, decided by its suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Lua module returning a service table
    Script,
    /// Dynamic library exporting C callbacks
    Native,
}

impl EntryKind {
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("lua") => Some(Self::Script),
            Some("so" | "dylib" | "dll") => Some(Self::Native),
            _ => None,
        }
    }
}

/// Calling convention of a native callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convention {
    /// `extern "C" fn(*const c_char) -> c_int`
    Text,
    /// `extern "C" fn() -> c_int`
    Unit,
}

impl Convention {
    /// Convention used when a capability does not name one
    #[must_use]
    pub fn default_for(name: &str) -> Self {
        match name {
            "onSave" | "onResume" => Self::Text,
            _ => Self::Unit,
        }
    }
}

/// A callback declared through the manifest's `capability` list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackDecl {
    pub name: String,
    pub convention: Convention,
}

impl CallbackDecl {
    /// Parse a capability tag such as `onSave`, `onTrigger:text` or
    /// `onTick:unit`. Plain feature tags yield `None`.
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        let (name, convention) = match tag.split_once(':') {
            Some((name, "text")) => (name, Convention::Text),
            Some((name, "unit")) => (name, Convention::Unit),
            Some(_) => return None,
            None => (tag, Convention::default_for(tag)),
        };
        is_callback_name(name).then(|| Self {
            name: name.to_string(),
            convention,
        })
    }

    /// Callback declarations among a capability list
    #[must_use]
    pub fn from_capabilities(capabilities: &[String]) -> Vec<Self> {
        capabilities.iter().filter_map(|tag| Self::parse(tag)).collect()
    }
}

#[must_use]
pub fn is_callback_name(name: &str) -> bool {
    CALLBACK_REGEX.is_match(name)
}

/// Reject anything outside the `on*` callback namespace
///
/// # Errors
/// Returns [`LoadError::IllegalCallbackName`] for non-callback names
pub fn ensure_callback_name(name: &str) -> Result<(), LoadError> {
    if is_callback_name(name) {
        Ok(())
    } else {
        Err(LoadError::IllegalCallbackName(name.to_string()))
    }
}

/// Uniform calling surface implemented by every loading strategy
pub trait PluginApi {
    /// Invoke callback `name`, passing `arg` as text when the callback takes one
    fn call(&mut self, name: &str, arg: Option<&str>) -> Result<Option<String>, LoadError>;

    /// Callback names this plugin currently exposes
    fn callbacks(&self) -> Vec<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_kind_by_suffix() {
        assert_eq!(EntryKind::from_path(Path::new("a/main.lua")), Some(EntryKind::Script));
        assert_eq!(EntryKind::from_path(Path::new("libx.so")), Some(EntryKind::Native));
        assert_eq!(EntryKind::from_path(Path::new("x.dll")), Some(EntryKind::Native));
        assert_eq!(EntryKind::from_path(Path::new("main.py")), None);
        assert_eq!(EntryKind::from_path(Path::new("main")), None);
    }

    #[test]
    fn test_callback_names() {
        assert!(is_callback_name("onSave"));
        assert!(is_callback_name("onTrigger2"));
        assert!(!is_callback_name("on"));
        assert!(!is_callback_name("once"));
        assert!(!is_callback_name("save"));
        assert!(matches!(
            ensure_callback_name("__gc"),
            Err(LoadError::IllegalCallbackName(_))
        ));
    }

    #[test]
    fn test_capability_parsing() {
        assert_eq!(
            CallbackDecl::parse("onSave"),
            Some(CallbackDecl { name: "onSave".into(), convention: Convention::Text })
        );
        assert_eq!(
            CallbackDecl::parse("onTrigger"),
            Some(CallbackDecl { name: "onTrigger".into(), convention: Convention::Unit })
        );
        assert_eq!(
            CallbackDecl::parse("onTrigger:text").map(|d| d.convention),
            Some(Convention::Text)
        );
        assert_eq!(CallbackDecl::parse("network"), None);
        assert_eq!(CallbackDecl::parse("onSave:bytes"), None);
    }

    #[test]
    fn test_from_capabilities_skips_feature_tags() {
        let caps = vec!["clipboard".to_string(), "onResume".to_string()];
        let decls = CallbackDecl::from_capabilities(&caps);
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0].name, "onResume");
    }
}
