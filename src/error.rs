//! Error types for the plugin manager.
//!
//! Each install stage fails with its own variant so the CLI can report
//! exactly why a plugin was rejected.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Reasons a manifest is not eligible for installation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("manifest is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("illegal plugin name '{0}'")]
    IllegalName(String),

    #[error("illegal entry '{0}'")]
    IllegalEntry(String),

    #[error("entry '{0}' is neither pre-built under release/ nor produced by a pre-install hook")]
    EntryUnresolvable(String),
}

/// Reasons an entry point cannot be loaded or called
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("unsupported entry kind: {}", .0.display())]
    UnsupportedEntryKind(PathBuf),

    #[error("{} does not return a plugin service object", .0.display())]
    NoServiceObject(PathBuf),

    #[error("symbol '{0}' not found")]
    SymbolNotFound(String),

    #[error("'{0}' is not a callback name")]
    IllegalCallbackName(String),

    #[error("failed to open library: {0}")]
    Library(#[from] libloading::Error),

    #[error("script error: {0}")]
    Script(String),

    #[error("invalid argument for '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("callback '{name}' failed: {reason}")]
    CallbackFailed { name: String, reason: String },
}

impl From<mlua::Error> for LoadError {
    fn from(e: mlua::Error) -> Self {
        Self::Script(e.to_string())
    }
}

/// Errors surfaced by [`crate::manager::PluginManager`] operations
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("plugin file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("failed to unpack {}: {reason}", .path.display())]
    Unpack { path: PathBuf, reason: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid manifest: {0}")]
    Validation(#[from] ValidationError),

    #[error("plugin load error: {0}")]
    Load(#[from] LoadError),

    #[error("{hook} hook failed: {reason}")]
    Hook { hook: String, reason: String },

    #[error("plugin already installed: {0}")]
    AlreadyInstalled(String),

    #[error("plugin not found: {0}")]
    PluginNotFound(String),

    #[error("plugin {plugin} has no function '{function}'")]
    FunctionNotFound { plugin: String, function: String },

    #[error("plugin root is locked by another process: {}", .0.display())]
    Locked(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_missing_field() {
        let err = ValidationError::MissingField("author");
        assert_eq!(err.to_string(), "manifest is missing required field 'author'");
    }

    #[test]
    fn test_validation_converts_into_plugin_error() {
        let err: PluginError = ValidationError::IllegalEntry("main.py".into()).into();
        assert!(matches!(
            err,
            PluginError::Validation(ValidationError::IllegalEntry(_))
        ));
        assert_eq!(err.to_string(), "invalid manifest: illegal entry 'main.py'");
    }

    #[test]
    fn test_load_error_from_lua() {
        let err: LoadError = mlua::Error::RuntimeError("boom".into()).into();
        assert!(matches!(err, LoadError::Script(ref msg) if msg.contains("boom")));
    }

    #[test]
    fn test_function_not_found_display() {
        let err = PluginError::FunctionNotFound {
            plugin: "notes".into(),
            function: "onPause".into(),
        };
        assert_eq!(err.to_string(), "plugin notes has no function 'onPause'");
    }

    #[test]
    fn test_from_io_error() {
        let err: PluginError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, PluginError::Io(_)));
    }
}
