use libloading::{Library, Symbol};
use std::collections::HashMap;
use std::ffi::CString;
use std::os::raw::{c_char, c_int};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::api::{ensure_callback_name, CallbackDecl, Convention, PluginApi};
use crate::error::LoadError;

/// Function signature for callbacks taking one text argument
pub type TextCallback = unsafe extern "C" fn(*const c_char) -> c_int;

/// Function signature for callbacks taking no argument
pub type UnitCallback = unsafe extern "C" fn() -> c_int;

#[derive(Clone, Copy)]
enum RawCallback {
    Text(TextCallback),
    Unit(UnitCallback),
}

/// A plugin backed by a dynamic library
pub struct NativePlugin {
    path: PathBuf,
    /// Declared conventions, consulted when a callback is resolved lazily
    conventions: HashMap<String, Convention>,
    symbols: HashMap<String, RawCallback>,
    /// Declared last so it is dropped after the function pointers into it
    library: Library,
}

impl NativePlugin {
    /// Open the library at `path` and resolve every declared callback
    ///
    /// # Errors
    /// Returns [`LoadError::Library`] if the library cannot be opened and
    /// [`LoadError::SymbolNotFound`] if a declared callback is missing
    pub fn open(path: &Path, declared: &[CallbackDecl]) -> Result<Self, LoadError> {
        // Safety: loading a library runs its initializers; installed plugins are trusted code
        let library = unsafe { Library::new(path)? };

        let mut plugin = Self {
            path: path.to_path_buf(),
            conventions: declared
                .iter()
                .map(|decl| (decl.name.clone(), decl.convention))
                .collect(),
            symbols: HashMap::new(),
            library,
        };

        for decl in declared {
            let callback = plugin.resolve(&decl.name, decl.convention)?;
            plugin.symbols.insert(decl.name.clone(), callback);
        }

        info!(
            "Native plugin opened: {} ({} callbacks resolved)",
            plugin.path.display(),
            plugin.symbols.len()
        );
        Ok(plugin)
    }

    fn resolve(&self, name: &str, convention: Convention) -> Result<RawCallback, LoadError> {
        let missing = |_| LoadError::SymbolNotFound(name.to_string());
        // Safety: the symbol type comes from the declared convention; the copied
        // function pointer never outlives `self.library`
        unsafe {
            Ok(match convention {
                Convention::Text => {
                    let symbol: Symbol<TextCallback> =
                        self.library.get(name.as_bytes()).map_err(missing)?;
                    RawCallback::Text(*symbol)
                }
                Convention::Unit => {
                    let symbol: Symbol<UnitCallback> =
                        self.library.get(name.as_bytes()).map_err(missing)?;
                    RawCallback::Unit(*symbol)
                }
            })
        }
    }

    fn lookup(&mut self, name: &str) -> Result<RawCallback, LoadError> {
        if let Some(callback) = self.symbols.get(name) {
            return Ok(*callback);
        }
        let convention = self
            .conventions
            .get(name)
            .copied()
            .unwrap_or_else(|| Convention::default_for(name));
        let callback = self.resolve(name, convention)?;
        debug!("Resolved {} lazily from {}", name, self.path.display());
        self.symbols.insert(name.to_string(), callback);
        Ok(callback)
    }
}

/// Convert text to the NUL-terminated byte string the C boundary expects
fn marshal_text(name: &str, text: &str) -> Result<CString, LoadError> {
    CString::new(text.as_bytes()).map_err(|e| LoadError::InvalidArgument {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

impl PluginApi for NativePlugin {
    fn call(&mut self, name: &str, arg: Option<&str>) -> Result<Option<String>, LoadError> {
        ensure_callback_name(name)?;
        let status = match self.lookup(name)? {
            RawCallback::Text(func) => {
                let text = marshal_text(name, arg.unwrap_or_default())?;
                // Safety: `text` outlives the call and the library is still loaded
                unsafe { func(text.as_ptr()) }
            }
            RawCallback::Unit(func) => {
                if arg.is_some() {
                    debug!("{} takes no argument, ignoring the one given", name);
                }
                // Safety: the library is still loaded
                unsafe { func() }
            }
        };

        if status == 0 {
            Ok(None)
        } else {
            Err(LoadError::CallbackFailed {
                name: name.to_string(),
                reason: format!("returned status {status}"),
            })
        }
    }

    fn callbacks(&self) -> Vec<String> {
        let mut names: Vec<String> = self.symbols.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_missing_library() {
        let dir = tempdir().unwrap();
        let result = NativePlugin::open(&dir.path().join("libmissing.so"), &[]);
        assert!(matches!(result, Err(LoadError::Library(_))));
    }

    #[test]
    fn test_open_garbage_library() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("libgarbage.so");
        std::fs::write(&path, b"not an elf file").unwrap();
        assert!(matches!(
            NativePlugin::open(&path, &[]),
            Err(LoadError::Library(_))
        ));
    }

    #[test]
    fn test_marshal_rejects_interior_nul() {
        assert!(marshal_text("onSave", "ok").is_ok());
        assert!(matches!(
            marshal_text("onSave", "a\0b"),
            Err(LoadError::InvalidArgument { .. })
        ));
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn test_declared_symbol_must_exist() {
        let declared = vec![CallbackDecl {
            name: "onSave".into(),
            convention: Convention::Text,
        }];
        let result = NativePlugin::open(Path::new("libc.so.6"), &declared);
        assert!(matches!(result, Err(LoadError::SymbolNotFound(ref s)) if s == "onSave"));
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn test_undeclared_callback_resolved_lazily() {
        let mut plugin = NativePlugin::open(Path::new("libc.so.6"), &[]).unwrap();
        assert!(plugin.callbacks().is_empty());
        assert!(matches!(
            plugin.call("onResume", Some("state")),
            Err(LoadError::SymbolNotFound(_))
        ));
        assert!(matches!(
            plugin.call("getpid", None),
            Err(LoadError::IllegalCallbackName(_))
        ));
    }
}
