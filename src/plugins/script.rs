//! Lua-module plugins.
//!
//! The entry file is executed once; it must return its service table:
//!
//! ```lua
//! local plugin = { service = "vdm-plugin" }
//! function plugin:onSave(text) return "saved " .. text end
//! return plugin
//! ```

use mlua::{Lua, RegistryKey, Table, Value};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use super::api::{ensure_callback_name, is_callback_name, PluginApi, SERVICE_MARKER};
use crate::error::LoadError;

/// Functions removed from every plugin and hook Lua state
pub(crate) const SANDBOX_PRELUDE: &str = r#"
    os.execute = nil
    os.exit = nil
    io.popen = nil
    loadfile = nil
    dofile = nil
"#;

/// A plugin backed by a Lua service table
pub struct ScriptPlugin {
    service: RegistryKey,
    lua: Lua,
}

impl ScriptPlugin {
    /// Execute the module at `path` and keep the service table it returns
    ///
    /// # Errors
    /// Returns [`LoadError::Script`] if the module fails to run and
    /// [`LoadError::NoServiceObject`] if it returns anything but a marked table
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let source = fs::read_to_string(path)
            .map_err(|e| LoadError::Script(format!("cannot read {}: {e}", path.display())))?;

        let lua = Lua::new();
        lua.load(SANDBOX_PRELUDE).exec()?;
        if let Some(dir) = path.parent() {
            let package: Table = lua.globals().get("package")?;
            let search: String = package.get("path")?;
            package.set("path", format!("{}/?.lua;{search}", dir.display()))?;
        }

        // The exported value borrows `lua`; keep it scoped so `lua` can move below
        let service = {
            let exported: Value = lua
                .load(source.as_str())
                .set_name(path.display().to_string())
                .eval()?;

            match exported {
                Value::Table(table) if is_service(&table) => lua.create_registry_value(table)?,
                other => {
                    debug!(
                        "{} returned a {} instead of a service table",
                        path.display(),
                        other.type_name()
                    );
                    return Err(LoadError::NoServiceObject(path.to_path_buf()));
                }
            }
        };

        info!("Script plugin loaded: {}", path.display());
        Ok(Self { service, lua })
    }
}

fn is_service(table: &Table) -> bool {
    let marker: Option<String> = table.get("service").unwrap_or(None);
    marker.as_deref() == Some(SERVICE_MARKER)
}

/// Text form of a callback's return value; `nil` means no output
fn output_text(name: &str, value: Value) -> Result<Option<String>, LoadError> {
    match value {
        Value::Nil => Ok(None),
        Value::String(s) => Ok(Some(s.to_str()?.to_string())),
        Value::Integer(i) => Ok(Some(i.to_string())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Boolean(b) => Ok(Some(b.to_string())),
        other => Err(LoadError::CallbackFailed {
            name: name.to_string(),
            reason: format!("returned a {}", other.type_name()),
        }),
    }
}

impl PluginApi for ScriptPlugin {
    fn call(&mut self, name: &str, arg: Option<&str>) -> Result<Option<String>, LoadError> {
        ensure_callback_name(name)?;

        let service: Table = self.lua.registry_value(&self.service)?;
        let callback = match service.get::<_, Value>(name)? {
            Value::Function(func) => func,
            _ => return Err(LoadError::SymbolNotFound(name.to_string())),
        };

        let result: Value = callback
            .call((service, arg))
            .map_err(|e| LoadError::CallbackFailed {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        output_text(name, result)
    }

    fn callbacks(&self) -> Vec<String> {
        let Ok(service) = self.lua.registry_value::<Table>(&self.service) else {
            return Vec::new();
        };
        let mut names: Vec<String> = service
            .pairs::<Value, Value>()
            .filter_map(Result::ok)
            .filter_map(|(key, value)| match (key, value) {
                (Value::String(key), Value::Function(_)) => key.to_str().ok().map(str::to_string),
                _ => None,
            })
            .filter(|key| is_callback_name(key))
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    const NOTES_PLUGIN: &str = r#"
        local plugin = { service = "vdm-plugin", saved = {} }
        function plugin:onSave(text)
            table.insert(self.saved, text)
            return "saved " .. text
        end
        function plugin:onCount() return #self.saved end
        function plugin:onBroken() error("disk full") end
        function plugin:helper() return "internal" end
        return plugin
    "#;

    fn write_entry(source: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("main.lua");
        fs::write(&path, source).unwrap();
        (dir, path)
    }

    #[test]
    fn test_load_and_call() {
        let (_dir, path) = write_entry(NOTES_PLUGIN);
        let mut plugin = ScriptPlugin::load(&path).unwrap();
        assert_eq!(
            plugin.call("onSave", Some("draft")).unwrap(),
            Some("saved draft".to_string())
        );
        assert_eq!(plugin.call("onCount", None).unwrap(), Some("1".to_string()));
    }

    #[test]
    fn test_plugin_moves_out_of_loader() {
        let (_dir, path) = write_entry(NOTES_PLUGIN);
        let load = |path: &Path| -> Result<Box<dyn PluginApi>, LoadError> {
            Ok(Box::new(ScriptPlugin::load(path)?))
        };
        let mut plugin = load(&path).unwrap();
        assert_eq!(
            plugin.call("onSave", Some("moved")).unwrap(),
            Some("saved moved".to_string())
        );
    }

    #[test]
    fn test_callbacks_listed_without_internals() {
        let (_dir, path) = write_entry(NOTES_PLUGIN);
        let plugin = ScriptPlugin::load(&path).unwrap();
        assert_eq!(plugin.callbacks(), vec!["onBroken", "onCount", "onSave"]);
    }

    #[test]
    fn test_non_callback_names_rejected() {
        let (_dir, path) = write_entry(NOTES_PLUGIN);
        let mut plugin = ScriptPlugin::load(&path).unwrap();
        assert!(matches!(
            plugin.call("helper", None),
            Err(LoadError::IllegalCallbackName(_))
        ));
    }

    #[test]
    fn test_absent_callback_is_symbol_not_found() {
        let (_dir, path) = write_entry(NOTES_PLUGIN);
        let mut plugin = ScriptPlugin::load(&path).unwrap();
        assert!(matches!(
            plugin.call("onResume", Some("x")),
            Err(LoadError::SymbolNotFound(_))
        ));
    }

    #[test]
    fn test_callback_error_reported() {
        let (_dir, path) = write_entry(NOTES_PLUGIN);
        let mut plugin = ScriptPlugin::load(&path).unwrap();
        match plugin.call("onBroken", None) {
            Err(LoadError::CallbackFailed { name, reason }) => {
                assert_eq!(name, "onBroken");
                assert!(reason.contains("disk full"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_missing_marker_is_no_service_object() {
        let (_dir, path) = write_entry("return { onSave = function() end }");
        assert!(matches!(
            ScriptPlugin::load(&path),
            Err(LoadError::NoServiceObject(_))
        ));
    }

    #[test]
    fn test_module_returning_nothing() {
        let (_dir, path) = write_entry("local x = 1");
        assert!(matches!(
            ScriptPlugin::load(&path),
            Err(LoadError::NoServiceObject(_))
        ));
    }

    #[test]
    fn test_syntax_error_is_script_error() {
        let (_dir, path) = write_entry("this is not lua");
        assert!(matches!(ScriptPlugin::load(&path), Err(LoadError::Script(_))));
    }

    #[test]
    fn test_dangerous_functions_disabled() {
        let (_dir, path) = write_entry("os.execute('ls') return {}");
        assert!(matches!(ScriptPlugin::load(&path), Err(LoadError::Script(_))));
    }

    #[test]
    fn test_require_sibling_module() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("util.lua"),
            "return { shout = function(s) return string.upper(s) end }",
        )
        .unwrap();
        let path = dir.path().join("main.lua");
        fs::write(
            &path,
            r#"
            local util = require("util")
            return { service = "vdm-plugin", onSave = function(self, t) return util.shout(t) end }
            "#,
        )
        .unwrap();
        let mut plugin = ScriptPlugin::load(&path).unwrap();
        assert_eq!(
            plugin.call("onSave", Some("hi")).unwrap(),
            Some("HI".to_string())
        );
    }
}
