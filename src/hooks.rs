//! Lifecycle hook runner
//!
//! Runs the scripts a manifest declares under `scripts`. `.lua` hooks execute
//! in an embedded Lua state with a global `context` table (`plugin`, `dir`,
//! `hook`); Lua file paths are relative to the process, so hooks should build
//! them from `context.dir`. Any other script runs as a child process in the
//! plugin directory, `.sh` files through `sh`.

use mlua::Lua;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

use crate::error::PluginError;
use crate::manifest::Hook;
use crate::plugins::script::SANDBOX_PRELUDE;

/// What a hook is told about the plugin it runs for
#[derive(Debug, Clone)]
pub struct HookContext<'a> {
    pub plugin: &'a str,
    /// Working directory of the hook
    pub dir: &'a Path,
    pub hook: Hook,
}

/// Executes lifecycle hook scripts
pub struct HookRunner;

impl HookRunner {
    /// Run `script` for `ctx.hook`
    ///
    /// # Errors
    /// Returns [`PluginError::Hook`] if the script is missing, fails to run,
    /// or exits unsuccessfully
    pub fn run(script: &Path, ctx: &HookContext<'_>) -> Result<(), PluginError> {
        if !script.is_file() {
            return Err(hook_error(
                ctx.hook,
                format!("script {} not found", script.display()),
            ));
        }

        info!("Running {} hook for {}: {}", ctx.hook, ctx.plugin, script.display());
        match script.extension().and_then(|ext| ext.to_str()) {
            Some("lua") => Self::run_lua(script, ctx),
            Some("sh") => {
                let shell = which::which("sh")
                    .map_err(|e| hook_error(ctx.hook, format!("sh not available: {e}")))?;
                let mut cmd = Command::new(shell);
                cmd.arg(script);
                Self::run_process(cmd, ctx)
            }
            _ => Self::run_process(Command::new(script), ctx),
        }
    }

    fn run_lua(script: &Path, ctx: &HookContext<'_>) -> Result<(), PluginError> {
        let source = std::fs::read_to_string(script)?;
        let lua = Lua::new();

        let setup = || -> mlua::Result<()> {
            lua.load(SANDBOX_PRELUDE).exec()?;
            let context = lua.create_table()?;
            context.set("plugin", ctx.plugin)?;
            context.set("dir", ctx.dir.display().to_string())?;
            context.set("hook", ctx.hook.as_str())?;
            lua.globals().set("context", context)?;
            Ok(())
        };
        setup().map_err(|e| hook_error(ctx.hook, e.to_string()))?;

        lua.load(source.as_str())
            .set_name(script.display().to_string())
            .exec()
            .map_err(|e| {
                warn!("Lua {} hook failed: {}", ctx.hook, e);
                hook_error(ctx.hook, e.to_string())
            })?;

        debug!("Executed Lua hook successfully");
        Ok(())
    }

    fn run_process(mut cmd: Command, ctx: &HookContext<'_>) -> Result<(), PluginError> {
        let output = cmd
            .current_dir(ctx.dir)
            .env("VDM_PLUGIN_NAME", ctx.plugin)
            .env("VDM_PLUGIN_DIR", ctx.dir)
            .env("VDM_HOOK", ctx.hook.as_str())
            .output()
            .map_err(|e| hook_error(ctx.hook, format!("failed to start: {e}")))?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            debug!("[{}] {}", ctx.hook, line);
        }

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(hook_error(
                ctx.hook,
                format!("{}: {}", output.status, stderr.trim()),
            ))
        }
    }

    /// Copy `script` to `scratch` so it can still run after its plugin
    /// directory is gone; returns the copied path
    ///
    /// # Errors
    /// Returns an I/O error if the copy fails
    pub fn detach(script: &Path, scratch: &Path, plugin: &str) -> Result<PathBuf, PluginError> {
        std::fs::create_dir_all(scratch)?;
        let file_name = script
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let detached = scratch.join(format!("{plugin}-{file_name}"));
        std::fs::copy(script, &detached)?;
        Ok(detached)
    }
}

fn hook_error(hook: Hook, reason: String) -> PluginError {
    PluginError::Hook {
        hook: hook.to_string(),
        reason,
    }
}
