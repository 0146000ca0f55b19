// Plugin loading behind one calling surface:
// - Lua modules returning a marked service table
// - Dynamic libraries exporting `on*` C callbacks, with explicit text marshalling
pub mod api;
pub mod loader;
pub mod native;
pub mod script;

pub use api::{EntryKind, PluginApi};
pub use loader::{LoadedPlugin, PluginLoader};
