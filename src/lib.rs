//! vdm-plugins - a local plugin manager
//!
//! Installs plugin packages from archives into a managed root, validates
//! their manifests, and calls into their entry points, which are either Lua
//! modules or native dynamic libraries.
//!
//! # Modules
//!
//! - [`manager`]: install / uninstall / list / run orchestration
//! - [`manifest`]: `config.json` parsing and validation
//! - [`plugins`]: Lua and native loaders behind one calling surface
//! - [`workspace`]: scoped extraction directories
//! - [`archive`]: zip and tar unpacking
//! - [`hooks`]: lifecycle hook scripts
//! - [`config`]: manager configuration
//! - [`error`]: error types

pub mod archive;
pub mod config;
pub mod error;
pub mod hooks;
pub mod manager;
pub mod manifest;
pub mod plugins;
pub mod workspace;

pub use config::Config;
pub use error::{LoadError, PluginError, ValidationError};
pub use manager::{PluginManager, PluginRecord, UninstallReport};
