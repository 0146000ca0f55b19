//! Plugin manifest (`config.json`) parsing and validation.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::warn;

use crate::error::{PluginError, ValidationError};
use crate::plugins::api::EntryKind;

/// Manifest file name at the top level of every plugin archive
pub const MANIFEST_FILE: &str = "config.json";

/// Directory holding pre-built entry points inside an archive
pub const RELEASE_DIR: &str = "release";

pub const REQUIRED_FIELDS: [&str; 5] = ["name", "version", "author", "main", "license"];

static NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,63}$").expect("valid name regex"));

/// Lifecycle hooks a manifest may declare under `scripts`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Hook {
    PreInstall,
    PostInstall,
    PreUninstall,
    PostUninstall,
}

impl Hook {
    pub const ALL: [Hook; 4] = [
        Hook::PreInstall,
        Hook::PostInstall,
        Hook::PreUninstall,
        Hook::PostUninstall,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Hook::PreInstall => "pre-install",
            Hook::PostInstall => "post-install",
            Hook::PreUninstall => "pre-uninstall",
            Hook::PostUninstall => "post-uninstall",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|hook| hook.as_str() == name)
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `config.json` as written by the plugin author, before validation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawManifest {
    pub name: Option<String>,
    pub version: Option<String>,
    pub author: Option<String>,
    pub main: Option<String>,
    pub license: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub capability: Vec<String>,
    #[serde(default)]
    pub scripts: BTreeMap<String, String>,
}

impl RawManifest {
    /// Parse the manifest stored in `dir`
    ///
    /// # Errors
    /// Returns [`PluginError::Config`] if the file is missing or is not a
    /// manifest-shaped JSON object
    pub fn load_from_dir(dir: &Path) -> Result<Self, PluginError> {
        let path = dir.join(MANIFEST_FILE);
        let contents = fs::read_to_string(&path)
            .map_err(|e| PluginError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::parse(&contents)
    }

    /// Parse manifest JSON
    ///
    /// # Errors
    /// Returns [`PluginError::Config`] on malformed JSON or mistyped fields
    pub fn parse(contents: &str) -> Result<Self, PluginError> {
        serde_json::from_str(contents).map_err(|e| PluginError::Config(e.to_string()))
    }
}

/// A manifest that passed validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    pub author: String,
    pub main: String,
    pub license: String,
    pub description: Option<String>,
    pub keywords: Vec<String>,
    pub capability: Vec<String>,
    #[serde(skip)]
    pub scripts: BTreeMap<Hook, PathBuf>,
}

impl Manifest {
    #[must_use]
    pub fn hook(&self, hook: Hook) -> Option<&Path> {
        self.scripts.get(&hook).map(PathBuf::as_path)
    }

    /// Locate the entry point inside `root`: a pre-built copy under
    /// `release/` wins over one produced in place by a pre-install hook
    #[must_use]
    pub fn resolve_entry(&self, root: &Path) -> Option<PathBuf> {
        [root.join(RELEASE_DIR).join(&self.main), root.join(&self.main)]
            .into_iter()
            .find(|candidate| candidate.is_file())
    }
}

/// Decide whether a manifest unpacked at `archive_root` may be installed
///
/// # Errors
/// Returns the first failed check: missing required field, illegal name,
/// illegal entry, or an entry that nothing can provide
pub fn validate(raw: &RawManifest, archive_root: &Path) -> Result<Manifest, ValidationError> {
    let name = required(&raw.name, "name")?;
    let version = required(&raw.version, "version")?;
    let author = required(&raw.author, "author")?;
    let main = required(&raw.main, "main")?;
    let license = required(&raw.license, "license")?;

    if !NAME_REGEX.is_match(name) {
        return Err(ValidationError::IllegalName(name.to_string()));
    }

    if EntryKind::from_path(Path::new(main)).is_none() || !is_contained(main) {
        return Err(ValidationError::IllegalEntry(main.to_string()));
    }

    let mut scripts = BTreeMap::new();
    for (key, script) in &raw.scripts {
        let Some(hook) = Hook::from_name(key) else {
            warn!("Ignoring unknown hook '{}' in manifest of {}", key, name);
            continue;
        };
        if !is_contained(script) {
            return Err(ValidationError::IllegalEntry(script.clone()));
        }
        scripts.insert(hook, PathBuf::from(script));
    }

    let pre_built = archive_root.join(RELEASE_DIR).join(main).is_file();
    let post_built = scripts.contains_key(&Hook::PreInstall);
    if !(pre_built || post_built) {
        return Err(ValidationError::EntryUnresolvable(main.to_string()));
    }

    Ok(Manifest {
        name: name.to_string(),
        version: version.to_string(),
        author: author.to_string(),
        main: main.to_string(),
        license: license.to_string(),
        description: raw.description.clone(),
        keywords: raw.keywords.clone(),
        capability: raw.capability.clone(),
        scripts,
    })
}

fn required<'a>(
    field: &'a Option<String>,
    name: &'static str,
) -> Result<&'a str, ValidationError> {
    field
        .as_deref()
        .ok_or(ValidationError::MissingField(name))
}

/// Relative, non-empty, and free of `..`
fn is_contained(path: &str) -> bool {
    let p = Path::new(path);
    !path.is_empty()
        && p.components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn full_manifest() -> RawManifest {
        RawManifest {
            name: Some("notes".into()),
            version: Some("1.0.0".into()),
            author: Some("Mark".into()),
            main: Some("main.lua".into()),
            license: Some("MIT".into()),
            ..RawManifest::default()
        }
    }

    fn archive_with_release(main: &str) -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        let release = dir.path().join(RELEASE_DIR);
        fs::create_dir_all(&release).unwrap();
        fs::write(release.join(main), "return {}").unwrap();
        dir
    }

    #[test]
    fn test_valid_prebuilt_manifest() {
        let dir = archive_with_release("main.lua");
        let manifest = validate(&full_manifest(), dir.path()).unwrap();
        assert_eq!(manifest.name, "notes");
        assert_eq!(manifest.main, "main.lua");
    }

    #[test]
    fn test_illegal_entry_suffix() {
        let dir = archive_with_release("main.py");
        let mut raw = full_manifest();
        raw.main = Some("main.py".into());
        assert_eq!(
            validate(&raw, dir.path()),
            Err(ValidationError::IllegalEntry("main.py".into()))
        );
    }

    #[test]
    fn test_entry_escaping_archive_is_illegal() {
        let dir = tempdir().unwrap();
        let mut raw = full_manifest();
        raw.main = Some("../evil.so".into());
        assert!(matches!(
            validate(&raw, dir.path()),
            Err(ValidationError::IllegalEntry(_))
        ));
    }

    #[test]
    fn test_entry_unresolvable_without_release_or_hook() {
        let dir = tempdir().unwrap();
        assert_eq!(
            validate(&full_manifest(), dir.path()),
            Err(ValidationError::EntryUnresolvable("main.lua".into()))
        );
    }

    #[test]
    fn test_pre_install_hook_makes_entry_resolvable() {
        let dir = tempdir().unwrap();
        let mut raw = full_manifest();
        raw.scripts
            .insert("pre-install".into(), "build.lua".into());
        raw.scripts.insert("on-reboot".into(), "x.lua".into());
        let manifest = validate(&raw, dir.path()).unwrap();
        assert_eq!(manifest.hook(Hook::PreInstall), Some(Path::new("build.lua")));
        assert_eq!(manifest.scripts.len(), 1);
    }

    #[test]
    fn test_illegal_name() {
        let dir = archive_with_release("main.lua");
        let mut raw = full_manifest();
        raw.name = Some("../notes".into());
        assert!(matches!(
            validate(&raw, dir.path()),
            Err(ValidationError::IllegalName(_))
        ));
    }

    #[test]
    fn test_parse_rejects_mistyped_field() {
        let result = RawManifest::parse(r#"{"name": 5}"#);
        assert!(matches!(result, Err(PluginError::Config(_))));
    }

    #[test]
    fn test_parse_optional_fields() {
        let raw = RawManifest::parse(
            r#"{
                "name": "notes", "version": "1.0", "author": "a", "main": "libnotes.so",
                "license": "MIT", "keywords": ["text"], "capability": ["onTrigger:text"],
                "scripts": {"post-install": "setup.sh"}
            }"#,
        )
        .unwrap();
        assert_eq!(raw.keywords, vec!["text".to_string()]);
        assert_eq!(raw.capability, vec!["onTrigger:text".to_string()]);
        assert_eq!(raw.scripts.get("post-install").map(String::as_str), Some("setup.sh"));
    }

    #[test]
    fn test_resolve_entry_prefers_release() {
        let dir = archive_with_release("main.lua");
        fs::write(dir.path().join("main.lua"), "return {}").unwrap();
        let manifest = validate(&full_manifest(), dir.path()).unwrap();
        assert_eq!(
            manifest.resolve_entry(dir.path()),
            Some(dir.path().join(RELEASE_DIR).join("main.lua"))
        );
    }

    proptest! {
        #[test]
        fn prop_any_missing_required_field_is_reported(idx in 0usize..5) {
            let dir = archive_with_release("main.lua");
            let mut raw = full_manifest();
            match idx {
                0 => raw.name = None,
                1 => raw.version = None,
                2 => raw.author = None,
                3 => raw.main = None,
                _ => raw.license = None,
            }
            prop_assert_eq!(
                validate(&raw, dir.path()),
                Err(ValidationError::MissingField(REQUIRED_FIELDS[idx]))
            );
        }

        #[test]
        fn prop_unrecognized_suffix_is_illegal(stem in "[a-z]{1,8}", ext in "(py|js|exe|txt|luac)") {
            let dir = tempdir().unwrap();
            let mut raw = full_manifest();
            raw.main = Some(format!("{stem}.{ext}"));
            prop_assert!(matches!(
                validate(&raw, dir.path()),
                Err(ValidationError::IllegalEntry(_))
            ));
        }
    }
}
