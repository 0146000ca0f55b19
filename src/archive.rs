//! Plugin archive unpacking.
//!
//! Supports zip, tar and gzip-compressed tar. The format comes from the file
//! suffix, or from the leading magic bytes when the suffix is unknown.

use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::PluginError;
use crate::manifest::MANIFEST_FILE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
}

impl ArchiveFormat {
    /// Detect the format of the archive at `path`
    ///
    /// # Errors
    /// Returns an error if the file cannot be read
    pub fn detect(path: &Path) -> io::Result<Option<Self>> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if name.ends_with(".zip") {
            return Ok(Some(Self::Zip));
        }
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            return Ok(Some(Self::TarGz));
        }
        if name.ends_with(".tar") {
            return Ok(Some(Self::Tar));
        }

        let mut magic = [0u8; 262];
        let read = File::open(path)?.read(&mut magic)?;
        let magic = &magic[..read];
        Ok(if magic.starts_with(b"PK\x03\x04") {
            Some(Self::Zip)
        } else if magic.starts_with(&[0x1f, 0x8b]) {
            Some(Self::TarGz)
        } else if magic.len() >= 262 && &magic[257..262] == b"ustar" {
            Some(Self::Tar)
        } else {
            None
        })
    }
}

/// Base name of an archive with its archive suffixes stripped
/// (`notes-1.0.tar.gz` → `notes-1.0`)
#[must_use]
pub fn stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    for suffix in [".tar.gz", ".tgz", ".tar", ".zip"] {
        if name.len() > suffix.len() && name.to_lowercase().ends_with(suffix) {
            return name[..name.len() - suffix.len()].to_string();
        }
    }
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or(name)
}

/// Unpack the archive at `path` into `dest`
///
/// # Errors
/// Returns [`PluginError::Unpack`] for unknown formats and corrupt archives
pub fn unpack(path: &Path, dest: &Path) -> Result<(), PluginError> {
    let unpack_error = |reason: String| PluginError::Unpack {
        path: path.to_path_buf(),
        reason,
    };

    let format = ArchiveFormat::detect(path)
        .map_err(|e| unpack_error(e.to_string()))?
        .ok_or_else(|| unpack_error("unsupported archive format".to_string()))?;
    debug!("Unpacking {:?} archive {}", format, path.display());

    let file = File::open(path).map_err(|e| unpack_error(e.to_string()))?;
    match format {
        ArchiveFormat::Zip => {
            let mut archive = zip::ZipArchive::new(file).map_err(|e| unpack_error(e.to_string()))?;
            archive.extract(dest).map_err(|e| unpack_error(e.to_string()))
        }
        ArchiveFormat::Tar => tar::Archive::new(file)
            .unpack(dest)
            .map_err(|e| unpack_error(e.to_string())),
        ArchiveFormat::TarGz => tar::Archive::new(GzDecoder::new(file))
            .unpack(dest)
            .map_err(|e| unpack_error(e.to_string())),
    }
}

/// Directory holding the manifest inside an unpacked archive
///
/// Archives made by zipping a folder wrap everything in one directory; when
/// the top level has no manifest but a single directory that does, that
/// directory is the content root.
#[must_use]
pub fn content_root(unpacked: &Path) -> PathBuf {
    if unpacked.join(MANIFEST_FILE).is_file() {
        return unpacked.to_path_buf();
    }
    let Ok(entries) = fs::read_dir(unpacked) else {
        return unpacked.to_path_buf();
    };
    let entries: Vec<_> = entries.filter_map(Result::ok).collect();
    match entries.as_slice() {
        [only] if only.path().join(MANIFEST_FILE).is_file() => only.path(),
        _ => unpacked.to_path_buf(),
    }
}
