use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Scratch extraction directory for one install attempt
///
/// The directory is removed when the workspace is dropped, whatever the
/// outcome of the install. Content promoted into the plugin root before the
/// drop is already gone from it, so cleanup only sees what is left over.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    /// Claim `path` as a fresh, empty workspace
    ///
    /// A stale directory at `path` is cleared first, unless it contains `keep`.
    ///
    /// # Errors
    /// Returns [`io::ErrorKind::InvalidInput`] if `keep` lies inside a stale
    /// directory at `path`, or an error clearing or creating the directory
    pub fn create<P: AsRef<Path>>(path: P, keep: Option<&Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            if let Some(keep) = keep.filter(|keep| contains(&path, keep)) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "refusing to clear workspace {}: it holds {}",
                        path.display(),
                        keep.display()
                    ),
                ));
            }
            debug!("Clearing stale workspace {}", path.display());
            fs::remove_dir_all(&path)?;
        }
        fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("Workspace {} removed", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove workspace {}: {}", self.path.display(), e),
        }
    }
}

/// Move the directory tree `from` to `to`
///
/// Falls back to copying when a rename is impossible (e.g. across
/// filesystems): the copy lands in a hidden sibling of `to` first and is
/// renamed into place only once complete.
///
/// # Errors
/// Returns an error if `to` exists or the tree cannot be moved
pub fn relocate(from: &Path, to: &Path) -> io::Result<()> {
    if to.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", to.display()),
        ));
    }

    if fs::rename(from, to).is_ok() {
        return Ok(());
    }

    let staging = staging_path(to);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    if let Err(e) = copy_dir_all(from, &staging) {
        let _ = fs::remove_dir_all(&staging);
        return Err(e);
    }
    fs::rename(&staging, to)?;
    fs::remove_dir_all(from)
}

fn contains(dir: &Path, inner: &Path) -> bool {
    match (dir.canonicalize(), inner.canonicalize()) {
        (Ok(dir), Ok(inner)) => inner.starts_with(dir),
        _ => inner.starts_with(dir),
    }
}

fn staging_path(to: &Path) -> PathBuf {
    let name = to
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    to.with_file_name(format!(".{name}.partial"))
}

fn copy_dir_all(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
