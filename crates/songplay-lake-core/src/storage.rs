//! Local storage backend used by the record source and the table sink.
//!
//! Everything that touches the filesystem goes through these helpers so the
//! projection code never builds paths or handles I/O errors by hand. Paths are
//! always relative to a [`StorageLocation`] root.
//!
//! Writes follow a write-then-rename protocol: payloads land in a temporary
//! file next to the target, are synced, and are renamed into place. Whole
//! tables are swapped the same way one level up (see [`crate::sink`]).

mod error;

pub use error::{BackendError, StorageError};
pub(crate) use error::{NotFoundSnafu, OtherIoSnafu};

use std::{
    fmt, io,
    path::{Path, PathBuf},
};

use snafu::{IntoError, prelude::*};
use tokio::{fs, io::AsyncWriteExt};

/// General result type used by storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Root of a storage backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageLocation {
    /// A directory on the local filesystem.
    Local(PathBuf),
}

impl StorageLocation {
    /// Creates a new `StorageLocation` for a local filesystem path.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        StorageLocation::Local(root.into())
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageLocation::Local(root) => write!(f, "{}", root.display()),
        }
    }
}

/// Access credentials handed to a storage backend at construction time.
///
/// `Debug` never prints the secret, and prints only a prefix of the key id.
#[derive(Clone, PartialEq, Eq)]
pub struct StorageCredentials {
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
}

impl fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageCredentials")
            .field("access_key_id", &redact(&self.access_key_id))
            .field("secret_access_key", &"***")
            .finish()
    }
}

fn redact(value: &str) -> String {
    let prefix: String = value.chars().take(4).collect();
    format!("{prefix}***")
}

/// Join a storage location with a relative path into an absolute local path.
pub(crate) fn join_local(location: &StorageLocation, rel: &Path) -> PathBuf {
    match location {
        StorageLocation::Local(root) => root.join(rel),
    }
}

fn classify(abs: &Path, e: io::Error) -> StorageError {
    let path = abs.display().to_string();
    if e.kind() == io::ErrorKind::NotFound {
        NotFoundSnafu { path }.into_error(BackendError::Local(e))
    } else {
        OtherIoSnafu { path }.into_error(BackendError::Local(e))
    }
}

async fn create_parent_dir(abs: &Path) -> StorageResult<()> {
    if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(BackendError::Local)
            .context(OtherIoSnafu {
                path: parent.display().to_string(),
            })?;
    }
    Ok(())
}

/// Guard that removes a temporary file on drop unless disarmed.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    /// Call after a successful rename.
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            // Best-effort cleanup; we're likely already handling another error.
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Write `contents` to `rel_path` inside `location` using an atomic write.
///
/// The payload goes to a temporary sibling file, is synced, and is then
/// renamed over the target. Parent directories are created as needed.
pub async fn write_atomic(
    location: &StorageLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    let abs = join_local(location, rel_path);
    create_parent_dir(&abs).await?;

    let tmp_path = abs.with_extension("tmp");
    let mut guard = TempFileGuard::new(tmp_path.clone());

    {
        let mut file = fs::File::create(&tmp_path)
            .await
            .map_err(BackendError::Local)
            .context(OtherIoSnafu {
                path: tmp_path.display().to_string(),
            })?;

        file.write_all(contents)
            .await
            .map_err(BackendError::Local)
            .context(OtherIoSnafu {
                path: tmp_path.display().to_string(),
            })?;

        file.sync_all()
            .await
            .map_err(BackendError::Local)
            .context(OtherIoSnafu {
                path: tmp_path.display().to_string(),
            })?;
    }

    fs::rename(&tmp_path, &abs)
        .await
        .map_err(BackendError::Local)
        .context(OtherIoSnafu {
            path: abs.display().to_string(),
        })?;

    guard.disarm();
    Ok(())
}

/// Read the full contents of the file at `rel_path`.
pub async fn read_all_bytes(location: &StorageLocation, rel_path: &Path) -> StorageResult<Vec<u8>> {
    let abs = join_local(location, rel_path);
    fs::read(&abs).await.map_err(|e| classify(&abs, e))
}

/// Whether anything exists at `rel_path`.
pub async fn exists(location: &StorageLocation, rel_path: &Path) -> StorageResult<bool> {
    let abs = join_local(location, rel_path);
    match fs::metadata(&abs).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(classify(&abs, e)),
    }
}

/// One child of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// File or directory name (the last path component).
    pub name: String,
    /// Path relative to the storage root.
    pub rel_path: PathBuf,
    /// True for directories.
    pub is_dir: bool,
}

/// List the children of the directory at `rel_dir`, sorted by name.
///
/// Symlinks are followed, so a link to a directory reports `is_dir`. A
/// dangling link is `StorageError::OtherIo`. Names that are not valid UTF-8
/// are skipped. A missing directory is `StorageError::NotFound`.
pub async fn list_dir(location: &StorageLocation, rel_dir: &Path) -> StorageResult<Vec<DirEntry>> {
    let abs = join_local(location, rel_dir);
    let mut rd = fs::read_dir(&abs).await.map_err(|e| classify(&abs, e))?;

    let mut out = Vec::new();
    while let Some(entry) = rd.next_entry().await.map_err(|e| classify(&abs, e))? {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        let target = entry.path();
        let metadata = fs::metadata(&target)
            .await
            .map_err(BackendError::Local)
            .context(OtherIoSnafu {
                path: target.display().to_string(),
            })?;
        out.push(DirEntry {
            rel_path: rel_dir.join(&name),
            name,
            is_dir: metadata.is_dir(),
        });
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}

/// Rename `from` to `to`, both relative to `location`.
pub async fn rename(location: &StorageLocation, from: &Path, to: &Path) -> StorageResult<()> {
    let abs_from = join_local(location, from);
    let abs_to = join_local(location, to);
    create_parent_dir(&abs_to).await?;
    fs::rename(&abs_from, &abs_to)
        .await
        .map_err(|e| classify(&abs_from, e))
}

/// Recursively remove the directory at `rel_dir`; a missing directory is fine.
pub async fn remove_dir_all_if_exists(
    location: &StorageLocation,
    rel_dir: &Path,
) -> StorageResult<()> {
    let abs = join_local(location, rel_dir);
    match fs::remove_dir_all(&abs).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(classify(&abs, e)),
    }
}

/// Remove the directory at `rel_dir` if it is empty. Returns whether it was
/// removed; a non-empty or missing directory is left alone.
pub async fn remove_dir_if_empty(location: &StorageLocation, rel_dir: &Path) -> bool {
    let abs = join_local(location, rel_dir);
    fs::remove_dir(&abs).await.is_ok()
}
