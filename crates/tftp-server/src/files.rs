//! File source for read requests.
//!
//! The engine only ever opens files through [`FileSource`]. The filesystem
//! implementation confines every request to a served root directory: the
//! filename is resolved once, checked against the root, and that single
//! resolved path is used for the existence check, the open and the size query.

use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;
use tracing::debug;

/// Sequential reader over an opened file
pub type FileReader = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Errors returned when opening a requested file
#[derive(Debug, Error)]
pub enum FileSourceError {
    /// No regular file at the resolved path
    #[error("{} cannot be found", .0.display())]
    NotFound(PathBuf),

    /// Requested name resolves outside the served root
    #[error("{0} is outside the served directory")]
    OutsideRoot(String),

    /// File exists but may not be read
    #[error("{} cannot be read: permission denied", .0.display())]
    PermissionDenied(PathBuf),

    /// Any other IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// A file opened for a transfer
pub struct OpenFile {
    /// Resolved path, used in logs and error messages
    pub path: PathBuf,
    /// Size in bytes at open time, reported through `tsize`
    pub size: u64,
    /// Reader positioned at the start of the file
    pub reader: FileReader,
}

impl fmt::Debug for OpenFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenFile")
            .field("path", &self.path)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Trait for opening files by request name
///
/// This trait enables mocking of file access for unit testing.
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Opens `filename` for sequential reading.
    async fn open(&self, filename: &str) -> Result<OpenFile, FileSourceError>;
}

/// Serves files from a directory on the local filesystem
#[derive(Debug, Clone)]
pub struct FsFileSource {
    root: PathBuf,
}

impl FsFileSource {
    /// Creates a file source rooted at `root`, which must be an existing directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, FileSourceError> {
        let root = root.as_ref();
        let canonical = std::fs::canonicalize(root).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => FileSourceError::NotFound(root.to_path_buf()),
            _ => FileSourceError::Io(e),
        })?;
        if !canonical.is_dir() {
            return Err(FileSourceError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", canonical.display()),
            )));
        }
        Ok(Self { root: canonical })
    }

    /// Canonical served root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Joins a request filename onto the root without touching the filesystem.
    ///
    /// Leading slashes are stripped, so `/boot/kernel` and `boot/kernel` name
    /// the same file. Any `..` component is refused outright.
    pub fn resolve(&self, filename: &str) -> Result<PathBuf, FileSourceError> {
        let relative = Path::new(filename.trim_start_matches('/'));
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(FileSourceError::OutsideRoot(filename.to_string()));
                }
            }
        }
        Ok(resolved)
    }
}

#[async_trait]
impl FileSource for FsFileSource {
    async fn open(&self, filename: &str) -> Result<OpenFile, FileSourceError> {
        let candidate = self.resolve(filename)?;

        // Symlinks may still point outside the root.
        let path = tokio::fs::canonicalize(&candidate)
            .await
            .map_err(|e| open_error(e, &candidate))?;
        if !path.starts_with(&self.root) {
            return Err(FileSourceError::OutsideRoot(filename.to_string()));
        }

        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| open_error(e, &candidate))?;
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(FileSourceError::NotFound(candidate));
        }

        debug!("Opened {} ({} bytes)", path.display(), metadata.len());
        Ok(OpenFile {
            path,
            size: metadata.len(),
            reader: Box::new(file),
        })
    }
}

fn open_error(error: io::Error, path: &Path) -> FileSourceError {
    match error.kind() {
        io::ErrorKind::NotFound => FileSourceError::NotFound(path.to_path_buf()),
        io::ErrorKind::PermissionDenied => FileSourceError::PermissionDenied(path.to_path_buf()),
        _ => FileSourceError::Io(error),
    }
}
