use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::{CacheError, OpenMode, SharedMap};

/// An open regular file shared by every request serving it.
///
/// The file is closed when the last `Arc<FileDescriptor>` is dropped.
#[derive(Debug)]
pub struct FileDescriptor {
    file: File,
    path: PathBuf,
    mode: OpenMode,
    len: u64,
}

impl FileDescriptor {
    fn open(path: &Path, mode: OpenMode) -> Result<Self, CacheError> {
        let file = OpenOptions::new()
            .read(true)
            .write(mode == OpenMode::ReadWrite)
            .open(path)
            .map_err(|e| CacheError::from_io(path, e))?;

        let metadata = file.metadata().map_err(|e| CacheError::from_io(path, e))?;
        if !metadata.is_file() {
            return Err(CacheError::NotAFile {
                path: path.to_path_buf(),
            });
        }

        debug!(path = %path.display(), ?mode, len = metadata.len(), "opened file");
        Ok(Self {
            file,
            path: path.to_path_buf(),
            mode,
            len: metadata.len(),
        })
    }

    /// Path the file was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mode the file was opened with.
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// File length observed when the file was opened.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns `true` if the file was empty when opened.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Fills `buf` from `offset` with positioned reads.
    ///
    /// Fails with `UnexpectedEof` if the file is now shorter than
    /// `offset + buf.len()`.
    pub fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        self.file.read_exact_at(buf, offset)
    }
}

impl AsFd for FileDescriptor {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl AsRawFd for FileDescriptor {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

/// Cache of open files keyed by `(path, mode)`.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use rtsf::cache::{DescriptorCache, OpenMode};
///
/// let cache = DescriptorCache::new();
/// let a = cache.acquire("/srv/www/index.html", OpenMode::ReadOnly)?;
/// let b = cache.acquire("/srv/www/index.html", OpenMode::ReadOnly)?;
/// assert!(Arc::ptr_eq(&a, &b));
/// assert_eq!(cache.ref_count("/srv/www/index.html", OpenMode::ReadOnly), 2);
/// # Ok::<(), rtsf::cache::CacheError>(())
/// ```
pub struct DescriptorCache {
    entries: SharedMap<FileDescriptor>,
}

impl Default for DescriptorCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            entries: SharedMap::new(),
        }
    }

    /// Returns the shared descriptor for `path`, opening it on a miss.
    ///
    /// Blocks while another caller opens the same key. Call from a blocking
    /// context (e.g. `spawn_blocking`), never directly on a reactor thread.
    ///
    /// # Errors
    ///
    /// [`CacheError::NotFound`], [`CacheError::PermissionDenied`],
    /// [`CacheError::NotAFile`] or [`CacheError::Io`].
    pub fn acquire(
        &self,
        path: impl AsRef<Path>,
        mode: OpenMode,
    ) -> Result<Arc<FileDescriptor>, CacheError> {
        let path = path.as_ref();
        self.entries
            .get_or_try_insert((path.to_path_buf(), mode), || FileDescriptor::open(path, mode))
    }

    /// Number of live handles to the descriptor for `(path, mode)`.
    pub fn ref_count(&self, path: impl AsRef<Path>, mode: OpenMode) -> usize {
        self.entries
            .ref_count(&(path.as_ref().to_path_buf(), mode))
    }

    /// Number of files currently open through this cache.
    pub fn len(&self) -> usize {
        self.entries.live_len()
    }

    /// Returns `true` if no file is open through this cache.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
