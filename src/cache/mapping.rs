use std::fmt;
use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::ptr::{self, NonNull};
use std::slice;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{CacheError, DescriptorCache, FileDescriptor, OpenMode, SharedMap};

/// A file mapped into memory over its full length.
///
/// Holds the [`FileDescriptor`] it was built from, so the file stays open
/// for as long as the mapping exists. Unmapped when the last
/// `Arc<MappedFile>` is dropped. Empty files are represented without a
/// mapping.
pub struct MappedFile {
    ptr: NonNull<u8>,
    len: usize,
    descriptor: Arc<FileDescriptor>,
}

// SAFETY: the mapping is only exposed as a shared byte slice and the
// pointer is valid until `Drop` unmaps it.
unsafe impl Send for MappedFile {}
unsafe impl Sync for MappedFile {}

impl MappedFile {
    fn map(descriptor: Arc<FileDescriptor>) -> Result<Self, CacheError> {
        let len = usize::try_from(descriptor.len()).map_err(|_| CacheError::MapFailed {
            path: descriptor.path().to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "file too large to map"),
        })?;

        if len == 0 {
            return Ok(Self {
                ptr: NonNull::dangling(),
                len,
                descriptor,
            });
        }

        let prot = match descriptor.mode() {
            OpenMode::ReadOnly => libc::PROT_READ,
            OpenMode::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
        };

        // SAFETY: a fresh shared mapping of an open descriptor; the kernel
        // picks the address and validates `len` against the file.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                prot,
                libc::MAP_SHARED,
                descriptor.as_raw_fd(),
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(CacheError::MapFailed {
                path: descriptor.path().to_path_buf(),
                source: io::Error::last_os_error(),
            });
        }
        let ptr = NonNull::new(addr.cast::<u8>()).ok_or_else(|| CacheError::MapFailed {
            path: descriptor.path().to_path_buf(),
            source: io::Error::other("mmap returned a null address"),
        })?;

        debug!(path = %descriptor.path().display(), len, "mapped file");
        Ok(Self {
            ptr,
            len,
            descriptor,
        })
    }

    /// The mapped bytes.
    ///
    /// Touching pages past the end of a file that was truncated after it was
    /// mapped raises `SIGBUS`. Transports read file bodies through
    /// [`FileDescriptor::read_exact_at`] or `sendfile(2)` instead.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` is valid for `len` bytes until drop (dangling only
        // when `len` is zero).
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Length of the mapping in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` for an empty file.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Path of the mapped file.
    pub fn path(&self) -> &Path {
        self.descriptor.path()
    }

    /// The cached descriptor backing this mapping.
    pub fn descriptor(&self) -> &Arc<FileDescriptor> {
        &self.descriptor
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        if self.len == 0 {
            return;
        }
        // SAFETY: unmapping exactly the region returned by `mmap`.
        let rc = unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) };
        if rc != 0 {
            warn!(
                path = %self.descriptor.path().display(),
                error = %io::Error::last_os_error(),
                "munmap failed"
            );
        }
    }
}

impl fmt::Debug for MappedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedFile")
            .field("path", &self.descriptor.path())
            .field("len", &self.len)
            .finish()
    }
}

/// Cache of memory mappings keyed by `(path, mode)`, layered over a
/// [`DescriptorCache`].
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use rtsf::cache::{DescriptorCache, MappingCache, OpenMode};
///
/// let cache = MappingCache::new(Arc::new(DescriptorCache::new()));
/// let page = cache.get("/srv/www/index.html", OpenMode::ReadOnly)?;
/// println!("{} bytes", page.as_slice().len());
/// # Ok::<(), rtsf::cache::CacheError>(())
/// ```
pub struct MappingCache {
    descriptors: Arc<DescriptorCache>,
    entries: SharedMap<MappedFile>,
}

impl MappingCache {
    /// Creates an empty cache that opens files through `descriptors`.
    pub fn new(descriptors: Arc<DescriptorCache>) -> Self {
        Self {
            descriptors,
            entries: SharedMap::new(),
        }
    }

    /// Returns the shared mapping of `path`, opening and mapping on a miss.
    ///
    /// Blocking, like [`DescriptorCache::acquire`].
    ///
    /// # Errors
    ///
    /// Any [`DescriptorCache::acquire`] error, or [`CacheError::MapFailed`].
    pub fn get(&self, path: impl AsRef<Path>, mode: OpenMode) -> Result<Arc<MappedFile>, CacheError> {
        let path = path.as_ref();
        self.entries.get_or_try_insert((path.to_path_buf(), mode), || {
            let descriptor = self.descriptors.acquire(path, mode)?;
            MappedFile::map(descriptor)
        })
    }

    /// The descriptor cache beneath this one.
    pub fn descriptors(&self) -> &Arc<DescriptorCache> {
        &self.descriptors
    }

    /// Number of live handles to the mapping of `(path, mode)`.
    pub fn ref_count(&self, path: impl AsRef<Path>, mode: OpenMode) -> usize {
        self.entries
            .ref_count(&(path.as_ref().to_path_buf(), mode))
    }

    /// Number of files currently mapped.
    pub fn len(&self) -> usize {
        self.entries.live_len()
    }

    /// Returns `true` if no file is mapped.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
