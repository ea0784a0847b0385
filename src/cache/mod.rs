//! Shared file caches.
//!
//! Two layers, both keyed by `(path, OpenMode)`:
//!
//! - [`DescriptorCache`] hands out reference-counted open files
//!   ([`FileDescriptor`]).
//! - [`MappingCache`] hands out reference-counted memory mappings
//!   ([`MappedFile`]); each mapping owns a handle to the descriptor it maps,
//!   so the file stays open while any mapping of it is alive.
//!
//! A key resolves to at most one live entry in each cache. Concurrent misses
//! on the same key are serialized by a per-key lock, so only one caller opens
//! or maps while the others wait and then share its entry. The cache-wide
//! lock only guards the key table and is never held across a syscall.
//!
//! Entries live exactly as long as someone holds them: the caches keep weak
//! references only, so the last handle dropped closes the file or unmaps the
//! memory. Entries are never revalidated against the filesystem; a file
//! replaced on disk keeps being served from the open entry until that entry
//! is released.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use thiserror::Error;

mod descriptor;
mod mapping;

pub use descriptor::{DescriptorCache, FileDescriptor};
pub use mapping::{MappedFile, MappingCache};

/// How a cached file is opened (and mapped).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

/// Errors from opening or mapping a cached file.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("{path}: no such file")]
    NotFound { path: PathBuf },

    #[error("{path}: permission denied")]
    PermissionDenied { path: PathBuf },

    #[error("{path}: not a regular file")]
    NotAFile { path: PathBuf },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path}: mmap failed: {source}")]
    MapFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CacheError {
    pub(crate) fn from_io(path: &Path, source: io::Error) -> Self {
        let path = path.to_path_buf();
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound { path },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            _ => Self::Io { path, source },
        }
    }

    /// `true` for failures that mean "there is nothing to serve here" rather
    /// than a fault on the server side.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::PermissionDenied { .. } | Self::NotAFile { .. }
        )
    }
}

pub(crate) type CacheKey = (PathBuf, OpenMode);

type Slot<V> = Arc<Mutex<Weak<V>>>;

/// Key table of weak entries with per-key creation locks.
pub(crate) struct SharedMap<V> {
    slots: Mutex<HashMap<CacheKey, Slot<V>>>,
}

impl<V> SharedMap<V> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the live entry for `key`, or builds one with `make`.
    ///
    /// `make` runs with only this key's lock held.
    pub(crate) fn get_or_try_insert<F>(&self, key: CacheKey, make: F) -> Result<Arc<V>, CacheError>
    where
        F: FnOnce() -> Result<V, CacheError>,
    {
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(key).or_default())
        };

        let mut entry = slot.lock();
        if let Some(live) = entry.upgrade() {
            return Ok(live);
        }

        let built = make().map(Arc::new);
        if let Ok(value) = &built {
            *entry = Arc::downgrade(value);
        }
        drop(entry);
        drop(slot);

        self.purge();
        built
    }

    /// Number of handles currently holding the entry for `key`.
    pub(crate) fn ref_count(&self, key: &CacheKey) -> usize {
        let slot = self.slots.lock().get(key).map(Arc::clone);
        slot.map_or(0, |slot| slot.lock().strong_count())
    }

    /// Number of keys with a live entry.
    pub(crate) fn live_len(&self) -> usize {
        let slots: Vec<Slot<V>> = self.slots.lock().values().map(Arc::clone).collect();
        slots
            .iter()
            .filter(|slot| slot.lock().strong_count() > 0)
            .count()
    }

    /// Drops table entries whose value is gone and that nobody is filling.
    pub(crate) fn purge(&self) {
        self.slots.lock().retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Some(entry) => entry.strong_count() > 0,
                None => true,
            }
        });
    }
}
