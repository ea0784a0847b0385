//! Byte-stream transports a [`Connection`](crate::connection::Connection)
//! runs over.
//!
//! The connection state machine is generic over [`Transport`]. Plain TCP and
//! TLS differ only in the optional phases: TLS performs a handshake before the
//! first read and a close-notify shutdown before the socket is dropped, and it
//! cannot hand file bytes to the kernel directly.

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use crate::cache::MappedFile;

mod plain;
mod tls;

pub use plain::PlainTransport;
pub use tls::TlsTransport;

/// The capabilities a connection needs from its byte stream.
///
/// Each method is one suspension point of the state machine. A connection
/// awaits them strictly one after another, so implementations never see two
/// operations in flight at once.
pub trait Transport: Send {
    /// Short name used in logs (`"http"`, `"https"`).
    fn scheme(&self) -> &'static str;

    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Whether [`handshake`](Self::handshake) does anything.
    fn has_handshake(&self) -> bool {
        false
    }

    /// Completes the transport-level handshake. A no-op by default.
    fn handshake(&mut self) -> impl Future<Output = io::Result<()>> + Send {
        async { Ok(()) }
    }

    /// Reads whatever is available into `buf`. `Ok(0)` means end of stream.
    fn read(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Writes all of `buf`.
    fn write_all(&mut self, buf: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Flushes anything the transport buffers internally.
    fn flush(&mut self) -> impl Future<Output = io::Result<()>> + Send;

    /// Transmits up to `max` bytes of `file` starting at `offset`, returning
    /// how many were sent. Waits for writability instead of failing with
    /// `WouldBlock`.
    fn send_file(
        &mut self,
        file: &MappedFile,
        offset: u64,
        max: usize,
    ) -> impl Future<Output = io::Result<usize>> + Send;

    /// Orderly transport shutdown before close. A no-op by default.
    fn shutdown(&mut self) -> impl Future<Output = io::Result<()>> + Send {
        async { Ok(()) }
    }
}

/// Largest window [`read_window`] copies in one call (64 KiB).
pub(crate) const READ_CHUNK: usize = 64 * 1024;

/// Copies up to `max` bytes of `file` starting at `offset` into `buf`, reading
/// through the cached descriptor rather than the mapping.
///
/// The window is clamped to the length the file had when it was opened and to
/// [`READ_CHUNK`]. A file truncated since then fails with `UnexpectedEof`.
pub(crate) fn read_window<'b>(
    file: &MappedFile,
    offset: u64,
    max: usize,
    buf: &'b mut Vec<u8>,
) -> io::Result<&'b [u8]> {
    let remaining = usize::try_from(offset)
        .ok()
        .and_then(|start| file.len().checked_sub(start))
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("offset {offset} is past the end of a {} byte file", file.len()),
            )
        })?;
    let len = max.min(remaining).min(READ_CHUNK);

    buf.resize(len, 0);
    file.descriptor().read_exact_at(&mut buf[..len], offset)?;
    Ok(&buf[..len])
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;

    use super::*;
    use crate::cache::{DescriptorCache, MappingCache, OpenMode};

    fn mapped(contents: &[u8]) -> (tempfile::NamedTempFile, Arc<MappedFile>) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        let cache = MappingCache::new(Arc::new(DescriptorCache::new()));
        let mapping = cache.get(file.path(), OpenMode::ReadOnly).unwrap();
        (file, mapping)
    }

    #[test]
    fn window_is_clamped_to_file_and_chunk() {
        let contents: Vec<u8> = (0..3 * READ_CHUNK).map(|i| (i % 253) as u8).collect();
        let (_file, mapping) = mapped(&contents);
        let mut buf = Vec::new();

        let window = read_window(&mapping, 10, usize::MAX, &mut buf).unwrap();
        assert_eq!(window, &contents[10..10 + READ_CHUNK]);

        let tail = (contents.len() - 5) as u64;
        assert_eq!(read_window(&mapping, tail, 100, &mut buf).unwrap(), &contents[contents.len() - 5..]);
        assert!(read_window(&mapping, contents.len() as u64, 100, &mut buf).unwrap().is_empty());
        assert!(read_window(&mapping, contents.len() as u64 + 1, 100, &mut buf).is_err());
    }

    #[test]
    fn truncated_file_is_an_error() {
        let (file, mapping) = mapped(&[b'z'; 64 * 1024]);
        file.as_file().set_len(0).unwrap();

        let mut buf = Vec::new();
        let err = read_window(&mapping, 0, 4096, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
