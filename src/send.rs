//! Resumable file transmission.
//!
//! A [`SendOperation`] streams a cached file to a transport in bounded
//! chunks, advancing its offset only after a chunk is confirmed sent. Dropping
//! the future returned by [`SendOperation::run`] cancels the transfer at a
//! chunk boundary; calling `run` again resumes from the recorded offset.

use std::io;
use std::sync::Arc;

use tracing::trace;

use crate::cache::MappedFile;
use crate::transport::Transport;

/// Upper bound for a single transmission call (8 MiB).
pub const SEND_CHUNK: usize = 8 * 1024 * 1024;

/// Transmission of one file to one transport.
#[derive(Debug)]
pub struct SendOperation {
    file: Arc<MappedFile>,
    offset: u64,
    total: u64,
}

impl SendOperation {
    /// Prepares to send all of `file` from offset zero.
    pub fn new(file: Arc<MappedFile>) -> Self {
        let total = file.len() as u64;
        Self {
            file,
            offset: 0,
            total,
        }
    }

    /// Bytes confirmed sent so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bytes still to send.
    pub fn remaining(&self) -> u64 {
        self.total - self.offset
    }

    /// Returns `true` once every byte has been sent.
    pub fn is_complete(&self) -> bool {
        self.offset == self.total
    }

    /// Sends the rest of the file, returning the total bytes sent.
    ///
    /// Partial transmissions advance the offset and continue; waiting for
    /// writability happens inside the transport.
    ///
    /// # Errors
    ///
    /// The first transport error, or `WriteZero` if the transport stops
    /// accepting bytes.
    pub async fn run<T: Transport>(&mut self, transport: &mut T) -> io::Result<u64> {
        while self.offset < self.total {
            let chunk = usize::try_from(self.remaining())
                .unwrap_or(usize::MAX)
                .min(SEND_CHUNK);
            let sent = transport.send_file(&self.file, self.offset, chunk).await?;
            if sent == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!(
                        "transport accepted no bytes at offset {} of {}",
                        self.offset, self.total
                    ),
                ));
            }
            self.offset += sent as u64;
            trace!(
                path = %self.file.path().display(),
                sent,
                offset = self.offset,
                total = self.total,
                "file chunk sent"
            );
        }
        Ok(self.offset)
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::io::Write;
    use std::net::SocketAddr;
    use std::time::Duration;

    use super::*;
    use crate::cache::{DescriptorCache, MappingCache, OpenMode};
    use crate::transport::read_window;

    /// Accepts at most `per_call` bytes per send, optionally stalling forever
    /// once `stall_after` bytes have been taken.
    struct Trickle {
        per_call: usize,
        stall_after: Option<usize>,
        received: Vec<u8>,
    }

    impl Trickle {
        fn new(per_call: usize) -> Self {
            Self {
                per_call,
                stall_after: None,
                received: Vec::new(),
            }
        }
    }

    impl Transport for Trickle {
        fn scheme(&self) -> &'static str {
            "test"
        }

        fn peer_addr(&self) -> Option<SocketAddr> {
            None
        }

        async fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }

        async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
            self.received.extend_from_slice(buf);
            Ok(())
        }

        async fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn send_file(
            &mut self,
            file: &MappedFile,
            offset: u64,
            max: usize,
        ) -> impl Future<Output = io::Result<usize>> + Send {
            let stalled = self
                .stall_after
                .is_some_and(|limit| self.received.len() >= limit);
            let mut chunk = Vec::new();
            let result = read_window(file, offset, max.min(self.per_call), &mut chunk).map(|window| {
                self.received.extend_from_slice(window);
                window.len()
            });
            async move {
                if stalled {
                    std::future::pending::<()>().await;
                }
                result
            }
        }
    }

    fn mapped(contents: &[u8]) -> (tempfile::NamedTempFile, Arc<MappedFile>) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        let cache = MappingCache::new(Arc::new(DescriptorCache::new()));
        let mapping = cache.get(file.path(), OpenMode::ReadOnly).unwrap();
        (file, mapping)
    }

    #[tokio::test]
    async fn partial_sends_cover_the_whole_file() {
        let contents: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let (_file, mapping) = mapped(&contents);
        let mut transport = Trickle::new(777);
        let mut op = SendOperation::new(mapping);

        let sent = op.run(&mut transport).await.unwrap();

        assert_eq!(sent, contents.len() as u64);
        assert!(op.is_complete());
        assert_eq!(transport.received, contents);
    }

    #[tokio::test]
    async fn empty_file_sends_nothing() {
        let (_file, mapping) = mapped(b"");
        let mut transport = Trickle::new(16);
        let mut op = SendOperation::new(mapping);
        assert_eq!(op.run(&mut transport).await.unwrap(), 0);
        assert!(transport.received.is_empty());
    }

    #[tokio::test]
    async fn cancelled_send_resumes_from_offset() {
        let contents = b"abcdefghijklmnopqrstuvwxyz".to_vec();
        let (_file, mapping) = mapped(&contents);
        let mut stalling = Trickle::new(5);
        stalling.stall_after = Some(10);
        let mut op = SendOperation::new(mapping);

        let cancelled = tokio::time::timeout(Duration::from_millis(50), op.run(&mut stalling)).await;
        assert!(cancelled.is_err());
        assert_eq!(op.offset(), 10);
        assert_eq!(op.remaining(), 16);

        let mut rest = Trickle::new(5);
        assert_eq!(op.run(&mut rest).await.unwrap(), 26);
        assert_eq!(rest.received, &contents[10..]);
    }

    #[tokio::test]
    async fn truncated_file_fails_the_send() {
        let contents = vec![b'q'; 8192];
        let (file, mapping) = mapped(&contents);
        let mut transport = Trickle::new(1024);
        let mut op = SendOperation::new(mapping);

        file.as_file().set_len(4096).unwrap();
        let err = op.run(&mut transport).await.unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(op.offset(), 4096);
        assert_eq!(transport.received, &contents[..4096]);
    }
}
