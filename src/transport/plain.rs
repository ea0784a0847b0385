use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::Transport;
use crate::cache::MappedFile;

/// Plain TCP. File bodies go out with `sendfile(2)` on Linux.
#[derive(Debug)]
pub struct PlainTransport {
    stream: TcpStream,
    peer: SocketAddr,
}

impl PlainTransport {
    /// Wraps an accepted stream.
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self { stream, peer }
    }
}

impl Transport for PlainTransport {
    fn scheme(&self) -> &'static str {
        "http"
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf).await
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.stream.flush().await
    }

    #[cfg(target_os = "linux")]
    async fn send_file(&mut self, file: &MappedFile, offset: u64, max: usize) -> io::Result<usize> {
        use std::os::fd::AsRawFd;
        use tokio::io::Interest;

        let in_fd = file.descriptor().as_raw_fd();
        let out_fd = self.stream.as_raw_fd();
        let max = max.min(file.len().saturating_sub(usize::try_from(offset).unwrap_or(usize::MAX)));
        if max == 0 {
            return Ok(0);
        }

        loop {
            self.stream.writable().await?;
            match self
                .stream
                .try_io(Interest::WRITABLE, || sendfile(out_fd, in_fd, offset, max))
            {
                Ok(sent) => return Ok(sent),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    async fn send_file(&mut self, file: &MappedFile, offset: u64, max: usize) -> io::Result<usize> {
        let mut chunk = Vec::new();
        let window = super::read_window(file, offset, max, &mut chunk)?;
        if window.is_empty() {
            return Ok(0);
        }
        self.stream.write_all(window).await?;
        Ok(window.len())
    }
}

/// One `sendfile(2)` call from `in_fd` at `offset` to the socket `out_fd`.
#[cfg(target_os = "linux")]
fn sendfile(
    out_fd: std::os::fd::RawFd,
    in_fd: std::os::fd::RawFd,
    offset: u64,
    count: usize,
) -> io::Result<usize> {
    let mut off = libc::off_t::try_from(offset)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "file offset out of range"))?;
    // SAFETY: both descriptors are open for the duration of the call and
    // `off` outlives it.
    let sent = unsafe { libc::sendfile(out_fd, in_fd, &mut off, count) };
    if sent < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(sent as usize)
    }
}
