//! Incremental request parser.
//!
//! Bytes arrive in whatever fragments the transport delivers. Each call to
//! [`RequestParser::feed`] appends a fragment and reports one of three
//! outcomes: the request is complete, it can never become valid, or more
//! bytes are needed.

use bytes::{Buf, BytesMut};

use super::request::{Request, RequestError};

/// Largest request (head plus body) the parser buffers before giving up (8 MiB).
pub const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Largest request head (request line plus header fields) accepted (64 KiB).
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Outcome of feeding bytes to a [`RequestParser`].
#[derive(Debug)]
pub enum ParseStatus {
    /// A full request, including any `Content-Length` body.
    Complete(Request),
    /// The bytes seen so far can never form a valid request.
    Invalid(RequestError),
    /// More bytes are needed.
    Incomplete,
}

/// Accumulates request bytes until a full request can be decoded.
///
/// The head is decoded once, when its terminating blank line arrives; bytes
/// before that are only scanned for the terminator, and each byte is scanned
/// a bounded number of times. Body bytes are then counted against
/// `Content-Length` without decoding the head again.
///
/// # Examples
///
/// ```
/// use rtsf::http::{ParseStatus, RequestParser};
///
/// let mut parser = RequestParser::new();
/// assert!(matches!(parser.feed(b"GET /hi HT"), ParseStatus::Incomplete));
/// match parser.feed(b"TP/1.1\r\n\r\n") {
///     ParseStatus::Complete(request) => assert_eq!(request.path(), "/hi"),
///     other => panic!("unexpected {other:?}"),
/// }
/// ```
#[derive(Debug)]
pub struct RequestParser {
    buf: BytesMut,
    max_size: usize,
    max_head: usize,
    /// Offset in `buf` below which no head terminator can start.
    scanned: usize,
    head: Option<PendingHead>,
}

/// A decoded head waiting for its body.
#[derive(Debug)]
struct PendingHead {
    request: Request,
    body_offset: usize,
    total: usize,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestParser {
    /// Creates a parser with the default size limits.
    pub fn new() -> Self {
        Self::with_max_size(MAX_REQUEST_SIZE)
    }

    /// Creates a parser that rejects requests larger than `max_size` bytes.
    ///
    /// The head limit is [`MAX_HEAD_SIZE`] or `max_size`, whichever is smaller.
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_size,
            max_head: MAX_HEAD_SIZE.min(max_size),
            scanned: 0,
            head: None,
        }
    }

    /// Number of bytes buffered and not yet consumed by a complete request.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Appends `bytes` and tries to complete a request.
    ///
    /// After `Complete` the consumed bytes are dropped from the buffer; any
    /// trailing bytes stay buffered.
    pub fn feed(&mut self, bytes: &[u8]) -> ParseStatus {
        self.buf.extend_from_slice(bytes);

        if self.buf.len() > self.max_size {
            return ParseStatus::Invalid(RequestError::TooLarge {
                max_bytes: self.max_size,
            });
        }

        let head = match self.head.take() {
            Some(head) => head,
            None => match self.scan_head() {
                Ok(Some(head)) => head,
                Ok(None) => return ParseStatus::Incomplete,
                Err(e) => return ParseStatus::Invalid(e),
            },
        };

        if self.buf.len() < head.total {
            self.head = Some(head);
            return ParseStatus::Incomplete;
        }

        let mut consumed = self.buf.split_to(head.total);
        consumed.advance(head.body_offset);
        self.scanned = 0;

        let mut request = head.request;
        request.set_body(consumed.freeze());
        ParseStatus::Complete(request)
    }

    /// Looks for the end of the head in the bytes not scanned yet and decodes
    /// the head once it is found.
    fn scan_head(&mut self) -> Result<Option<PendingHead>, RequestError> {
        let mut from = self.scanned;
        while let Some(end) = head_end(&self.buf, from) {
            if end > self.max_head {
                return Err(RequestError::TooLarge {
                    max_bytes: self.max_head,
                });
            }
            match Request::parse(&self.buf[..end]) {
                Ok((request, body_offset)) => return self.pending(request, body_offset).map(Some),
                // Leading blank lines; the head proper starts after them.
                Err(RequestError::Incomplete) => from = end,
                Err(e) => return Err(e),
            }
        }

        if self.buf.len() > self.max_head {
            return Err(RequestError::TooLarge {
                max_bytes: self.max_head,
            });
        }

        // A terminator may straddle this fragment and the next one.
        self.scanned = self.buf.len().saturating_sub(2).max(from);
        Ok(None)
    }

    fn pending(&self, request: Request, body_offset: usize) -> Result<PendingHead, RequestError> {
        if let Some(encoding) = request.headers().get("transfer-encoding") {
            return Err(RequestError::UnsupportedTransferEncoding {
                value: encoding.to_owned(),
            });
        }

        let content_length = request.content_length()?.unwrap_or(0);
        let total = match body_offset.checked_add(content_length) {
            Some(total) if total <= self.max_size => total,
            _ => {
                return Err(RequestError::TooLarge {
                    max_bytes: self.max_size,
                });
            }
        };

        Ok(PendingHead {
            request,
            body_offset,
            total,
        })
    }
}

/// End offset of the first blank line (`\n\n` or `\n\r\n`) whose `\n` is at
/// or after `from`.
fn head_end(buf: &[u8], from: usize) -> Option<usize> {
    (from..buf.len()).find_map(|i| {
        if buf[i] != b'\n' {
            return None;
        }
        match &buf[i + 1..] {
            [b'\n', ..] => Some(i + 2),
            [b'\r', b'\n', ..] => Some(i + 3),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(status: ParseStatus) -> Request {
        match status {
            ParseStatus::Complete(request) => request,
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn whole_request_in_one_fragment() {
        let mut parser = RequestParser::new();
        let req = complete(parser.feed(b"GET /hi HTTP/1.1\r\nHost: x\r\n\r\n"));
        assert_eq!(req.path(), "/hi");
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn byte_at_a_time_stays_incomplete_until_the_end() {
        let raw = b"GET /a/b HTTP/1.1\r\nHost: x\r\n\r\n";
        let mut parser = RequestParser::new();
        for byte in &raw[..raw.len() - 1] {
            assert!(matches!(parser.feed(&[*byte]), ParseStatus::Incomplete));
        }
        let req = complete(parser.feed(&raw[raw.len() - 1..]));
        assert_eq!(req.path(), "/a/b");
    }

    #[test]
    fn waits_for_content_length_body() {
        let mut parser = RequestParser::new();
        assert!(matches!(
            parser.feed(b"POST /echo HTTP/1.1\r\nContent-Length: 11\r\n\r\nhello"),
            ParseStatus::Incomplete
        ));
        let req = complete(parser.feed(b" world"));
        assert_eq!(&req.body()[..], b"hello world");
    }

    #[test]
    fn trailing_bytes_stay_buffered() {
        let mut parser = RequestParser::new();
        let req = complete(parser.feed(b"POST / HTTP/1.1\r\nContent-Length: 2\r\n\r\nokEXTRA"));
        assert_eq!(&req.body()[..], b"ok");
        assert_eq!(parser.buffered(), 5);
    }

    #[test]
    fn malformed_head_is_invalid() {
        let mut parser = RequestParser::new();
        assert!(matches!(
            parser.feed(b"GET / HTTP/9.9\r\n\r\n"),
            ParseStatus::Invalid(RequestError::Parse(_))
        ));
    }

    #[test]
    fn chunked_bodies_are_rejected() {
        let mut parser = RequestParser::new();
        assert!(matches!(
            parser.feed(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n"),
            ParseStatus::Invalid(RequestError::UnsupportedTransferEncoding { .. })
        ));
    }

    #[test]
    fn oversized_requests_are_invalid() {
        let mut parser = RequestParser::with_max_size(32);
        assert!(matches!(parser.feed(b"GET /"), ParseStatus::Incomplete));
        assert!(matches!(
            parser.feed(&[b'a'; 64]),
            ParseStatus::Invalid(RequestError::TooLarge { max_bytes: 32 })
        ));
    }

    #[test]
    fn declared_body_over_the_limit_is_invalid() {
        let mut parser = RequestParser::with_max_size(128);
        assert!(matches!(
            parser.feed(b"POST / HTTP/1.1\r\nContent-Length: 4096\r\n\r\n"),
            ParseStatus::Invalid(RequestError::TooLarge { .. })
        ));
    }

    #[test]
    fn terminator_split_across_fragments() {
        let mut parser = RequestParser::new();
        assert!(matches!(parser.feed(b"GET / HTTP/1.1\r\nHost: x\r"), ParseStatus::Incomplete));
        assert!(matches!(parser.feed(b"\n\r"), ParseStatus::Incomplete));
        let req = complete(parser.feed(b"\n"));
        assert_eq!(req.headers().get("host"), Some("x"));
    }

    #[test]
    fn bare_newlines_end_the_head() {
        let mut parser = RequestParser::new();
        let req = complete(parser.feed(b"GET /lf HTTP/1.1\nHost: x\n\n"));
        assert_eq!(req.path(), "/lf");
    }

    #[test]
    fn trickled_head_is_scanned_once() {
        let mut parser = RequestParser::new();
        assert!(matches!(
            parser.feed(b"GET / HTTP/1.1\r\nX-Big: "),
            ParseStatus::Incomplete
        ));
        for _ in 0..4096 {
            assert!(matches!(parser.feed(b"a"), ParseStatus::Incomplete));
            assert!(parser.scanned + 2 >= parser.buffered());
        }
        let req = complete(parser.feed(b"\r\n\r\n"));
        assert_eq!(req.headers().get("x-big").map(str::len), Some(4096));
    }

    #[test]
    fn trickled_head_hits_the_head_limit() {
        let mut parser = RequestParser::new();
        parser.feed(b"GET / HTTP/1.1\r\nX-Big: ");
        let mut fed = parser.buffered();
        let status = loop {
            match parser.feed(b"a") {
                ParseStatus::Incomplete => fed += 1,
                other => break other,
            }
        };
        assert!(matches!(
            status,
            ParseStatus::Invalid(RequestError::TooLarge { max_bytes: MAX_HEAD_SIZE })
        ));
        assert_eq!(fed, MAX_HEAD_SIZE);
    }

    #[test]
    fn body_fragments_reuse_the_decoded_head() {
        let mut parser = RequestParser::new();
        parser.feed(b"PUT /f HTTP/1.1\r\nContent-Length: 6\r\n\r\nab");
        assert!(parser.head.is_some());
        assert!(matches!(parser.feed(b"cd"), ParseStatus::Incomplete));
        let req = complete(parser.feed(b"ef"));
        assert_eq!(&req.body()[..], b"abcdef");
        assert!(parser.head.is_none());
    }
}
