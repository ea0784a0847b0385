//! HTTP/1.1 reply builder and wire formatter.
//!
//! Every reply closes the connection: the engine serves one request per
//! connection, so `Connection: close` is always written.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use super::{Headers, StatusCode};

/// An HTTP/1.1 reply.
///
/// Built by route handlers, or canned by the engine via [`Response::stock`].
///
/// # Examples
///
/// ```
/// use rtsf::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// let wire: Vec<u8> = response.into_buffers().concat();
/// let text = std::str::from_utf8(&wire).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 15\r\n"));
/// assert!(text.ends_with("\r\n\r\n{\"status\":\"ok\"}"));
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
}

impl Response {
    /// Creates a reply with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Canned reply for `status` with a small HTML body.
    ///
    /// Used for replies the engine produces without a route match: bad
    /// request, not found and internal error.
    pub fn stock(status: StatusCode) -> Self {
        let body = format!(
            "<html><head><title>{reason}</title></head>\
             <body><h1>{status}</h1></body></html>",
            reason = status.canonical_reason(),
        );
        Self::new(status)
            .header("Content-Type", "text/html")
            .body(body)
    }

    /// Appends a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header in place.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Sets the body from a string.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Bytes::from(body.into());
        self
    }

    /// Sets the body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Serializes `value` as the body and sets `Content-Type: application/json`.
    ///
    /// # Errors
    ///
    /// Fails if `value` cannot be represented as JSON.
    pub fn json<T: Serialize>(mut self, value: &T) -> Result<Self, serde_json::Error> {
        self.body = Bytes::from(serde_json::to_vec(value)?);
        self.headers.set("Content-Type", "application/json");
        Ok(self)
    }

    /// Returns the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the headers set so far.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The body bytes.
    pub fn content(&self) -> &[u8] {
        &self.body
    }

    /// Serializes the reply into the ordered buffers written to the transport:
    /// the header block, then the body when there is one.
    ///
    /// Adds `Content-Type: text/plain; charset=utf-8` when a body is present
    /// and no type was set; always sets `Content-Length` and
    /// `Connection: close`.
    pub fn into_buffers(mut self) -> Vec<Bytes> {
        if !self.body.is_empty() && !self.headers.contains("content-type") {
            self.headers
                .insert("Content-Type", "text/plain; charset=utf-8");
        }

        let head = encode_head(self.status, &mut self.headers, self.body.len() as u64);
        if self.body.is_empty() {
            vec![head]
        } else {
            vec![head, self.body]
        }
    }

    /// Header block for a `200 OK` file reply whose body is streamed separately.
    pub fn file_head(content_type: &str, content_length: u64) -> Bytes {
        let mut headers = Headers::with_capacity(3);
        headers.insert("Content-Type", content_type);
        encode_head(StatusCode::Ok, &mut headers, content_length)
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}

fn encode_head(status: StatusCode, headers: &mut Headers, content_length: u64) -> Bytes {
    headers.set("Content-Length", content_length.to_string());
    headers.set("Connection", "close");

    let mut buf = BytesMut::with_capacity(64 + headers.len() * 48);
    buf.put(format!("HTTP/1.1 {status}\r\n").as_bytes());
    buf.put(headers.to_string().as_bytes());
    buf.put(&b"\r\n"[..]);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_string(response: Response) -> String {
        String::from_utf8(response.into_buffers().concat()).unwrap()
    }

    #[test]
    fn head_and_body_are_separate_buffers() {
        let buffers = Response::new(StatusCode::Ok).body("Hello").into_buffers();
        assert_eq!(buffers.len(), 2);
        assert_eq!(&buffers[1][..], b"Hello");
        let head = std::str::from_utf8(&buffers[0]).unwrap();
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("Content-Type: text/plain; charset=utf-8\r\n"));
        assert!(head.contains("Content-Length: 5\r\n"));
        assert!(head.contains("Connection: close\r\n"));
        assert!(head.ends_with("\r\n\r\n"));
    }

    #[test]
    fn empty_body_has_no_content_type() {
        let buffers = Response::new(StatusCode::NoContent).into_buffers();
        assert_eq!(buffers.len(), 1);
        let head = std::str::from_utf8(&buffers[0]).unwrap();
        assert!(!head.contains("Content-Type"));
        assert!(head.contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn handler_supplied_length_is_overridden() {
        let s = to_string(
            Response::new(StatusCode::Ok)
                .header("Content-Length", "999")
                .body("abc"),
        );
        assert!(s.contains("Content-Length: 3\r\n"));
        assert!(!s.contains("999"));
    }

    #[test]
    fn stock_replies_carry_status_in_body() {
        let s = to_string(Response::stock(StatusCode::NotFound));
        assert!(s.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(s.contains("Content-Type: text/html\r\n"));
        assert!(s.ends_with("<h1>404 Not Found</h1></body></html>"));
    }

    #[test]
    fn json_body_sets_content_type() {
        let response = Response::new(StatusCode::Created)
            .header("Content-Type", "text/plain")
            .json(&serde_json::json!({ "id": 7 }))
            .unwrap();
        assert_eq!(response.content(), br#"{"id":7}"#);
        assert_eq!(response.headers().get("content-type"), Some("application/json"));
        assert_eq!(response.headers().len(), 1);
    }

    #[test]
    fn file_head_uses_file_length() {
        let head = Response::file_head("image/png", 1_048_576);
        let head = std::str::from_utf8(&head).unwrap();
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("Content-Type: image/png\r\n"));
        assert!(head.contains("Content-Length: 1048576\r\n"));
    }

    #[test]
    fn raw_body_and_in_place_headers() {
        let mut response = Response::new(StatusCode::Ok).body_bytes(vec![0u8, 159, 146, 150]);
        response.add_header("Content-Type", "application/octet-stream");
        response.add_header("X-Trace", "1");

        assert_eq!(response.content(), &[0u8, 159, 146, 150]);
        assert_eq!(response.headers().len(), 2);
        let s = String::from_utf8_lossy(&response.into_buffers()[0]).into_owned();
        assert!(s.contains("Content-Type: application/octet-stream\r\n"));
        assert!(s.contains("X-Trace: 1\r\n"));
        assert!(s.contains("Content-Length: 4\r\n"));
    }
}
