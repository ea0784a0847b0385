//! Parsed HTTP/1.x requests.
//!
//! [`Request::parse`] decodes one request head with [`httparse`]. Collecting
//! the body and deciding when a request is complete is the job of
//! [`RequestParser`](super::RequestParser).

use std::collections::HashMap;

use bytes::Bytes;
use thiserror::Error;

use super::{Headers, Method};

/// Errors produced while parsing a request.
///
/// Every variant except [`Incomplete`](Self::Incomplete) makes the request
/// invalid and is answered with a canned `400 Bad Request`.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete; more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid Content-Length header: {value:?}")]
    InvalidContentLength { value: String },

    #[error("unsupported Transfer-Encoding: {value:?}")]
    UnsupportedTransferEncoding { value: String },

    #[error("request exceeds maximum allowed size of {max_bytes} bytes")]
    TooLarge { max_bytes: usize },
}

/// A fully parsed HTTP/1.x request.
///
/// Owned by exactly one connection. Route handlers receive it by reference.
///
/// # Examples
///
/// ```
/// use rtsf::http::Request;
///
/// let raw = b"GET /docs/a%20b.txt?lang=en HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.uri(), "/docs/a%20b.txt?lang=en");
/// assert_eq!(request.path(), "/docs/a%20b.txt");
/// assert_eq!(request.query_param("lang"), Some("en"));
/// assert_eq!(offset, raw.len());
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    uri: String,
    path: String,
    query: Option<String>,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    body: Bytes,
    query_params: HashMap<String, String>,
    path_params: HashMap<String, String>,
}

impl Request {
    const MAX_HEADERS: usize = 64;

    /// Parses a request head from `buf`.
    ///
    /// Returns the request (with an empty body) and the offset of the first
    /// body byte in `buf`.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`] when the head is not terminated yet.
    /// - [`RequestError::Parse`] / [`RequestError::MissingField`] for
    ///   malformed input.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method = Method::from(
            raw_req
                .method
                .ok_or(RequestError::MissingField { field: "method" })?,
        );

        let uri = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;

        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
            None => (uri.to_owned(), None),
        };

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        let query_params = query.as_deref().map(parse_query_string).unwrap_or_default();

        Ok((
            Self {
                method,
                uri: uri.to_owned(),
                path,
                query,
                version,
                headers: header_map,
                body: Bytes::new(),
                query_params,
                path_params: HashMap::new(),
            },
            body_offset,
        ))
    }

    /// Returns the request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request target exactly as sent, query string included.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Returns the request path without the query string. Not percent-decoded.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the HTTP minor version.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the raw query string, if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Returns a decoded query parameter.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query_params.get(key).map(String::as_str)
    }

    /// Returns a named capture group from the route pattern that matched
    /// this request.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    /// Returns the request body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Deserializes the body as JSON.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(&self.body)
    }

    /// Returns the declared body length.
    ///
    /// `Ok(None)` when the header is absent.
    pub fn content_length(&self) -> Result<Option<usize>, RequestError> {
        match self.headers.get("content-length") {
            None => Ok(None),
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| RequestError::InvalidContentLength {
                    value: value.to_owned(),
                }),
        }
    }

    pub(crate) fn set_body(&mut self, body: Bytes) {
        self.body = body;
    }

    pub(crate) fn set_path_params(&mut self, params: HashMap<String, String>) {
        self.path_params = params;
    }
}

// `key=value&key2=value2`, percent-decoded with `+` as space. Pairs that do
// not decode to UTF-8 are dropped.
fn parse_query_string(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = urlencoding::decode(&key.replace('+', " ")).ok()?.into_owned();
            let value = urlencoding::decode(&value.replace('+', " ")).ok()?.into_owned();
            Some((key, value))
        })
        .collect()
}
