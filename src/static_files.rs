//! Mapping request paths onto the document root.

use std::path::{Path, PathBuf};

/// File served for paths that end in `/`.
pub const INDEX_FILE: &str = "index.html";

/// Resolves a request path to a file path relative to the document root.
///
/// The path is percent-decoded first. Returns `None` for paths that are not
/// absolute, have a `..` segment, contain NUL, or do not decode to UTF-8; those
/// requests are answered with `400 Bad Request`.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use rtsf::static_files::resolve;
///
/// assert_eq!(resolve("/css/site%20main.css"), Some(PathBuf::from("css/site main.css")));
/// assert_eq!(resolve("/docs/"), Some(PathBuf::from("docs/index.html")));
/// assert_eq!(resolve("/../etc/passwd"), None);
/// ```
pub fn resolve(request_path: &str) -> Option<PathBuf> {
    let decoded = urlencoding::decode(request_path).ok()?;

    if !decoded.starts_with('/')
        || decoded.split('/').any(|segment| segment == "..")
        || decoded.contains('\0')
    {
        return None;
    }

    let mut relative = decoded.trim_start_matches('/').to_owned();
    if decoded.ends_with('/') {
        relative.push_str(INDEX_FILE);
    }
    Some(PathBuf::from(relative))
}

/// `Content-Type` for a file, chosen by extension.
pub fn mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("html" | "htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("txt") => "text/plain",
        Some("gif") => "image/gif",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("pdf") => "application/pdf",
        Some("wasm") => "application/wasm",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}
