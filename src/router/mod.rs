//! Route table: ordered `(method, pattern, handler)` bindings.
//!
//! Patterns are regular expressions matched against the whole request path
//! (without the query string). Every pattern is compiled anchored, so
//! `/hi` and `^/hi$` are equivalent and neither matches `/hi/there`.
//! Named capture groups become path parameters on the [`Request`].
//!
//! Routes are matched in registration order; the first route whose method
//! and pattern both match wins. The table is populated at startup and only
//! read afterwards, so lookups need no locking.
//!
//! ```rust
//! use rtsf::router::RouteTable;
//! use rtsf::{Request, Response, StatusCode};
//!
//! let mut routes = RouteTable::new();
//! routes
//!     .route("GET", "^/hi(/)?$", |_req: &Request| {
//!         Response::new(StatusCode::Ok).body("hi")
//!     })
//!     .unwrap();
//! routes
//!     .get(r"/users/(?P<id>\d+)", |req: &Request| {
//!         Response::new(StatusCode::Ok).body(req.param("id").unwrap_or_default().to_owned())
//!     })
//!     .unwrap();
//!
//! assert_eq!(routes.len(), 2);
//! assert!(routes.find(&"GET".into(), "/hi/").is_some());
//! assert!(routes.find(&"POST".into(), "/hi").is_none());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use regex::Regex;
use thiserror::Error;
use tracing::error;

use crate::{Method, Request, Response, StatusCode};

/// Type-erased synchronous route handler.
pub type Handler = Arc<dyn Fn(&Request) -> Response + Send + Sync + 'static>;

/// Errors raised while registering routes.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("invalid route pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// One registered binding.
pub struct Route {
    method: Method,
    source: String,
    pattern: Regex,
    handler: Handler,
}

impl Route {
    fn new(method: Method, pattern: &str, handler: Handler) -> Result<Self, RouterError> {
        let compiled =
            Regex::new(&format!("^(?:{pattern})$")).map_err(|source| RouterError::InvalidPattern {
                pattern: pattern.to_owned(),
                source,
            })?;

        Ok(Self {
            method,
            source: pattern.to_owned(),
            pattern: compiled,
            handler,
        })
    }

    /// Method this route answers.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The pattern as registered.
    pub fn pattern(&self) -> &str {
        &self.source
    }

    fn matches(&self, method: &Method, path: &str) -> bool {
        &self.method == method && self.pattern.is_match(path)
    }

    /// Runs the handler for `request`.
    ///
    /// Named captures of the pattern are attached to the request first. A
    /// panicking handler yields a canned `500 Internal Server Error`.
    pub fn handle(&self, request: &mut Request) -> Response {
        let params = self.captures(request.path());
        request.set_path_params(params);

        let handler = &self.handler;
        let request = &*request;
        match panic::catch_unwind(AssertUnwindSafe(|| handler(request))) {
            Ok(response) => response,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_owned())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_owned());
                error!(
                    method = %self.method,
                    pattern = %self.source,
                    panic = %message,
                    "route handler panicked"
                );
                Response::stock(StatusCode::InternalServerError)
            }
        }
    }

    fn captures(&self, path: &str) -> HashMap<String, String> {
        let Some(caps) = self.pattern.captures(path) else {
            return HashMap::new();
        };
        self.pattern
            .capture_names()
            .flatten()
            .filter_map(|name| {
                caps.name(name)
                    .map(|m| (name.to_owned(), m.as_str().to_owned()))
            })
            .collect()
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.source)
            .finish_non_exhaustive()
    }
}

/// Ordered list of routes consulted before the static file fallback.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Creates an empty route table.
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Appends a route for `method` requests whose path matches `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::InvalidPattern`] if `pattern` is not a valid
    /// regular expression.
    pub fn route<H>(
        &mut self,
        method: impl Into<Method>,
        pattern: &str,
        handler: H,
    ) -> Result<&mut Self, RouterError>
    where
        H: Fn(&Request) -> Response + Send + Sync + 'static,
    {
        let route = Route::new(method.into(), pattern, Arc::new(handler))?;
        self.routes.push(route);
        Ok(self)
    }

    /// Shorthand for [`route`](Self::route) with `GET`.
    pub fn get<H>(&mut self, pattern: &str, handler: H) -> Result<&mut Self, RouterError>
    where
        H: Fn(&Request) -> Response + Send + Sync + 'static,
    {
        self.route(Method::Get, pattern, handler)
    }

    /// Shorthand for [`route`](Self::route) with `POST`.
    pub fn post<H>(&mut self, pattern: &str, handler: H) -> Result<&mut Self, RouterError>
    where
        H: Fn(&Request) -> Response + Send + Sync + 'static,
    {
        self.route(Method::Post, pattern, handler)
    }

    /// Returns the first route whose method equals `method` and whose
    /// pattern matches all of `path`.
    pub fn find(&self, method: &Method, path: &str) -> Option<&Route> {
        self.routes.iter().find(|route| route.matches(method, path))
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if no route is registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn make_request(method: &str, target: &str) -> Request {
        let raw = format!("{method} {target} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let (req, _) = Request::parse(raw.as_bytes()).unwrap();
        req
    }

    fn dispatch(table: &RouteTable, method: &str, target: &str) -> Option<Response> {
        let mut request = make_request(method, target);
        let route = table.find(request.method(), request.path())?;
        Some(route.handle(&mut request))
    }

    fn hi_table() -> RouteTable {
        let mut table = RouteTable::new();
        table
            .route("GET", r"^\/hi(\/)?$", |_req: &Request| {
                Response::new(StatusCode::Ok).body("asd")
            })
            .unwrap();
        table
    }

    #[test]
    fn optional_trailing_slash() {
        let table = hi_table();
        assert_eq!(dispatch(&table, "GET", "/hi").unwrap().content(), b"asd");
        assert_eq!(dispatch(&table, "GET", "/hi/").unwrap().content(), b"asd");
    }

    #[test]
    fn method_mismatch_falls_through() {
        let table = hi_table();
        assert!(dispatch(&table, "POST", "/hi").is_none());
        assert!(dispatch(&table, "get", "/hi").is_none());
    }

    #[test]
    fn patterns_are_anchored() {
        let mut table = RouteTable::new();
        table
            .get("/hi", |_req: &Request| Response::new(StatusCode::Ok))
            .unwrap();
        assert!(table.find(&Method::Get, "/hi").is_some());
        assert!(table.find(&Method::Get, "/hi/there").is_none());
        assert!(table.find(&Method::Get, "/say/hi").is_none());
    }

    #[test]
    fn alternation_is_anchored_as_a_whole() {
        let mut table = RouteTable::new();
        table
            .get("/a|/b", |_req: &Request| Response::new(StatusCode::Ok))
            .unwrap();
        assert!(table.find(&Method::Get, "/a").is_some());
        assert!(table.find(&Method::Get, "/b").is_some());
        assert!(table.find(&Method::Get, "/a/x").is_none());
        assert!(table.find(&Method::Get, "/x/b").is_none());
    }

    #[test]
    fn query_string_is_ignored_for_matching() {
        let table = hi_table();
        assert!(dispatch(&table, "GET", "/hi?name=x").is_some());
    }

    #[test]
    fn first_registered_match_wins() {
        let hits = Arc::new([AtomicUsize::new(0), AtomicUsize::new(0), AtomicUsize::new(0)]);
        let mut table = RouteTable::new();
        for (i, pattern) in ["/other", "/items/.*", "/items/42"].into_iter().enumerate() {
            let hits = Arc::clone(&hits);
            table
                .get(pattern, move |_req: &Request| {
                    hits[i].fetch_add(1, Ordering::SeqCst);
                    Response::new(StatusCode::Ok)
                })
                .unwrap();
        }

        dispatch(&table, "GET", "/items/42").unwrap();

        assert_eq!(hits[0].load(Ordering::SeqCst), 0);
        assert_eq!(hits[1].load(Ordering::SeqCst), 1);
        assert_eq!(hits[2].load(Ordering::SeqCst), 0);
        assert_eq!(table.find(&Method::Get, "/items/42").unwrap().pattern(), "/items/.*");
    }

    #[test]
    fn named_captures_become_params() {
        let mut table = RouteTable::new();
        table
            .get(r"/users/(?P<id>\d+)/posts/(?P<post>[a-z]+)", |req: &Request| {
                let body = format!("{}:{}", req.param("id").unwrap(), req.param("post").unwrap());
                Response::new(StatusCode::Ok).body(body)
            })
            .unwrap();

        let response = dispatch(&table, "GET", "/users/7/posts/intro").unwrap();
        assert_eq!(response.content(), b"7:intro");
        assert!(dispatch(&table, "GET", "/users/x/posts/intro").is_none());
    }

    #[test]
    fn panicking_handler_yields_500() {
        let mut table = RouteTable::new();
        table
            .post("/boom", |_req: &Request| -> Response { panic!("handler bug") })
            .unwrap();

        let response = dispatch(&table, "POST", "/boom").unwrap();
        assert_eq!(response.status(), StatusCode::InternalServerError);
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let mut table = RouteTable::new();
        let err = table
            .get("/broken(", |_req: &Request| Response::new(StatusCode::Ok))
            .unwrap_err();
        assert!(matches!(err, RouterError::InvalidPattern { .. }));
        assert!(table.is_empty());
    }
}
