//! Static file responder
//!
//! The two hooks the file engine calls while answering a request, and the
//! nosniff policy layered on top of the engine's own behaviour.

use hyper::header::{HeaderMap, HeaderValue, SERVER, X_CONTENT_TYPE_OPTIONS};
use std::borrow::Cow;
use std::path::Path;

use crate::http::mime;

/// MIME type forced for `.js` files
pub const JAVASCRIPT_CONTENT_TYPE: &str = "application/javascript";

/// Value of the `X-Content-Type-Options` header added to every response
pub const NOSNIFF: &str = "nosniff";

/// Extension points of the static file engine
///
/// `end_headers` runs once on every response right before it is handed to
/// the connection; `guess_type` resolves the `Content-Type` of a file
/// about to be served. Neither may fail.
pub trait FileHandler: Send + Sync {
    /// Finalize the header section of an outgoing response
    fn end_headers(&self, headers: &mut HeaderMap);

    /// Resolve the content type for a file system path
    fn guess_type(&self, path: &Path) -> Cow<'static, str>;
}

/// The engine's stock hooks: a `Server` header and the default MIME table
#[derive(Debug, Clone)]
pub struct DefaultFileHandler {
    server_name: Option<HeaderValue>,
}

impl DefaultFileHandler {
    pub fn new(server_name: &str) -> Self {
        let value = HeaderValue::from_str(server_name).ok();
        if value.is_none() {
            crate::logger::log_warning(&format!(
                "Server name {server_name:?} is not a valid header value, omitting Server header"
            ));
        }
        Self { server_name: value }
    }
}

impl FileHandler for DefaultFileHandler {
    fn end_headers(&self, headers: &mut HeaderMap) {
        if let Some(name) = &self.server_name {
            headers.entry(SERVER).or_insert_with(|| name.clone());
        }
    }

    fn guess_type(&self, path: &Path) -> Cow<'static, str> {
        mime::default_content_type(path)
    }
}

/// Adds `X-Content-Type-Options: nosniff` to every response and serves
/// `.js` files as `application/javascript`, delegating everything else
#[derive(Debug, Clone)]
pub struct NosniffResponder<H> {
    inner: H,
}

impl<H: FileHandler> NosniffResponder<H> {
    pub const fn new(inner: H) -> Self {
        Self { inner }
    }

    pub const fn inner(&self) -> &H {
        &self.inner
    }
}

impl<H: FileHandler> FileHandler for NosniffResponder<H> {
    fn end_headers(&self, headers: &mut HeaderMap) {
        // insert replaces any earlier value, so the header appears exactly once
        headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static(NOSNIFF));
        self.inner.end_headers(headers);
    }

    fn guess_type(&self, path: &Path) -> Cow<'static, str> {
        // Case-sensitive on purpose: "app.JS" keeps the default mapping
        if path.to_str().is_some_and(|p| p.ends_with(".js")) {
            return Cow::Borrowed(JAVASCRIPT_CONTENT_TYPE);
        }
        self.inner.guess_type(path)
    }
}
