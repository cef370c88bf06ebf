//! Request dispatch module
//!
//! Entry point for HTTP request processing: method validation, context
//! extraction, header finalization and access logging.

use http_body_util::Full;
use hyper::body::{Body as _, Bytes};
use hyper::{HeaderMap, Method, Request, Response};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::config::AppState;
use crate::http;
use crate::logger::{self, AccessLogEntry};

/// Request context encapsulating information needed for request processing
#[derive(Debug, Clone, Default)]
pub struct RequestContext<'a> {
    /// Raw (still percent-encoded) request path
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub is_head: bool,
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<String>,
    pub range_header: Option<String>,
}

impl<'a> RequestContext<'a> {
    /// Plain GET for `path` with no conditional or range headers
    pub fn get(path: &'a str) -> Self {
        Self {
            path,
            ..Self::default()
        }
    }

    pub fn from_request<B>(req: &'a Request<B>) -> Self {
        let headers = req.headers();
        Self {
            path: req.uri().path(),
            query: req.uri().query(),
            is_head: req.method() == Method::HEAD,
            if_none_match: header_string(headers, "if-none-match"),
            if_modified_since: header_string(headers, "if-modified-since"),
            range_header: header_string(headers, "range"),
        }
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
}

/// Main entry point for HTTP request handling
///
/// Request bodies are never read.
pub async fn handle_request<B>(
    req: Request<B>,
    state: Arc<AppState>,
    peer: SocketAddr,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let started = Instant::now();

    let mut response = match check_http_method(req.method()) {
        Some(resp) => resp,
        None => state.files.serve(&RequestContext::from_request(&req)).await,
    };
    state.files.finish(&mut response);

    if state.access_log {
        let mut entry = AccessLogEntry::from_request(
            peer,
            req.method(),
            req.uri(),
            req.version(),
            req.headers(),
        );
        let body_bytes = response.body().size_hint().exact().unwrap_or(0);
        entry.finish(
            response.status().as_u16(),
            usize::try_from(body_bytes).unwrap_or(usize::MAX),
            started.elapsed(),
        );
        logger::log_access(&entry, &state.config.logging.access_log_format);
    }

    Ok(response)
}

/// Only GET and HEAD are served; anything else gets 501
fn check_http_method(method: &Method) -> Option<Response<Full<Bytes>>> {
    match *method {
        Method::GET | Method::HEAD => None,
        _ => {
            logger::log_debug(&format!("Unsupported method: {method}"));
            Some(http::build_501_response(method))
        }
    }
}
