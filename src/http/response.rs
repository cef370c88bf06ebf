//! HTTP response building module
//!
//! Builders for every status the file engine emits. None of them sets
//! policy headers; those are added when the response is finalized.

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::DATE;
use hyper::{Response, StatusCode};
use std::time::SystemTime;

use super::range::ByteRange;

/// Content-Type of generated error pages
pub const ERROR_CONTENT_TYPE: &str = "text/html;charset=utf-8";

/// Validators and type shared by 200 and 206 file responses
#[derive(Debug, Clone)]
pub struct FileMeta<'a> {
    pub content_type: &'a str,
    pub etag: &'a str,
    pub last_modified: Option<&'a str>,
    pub cache_max_age: u32,
}

/// Build an HTML error page
///
/// The body is omitted for HEAD requests and for statuses that must not
/// carry one; `Content-Length` still describes the page.
pub fn build_error_response(
    status: StatusCode,
    message: Option<&str>,
    is_head: bool,
) -> Response<Full<Bytes>> {
    let reason = status.canonical_reason().unwrap_or("Unknown");
    let page = error_page(status.as_u16(), message.unwrap_or(reason), reason);
    let content_length = page.len();

    let body = if is_head || status.is_informational() || status == StatusCode::NO_CONTENT {
        Bytes::new()
    } else {
        Bytes::from(page)
    };

    Response::builder()
        .status(status)
        .header("Content-Type", ERROR_CONTENT_TYPE)
        .header("Content-Length", content_length)
        .body(Full::new(body))
        .unwrap_or_else(|e| {
            log_build_error(status.as_str(), &e);
            Response::new(Full::new(Bytes::new()))
        })
}

/// Build 404 Not Found response
pub fn build_404_response(message: &str, is_head: bool) -> Response<Full<Bytes>> {
    build_error_response(StatusCode::NOT_FOUND, Some(message), is_head)
}

/// Build 501 response for methods the engine does not serve
pub fn build_501_response(method: &hyper::Method) -> Response<Full<Bytes>> {
    build_error_response(
        StatusCode::NOT_IMPLEMENTED,
        Some(&format!("Unsupported method ('{method}')")),
        false,
    )
}

/// Build 301 redirect to the slash-terminated directory URL
pub fn build_redirect_response(location: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::MOVED_PERMANENTLY)
        .header("Location", location)
        .header("Content-Length", 0)
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|e| {
            log_build_error("301", &e);
            Response::new(Full::new(Bytes::new()))
        })
}

/// Build 304 Not Modified response
pub fn build_304_response(etag: &str, last_modified: Option<&str>) -> Response<Full<Bytes>> {
    let mut builder = Response::builder()
        .status(StatusCode::NOT_MODIFIED)
        .header("ETag", etag);
    if let Some(lm) = last_modified {
        builder = builder.header("Last-Modified", lm);
    }

    builder.body(Full::new(Bytes::new())).unwrap_or_else(|e| {
        log_build_error("304", &e);
        Response::new(Full::new(Bytes::new()))
    })
}

/// Build 416 Range Not Satisfiable response
pub fn build_416_response(file_size: u64, is_head: bool) -> Response<Full<Bytes>> {
    let mut response = build_error_response(StatusCode::RANGE_NOT_SATISFIABLE, None, is_head);
    if let Ok(value) = format!("bytes */{file_size}").parse() {
        response.headers_mut().insert(hyper::header::CONTENT_RANGE, value);
    }
    response
}

/// Build 200 HTML response (directory listings)
pub fn build_html_response(content: String, is_head: bool) -> Response<Full<Bytes>> {
    let content_length = content.len();
    let body = if is_head {
        Bytes::new()
    } else {
        Bytes::from(content)
    };

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/html; charset=utf-8")
        .header("Content-Length", content_length)
        .body(Full::new(body))
        .unwrap_or_else(|e| {
            log_build_error("HTML", &e);
            Response::new(Full::new(Bytes::new()))
        })
}

/// Build 200 file response with validators
pub fn build_file_response(data: Bytes, meta: &FileMeta<'_>, is_head: bool) -> Response<Full<Bytes>> {
    let content_length = data.len();
    let body = if is_head { Bytes::new() } else { data };

    with_file_headers(Response::builder().status(StatusCode::OK), meta)
        .header("Content-Length", content_length)
        .body(Full::new(body))
        .unwrap_or_else(|e| {
            log_build_error("200", &e);
            Response::new(Full::new(Bytes::new()))
        })
}

/// Build 206 Partial Content response
///
/// `data` must already be the slice covered by `range`.
pub fn build_partial_response(
    data: Bytes,
    meta: &FileMeta<'_>,
    range: ByteRange,
    total_size: u64,
    is_head: bool,
) -> Response<Full<Bytes>> {
    let body = if is_head { Bytes::new() } else { data };

    with_file_headers(Response::builder().status(StatusCode::PARTIAL_CONTENT), meta)
        .header("Content-Length", range.len())
        .header("Content-Range", range.content_range(total_size))
        .body(Full::new(body))
        .unwrap_or_else(|e| {
            log_build_error("206", &e);
            Response::new(Full::new(Bytes::new()))
        })
}

fn with_file_headers(builder: hyper::http::response::Builder, meta: &FileMeta<'_>) -> hyper::http::response::Builder {
    let builder = builder
        .header("Content-Type", meta.content_type)
        .header("Accept-Ranges", "bytes")
        .header("ETag", meta.etag)
        .header("Cache-Control", format!("public, max-age={}", meta.cache_max_age));
    match meta.last_modified {
        Some(lm) => builder.header("Last-Modified", lm),
        None => builder,
    }
}

/// Serialize a response as HTTP/1.1 bytes, for connections answered
/// outside the codec. A `Date` header is added when missing.
pub async fn encode_response(response: Response<Full<Bytes>>) -> Vec<u8> {
    let (parts, body) = response.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(never) => match never {},
    };

    let mut out = Vec::with_capacity(256 + body.len());
    out.extend_from_slice(
        format!(
            "HTTP/1.1 {} {}\r\n",
            parts.status.as_u16(),
            parts.status.canonical_reason().unwrap_or("Unknown")
        )
        .as_bytes(),
    );
    if !parts.headers.contains_key(DATE) {
        let date = httpdate::fmt_http_date(SystemTime::now());
        out.extend_from_slice(format!("date: {date}\r\n").as_bytes());
    }
    for (name, value) in &parts.headers {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&body);
    out
}

fn error_page(code: u16, message: &str, explain: &str) -> String {
    format!(
        "<!DOCTYPE HTML>\n\
         <html lang=\"en\">\n\
         <head>\n\
         <meta charset=\"utf-8\">\n\
         <title>Error response</title>\n\
         </head>\n\
         <body>\n\
         <h1>Error response</h1>\n\
         <p>Error code: {code}</p>\n\
         <p>Message: {}.</p>\n\
         <p>Error code explanation: {code} - {}.</p>\n\
         </body>\n\
         </html>\n",
        html_escape(message),
        html_escape(explain),
    )
}

/// Escape text for inclusion in HTML element content (quotes are left as is)
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Log response build error
fn log_build_error(status: &str, error: &hyper::http::Error) {
    crate::logger::log_error(&format!("Failed to build {status} response: {error}"));
}
