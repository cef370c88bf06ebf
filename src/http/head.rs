//! Request head validation
//!
//! Inspects buffered bytes from a connection before the HTTP/1 codec sees
//! them: is the head complete, is it well formed, and how is the body that
//! follows it framed. A head this module accepts is one the codec accepts
//! too, so every request the codec would refuse is refused here first and
//! answered through the normal response path.

use hyper::header::{HeaderName, HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use hyper::{Method, StatusCode, Uri};

/// Longest request line or header line, line terminator included
pub const MAX_LINE: usize = 65536;

/// Most header fields in one request
pub const MAX_HEADERS: usize = 100;

/// Largest request head; kept below the codec's default read buffer limit
pub const MAX_HEAD_SIZE: usize = 256 * 1024;

/// How the body after a head is delimited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    None,
    Length(u64),
    Chunked,
}

/// An error status and the message shown on its error page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub status: StatusCode,
    pub message: String,
}

impl Rejection {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_syntax(line: &[u8]) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            format!("Bad request syntax ('{}')", String::from_utf8_lossy(line)),
        )
    }
}

/// Result of inspecting the start of a buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadStatus {
    /// The head is not complete yet
    Partial,
    /// A well-formed head occupying the first `len` bytes
    Complete { len: usize, body: BodyFraming },
    Rejected(Rejection),
}

/// Inspect the request head at the start of `buf`.
///
/// Empty lines before the request line are skipped and counted in `len`.
/// Lines may end in CRLF or a bare LF.
pub fn inspect_head(buf: &[u8]) -> HeadStatus {
    let mut pos = 0;
    while let Some(&b) = buf.get(pos) {
        match b {
            b'\n' => pos += 1,
            b'\r' if buf.get(pos + 1) == Some(&b'\n') => pos += 2,
            _ => break,
        }
    }

    let mut request_line: Option<&[u8]> = None;
    let mut fields: Vec<&[u8]> = Vec::new();

    loop {
        let rest = &buf[pos..];
        let Some(newline) = rest.iter().position(|&b| b == b'\n') else {
            if rest.len() >= MAX_LINE {
                return HeadStatus::Rejected(line_too_long(request_line.is_none()));
            }
            if buf.len() > MAX_HEAD_SIZE {
                return HeadStatus::Rejected(head_too_large());
            }
            return HeadStatus::Partial;
        };

        if newline + 1 > MAX_LINE {
            return HeadStatus::Rejected(line_too_long(request_line.is_none()));
        }
        let line = strip_cr(&rest[..newline]);
        pos += newline + 1;
        if pos > MAX_HEAD_SIZE {
            return HeadStatus::Rejected(head_too_large());
        }

        if request_line.is_none() {
            request_line = Some(line);
            continue;
        }
        if line.is_empty() {
            break;
        }
        if fields.len() == MAX_HEADERS {
            return HeadStatus::Rejected(Rejection::new(
                StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
                "Too many headers",
            ));
        }
        fields.push(line);
    }

    let Some(request_line) = request_line else {
        return HeadStatus::Partial;
    };

    match validate(request_line, &fields) {
        Ok(body) => HeadStatus::Complete { len: pos, body },
        Err(rejection) => HeadStatus::Rejected(rejection),
    }
}

/// Parse a chunk-size line (`1a;ext=1`) of a chunked body
pub fn chunk_size(line: &[u8]) -> Option<u64> {
    let line = strip_cr(line);
    let size = line.split(|&b| b == b';').next().unwrap_or_default();
    let size = std::str::from_utf8(size).ok()?.trim_matches([' ', '\t']);
    if size.is_empty() || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(size, 16).ok()
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn line_too_long(in_request_line: bool) -> Rejection {
    if in_request_line {
        Rejection::new(StatusCode::URI_TOO_LONG, "Request-URI Too Long")
    } else {
        Rejection::new(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE, "Line too long")
    }
}

fn head_too_large() -> Rejection {
    Rejection::new(
        StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
        "Request header too large",
    )
}

fn validate(request_line: &[u8], fields: &[&[u8]]) -> Result<BodyFraming, Rejection> {
    let http10 = parse_request_line(request_line)?;

    let mut content_length: Option<u64> = None;
    let mut last_coding: Option<Vec<u8>> = None;

    for field in fields {
        let (name, value) = parse_field(field)?;
        if name == TRANSFER_ENCODING {
            last_coding = value
                .as_bytes()
                .rsplit(|&b| b == b',')
                .next()
                .map(|c| c.trim_ascii().to_ascii_lowercase());
        } else if name == CONTENT_LENGTH {
            for part in value.as_bytes().split(|&b| b == b',') {
                let length = parse_length(part.trim_ascii()).ok_or_else(bad_length)?;
                if content_length.is_some_and(|seen| seen != length) {
                    return Err(bad_length());
                }
                content_length = Some(length);
            }
        }
    }

    match (last_coding, content_length) {
        (Some(_), _) if http10 => Err(Rejection::new(
            StatusCode::BAD_REQUEST,
            "Transfer-Encoding not allowed in HTTP/1.0",
        )),
        (Some(coding), _) if coding == b"chunked" => Ok(BodyFraming::Chunked),
        (Some(_), _) => Err(Rejection::new(
            StatusCode::BAD_REQUEST,
            "Unsupported Transfer-Encoding",
        )),
        (None, Some(0) | None) => Ok(BodyFraming::None),
        (None, Some(length)) => Ok(BodyFraming::Length(length)),
    }
}

/// Check `METHOD SP target SP version`; returns whether the version is HTTP/1.0
fn parse_request_line(line: &[u8]) -> Result<bool, Rejection> {
    let parts: Vec<&[u8]> = line.split(|&b| b == b' ').collect();
    let [method, target, version] = parts.as_slice() else {
        return Err(Rejection::bad_syntax(line));
    };

    let http10 = match *version {
        b"HTTP/1.1" => false,
        b"HTTP/1.0" => true,
        other => return Err(bad_version(other)),
    };

    if method.is_empty() || Method::from_bytes(method).is_err() {
        return Err(Rejection::bad_syntax(line));
    }
    if target.is_empty() || Uri::try_from(*target).is_err() {
        return Err(Rejection::bad_syntax(line));
    }

    Ok(http10)
}

fn bad_version(version: &[u8]) -> Rejection {
    let text = String::from_utf8_lossy(version);
    let major = text
        .strip_prefix("HTTP/")
        .and_then(|v| v.split_once('.'))
        .and_then(|(major, _)| major.parse::<u32>().ok());

    match major {
        Some(major) if major >= 2 => Rejection::new(
            StatusCode::HTTP_VERSION_NOT_SUPPORTED,
            format!("Invalid HTTP version ({text})"),
        ),
        _ => Rejection::new(
            StatusCode::BAD_REQUEST,
            format!("Bad request version ('{text}')"),
        ),
    }
}

fn parse_field(field: &[u8]) -> Result<(HeaderName, HeaderValue), Rejection> {
    let bad_header = || {
        Rejection::new(
            StatusCode::BAD_REQUEST,
            format!("Bad header line ('{}')", String::from_utf8_lossy(field)),
        )
    };

    let colon = field.iter().position(|&b| b == b':').ok_or_else(bad_header)?;
    let name = HeaderName::from_bytes(&field[..colon]).map_err(|_| bad_header())?;
    let value = HeaderValue::from_bytes(field[colon + 1..].trim_ascii()).map_err(|_| bad_header())?;
    Ok((name, value))
}

fn parse_length(digits: &[u8]) -> Option<u64> {
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

fn bad_length() -> Rejection {
    Rejection::new(StatusCode::BAD_REQUEST, "Bad Content-Length")
}
