//! HTTP protocol layer module
//!
//! Protocol building blocks used by the static file engine: MIME lookup,
//! cache validators, byte ranges, request head checks and response
//! builders.

pub mod cache;
pub mod head;
pub mod mime;
pub mod range;
pub mod response;

// Re-export commonly used types
pub use range::{parse_range_header, ByteRange, RangeParseResult};
pub use response::{
    build_304_response, build_404_response, build_416_response, build_501_response,
    build_error_response, build_file_response, build_html_response, build_partial_response,
    build_redirect_response, encode_response, FileMeta,
};
