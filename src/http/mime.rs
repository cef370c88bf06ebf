//! MIME type detection module
//!
//! Default extension-to-type lookup used by the file engine. Anything the
//! table does not know is served as `application/octet-stream`.

use std::borrow::Cow;
use std::path::Path;

/// Fallback for unknown or missing extensions
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Get the default Content-Type for a file system path
///
/// Extension matching is case-insensitive, so `app.JS` and `app.js` resolve
/// to the same entry.
///
/// # Examples
/// ```
/// use nosniff_server::http::mime::default_content_type;
/// use std::path::Path;
/// assert_eq!(default_content_type(Path::new("index.html")), "text/html");
/// assert_eq!(default_content_type(Path::new("data.unknownext")), "application/octet-stream");
/// ```
pub fn default_content_type(path: &Path) -> Cow<'static, str> {
    mime_guess::from_path(path)
        .first_raw()
        .map_or(Cow::Borrowed(FALLBACK_CONTENT_TYPE), Cow::Borrowed)
}
