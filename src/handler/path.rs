//! Request path to file system path translation

use std::borrow::Cow;
use std::path::{Path, PathBuf};

/// File system location for a request path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatedPath {
    pub fs_path: PathBuf,
    /// The request path ended with `/`
    pub trailing_slash: bool,
}

/// Map a URL path onto `root`
///
/// The path is percent-decoded and normalized; `.` and `..` segments never
/// climb above `root`. Symlinks are not resolved here.
pub fn translate_path(root: &Path, request_path: &str) -> TranslatedPath {
    let trailing_slash = request_path.trim_end().ends_with('/');
    let decoded = percent_decode(request_path);

    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            // A decoded backslash could act as a separator on some platforms
            s if s.contains('\\') => {}
            s => segments.push(s),
        }
    }

    let mut fs_path = root.to_path_buf();
    fs_path.extend(segments);

    TranslatedPath {
        fs_path,
        trailing_slash,
    }
}

/// Percent-decode a path, keeping undecodable bytes as replacement characters
fn percent_decode(path: &str) -> Cow<'_, str> {
    urlencoding::decode(path).unwrap_or_else(|_| {
        let bytes = urlencoding::decode_binary(path.as_bytes());
        Cow::Owned(String::from_utf8_lossy(&bytes).into_owned())
    })
}

/// Percent-decode for display (directory listing titles)
pub fn display_path(request_path: &str) -> String {
    percent_decode(request_path).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translate(path: &str) -> TranslatedPath {
        translate_path(Path::new("/srv/www"), path)
    }

    #[test]
    fn test_plain_paths() {
        assert_eq!(translate("/index.html").fs_path, PathBuf::from("/srv/www/index.html"));
        assert_eq!(translate("/").fs_path, PathBuf::from("/srv/www"));
        assert_eq!(translate("/a/b/c.js").fs_path, PathBuf::from("/srv/www/a/b/c.js"));
    }

    #[test]
    fn test_trailing_slash() {
        assert!(translate("/docs/").trailing_slash);
        assert!(!translate("/docs").trailing_slash);
        assert!(translate("/").trailing_slash);
    }

    #[test]
    fn test_percent_decoding() {
        assert_eq!(translate("/my%20file.txt").fs_path, PathBuf::from("/srv/www/my file.txt"));
        assert_eq!(translate("/caf%C3%A9.html").fs_path, PathBuf::from("/srv/www/café.html"));
    }

    #[test]
    fn test_traversal_stays_in_root() {
        assert_eq!(translate("/../../etc/passwd").fs_path, PathBuf::from("/srv/www/etc/passwd"));
        assert_eq!(translate("/a/../../b").fs_path, PathBuf::from("/srv/www/b"));
        assert_eq!(translate("/%2e%2e/%2e%2e/etc").fs_path, PathBuf::from("/srv/www/etc"));
        assert_eq!(translate("/a/./b//c").fs_path, PathBuf::from("/srv/www/a/b/c"));
        assert_eq!(translate("/..%5c..%5csecret").fs_path, PathBuf::from("/srv/www"));
    }

    #[test]
    fn test_display_path() {
        assert_eq!(display_path("/my%20dir/"), "/my dir/");
    }
}
