//! Static file serving module
//!
//! The file engine: resolves request paths under the document root, serves
//! files with conditional and range support, and renders directory
//! listings. Content types and final headers come from a [`FileHandler`].

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::Response;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::listing;
use super::path::{display_path, translate_path};
use super::responder::FileHandler;
use crate::handler::router::RequestContext;
use crate::http::{self, cache, FileMeta, RangeParseResult};
use crate::logger;

const FILE_NOT_FOUND: &str = "File not found";
const NO_PERMISSION_TO_LIST: &str = "No permission to list directory";

/// Static file engine over a document root
pub struct StaticFiles<H> {
    root: PathBuf,
    index_files: Vec<String>,
    directory_listing: bool,
    cache_max_age: u32,
    handler: H,
}

impl<H: FileHandler> StaticFiles<H> {
    pub fn new(
        root: impl Into<PathBuf>,
        index_files: Vec<String>,
        directory_listing: bool,
        cache_max_age: u32,
        handler: H,
    ) -> Self {
        Self {
            root: root.into(),
            index_files,
            directory_listing,
            cache_max_age,
            handler,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub const fn handler(&self) -> &H {
        &self.handler
    }

    /// Serve a request and finalize the response headers
    pub async fn respond(&self, ctx: &RequestContext<'_>) -> Response<Full<Bytes>> {
        let mut response = self.serve(ctx).await;
        self.finish(&mut response);
        response
    }

    /// Run the handler's header completion step on a response
    ///
    /// Every response leaving the server passes through here exactly once.
    pub fn finish(&self, response: &mut Response<Full<Bytes>>) {
        self.handler.end_headers(response.headers_mut());
    }

    /// Build the engine response for a GET or HEAD request
    pub async fn serve(&self, ctx: &RequestContext<'_>) -> Response<Full<Bytes>> {
        let translated = translate_path(&self.root, ctx.path);
        let mut file_path = translated.fs_path;

        let Ok(metadata) = fs::metadata(&file_path).await else {
            return http::build_404_response(FILE_NOT_FOUND, ctx.is_head);
        };

        if !self.is_within_root(&file_path, ctx.path).await {
            return http::build_404_response(FILE_NOT_FOUND, ctx.is_head);
        }

        if metadata.is_dir() {
            if !translated.trailing_slash {
                return http::build_redirect_response(&directory_location(ctx));
            }
            match self.find_index(&file_path).await {
                Some(index) => file_path = index,
                None => return self.list_directory(&file_path, ctx).await,
            }
        } else if translated.trailing_slash {
            return http::build_404_response(FILE_NOT_FOUND, ctx.is_head);
        }

        self.serve_file(&file_path, ctx).await
    }

    /// First configured index file present in `dir`
    async fn find_index(&self, dir: &Path) -> Option<PathBuf> {
        for name in &self.index_files {
            let candidate = dir.join(name);
            if fs::metadata(&candidate).await.is_ok_and(|m| m.is_file()) {
                return Some(candidate);
            }
        }
        None
    }

    async fn list_directory(&self, dir: &Path, ctx: &RequestContext<'_>) -> Response<Full<Bytes>> {
        if !self.directory_listing {
            return http::build_404_response(FILE_NOT_FOUND, ctx.is_head);
        }

        match listing::render_listing(dir, &display_path(ctx.path)).await {
            Ok(html) => http::build_html_response(html, ctx.is_head),
            Err(e) => {
                logger::log_warning(&format!(
                    "Failed to list directory '{}': {e}",
                    dir.display()
                ));
                http::build_404_response(NO_PERMISSION_TO_LIST, ctx.is_head)
            }
        }
    }

    /// Serve a regular file with `ETag`, `Last-Modified` and Range support
    async fn serve_file(&self, file_path: &Path, ctx: &RequestContext<'_>) -> Response<Full<Bytes>> {
        let content = match fs::read(file_path).await {
            Ok(c) => Bytes::from(c),
            Err(e) => {
                logger::log_error(&format!(
                    "Failed to read file '{}': {e}",
                    file_path.display()
                ));
                return http::build_404_response(FILE_NOT_FOUND, ctx.is_head);
            }
        };
        let modified = fs::metadata(file_path)
            .await
            .and_then(|m| m.modified())
            .ok();

        let content_type = self.handler.guess_type(file_path);
        let etag = cache::generate_etag(&content);
        let last_modified = modified.map(cache::last_modified);

        // If-None-Match takes precedence over If-Modified-Since
        let not_modified = if ctx.if_none_match.is_some() {
            cache::check_etag_match(ctx.if_none_match.as_deref(), &etag)
        } else {
            modified.is_some_and(|m| cache::not_modified_since(ctx.if_modified_since.as_deref(), m))
        };
        if not_modified {
            return http::build_304_response(&etag, last_modified.as_deref());
        }

        let meta = FileMeta {
            content_type: &content_type,
            etag: &etag,
            last_modified: last_modified.as_deref(),
            cache_max_age: self.cache_max_age,
        };
        let total_size = content.len() as u64;

        match http::parse_range_header(ctx.range_header.as_deref(), total_size) {
            RangeParseResult::Valid(range) => {
                // Bounds are below content.len(), so the casts are lossless
                #[allow(clippy::cast_possible_truncation)]
                let part = content.slice(range.start as usize..=range.end as usize);
                http::build_partial_response(part, &meta, range, total_size, ctx.is_head)
            }
            RangeParseResult::NotSatisfiable => http::build_416_response(total_size, ctx.is_head),
            RangeParseResult::None => http::build_file_response(content, &meta, ctx.is_head),
        }
    }

    /// Reject paths that leave the document root through symlinks
    async fn is_within_root(&self, file_path: &Path, request_path: &str) -> bool {
        let root = match fs::canonicalize(&self.root).await {
            Ok(p) => p,
            Err(e) => {
                logger::log_warning(&format!(
                    "Document root not found or inaccessible '{}': {e}",
                    self.root.display()
                ));
                return false;
            }
        };
        let Ok(resolved) = fs::canonicalize(file_path).await else {
            return false;
        };

        if resolved.starts_with(&root) {
            true
        } else {
            logger::log_warning(&format!(
                "Path traversal attempt blocked: {request_path} -> {}",
                resolved.display()
            ));
            false
        }
    }
}

/// Redirect target for a directory requested without its trailing slash
fn directory_location(ctx: &RequestContext<'_>) -> String {
    match ctx.query {
        Some(q) => format!("{}/?{q}", ctx.path),
        None => format!("{}/", ctx.path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::responder::{DefaultFileHandler, NosniffResponder};
    use http_body_util::BodyExt;
    use hyper::StatusCode;

    fn engine(root: &Path) -> StaticFiles<NosniffResponder<DefaultFileHandler>> {
        StaticFiles::new(
            root,
            vec!["index.html".to_string()],
            true,
            3600,
            NosniffResponder::new(DefaultFileHandler::new("test")),
        )
    }

    fn site() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("index.html"), "<h1>home</h1>").unwrap();
        std::fs::write(tmp.path().join("app.js"), "console.log(1);").unwrap();
        std::fs::write(tmp.path().join("script.JS"), "alert(1);").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "0123456789").unwrap();
        std::fs::create_dir(tmp.path().join("docs")).unwrap();
        std::fs::write(tmp.path().join("docs/readme.md"), "# docs").unwrap();
        tmp
    }

    async fn body(response: Response<Full<Bytes>>) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn test_serves_file_with_content_type() {
        let tmp = site();
        let files = engine(tmp.path());

        let response = files.respond(&RequestContext::get("/app.js")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "application/javascript");
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
        assert_eq!(response.headers()["server"], "test");
        assert!(response.headers().contains_key("last-modified"));
        assert_eq!(body(response).await, "console.log(1);");

        let response = files.respond(&RequestContext::get("/script.JS")).await;
        assert_eq!(response.headers()["content-type"], "text/javascript");
    }

    #[tokio::test]
    async fn test_root_serves_index() {
        let tmp = site();
        let response = engine(tmp.path()).respond(&RequestContext::get("/")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/html");
        assert_eq!(body(response).await, "<h1>home</h1>");
    }

    #[tokio::test]
    async fn test_directory_redirect_keeps_query() {
        let tmp = site();
        let mut ctx = RequestContext::get("/docs");
        ctx.query = Some("lang=en");
        let response = engine(tmp.path()).respond(&ctx).await;
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers()["location"], "/docs/?lang=en");
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    }

    #[tokio::test]
    async fn test_directory_listing() {
        let tmp = site();
        let files = engine(tmp.path());
        let response = files.respond(&RequestContext::get("/docs/")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/html; charset=utf-8");
        let html = body(response).await;
        assert!(String::from_utf8_lossy(&html).contains("readme.md"));
    }

    #[tokio::test]
    async fn test_directory_listing_disabled() {
        let tmp = site();
        let files = StaticFiles::new(
            tmp.path(),
            Vec::new(),
            false,
            0,
            NosniffResponder::new(DefaultFileHandler::new("test")),
        );
        let response = files.respond(&RequestContext::get("/docs/")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_missing_and_trailing_slash_on_file() {
        let tmp = site();
        let files = engine(tmp.path());

        let response = files.respond(&RequestContext::get("/missing.txt")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");

        let response = files.respond(&RequestContext::get("/notes.txt/")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_etag_revalidation() {
        let tmp = site();
        let files = engine(tmp.path());

        let first = files.respond(&RequestContext::get("/notes.txt")).await;
        let etag = first.headers()["etag"].to_str().unwrap().to_string();

        let mut ctx = RequestContext::get("/notes.txt");
        ctx.if_none_match = Some(etag.clone());
        let second = files.respond(&ctx).await;
        assert_eq!(second.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(second.headers()["etag"], etag.as_str());
        assert_eq!(second.headers()["x-content-type-options"], "nosniff");
    }

    #[tokio::test]
    async fn test_if_modified_since() {
        let tmp = site();
        let files = engine(tmp.path());

        let first = files.respond(&RequestContext::get("/notes.txt")).await;
        let last_modified = first.headers()["last-modified"].to_str().unwrap().to_string();

        let mut ctx = RequestContext::get("/notes.txt");
        ctx.if_modified_since = Some(last_modified.clone());
        assert_eq!(files.respond(&ctx).await.status(), StatusCode::NOT_MODIFIED);

        // A non-matching If-None-Match wins over a matching date
        ctx.if_none_match = Some("\"stale\"".to_string());
        assert_eq!(files.respond(&ctx).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_range_requests() {
        let tmp = site();
        let files = engine(tmp.path());

        let mut ctx = RequestContext::get("/notes.txt");
        ctx.range_header = Some("bytes=2-4".to_string());
        let response = files.respond(&ctx).await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()["content-range"], "bytes 2-4/10");
        assert_eq!(body(response).await, "234");

        ctx.range_header = Some("bytes=50-".to_string());
        let response = files.respond(&ctx).await;
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    }

    #[tokio::test]
    async fn test_head_has_headers_without_body() {
        let tmp = site();
        let mut ctx = RequestContext::get("/notes.txt");
        ctx.is_head = true;
        let response = engine(tmp.path()).respond(&ctx).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-length"], "10");
        assert!(body(response).await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_blocked() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "secret").unwrap();
        let tmp = site();
        std::os::unix::fs::symlink(outside.path().join("secret.txt"), tmp.path().join("leak.txt"))
            .unwrap();

        let response = engine(tmp.path()).respond(&RequestContext::get("/leak.txt")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
