//! End-to-end tests: a real listener, the accept loop, and a hyper client

use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::{HeaderMap, Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Notify;
use tokio::task::{JoinHandle, LocalSet};

use nosniff_server::config::{AppState, Config};
use nosniff_server::server;

struct TestServer {
    addr: SocketAddr,
    shutdown: Arc<Notify>,
    task: JoinHandle<std::io::Result<()>>,
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Reply {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    fn nosniff_count(&self) -> usize {
        self.headers
            .get_all("x-content-type-options")
            .iter()
            .filter(|v| *v == "nosniff")
            .count()
    }
}

/// Must be called inside a `LocalSet`
fn start(root: &Path, tweak: impl FnOnce(&mut Config)) -> TestServer {
    let mut cfg = Config::default();
    cfg.server.port = 0;
    cfg.server.root = root.to_string_lossy().into_owned();
    cfg.logging.access_log = false;
    tweak(&mut cfg);

    let listener = server::create_reusable_listener(cfg.get_socket_addr().unwrap(), 16).unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Arc::new(Notify::new());
    let task = tokio::task::spawn_local(server::start_server_loop(
        listener,
        Arc::new(AppState::new(&cfg)),
        Arc::new(AtomicUsize::new(0)),
        Arc::clone(&shutdown),
    ));

    TestServer {
        addr,
        shutdown,
        task,
    }
}

async fn send(addr: SocketAddr, method: Method, path: &str, headers: &[(&str, &str)]) -> Reply {
    let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .unwrap();
    tokio::task::spawn_local(conn);

    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header("host", addr.to_string());
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }

    let response = sender
        .send_request(builder.body(Empty::<Bytes>::new()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();

    Reply {
        status,
        headers,
        body,
    }
}

async fn get(addr: SocketAddr, path: &str) -> Reply {
    send(addr, Method::GET, path, &[]).await
}

/// Write raw bytes on a fresh connection and read until the server closes it
async fn send_raw(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    String::from_utf8_lossy(&reply).into_owned()
}

fn nosniff_lines(raw: &str) -> usize {
    raw.matches("\r\nx-content-type-options: nosniff\r\n").count()
}

fn site() -> tempfile::TempDir {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("index.html"), "<h1>hello</h1>").unwrap();
    std::fs::write(tmp.path().join("app.js"), "console.log('hi');").unwrap();
    std::fs::write(tmp.path().join("script.JS"), "alert(1);").unwrap();
    std::fs::write(tmp.path().join("style.css"), "body{}").unwrap();
    std::fs::write(tmp.path().join("pixel.png"), [0x89, b'P', b'N', b'G']).unwrap();
    std::fs::create_dir(tmp.path().join("assets")).unwrap();
    std::fs::write(tmp.path().join("assets/main.js"), "export {};").unwrap();
    tmp
}

#[tokio::test]
async fn test_index_html() {
    let tmp = site();
    LocalSet::new()
        .run_until(async {
            let srv = start(tmp.path(), |_| {});
            let reply = get(srv.addr, "/index.html").await;
            assert_eq!(reply.status, StatusCode::OK);
            assert_eq!(reply.header("content-type"), Some("text/html"));
            assert_eq!(reply.nosniff_count(), 1);
            assert_eq!(reply.body, "<h1>hello</h1>");
        })
        .await;
}

#[tokio::test]
async fn test_javascript_is_forced() {
    let tmp = site();
    LocalSet::new()
        .run_until(async {
            let srv = start(tmp.path(), |_| {});
            for path in ["/app.js", "/assets/main.js", "/app.js?v=3"] {
                let reply = get(srv.addr, path).await;
                assert_eq!(reply.status, StatusCode::OK, "{path}");
                assert_eq!(reply.header("content-type"), Some("application/javascript"), "{path}");
                assert_eq!(reply.nosniff_count(), 1, "{path}");
            }
        })
        .await;
}

#[tokio::test]
async fn test_uppercase_extension_uses_default_table() {
    let tmp = site();
    LocalSet::new()
        .run_until(async {
            let srv = start(tmp.path(), |_| {});
            let reply = get(srv.addr, "/script.JS").await;
            assert_eq!(reply.status, StatusCode::OK);
            assert_eq!(reply.header("content-type"), Some("text/javascript"));
            assert_eq!(reply.nosniff_count(), 1);
        })
        .await;
}

#[tokio::test]
async fn test_other_types_unchanged() {
    let tmp = site();
    LocalSet::new()
        .run_until(async {
            let srv = start(tmp.path(), |_| {});
            assert_eq!(get(srv.addr, "/style.css").await.header("content-type"), Some("text/css"));
            assert_eq!(get(srv.addr, "/pixel.png").await.header("content-type"), Some("image/png"));
        })
        .await;
}

#[tokio::test]
async fn test_missing_file_still_nosniff() {
    let tmp = site();
    LocalSet::new()
        .run_until(async {
            let srv = start(tmp.path(), |_| {});
            let reply = get(srv.addr, "/missing.txt").await;
            assert_eq!(reply.status, StatusCode::NOT_FOUND);
            assert_eq!(reply.nosniff_count(), 1);
            assert_eq!(reply.header("content-type"), Some("text/html;charset=utf-8"));
            assert!(String::from_utf8_lossy(&reply.body).contains("Error code: 404"));
        })
        .await;
}

#[tokio::test]
async fn test_every_status_carries_nosniff() {
    let tmp = site();
    LocalSet::new()
        .run_until(async {
            let srv = start(tmp.path(), |_| {});

            let redirect = get(srv.addr, "/assets").await;
            assert_eq!(redirect.status, StatusCode::MOVED_PERMANENTLY);
            assert_eq!(redirect.header("location"), Some("/assets/"));
            assert_eq!(redirect.nosniff_count(), 1);

            let listing = get(srv.addr, "/assets/").await;
            assert_eq!(listing.status, StatusCode::OK);
            assert!(String::from_utf8_lossy(&listing.body).contains("main.js"));
            assert_eq!(listing.nosniff_count(), 1);

            let post = send(srv.addr, Method::POST, "/app.js", &[]).await;
            assert_eq!(post.status, StatusCode::NOT_IMPLEMENTED);
            assert_eq!(post.nosniff_count(), 1);

            let head = send(srv.addr, Method::HEAD, "/app.js", &[]).await;
            assert_eq!(head.status, StatusCode::OK);
            assert_eq!(head.header("content-type"), Some("application/javascript"));
            assert!(head.body.is_empty());
            assert_eq!(head.nosniff_count(), 1);

            let partial = send(srv.addr, Method::GET, "/app.js", &[("range", "bytes=0-6")]).await;
            assert_eq!(partial.status, StatusCode::PARTIAL_CONTENT);
            assert_eq!(partial.body, "console");
            assert_eq!(partial.header("content-type"), Some("application/javascript"));
            assert_eq!(partial.nosniff_count(), 1);

            let unsatisfiable = send(srv.addr, Method::GET, "/app.js", &[("range", "bytes=999-")]).await;
            assert_eq!(unsatisfiable.status, StatusCode::RANGE_NOT_SATISFIABLE);
            assert_eq!(unsatisfiable.nosniff_count(), 1);

            let full = get(srv.addr, "/app.js").await;
            let etag = full.header("etag").unwrap().to_string();
            let cached = send(srv.addr, Method::GET, "/app.js", &[("if-none-match", etag.as_str())]).await;
            assert_eq!(cached.status, StatusCode::NOT_MODIFIED);
            assert_eq!(cached.nosniff_count(), 1);
        })
        .await;
}

#[tokio::test]
async fn test_malformed_request_carries_nosniff() {
    let tmp = site();
    LocalSet::new()
        .run_until(async {
            let srv = start(tmp.path(), |_| {});
            let raw = send_raw(srv.addr, b"GARBAGE\r\n\r\n").await;
            assert!(raw.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{raw}");
            assert_eq!(nosniff_lines(&raw), 1);
            assert!(raw.contains("\r\nconnection: close\r\n"));
            assert!(raw.contains("Bad request syntax ('GARBAGE')"));
        })
        .await;
}

#[tokio::test]
async fn test_oversized_header_carries_nosniff() {
    let tmp = site();
    LocalSet::new()
        .run_until(async {
            let srv = start(tmp.path(), |_| {});
            let mut request = b"GET / HTTP/1.1\r\nhost: x\r\nx-big: ".to_vec();
            request.resize(500 * 1024, b'a');
            request.extend_from_slice(b"\r\n\r\n");

            let raw = send_raw(srv.addr, &request).await;
            assert!(raw.starts_with("HTTP/1.1 431 Request Header Fields Too Large\r\n"), "{raw}");
            assert_eq!(nosniff_lines(&raw), 1);
        })
        .await;
}

#[tokio::test]
async fn test_malformed_after_keep_alive_request() {
    let tmp = site();
    LocalSet::new()
        .run_until(async {
            let srv = start(tmp.path(), |_| {});
            let raw = send_raw(srv.addr, b"GET /app.js HTTP/1.1\r\nhost: x\r\n\r\nGET / HTTP/9.9\r\n\r\n").await;
            assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"), "{raw}");
            assert!(raw.contains("HTTP/1.1 505 HTTP Version Not Supported\r\n"), "{raw}");
            assert_eq!(nosniff_lines(&raw), 2);
        })
        .await;
}

#[tokio::test]
async fn test_repeated_requests_are_independent() {
    let tmp = site();
    LocalSet::new()
        .run_until(async {
            let srv = start(tmp.path(), |_| {});
            let first = get(srv.addr, "/app.js").await;
            let second = get(srv.addr, "/app.js").await;
            for reply in [&first, &second] {
                assert_eq!(reply.status, StatusCode::OK);
                assert_eq!(reply.header("content-type"), Some("application/javascript"));
                assert_eq!(reply.nosniff_count(), 1);
            }
            assert_eq!(first.body, second.body);
        })
        .await;
}

#[tokio::test]
async fn test_listing_can_be_disabled() {
    let tmp = site();
    LocalSet::new()
        .run_until(async {
            let srv = start(tmp.path(), |cfg| cfg.http.directory_listing = false);
            let reply = get(srv.addr, "/assets/").await;
            assert_eq!(reply.status, StatusCode::NOT_FOUND);
            assert_eq!(reply.nosniff_count(), 1);
        })
        .await;
}

#[tokio::test]
async fn test_shutdown_stops_loop() {
    let tmp = site();
    LocalSet::new()
        .run_until(async {
            let srv = start(tmp.path(), |_| {});
            assert_eq!(get(srv.addr, "/").await.status, StatusCode::OK);

            srv.shutdown.notify_one();
            let result = srv.task.await.unwrap();
            assert!(result.is_ok());
        })
        .await;
}
