// Connection handling module
// Accepts a single TCP connection and serves HTTP/1 on it

use hyper::header::{HeaderValue, CONNECTION};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::guard::{GuardedStream, Timeouts};
use crate::config::AppState;
use crate::handler;
use crate::http;
use crate::logger;

/// Upper bounds for draining a client after an error page
const LINGER_TIMEOUT: Duration = Duration::from_secs(2);
const LINGER_MAX_BYTES: usize = 4 * 1024 * 1024;

/// Accept and process a connection, enforcing the connection limit.
///
/// # Arguments
///
/// * `stream` - The TCP stream to handle
/// * `peer_addr` - The peer's socket address
/// * `state` - Shared application state
/// * `conn_counter` - Active connection counter
pub fn accept_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: &Arc<AppState>,
    conn_counter: &Arc<AtomicUsize>,
) {
    // Increment counter first, then check limit (prevents race condition)
    let prev_count = conn_counter.fetch_add(1, Ordering::SeqCst);

    if let Some(max_conn) = state.config.performance.max_connections {
        if prev_count >= usize::try_from(max_conn).unwrap_or(usize::MAX) {
            // Exceeded limit: rollback counter and reject
            conn_counter.fetch_sub(1, Ordering::SeqCst);
            logger::log_warning(&format!(
                "Max connections reached: {prev_count}/{max_conn}. Connection from {peer_addr} rejected."
            ));
            drop(stream);
            return;
        }
    }

    logger::log_connection_accepted(&peer_addr);

    handle_connection(stream, peer_addr, Arc::clone(state), Arc::clone(conn_counter));
}

/// Serve one connection in a local task.
///
/// The socket is read through a [`GuardedStream`], which applies the
/// request head checks and the read and write deadlines. A head the guard
/// rejects is answered here once the codec has finished with the
/// connection. The counter is decremented when the task ends.
fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: Arc<AppState>,
    conn_counter: Arc<AtomicUsize>,
) {
    tokio::task::spawn_local(async move {
        let guarded = GuardedStream::new(stream, Timeouts::from_config(&state.config.performance));
        let io = TokioIo::new(guarded);

        let mut builder = http1::Builder::new();
        builder.keep_alive(state.config.performance.keep_alive_timeout > 0);

        let service_state = Arc::clone(&state);
        let conn = builder
            .serve_connection(
                io,
                service_fn(move |req| handler::handle_request(req, Arc::clone(&service_state), peer_addr)),
            )
            .without_shutdown();

        match conn.await {
            Ok(parts) => close_connection(parts.io.into_inner(), &state, peer_addr).await,
            Err(err) => logger::log_connection_error(&err),
        }

        conn_counter.fetch_sub(1, Ordering::SeqCst);
    });
}

/// Answer a rejected request head, then close the socket
async fn close_connection(mut guarded: GuardedStream<TcpStream>, state: &AppState, peer_addr: SocketAddr) {
    let Some(rejection) = guarded.take_rejection() else {
        let _ = guarded.shutdown().await;
        return;
    };

    logger::log_warning(&format!(
        "Rejected request from {peer_addr}: code {}, message {}",
        rejection.status.as_u16(),
        rejection.message
    ));

    let mut response = http::build_error_response(rejection.status, Some(&rejection.message), false);
    state.files.finish(&mut response);
    response
        .headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("close"));
    let wire = http::encode_response(response).await;

    if let Err(e) = guarded.write_all(&wire).await {
        logger::log_debug(&format!("Failed to send error response to {peer_addr}: {e}"));
        return;
    }
    let _ = guarded.shutdown().await;
    linger(guarded.into_inner()).await;
}

/// Read and discard what the client is still sending, so closing the
/// socket does not reset the connection before the error page is read
async fn linger(mut stream: TcpStream) {
    let drain = async {
        let mut scratch = [0u8; 8192];
        let mut total = 0;
        while total < LINGER_MAX_BYTES {
            match stream.read(&mut scratch).await {
                Ok(0) | Err(_) => break,
                Ok(n) => total += n,
            }
        }
    };
    let _ = tokio::time::timeout(LINGER_TIMEOUT, drain).await;
}
