// Connection guard module
// Byte stream wrapper that sits between the socket and the HTTP/1 codec

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{sleep, Sleep};

use crate::config::PerformanceConfig;
use crate::http::head::{self, BodyFraming, HeadStatus, Rejection};

const READ_CHUNK: usize = 8 * 1024;

/// Per-connection time limits; `None` disables a limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// From the first byte of a request head to its last
    pub header_read: Option<Duration>,
    /// Idle wait for the next request on a kept-alive connection
    pub keep_alive: Option<Duration>,
    /// Longest a single write may stall
    pub write: Option<Duration>,
}

impl Timeouts {
    pub fn from_config(performance: &PerformanceConfig) -> Self {
        let secs = |value: u64| (value > 0).then(|| Duration::from_secs(value));
        Self {
            header_read: secs(performance.read_timeout),
            keep_alive: secs(performance.keep_alive_timeout),
            write: secs(performance.write_timeout),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Head,
    Body { remaining: u64, chunked: bool },
    ChunkSize,
    Trailers,
    /// Reads report end of stream from here on
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wait {
    Idle,
    Head,
}

/// Validates each request head before the codec reads it.
///
/// Bytes are handed on only once the head they belong to has passed
/// [`head::inspect_head`]; body bytes follow by their framing. A rejected
/// head ends the stream for the codec, which then finishes any response in
/// flight, and leaves the rejection for the connection to answer. Reads
/// also carry the header read and keep-alive deadlines, and writes the
/// stall deadline.
pub struct GuardedStream<S> {
    inner: S,
    buf: Vec<u8>,
    /// Leading bytes of `buf` cleared for the codec
    ready: usize,
    phase: Phase,
    requests: u64,
    rejection: Option<Rejection>,
    timeouts: Timeouts,
    read_deadline: Option<(Wait, Pin<Box<Sleep>>)>,
    write_deadline: Option<Pin<Box<Sleep>>>,
}

impl<S> GuardedStream<S> {
    pub fn new(inner: S, timeouts: Timeouts) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(READ_CHUNK),
            ready: 0,
            phase: Phase::Head,
            requests: 0,
            rejection: None,
            timeouts,
            read_deadline: None,
            write_deadline: None,
        }
    }

    /// Request heads handed to the codec so far
    pub const fn requests(&self) -> u64 {
        self.requests
    }

    /// The head that closed the stream, if any
    pub fn take_rejection(&mut self) -> Option<Rejection> {
        self.rejection.take()
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Move buffered bytes forward through the framing state.
    /// Returns false when more input is needed.
    fn advance(&mut self) -> bool {
        match self.phase {
            Phase::Head => match head::inspect_head(&self.buf) {
                HeadStatus::Partial => false,
                HeadStatus::Complete { len, body } => {
                    self.ready = len;
                    self.requests += 1;
                    self.read_deadline = None;
                    self.phase = match body {
                        BodyFraming::None => Phase::Head,
                        BodyFraming::Length(remaining) => Phase::Body {
                            remaining,
                            chunked: false,
                        },
                        BodyFraming::Chunked => Phase::ChunkSize,
                    };
                    true
                }
                HeadStatus::Rejected(rejection) => {
                    self.rejection = Some(rejection);
                    self.close();
                    true
                }
            },
            Phase::Body { remaining, chunked } => {
                if self.buf.is_empty() {
                    return false;
                }
                let take = usize::try_from(remaining).map_or(self.buf.len(), |r| r.min(self.buf.len()));
                self.ready = take;
                let left = remaining - take as u64;
                self.phase = match (left, chunked) {
                    (0, true) => Phase::ChunkSize,
                    (0, false) => Phase::Head,
                    (remaining, chunked) => Phase::Body { remaining, chunked },
                };
                true
            }
            Phase::ChunkSize => self.advance_line(|guard, line| match head::chunk_size(line) {
                Some(0) => guard.phase = Phase::Trailers,
                // chunk data is followed by CRLF
                Some(size) => {
                    guard.phase = Phase::Body {
                        remaining: size.saturating_add(2),
                        chunked: true,
                    };
                }
                None => guard.close(),
            }),
            Phase::Trailers => self.advance_line(|guard, line| {
                if line.is_empty() || line == b"\r" {
                    guard.phase = Phase::Head;
                }
            }),
            Phase::Closed => false,
        }
    }

    /// Clear one buffered line for the codec and let `next` pick the phase
    fn advance_line(&mut self, next: impl FnOnce(&mut Self, &[u8])) -> bool {
        let Some(newline) = self.buf.iter().position(|&b| b == b'\n') else {
            if self.buf.len() >= head::MAX_LINE {
                self.close();
                return true;
            }
            return false;
        };
        let line = self.buf[..newline].to_vec();
        self.ready = newline + 1;
        next(self, &line);
        true
    }

    fn close(&mut self) {
        self.phase = Phase::Closed;
        self.read_deadline = None;
    }

    /// Which deadline applies while waiting for more input
    fn wait_kind(&self) -> Option<Wait> {
        match self.phase {
            Phase::Head if self.buf.is_empty() && self.requests > 0 => Some(Wait::Idle),
            Phase::Head => Some(Wait::Head),
            _ => None,
        }
    }

    /// Poll the read deadline for the current wait; true once it has passed
    fn read_expired(&mut self, cx: &mut Context<'_>) -> bool {
        let Some(kind) = self.wait_kind() else {
            self.read_deadline = None;
            return false;
        };
        let limit = match kind {
            Wait::Idle => self.timeouts.keep_alive,
            Wait::Head => self.timeouts.header_read,
        };
        let Some(limit) = limit else {
            self.read_deadline = None;
            return false;
        };

        if self.read_deadline.as_ref().map(|(k, _)| *k) != Some(kind) {
            self.read_deadline = Some((kind, Box::pin(sleep(limit))));
        }
        match self.read_deadline.as_mut() {
            Some((_, deadline)) => deadline.as_mut().poll(cx).is_ready(),
            None => false,
        }
    }

    /// Poll the write deadline after the socket reported no progress
    fn write_expired(&mut self, cx: &mut Context<'_>) -> bool {
        let Some(limit) = self.timeouts.write else {
            return false;
        };
        let deadline = self
            .write_deadline
            .get_or_insert_with(|| Box::pin(sleep(limit)));
        if deadline.as_mut().poll(cx).is_ready() {
            self.write_deadline = None;
            return true;
        }
        false
    }
}

fn write_timed_out() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "write stalled past write_timeout")
}

impl<S: AsyncRead + Unpin> AsyncRead for GuardedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if this.ready > 0 {
                let n = this.ready.min(out.remaining());
                out.put_slice(&this.buf[..n]);
                this.buf.drain(..n);
                this.ready -= n;
                return Poll::Ready(Ok(()));
            }
            if this.phase == Phase::Closed {
                return Poll::Ready(Ok(()));
            }
            if this.advance() {
                continue;
            }

            let mut chunk = [0u8; READ_CHUNK];
            let mut chunk_buf = ReadBuf::new(&mut chunk);
            match Pin::new(&mut this.inner).poll_read(cx, &mut chunk_buf) {
                Poll::Ready(Ok(())) => {
                    let filled = chunk_buf.filled();
                    if filled.is_empty() {
                        // A partial head is dropped rather than handed on
                        this.close();
                        return Poll::Ready(Ok(()));
                    }
                    this.buf.extend_from_slice(filled);
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => {
                    if this.read_expired(cx) {
                        this.close();
                        return Poll::Ready(Ok(()));
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for GuardedStream<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, data: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, data) {
            Poll::Ready(result) => {
                this.write_deadline = None;
                Poll::Ready(result)
            }
            Poll::Pending if this.write_expired(cx) => Poll::Ready(Err(write_timed_out())),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write_vectored(cx, bufs) {
            Poll::Ready(result) => {
                this.write_deadline = None;
                Poll::Ready(result)
            }
            Poll::Pending if this.write_expired(cx) => Poll::Ready(Err(write_timed_out())),
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_flush(cx) {
            Poll::Ready(result) => {
                this.write_deadline = None;
                Poll::Ready(result)
            }
            Poll::Pending if this.write_expired(cx) => Poll::Ready(Err(write_timed_out())),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
