//! Size probing for streamed uploads
//!
//! A streamed upload does not know its length up front. `SizeProbe` answers
//! "is there more than N bytes?" by pulling up to N + 1 bytes into memory,
//! then replays those bytes ahead of the rest of the source so the caller
//! still sees the stream exactly once, in order.

use async_trait::async_trait;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

/// A reader that can report whether it holds more than `n` bytes
#[async_trait]
pub trait SizeProbe: AsyncRead + Unpin + Send {
    /// Buffer up to `n + 1` bytes and report whether more than `n` exist.
    ///
    /// Must be called at most once, before the first read.
    async fn has_more_than(&mut self, n: u64) -> io::Result<bool>;
}

/// Peekable stream: `{peeked, consumed, source}`.
///
/// Reads drain `peeked[consumed..]` first, then fall through to `source`.
pub struct PeekableStream<R> {
    peeked: Vec<u8>,
    consumed: usize,
    source: R,
    probed: bool,
    read_started: bool,
}

impl<R> PeekableStream<R> {
    pub fn new(source: R) -> Self {
        Self {
            peeked: Vec::new(),
            consumed: 0,
            source,
            probed: false,
            read_started: false,
        }
    }

    /// Bytes pulled by the probe and not yet read
    pub fn buffered(&self) -> &[u8] {
        &self.peeked[self.consumed..]
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> SizeProbe for PeekableStream<R> {
    async fn has_more_than(&mut self, n: u64) -> io::Result<bool> {
        if self.probed || self.read_started {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "size probe must run once, before any read",
            ));
        }
        self.probed = true;

        let mut limited = (&mut self.source).take(n.saturating_add(1));
        limited.read_to_end(&mut self.peeked).await?;
        Ok(self.peeked.len() as u64 > n)
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for PeekableStream<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        this.read_started = true;

        if this.consumed < this.peeked.len() {
            let remaining = &this.peeked[this.consumed..];
            let n = remaining.len().min(buf.remaining());
            buf.put_slice(&remaining[..n]);
            this.consumed += n;
            if this.consumed == this.peeked.len() {
                // Release the probe buffer once it is fully replayed
                this.peeked = Vec::new();
                this.consumed = 0;
            }
            return Poll::Ready(Ok(()));
        }

        Pin::new(&mut this.source).poll_read(cx, buf)
    }
}
