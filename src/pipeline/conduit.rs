//! Bounded in-memory conduit between a byte producer and a byte consumer
//!
//! The write end implements [`AsyncWrite`] and the read end [`AsyncRead`], so
//! connectors and providers can use ordinary tokio I/O on either side. Data
//! travels as frames over a bounded [`mpsc`] channel; a full channel suspends
//! the writer and an empty one suspends the reader.
//!
//! Only [`ConduitWriter::finish`] produces a clean end-of-stream. A writer that
//! is aborted or dropped makes the reader fail, so a consumer never mistakes a
//! truncated stream for a complete one.

use bytes::{Bytes, BytesMut};
use flate2::write::{GzDecoder, GzEncoder};
use flate2::Compression;
use std::future::poll_fn;
use std::io::{self, Write};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio_util::sync::PollSender;

/// Unit of transfer between the two ends
#[derive(Debug)]
pub enum Frame {
    Chunk(Bytes),
    End,
    Failed(String),
}

/// Sizing and encoding of one conduit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConduitOptions {
    /// Number of chunks the channel holds before the writer is suspended
    pub depth: usize,
    /// Bytes staged before a chunk is sent
    pub chunk_size: usize,
    /// Gzip on the write end
    pub encode_gzip: bool,
    /// Gunzip on the read end
    pub decode_gzip: bool,
    /// Abort once more encoded bytes than this have been written
    pub max_bytes: Option<u64>,
}

impl Default for ConduitOptions {
    fn default() -> Self {
        Self {
            depth: 8,
            chunk_size: 64 * 1024,
            encode_gzip: false,
            decode_gzip: false,
            max_bytes: None,
        }
    }
}

/// Byte counts reported by a finished writer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Bytes handed to the writer
    pub bytes_written: u64,
    /// Bytes sent through the channel (after encoding)
    pub bytes_sent: u64,
}

/// Create a connected writer/reader pair
pub fn conduit(options: &ConduitOptions) -> (ConduitWriter, ConduitReader) {
    let (tx, rx) = mpsc::channel(options.depth.max(1));
    let chunk_size = options.chunk_size.max(1);

    let writer = ConduitWriter {
        sender: PollSender::new(tx),
        staging: BytesMut::with_capacity(chunk_size),
        pending: None,
        chunk_size,
        encoder: options
            .encode_gzip
            .then(|| GzEncoder::new(Vec::new(), Compression::default())),
        max_bytes: options.max_bytes,
        bytes_written: 0,
        bytes_sent: 0,
        closed: false,
    };

    let reader = ConduitReader {
        receiver: rx,
        current: Bytes::new(),
        decoder: options.decode_gzip.then(|| GzDecoder::new(Vec::new())),
        state: ReadState::Open,
        bytes_received: 0,
    };

    (writer, reader)
}

/// Write end of a conduit
pub struct ConduitWriter {
    sender: PollSender<Frame>,
    staging: BytesMut,
    pending: Option<Bytes>,
    chunk_size: usize,
    encoder: Option<GzEncoder<Vec<u8>>>,
    max_bytes: Option<u64>,
    bytes_written: u64,
    bytes_sent: u64,
    closed: bool,
}

impl ConduitWriter {
    pub fn stats(&self) -> WriterStats {
        WriterStats {
            bytes_written: self.bytes_written,
            bytes_sent: self.bytes_sent,
        }
    }

    /// Flush everything still buffered and signal a clean end-of-stream
    pub async fn finish(&mut self) -> io::Result<WriterStats> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "conduit writer already closed",
            ));
        }

        if let Some(encoder) = self.encoder.take() {
            let tail = encoder.finish()?;
            self.stage(&tail)?;
        }

        poll_fn(|cx| self.poll_drain(cx, true)).await?;
        poll_fn(|cx| self.sender.poll_reserve(cx))
            .await
            .map_err(|_| reader_gone())?;
        self.sender.send_item(Frame::End).map_err(|_| reader_gone())?;
        self.closed = true;
        self.sender.close();

        Ok(self.stats())
    }

    /// Close the stream with a failure the reader will surface as an error.
    ///
    /// Delivery of the reason is best effort: when the channel is full the
    /// reader sees an unexpected end-of-stream instead.
    pub fn abort(&mut self, reason: &str) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.sender.abort_send();
        if let Some(tx) = self.sender.get_ref() {
            let _ = tx.try_send(Frame::Failed(reason.to_string()));
        }
        self.sender.close();
    }

    /// Append encoded bytes to the staging buffer, promoting full chunks
    fn stage(&mut self, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.staging.extend_from_slice(data);

        if let Some(limit) = self.max_bytes {
            let total = self.bytes_sent
                + self.pending.as_ref().map_or(0, |p| p.len() as u64)
                + self.staging.len() as u64;
            if total > limit {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("backup exceeds maximum size of {} bytes", limit),
                ));
            }
        }
        Ok(())
    }

    /// Send staged data. With `all` unset only complete chunks are sent.
    fn poll_drain(&mut self, cx: &mut Context<'_>, all: bool) -> Poll<io::Result<()>> {
        loop {
            if self.pending.is_none() {
                let ready = self.staging.len() >= self.chunk_size
                    || (all && !self.staging.is_empty());
                if !ready {
                    return Poll::Ready(Ok(()));
                }
                let take = self.staging.len().min(self.chunk_size);
                self.pending = Some(self.staging.split_to(take).freeze());
            }

            match self.sender.poll_reserve(cx) {
                Poll::Ready(Ok(())) => {
                    if let Some(chunk) = self.pending.take() {
                        let len = chunk.len() as u64;
                        self.sender
                            .send_item(Frame::Chunk(chunk))
                            .map_err(|_| reader_gone())?;
                        self.bytes_sent += len;
                    }
                }
                Poll::Ready(Err(_)) => return Poll::Ready(Err(reader_gone())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl AsyncWrite for ConduitWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "conduit writer already closed",
            )));
        }

        // Backpressure: accept nothing while a full chunk is waiting
        if let Poll::Pending = this.poll_drain(cx, false)? {
            return Poll::Pending;
        }

        let accept = buf.len().min(this.chunk_size);
        let data = &buf[..accept];
        match this.encoder.as_mut() {
            Some(encoder) => {
                encoder.write_all(data)?;
                let encoded = std::mem::take(encoder.get_mut());
                this.stage(&encoded)?;
            }
            None => this.stage(data)?,
        }
        this.bytes_written += accept as u64;

        // Start sending right away; a pending send is picked up by the next call
        if let Poll::Ready(Err(e)) = this.poll_drain(cx, false) {
            return Poll::Ready(Err(e));
        }
        Poll::Ready(Ok(accept))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Ok(()));
        }
        this.poll_drain(cx, true)
    }

    /// Shutdown only flushes; end-of-stream is signalled by `finish`
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.poll_flush(cx)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReadState {
    Open,
    Done,
    Failed(String),
}

/// Read end of a conduit
pub struct ConduitReader {
    receiver: mpsc::Receiver<Frame>,
    current: Bytes,
    decoder: Option<GzDecoder<Vec<u8>>>,
    state: ReadState,
    bytes_received: u64,
}

impl ConduitReader {
    /// Encoded bytes received from the channel so far
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    fn fail(&mut self, message: String) -> io::Error {
        self.state = ReadState::Failed(message.clone());
        io::Error::new(io::ErrorKind::Other, message)
    }
}

impl AsyncRead for ConduitReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if !this.current.is_empty() {
                let n = buf.remaining().min(this.current.len());
                buf.put_slice(&this.current.split_to(n));
                return Poll::Ready(Ok(()));
            }

            match &this.state {
                ReadState::Done => return Poll::Ready(Ok(())),
                ReadState::Failed(message) => {
                    return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, message.clone())))
                }
                ReadState::Open => {}
            }

            match this.receiver.poll_recv(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Frame::Chunk(chunk))) => {
                    this.bytes_received += chunk.len() as u64;
                    match this.decoder.as_mut() {
                        Some(decoder) => {
                            if let Err(e) = decoder.write_all(&chunk) {
                                return Poll::Ready(Err(this.fail(format!("gzip decode failed: {}", e))));
                            }
                            this.current = Bytes::from(std::mem::take(decoder.get_mut()));
                        }
                        None => this.current = chunk,
                    }
                }
                Poll::Ready(Some(Frame::End)) => {
                    if let Some(decoder) = this.decoder.take() {
                        match decoder.finish() {
                            Ok(tail) => this.current = Bytes::from(tail),
                            Err(e) => {
                                return Poll::Ready(Err(this.fail(format!("gzip decode failed: {}", e))))
                            }
                        }
                    }
                    this.state = ReadState::Done;
                }
                Poll::Ready(Some(Frame::Failed(reason))) => {
                    return Poll::Ready(Err(this.fail(format!("producer failed: {}", reason))));
                }
                Poll::Ready(None) => {
                    this.state = ReadState::Failed("conduit closed before end of stream".to_string());
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "conduit closed before end of stream",
                    )));
                }
            }
        }
    }
}

fn reader_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "conduit reader dropped")
}
