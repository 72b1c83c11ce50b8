use std::{io, sync::Arc};

use async_mutex::Mutex;
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
};

use crate::{
    buffers::{Appendable, BufError},
    codec::{Formatter, FrameDecoder},
};

/// Error returned when emitting a frame fails.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The subscriber has been disconnected.
    #[error("the connection has been closed")]
    Closed,

    /// The transport rejected the write.
    #[error("transport write failed")]
    Io(#[from] io::Error),

    /// The frame could not be rendered into the scratch buffer.
    #[error(transparent)]
    Buffer(#[from] BufError),
}

/// The write half of a connection: the transport writer plus the formatter
/// scratch, both behind one async mutex.
///
/// Holding the scratch inside the lock makes each frame atomic with respect
/// to concurrent writers: the frame is rendered and flushed in full before
/// the next writer gets the lock. `write_all` loops over partial writes, so
/// a frame is never interleaved or truncated on the wire.
pub(crate) struct WriteHalf<W> {
    inner: Arc<Mutex<WriteInner<W>>>,
}

struct WriteInner<W> {
    io: W,
    scratch: Appendable,
}

impl<W> Clone for WriteHalf<W> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<W> std::fmt::Debug for WriteHalf<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteHalf").finish_non_exhaustive()
    }
}

impl<W> WriteHalf<W>
where
    W: AsyncWrite + Unpin,
{
    fn new(io: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(WriteInner {
                io,
                scratch: Appendable::new(),
            })),
        }
    }

    /// Renders one frame with `build` and writes it out in full.
    pub(crate) async fn write_frame<F>(&self, build: F) -> Result<(), WriteError>
    where
        F: FnOnce(Formatter, &mut Appendable) -> Result<(), BufError>,
    {
        let mut guard = self.inner.lock().await;
        let WriteInner { io, scratch } = &mut *guard;
        scratch.clear();
        build(Formatter::new(), scratch)?;
        if let Some(frame) = scratch.body() {
            io.write_all(frame).await?;
            io.flush().await?;
        }
        Ok(())
    }

    /// Shuts the transport down. Errors are ignored; the peer may already
    /// be gone.
    pub(crate) async fn close(&self) {
        let mut guard = self.inner.lock().await;
        let _ = guard.io.shutdown().await;
    }
}

/// A framed, bidirectional protocol connection.
///
/// Owns the transport: the read half wrapped in a [`FrameDecoder`] (driven
/// exclusively by the subscriber's reader task) and the shared
/// [`WriteHalf`] (driven by any consumer thread, serialized internally).
pub(crate) struct Connection<R, W> {
    pub(crate) decoder: FrameDecoder<R>,
    pub(crate) writer: WriteHalf<W>,
}

impl Connection<OwnedReadHalf, OwnedWriteHalf> {
    /// Dials `host:port` over TCP.
    pub(crate) async fn dial(host: &str, port: u16) -> io::Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        let (read, write) = stream.into_split();
        Ok(Self::over(read, write))
    }
}

impl<R, W> Connection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Wraps an already-established byte stream.
    ///
    /// This is the seam tests use to run the full protocol over in-memory
    /// transports.
    pub(crate) fn over(read: R, write: W) -> Self {
        Self {
            decoder: FrameDecoder::new(read),
            writer: WriteHalf::new(write),
        }
    }
}
