//! Byte-stream transports a [`crate::device::Device`] can speak QMUX
//! framing over (spec §4.2). `Device::open` only ever sees a
//! `Box<dyn Transport>`, so it never needs to know whether the bytes are
//! coming from a `cdc-wdm` character device or, in proxy mode, a
//! Unix-domain socket — mirrors the Fuchsia `qmi` crate's own split
//! between `QmiTransport` and the channel it wraps
//! (`reference/ril-qmi-grounding/client.rs`), generalized off Zircon
//! channels onto `tokio::io::{AsyncRead, AsyncWrite}`.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use qmi_protocol::{FrameDecoder, Message, Result};

/// The network framing a paired data interface expects, reported by the
/// transport purely as an advisory passthrough (spec §4.2) — the codec
/// and device runtime never inspect it; it exists only so an external
/// collaborator configuring the sibling network interface knows which
/// framing to expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    RawIp,
    Ethernet,
}

/// A byte-oriented QMUX transport. Implementors only need to move bytes;
/// all frame boundary tracking lives in [`FramedTransport`] below so every
/// implementation gets the same partial-read tolerance (spec §4.2 edge
/// case: "a transport read may return a partial frame, multiple frames,
/// or exactly one frame").
#[async_trait]
pub trait Transport: Send {
    /// Reads and returns the next complete QMUX frame, blocking until one
    /// is available. Returns `Ok(None)` on a clean EOF.
    async fn read_frame(&mut self) -> Result<Option<Message>>;

    /// Writes one complete QMUX frame.
    async fn write_frame(&mut self, message: &Message) -> Result<()>;

    /// The `cdc-wdm`/character-device path or socket path this transport
    /// was opened against, for logging.
    fn interface_name(&self) -> &str;

    /// The data framing the paired network interface should expect
    /// (spec §4.2's advisory passthrough); does not affect codec
    /// behaviour.
    fn data_format(&self) -> DataFormat;

    /// Closes the underlying stream. Best-effort; errors are logged by
    /// the caller, not propagated, since a `Device` is tearing down
    /// regardless (spec §4.3 close sequence).
    async fn close(&mut self);
}

/// Shared read-side buffering: accumulates raw bytes from an
/// `AsyncRead` and drains whole frames out of them via [`FrameDecoder`],
/// mirroring libqmi's two-stage `qmimsg_read` (original
/// `src/qmimsg.c`: read the fixed header, then the `length`-driven body)
/// adapted to a non-blocking byte source that may hand back any amount
/// of data per call.
struct FramedTransport<S> {
    stream: S,
    decoder: FrameDecoder,
    read_buf: Box<[u8]>,
    path: String,
    data_format: DataFormat,
}

impl<S> FramedTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn new(stream: S, path: String, data_format: DataFormat) -> Self {
        FramedTransport { stream, decoder: FrameDecoder::new(), read_buf: vec![0u8; 4096].into_boxed_slice(), path, data_format }
    }

    async fn read_frame(&mut self) -> Result<Option<Message>> {
        loop {
            match self.decoder.next_message() {
                Ok(Some(message)) => return Ok(Some(message)),
                Ok(None) => {}
                Err(e) => {
                    log::debug!("{}: dropping malformed frame: {e}", self.path);
                    continue;
                }
            }
            let n = self.stream.read(&mut self.read_buf).await?;
            if n == 0 {
                return Ok(None);
            }
            self.decoder.push(&self.read_buf[..n]);
        }
    }

    async fn write_frame(&mut self, message: &Message) -> Result<()> {
        self.stream.write_all(message.to_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            log::debug!("{}: error shutting down transport: {e}", self.path);
        }
    }
}

/// A `cdc-wdm` character device (e.g. `/dev/cdc-wdm0`), the standard
/// Linux host-side QMI endpoint.
pub struct CdcWdmTransport {
    inner: FramedTransport<tokio::fs::File>,
}

impl CdcWdmTransport {
    /// Opens the device with the default `RawIp` data format; most
    /// modern modems default to raw IP framing over `cdc-wdm`. Chain
    /// [`CdcWdmTransport::with_data_format`] to report `Ethernet`
    /// instead when the modem was configured for 802.3 framing.
    pub async fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = tokio::fs::OpenOptions::new().read(true).write(true).open(path).await?;
        Ok(CdcWdmTransport { inner: FramedTransport::new(file, path.display().to_string(), DataFormat::RawIp) })
    }

    pub fn with_data_format(mut self, data_format: DataFormat) -> Self {
        self.inner.data_format = data_format;
        self
    }
}

#[async_trait]
impl Transport for CdcWdmTransport {
    async fn read_frame(&mut self) -> Result<Option<Message>> {
        self.inner.read_frame().await
    }

    async fn write_frame(&mut self, message: &Message) -> Result<()> {
        self.inner.write_frame(message).await
    }

    fn interface_name(&self) -> &str {
        &self.inner.path
    }

    fn data_format(&self) -> DataFormat {
        self.inner.data_format
    }

    async fn close(&mut self) {
        self.inner.close().await
    }
}

/// A Unix-domain stream socket, used between `qmi-proxy` and its
/// connected client processes (spec §4.5): the proxy speaks the same
/// QMUX framing over the socket that it speaks to the real device.
pub struct UnixSocketTransport {
    inner: FramedTransport<tokio::net::UnixStream>,
}

impl UnixSocketTransport {
    pub fn new(stream: tokio::net::UnixStream, label: String) -> Self {
        UnixSocketTransport { inner: FramedTransport::new(stream, label, DataFormat::RawIp) }
    }

    pub async fn connect(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let stream = tokio::net::UnixStream::connect(path).await?;
        Ok(UnixSocketTransport::new(stream, path.display().to_string()))
    }

    pub fn with_data_format(mut self, data_format: DataFormat) -> Self {
        self.inner.data_format = data_format;
        self
    }
}

#[async_trait]
impl Transport for UnixSocketTransport {
    async fn read_frame(&mut self) -> Result<Option<Message>> {
        self.inner.read_frame().await
    }

    async fn write_frame(&mut self, message: &Message) -> Result<()> {
        self.inner.write_frame(message).await
    }

    fn interface_name(&self) -> &str {
        &self.inner.path
    }

    fn data_format(&self) -> DataFormat {
        self.inner.data_format
    }

    async fn close(&mut self) {
        self.inner.close().await
    }
}

/// An in-memory transport over a [`tokio::io::DuplexStream`] half, used
/// in tests to exercise `Device`/`Client` without a real file descriptor
/// — generalized from `mesh-router`'s hand-rolled mock link
/// (`reference/mesh-router/tests/mocking/mod.rs`) onto `tokio::io::duplex`,
/// the idiomatic async equivalent.
#[cfg(any(test, feature = "test-support"))]
pub struct DuplexTransport {
    inner: FramedTransport<tokio::io::DuplexStream>,
}

#[cfg(any(test, feature = "test-support"))]
impl DuplexTransport {
    pub fn new(stream: tokio::io::DuplexStream) -> Self {
        DuplexTransport { inner: FramedTransport::new(stream, "duplex".to_string(), DataFormat::RawIp) }
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl Transport for DuplexTransport {
    async fn read_frame(&mut self) -> Result<Option<Message>> {
        self.inner.read_frame().await
    }

    async fn write_frame(&mut self, message: &Message) -> Result<()> {
        self.inner.write_frame(message).await
    }

    fn interface_name(&self) -> &str {
        &self.inner.path
    }

    fn data_format(&self) -> DataFormat {
        self.inner.data_format
    }

    async fn close(&mut self) {
        self.inner.close().await
    }
}
