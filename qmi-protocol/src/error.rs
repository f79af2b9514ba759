//! Error kinds shared by the codec, the device runtime, and the client
//! session layer. See `spec.md` §7 — this is a single flat error space,
//! mirroring libqmi's own single numeric error domain rather than splitting
//! codec errors from runtime errors.

/// The unified error type for the whole `qmi`/`qmi-protocol` workspace.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The frame marker or a declared header length is inconsistent.
    #[error("QMUX frame marker or header is malformed")]
    Framing,

    /// The buffer is shorter than the length a header declares.
    #[error("buffer is shorter than the length the header declares")]
    Truncated,

    /// A TLV read or write would exceed the bounds of its TLV or its
    /// enclosing message. Used for both read-side and write-side overflow;
    /// callers disambiguate by which operation was in progress.
    #[error("TLV read or write exceeds its declared bounds")]
    TlvOverflow,

    /// Appending this TLV would push the total message length above
    /// 0xFFFF bytes. The message is left byte-identical to its state
    /// before the call.
    #[error("appending this TLV would exceed the 65535 byte message limit")]
    TlvTooLong,

    /// No TLV of the requested type is present in this message.
    #[error("no TLV of type {0:#04x} is present in this message")]
    TlvNotFound(u8),

    /// The message parses as a well-formed response but is missing its
    /// mandatory result TLV (type 0x02). See `SPEC_FULL.md`'s Open
    /// Question decisions: kept distinct from `Framing` because it is a
    /// semantic violation only detectable once a message is known to be a
    /// response, not a structural one the codec can see on any message.
    #[error("response is missing its mandatory result TLV (type 0x02)")]
    MalformedResponse,

    /// The modem's result TLV reported failure; the payload is the
    /// numeric protocol error code.
    #[error("modem reported protocol error {0:#06x}")]
    ProtocolError(u16),

    /// The caller's deadline elapsed before a response arrived.
    #[error("request timed out before a response arrived")]
    Timeout,

    /// The caller's cancellation token fired before a response arrived.
    #[error("request was cancelled")]
    Cancelled,

    /// The transport reached EOF or a fatal I/O error; every outstanding
    /// and future call on the owning `Device` fails with this until the
    /// `Device` is reopened.
    #[error("transport disconnected")]
    Disconnected,

    /// A recoverable transport I/O error.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// API misuse, e.g. a CID of 0 where a live client was expected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, Error>;
