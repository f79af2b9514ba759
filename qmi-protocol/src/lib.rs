//! QMUX/QMI wire codec and service/message registry.
//!
//! This crate is the hand-written runtime that a per-message code
//! generator emits calls into (spec §1, §9): it owns framing, TLV
//! read/write, and bounds checking, but does not know what any
//! particular message id or TLV type means beyond the CTL messages the
//! device runtime itself must speak.

pub mod error;
pub mod frame;
pub mod message;
pub mod registry;
pub mod tlv;

pub use error::{Error, Result};
pub use frame::FrameDecoder;
pub use message::Message;
pub use registry::ServiceId;
pub use tlv::{Endian, StringPrefix, TlvReader};

/// Implemented by generated per-message request types: encodes a
/// message's TLVs and reports which service and transaction-id width it
/// targets. Grounded in the Fuchsia `ril-qmi` / `qmi_protocol` split
/// (`reference/ril-qmi-grounding/client.rs`), generalized so the trait
/// lives beside the codec it is built on instead of beside a
/// Fuchsia-channel-specific client.
pub trait Encodable {
    type DecodeResult;

    fn svc_id(&self) -> u8;

    /// Appends this request's TLVs onto `message`, which the caller has
    /// already constructed with the correct header.
    fn encode(&self, message: &mut Message) -> Result<()>;
}

/// Implemented by generated per-message response/indication types:
/// decodes a message's TLVs into a typed result.
pub trait Decodable: Sized {
    fn decode(message: &Message) -> Result<Self>;
}
