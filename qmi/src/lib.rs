//! Transport, device runtime, and client session for speaking QMI to a
//! modem (spec components C2–C4). Built on [`qmi_protocol`] for the wire
//! codec; this crate only adds the async machinery that turns a byte
//! stream into request/response and indication semantics.

pub mod client;
pub mod device;
pub mod proxy;
pub mod transport;

pub use client::{Client, ReleaseOnDrop};
pub use device::{Device, OpenFlags};
pub use qmi_protocol::{Error, Result};
pub use transport::{CdcWdmTransport, DataFormat, Transport, UnixSocketTransport};

#[cfg(any(test, feature = "test-support"))]
pub use transport::DuplexTransport;
