//! A client session bound to one allocated client ID (cid) on one
//! service (spec §4.4). Mirrors the shape of `ril-qmi`'s `QmiClient`
//! (`reference/ril-qmi-grounding/client.rs`: a handle wrapping a shared
//! transport plus its own allocated CID), generalized off a single
//! implicit CTL-backed client map onto one `Client` value per allocated
//! CID, since this workspace's `Device` is meant to serve many
//! independently-owned clients rather than one.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use qmi_protocol::registry::ctl;
use qmi_protocol::{Error, Message, Result, ServiceId};

use crate::device::{Device, CTL_TIMEOUT};

/// Whether a client's CID is released automatically when the `Client`
/// value is dropped (spec §4.4 drop semantics).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOnDrop {
    ReleaseCid,
    NoReleaseCid,
}

/// A single allocated (service, cid) pair on a [`Device`]. Not `Clone`:
/// the spec models one owner per CID, matching the "weak back-reference
/// to Device" framing in spec §4.4 — share a `Device` (which is cheaply
/// cloneable) rather than a `Client` if multiple owners genuinely need
/// the same CID.
pub struct Client {
    device: Device,
    service: u8,
    cid: u8,
    release_on_drop: ReleaseOnDrop,
}

impl Client {
    /// Allocates a client ID on `service` (spec §4.4). If `cid_hint` is
    /// `0`, the runtime issues CTL `GetClientId` and adopts whatever CID
    /// the modem grants; otherwise `cid_hint` is adopted directly with
    /// no CTL round trip at all, for the `--client-cid=N` reuse path
    /// (spec §6) where a caller already owns a CID from a prior session.
    ///
    /// Cancelling a modem-contacting allocation after the request has
    /// been written to the transport but before the response arrives may
    /// leave the CID allocated on the modem with nothing tracking it
    /// host-side — this is the original protocol's own behaviour and is
    /// not worked around here (see `DESIGN.md` Open Question #2).
    pub async fn allocate(
        device: &Device,
        service: ServiceId,
        cid_hint: u8,
        release_on_drop: ReleaseOnDrop,
        timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> Result<Client> {
        if cid_hint != 0 {
            return Ok(Client { device: device.clone(), service: service.to_u8(), cid: cid_hint, release_on_drop });
        }

        let mut request = Message::new_request(ServiceId::Ctl.to_u8(), 0, 0, 0, 0, ctl::GET_CLIENT_ID)?;
        request.write_u8(ctl::TLV_ALLOCATION_INFO, service.to_u8())?;

        let response = device.send_request(request, timeout, cancel).await?;
        response.parse_result()?;

        let mut reader = response.tlv_reader(ctl::TLV_ALLOCATION_INFO)?;
        let granted_service = reader.read_u8()?;
        let cid = reader.read_u8()?;
        if granted_service != service.to_u8() {
            return Err(Error::InvalidArgument(format!(
                "modem granted a client id for service {granted_service:#04x}, expected {:#04x}",
                service.to_u8()
            )));
        }

        Ok(Client { device: device.clone(), service: service.to_u8(), cid, release_on_drop })
    }

    pub fn service(&self) -> u8 {
        self.service
    }

    pub fn cid(&self) -> u8 {
        self.cid
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Allocates a request message already addressed to this client's
    /// (service, cid); callers append their own TLVs before calling
    /// [`Client::send_request`].
    pub fn new_request(&self, message_id: u16) -> Result<Message> {
        Message::new_request(self.service, self.cid, 0, 0, 0, message_id)
    }

    pub async fn send_request(&self, request: Message, timeout: Option<Duration>, cancel: CancellationToken) -> Result<Message> {
        self.device.send_request(request, timeout, cancel).await
    }

    pub fn subscribe_indication(&self, message_id: u16, callback: Arc<dyn Fn(&Message) + Send + Sync>) -> Result<()> {
        self.device.subscribe_indication(self.service, self.cid, message_id, callback)
    }

    pub fn unsubscribe_indication(&self, message_id: u16) -> Result<()> {
        self.device.unsubscribe_indication(self.service, self.cid, message_id)
    }

    pub fn check_version(&self) -> Option<(u16, u16)> {
        self.device.version_of(ServiceId::from_u8(self.service))
    }

    /// Releases this CID via CTL `ReleaseClientId` ahead of drop. Useful
    /// when the caller wants to observe release failures, which `Drop`
    /// cannot surface.
    pub async fn release(mut self) -> Result<()> {
        self.release_impl().await?;
        self.release_on_drop = ReleaseOnDrop::NoReleaseCid;
        Ok(())
    }

    async fn release_impl(&self) -> Result<()> {
        let mut request = Message::new_request(ServiceId::Ctl.to_u8(), 0, 0, 0, 0, ctl::RELEASE_CLIENT_ID)?;
        request.begin_tlv(ctl::TLV_ALLOCATION_INFO).write_u8(self.service).write_u8(self.cid).commit()?;
        let response = self
            .device
            .send_request(request, Some(CTL_TIMEOUT), CancellationToken::new())
            .await?;
        response.parse_result()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if self.release_on_drop == ReleaseOnDrop::NoReleaseCid || self.device.is_disconnected() {
            return;
        }
        // Best-effort, fire-and-forget: a synchronous Drop cannot await
        // the release response. Spawn it so a dropped Client still
        // frees its CID on the modem instead of leaking it, matching
        // spec §4.4's default `ReleaseCid` behaviour.
        let device = self.device.clone();
        let service = self.service;
        let cid = self.cid;
        tokio::spawn(async move {
            let Ok(mut request) = Message::new_request(ServiceId::Ctl.to_u8(), 0, 0, 0, 0, ctl::RELEASE_CLIENT_ID) else { return };
            if request.begin_tlv(ctl::TLV_ALLOCATION_INFO).write_u8(service).write_u8(cid).commit().is_err() {
                return;
            }
            if let Err(e) = device.send_request(request, Some(CTL_TIMEOUT), CancellationToken::new()).await {
                log::debug!("failed to release client id {cid} on service {service:#04x} during drop: {e}");
            }
        });
    }
}
