//! The single-threaded-per-connection device runtime (spec §4.3): owns
//! the transport, the transaction dispatch table, the per-(service, cid)
//! transaction-id allocator, and the indication subscription map. Every
//! mutation of that state happens inside one background task so none of
//! it needs a lock shared across tasks — the idiomatic `tokio` rendition
//! of the spec's "single logical owner" requirement, using an mpsc
//! command channel the way a single-writer actor is usually built in
//! this ecosystem (grounded in the request/response matching performed
//! by `ril-qmi`'s `QmiTransport::register_interest` +
//! `QmiResponse` future, `reference/ril-qmi-grounding/client.rs`, adapted
//! from a Zircon-channel wakeup list to an actor task).

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use qmi_protocol::registry::ctl;
use qmi_protocol::{Error, Message, Result, ServiceId};

use crate::transport::Transport;

bitflags::bitflags! {
    /// Options controlling what `Device::open` does before handing back a
    /// usable device, generalized from the CLI's open-time flag list
    /// (spec §6) into a typed bit set a library consumer can compose
    /// programmatically.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u8 {
        /// Probe CTL `GetVersionInfo` during open and populate the
        /// per-service version table `Client::check_version` reads.
        const VERSION_INFO = 0b0001;
        /// Issue a CTL `Sync` request during open to release any client
        /// IDs left allocated by a previous, uncleanly-terminated user of
        /// this device.
        const SYNC = 0b0010;
        /// This device's transport is already a proxy connection (a
        /// Unix-domain socket to `qmi-proxy`) rather than the real
        /// character device; kept for API symmetry with the CLI's own
        /// flag, since `Device::open` behaves identically either way —
        /// proxy substitution happens at transport construction, not here.
        const PROXY = 0b0100;
        /// Subscribe to unsolicited indications at open time. Also kept
        /// for API/CLI symmetry: indication dispatch is always available
        /// once a client calls `subscribe_indication`, so this flag is
        /// presently a no-op on `Device` itself.
        const EXPECT_INDICATIONS = 0b1000;
    }
}

/// Fixed default timeout for CTL exchanges that have no caller-supplied
/// timeout of their own — `Device::open`'s version probe and sync, and
/// `Client`'s own CID allocate/release calls (spec §5: "CTL exchanges
/// ... use a fixed 15-second default").
pub(crate) const CTL_TIMEOUT: Duration = Duration::from_secs(15);

type IndicationCallback = Arc<dyn Fn(&Message) + Send + Sync>;

struct DispatchKey {
    service: u8,
    cid: u8,
    txn: u16,
}

enum Command {
    AllocateTxn { service: u8, cid: u8, reply: oneshot::Sender<u16> },
    Register { key: (u8, u8, u16), reply: oneshot::Sender<Message> },
    CancelRegistration { key: (u8, u8, u16) },
    Write { message: Message, reply: oneshot::Sender<Result<()>> },
    Subscribe { service: u8, cid: u8, message_id: u16, callback: IndicationCallback },
    Unsubscribe { service: u8, cid: u8, message_id: u16 },
    Close,
}

/// A live connection to one QMI-speaking endpoint (a `cdc-wdm` character
/// device, or a proxy socket). Cheaply cloneable: every clone shares the
/// same background task and transport.
#[derive(Clone)]
pub struct Device {
    cmd_tx: mpsc::UnboundedSender<Command>,
    versions: Arc<RwLock<HashMap<ServiceId, (u16, u16)>>>,
    disconnected: Arc<AtomicBool>,
    interface_name: Arc<str>,
}

impl Device {
    /// Runs the open sequence (spec §4.3): spawn the reader task, then
    /// optionally probe `GetVersionInfo` and issue `Sync`, in that order.
    pub async fn open(mut transport: Box<dyn Transport>, flags: OpenFlags) -> Result<Device> {
        let interface_name: Arc<str> = Arc::from(transport.interface_name());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let versions = Arc::new(RwLock::new(HashMap::new()));
        let disconnected = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_task(transport, cmd_rx, disconnected.clone(), interface_name.clone()));

        let device = Device { cmd_tx, versions, disconnected, interface_name };

        if flags.contains(OpenFlags::VERSION_INFO) {
            device.probe_version_info().await?;
        }
        if flags.contains(OpenFlags::SYNC) {
            device.ctl_request(ctl::SYNC, &[]).await?;
        }

        Ok(device)
    }

    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    fn fail_if_disconnected(&self) -> Result<()> {
        if self.is_disconnected() {
            Err(Error::Disconnected)
        } else {
            Ok(())
        }
    }

    /// Sends a request and awaits its matching response, honouring both a
    /// deadline and cooperative cancellation (spec §4.3's request API).
    /// On timeout or cancellation the dispatch entry is removed so a
    /// late-arriving response is logged and dropped rather than matched
    /// to a caller who has stopped waiting (spec §4.3 ordering
    /// guarantees, §7 user-visible behaviour).
    pub async fn send_request(
        &self,
        mut message: Message,
        timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> Result<Message> {
        self.fail_if_disconnected()?;
        let service = message.service();
        let cid = message.client();

        let (txn_tx, txn_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::AllocateTxn { service, cid, reply: txn_tx })
            .map_err(|_| Error::Disconnected)?;
        let txn = txn_rx.await.map_err(|_| Error::Disconnected)?;
        message.set_transaction_id(txn)?;

        let key = (service, cid, txn);
        let (resp_tx, resp_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Register { key, reply: resp_tx })
            .map_err(|_| Error::Disconnected)?;

        let (write_tx, write_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Write { message, reply: write_tx })
            .map_err(|_| Error::Disconnected)?;
        if let Ok(Err(e)) = write_rx.await {
            let _ = self.cmd_tx.send(Command::CancelRegistration { key });
            return Err(e);
        }

        let sleep = async {
            match timeout {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            result = resp_rx => {
                result.map_err(|_| Error::Disconnected)
            }
            _ = sleep => {
                let _ = self.cmd_tx.send(Command::CancelRegistration { key });
                Err(Error::Timeout)
            }
            _ = cancel.cancelled() => {
                let _ = self.cmd_tx.send(Command::CancelRegistration { key });
                Err(Error::Cancelled)
            }
        }
    }

    /// Adds a callback to the ordered set invoked for unsolicited
    /// indications of `message_id` addressed to `(service, cid)`. Fan-out
    /// order matches subscription registration order; subscribing the
    /// same key more than once is allowed and invokes every callback
    /// (spec §5).
    pub fn subscribe_indication(&self, service: u8, cid: u8, message_id: u16, callback: IndicationCallback) -> Result<()> {
        self.fail_if_disconnected()?;
        self.cmd_tx
            .send(Command::Subscribe { service, cid, message_id, callback })
            .map_err(|_| Error::Disconnected)
    }

    pub fn unsubscribe_indication(&self, service: u8, cid: u8, message_id: u16) -> Result<()> {
        self.fail_if_disconnected()?;
        self.cmd_tx
            .send(Command::Unsubscribe { service, cid, message_id })
            .map_err(|_| Error::Disconnected)
    }

    /// Runs the close sequence: stop the reader task and fail every
    /// in-flight request with `Error::Disconnected`.
    pub async fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close);
    }

    pub fn version_of(&self, service: ServiceId) -> Option<(u16, u16)> {
        self.versions.read().get(&service).copied()
    }

    async fn ctl_request(&self, message_id: u16, tlvs: &[(u8, &[u8])]) -> Result<Message> {
        let mut request = Message::new_request(ServiceId::Ctl.to_u8(), 0, 0, 0, 0, message_id)?;
        for (type_, value) in tlvs {
            request.write_bytes(*type_, value)?;
        }
        let response = self
            .send_request(request, Some(CTL_TIMEOUT), CancellationToken::new())
            .await?;
        response.parse_result()?;
        Ok(response)
    }

    /// CTL `GetSupportedServices` followed by a version query per
    /// service, populating `versions` (spec §4.3's open-time probe).
    /// libqmi's own `qmi_device_open` does the analogous thing against
    /// `QMI_CTL_GET_VERSION_INFO` in one shot; this workspace keeps the
    /// single combined request since that is what the real CTL service
    /// exposes (`original_source` `qmi-ctl.c`).
    async fn probe_version_info(&self) -> Result<()> {
        let response = self.ctl_request(ctl::GET_VERSION_INFO, &[]).await?;
        let mut versions = self.versions.write();
        // The version list TLV (type 0x01) is a repeated
        // (service: u8, major: u16, minor: u16) record; tolerate it being
        // absent rather than failing open, since some modems omit it.
        if let Ok(mut reader) = response.tlv_reader(ctl::TLV_ALLOCATION_INFO) {
            if let Ok(count) = reader.read_u8() {
                for _ in 0..count {
                    let Ok(service) = reader.read_u8() else { break };
                    let Ok(major) = reader.read_u16(qmi_protocol::Endian::Little) else { break };
                    let Ok(minor) = reader.read_u16(qmi_protocol::Endian::Little) else { break };
                    versions.insert(ServiceId::from_u8(service), (major, minor));
                }
            }
        }
        Ok(())
    }
}

async fn run_task(
    mut transport: Box<dyn Transport>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    disconnected: Arc<AtomicBool>,
    interface_name: Arc<str>,
) {
    let mut txn_counters: HashMap<(u8, u8), u16> = HashMap::new();
    let mut dispatch: HashMap<(u8, u8, u16), oneshot::Sender<Message>> = HashMap::new();
    let mut subscriptions: HashMap<(u8, u8, u16), Vec<IndicationCallback>> = HashMap::new();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::AllocateTxn { service, cid, reply }) => {
                        let is_ctl = service == ServiceId::Ctl.to_u8();
                        let counter = txn_counters.entry((service, cid)).or_insert(0);
                        *counter = counter.wrapping_add(1);
                        if *counter == 0 || (is_ctl && *counter > u8::MAX as u16) {
                            *counter = 1;
                        }
                        let _ = reply.send(*counter);
                    }
                    Some(Command::Register { key, reply }) => {
                        dispatch.insert(key, reply);
                    }
                    Some(Command::CancelRegistration { key }) => {
                        dispatch.remove(&key);
                    }
                    Some(Command::Write { message, reply }) => {
                        let result = transport.write_frame(&message).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Subscribe { service, cid, message_id, callback }) => {
                        subscriptions.entry((service, cid, message_id)).or_default().push(callback);
                    }
                    Some(Command::Unsubscribe { service, cid, message_id }) => {
                        subscriptions.remove(&(service, cid, message_id));
                    }
                    Some(Command::Close) | None => break,
                }
            }
            frame = transport.read_frame() => {
                match frame {
                    Ok(Some(message)) => handle_inbound(message, &mut dispatch, &subscriptions, &interface_name),
                    Ok(None) => {
                        log::warn!("{interface_name}: transport reached EOF");
                        break;
                    }
                    Err(e) => {
                        log::warn!("{interface_name}: transport error: {e}");
                        break;
                    }
                }
            }
        }
    }

    disconnected.store(true, Ordering::Release);
    transport.close().await;
    for (_, reply) in dispatch.drain() {
        drop(reply); // a dropped oneshot::Sender fails the receiver with RecvError -> Error::Disconnected
    }
}

fn handle_inbound(
    message: Message,
    dispatch: &mut HashMap<(u8, u8, u16), oneshot::Sender<Message>>,
    subscriptions: &HashMap<(u8, u8, u16), Vec<IndicationCallback>>,
    interface_name: &str,
) {
    let key = DispatchKey { service: message.service(), cid: message.client(), txn: message.transaction_id() };
    if message.is_indication() {
        match subscriptions.get(&(key.service, key.cid, message.message_id())) {
            Some(callbacks) if !callbacks.is_empty() => {
                // Fan out in registration order (spec §5); a panicking
                // subscriber (spec §7: "logged and swallowed") must not
                // stop later subscribers or take down the reader loop.
                for callback in callbacks {
                    if std::panic::catch_unwind(AssertUnwindSafe(|| callback(&message))).is_err() {
                        log::warn!("{interface_name}: indication callback panicked, swallowing");
                    }
                }
            }
            _ => {
                log::debug!(
                    "{interface_name}: dropping indication for service {:#04x} cid {} with no subscriber",
                    key.service, key.cid
                );
            }
        }
        return;
    }
    if !message.is_response() {
        log::debug!("{interface_name}: dropping non-response, non-indication frame");
        return;
    }
    match dispatch.remove(&(key.service, key.cid, key.txn)) {
        Some(reply) => {
            let _ = reply.send(message);
        }
        None => {
            log::debug!(
                "{interface_name}: dropping orphan response for service {:#04x} cid {} txn {}",
                key.service, key.cid, key.txn
            );
        }
    }
}
