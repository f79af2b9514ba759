//! Broker binary multiplexing one real QMI device across many connected
//! client processes over a single well-known Unix-domain socket (spec
//! §4.5). Grounded in the general shape of a standalone PTY/IO broker
//! process in this corpus (a small `clap` front end plus one task per
//! connection, `anyhow` at the `main` boundary) and, for the actual
//! routing logic, `qmi::proxy::ProxyRouter`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Mutex};

use qmi::transport::{CdcWdmTransport, Transport};
use qmi_protocol::registry::ctl;
use qmi_protocol::{FrameDecoder, Message, ServiceId};
use qmi::proxy::{ConnId, PendingAction, ProxyRouter, ServiceCid};

#[derive(Parser, Debug)]
#[command(about = "Multiplex one QMI character device across several client processes")]
struct Args {
    /// Path to the `cdc-wdm` character device to multiplex.
    #[arg(long)]
    device: std::path::PathBuf,

    /// Path of the Unix-domain socket clients connect to.
    #[arg(long)]
    socket: std::path::PathBuf,
}

/// A request awaiting forwarding to the shared device, paired with the
/// connection it came from.
struct Outbound {
    conn: ConnId,
    message: Message,
}

/// Everything that can happen to the shared device task: a request to
/// forward, or a connection going away (which needs its still-owned
/// CIDs released on the real device, spec §4.5).
enum DeviceCommand {
    Forward(Outbound),
    Disconnected(ConnId),
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let transport = CdcWdmTransport::open(&args.device)
        .await
        .with_context(|| format!("opening QMI device at {}", args.device.display()))?;

    if args.socket.exists() {
        std::fs::remove_file(&args.socket)
            .with_context(|| format!("removing stale socket at {}", args.socket.display()))?;
    }
    let listener = UnixListener::bind(&args.socket)
        .with_context(|| format!("binding proxy socket at {}", args.socket.display()))?;
    log::info!("qmi-proxy listening on {} for {}", args.socket.display(), args.device.display());

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<DeviceCommand>();
    let conn_senders: Arc<Mutex<HashMap<ConnId, mpsc::UnboundedSender<Message>>>> = Arc::new(Mutex::new(HashMap::new()));
    let next_conn_id = Arc::new(AtomicU64::new(1));

    tokio::spawn(run_device_task(Box::new(transport), cmd_rx, conn_senders.clone()));

    loop {
        let (stream, _addr) = listener.accept().await.context("accepting proxy connection")?;
        let conn = ConnId(next_conn_id.fetch_add(1, Ordering::Relaxed));
        let (to_conn_tx, to_conn_rx) = mpsc::unbounded_channel();
        conn_senders.lock().await.insert(conn, to_conn_tx);
        let cmd_tx = cmd_tx.clone();
        let conn_senders = conn_senders.clone();
        tokio::spawn(async move {
            handle_connection(conn, stream, cmd_tx.clone(), to_conn_rx).await;
            conn_senders.lock().await.remove(&conn);
            let _ = cmd_tx.send(DeviceCommand::Disconnected(conn));
            log::debug!("{conn:?} disconnected");
        });
    }
}

/// Reads requests from one connected client, forwards them to the
/// shared device task, and writes back whatever the device task routes
/// to this connection — both directions run until the socket closes.
async fn handle_connection(
    conn: ConnId,
    stream: UnixStream,
    cmd_tx: mpsc::UnboundedSender<DeviceCommand>,
    mut to_conn_rx: mpsc::UnboundedReceiver<Message>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let reader = async move {
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = match read_half.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            decoder.push(&buf[..n]);
            loop {
                match decoder.next_message() {
                    Ok(Some(message)) => {
                        if cmd_tx.send(DeviceCommand::Forward(Outbound { conn, message })).is_err() {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log::debug!("{conn:?}: dropping malformed frame: {e}");
                    }
                }
            }
        }
    };
    let writer = async move {
        while let Some(message) = to_conn_rx.recv().await {
            if write_half.write_all(message.to_bytes()).await.is_err() {
                return;
            }
            let _ = write_half.flush().await;
        }
    };
    tokio::join!(reader, writer);
}

/// Owns the single transport to the real device: forwards requests from
/// any connection, rewriting transaction ids to stay disjoint, and
/// routes every inbound response/indication back to whichever
/// connection is waiting on it.
async fn run_device_task(
    mut transport: Box<dyn Transport>,
    mut cmd_rx: mpsc::UnboundedReceiver<DeviceCommand>,
    conn_senders: Arc<Mutex<HashMap<ConnId, mpsc::UnboundedSender<Message>>>>,
) {
    let mut router = ProxyRouter::new();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    DeviceCommand::Forward(Outbound { conn, mut message }) => {
                        router.register_connection(conn);

                        let service = message.service();
                        let original_txn = message.transaction_id();
                        let action = pending_action_for(&message);
                        let modem_txn = router.rewrite_outbound(conn, service, original_txn, action);
                        if let Err(e) = message.set_transaction_id(modem_txn) {
                            log::warn!("{conn:?}: failed to rewrite transaction id: {e}");
                            continue;
                        }
                        if let Err(e) = transport.write_frame(&message).await {
                            log::warn!("write to device failed: {e}");
                            break;
                        }
                    }
                    DeviceCommand::Disconnected(conn) => {
                        for ServiceCid { service, cid } in router.remove_connection(conn) {
                            if let Err(e) = release_cid_on_device(&mut *transport, service, cid).await {
                                log::warn!("failed to release {conn:?}'s cid {cid} on service {service:#04x}: {e}");
                            }
                        }
                    }
                }
            }
            frame = transport.read_frame() => {
                match frame {
                    Ok(Some(message)) => route_inbound(message, &mut router, &conn_senders).await,
                    Ok(None) => {
                        log::warn!("device transport reached EOF, shutting down proxy");
                        break;
                    }
                    Err(e) => log::warn!("device transport error: {e}"),
                }
            }
        }
    }
}

/// Fire-and-forget `ReleaseClientId` for a disconnected connection's
/// still-owned CID. There is no connection left to route a response to,
/// so the reply (if any) is simply left to fall through `route_inbound`'s
/// "orphan response" debug log.
async fn release_cid_on_device(transport: &mut dyn Transport, service: u8, cid: u8) -> qmi_protocol::Result<()> {
    let mut request = Message::new_request(ServiceId::Ctl.to_u8(), 0, 0, 0, 0, ctl::RELEASE_CLIENT_ID)?;
    request.begin_tlv(ctl::TLV_ALLOCATION_INFO).write_u8(service).write_u8(cid).commit()?;
    transport.write_frame(&request).await
}

fn pending_action_for(message: &Message) -> PendingAction {
    if message.service() != ServiceId::Ctl.to_u8() {
        return PendingAction::None;
    }
    match message.message_id() {
        ctl::GET_CLIENT_ID => {
            let requested_service = message.tlv_find(ctl::TLV_ALLOCATION_INFO).and_then(|v| v.first()).copied().unwrap_or(0);
            PendingAction::RecordCid { service: requested_service }
        }
        ctl::RELEASE_CLIENT_ID => match message.tlv_find(ctl::TLV_ALLOCATION_INFO) {
            Some(v) if v.len() >= 2 => PendingAction::ReleaseCid { service: v[0], cid: v[1] },
            _ => PendingAction::None,
        },
        _ => PendingAction::None,
    }
}

async fn route_inbound(
    message: Message,
    router: &mut ProxyRouter,
    conn_senders: &Arc<Mutex<HashMap<ConnId, mpsc::UnboundedSender<Message>>>>,
) {
    if message.is_indication() {
        let Some(conn) = router.owner_of(message.service(), message.client()) else {
            log::debug!("dropping indication for service {:#04x} cid {} with no owning connection", message.service(), message.client());
            return;
        };
        send_to(conn, message, conn_senders).await;
        return;
    }
    if !message.is_response() {
        return;
    }

    let Some((conn, original_txn, action)) = router.resolve_inbound(message.service(), message.transaction_id()) else {
        log::debug!("dropping orphan response for service {:#04x} txn {}", message.service(), message.transaction_id());
        return;
    };

    if message.parse_result().is_ok() {
        match action {
            PendingAction::RecordCid { service } => {
                if let Ok(mut reader) = message.tlv_reader(ctl::TLV_ALLOCATION_INFO) {
                    if let (Ok(granted_service), Ok(cid)) = (reader.read_u8(), reader.read_u8()) {
                        router.record_cid(conn, granted_service, cid);
                        debug_assert_eq!(granted_service, service);
                    }
                }
            }
            PendingAction::ReleaseCid { service, cid } => router.release_cid(conn, service, cid),
            PendingAction::None => {}
        }
    }

    let mut rewritten = message;
    if rewritten.set_transaction_id(original_txn).is_ok() {
        send_to(conn, rewritten, conn_senders).await;
    }
}

async fn send_to(conn: ConnId, message: Message, conn_senders: &Arc<Mutex<HashMap<ConnId, mpsc::UnboundedSender<Message>>>>) {
    let senders = conn_senders.lock().await;
    if let Some(sender) = senders.get(&conn) {
        let _ = sender.send(message);
    }
}
