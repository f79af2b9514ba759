//! Shared broker bookkeeping for `qmi-proxy` (spec §4.5): one real
//! `Device` is shared by many connected client processes, each of which
//! thinks it has exclusive access to the modem. This module owns the
//! two pieces of state the broker binary needs and the codec itself has
//! no opinion about: which CIDs belong to which connection (so they can
//! be released when that connection drops) and how to keep two
//! processes' transaction ids from colliding on the one modem-facing
//! connection.
//!
//! Grounded in the per-process routing table sketched in `spec.md` §4.5
//! and, for the general shape of "one shared resource, many logical
//! owners, rewrite ids to keep them disjoint", the CID/client map kept
//! by `ril-qmi`'s `ClientSvcMap` (`reference/ril-qmi-grounding/client.rs`).

use std::collections::{HashMap, HashSet};

/// Identifies one connected client process for the lifetime of its
/// socket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

/// A (service, cid) pair uniquely identifying one allocated client on
/// the shared modem-facing `Device`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceCid {
    pub service: u8,
    pub cid: u8,
}

/// Routes CIDs and transaction ids between connected processes and the
/// single shared `Device`. Holds no transport or async state itself —
/// `qmi-proxy`'s connection-handling tasks call into this for every
/// allocate/release and every forwarded request/response.
#[derive(Default)]
pub struct ProxyRouter {
    /// CIDs owned by each connection, for release-on-disconnect.
    owned_cids: HashMap<ConnId, HashSet<ServiceCid>>,
    /// Reverse lookup: which connection owns a given (service, cid).
    cid_owner: HashMap<ServiceCid, ConnId>,
    /// Per-service monotonic allocator for the transaction id presented
    /// to the modem, kept disjoint from what any individual connection
    /// believes its own id is.
    next_txn: HashMap<u8, u16>,
    /// (service, modem-facing txn) -> everything needed to route and
    /// react to the matching response.
    inflight: HashMap<(u8, u16), Inflight>,
}

struct Inflight {
    conn: ConnId,
    original_txn: u16,
    action: PendingAction,
}

/// CID bookkeeping to perform once a forwarded request's response comes
/// back, since only the request (not the response alone) carries enough
/// information to know which CID was just allocated or released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingAction {
    None,
    RecordCid { service: u8 },
    ReleaseCid { service: u8, cid: u8 },
}

impl ProxyRouter {
    pub fn new() -> Self {
        ProxyRouter::default()
    }

    pub fn register_connection(&mut self, conn: ConnId) {
        self.owned_cids.entry(conn).or_default();
    }

    /// Records that `conn` owns `cid` on `service`, e.g. right after a
    /// `GetClientId` response the proxy forwarded back to it.
    pub fn record_cid(&mut self, conn: ConnId, service: u8, cid: u8) {
        let key = ServiceCid { service, cid };
        self.owned_cids.entry(conn).or_default().insert(key);
        self.cid_owner.insert(key, conn);
    }

    pub fn release_cid(&mut self, conn: ConnId, service: u8, cid: u8) {
        let key = ServiceCid { service, cid };
        if let Some(set) = self.owned_cids.get_mut(&conn) {
            set.remove(&key);
        }
        self.cid_owner.remove(&key);
    }

    /// `conn` disconnected: returns every (service, cid) it still owned,
    /// for the caller to issue `ReleaseClientId` against the shared
    /// device (spec §4.5: "CID release on process disconnect").
    pub fn remove_connection(&mut self, conn: ConnId) -> Vec<ServiceCid> {
        let cids = self.owned_cids.remove(&conn).unwrap_or_default();
        for cid in &cids {
            self.cid_owner.remove(cid);
        }
        self.inflight.retain(|_, entry| entry.conn != conn);
        cids.into_iter().collect()
    }

    pub fn owner_of(&self, service: u8, cid: u8) -> Option<ConnId> {
        self.cid_owner.get(&ServiceCid { service, cid }).copied()
    }

    /// Allocates a modem-facing transaction id for an outbound request
    /// from `conn`, recording how to route the matching response back
    /// and, for CTL allocate/release requests, what CID bookkeeping to
    /// perform once that response arrives. Rewrites only the id on the
    /// wire to the shared device; `conn`'s own view of its transaction id
    /// is untouched (spec §4.5: "rewrit[e] only as far as needed to
    /// preserve transaction-id disjointness").
    pub fn rewrite_outbound(&mut self, conn: ConnId, service: u8, original_txn: u16, action: PendingAction) -> u16 {
        let counter = self.next_txn.entry(service).or_insert(0);
        *counter = counter.wrapping_add(1);
        if *counter == 0 {
            *counter = 1;
        }
        let modem_txn = *counter;
        self.inflight.insert((service, modem_txn), Inflight { conn, original_txn, action });
        modem_txn
    }

    /// Resolves an inbound response's modem-facing transaction id back
    /// to the owning connection, that connection's original id, and any
    /// CID bookkeeping the request that provoked it asked for. Consumes
    /// the mapping: a given modem-facing txn is matched to at most one
    /// response, mirroring the underlying device's own single-shot
    /// transaction semantics.
    pub fn resolve_inbound(&mut self, service: u8, modem_txn: u16) -> Option<(ConnId, u16, PendingAction)> {
        self.inflight
            .remove(&(service, modem_txn))
            .map(|entry| (entry.conn, entry.original_txn, entry.action))
    }
}
