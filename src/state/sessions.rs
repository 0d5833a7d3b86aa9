//! Session Table — owns sessions, keyed by connection and by session id.
//!
//! A `Session` is created once the login handshake completes and destroyed
//! on disconnect. Following `spec.md` §9 ("Cyclic references between
//! Session and Channel"), channels hold [`SessionId`]s, never direct
//! session references; resolving a membership entry back to a live
//! `Session` always goes through this table under its own lock, so a
//! disconnecting session can never be observed half-torn-down.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::state::accounts::Account;
use crate::state::channels::HUB;

/// Monotonically-unique session identifier, stable for the life of a
/// connection. Cheap to copy and hash, so membership lists and lookup
/// indices store this instead of an `Arc<Session>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    #[cfg(test)]
    pub fn from_raw(n: u64) -> Self {
        SessionId(n)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A line queued for delivery to a session's connection.
pub type Outbox = mpsc::Sender<String>;

/// A connected, authenticated session.
pub struct Session {
    pub id: SessionId,
    /// The account this connection is currently bound to. Mutable because
    /// `@connect` (`spec.md` §4.4, "legacy; login is normally done in the
    /// handshake") can rebind a live connection to a different account
    /// without tearing down the session.
    account: Mutex<Account>,
    pub addr: SocketAddr,
    /// Sender half of the per-connection outgoing queue; the connection
    /// task owns the receiver and writes each line to the socket.
    pub outbox: Outbox,
    /// Name of the channel this session currently belongs to. Cached here
    /// per `spec.md` §3's attribute list; the `ChannelRegistry` is the
    /// actual source of truth and this field is kept in lockstep with it
    /// by every caller that performs a join/leave/disconnect.
    current_channel: Mutex<String>,
}

impl Session {
    /// Snapshot of the account currently bound to this connection.
    pub fn account(&self) -> Account {
        self.account.lock().clone()
    }

    pub fn current_channel(&self) -> String {
        self.current_channel.lock().clone()
    }

    pub fn set_current_channel(&self, name: impl Into<String>) {
        *self.current_channel.lock() = name.into();
    }

    /// Queue a line for delivery. Errors (peer gone) are the caller's to
    /// log; they never change the sender's own session state.
    pub async fn send(&self, line: impl Into<String>) -> Result<(), mpsc::error::SendError<String>> {
        self.outbox.send(line.into()).await
    }
}

struct Inner {
    by_id: DashMap<SessionId, Arc<Session>>,
    by_username: DashMap<String, SessionId>,
    by_addr: DashMap<SocketAddr, SessionId>,
}

/// Owns all [`Session`] records. Operations on the table are serialized by
/// the underlying concurrent maps; [`SessionTable::broadcast`] iterates a
/// snapshot so a slow or dead peer never blocks admission of new sessions.
pub struct SessionTable {
    inner: Inner,
    next_id: AtomicU64,
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            inner: Inner {
                by_id: DashMap::new(),
                by_username: DashMap::new(),
                by_addr: DashMap::new(),
            },
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate a session id, insert it into the table, and place it in
    /// Hub via the given registry.
    pub fn admit(
        &self,
        account: Account,
        addr: SocketAddr,
        outbox: Outbox,
        registry: &crate::state::channels::ChannelRegistry,
    ) -> Arc<Session> {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let session = Arc::new(Session {
            id,
            current_channel: Mutex::new(HUB.to_string()),
            addr,
            outbox,
            account: Mutex::new(account.clone()),
        });

        self.inner.by_id.insert(id, session.clone());
        self.inner.by_username.insert(account.username.clone(), id);
        self.inner.by_addr.insert(addr, id);
        registry.join(HUB, id).expect("Hub is never full");
        session
    }

    /// Rebind a live session to a different account, updating the
    /// username index so `findByUsername` tracks the new identity.
    pub fn rebind(&self, id: SessionId, account: Account) {
        if let Some(session) = self.find_by_session_id(id) {
            let old_username = session.account().username;
            *session.account.lock() = account.clone();
            self.inner.by_username.remove(&old_username);
            self.inner.by_username.insert(account.username, id);
        }
    }

    pub fn find_by_session_id(&self, id: SessionId) -> Option<Arc<Session>> {
        self.inner.by_id.get(&id).map(|e| e.clone())
    }

    pub fn find_by_username(&self, username: &str) -> Option<Arc<Session>> {
        let id = *self.inner.by_username.get(username)?;
        self.find_by_session_id(id)
    }

    /// Resolve a session by the peer address of its underlying connection
    /// (`spec.md` §4.3, `findByConnection`).
    pub fn find_by_connection(&self, addr: SocketAddr) -> Option<Arc<Session>> {
        let id = *self.inner.by_addr.get(&addr)?;
        self.find_by_session_id(id)
    }

    /// Remove from the table. The caller must already have removed the
    /// session from the registry.
    pub fn evict(&self, id: SessionId) {
        if let Some((_, session)) = self.inner.by_id.remove(&id) {
            self.inner.by_username.remove(&session.account().username);
            self.inner.by_addr.remove(&session.addr);
        }
    }

    /// Snapshot of every currently-connected session.
    pub fn all(&self) -> Vec<Arc<Session>> {
        self.inner.by_id.iter().map(|e| e.value().clone()).collect()
    }

    /// Write `message` to every session.
    pub async fn broadcast(&self, message: &str) {
        for session in self.all() {
            if let Err(e) = session.send(message.to_string()).await {
                tracing::warn!(session = %session.id, error = %e, "broadcast delivery failed");
            }
        }
    }

    /// Write `message` to every session whose id is in `targets`.
    pub async fn broadcast_to(&self, targets: &[SessionId], message: &str) {
        for id in targets {
            if let Some(session) = self.find_by_session_id(*id) {
                if let Err(e) = session.send(message.to_string()).await {
                    tracing::warn!(session = %id, error = %e, "channel delivery failed");
                }
            }
        }
    }

    /// Write `message` to every session in `targets` except `exclude`.
    pub async fn broadcast_to_except(&self, targets: &[SessionId], exclude: SessionId, message: &str) {
        for id in targets {
            if *id == exclude {
                continue;
            }
            if let Some(session) = self.find_by_session_id(*id) {
                if let Err(e) = session.send(message.to_string()).await {
                    tracing::warn!(session = %id, error = %e, "channel delivery failed");
                }
            }
        }
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}
