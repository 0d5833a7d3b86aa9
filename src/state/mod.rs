//! Shared server state.
//!
//! `Switchboard` aggregates the three state components named in the spec
//! (Account Store, Channel Registry, Session Table) plus the shutdown
//! flag the listener polls, the way the teacher's `Matrix` aggregates its
//! managers. There is no ambient/global state: a `Switchboard` is built
//! once at startup and handed to every connection task as an `Arc`.

pub mod accounts;
pub mod channels;
pub mod sessions;

use accounts::AccountStore;
use channels::ChannelRegistry;
use sessions::SessionTable;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Shared, process-wide server state.
pub struct Switchboard {
    pub accounts: AccountStore,
    pub channels: ChannelRegistry,
    pub sessions: SessionTable,
    pub uploads_dir: PathBuf,
    channels_path: PathBuf,
    shutdown: AtomicBool,
    /// Fires once connections should drop their sockets, distinct from
    /// `shutdown` (which only tells the gateway to stop accepting) so the
    /// goodbye broadcast has time to reach every outbox before sockets
    /// close — see the ordering note in `main.rs`.
    close_tx: watch::Sender<bool>,
}

impl Switchboard {
    pub fn new(config: &crate::config::Config) -> Arc<Self> {
        let accounts = AccountStore::load(&config.accounts_path);
        let channels = ChannelRegistry::new();
        channels.restore_from(&config.channels_path);
        let (close_tx, _) = watch::channel(false);

        Arc::new(Self {
            accounts,
            channels,
            sessions: SessionTable::new(),
            uploads_dir: config.uploads_dir.clone(),
            channels_path: config.channels_path.clone(),
            shutdown: AtomicBool::new(false),
            close_tx,
        })
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Tell the gateway to stop accepting new connections.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// A receiver connection workers select on to learn when to drop their
    /// sockets.
    pub fn close_signal(&self) -> watch::Receiver<bool> {
        self.close_tx.subscribe()
    }

    /// Tell every connection worker to drop its socket now.
    pub fn close_all_connections(&self) {
        let _ = self.close_tx.send(true);
    }

    /// Persist account and channel state to their configured paths.
    pub fn flush(&self) {
        if let Err(e) = self.accounts.flush() {
            tracing::error!(error = %e, "failed to flush account store");
        }
        if let Err(e) = self.channels.save(&self.channels_path) {
            tracing::error!(error = %e, "failed to save channel definitions");
        }
    }
}
