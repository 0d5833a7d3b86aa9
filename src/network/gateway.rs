//! TCP listener: binds with address-reuse, accepts connections, spawns one
//! worker task per connection, and stops cleanly on the shutdown flag.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket};

use super::connection;
use crate::config::Config;
use crate::error::StartupError;
use crate::state::Switchboard;

pub struct Gateway {
    listener: TcpListener,
    poll_interval: Duration,
    max_message_bytes: usize,
}

impl Gateway {
    pub fn bind(config: &Config) -> Result<Self, StartupError> {
        let socket = match config.listen {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(|e| StartupError::Bind { addr: config.listen, source: e })?;

        socket
            .set_reuseaddr(true)
            .map_err(|e| StartupError::Bind { addr: config.listen, source: e })?;
        socket
            .bind(config.listen)
            .map_err(|e| StartupError::Bind { addr: config.listen, source: e })?;
        let listener = socket
            .listen(config.listen_backlog)
            .map_err(|e| StartupError::Bind { addr: config.listen, source: e })?;

        tracing::info!(addr = %config.listen, "listening");
        Ok(Self {
            listener,
            poll_interval: Duration::from_secs(config.shutdown_poll_secs),
            max_message_bytes: config.max_message_bytes,
        })
    }

    /// Local address actually bound, useful when `config.listen` used port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `switchboard` is told to shut down, then
    /// drain every live session and persist state, per `spec.md` §4.6:
    /// "broadcasts ... sleeps briefly, closes all session connections,
    /// saves stores, and exits".
    ///
    /// Polls the accept future with a ceiling of `poll_interval` so that a
    /// shutdown request is observed within roughly one second even with no
    /// inbound traffic.
    pub async fn run(&self, switchboard: Arc<Switchboard>) {
        while !switchboard.is_shutting_down() {
            let accepted = tokio::time::timeout(self.poll_interval, self.listener.accept()).await;
            let (stream, addr) = match accepted {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
                Err(_) => continue,
            };

            tracing::info!(%addr, "connection accepted");
            let switchboard = switchboard.clone();
            let max_message_bytes = self.max_message_bytes;
            tokio::spawn(async move {
                connection::run(stream, addr, switchboard, max_message_bytes).await;
            });
        }

        tracing::info!("shutdown requested, draining sessions");
        switchboard.sessions.broadcast("Server is shutting down. Goodbye!").await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        switchboard.close_all_connections();
        switchboard.flush();
    }
}
