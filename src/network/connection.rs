//! Per-connection worker: login handshake, read loop, dispatch, teardown.
//!
//! Grounded on the teacher's per-connection task model (one task per
//! accepted socket, `tokio::select!` between inbound reads and outbound
//! deliveries), simplified to this protocol's single-command-per-read
//! framing (`spec.md` §4.6) and its bidirectional file-transfer
//! subprotocol, which needs raw access to the socket the `LineCodec`
//! normally owns — so this worker keeps the `TcpStream` itself rather
//! than wrapping it in a `Framed`, and calls into [`crate::codec::LineCodec`]
//! by hand for line framing.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::LineCodec;
use crate::commands::{execute, Action};
use crate::error::ChatError;
use crate::state::accounts::{Account, AuthOutcome, CreateError, Role};
use crate::state::channels::HUB;
use crate::state::Switchboard;
use crate::transfer;

/// Drive one connection from login through teardown.
pub async fn run(mut stream: TcpStream, addr: SocketAddr, sb: Arc<Switchboard>, max_message_bytes: usize) {
    let account = match login_handshake(&mut stream, &sb, max_message_bytes).await {
        Some(account) => account,
        None => return,
    };

    let (outbox_tx, mut outbox_rx) = mpsc::channel::<String>(64);
    let session = sb.sessions.admit(account, addr, outbox_tx, &sb.channels);
    tracing::info!(session = %session.id, %addr, username = %session.account().username, "session admitted");

    announce_admission(&session, &sb).await;
    let mut close_rx = sb.close_signal();

    loop {
        tokio::select! {
            result = read_line(&mut stream, max_message_bytes) => {
                match result {
                    Ok(Some(line)) => {
                        if !handle_line(&line, &session, &sb, &mut stream).await {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(session = %session.id, error = %e, "read failed");
                        break;
                    }
                }
            }
            Some(message) = outbox_rx.recv() => {
                if send_line(&mut stream, &message).await.is_err() {
                    break;
                }
            }
            changed = close_rx.changed() => {
                if changed.is_err() || *close_rx.borrow() {
                    break;
                }
            }
        }
    }

    sb.channels.disconnect(session.id);
    sb.sessions.evict(session.id);
    tracing::info!(session = %session.id, %addr, "connection closed");
}

/// Dispatch one inbound line. Returns `false` when the connection should
/// close (fatal I/O error, or the sender triggered shutdown and the
/// gateway will tear everything down shortly).
async fn handle_line(line: &str, session: &Arc<crate::state::sessions::Session>, sb: &Arc<Switchboard>, stream: &mut TcpStream) -> bool {
    match execute(line, session, sb).await {
        Ok(Action::None) => true,
        Ok(Action::Upload(filename)) => {
            match transfer::upload(stream, &sb.uploads_dir, &filename).await {
                Ok(()) => {
                    let _ = send_line(stream, "Fichier reçu avec succès").await;
                    true
                }
                Err(e) => {
                    tracing::warn!(session = %session.id, error = %e, "upload failed");
                    reply_or_close(stream, &e).await
                }
            }
        }
        Ok(Action::Download(filename)) => {
            match transfer::download(stream, &sb.uploads_dir, &filename).await {
                Ok(()) => {
                    let _ = send_line(stream, "Transfert terminé").await;
                    true
                }
                Err(e) => {
                    tracing::warn!(session = %session.id, error = %e, "download failed");
                    reply_or_close(stream, &e).await
                }
            }
        }
        Ok(Action::Shutdown) => true,
        Err(e) => reply_or_close(stream, &e).await,
    }
}

async fn reply_or_close(stream: &mut TcpStream, error: &ChatError) -> bool {
    match error.client_line() {
        Some(line) => send_line(stream, &line).await.is_ok(),
        None => false,
    }
}

async fn announce_admission(session: &Arc<crate::state::sessions::Session>, sb: &Switchboard) {
    let hub = sb.channels.get(HUB).expect("Hub always exists");
    let line = format!(
        "{} has joined the channel {} ({}/{})",
        session.account().username,
        HUB,
        hub.size(),
        hub.capacity
    );
    let targets = sb.channels.members_of(HUB);
    sb.sessions.broadcast_to_except(&targets, session.id, &line).await;
}

/// Username/password prompts, then auto-registration or authentication,
/// per `spec.md` §4.6.
async fn login_handshake(stream: &mut TcpStream, sb: &Switchboard, max_message_bytes: usize) -> Option<Account> {
    send_line(stream, "Username:").await.ok()?;
    let username = read_line(stream, max_message_bytes).await.ok().flatten()?;
    send_line(stream, "Password:").await.ok()?;
    let password = read_line(stream, max_message_bytes).await.ok().flatten()?;

    match sb.accounts.authenticate(&username, &password) {
        AuthOutcome::Authenticated(account) => Some(account),
        AuthOutcome::NotFound => match sb.accounts.create(&username, &password, Role::User) {
            Ok(account) => Some(account),
            // Another connection won the race and registered first; fall
            // back to authenticating as that account.
            Err(CreateError::AlreadyExists) => match sb.accounts.authenticate(&username, &password) {
                AuthOutcome::Authenticated(account) => Some(account),
                _ => {
                    let _ = send_line(stream, "Mot de passe incorrect").await;
                    None
                }
            },
            Err(CreateError::Io(e)) => {
                tracing::error!(username = %username, error = %e, "failed to persist new account");
                let _ = send_line(stream, "Account creation failed, try again later").await;
                None
            }
        },
        AuthOutcome::BadCredentials => {
            let _ = send_line(stream, "Mot de passe incorrect").await;
            None
        }
    }
}

/// Read a single command: one socket read, trimmed of its trailing
/// newline, with no server-side reassembly (`spec.md` §4.6).
async fn read_line(stream: &mut TcpStream, max_message_bytes: usize) -> std::io::Result<Option<String>> {
    let mut raw = vec![0u8; max_message_bytes];
    let n = stream.read(&mut raw).await?;
    if n == 0 {
        return Ok(None);
    }
    let mut buf = BytesMut::from(&raw[..n]);
    let mut codec = LineCodec::new(max_message_bytes);
    codec.decode(&mut buf)
}

async fn send_line(stream: &mut TcpStream, line: &str) -> std::io::Result<()> {
    let mut codec = LineCodec::new(line.len() + 1);
    let mut buf = BytesMut::new();
    codec.encode(line.to_string(), &mut buf)?;
    stream.write_all(&buf).await
}
