//! Executes a parsed [`Command`] against the shared state.
//!
//! The actor/announcement split is grounded on `original_source/Channel.c`
//! (`joinChannel`, `createAndJoinChannel`, `leaveChannel`): the session that
//! causes a membership change gets a confirmation line distinct from the
//! announcement broadcast to the rest of the channel, per `SPEC_FULL.md`
//! §4.4.

use std::sync::Arc;

use super::{parse, Command};
use crate::error::ChatError;
use crate::state::accounts::{AuthOutcome, Role};
use crate::state::channels::{self, Capacity, HUB};
use crate::state::sessions::Session;
use crate::state::Switchboard;
use crate::transfer::validate_filename;

const COMMAND_CATALOG: &str = "\
Available commands:
  @command             show this list
  @help                show the help file
  @credits             show the credits file
  @ping                reply pong
  @msg <user> <text>   send a private message
  @connect <user> <pwd> re-authenticate this connection
  @create <name> [cap] create a channel and join it
  @join <name>          join a channel
  @leave                return to Hub
  @upload <filename>    send a file to the server
  @download <filename>  fetch a file from the server
  @shutdown             (ADMIN only) shut the server down";

/// What the connection loop must do after a command has been dispatched.
pub enum Action {
    /// Nothing further; stay in line-oriented chat mode.
    None,
    /// Enter the upload subprotocol for this filename.
    Upload(String),
    /// Enter the download subprotocol for this filename.
    Download(String),
    /// The sender was ADMIN and the shutdown flag has been set.
    Shutdown,
}

/// Parse and execute one inbound line for `session`.
pub async fn execute(line: &str, session: &Arc<Session>, sb: &Switchboard) -> Result<Action, ChatError> {
    match parse(line) {
        Command::Chat(text) => {
            chat(&text, session, sb).await;
            Ok(Action::None)
        }
        Command::Command => {
            let _ = session.send(COMMAND_CATALOG).await;
            Ok(Action::None)
        }
        Command::Help => {
            send_static_file(session, "README.txt").await;
            Ok(Action::None)
        }
        Command::Credits => {
            send_static_file(session, "Credits.txt").await;
            Ok(Action::None)
        }
        Command::Ping => {
            let _ = session.send("pong").await;
            Ok(Action::None)
        }
        Command::Msg { user, text } => {
            msg(&user, &text, session, sb).await?;
            Ok(Action::None)
        }
        Command::Connect { user, password } => {
            connect(&user, &password, session, sb).await?;
            Ok(Action::None)
        }
        Command::Create { name, capacity } => {
            create(&name, capacity, session, sb).await?;
            Ok(Action::None)
        }
        Command::Join { name } => {
            join(&name, session, sb).await?;
            Ok(Action::None)
        }
        Command::Leave => {
            leave(session, sb).await?;
            Ok(Action::None)
        }
        Command::Upload { filename } => {
            validate_filename(&filename)?;
            Ok(Action::Upload(filename))
        }
        Command::Download { filename } => {
            validate_filename(&filename)?;
            Ok(Action::Download(filename))
        }
        Command::Shutdown => shutdown(session, sb).await,
    }
}

async fn chat(text: &str, session: &Arc<Session>, sb: &Switchboard) {
    let channel_name = session.current_channel();
    let line = format!("{}-{}: {}", channel_name, session.account().username, text);
    let targets = sb.channels.members_of(&channel_name);
    sb.sessions.broadcast_to_except(&targets, session.id, &line).await;
}

async fn msg(user: &str, text: &str, session: &Arc<Session>, sb: &Switchboard) -> Result<(), ChatError> {
    let target = sb
        .sessions
        .find_by_username(user)
        .ok_or_else(|| ChatError::NotFound(format!("{user} is not online")))?;
    let line = format!("[PM from {}] {}", session.account().username, text);
    let _ = target.send(line).await;
    Ok(())
}

async fn connect(user: &str, password: &str, session: &Arc<Session>, sb: &Switchboard) -> Result<(), ChatError> {
    match sb.accounts.authenticate(user, password) {
        AuthOutcome::Authenticated(account) => {
            sb.sessions.rebind(session.id, account);
            let _ = session.send(format!("Now connected as {user}")).await;
            Ok(())
        }
        AuthOutcome::BadCredentials | AuthOutcome::NotFound => {
            Err(ChatError::PermissionDenied("Mot de passe incorrect".to_string()))
        }
    }
}

async fn create(
    name: &str,
    capacity_arg: Option<i64>,
    session: &Arc<Session>,
    sb: &Switchboard,
) -> Result<(), ChatError> {
    let capacity = match capacity_arg {
        None => Capacity::Unlimited,
        Some(n) => Capacity::from_i64(n)
            .ok_or_else(|| ChatError::ProtocolViolation(format!("invalid capacity: {n}")))?,
    };

    let previous = session.current_channel();
    let channel = sb.channels.create(name, capacity, Some(session.id)).map_err(|e| match e {
        channels::CreateError::NameTaken => ChatError::ProtocolViolation(format!("{name} is already in use")),
        channels::CreateError::InvalidName => ChatError::ProtocolViolation(format!("invalid channel name: {name}")),
        channels::CreateError::InvalidCapacity => ChatError::ProtocolViolation("invalid capacity".to_string()),
    })?;

    session.set_current_channel(name);
    announce_departure(&previous, session, sb).await;

    let _ = session
        .send(format!("You have joined {name} ({}/{})", channel.size(), channel.capacity))
        .await;
    Ok(())
}

async fn join(name: &str, session: &Arc<Session>, sb: &Switchboard) -> Result<(), ChatError> {
    let previous = session.current_channel();
    sb.channels.join(name, session.id).map_err(|e| match e {
        channels::JoinError::Full => ChatError::ResourceFull("This channel is full, you cannot join it".to_string()),
        channels::JoinError::AlreadyMember => ChatError::ProtocolViolation(format!("already in {name}")),
        channels::JoinError::NotFound => ChatError::NotFound(format!("no such channel: {name}")),
    })?;

    session.set_current_channel(name);
    announce_departure(&previous, session, sb).await;

    let channel = sb.channels.get(name).expect("just joined");
    let username = session.account().username;
    let arrival = format!("{} has joined the channel {} ({}/{})", username, name, channel.size(), channel.capacity);
    let targets = sb.channels.members_of(name);
    sb.sessions.broadcast_to_except(&targets, session.id, &arrival).await;

    let _ = session
        .send(format!("You have joined {name} ({}/{})", channel.size(), channel.capacity))
        .await;
    Ok(())
}

async fn leave(session: &Arc<Session>, sb: &Switchboard) -> Result<(), ChatError> {
    let previous = sb.channels.leave(session.id).map_err(|e| match e {
        channels::LeaveError::CannotLeaveHub => {
            ChatError::PermissionDenied("You are already in Hub".to_string())
        }
        channels::LeaveError::NotInAnyChannel => {
            ChatError::ProtocolViolation("not currently in any channel".to_string())
        }
    })?;

    session.set_current_channel(HUB);
    announce_departure(&previous, session, sb).await;

    let hub = sb.channels.get(HUB).expect("Hub always exists");
    let username = session.account().username;
    let arrival = format!("{} has joined the channel {} ({}/{})", username, HUB, hub.size(), hub.capacity);
    let targets = sb.channels.members_of(HUB);
    sb.sessions.broadcast_to_except(&targets, session.id, &arrival).await;

    let _ = session
        .send(format!("You have left {previous} and returned to Hub ({}/{})", hub.size(), hub.capacity))
        .await;
    Ok(())
}

/// Broadcast the "has left" announcement for `previous` to its remaining
/// members. Called after the membership mutation is already visible, per
/// `spec.md` §5's ordering guarantee.
async fn announce_departure(previous: &str, session: &Arc<Session>, sb: &Switchboard) {
    let Some(channel) = sb.channels.get(previous) else {
        return;
    };
    let username = session.account().username;
    let line = format!("{} has left the channel {} ({}/{})", username, previous, channel.size(), channel.capacity);
    let targets = channel.members();
    sb.sessions.broadcast_to_except(&targets, session.id, &line).await;
}

async fn shutdown(session: &Arc<Session>, sb: &Switchboard) -> Result<Action, ChatError> {
    if session.account().role != Role::Admin {
        return Err(ChatError::PermissionDenied("permission denied".to_string()));
    }
    sb.request_shutdown();
    let _ = session.send("Arrêt du serveur...").await;
    Ok(Action::Shutdown)
}

async fn send_static_file(session: &Arc<Session>, path: &str) {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => {
            let _ = session.send(content).await;
        }
        Err(e) => {
            tracing::warn!(path, error = %e, "static help file unavailable");
            let _ = session.send(format!("{path} is not available")).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::state::accounts::Account;
    use tokio::sync::mpsc;

    async fn switchboard(dir: &tempfile::TempDir) -> Arc<Switchboard> {
        let config = Config {
            accounts_path: dir.path().join("users.json"),
            channels_path: dir.path().join("save_channels.txt"),
            uploads_dir: dir.path().join("uploads"),
            ..Config::default()
        };
        Switchboard::new(&config)
    }

    async fn admit(sb: &Switchboard, username: &str, role: Role) -> (Arc<Session>, mpsc::Receiver<String>) {
        let account = Account {
            username: username.to_string(),
            password: "pw".to_string(),
            role,
        };
        let (tx, rx) = mpsc::channel(16);
        let addr = "127.0.0.1:1".parse().unwrap();
        let session = sb.sessions.admit(account, addr, tx, &sb.channels);
        (session, rx)
    }

    #[tokio::test]
    async fn chat_broadcasts_to_channel_not_sender() {
        let dir = tempfile::tempdir().unwrap();
        let sb = switchboard(&dir).await;
        let (alice, mut alice_rx) = admit(&sb, "alice", Role::User).await;
        let (_bob, mut bob_rx) = admit(&sb, "bob", Role::User).await;

        execute("hello", &alice, &sb).await.unwrap();
        assert_eq!(bob_rx.recv().await.unwrap(), "Hub-alice: hello");
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn create_moves_sender_and_announces_departure() {
        let dir = tempfile::tempdir().unwrap();
        let sb = switchboard(&dir).await;
        let (alice, mut alice_rx) = admit(&sb, "alice", Role::User).await;
        let (_bob, mut bob_rx) = admit(&sb, "bob", Role::User).await;

        execute("@create room1 2", &alice, &sb).await.unwrap();
        assert_eq!(alice.current_channel(), "room1");
        assert_eq!(bob_rx.recv().await.unwrap(), "alice has left the channel Hub (1/-1)");
        assert_eq!(alice_rx.recv().await.unwrap(), "You have joined room1 (1/2)");
    }

    #[tokio::test]
    async fn leave_announces_departure_and_hub_arrival() {
        let dir = tempfile::tempdir().unwrap();
        let sb = switchboard(&dir).await;
        let (alice, mut alice_rx) = admit(&sb, "alice", Role::User).await;
        let (_bob, mut bob_rx) = admit(&sb, "bob", Role::User).await;

        execute("@create room1 2", &alice, &sb).await.unwrap();
        bob_rx.recv().await.unwrap(); // alice has left the channel Hub
        alice_rx.recv().await.unwrap(); // You have joined room1

        execute("@leave", &alice, &sb).await.unwrap();
        assert_eq!(alice.current_channel(), HUB);
        assert_eq!(bob_rx.recv().await.unwrap(), "alice has joined the channel Hub (2/-1)");
        assert_eq!(alice_rx.recv().await.unwrap(), "You have left room1 and returned to Hub (2/-1)");
    }

    #[tokio::test]
    async fn join_full_channel_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sb = switchboard(&dir).await;
        let (alice, _) = admit(&sb, "alice", Role::User).await;
        let (bob, _) = admit(&sb, "bob", Role::User).await;
        let (carol, _) = admit(&sb, "carol", Role::User).await;

        execute("@create room1 2", &alice, &sb).await.unwrap();
        execute("@join room1", &bob, &sb).await.unwrap();

        let err = execute("@join room1", &carol, &sb).await.unwrap_err();
        assert_eq!(err.client_line().unwrap(), "This channel is full, you cannot join it");
        assert_eq!(carol.current_channel(), HUB);
    }

    #[tokio::test]
    async fn leave_from_hub_is_forbidden() {
        let dir = tempfile::tempdir().unwrap();
        let sb = switchboard(&dir).await;
        let (alice, _) = admit(&sb, "alice", Role::User).await;
        assert!(execute("@leave", &alice, &sb).await.is_err());
    }

    #[tokio::test]
    async fn shutdown_requires_admin() {
        let dir = tempfile::tempdir().unwrap();
        let sb = switchboard(&dir).await;
        let (alice, _) = admit(&sb, "alice", Role::User).await;
        assert!(execute("@shutdown", &alice, &sb).await.is_err());
        assert!(!sb.is_shutting_down());

        let (root, _) = admit(&sb, "root", Role::Admin).await;
        assert!(matches!(execute("@shutdown", &root, &sb).await, Ok(Action::Shutdown)));
        assert!(sb.is_shutting_down());
    }

    #[tokio::test]
    async fn msg_to_unknown_user_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let sb = switchboard(&dir).await;
        let (alice, _) = admit(&sb, "alice", Role::User).await;
        let err = execute("@msg ghost hi", &alice, &sb).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn upload_and_download_return_actions_without_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let sb = switchboard(&dir).await;
        let (alice, _) = admit(&sb, "alice", Role::User).await;

        assert!(matches!(
            execute("@upload photo.bin", &alice, &sb).await,
            Ok(Action::Upload(f)) if f == "photo.bin"
        ));
        let err = execute("@upload ../evil", &alice, &sb).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_filename");
    }
}
