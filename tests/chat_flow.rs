//! End-to-end protocol tests driving the real TCP surface, per the
//! concrete scenarios in `spec.md` §8.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chatd::config::Config;
use chatd::network::Gateway;
use chatd::state::accounts::Role;
use chatd::state::Switchboard;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

struct TestServer {
    addr: SocketAddr,
    switchboard: Arc<Switchboard>,
    _dir: tempfile::TempDir,
}

async fn start_server() -> TestServer {
    start_server_with_poll(1).await
}

async fn start_server_with_poll(shutdown_poll_secs: u64) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        listen: "127.0.0.1:0".parse().unwrap(),
        accounts_path: dir.path().join("users.json"),
        channels_path: dir.path().join("save_channels.txt"),
        uploads_dir: dir.path().join("uploads"),
        shutdown_poll_secs,
        ..Config::default()
    };

    let switchboard = Switchboard::new(&config);
    let gateway = Gateway::bind(&config).unwrap();
    let addr = gateway.local_addr().unwrap();

    let sb_for_task = switchboard.clone();
    tokio::spawn(async move {
        gateway.run(sb_for_task).await;
    });

    TestServer { addr, switchboard, _dir: dir }
}

async fn read_message(stream: &mut TcpStream) -> String {
    let mut out = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await.expect("read failed");
        if n == 0 || byte[0] == 0 {
            break;
        }
        out.push(byte[0]);
    }
    String::from_utf8_lossy(&out).to_string()
}

async fn send_line(stream: &mut TcpStream, line: &str) {
    stream.write_all(format!("{line}\n").as_bytes()).await.unwrap();
}

async fn login(server: &TestServer, username: &str, password: &str) -> TcpStream {
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    let _prompt = read_message(&mut stream).await; // "Username:"
    send_line(&mut stream, username).await;
    let _prompt = read_message(&mut stream).await; // "Password:"
    send_line(&mut stream, password).await;
    stream
}

#[tokio::test]
async fn two_client_chat() {
    let server = start_server().await;
    let mut alice = login(&server, "alice", "pw").await;
    let mut bob = login(&server, "bob", "pw").await;

    // Alice sees Bob's admission announcement before anything else.
    assert_eq!(read_message(&mut alice).await, "bob has joined the channel Hub (2/-1)");

    send_line(&mut alice, "hello").await;
    assert_eq!(read_message(&mut bob).await, "Hub-alice: hello");
}

#[tokio::test]
async fn channel_creation_and_isolation() {
    let server = start_server().await;
    let mut alice = login(&server, "alice", "pw").await;
    let mut bob = login(&server, "bob", "pw").await;
    assert_eq!(read_message(&mut alice).await, "bob has joined the channel Hub (2/-1)");

    send_line(&mut alice, "@create room1 2").await;
    assert_eq!(read_message(&mut alice).await, "You have joined room1 (1/2)");
    assert_eq!(read_message(&mut bob).await, "alice has left the channel Hub (1/-1)");

    // Bob (still in Hub) talks; Alice (in room1) must not see it.
    send_line(&mut bob, "hello").await;
    let timed_out = tokio::time::timeout(Duration::from_millis(200), read_message(&mut alice)).await;
    assert!(timed_out.is_err(), "alice should not receive Hub chat while in room1");

    send_line(&mut bob, "@join room1").await;
    assert_eq!(read_message(&mut alice).await, "bob has joined the channel room1 (2/2)");
    assert_eq!(read_message(&mut bob).await, "You have joined room1 (2/2)");

    send_line(&mut bob, "room1 chat").await;
    assert_eq!(read_message(&mut alice).await, "room1-bob: room1 chat");
}

#[tokio::test]
async fn capacity_enforcement() {
    let server = start_server().await;
    let mut alice = login(&server, "alice", "pw").await;
    let mut bob = login(&server, "bob", "pw").await;
    assert_eq!(read_message(&mut alice).await, "bob has joined the channel Hub (2/-1)");

    send_line(&mut alice, "@create room1 2").await;
    assert_eq!(read_message(&mut alice).await, "You have joined room1 (1/2)");
    assert_eq!(read_message(&mut bob).await, "alice has left the channel Hub (1/-1)");

    send_line(&mut bob, "@join room1").await;
    assert_eq!(read_message(&mut alice).await, "bob has joined the channel room1 (2/2)");
    assert_eq!(read_message(&mut bob).await, "You have joined room1 (2/2)");

    let mut carol = login(&server, "carol", "pw").await;
    send_line(&mut carol, "@join room1").await;
    assert_eq!(read_message(&mut carol).await, "This channel is full, you cannot join it");
}

#[tokio::test]
async fn admin_shutdown_broadcasts_and_closes_sessions() {
    let server = start_server().await;
    server.switchboard.accounts.create("root", "adminpw", Role::Admin).unwrap();

    let mut alice = login(&server, "alice", "pw").await;
    let mut root = login(&server, "root", "adminpw").await;
    assert_eq!(read_message(&mut alice).await, "root has joined the channel Hub (2/-1)");

    send_line(&mut root, "@shutdown").await;
    assert_eq!(read_message(&mut root).await, "Arrêt du serveur...");

    assert_eq!(read_message(&mut alice).await, "Server is shutting down. Goodbye!");
    assert_eq!(read_message(&mut root).await, "Server is shutting down. Goodbye!");

    // The server closes every socket shortly after the broadcast.
    let mut buf = [0u8; 8];
    let n = tokio::time::timeout(Duration::from_secs(2), alice.read(&mut buf))
        .await
        .expect("server did not close the connection in time")
        .unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn file_round_trip() {
    let server = start_server().await;
    let mut alice = login(&server, "alice", "pw").await;

    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

    send_line(&mut alice, "@upload photo.bin").await;
    alice.write_all(&payload).await.unwrap();
    // Give the server a chance to drain the payload in its own read before
    // the trailer arrives, so it lands as the independent read this
    // protocol's upload framing expects (spec.md §4.5 step 4).
    tokio::time::sleep(Duration::from_millis(50)).await;
    alice.write_all(b"__END__").await.unwrap();
    assert_eq!(read_message(&mut alice).await, "Fichier reçu avec succès");

    let on_disk = tokio::fs::read(server.switchboard.uploads_dir.join("photo.bin")).await.unwrap();
    assert_eq!(on_disk, payload);

    send_line(&mut alice, "@download photo.bin").await;
    let header = read_message(&mut alice).await;
    assert_eq!(header, format!("READY_TO_SEND:photo.bin:{}", payload.len()));
    alice.write_all(b"READY").await.unwrap();

    let mut received = vec![0u8; payload.len()];
    alice.read_exact(&mut received).await.unwrap();
    assert_eq!(received, payload);

    let mut trailer = [0u8; 7];
    alice.read_exact(&mut trailer).await.unwrap();
    assert_eq!(&trailer, b"__END__");
    assert_eq!(read_message(&mut alice).await, "Transfert terminé");
}

#[tokio::test]
async fn crash_recovery_preserves_channels_and_accounts() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        listen: "127.0.0.1:0".parse().unwrap(),
        accounts_path: dir.path().join("users.json"),
        channels_path: dir.path().join("save_channels.txt"),
        uploads_dir: dir.path().join("uploads"),
        ..Config::default()
    };

    {
        let switchboard = Switchboard::new(&config);
        switchboard.accounts.create("alice", "pw", Role::User).unwrap();
        switchboard.channels.create("persist", chatd::state::channels::Capacity::Limited(5), None).unwrap();
        switchboard.flush();
    }

    let restarted = Switchboard::new(&config);
    let channel = restarted.channels.get("persist").expect("channel should survive restart");
    assert_eq!(channel.capacity, chatd::state::channels::Capacity::Limited(5));
    assert_eq!(channel.size(), 0);

    assert_eq!(
        restarted.accounts.authenticate("alice", "pw"),
        chatd::state::accounts::AuthOutcome::Authenticated(restarted.accounts.lookup("alice").unwrap())
    );
}
