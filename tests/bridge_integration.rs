//! Integration tests for the socket bridge.
//!
//! Client and server talk over a real Unix socket in a temporary directory;
//! the session bus is replaced by an in-memory sink.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use qmk_layer_bridge::backoff::Backoff;
use qmk_layer_bridge::bridge::{lock_path, wire};
use qmk_layer_bridge::{BridgeClient, BridgeError, BridgeServer, BusError, LayerChanged, LayerSink};

#[derive(Default)]
struct RecordingSink {
    calls: Mutex<Vec<LayerChanged>>,
    fail_next: AtomicBool,
}

#[async_trait]
impl LayerSink for RecordingSink {
    async fn set_layer(&self, event: &LayerChanged) -> Result<(), BusError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(BusError::BusUnavailable("indicator not running".into()));
        }
        self.calls.lock().unwrap().push(event.clone());
        Ok(())
    }
}

impl RecordingSink {
    fn calls(&self) -> Vec<LayerChanged> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

struct RunningServer {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RunningServer {
    async fn start(path: &Path, sink: Arc<RecordingSink>) -> Self {
        let server = BridgeServer::bind(path, 0o600).await.expect("bind failed");
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(server.run(sink, stop_rx));
        Self { stop, task }
    }

    async fn shutdown(self) {
        self.stop.send(true).unwrap();
        self.task.await.unwrap();
    }
}

fn socket_path(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("bridge.sock")
}

fn fast_backoff() -> Backoff {
    Backoff::new(Duration::from_millis(10), Duration::from_millis(50))
}

fn lower() -> LayerChanged {
    LayerChanged::new("Lower", "#FF3232")
}

async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Wait for the server to close its end of `stream`
async fn expect_closed(stream: &mut UnixStream) {
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(3), stream.read(&mut buf))
        .await
        .expect("server did not close the connection")
        .unwrap_or(0);
    assert_eq!(n, 0);
}

#[tokio::test]
async fn lower_layer_is_forwarded_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_path(&dir);
    let sink = Arc::new(RecordingSink::default());
    let server = RunningServer::start(&path, Arc::clone(&sink)).await;

    let client = BridgeClient::start(&path, fast_backoff());
    eventually("client connect", || client.is_connected()).await;
    assert!(client.send(lower()));

    eventually("SetLayer call", || sink.count() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sink.calls(), vec![lower()]);

    client.stop().await;
    server.shutdown().await;
}

#[tokio::test]
async fn second_bind_on_live_socket_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_path(&dir);
    let sink = Arc::new(RecordingSink::default());
    let server = RunningServer::start(&path, Arc::clone(&sink)).await;

    for _ in 0..2 {
        match BridgeServer::bind(&path, 0o600).await {
            Err(BridgeError::AddressInUse(p)) => assert_eq!(p, path),
            Err(e) => panic!("expected AddressInUse, got {e}"),
            Ok(_) => panic!("second bind succeeded"),
        }
    }
    assert!(path.exists(), "failed bind must not remove the live socket");

    server.shutdown().await;
}

#[tokio::test]
async fn failed_second_bind_leaves_live_client_connected() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_path(&dir);
    let sink = Arc::new(RecordingSink::default());
    let server = RunningServer::start(&path, Arc::clone(&sink)).await;

    let client = BridgeClient::start(&path, fast_backoff());
    eventually("client connect", || client.is_connected()).await;

    assert!(matches!(
        BridgeServer::bind(&path, 0o600).await,
        Err(BridgeError::AddressInUse(_))
    ));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(client.is_connected());

    assert!(client.send(lower()));
    eventually("SetLayer on the live server", || sink.count() == 1).await;
    assert_eq!(sink.calls(), vec![lower()]);

    client.stop().await;
    server.shutdown().await;
}

#[tokio::test]
async fn lock_is_released_with_the_server() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_path(&dir);
    let server = BridgeServer::bind(&path, 0o600).await.unwrap();
    assert!(lock_path(&path).exists());
    drop(server);
    assert!(!path.exists());

    let again = BridgeServer::bind(&path, 0o600).await;
    assert!(again.is_ok(), "rebind after drop failed");
}

#[tokio::test]
async fn stale_socket_file_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_path(&dir);
    drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
    assert!(path.exists());

    let server = BridgeServer::bind(&path, 0o600).await.unwrap();
    assert_eq!(server.path(), path.as_path());
}

#[tokio::test]
async fn stop_removes_socket_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_path(&dir);
    let server = RunningServer::start(&path, Arc::default()).await;
    assert!(path.exists());
    server.shutdown().await;
    assert!(!path.exists());
}

#[tokio::test]
async fn socket_mode_is_applied() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let path = socket_path(&dir);
    let _server = BridgeServer::bind(&path, 0o660).await.unwrap();
    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o660);
}

#[tokio::test]
async fn two_messages_split_across_three_reads() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_path(&dir);
    let sink = Arc::new(RecordingSink::default());
    let server = RunningServer::start(&path, Arc::clone(&sink)).await;

    let raise = LayerChanged::new("Raise", "#0000FF");
    let mut bytes = wire::encode(&lower()).unwrap();
    bytes.extend(wire::encode(&raise).unwrap());
    let (a, b) = (3, bytes.len() - 7);

    let mut stream = UnixStream::connect(&path).await.unwrap();
    for chunk in [&bytes[..a], &bytes[a..b], &bytes[b..]] {
        stream.write_all(chunk).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    eventually("both messages", || sink.count() == 2).await;
    assert_eq!(sink.calls(), vec![lower(), raise]);

    server.shutdown().await;
}

#[tokio::test]
async fn malformed_message_drops_connection() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_path(&dir);
    let sink = Arc::new(RecordingSink::default());
    let server = RunningServer::start(&path, Arc::clone(&sink)).await;

    let mut stream = UnixStream::connect(&path).await.unwrap();
    let mut frame = 5u32.to_be_bytes().to_vec();
    frame.extend_from_slice(b"hello");
    stream.write_all(&frame).await.unwrap();

    expect_closed(&mut stream).await;
    assert_eq!(sink.count(), 0);

    // The server itself keeps serving
    let mut stream = UnixStream::connect(&path).await.unwrap();
    stream.write_all(&wire::encode(&lower()).unwrap()).await.unwrap();
    eventually("message after reconnect", || sink.count() == 1).await;

    server.shutdown().await;
}

#[tokio::test]
async fn newer_connection_supersedes_older() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_path(&dir);
    let sink = Arc::new(RecordingSink::default());
    let server = RunningServer::start(&path, Arc::clone(&sink)).await;

    let mut first = UnixStream::connect(&path).await.unwrap();
    first.write_all(&wire::encode(&lower()).unwrap()).await.unwrap();
    eventually("first message", || sink.count() == 1).await;

    let mut second = UnixStream::connect(&path).await.unwrap();
    expect_closed(&mut first).await;

    let adjust = LayerChanged::new("Adjust", "#50DC50");
    second.write_all(&wire::encode(&adjust).unwrap()).await.unwrap();
    eventually("second message", || sink.count() == 2).await;
    assert_eq!(sink.calls()[1], adjust);

    server.shutdown().await;
}

#[tokio::test]
async fn bus_failure_drops_only_that_message() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_path(&dir);
    let sink = Arc::new(RecordingSink::default());
    sink.fail_next.store(true, Ordering::SeqCst);
    let server = RunningServer::start(&path, Arc::clone(&sink)).await;

    let client = BridgeClient::start(&path, fast_backoff());
    eventually("client connect", || client.is_connected()).await;
    client.send(lower());
    eventually("failed call consumed", || !sink.fail_next.load(Ordering::SeqCst)).await;

    let game = LayerChanged::new("Game", "#00FFFF");
    client.send(game.clone());
    eventually("next SetLayer", || sink.count() == 1).await;
    assert_eq!(sink.calls(), vec![game]);
    assert!(client.is_connected());

    client.stop().await;
    server.shutdown().await;
}

#[tokio::test]
async fn client_reconnects_after_server_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_path(&dir);
    let first_sink = Arc::new(RecordingSink::default());
    let server = RunningServer::start(&path, Arc::clone(&first_sink)).await;

    let client = BridgeClient::start(&path, fast_backoff());
    eventually("client connect", || client.is_connected()).await;

    server.shutdown().await;
    eventually("client notices the server is gone", || !client.is_connected()).await;
    assert!(!client.send(lower()), "events while disconnected are dropped");

    let second_sink = Arc::new(RecordingSink::default());
    let server = RunningServer::start(&path, Arc::clone(&second_sink)).await;
    eventually("client reconnect", || client.is_connected()).await;

    let mouse = LayerChanged::new("Mouse", "#FFA500");
    assert!(client.send(mouse.clone()));
    eventually("SetLayer after restart", || second_sink.count() == 1).await;
    assert_eq!(second_sink.calls(), vec![mouse]);
    assert_eq!(first_sink.count(), 0);

    client.stop().await;
    server.shutdown().await;
}
