//! End-to-end tests for the WebSocket gateway over a real socket

use futures::{SinkExt, StreamExt};
use happy_server::{router, AppState};
use happy_session::backend::memory::MemoryBackend;
use happy_session::{PersistedSession, RegistryConfig, SessionRegistry, Snapshot, StateStore};
use happy_types::TermSize;
use serde_json::Value;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start(dir: &Path, backend: &MemoryBackend) -> (SocketAddr, SessionRegistry) {
    let registry = SessionRegistry::new(
        Arc::new(backend.clone()),
        StateStore::in_dir(dir),
        RegistryConfig {
            default_cwd: PathBuf::from("/tmp"),
            ..RegistryConfig::default()
        },
    );
    registry.init().await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(AppState::new(registry.clone()));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, registry)
}

async fn connect(addr: SocketAddr, query: &str) -> Client {
    let url = format!("ws://{}/ws?{}", addr, query);
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

async fn next_frame(ws: &mut Client) -> Option<Message> {
    tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for a frame")
        .map(|msg| msg.unwrap())
}

async fn next_json(ws: &mut Client) -> Value {
    match next_frame(ws).await {
        Some(Message::Text(text)) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected a JSON frame, got {:?}", other),
    }
}

async fn next_output(ws: &mut Client) -> Vec<u8> {
    match next_frame(ws).await {
        Some(Message::Binary(data)) => data,
        other => panic!("expected an output frame, got {:?}", other),
    }
}

async fn expect_closed(ws: &mut Client) {
    match next_frame(ws).await {
        Some(Message::Close(_)) | None => {}
        other => panic!("expected close, got {:?}", other),
    }
}

async fn save(dir: &Path, id: &str, cwd: &str) {
    let mut snapshot = Snapshot::new();
    snapshot.insert(
        id.to_string(),
        PersistedSession {
            cwd: PathBuf::from(cwd),
        },
    );
    tokio_test::assert_ok!(StateStore::in_dir(dir).write(&snapshot).await);
}

#[tokio::test]
async fn test_list_mode_reports_ids_and_closes() {
    let temp_dir = tempfile::tempdir().unwrap();
    save(temp_dir.path(), "5a7ed000", "/srv/old").await;
    let backend = MemoryBackend::new();
    let (addr, registry) = start(temp_dir.path(), &backend).await;
    let live = registry.resolve(None, None, false).await.unwrap();

    let mut ws = connect(addr, "list=1").await;
    let msg = next_json(&mut ws).await;
    assert_eq!(msg["type"], "list");
    let ids: Vec<&str> = msg["ids"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&"5a7ed000"));
    assert!(ids.contains(&live.id()));
    expect_closed(&mut ws).await;

    // Listing never spawns
    assert_eq!(backend.spawn_count(), 1);
}

#[tokio::test]
async fn test_new_session_echoes_input() {
    let temp_dir = tempfile::tempdir().unwrap();
    let backend = MemoryBackend::echoing();
    let (addr, _registry) = start(temp_dir.path(), &backend).await;

    let mut ws = connect(addr, "cwd=%2Fsrv%2Fapp").await;
    let msg = next_json(&mut ws).await;
    assert_eq!(msg["type"], "session");
    assert_eq!(msg["restored"], false);
    assert_eq!(msg["cwd"], "/srv/app");
    assert_eq!(msg["id"].as_str().unwrap().len(), 8);

    ws.send(Message::Text("hello".to_string())).await.unwrap();
    assert_eq!(next_output(&mut ws).await, b"hello");

    ws.send(Message::Text(r#"{"type":"resize","cols":100,"rows":30}"#.to_string()))
        .await
        .unwrap();
    ws.send(Message::Binary(b"\x1b[A".to_vec())).await.unwrap();
    assert_eq!(next_output(&mut ws).await, b"\x1b[A");

    let process = backend.last().unwrap();
    assert_eq!(process.writes(), vec![b"hello".to_vec(), b"\x1b[A".to_vec()]);
    assert_eq!(process.resizes(), vec![TermSize { cols: 100, rows: 30 }]);
    assert_eq!(process.request.cwd, PathBuf::from("/srv/app"));
}

#[tokio::test]
async fn test_stale_id_is_gone() {
    let temp_dir = tempfile::tempdir().unwrap();
    let backend = MemoryBackend::new();
    let (addr, _registry) = start(temp_dir.path(), &backend).await;

    let mut ws = connect(addr, "id=feedface").await;
    let msg = next_json(&mut ws).await;
    assert_eq!(msg["type"], "gone");
    assert_eq!(msg["id"], "feedface");
    expect_closed(&mut ws).await;
    assert_eq!(backend.spawn_count(), 0);
}

#[tokio::test]
async fn test_saved_session_is_restored() {
    let temp_dir = tempfile::tempdir().unwrap();
    save(temp_dir.path(), "a1b2c3d4", "/home/u/proj").await;
    let backend = MemoryBackend::new();
    let (addr, _registry) = start(temp_dir.path(), &backend).await;

    let mut ws = connect(addr, "id=a1b2c3d4&cwd=%2Felsewhere").await;
    let msg = next_json(&mut ws).await;
    assert_eq!(msg["type"], "session");
    assert_eq!(msg["id"], "a1b2c3d4");
    assert_eq!(msg["restored"], true);
    assert_eq!(msg["cwd"], "/home/u/proj");
}

#[tokio::test]
async fn test_spawn_failure_reports_error() {
    let temp_dir = tempfile::tempdir().unwrap();
    let backend = MemoryBackend::new();
    let (addr, registry) = start(temp_dir.path(), &backend).await;

    backend.fail_next_spawn();
    let mut ws = connect(addr, "new=1").await;
    let msg = next_json(&mut ws).await;
    assert_eq!(msg["type"], "error");
    expect_closed(&mut ws).await;
    assert!(registry.list_ids().await.is_empty());
}

#[tokio::test]
async fn test_clients_share_output_and_wait_state() {
    let temp_dir = tempfile::tempdir().unwrap();
    let backend = MemoryBackend::new();
    let (addr, _registry) = start(temp_dir.path(), &backend).await;

    let mut first = connect(addr, "").await;
    let id = next_json(&mut first).await["id"].as_str().unwrap().to_string();
    let mut second = connect(addr, &format!("id={}", id)).await;
    let msg = next_json(&mut second).await;
    assert_eq!(msg["id"], id.as_str());
    assert_eq!(backend.spawn_count(), 1);

    backend.last().unwrap().emit(b"Continue? \x07");
    for ws in [&mut first, &mut second] {
        assert_eq!(next_output(ws).await, b"Continue? \x07");
        let state = next_json(ws).await;
        assert_eq!(state["type"], "state");
        assert_eq!(state["waiting"], true);
    }

    second.send(Message::Text("y\r".to_string())).await.unwrap();
    for ws in [&mut first, &mut second] {
        let state = next_json(ws).await;
        assert_eq!(state["type"], "state");
        assert_eq!(state["waiting"], false);
    }
}

#[tokio::test]
async fn test_deleted_session_closes_connection() {
    let temp_dir = tempfile::tempdir().unwrap();
    let backend = MemoryBackend::new();
    let (addr, registry) = start(temp_dir.path(), &backend).await;

    let mut ws = connect(addr, "").await;
    let id = next_json(&mut ws).await["id"].as_str().unwrap().to_string();

    registry.delete_by_id(&id).await.unwrap();
    expect_closed(&mut ws).await;
    assert!(backend.last().unwrap().is_killed());
}

#[tokio::test]
async fn test_process_exit_is_reported() {
    let temp_dir = tempfile::tempdir().unwrap();
    let backend = MemoryBackend::new();
    let (addr, registry) = start(temp_dir.path(), &backend).await;

    let mut ws = connect(addr, "").await;
    let id = next_json(&mut ws).await["id"].as_str().unwrap().to_string();

    backend.last().unwrap().exit(Some(3));
    let msg = next_json(&mut ws).await;
    assert_eq!(msg["type"], "exit");
    assert_eq!(msg["id"], id.as_str());
    assert_eq!(msg["code"], 3);
    expect_closed(&mut ws).await;
    assert!(registry.get(&id).await.is_none());
}

#[tokio::test]
async fn test_connect_after_shutdown_reports_error() {
    let temp_dir = tempfile::tempdir().unwrap();
    let backend = MemoryBackend::new();
    let (addr, registry) = start(temp_dir.path(), &backend).await;
    registry.shutdown().await;

    let mut ws = connect(addr, "new=1").await;
    let msg = next_json(&mut ws).await;
    assert_eq!(msg["type"], "error");
    expect_closed(&mut ws).await;
    assert_eq!(backend.spawn_count(), 0);
}
