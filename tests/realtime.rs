use futures::{SinkExt, StreamExt};
use group_chat::api::{build_router, AppState};
use group_chat::config::Config;
use std::net::{SocketAddr, TcpListener};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server() -> (SocketAddr, JoinHandle<()>, AppState, tempfile::TempDir) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let config = Config {
        bind: addr.to_string(),
        data_dir: tmp.path().to_path_buf(),
        max_upload_mb: 2,
        logging_enabled: false,
    };
    let state = AppState::new(config).await.unwrap();
    let app = build_router(state.clone());
    let server = tokio::spawn(async move {
        axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service())
            .await
            .unwrap();
    });
    (addr, server, state, tmp)
}

async fn connect_ws(addr: &SocketAddr) -> WsClient {
    let (ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    ws
}

/// Next JSON frame from the socket, panicking after a generous timeout.
async fn next_frame(ws: &mut WsClient) -> serde_json::Value {
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .unwrap()
            .unwrap();
        if let WsMessage::Text(txt) = msg {
            return serde_json::from_str(&txt).unwrap();
        }
    }
}

fn send_text(user: &str, text: &str) -> WsMessage {
    WsMessage::Text(serde_json::json!({ "user": user, "text": text }).to_string())
}

#[tokio::test]
async fn history_then_live_with_self_echo() {
    let (addr, server, _state, _tmp) = spawn_server().await;

    let mut alice = connect_ws(&addr).await;
    let snapshot = next_frame(&mut alice).await;
    assert_eq!(snapshot, serde_json::json!([]));

    alice.send(send_text("Alice", "hello")).await.unwrap();
    let echo = next_frame(&mut alice).await;
    assert_eq!(echo["user"], "Alice");
    assert_eq!(echo["text"], "hello");
    assert!(echo["image_url"].is_null());
    assert_eq!(echo["timestamp"].as_str().unwrap().len(), 19);

    // a later joiner gets the transcript first
    let mut bob = connect_ws(&addr).await;
    let snapshot = next_frame(&mut bob).await;
    assert_eq!(snapshot.as_array().unwrap().len(), 1);
    assert_eq!(snapshot[0]["text"], "hello");

    alice.send(send_text("Alice", "again")).await.unwrap();
    for ws in [&mut alice, &mut bob] {
        let frame = next_frame(ws).await;
        assert_eq!(frame["text"], "again");
    }

    server.abort();
}

#[tokio::test]
async fn whitespace_only_text_vanishes() {
    let (addr, server, _state, _tmp) = spawn_server().await;

    let mut alice = connect_ws(&addr).await;
    next_frame(&mut alice).await; // snapshot

    alice.send(send_text("Alice", "   ")).await.unwrap();
    assert!(timeout(Duration::from_millis(300), alice.next())
        .await
        .is_err());

    let history: serde_json::Value = reqwest::get(format!("http://{}/history", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history, serde_json::json!([]));

    server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_are_observed_in_persisted_order() {
    let (addr, server, _state, _tmp) = spawn_server().await;

    let mut observer = connect_ws(&addr).await;
    next_frame(&mut observer).await; // snapshot

    let mut writers = Vec::new();
    for w in 0..2 {
        let addr = addr;
        writers.push(tokio::spawn(async move {
            let mut ws = connect_ws(&addr).await;
            next_frame(&mut ws).await;
            for i in 0..10 {
                ws.send(send_text(&format!("w{w}"), &format!("w{w}-{i}")))
                    .await
                    .unwrap();
            }
            // hold the socket open until the own final echo arrives, so
            // every submission was processed before this writer goes away
            loop {
                let frame = next_frame(&mut ws).await;
                if frame["text"] == format!("w{w}-9") {
                    break;
                }
            }
        }));
    }
    for writer in writers {
        writer.await.unwrap();
    }

    let mut observed = Vec::new();
    for _ in 0..20 {
        let frame = next_frame(&mut observer).await;
        observed.push(frame["text"].as_str().unwrap().to_string());
    }

    let history: serde_json::Value = reqwest::get(format!("http://{}/history", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let persisted: Vec<String> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["text"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(observed, persisted);

    server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn joining_mid_stream_misses_and_duplicates_nothing() {
    let (addr, server, state, _tmp) = spawn_server().await;

    let writer = {
        let coordinator = state.coordinator.clone();
        tokio::spawn(async move {
            for i in 0..30 {
                coordinator
                    .submit_text(None, &format!("m{i}"))
                    .await
                    .unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    let mut late = connect_ws(&addr).await;
    writer.await.unwrap();

    let mut seen = Vec::new();
    let snapshot = next_frame(&mut late).await;
    for record in snapshot.as_array().unwrap() {
        seen.push(record["text"].as_str().unwrap().to_string());
    }
    while seen.len() < 30 {
        let frame = next_frame(&mut late).await;
        seen.push(frame["text"].as_str().unwrap().to_string());
    }

    let expected: Vec<String> = (0..30).map(|i| format!("m{i}")).collect();
    assert_eq!(seen, expected);

    server.abort();
}
