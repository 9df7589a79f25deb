//! Employee chat socket end-to-end over a real listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arabica_core::SystemClock;
use arabica_core::config::ArabicaConfig;
use arabica_gateway::{AppState, serve};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Server {
    _dir: tempfile::TempDir,
    addr: SocketAddr,
    state: Arc<AppState>,
}

async fn start_server(heartbeat: Duration, timeout: Duration) -> Server {
    let dir = tempfile::tempdir().unwrap();
    let mut state = AppState::with_data_dir(&ArabicaConfig::default(), dir.path(), Arc::new(SystemClock)).unwrap();
    state.heartbeat = heartbeat;
    state.connection_timeout = timeout;
    let state = Arc::new(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, state.clone(), std::future::pending()));
    Server { _dir: dir, addr, state }
}

async fn connect(addr: SocketAddr, query: &str) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/ws/employee-chat{query}")).await.unwrap();
    client
}

/// Next JSON event, skipping transport frames.
async fn next_event(client: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for an event")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn send(client: &mut Client, json: &str) {
    client.send(Message::Text(json.into())).await.unwrap();
}

#[tokio::test]
async fn test_presence_and_typing_over_socket() {
    let server = start_server(Duration::from_secs(30), Duration::from_secs(60)).await;

    let mut anna = connect(server.addr, "?phone=%2B79001").await;
    let hello = next_event(&mut anna).await;
    assert_eq!(hello["type"], "connected");
    assert_eq!(hello["identity"], "79001");

    let mut boris = connect(server.addr, "?phone=79002").await;
    assert_eq!(next_event(&mut boris).await["type"], "connected");

    let online = next_event(&mut anna).await;
    assert_eq!(online["type"], "online_status");
    assert_eq!(online["identity"], "79002");
    assert_eq!(online["isOnline"], true);

    send(&mut boris, r#"{"type":"typing_start","chatId":"c1"}"#).await;
    let typing = next_event(&mut anna).await;
    assert_eq!(typing["type"], "typing");
    assert_eq!(typing["chatId"], "c1");
    assert_eq!(typing["isTyping"], true);

    send(&mut anna, r#"{"type":"get_online_users"}"#).await;
    let list = next_event(&mut anna).await;
    assert_eq!(list["type"], "online_users_list");
    assert_eq!(list["users"].as_array().unwrap().len(), 2);

    // Dropping the connection mid-typing clears the indicator before going offline.
    boris.close(None).await.unwrap();
    let stopped = next_event(&mut anna).await;
    assert_eq!(stopped["type"], "typing");
    assert_eq!(stopped["isTyping"], false);
    let offline = next_event(&mut anna).await;
    assert_eq!(offline["type"], "online_status");
    assert_eq!(offline["isOnline"], false);

    assert!(!server.state.presence.is_typing("79002", "c1"));
    assert!(!server.state.presence.is_online("79002"));
}

#[tokio::test]
async fn test_ping_message_gets_pong() {
    let server = start_server(Duration::from_secs(30), Duration::from_secs(60)).await;
    let mut client = connect(server.addr, "?phone=79003").await;
    next_event(&mut client).await;

    send(&mut client, r#"{"type":"ping"}"#).await;
    assert_eq!(next_event(&mut client).await["type"], "pong");

    // Garbage is ignored, the socket stays usable.
    send(&mut client, "not json").await;
    send(&mut client, r#"{"type":"ping"}"#).await;
    assert_eq!(next_event(&mut client).await["type"], "pong");
}

#[tokio::test]
async fn test_missing_identity_closes_with_4001() {
    let server = start_server(Duration::from_secs(30), Duration::from_secs(60)).await;
    let mut client = connect(server.addr, "").await;

    let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match frame {
        Message::Close(Some(close)) => {
            assert_eq!(u16::from(close.code), 4001);
            assert_eq!(close.reason, "Phone required");
        }
        other => panic!("expected close frame, got {other:?}"),
    }
    assert_eq!(server.state.presence.connection_count(), 0);
}

#[tokio::test]
async fn test_silent_client_is_reaped() {
    let server = start_server(Duration::from_millis(100), Duration::from_millis(250)).await;

    let mut watcher = connect(server.addr, "?phone=79010").await;
    next_event(&mut watcher).await;

    // Never polled, so transport pings are never answered.
    let _silent = connect(server.addr, "?phone=79011").await;
    let online = next_event(&mut watcher).await;
    assert_eq!(online["identity"], "79011");
    assert_eq!(online["isOnline"], true);

    let offline = next_event(&mut watcher).await;
    assert_eq!(offline["type"], "online_status");
    assert_eq!(offline["identity"], "79011");
    assert_eq!(offline["isOnline"], false);

    // The watcher keeps answering pings and survives.
    assert!(server.state.presence.is_online("79010"));
}

#[tokio::test]
async fn test_silent_client_is_reaped_before_next_heartbeat() {
    let heartbeat = Duration::from_secs(10);
    let server = start_server(heartbeat, Duration::from_millis(300)).await;
    let started = tokio::time::Instant::now();

    let _silent = connect(server.addr, "?phone=79012").await;
    let presence = server.state.presence.clone();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !presence.is_online("79012") {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        while presence.is_online("79012") {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("silent client should be dropped once the pong deadline passes");

    assert!(started.elapsed() < heartbeat);
}
