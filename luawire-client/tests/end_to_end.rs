//! Client against a scripted Lua host over real TCP.

use luawire_client::{
    Client, ClientError, ConnectionConfig, ConnectionState, ErrorKind, NoWait, ReadySignal,
};
use luawire_protocol::{Command, CommandDecoder};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// What the fake host knows how to evaluate.
fn evaluate(cmd: &Command) -> Value {
    match cmd.code.as_str() {
        "return 2+2" => json!({"reply_id": cmd.id, "result": 4, "error": null, "timeout": false}),
        "return 1/0" => json!({
            "reply_id": cmd.id,
            "result": null,
            "error": "[string \"return 1/0\"]:1: attempt to perform arithmetic on a nil value",
            "timeout": false
        }),
        "while true do end" => json!({"reply_id": cmd.id, "result": 7, "timeout": true}),
        code => json!({"reply_id": cmd.id, "result": code, "timeout": false}),
    }
}

async fn serve_connection(mut stream: TcpStream) {
    // An event before any reply; clients must not mistake it for one.
    let _ = stream.write_all(br#"{"event":"hello"} "#).await;

    let mut decoder = CommandDecoder::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        decoder.extend(&buf[..n]);
        while let Ok(Some(cmd)) = decoder.decode_command() {
            if cmd.code == "hangup" {
                return;
            }
            let mut reply = serde_json::to_vec(&evaluate(&cmd)).unwrap();
            reply.push(b'\n');
            if stream.write_all(&reply).await.is_err() {
                return;
            }
        }
    }
}

async fn spawn_host_on(listener: TcpListener) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_connection(stream));
        }
    })
}

async fn start_host() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (addr, spawn_host_on(listener).await)
}

fn unused_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

fn config_for(addr: SocketAddr) -> ConnectionConfig {
    ConnectionConfig::new(addr.ip().to_string(), addr.port())
}

/// Starts the host when asked, like a player launched on demand.
struct LaunchHost {
    addr: SocketAddr,
    calls: AtomicUsize,
}

impl ReadySignal for LaunchHost {
    async fn wait_ready(&self) -> Result<(), ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let listener = TcpListener::bind(self.addr).await?;
        spawn_host_on(listener).await;
        Ok(())
    }
}

#[tokio::test]
async fn test_connect_self_test_and_execute() {
    let (addr, _host) = start_host().await;
    let client = Client::new(config_for(addr));

    client.connect(&NoWait).await.unwrap();
    assert!(client.is_connected());

    let reply = client.execute("return 2+2").await.unwrap();
    assert_eq!(reply.result(), &json!(4));

    client.close().await;
    assert_eq!(client.state(), ConnectionState::NotConnected);
}

#[tokio::test]
async fn test_remote_error_is_reported_to_caller() {
    let (addr, _host) = start_host().await;
    let client = Client::new(config_for(addr));
    client.connect(&NoWait).await.unwrap();

    match client.execute("return 1/0").await {
        Err(ClientError::RemoteError { command, message }) => {
            assert_eq!(command, "return 1/0");
            assert!(message.contains("attempt to perform arithmetic"));
        }
        other => panic!("expected RemoteError, got {:?}", other),
    }

    // The connection survives a failed command.
    assert!(client.is_connected());
    client.test_connection().await.unwrap();
}

#[tokio::test]
async fn test_remote_timeout_wins_over_result() {
    let (addr, _host) = start_host().await;
    let client = Client::new(config_for(addr));
    client.connect(&NoWait).await.unwrap();

    let err = client.execute("while true do end").await.unwrap_err();
    assert!(matches!(err, ClientError::RemoteTimeout { .. }));
    assert_eq!(err.kind(), ErrorKind::Protocol);
}

#[tokio::test]
async fn test_concurrent_requests_share_one_connection() {
    let (addr, _host) = start_host().await;
    let client = Arc::new(Client::new(config_for(addr)));
    client.connect(&NoWait).await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..32 {
        let client = Arc::clone(&client);
        tasks.push(tokio::spawn(async move {
            let code = format!("return {}", i);
            let reply = client.execute(&code).await.unwrap();
            assert_eq!(reply.result(), &json!(code));
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(client.connection().unwrap().pending_count(), 0);
}

#[tokio::test]
async fn test_events_reach_subscribers() {
    let (addr, _host) = start_host().await;
    let client = Client::new(config_for(addr));
    let mut events = client.subscribe_events();

    client.connect(&NoWait).await.unwrap();
    assert_eq!(events.recv().await.unwrap(), json!({"event": "hello"}));
}

#[tokio::test]
async fn test_host_hangup_cancels_waiters() {
    let (addr, _host) = start_host().await;
    let client = Client::new(config_for(addr));
    client.connect(&NoWait).await.unwrap();

    let first = client.issue_request("return 'a'").await.unwrap();
    let hangup = client.issue_request("hangup").await.unwrap();
    let waiting = client.issue_request("return 'never'").await.unwrap();

    // The host answers what it read before the hangup.
    let _ = first.await;
    assert!(matches!(hangup.await, Err(ClientError::Cancelled { .. })));
    assert!(matches!(waiting.await, Err(ClientError::Cancelled { .. })));

    client.closed().await;
    assert_eq!(client.state(), ConnectionState::ReadFailed);
    let err = client.execute("return 2+2").await.unwrap_err();
    assert!(matches!(err, ClientError::ConnectionFailed(_)));
}

#[tokio::test]
async fn test_refused_then_ready_retries_once() {
    let addr = unused_addr();
    let launcher = LaunchHost {
        addr,
        calls: AtomicUsize::new(0),
    };

    let client = Client::new(config_for(addr));
    client.connect(&launcher).await.unwrap();
    assert_eq!(launcher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        client.execute("return 2+2").await.unwrap().result(),
        &json!(4)
    );
}

#[tokio::test]
async fn test_second_refusal_propagates() {
    let addr = unused_addr();
    let client = Client::new(config_for(addr));

    let err = client.connect(&NoWait).await.unwrap_err();
    assert!(matches!(err, ClientError::Refused { .. }));
    assert!(err.is_retryable());
    assert_eq!(client.state(), ConnectionState::NotConnected);
}

#[tokio::test]
async fn test_reconnect_after_hangup() {
    let (addr, _host) = start_host().await;
    let client = Client::new(config_for(addr));
    client.connect(&NoWait).await.unwrap();

    let _ = client.issue_request("hangup").await.unwrap().await;
    client.closed().await;
    assert!(!client.is_connected());

    // A fresh attempt by the caller; nothing reconnects on its own.
    client.connect(&NoWait).await.unwrap();
    client.test_connection().await.unwrap();
}
