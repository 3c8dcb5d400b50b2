//! End-to-end tests: a real server on an ephemeral port, driven over TCP.

use bytes::Bytes;
use nimbuskv::client::Client;
use nimbuskv::config::ServerConfig;
use nimbuskv::protocol::{Value, MAX_FRAME_SIZE};
use nimbuskv::server::{Server, ShutdownHandle};
use std::net::SocketAddr;
use std::thread;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

struct TestServer {
    addr: SocketAddr,
    shutdown: ShutdownHandle,
    thread: Option<thread::JoinHandle<()>>,
}

impl TestServer {
    fn start() -> Self {
        Self::with_config(ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..ServerConfig::default()
        })
    }

    fn with_config(config: ServerConfig) -> Self {
        let mut server = Server::bind(config).unwrap();
        let addr = server.local_addr();
        let shutdown = server.shutdown_handle();
        let thread = thread::spawn(move || server.run().unwrap());
        Self {
            addr,
            shutdown,
            thread: Some(thread),
        }
    }

    async fn client(&self) -> Client {
        Client::connect(self.addr).await.unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.shutdown.shutdown();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn strings(values: &[&str]) -> Value {
    Value::array(
        values
            .iter()
            .map(|s| Value::string(Bytes::from(s.to_string())))
            .collect(),
    )
}

fn null() -> Value {
    Value::array(vec![Value::error("null")])
}

/// Reads until the server closes the connection, with a deadline.
async fn expect_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    let read = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .expect("server did not close the connection");
    match read {
        Ok(n) => assert_eq!(n, 0, "expected EOF, got {} bytes", n),
        Err(e) => assert!(
            matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe
            ),
            "unexpected error: {}",
            e
        ),
    }
}

#[tokio::test]
async fn test_set_then_get() {
    let server = TestServer::start();
    let mut client = server.client().await;

    assert_eq!(client.request(&["set", "a", "1"]).await.unwrap(), Value::Nil);
    assert_eq!(client.request(&["get", "a"]).await.unwrap(), strings(&["1"]));
}

#[tokio::test]
async fn test_key_expires_after_ttl() {
    let server = TestServer::start();
    let mut client = server.client().await;

    client.request(&["set", "a", "1", "100"]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(client.request(&["get", "a"]).await.unwrap(), null());
}

#[tokio::test]
async fn test_expire_extends_ttl() {
    let server = TestServer::start();
    let mut client = server.client().await;

    client.request(&["set", "a", "1", "100"]).await.unwrap();
    assert_eq!(
        client.request(&["expire", "a", "500"]).await.unwrap(),
        Value::Nil
    );
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(client.request(&["get", "a"]).await.unwrap(), strings(&["1"]));
}

#[tokio::test]
async fn test_persist_cancels_ttl() {
    let server = TestServer::start();
    let mut client = server.client().await;

    client.request(&["set", "a", "1", "100"]).await.unwrap();
    assert_eq!(client.request(&["persist", "a"]).await.unwrap(), Value::Nil);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(client.request(&["get", "a"]).await.unwrap(), strings(&["1"]));
}

#[tokio::test]
async fn test_del_then_get() {
    let server = TestServer::start();
    let mut client = server.client().await;

    client.request(&["set", "a", "1"]).await.unwrap();
    assert_eq!(client.request(&["del", "a"]).await.unwrap(), Value::Nil);
    assert_eq!(client.request(&["get", "a"]).await.unwrap(), null());
    assert_eq!(
        client.request(&["del", "a"]).await.unwrap(),
        Value::error("key not found")
    );
}

#[tokio::test]
async fn test_application_errors_keep_connection_open() {
    let server = TestServer::start();
    let mut client = server.client().await;

    assert_eq!(
        client.request(&["set", "a", "1", "-1"]).await.unwrap(),
        Value::error("ttl cannot be negative")
    );
    assert_eq!(
        client.request(&["expire", "missing", "10"]).await.unwrap(),
        Value::error("key not found")
    );
    assert_eq!(
        client.request(&["flush"]).await.unwrap(),
        Value::error("invalid command")
    );
    assert_eq!(client.request(&["set", "a", "1"]).await.unwrap(), Value::Nil);
}

#[tokio::test]
async fn test_keys_are_shared_between_connections() {
    let server = TestServer::start();
    let mut writer = server.client().await;
    let mut reader = server.client().await;

    writer.request(&["set", "shared", "yes"]).await.unwrap();
    assert_eq!(
        reader.request(&["get", "shared", "other"]).await.unwrap(),
        Value::array(vec![Value::string(Bytes::from("yes")), Value::error("null")])
    );
}

#[tokio::test]
async fn test_pipelined_requests() {
    let server = TestServer::start();
    let mut client = server.client().await;

    for i in 0..50 {
        let key = format!("k{}", i);
        let value = format!("v{}", i);
        client.send(&["set", key.as_str(), value.as_str()]).await.unwrap();
        client.send(&["get", key.as_str()]).await.unwrap();
    }

    for i in 0..50 {
        assert_eq!(client.read_response().await.unwrap(), Value::Nil);
        assert_eq!(
            client.read_response().await.unwrap(),
            strings(&[format!("v{}", i).as_str()])
        );
    }
}

#[tokio::test]
async fn test_binary_safe_values() {
    let server = TestServer::start();
    let mut client = server.client().await;

    let value: &[u8] = &[0, 159, 146, 150, 0, 255];
    client
        .request(&[&b"set"[..], &b"bin"[..], value])
        .await
        .unwrap();
    assert_eq!(
        client.request(&["get", "bin"]).await.unwrap(),
        Value::array(vec![Value::string(Bytes::copy_from_slice(value))])
    );
}

#[tokio::test]
async fn test_large_value() {
    let server = TestServer::start();
    let mut client = server.client().await;

    let value = "x".repeat(1 << 20);
    client
        .request(&["set", "big", value.as_str()])
        .await
        .unwrap();
    assert_eq!(
        client.request(&["get", "big"]).await.unwrap(),
        strings(&[value.as_str()])
    );
}

#[tokio::test]
async fn test_malformed_frame_closes_connection() {
    let server = TestServer::start();

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    // One-byte payload with an unknown tag
    stream.write_all(&[1, 0, 0, 0, 9]).await.unwrap();
    expect_closed(&mut stream).await;

    // The server itself keeps serving
    let mut client = server.client().await;
    assert_eq!(client.request(&["set", "a", "1"]).await.unwrap(), Value::Nil);
}

#[tokio::test]
async fn test_trailing_bytes_close_connection() {
    let server = TestServer::start();

    let mut payload = strings(&["get", "a"]).encode();
    payload.push(0);
    let mut frame = (payload.len() as u32).to_le_bytes().to_vec();
    frame.extend(payload);

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(&frame).await.unwrap();
    expect_closed(&mut stream).await;
}

#[tokio::test]
async fn test_oversized_frame_closes_connection() {
    let server = TestServer::start();

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(&((MAX_FRAME_SIZE + 1) as u32).to_le_bytes())
        .await
        .unwrap();
    expect_closed(&mut stream).await;
}

#[tokio::test]
async fn test_idle_connection_is_closed() {
    let server = TestServer::with_config(ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        idle_timeout: Duration::from_millis(200),
        ..ServerConfig::default()
    });

    let mut idle = TcpStream::connect(server.addr).await.unwrap();
    let mut active = server.client().await;

    // Keep one connection busy while the other stays silent
    for _ in 0..6 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        active.request(&["get", "a"]).await.unwrap();
    }

    expect_closed(&mut idle).await;
    assert_eq!(active.request(&["set", "a", "1"]).await.unwrap(), Value::Nil);
}

#[tokio::test]
async fn test_default_ttl_applies() {
    let server = TestServer::with_config(ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        default_ttl: Duration::from_millis(100),
        ..ServerConfig::default()
    });
    let mut client = server.client().await;

    client.request(&["set", "a", "1"]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.request(&["get", "a"]).await.unwrap(), null());
}
