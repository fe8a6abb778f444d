//! End-to-end tests against a live server on an ephemeral port.

use respite::commands::CommandHandler;
use respite::config::Config;
use respite::connection::ConnectionStats;
use respite::server::{Server, ServerError, ServerHandle};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const PING: &[u8] = b"*1\r\n$4\r\nPING\r\n";
const PONG: &[u8] = b"+PONG\r\n";
const IO_TIMEOUT: Duration = Duration::from_secs(10);

struct TestServer {
    addr: SocketAddr,
    handle: ServerHandle,
    stats: Arc<ConnectionStats>,
    thread: Option<JoinHandle<Result<(), ServerError>>>,
}

impl TestServer {
    fn start() -> Self {
        Self::start_with(Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Config::default()
        })
    }

    fn start_with(config: Config) -> Self {
        let server = Server::bind(&config, CommandHandler::new()).unwrap();
        let addr = server.local_addr();
        let handle = server.handle();
        let stats = server.stats();
        let thread = std::thread::spawn(move || server.run());
        Self {
            addr,
            handle,
            stats,
            thread: Some(thread),
        }
    }

    async fn connect(&self) -> TcpStream {
        timeout(IO_TIMEOUT, TcpStream::connect(self.addr))
            .await
            .unwrap()
            .unwrap()
    }

    fn stop(mut self) -> Result<(), ServerError> {
        self.handle.shutdown().unwrap();
        self.thread.take().unwrap().join().unwrap()
    }

    async fn wait_for_active(&self, expected: u64) {
        let stats = Arc::clone(&self.stats);
        timeout(IO_TIMEOUT, async move {
            while stats.active_connections.load(Ordering::Relaxed) != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.handle.shutdown();
            let _ = thread.join();
        }
    }
}

async fn read_exactly(client: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    timeout(IO_TIMEOUT, client.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    buf
}

/// Reads until the server closes the connection.
async fn read_until_closed(client: &mut TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match timeout(IO_TIMEOUT, client.read(&mut buf)).await.unwrap() {
            Ok(0) | Err(_) => return out,
            Ok(n) => out.extend_from_slice(&buf[..n]),
        }
    }
}

#[tokio::test]
async fn test_ping_pong() {
    let server = TestServer::start();
    let mut client = server.connect().await;

    client.write_all(PING).await.unwrap();
    assert_eq!(read_exactly(&mut client, PONG.len()).await, PONG);
}

#[tokio::test]
async fn test_any_command_gets_pong() {
    let server = TestServer::start();
    let mut client = server.connect().await;

    client
        .write_all(b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$5\r\nvalue\r\n")
        .await
        .unwrap();
    assert_eq!(read_exactly(&mut client, PONG.len()).await, PONG);
}

#[tokio::test]
async fn test_pipelined_commands_in_order() {
    let server = TestServer::start();
    let mut client = server.connect().await;

    client
        .write_all(b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPING\r\n")
        .await
        .unwrap();
    assert_eq!(read_exactly(&mut client, 14).await, b"+PONG\r\n+PONG\r\n");
}

#[tokio::test]
async fn test_fragmented_frame() {
    let server = TestServer::start();
    let mut client = server.connect().await;

    client.write_all(b"*1\r\n$4\r").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.write_all(b"\nPI").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.write_all(b"NG\r\n").await.unwrap();

    assert_eq!(read_exactly(&mut client, PONG.len()).await, PONG);
}

#[tokio::test]
async fn test_large_argument_spans_reads() {
    let server = TestServer::start();
    let mut client = server.connect().await;

    let payload = vec![b'x'; 200 * 1024];
    let mut frame = format!("*2\r\n$4\r\nECHO\r\n${}\r\n", payload.len()).into_bytes();
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(b"\r\n");

    client.write_all(&frame).await.unwrap();
    assert_eq!(read_exactly(&mut client, PONG.len()).await, PONG);
}

#[tokio::test]
async fn test_non_command_frame_keeps_connection() {
    let server = TestServer::start();
    let mut client = server.connect().await;

    client.write_all(b"+hello\r\n").await.unwrap();
    let expected = b"-ERR Protocol error: expected array of bulk strings\r\n";
    assert_eq!(read_exactly(&mut client, expected.len()).await, expected);

    client.write_all(PING).await.unwrap();
    assert_eq!(read_exactly(&mut client, PONG.len()).await, PONG);
}

#[tokio::test]
async fn test_protocol_error_closes_only_offender() {
    let server = TestServer::start();
    let mut bad = server.connect().await;
    let mut good = server.connect().await;

    bad.write_all(b"!oops\r\n").await.unwrap();
    let reply = read_until_closed(&mut bad).await;
    assert!(
        reply.starts_with(b"-ERR Protocol error:"),
        "unexpected reply: {:?}",
        String::from_utf8_lossy(&reply)
    );

    good.write_all(PING).await.unwrap();
    assert_eq!(read_exactly(&mut good, PONG.len()).await, PONG);
    assert_eq!(server.stats.protocol_errors.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_replies_before_protocol_error_are_sent() {
    let server = TestServer::start();
    let mut client = server.connect().await;

    client.write_all(b"*1\r\n$4\r\nPING\r\n:12a\r\n").await.unwrap();
    let reply = read_until_closed(&mut client).await;
    assert!(reply.starts_with(b"+PONG\r\n-ERR Protocol error:"));
}

#[tokio::test]
async fn test_client_disconnect_releases_connection() {
    let server = TestServer::start();
    let mut client = server.connect().await;

    client.write_all(PING).await.unwrap();
    read_exactly(&mut client, PONG.len()).await;
    server.wait_for_active(1).await;

    client.write_all(b"*1\r\n$4\r\nPI").await.unwrap();
    drop(client);
    server.wait_for_active(0).await;

    // The loop keeps serving new clients.
    let mut next = server.connect().await;
    next.write_all(PING).await.unwrap();
    assert_eq!(read_exactly(&mut next, PONG.len()).await, PONG);
}

#[tokio::test]
async fn test_many_clients() {
    let server = TestServer::start();
    let mut tasks = Vec::new();

    for _ in 0..50 {
        let mut client = server.connect().await;
        tasks.push(tokio::spawn(async move {
            for _ in 0..10 {
                client.write_all(PING).await.unwrap();
                assert_eq!(read_exactly(&mut client, PONG.len()).await, PONG);
            }
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(server.stats.connections_accepted.load(Ordering::Relaxed), 50);
    assert_eq!(server.stats.commands_processed.load(Ordering::Relaxed), 500);
}

#[tokio::test]
async fn test_slow_reader_gets_every_reply() {
    let server = TestServer::start_with(Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        output_high_watermark: 4096,
        ..Config::default()
    });
    let client = server.connect().await;
    let (mut reader, mut writer) = client.into_split();

    const COUNT: usize = 100_000;
    let writer_task = tokio::spawn(async move {
        let batch = PING.repeat(1000);
        for _ in 0..COUNT / 1000 {
            writer.write_all(&batch).await.unwrap();
        }
        writer
    });

    // Let output pile up before reading anything.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut replies = vec![0u8; COUNT * PONG.len()];
    timeout(IO_TIMEOUT, reader.read_exact(&mut replies))
        .await
        .unwrap()
        .unwrap();
    assert!(replies.chunks(PONG.len()).all(|reply| reply == PONG));

    let _writer = writer_task.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_clients() {
    let server = TestServer::start();
    let mut client = server.connect().await;
    client.write_all(PING).await.unwrap();
    read_exactly(&mut client, PONG.len()).await;

    let stats = Arc::clone(&server.stats);
    server.stop().unwrap();

    assert!(read_until_closed(&mut client).await.is_empty());
    assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
}
