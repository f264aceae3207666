//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use replay_proxy::config::ProxyConfig;
use replay_proxy::net::{FixedDestination, Listener};
use replay_proxy::{Archive, ProxyServer, Shutdown};

/// Response the mock origin gives for `path`.
pub fn response_for(path: &str) -> String {
    let body = format!("origin says {path}");
    format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: text/plain\r\n\r\n{}",
        body.len(),
        body
    )
}

pub fn get(path: &str) -> String {
    format!("GET {path} HTTP/1.1\r\nHost: origin.test\r\nAccept: */*\r\n\r\n")
}

/// Keep-alive origin that answers every bodiless request, counting them.
pub struct MockOrigin {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl MockOrigin {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

pub async fn start_origin(delay: Duration) -> MockOrigin {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = hits.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(serve_origin(socket, counter.clone(), delay));
        }
    });

    MockOrigin { addr, hits }
}

async fn serve_origin(mut socket: TcpStream, hits: Arc<AtomicUsize>, delay: Duration) {
    let mut pending = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        while let Some(end) = pending.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&pending[..end]).to_string();
            pending.drain(..end + 4);
            let path = head.split(' ').nth(1).unwrap_or("/").to_string();
            hits.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            if socket.write_all(response_for(&path).as_bytes()).await.is_err() {
                return;
            }
        }
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => pending.extend_from_slice(&chunk[..n]),
        }
    }
}

pub struct RunningProxy {
    pub addr: SocketAddr,
    pub archive: Arc<Archive>,
    pub shutdown: Arc<Shutdown>,
    pub task: JoinHandle<()>,
}

/// Run a proxy that sends every connection to `origin`.
pub async fn start_proxy(origin: SocketAddr, mut config: ProxyConfig) -> RunningProxy {
    config.listener.bind_address = "127.0.0.1:0".into();
    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = ProxyServer::new(&config)
        .unwrap()
        .with_resolver(FixedDestination(origin));
    let archive = server.archive();
    let shutdown = Arc::new(Shutdown::new());
    let stop = shutdown.subscribe();

    let task = tokio::spawn(async move {
        server.run(listener, stop).await.unwrap();
    });

    RunningProxy {
        addr,
        archive,
        shutdown,
        task,
    }
}

/// Send `request` and read exactly `expected_len` bytes back.
pub async fn exchange(stream: &mut TcpStream, request: &str, expected_len: usize) -> String {
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut buf = vec![0u8; expected_len];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .expect("response timed out")
        .unwrap();
    String::from_utf8(buf).unwrap()
}
