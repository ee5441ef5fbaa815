//! 結合テスト共通ヘルパー

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tcp_relay::common::types::BackendTarget;
use tcp_relay::relay::{PairRegistry, RelayStats};
use tcp_relay::transport::LocalTransport;
use tcp_relay::{Config, RelayServer};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A relay serving on an ephemeral loopback port
pub struct TestRelay {
    pub addr: SocketAddr,
    pub stats: Arc<RelayStats>,
    pub registry: PairRegistry,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<tcp_relay::Result<()>>,
}

impl TestRelay {
    pub async fn connect(&self) -> TcpStream {
        TcpStream::connect(self.addr).await.unwrap()
    }

    pub async fn stop(self) -> tcp_relay::Result<()> {
        let _ = self.shutdown.send(());
        self.task.await.unwrap()
    }
}

/// Loopback relay config pointing at `backend`
pub fn relay_config(backend: SocketAddr) -> Config {
    let mut config = Config::new(0, BackendTarget::new(backend.ip().to_string(), backend.port()));
    config.listener.host = "127.0.0.1".to_string();
    config
}

pub async fn start_relay(config: Config) -> TestRelay {
    let server = RelayServer::bind(Arc::new(config), Arc::new(LocalTransport))
        .await
        .unwrap();
    let (shutdown, stop) = oneshot::channel::<()>();

    let addr = server.local_addr();
    let stats = server.stats();
    let registry = server.registry();
    let task = tokio::spawn(server.serve(async move {
        let _ = stop.await;
    }));

    TestRelay {
        addr,
        stats,
        registry,
        shutdown,
        task,
    }
}

/// Echo every byte back, then close once the peer has finished sending
pub async fn echo<S: AsyncRead + AsyncWrite + Unpin>(stream: S) {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let _ = tokio::io::copy(&mut reader, &mut writer).await;
    let _ = writer.shutdown().await;
}

pub async fn spawn_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(echo(stream));
        }
    });
    addr
}

/// A loopback port with nothing listening on it
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Poll `check` until it holds or five seconds pass
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
