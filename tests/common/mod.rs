//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use scoped_server::config::ServerConfig;
use scoped_server::http::ServerBuilder;
use scoped_server::lifecycle::Shutdown;
use tokio::task::JoinHandle;

/// A server running on a background task.
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<()>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for the server task to finish.
    pub async fn stop(self) {
        self.shutdown.trigger();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.handle).await;
    }
}

/// Config with access logging off and a short shutdown grace period.
pub fn test_config(addr: SocketAddr) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.bind_address = addr.to_string();
    config.observability.access_log = false;
    config.http.shutdown_timeout_secs = 1;
    config
}

/// Build and start the server on its configured bind address.
pub async fn start_server(builder: ServerBuilder) -> TestServer {
    let addr: SocketAddr = builder.config().listener.bind_address.parse().unwrap();
    let server = builder.build().unwrap();
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();

    let shutdown = Shutdown::new();
    let mut signal = shutdown.subscribe();
    let handle = tokio::spawn(async move {
        let _ = server
            .run(listener, async move {
                let _ = signal.recv().await;
            })
            .await;
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    TestServer {
        addr,
        shutdown,
        handle,
    }
}

/// A client that never reuses connections between tests.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
