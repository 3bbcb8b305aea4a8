//! Shared utilities for integration testing.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use admission_gateway::config::{GatewayConfig, UpstreamConfig};
use admission_gateway::lifecycle::Shutdown;
use admission_gateway::{AdmissionPipeline, HttpServer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Start a programmable mock backend on an ephemeral port.
///
/// Returns its address and a counter of requests it has answered.
#[allow(dead_code)]
pub async fn start_programmable_backend<F, Fut>(f: F) -> (SocketAddr, Arc<AtomicUsize>)
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let f = Arc::new(f);

    let counter = calls.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            let counter = counter.clone();
            tokio::spawn(async move {
                read_request_head(&mut socket).await;
                counter.fetch_add(1, Ordering::SeqCst);

                let (status, body) = f().await;
                let response = format!(
                    "HTTP/1.1 {} Mock\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, calls)
}

/// Start a mock backend that always answers with `status`.
#[allow(dead_code)]
pub async fn start_mock_backend(status: u16) -> (SocketAddr, Arc<AtomicUsize>) {
    start_programmable_backend(move || async move { (status, "mock".to_string()) }).await
}

async fn read_request_head(socket: &mut tokio::net::TcpStream) {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

/// Config with one upstream group per `(group, prefix, backend)`.
#[allow(dead_code)]
pub fn config_with(upstreams: &[(&str, &str, SocketAddr)]) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    for (group, prefix, addr) in upstreams {
        config.upstreams.push(UpstreamConfig {
            group: group.to_string(),
            path_prefix: prefix.to_string(),
            address: addr.to_string(),
        });
    }
    config
}

/// A running gateway bound to an ephemeral port.
#[allow(dead_code)]
pub struct TestGateway {
    pub addr: SocketAddr,
    pub pipeline: Arc<AdmissionPipeline>,
    pub shutdown: Shutdown,
}

#[allow(dead_code)]
impl TestGateway {
    pub async fn start(config: GatewayConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Shutdown::new();

        let server = HttpServer::new(config);
        let pipeline = server.pipeline().clone();
        let rx = shutdown.subscribe();
        tokio::spawn(async move {
            let _ = server.run(listener, rx).await;
        });

        Self {
            addr,
            pipeline,
            shutdown,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

#[allow(dead_code)]
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
