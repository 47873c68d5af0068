//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use api_gateway::config::{AuthModeConfig, GatewayConfig, ServiceConfig};
use api_gateway::lifecycle::Shutdown;
use api_gateway::GatewayServer;

/// Start a mock backend that returns a fixed 200 response. Binds an
/// ephemeral port and returns its address.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    start_programmable_backend(move || async move { (200, response.to_string()) }).await
}

/// Start a programmable mock backend; the closure decides status and body
/// per request.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        // Drain the request head before answering.
                        let mut buf = [0u8; 8192];
                        let _ = socket.read(&mut buf).await;

                        let (status, body) = f().await;
                        let status_text = match status {
                            200 => "200 OK",
                            201 => "201 Created",
                            404 => "404 Not Found",
                            429 => "429 Too Many Requests",
                            500 => "500 Internal Server Error",
                            502 => "502 Bad Gateway",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };
                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Start a backend that echoes the value of one request header as the
/// response body ("-" when absent).
pub async fn start_header_echo_backend(header: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut head = Vec::new();
                        let mut buf = [0u8; 1024];
                        loop {
                            match socket.read(&mut buf).await {
                                Ok(0) => break,
                                Ok(n) => {
                                    head.extend_from_slice(&buf[..n]);
                                    if head.windows(4).any(|w| w == b"\r\n\r\n") {
                                        break;
                                    }
                                }
                                Err(_) => return,
                            }
                        }
                        let head = String::from_utf8_lossy(&head);
                        let wanted = format!("{}:", header.to_lowercase());
                        let value = head
                            .lines()
                            .find(|line| line.to_lowercase().starts_with(&wanted))
                            .and_then(|line| line.split_once(':').map(|(_, v)| v.trim().to_string()))
                            .unwrap_or_else(|| "-".to_string());
                        let response_str = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            value.len(),
                            value
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Minimal service entry pointing at a backend address.
pub fn service(name: &str, prefix: &str, backend: SocketAddr) -> ServiceConfig {
    ServiceConfig {
        name: name.into(),
        path_prefix: prefix.into(),
        target_origin: format!("http://{backend}"),
        auth_mode: AuthModeConfig::None,
        required_scopes: Vec::new(),
        ws_enabled: false,
        ws_path: None,
        cacheable: false,
        rate_limit: None,
    }
}

/// Gateway config suitable for tests: dev environment, metrics off (the
/// recorder is process-global), short backend timeout.
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.auth.environment = "development".into();
    config.auth.jwt_secret = "integration-secret".into();
    config.auth.identity_service_url = "http://127.0.0.1:1".into();
    config.auth.identity_timeout_secs = 1;
    config.observability.metrics_enabled = false;
    config.timeouts.backend_secs = 5;
    config
}

/// Boot a gateway on an ephemeral port. Returns its address and the
/// shutdown handle keeping it alive.
pub async fn spawn_gateway(config: GatewayConfig) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();

    let server = GatewayServer::new(config).expect("gateway construction");
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    // Give the listener a beat to start accepting.
    tokio::time::sleep(Duration::from_millis(100)).await;
    (addr, shutdown)
}

/// Non-pooled client so each request sees fresh connections.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Mint an HS256 token with the given secret, expiring `exp_offset_secs`
/// from now (negative = already expired).
pub fn mint_jwt(secret: &str, exp_offset_secs: i64) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    let claims = serde_json::json!({
        "id": "u-42",
        "email": "tester@example.com",
        "role": "user",
        "exp": now + exp_offset_secs,
    });
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}
