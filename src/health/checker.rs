use std::time::Duration;

use http_body_util::Empty;
use hyper::body::Bytes;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tokio::net::TcpStream;

use crate::logging::syslog::{trace, warn};

const HTTP_HEALTH_TIMEOUT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// `GET http://127.0.0.1:<port>/health`, 2-second timeout, success is any
/// 2xx status. Grounded on the teacher's `HttpClient` (plain, non-TLS
/// variant — health checks never leave loopback).
pub async fn http_health_check(port: u16) -> bool {
    let client: Client<HttpConnector, Empty<Bytes>> = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

    let uri = format!("http://127.0.0.1:{}/health", port);
    let request = match hyper::Request::get(&uri).body(Empty::<Bytes>::new()) {
        Ok(r) => r,
        Err(e) => {
            warn(format!("health check request build failed for port {}: {}", port, e));
            return false;
        }
    };

    match tokio::time::timeout(HTTP_HEALTH_TIMEOUT, client.request(request)).await {
        Ok(Ok(response)) => response.status().is_success(),
        Ok(Err(e)) => {
            trace(format!("health check GET {} failed: {}", uri, e));
            false
        }
        Err(_) => {
            trace(format!("health check GET {} timed out after {:?}", uri, HTTP_HEALTH_TIMEOUT));
            false
        }
    }
}

/// FastCGI children have no HTTP surface; success is an established TCP
/// connection to their listen port.
pub async fn tcp_health_check(port: u16) -> bool {
    match tokio::time::timeout(HTTP_HEALTH_TIMEOUT, TcpStream::connect(("127.0.0.1", port))).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            trace(format!("health check TCP connect to port {} failed: {}", port, e));
            false
        }
        Err(_) => {
            trace(format!("health check TCP connect to port {} timed out", port));
            false
        }
    }
}

/// Polls `check` at 100ms intervals until it succeeds or `deadline` elapses.
pub async fn wait_healthy<F, Fut>(mut check: F, deadline: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    loop {
        if check().await {
            return true;
        }
        if start.elapsed() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn wait_healthy_returns_true_once_the_check_succeeds() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let ok = wait_healthy(
            move || {
                let attempts = attempts_clone.clone();
                async move { attempts.fetch_add(1, Ordering::SeqCst) >= 2 }
            },
            Duration::from_secs(2),
        )
        .await;

        assert!(ok);
        assert!(attempts.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn wait_healthy_gives_up_after_the_deadline() {
        let ok = wait_healthy(|| async { false }, Duration::from_millis(250)).await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn tcp_health_check_succeeds_against_a_listening_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        assert!(tcp_health_check(port).await);
    }

    #[tokio::test]
    async fn tcp_health_check_fails_against_a_closed_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(!tcp_health_check(port).await);
    }
}
