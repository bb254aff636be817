use std::net::SocketAddr;
use std::sync::Arc;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::select;

use crate::core::triggers::get_trigger_handler;
use crate::http::router::{ServerState, route};
use crate::logging::syslog::{error, trace};

/// Accepts connections on `listen_addr` until the `shutdown` trigger fires,
/// serving each with HTTP/1.1 (upgrades enabled, for the dev reload socket).
/// One task per connection; this function itself returns once the listener
/// stops accepting, which the caller uses as the start of the shutdown grace
/// window.
pub async fn serve(listen_addr: &str, state: Arc<ServerState>) -> std::io::Result<()> {
    let addr: SocketAddr = listen_addr.parse().map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("invalid listen address '{}': {}", listen_addr, e)))?;
    let listener = TcpListener::bind(addr).await?;
    trace(format!("listening on {}", addr));

    let shutdown_token = get_trigger_handler().get_token("shutdown").await.expect("shutdown trigger is always registered");

    loop {
        select! {
            _ = shutdown_token.cancelled() => {
                trace(format!("shutdown signal received, no longer accepting on {}", addr));
                return Ok(());
            }
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        let state = state.clone();
                        let remote_addr = peer_addr.to_string();
                        let io = TokioIo::new(stream);

                        tokio::spawn(async move {
                            let svc = service_fn(move |req| {
                                let state = state.clone();
                                let remote_addr = remote_addr.clone();
                                async move { Ok::<_, std::convert::Infallible>(route(req, state, remote_addr).await) }
                            });

                            if let Err(e) = http1::Builder::new().serve_connection(io, svc).with_upgrades().await {
                                trace(format!("connection error: {}", e));
                            }
                        });
                    }
                    Err(e) => {
                        error(format!("failed to accept connection: {}", e));
                    }
                }
            }
        }
    }
}
