use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use http_body_util::BodyExt;
use hyper::Request;
use hyper::Response;
use hyper::body::Incoming;
use hyper_tungstenite::tungstenite::Message;
use hyper_tungstenite::tungstenite::error::ProtocolError;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};

use crate::http::body::RespBody;
use crate::logging::syslog::{trace, warn};

/// §4.M, dev mode only. Tracks every `/ws/reload` connection and pushes one
/// `"reload"` text frame per completed rebuild, success or failure alike; a
/// write failure or an incoming close frame drops the client.
pub struct Broadcaster {
    clients: DashMap<u64, UnboundedSender<Message>>,
    next_id: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Arc<Self> {
        Arc::new(Broadcaster { clients: DashMap::new(), next_id: AtomicU64::new(0) })
    }

    pub fn is_reload_request(req: &Request<Incoming>) -> bool {
        req.uri().path() == "/ws/reload" && hyper_tungstenite::is_upgrade_request(req)
    }

    /// Completes the WebSocket handshake and spawns the per-connection relay
    /// task; returns the `101 Switching Protocols` response to hand straight
    /// back to the client.
    pub fn upgrade(self: &Arc<Self>, mut req: Request<Incoming>) -> Result<Response<RespBody>, ProtocolError> {
        let (response, websocket) = hyper_tungstenite::upgrade(&mut req, None)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = unbounded_channel::<Message>();
        self.clients.insert(id, tx);

        let broadcaster = self.clone();
        tokio::spawn(async move {
            let mut websocket = match websocket.await {
                Ok(ws) => ws,
                Err(e) => {
                    warn(format!("reload websocket {} failed to complete handshake: {}", id, e));
                    broadcaster.clients.remove(&id);
                    return;
                }
            };

            loop {
                tokio::select! {
                    outgoing = rx.recv() => {
                        match outgoing {
                            Some(message) => {
                                if websocket.send(message).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    incoming = websocket.next() => {
                        match incoming {
                            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                            Some(Ok(_)) => {}
                        }
                    }
                }
            }

            broadcaster.clients.remove(&id);
            trace(format!("reload websocket {} disconnected", id));
        });

        Ok(response.map(|body| body.map_err(|never| match never {}).boxed()))
    }

    /// Called by the build driver after every rebuild attempt.
    pub fn notify_reload(&self) {
        let mut dead = Vec::new();
        for entry in self.clients.iter() {
            if entry.value().send(Message::text("reload")).is_err() {
                dead.push(*entry.key());
            }
        }
        for id in dead {
            self.clients.remove(&id);
        }
        trace(format!("reload broadcast sent to {} client(s)", self.clients.len()));
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_broadcaster_has_no_clients() {
        let broadcaster = Broadcaster::new();
        assert_eq!(broadcaster.client_count(), 0);
    }

    #[test]
    fn notify_reload_on_an_empty_broadcaster_is_a_no_op() {
        let broadcaster = Broadcaster::new();
        broadcaster.notify_reload();
        assert_eq!(broadcaster.client_count(), 0);
    }

    #[test]
    fn a_client_with_a_dropped_receiver_is_pruned_on_notify() {
        let broadcaster = Broadcaster::new();
        let (tx, rx) = unbounded_channel::<Message>();
        broadcaster.clients.insert(0, tx);
        drop(rx);

        broadcaster.notify_reload();

        assert_eq!(broadcaster.client_count(), 0);
    }
}
