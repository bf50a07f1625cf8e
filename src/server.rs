use futures_util::future::LocalBoxFuture;
use futures_util::stream::SplitSink;
use futures_util::{FutureExt, SinkExt, StreamExt};
use log::{debug, info, warn};
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket, Ws};
use warp::Filter;

use crate::config::Config;
use crate::error::TransportError;
use crate::outbound::QueueSender;
use crate::relay::{Policy, Relay};
use crate::session::{Flow, Session};
use crate::tls;

/// WebSocket close code for "policy violation".
const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Binds the relay core to warp WebSockets.
pub struct Server {
    relay: Arc<Relay>,
    outbound_capacity: usize,
    max_message_bytes: usize,
}

impl Server {
    pub fn new(config: &Config) -> Self {
        Server {
            relay: Arc::new(Relay::new(Policy {
                max_violations: config.max_violations,
            })),
            outbound_capacity: config.outbound_capacity,
            max_message_bytes: config.max_message_bytes,
        }
    }

    pub fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }

    pub async fn handle_connection(&self, ws: WebSocket) {
        let (ws_tx, mut ws_rx) = ws.split();
        let (queue, rx) = QueueSender::channel(self.outbound_capacity);
        let queue = Arc::new(queue);

        let mut session = Session::new(Arc::clone(&self.relay), queue.clone());
        let id = session.id();
        info!("New connection {}", id);

        let writer = tokio::spawn(write_outbound(ws_tx, rx));

        while let Some(result) = ws_rx.next().await {
            let msg = match result {
                Ok(msg) => msg,
                Err(e) => {
                    let e = TransportError::from(e);
                    warn!("Connection {}: {}", id, e);
                    break;
                }
            };

            if msg.is_close() {
                debug!("Connection {} sent close frame", id);
                break;
            }
            if !msg.is_text() && !msg.is_binary() {
                continue;
            }

            if session.handle_payload(msg.as_bytes()).await == Flow::Disconnect {
                let closing = queue.close_with(CLOSE_POLICY_VIOLATION, "too many invalid messages");
                if let Err(e) = closing {
                    debug!("Could not queue close frame for {}: {}", id, e);
                }
                break;
            }
        }

        session.close().await;
        drop(session);
        drop(queue);

        if let Err(e) = writer.await {
            warn!("Writer task for {} failed: {}", id, e);
        }
        info!("Connection {} closed", id);
    }
}

/// Drains a connection's queue into its socket until every sender is gone,
/// a close frame has been written, or the socket fails.
async fn write_outbound(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
) {
    while let Some(message) = rx.recv().await {
        let closing = message.is_close();
        if let Err(e) = ws_tx.send(message).await {
            debug!("Failed to send WebSocket message: {}", e);
            return;
        }
        if closing {
            return;
        }
    }
    let _ = ws_tx.close().await;
}

/// WebSocket upgrades on `/` and `/ws`; everything else comes from `static_dir`.
pub fn routes(
    server: Arc<Server>,
    static_dir: PathBuf,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let with_server = warp::any().map(move || Arc::clone(&server));

    let ws_route = warp::path::end()
        .or(warp::path("ws").and(warp::path::end()))
        .unify()
        .and(warp::ws())
        .and(with_server)
        .map(|ws: Ws, server: Arc<Server>| {
            ws.max_message_size(server.max_message_bytes)
                .on_upgrade(move |socket| async move {
                    server.handle_connection(socket).await;
                })
        });

    let static_files = warp::fs::dir(static_dir);

    ws_route
        .or(static_files)
        .with(warp::cors().allow_any_origin())
}

/// A listener that is bound and ready to be driven.
pub struct Bound {
    pub addr: SocketAddr,
    pub secure: bool,
    pub serving: LocalBoxFuture<'static, ()>,
}

/// Binds the configured address, over TLS when a usable certificate and key
/// are configured and in plaintext otherwise. Serving stops once `shutdown`
/// completes.
pub fn serve<S>(server: Arc<Server>, config: &Config, shutdown: S) -> Result<Bound, warp::Error>
where
    S: Future<Output = ()> + Send + 'static,
{
    let addr = config.addr();
    let routes = routes(server, config.static_dir.clone());

    if let Some((cert_path, key_path)) = config.tls_paths() {
        match tls::preflight(cert_path, key_path) {
            Ok(chain_len) => {
                info!(
                    "Starting secure relay (HTTPS/WSS) on {} with {} certificate(s)",
                    addr, chain_len
                );
                let (addr, serving) = warp::serve(routes)
                    .tls()
                    .cert_path(cert_path)
                    .key_path(key_path)
                    .try_bind_with_graceful_shutdown(addr, shutdown)?;
                return Ok(Bound {
                    addr,
                    secure: true,
                    serving: serving.boxed_local(),
                });
            }
            Err(e) => {
                warn!("Failed to load TLS config ({}), falling back to HTTP/WS", e);
            }
        }
    }

    let (addr, serving) = warp::serve(routes).try_bind_with_graceful_shutdown(addr, shutdown)?;
    Ok(Bound {
        addr,
        secure: false,
        serving: serving.boxed_local(),
    })
}
