use std::future::Future;
use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use linq_common::config::{HEALTH_PATH, SIGNALING_PATH};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::clients::ClientSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayHealth {
    pub connected_clients: usize,
}

async fn health(State(clients): State<ClientSet>) -> impl IntoResponse {
    Json(RelayHealth {
        connected_clients: clients.len().await,
    })
}

pub fn router(clients: ClientSet) -> Router {
    Router::new()
        .route("/", get(|| async { "linq relay online" }))
        .route(HEALTH_PATH, get(health))
        .route(SIGNALING_PATH, get(ws_handler))
        .with_state(clients)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(clients): State<ClientSet>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, clients, addr))
}

async fn handle_socket(stream: WebSocket, clients: ClientSet, addr: SocketAddr) {
    let (mut sender, mut receiver) = stream.split();
    let (tx, mut rx) = ClientSet::outbox();
    let (disconnect_tx, mut disconnect_rx) = mpsc::channel::<()>(1);

    let id = clients.on_connect(tx).await;
    info!("client {} connected from {}", id, addr);

    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        // Outbox gone: either evicted from the set or the socket failed.
        let _ = sender.close().await;
        let _ = disconnect_tx.try_send(());
    });

    loop {
        tokio::select! {
            _ = disconnect_rx.recv() => {
                break;
            }
            msg = receiver.next() => {
                let Some(msg) = msg else { break; };
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(err) => {
                        debug!("read error on {}: {}", id, err);
                        break;
                    }
                };

                match msg {
                    Message::Text(text) => {
                        clients.on_message(id, &text).await;
                    }
                    Message::Binary(_) => {
                        warn!("ignoring binary frame from {}", id);
                    }
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
        }
    }

    clients.on_disconnect(id).await;
    writer.abort();
    info!("client {} disconnected", id);
}

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {}", err);
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

/// A bound relay that has not started serving yet.
pub struct Relay {
    listener: TcpListener,
    clients: ClientSet,
}

impl Relay {
    pub async fn bind(addr: SocketAddr) -> linq_common::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            clients: ClientSet::new(),
        })
    }

    pub fn local_addr(&self) -> linq_common::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle on the connected set, usable while the relay runs.
    pub fn clients(&self) -> ClientSet {
        self.clients.clone()
    }

    pub async fn run(self) -> linq_common::Result<()> {
        self.run_until(std::future::pending()).await
    }

    pub async fn run_until<F>(self, shutdown: F) -> linq_common::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.listener.local_addr()?;
        info!("relay listening on ws://{}{}", addr, SIGNALING_PATH);
        axum::serve(
            self.listener,
            router(self.clients).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;
        info!("relay stopped");
        Ok(())
    }
}
