//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Websocket endpoint for the control box UI."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use r_cbx_core::{ControlHub, HubError, UiClient};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Frames queued for one websocket peer.
pub struct ChannelClient {
    id: Uuid,
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelClient {
    /// Create a client and the receiver its frames arrive on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }
}

impl UiClient for ChannelClient {
    fn id(&self) -> Uuid {
        self.id
    }

    fn write_frame(&self, frame: String) -> r_cbx_core::Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| HubError::ClientGone(format!("websocket peer {} closed", self.id)))
    }
}

/// Builder for the websocket server the UI connects to.
#[derive(Clone)]
pub struct UiServerBuilder {
    listen: SocketAddr,
    hub: Arc<ControlHub>,
}

impl UiServerBuilder {
    /// Create a builder bound to `listen` serving `hub`.
    pub fn new(listen: SocketAddr, hub: Arc<ControlHub>) -> Self {
        Self { listen, hub }
    }

    /// Spawn the server and return a shutdown handle.
    pub async fn spawn(self) -> anyhow::Result<UiServerHandle> {
        let listener = TcpListener::bind(self.listen).await?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "ui websocket listening");

        let app = Router::new()
            .route("/ws", get(upgrade_handler))
            .with_state(self.hub);

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });
            if let Err(err) = server.await {
                warn!(error = %err, "ui websocket server exited with error");
            }
        });

        Ok(UiServerHandle {
            address: local_addr,
            shutdown: shutdown_tx,
            task,
        })
    }
}

/// Handle for the running UI server.
pub struct UiServerHandle {
    address: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl UiServerHandle {
    /// Return the bound listening address.
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Trigger graceful shutdown and await completion.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);
        self.task.await.map_err(|err| anyhow::anyhow!(err))
    }
}

async fn upgrade_handler(
    ws: WebSocketUpgrade,
    State(hub): State<Arc<ControlHub>>,
) -> axum::response::Response {
    ws.on_upgrade(|socket| client_loop(socket, hub))
}

async fn client_loop(mut socket: WebSocket, hub: Arc<ControlHub>) {
    let (client, mut outbound) = ChannelClient::channel();
    let id = client.id;
    info!(client = %id, "ui client connected");
    hub.attach_ui(Arc::new(client));

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    break;
                };
                if socket.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
            message = socket.recv() => {
                let Some(Ok(message)) = message else {
                    break;
                };

                match message {
                    Message::Text(text) => {
                        // Commands run under the hub lock and may call into the
                        // device stack; keep them off the reactor, one at a time.
                        let hub = hub.clone();
                        let handled = tokio::task::spawn_blocking(move || hub.handle_ui_frame(&text)).await;
                        match handled {
                            Ok(Ok(())) => {}
                            Ok(Err(err)) => debug!(client = %id, error = %err, "ui frame rejected"),
                            Err(err) => warn!(client = %id, error = %err, "ui command task failed"),
                        }
                    }
                    Message::Binary(_) => warn!(client = %id, "binary ui frame ignored"),
                    Message::Ping(payload) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Message::Pong(_) => {}
                    Message::Close(_) => break,
                }
            }
        }
    }

    hub.detach_ui(id);
    info!(client = %id, "ui client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_channel_reports_client_gone() {
        let (client, rx) = ChannelClient::channel();
        client.write_frame("{}".to_owned()).unwrap();
        drop(rx);
        assert!(matches!(
            client.write_frame("{}".to_owned()),
            Err(HubError::ClientGone(_))
        ));
    }
}
