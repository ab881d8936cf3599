use anyhow::Context;
use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::info;

use libremotecc::Hub;

use crate::connection;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("port {port} is already in use on {host}")]
    AddressInUse { host: String, port: u16 },

    #[error("failed to bind {host}:{port}: {source}")]
    Bind {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

impl StartupError {
    pub fn exit_code(&self) -> i32 {
        match self {
            StartupError::AddressInUse { .. } => 2,
            StartupError::Bind { .. } => 1,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConnectQuery {
    token: Option<String>,
}

pub async fn bind(host: &str, port: u16) -> Result<TcpListener, StartupError> {
    TcpListener::bind((host, port)).await.map_err(|source| {
        if source.kind() == std::io::ErrorKind::AddrInUse {
            StartupError::AddressInUse {
                host: host.to_string(),
                port,
            }
        } else {
            StartupError::Bind {
                host: host.to_string(),
                port,
                source,
            }
        }
    })
}

pub fn router(hub: Hub) -> Router {
    Router::new().route("/", get(ws_connect)).with_state(hub)
}

/// Serve until the hub shuts down.
pub async fn serve(listener: TcpListener, hub: Hub) -> anyhow::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "relay listening");
    }
    let shutdown = hub.cancelled();
    axum::serve(listener, router(hub))
        .with_graceful_shutdown(shutdown)
        .await
        .context("relay server failed")
}

async fn ws_connect(
    ws: WebSocketUpgrade,
    State(hub): State<Hub>,
    Query(query): Query<ConnectQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_socket(socket, hub, query.token))
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use libremotecc::testing::ScriptedSpawner;
    use libremotecc::{CommandSpec, HubConfig, NoMirror};
    use remotecc_protocol::{AgentState, ServerMessage, StateUpdate, connection_url};
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

    use super::*;

    type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    const TOKEN: &str = "test-token";

    async fn start(spawner: &ScriptedSpawner) -> (Hub, SocketAddr) {
        let hub = Hub::with_token(
            HubConfig::new(CommandSpec::new("claude", Vec::new())),
            Arc::new(spawner.clone()),
            Arc::new(NoMirror),
            TOKEN.to_string(),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(serve(listener, hub.clone()));
        (hub, addr)
    }

    async fn connect(addr: SocketAddr, token: &str) -> Client {
        let url = connection_url("127.0.0.1", addr.port(), token);
        let (ws, _) = connect_async(url.as_str()).await.expect("connect");
        ws
    }

    async fn next_frame(ws: &mut Client) -> Message {
        tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("frame in time")
            .expect("stream open")
            .expect("valid frame")
    }

    async fn next_message(ws: &mut Client) -> ServerMessage {
        match next_frame(ws).await {
            Message::Text(text) => serde_json::from_str(text.as_str()).expect("server json"),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    fn close_code(frame: Message) -> (u16, String) {
        match frame {
            Message::Close(Some(close)) => (u16::from(close.code), close.reason.as_str().to_string()),
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_token_is_closed_with_1008() {
        let spawner = ScriptedSpawner::new();
        let (hub, addr) = start(&spawner).await;

        let mut ws = connect(addr, "wrong").await;
        assert_eq!(
            close_code(next_frame(&mut ws).await),
            (1008, "Invalid token".to_string())
        );
        assert_eq!(spawner.spawn_count(), 0);
        assert_eq!(hub.client_count().await, 0);
    }

    #[tokio::test]
    async fn client_receives_greeting_and_drives_session() {
        let spawner = ScriptedSpawner::new();
        let (_hub, addr) = start(&spawner).await;

        let mut ws = connect(addr, TOKEN).await;
        assert!(matches!(
            next_message(&mut ws).await,
            ServerMessage::Connected { .. }
        ));
        assert_eq!(
            next_message(&mut ws).await,
            ServerMessage::State(StateUpdate::working())
        );

        let pty = spawner.latest().expect("session started");
        ws.send(Message::text(r#"{"type":"input","data":"2\r"}"#.to_string()))
            .await
            .expect("send input");
        ws.send(Message::text("not json".to_string()))
            .await
            .expect("send junk");
        ws.send(Message::text(r#"{"type":"forceState","state":"waiting"}"#.to_string()))
            .await
            .expect("send force");

        let ServerMessage::State(update) = next_message(&mut ws).await else {
            panic!("expected state");
        };
        assert_eq!(update.state, AgentState::Waiting);
        assert_eq!(pty.written(), b"2\r");
    }

    #[tokio::test]
    async fn shutdown_closes_clients_with_1001() {
        let spawner = ScriptedSpawner::new();
        let (hub, addr) = start(&spawner).await;

        let mut ws = connect(addr, TOKEN).await;
        next_message(&mut ws).await;
        next_message(&mut ws).await;

        hub.shutdown().await;
        assert_eq!(
            close_code(next_frame(&mut ws).await),
            (1001, "Server shutting down".to_string())
        );
        assert!(spawner.latest().expect("child").killed());
    }

    #[tokio::test]
    async fn second_bind_reports_address_in_use() {
        let first = bind("127.0.0.1", 0).await.expect("bind");
        let port = first.local_addr().expect("addr").port();
        let err = bind("127.0.0.1", port).await.expect_err("port taken");
        assert!(matches!(err, StartupError::AddressInUse { port: p, .. } if p == port));
        assert_eq!(err.exit_code(), 2);
    }
}
