use anyhow::Result;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use libremotecc::{ClientId, ClientRegistration, Hub, Outbound, RelayError};
use remotecc_protocol::{
    CLOSE_INVALID_TOKEN, CLOSE_REASON_INVALID_TOKEN, CLOSE_REASON_SHUTTING_DOWN,
    CLOSE_SHUTTING_DOWN, ClientMessage,
};

/// Drive one upgraded WebSocket from registration to removal.
pub async fn handle_socket(mut socket: WebSocket, hub: Hub, token: Option<String>) {
    let reg = match hub.register_client(token.as_deref()).await {
        Ok(reg) => reg,
        Err(err) => {
            let (code, reason) = match err {
                RelayError::Auth => (CLOSE_INVALID_TOKEN, CLOSE_REASON_INVALID_TOKEN),
                _ => (CLOSE_SHUTTING_DOWN, CLOSE_REASON_SHUTTING_DOWN),
            };
            info!(code, "refusing connection: {err}");
            let _ = socket.send(close_message(code, reason)).await;
            return;
        }
    };

    let id = reg.id;
    if let Err(err) = pump(socket, &hub, reg).await {
        warn!(client = id, "connection closed with error: {err}");
    }
    hub.remove_client(id).await;
}

async fn pump(socket: WebSocket, hub: &Hub, reg: ClientRegistration) -> Result<()> {
    let ClientRegistration { id, mut outbound } = reg;
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            next = outbound.recv() => match next {
                Some(Outbound::Message(msg)) => {
                    ws_tx.send(Message::Text(serde_json::to_string(&msg)?.into())).await?;
                }
                Some(Outbound::Close { code, reason }) => {
                    ws_tx.send(close_message(code, &reason)).await?;
                    break;
                }
                None => break,
            },
            incoming = ws_rx.next() => {
                let Some(msg) = incoming else {
                    break;
                };
                match msg? {
                    Message::Text(text) => handle_text(hub, id, text.as_str()).await,
                    Message::Close(_) => {
                        debug!(client = id, "client sent close");
                        break;
                    }
                    Message::Ping(v) => ws_tx.send(Message::Pong(v)).await?,
                    Message::Pong(_) | Message::Binary(_) => {}
                }
            }
        }
    }
    Ok(())
}

async fn handle_text(hub: &Hub, id: ClientId, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Input { data }) => hub.accept_input(id, data.as_bytes()).await,
        Ok(ClientMessage::ForceState { state }) => hub.force_state(id, state).await,
        Err(e) => warn!(client = id, "{}", RelayError::from(e)),
    }
}

fn close_message(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }))
}
