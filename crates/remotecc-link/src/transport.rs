use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::error::{LinkError, LinkResult};

const QUEUE: usize = 256;

/// What the transport hands to the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Text(String),
    /// Always the last item; `code` is `None` when the peer vanished without a close frame.
    Closed { code: Option<u16>, reason: String },
}

/// One open connection. Dropping `outgoing` closes it.
pub struct Connection {
    pub incoming: mpsc::Receiver<Incoming>,
    pub outgoing: mpsc::Sender<String>,
}

pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> impl Future<Output = LinkResult<Connection>> + Send;
}

/// WebSocket transport over `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> LinkResult<Connection> {
        let (ws, _) = connect_async(url).await.map_err(|e| LinkError::Connect {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        let (mut ws_tx, mut ws_rx) = ws.split();
        let (in_tx, in_rx) = mpsc::channel(QUEUE);
        let (out_tx, mut out_rx) = mpsc::channel::<String>(QUEUE);

        tokio::spawn(async move {
            let closed = loop {
                match ws_rx.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if in_tx.send(Incoming::Text(text.as_str().to_string())).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(frame) => Incoming::Closed {
                                code: Some(u16::from(frame.code)),
                                reason: frame.reason.as_str().to_string(),
                            },
                            None => Incoming::Closed {
                                code: None,
                                reason: String::new(),
                            },
                        };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        break Incoming::Closed {
                            code: None,
                            reason: e.to_string(),
                        };
                    }
                    None => {
                        break Incoming::Closed {
                            code: None,
                            reason: String::new(),
                        };
                    }
                }
            };
            let _ = in_tx.send(closed).await;
        });

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = ws_tx.send(Message::text(text)).await {
                    debug!(error = %e, "websocket write failed");
                    return;
                }
            }
            let _ = ws_tx.send(Message::Close(None)).await;
        });

        Ok(Connection {
            incoming: in_rx,
            outgoing: out_tx,
        })
    }
}
