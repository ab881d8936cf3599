use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use remotecc_protocol::{AgentState, CLOSE_INVALID_TOKEN, ClientMessage, ServerMessage};

use crate::error::{LinkError, LinkResult};
use crate::events::{EventKind, LinkEvent, ListenerId, Listeners};
use crate::keys::Key;
use crate::retry::RetryPolicy;
use crate::transport::{Connection, Connector, Incoming, WsConnector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    Idle,
    Connecting,
    Open,
    Closed,
    Error,
    GivenUp,
}

struct Status {
    phase: LinkPhase,
    outgoing: Option<mpsc::Sender<String>>,
    /// Cancelled on an intentional disconnect or a new `connect`.
    driver: Option<CancellationToken>,
}

struct Shared<C> {
    connector: C,
    policy: RetryPolicy,
    listeners: Listeners,
    status: Mutex<Status>,
}

impl<C: Connector> Shared<C> {
    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Changes made by a driver that has been superseded are discarded.
    fn set_phase(&self, cancel: &CancellationToken, phase: LinkPhase) {
        let mut status = self.status();
        if !cancel.is_cancelled() {
            status.phase = phase;
        }
    }

    fn open(&self, cancel: &CancellationToken, outgoing: mpsc::Sender<String>) -> bool {
        let mut status = self.status();
        if cancel.is_cancelled() {
            return false;
        }
        status.phase = LinkPhase::Open;
        status.outgoing = Some(outgoing);
        true
    }

    fn closed(&self, cancel: &CancellationToken) {
        let mut status = self.status();
        if !cancel.is_cancelled() {
            status.phase = LinkPhase::Closed;
            status.outgoing = None;
        }
    }

    fn emit(&self, event: LinkEvent) {
        self.listeners.emit(&event);
    }
}

/// Client end of a relay connection that reconnects with exponential backoff.
///
/// Events are delivered to listeners registered with [`on`](Self::on), from
/// the link's own task.
pub struct RemoteLink<C: Connector = WsConnector> {
    shared: Arc<Shared<C>>,
}

impl RemoteLink<WsConnector> {
    pub fn new() -> Self {
        Self::with_connector(WsConnector, RetryPolicy::default())
    }
}

impl Default for RemoteLink<WsConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connector> RemoteLink<C> {
    pub fn with_connector(connector: C, policy: RetryPolicy) -> Self {
        Self {
            shared: Arc::new(Shared {
                connector,
                policy,
                listeners: Listeners::new(),
                status: Mutex::new(Status {
                    phase: LinkPhase::Idle,
                    outgoing: None,
                    driver: None,
                }),
            }),
        }
    }

    pub fn phase(&self) -> LinkPhase {
        self.shared.status().phase
    }

    pub fn on<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&LinkEvent) + Send + Sync + 'static,
    {
        self.shared.listeners.on(kind, callback)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.shared.listeners.off(id)
    }

    /// Start connecting to `url`, replacing any previous connection and
    /// resetting the retry count. Must be called inside a tokio runtime.
    pub fn connect(&self, url: impl Into<String>) {
        let cancel = CancellationToken::new();
        {
            let mut status = self.shared.status();
            if let Some(previous) = status.driver.replace(cancel.clone()) {
                previous.cancel();
            }
            status.outgoing = None;
            status.phase = LinkPhase::Connecting;
        }
        tokio::spawn(drive(Arc::clone(&self.shared), url.into(), cancel));
    }

    /// Close on purpose. No reconnect follows and a pending backoff is dropped.
    pub fn disconnect(&self) {
        let mut status = self.shared.status();
        let Some(driver) = status.driver.take() else {
            return;
        };
        driver.cancel();
        status.outgoing = None;
        status.phase = LinkPhase::Closed;
        debug!("link disconnected by client");
    }

    pub fn send(&self, msg: &ClientMessage) -> LinkResult<()> {
        let text = serde_json::to_string(msg)?;
        let status = self.shared.status();
        let Some(outgoing) = &status.outgoing else {
            return Err(LinkError::NotConnected);
        };
        outgoing
            .try_send(text)
            .map_err(|e| LinkError::Transport(e.to_string()))
    }

    pub fn send_input(&self, data: impl Into<String>) -> LinkResult<()> {
        self.send(&ClientMessage::Input { data: data.into() })
    }

    pub fn send_key(&self, key: Key) -> LinkResult<()> {
        self.send_input(key.sequence())
    }

    pub fn force_state(&self, state: AgentState) -> LinkResult<()> {
        self.send(&ClientMessage::ForceState { state })
    }
}

impl<C: Connector> Drop for RemoteLink<C> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn drive<C: Connector>(shared: Arc<Shared<C>>, url: String, cancel: CancellationToken) {
    let mut attempt: u32 = 0;
    loop {
        shared.set_phase(&cancel, LinkPhase::Connecting);
        let connected = tokio::select! {
            result = shared.connector.connect(&url) => result,
            _ = cancel.cancelled() => return,
        };

        match connected {
            Ok(Connection { incoming, outgoing }) => {
                attempt = 0;
                if !shared.open(&cancel, outgoing) {
                    return;
                }
                info!(url = %url, "link open");

                let Some((code, reason)) = read_until_closed(&shared, incoming, &cancel).await
                else {
                    return;
                };
                shared.closed(&cancel);
                info!(code = ?code, reason = %reason, "link closed");
                shared.emit(LinkEvent::Disconnected { code, reason });

                if code == Some(CLOSE_INVALID_TOKEN) {
                    warn!("relay rejected the token, not reconnecting");
                    shared.set_phase(&cancel, LinkPhase::Error);
                    shared.emit(LinkEvent::Error {
                        message: LinkError::Auth.to_string(),
                    });
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, "connect failed");
                shared.set_phase(&cancel, LinkPhase::Error);
                let message = e.to_string();
                shared.emit(LinkEvent::Error {
                    message: message.clone(),
                });
                shared.emit(LinkEvent::Disconnected {
                    code: None,
                    reason: message,
                });
            }
        }

        if cancel.is_cancelled() {
            return;
        }
        attempt += 1;
        let Some(delay) = shared.policy.delay_for(attempt) else {
            let attempts = attempt - 1;
            warn!(attempts, "giving up on the relay");
            shared.set_phase(&cancel, LinkPhase::GivenUp);
            shared.emit(LinkEvent::GaveUp { attempts });
            return;
        };
        info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
        shared.emit(LinkEvent::Reconnecting { attempt, delay });

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => return,
        }
    }
}

/// Dispatch inbound frames until the connection ends. `None` when cancelled.
async fn read_until_closed<C: Connector>(
    shared: &Shared<C>,
    mut incoming: mpsc::Receiver<Incoming>,
    cancel: &CancellationToken,
) -> Option<(Option<u16>, String)> {
    loop {
        let next = tokio::select! {
            next = incoming.recv() => next,
            _ = cancel.cancelled() => return None,
        };
        match next {
            Some(Incoming::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                Ok(msg) => shared.emit(LinkEvent::from(msg)),
                Err(e) => warn!("dropping frame: {}", LinkError::from(e)),
            },
            Some(Incoming::Closed { code, reason }) => return Some((code, reason)),
            None => return Some((None, String::new())),
        }
    }
}
