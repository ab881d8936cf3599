use std::future::Future;
use std::sync::Arc;

use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use remotecc_protocol::{
    AgentState, CLOSE_REASON_SHUTTING_DOWN, CLOSE_SHUTTING_DOWN, ServerMessage,
};

use crate::broker::{ClientBroker, ClientId, DEFAULT_CLIENT_QUEUE, Outbound};
use crate::classifier::{DEFAULT_WINDOW_CAPACITY, StateClassifier};
use crate::coalesce::{CoalescerConfig, FrameCoalescer};
use crate::error::RelayError;
use crate::output::{DEFAULT_BACKLOG_CAPACITY, OutputBacklog};
use crate::pty::{CommandSpec, PtyControl, PtyEvent, PtyExit, Spawner};

pub const TOKEN_LEN: usize = 32;

const CONNECTED_MESSAGE: &str = "Connected to RemoteCC server";

/// Receives every raw PTY chunk, before coalescing.
pub trait OutputMirror: Send + Sync + 'static {
    fn mirror(&self, bytes: &[u8]);
}

/// Mirror that discards output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMirror;

impl OutputMirror for NoMirror {
    fn mirror(&self, _bytes: &[u8]) {}
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub command: CommandSpec,
    pub coalescer: CoalescerConfig,
    pub backlog_capacity: usize,
    pub window_capacity: usize,
    pub client_queue: usize,
}

impl HubConfig {
    pub fn new(command: CommandSpec) -> Self {
        Self {
            command,
            coalescer: CoalescerConfig::default(),
            backlog_capacity: DEFAULT_BACKLOG_CAPACITY,
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            client_queue: DEFAULT_CLIENT_QUEUE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    NotStarted,
    Running,
    Exited,
}

/// A registered client: its id and the queue its connection task drains.
pub struct ClientRegistration {
    pub id: ClientId,
    pub outbound: mpsc::Receiver<Outbound>,
}

struct ActiveSession {
    control: Box<dyn PtyControl>,
    generation: u64,
}

struct HubState {
    session: Option<ActiveSession>,
    phase: SessionPhase,
    generation: u64,
    clients: ClientBroker,
    backlog: OutputBacklog,
    classifier: StateClassifier,
    shut_down: bool,
}

impl HubState {
    fn classify(&mut self, frame: &[u8]) {
        if let Some(update) = self.classifier.observe(frame) {
            info!(state = %update.state, clients = self.clients.len(), "broadcasting state change");
            self.clients.broadcast(ServerMessage::State(update));
        }
    }
}

struct HubInner {
    token: String,
    config: HubConfig,
    spawner: Arc<dyn Spawner>,
    mirror: Arc<dyn OutputMirror>,
    state: Mutex<HubState>,
    shutdown: CancellationToken,
}

/// Owns the one child session and the set of remote clients watching it.
///
/// All session state sits behind a single lock; PTY output is handled by one
/// pump task per child.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    pub fn new(config: HubConfig, spawner: Arc<dyn Spawner>, mirror: Arc<dyn OutputMirror>) -> Self {
        Self::with_token(config, spawner, mirror, generate_token())
    }

    pub fn with_token(
        config: HubConfig,
        spawner: Arc<dyn Spawner>,
        mirror: Arc<dyn OutputMirror>,
        token: String,
    ) -> Self {
        let state = HubState {
            session: None,
            phase: SessionPhase::NotStarted,
            generation: 0,
            clients: ClientBroker::new(config.client_queue),
            backlog: OutputBacklog::new(config.backlog_capacity),
            classifier: StateClassifier::new(config.window_capacity),
            shut_down: false,
        };
        Self {
            inner: Arc::new(HubInner {
                token,
                config,
                spawner,
                mirror,
                state: Mutex::new(state),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn token(&self) -> &str {
        &self.inner.token
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    pub async fn phase(&self) -> SessionPhase {
        self.inner.state.lock().await.phase
    }

    pub async fn client_count(&self) -> usize {
        self.inner.state.lock().await.clients.len()
    }

    pub async fn agent_state(&self) -> AgentState {
        self.inner.state.lock().await.classifier.state()
    }

    /// Authenticate and register a client, replaying the current state and
    /// backlog to it. Starts the child if none is running.
    pub async fn register_client(
        &self,
        presented: Option<&str>,
    ) -> Result<ClientRegistration, RelayError> {
        if !token_matches(presented, &self.inner.token) {
            warn!("rejected client with invalid token");
            return Err(RelayError::Auth);
        }

        let mut st = self.inner.state.lock().await;
        if st.shut_down {
            return Err(RelayError::ShuttingDown);
        }

        let (id, outbound) = st.clients.register();
        st.clients.send(
            id,
            Outbound::Message(ServerMessage::Connected {
                message: CONNECTED_MESSAGE.to_string(),
            }),
        );
        let current = st.classifier.current();
        st.clients.send(id, Outbound::Message(ServerMessage::State(current)));
        if !st.backlog.is_empty() {
            let data = st.backlog.joined_lossy();
            st.clients.send(id, Outbound::Message(ServerMessage::Output { data }));
        }
        info!(client = id, clients = st.clients.len(), "client registered");

        if st.session.is_none() {
            self.start_session(&mut st);
        }
        Ok(ClientRegistration { id, outbound })
    }

    pub async fn remove_client(&self, id: ClientId) {
        let mut st = self.inner.state.lock().await;
        if st.clients.remove(id) {
            info!(client = id, clients = st.clients.len(), "client removed");
        }
    }

    /// Keystrokes from a remote client. Dropped when no child is running.
    pub async fn accept_input(&self, client: ClientId, data: &[u8]) {
        let mut st = self.inner.state.lock().await;
        match st.session.as_mut() {
            Some(session) => session.control.write(data),
            None => debug!(client, bytes = data.len(), "input with no running session"),
        }
    }

    /// Keystrokes typed in the operator's own terminal.
    pub async fn accept_local_input(&self, data: &[u8]) {
        let mut st = self.inner.state.lock().await;
        if let Some(session) = st.session.as_mut() {
            session.control.write(data);
        }
    }

    pub async fn force_state(&self, client: ClientId, state: AgentState) {
        let mut st = self.inner.state.lock().await;
        info!(client, state = %state, "state forced by client");
        if let Some(update) = st.classifier.force(state) {
            st.clients.broadcast(ServerMessage::State(update));
        }
    }

    /// Close every client, kill the child and release waiters on
    /// [`cancelled`](Self::cancelled). Later calls do nothing.
    pub async fn shutdown(&self) {
        let mut st = self.inner.state.lock().await;
        if st.shut_down {
            return;
        }
        st.shut_down = true;
        info!(clients = st.clients.len(), "shutting down hub");
        st.clients
            .close_all(CLOSE_SHUTTING_DOWN, CLOSE_REASON_SHUTTING_DOWN);
        if let Some(mut session) = st.session.take() {
            session.control.kill();
        }
        drop(st);
        self.inner.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Resolves once [`shutdown`](Self::shutdown) has run.
    pub fn cancelled(&self) -> impl Future<Output = ()> + Send + 'static {
        let token = self.inner.shutdown.clone();
        async move { token.cancelled().await }
    }

    fn start_session(&self, st: &mut HubState) {
        let spec = &self.inner.config.command;
        match self.inner.spawner.spawn(spec) {
            Ok(pty) => {
                st.generation += 1;
                let generation = st.generation;
                st.session = Some(ActiveSession {
                    control: pty.control,
                    generation,
                });
                st.phase = SessionPhase::Running;
                info!(command = %spec.command, generation, "session started");
                tokio::spawn(self.clone().pump(pty.events, generation));
            }
            Err(e) => {
                error!(error = %e, "failed to start session");
                st.clients.broadcast(ServerMessage::Error {
                    message: e.client_message(),
                });
            }
        }
    }

    async fn pump(self, mut events: mpsc::Receiver<PtyEvent>, generation: u64) {
        let mut coalescer = FrameCoalescer::new(self.inner.config.coalescer.clone());
        let shutdown = self.inner.shutdown.clone();

        loop {
            let deadline = coalescer.deadline();
            tokio::select! {
                event = events.recv() => match event {
                    Some(PtyEvent::Data(bytes)) => {
                        self.inner.mirror.mirror(&bytes);
                        let frames = coalescer.push(&bytes, Instant::now());
                        let mut st = self.inner.state.lock().await;
                        st.backlog.push(bytes);
                        for frame in frames {
                            st.classify(&frame);
                        }
                    }
                    Some(PtyEvent::Exit(exit)) => {
                        self.finish(generation, coalescer.drain(), exit).await;
                        return;
                    }
                    None => {
                        let exit = PtyExit { code: None, signal: None };
                        self.finish(generation, coalescer.drain(), exit).await;
                        return;
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(frame) = coalescer.on_deadline(Instant::now()) {
                        self.inner.state.lock().await.classify(&frame);
                    }
                }
                _ = shutdown.cancelled() => {
                    debug!(generation, "pump stopped by shutdown");
                    return;
                }
            }
        }
    }

    async fn finish(&self, generation: u64, rest: Option<Vec<u8>>, exit: PtyExit) {
        let mut st = self.inner.state.lock().await;
        if let Some(frame) = rest {
            st.classify(&frame);
        }
        if st.session.as_ref().map(|s| s.generation) == Some(generation) {
            st.session = None;
            st.phase = SessionPhase::Exited;
        }
        info!(code = ?exit.code, signal = ?exit.signal, "session exited");
        st.clients.broadcast(ServerMessage::Exit {
            exit_code: exit.code,
            signal: exit.signal,
        });
    }
}

fn generate_token() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Compares in time independent of where the first mismatch is.
fn token_matches(presented: Option<&str>, expected: &str) -> bool {
    let Some(presented) = presented else {
        return false;
    };
    let (a, b) = (presented.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
