//! In-memory PTY for driving a [`Hub`](crate::hub::Hub) without real processes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::error::RelayError;
use crate::pty::{CommandSpec, PtyControl, PtyEvent, PtyExit, SpawnedPty, Spawner};

/// Records every spawn and hands out a [`ScriptedPty`] per child so a test can
/// play output and inspect input.
#[derive(Clone, Default)]
pub struct ScriptedSpawner {
    inner: Arc<Mutex<ScriptState>>,
}

#[derive(Default)]
struct ScriptState {
    fail_with: Option<String>,
    specs: Vec<CommandSpec>,
    children: Vec<ScriptedPty>,
}

impl ScriptedSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every spawn fails with `message` until [`succeed`](Self::succeed) is called.
    pub fn failing(message: impl Into<String>) -> Self {
        let spawner = Self::new();
        spawner.lock().fail_with = Some(message.into());
        spawner
    }

    pub fn succeed(&self) {
        self.lock().fail_with = None;
    }

    /// Number of spawn attempts, failed ones included.
    pub fn spawn_count(&self) -> usize {
        self.lock().specs.len()
    }

    pub fn specs(&self) -> Vec<CommandSpec> {
        self.lock().specs.clone()
    }

    /// Most recently started child.
    pub fn latest(&self) -> Option<ScriptedPty> {
        self.lock().children.last().cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Spawner for ScriptedSpawner {
    fn spawn(&self, spec: &CommandSpec) -> Result<SpawnedPty, RelayError> {
        let mut state = self.lock();
        state.specs.push(spec.clone());
        if let Some(message) = &state.fail_with {
            return Err(RelayError::spawn(&spec.command, message));
        }

        let (events_tx, events_rx) = mpsc::channel(256);
        let child = ScriptedPty {
            events: events_tx,
            written: Arc::new(Mutex::new(Vec::new())),
            killed: Arc::new(AtomicBool::new(false)),
        };
        state.children.push(child.clone());
        Ok(SpawnedPty {
            events: events_rx,
            control: Box::new(ScriptedControl {
                written: child.written.clone(),
                killed: child.killed.clone(),
            }),
        })
    }
}

/// Test-side handle of one scripted child.
#[derive(Clone)]
pub struct ScriptedPty {
    events: mpsc::Sender<PtyEvent>,
    written: Arc<Mutex<Vec<u8>>>,
    killed: Arc<AtomicBool>,
}

impl ScriptedPty {
    pub async fn emit(&self, bytes: impl AsRef<[u8]>) {
        let _ = self.events.send(PtyEvent::Data(bytes.as_ref().to_vec())).await;
    }

    pub async fn exit(&self, code: Option<u32>, signal: Option<&str>) {
        let _ = self
            .events
            .send(PtyEvent::Exit(PtyExit {
                code,
                signal: signal.map(str::to_string),
            }))
            .await;
    }

    /// Everything written to the child so far.
    pub fn written(&self) -> Vec<u8> {
        self.written
            .lock()
            .map(|w| w.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

struct ScriptedControl {
    written: Arc<Mutex<Vec<u8>>>,
    killed: Arc<AtomicBool>,
}

impl PtyControl for ScriptedControl {
    fn write(&mut self, bytes: &[u8]) {
        if self.killed.load(Ordering::SeqCst) {
            return;
        }
        if let Ok(mut written) = self.written.lock() {
            written.extend_from_slice(bytes);
        }
    }

    fn kill(&mut self) {
        self.killed.store(true, Ordering::SeqCst);
    }
}
