use std::io::{Read, Write};
use std::path::PathBuf;

use portable_pty::{ChildKiller, CommandBuilder, PtySize, native_pty_system};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::RelayError;

pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 30;

const READ_BUF_SIZE: usize = 4096;
const EVENT_QUEUE: usize = 256;

/// What to run inside the pseudo-terminal.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub cols: u16,
    pub rows: u16,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            cwd: None,
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyExit {
    pub code: Option<u32>,
    pub signal: Option<String>,
}

/// Output of a running child. `Exit` is always the last event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyEvent {
    Data(Vec<u8>),
    Exit(PtyExit),
}

/// Input side of a running child.
pub trait PtyControl: Send {
    /// Queue keystrokes. Silently dropped once the child is gone.
    fn write(&mut self, bytes: &[u8]);
    /// Ask the child to terminate. Safe to call repeatedly.
    fn kill(&mut self);
}

pub struct SpawnedPty {
    pub events: mpsc::Receiver<PtyEvent>,
    pub control: Box<dyn PtyControl>,
}

pub trait Spawner: Send + Sync + 'static {
    fn spawn(&self, spec: &CommandSpec) -> Result<SpawnedPty, RelayError>;
}

/// Spawns real processes on a host pseudo-terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeSpawner;

impl Spawner for NativeSpawner {
    fn spawn(&self, spec: &CommandSpec) -> Result<SpawnedPty, RelayError> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: spec.rows,
                cols: spec.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| RelayError::spawn(&spec.command, e))?;

        let cwd = match &spec.cwd {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };
        let mut cmd = CommandBuilder::new(&spec.command);
        cmd.args(&spec.args);
        cmd.cwd(&cwd);
        cmd.env("TERM", "xterm-256color");

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| RelayError::spawn(&spec.command, e))?;
        drop(pair.slave);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| RelayError::spawn(&spec.command, e))?;
        let mut writer = pair
            .master
            .take_writer()
            .map_err(|e| RelayError::spawn(&spec.command, e))?;
        let killer = child.clone_killer();

        info!(command = %spec.command, pid = ?child.process_id(), "pty child started");

        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);
        let master = pair.master;
        std::thread::spawn(move || {
            let mut buf = [0u8; READ_BUF_SIZE];
            loop {
                match reader.read(&mut buf) {
                    // EIO on Linux once the child side closes.
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if event_tx.blocking_send(PtyEvent::Data(buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                }
            }
            let exit = match child.wait() {
                Ok(status) => {
                    let signal = status.signal().map(str::to_string);
                    let code = if signal.is_some() {
                        None
                    } else {
                        Some(status.exit_code())
                    };
                    PtyExit { code, signal }
                }
                Err(e) => {
                    warn!(error = %e, "waiting for pty child failed");
                    PtyExit {
                        code: None,
                        signal: None,
                    }
                }
            };
            debug!(code = ?exit.code, signal = ?exit.signal, "pty child exited");
            drop(master);
            let _ = event_tx.blocking_send(PtyEvent::Exit(exit));
        });

        let (input_tx, mut input_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        std::thread::spawn(move || {
            while let Some(bytes) = input_rx.blocking_recv() {
                if writer.write_all(&bytes).and_then(|_| writer.flush()).is_err() {
                    break;
                }
            }
        });

        Ok(SpawnedPty {
            events: event_rx,
            control: Box::new(NativeControl {
                input: Some(input_tx),
                killer,
            }),
        })
    }
}

struct NativeControl {
    input: Option<mpsc::UnboundedSender<Vec<u8>>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
}

impl PtyControl for NativeControl {
    fn write(&mut self, bytes: &[u8]) {
        let Some(input) = &self.input else { return };
        if input.send(bytes.to_vec()).is_err() {
            self.input = None;
        }
    }

    fn kill(&mut self) {
        if self.input.take().is_none() {
            return;
        }
        if let Err(e) = self.killer.kill() {
            debug!(error = %e, "kill after child already gone");
        }
    }
}
