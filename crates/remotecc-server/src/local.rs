use std::io::{IsTerminal, Read, Write};

use crossterm::terminal;
use tokio::sync::mpsc;
use tracing::{debug, info};

use libremotecc::{Hub, OutputMirror};

const CTRL_C: u8 = 0x03;

/// Copies child output to the operator's terminal from a writer thread, so a
/// stalled terminal never holds up the session pump.
#[derive(Debug, Clone)]
pub struct StdoutMirror {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl StdoutMirror {
    pub fn spawn() -> Self {
        Self::with_writer(std::io::stdout())
    }

    fn with_writer<W: Write + Send + 'static>(mut out: W) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        std::thread::spawn(move || {
            while let Some(bytes) = rx.blocking_recv() {
                if let Err(e) = out.write_all(&bytes).and_then(|()| out.flush()) {
                    debug!(error = %e, "local mirror stopped");
                    break;
                }
            }
        });
        Self { tx }
    }
}

impl OutputMirror for StdoutMirror {
    fn mirror(&self, bytes: &[u8]) {
        let _ = self.tx.send(bytes.to_vec());
    }
}

/// Restores cooked mode on drop, including on panic.
pub struct RawModeGuard;

impl RawModeGuard {
    pub fn enable() -> std::io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Forward the operator's keystrokes to the child. Ctrl+C shuts the hub
/// down instead of reaching the child.
///
/// Returns `None` when stdin is not a terminal.
pub fn spawn_passthrough(hub: Hub) -> anyhow::Result<Option<RawModeGuard>> {
    if !std::io::stdin().is_terminal() {
        debug!("stdin is not a terminal, local input disabled");
        return Ok(None);
    }
    let guard = RawModeGuard::enable()?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    // Plain thread: a blocking stdin read must not hold up runtime shutdown.
    std::thread::spawn(move || {
        let mut stdin = std::io::stdin().lock();
        let mut buf = [0u8; 1024];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            let (forward, interrupted) = split_interrupt(&bytes);
            if !forward.is_empty() {
                hub.accept_local_input(forward).await;
            }
            if interrupted {
                info!("ctrl+c on local terminal");
                hub.shutdown().await;
                break;
            }
        }
    });

    Ok(Some(guard))
}

/// Bytes to forward and whether Ctrl+C was pressed.
fn split_interrupt(bytes: &[u8]) -> (&[u8], bool) {
    match bytes.iter().position(|&b| b == CTRL_C) {
        Some(idx) => (&bytes[..idx], true),
        None => (bytes, false),
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    use super::*;

    /// Blocks every write until released, then reports what it wrote.
    struct GatedWriter {
        gate: std_mpsc::Receiver<()>,
        written: std_mpsc::Sender<Vec<u8>>,
    }

    impl Write for GatedWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let _ = self.gate.recv();
            let _ = self.written.send(buf.to_vec());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn stalled_terminal_does_not_block_mirror() {
        let (release, gate) = std_mpsc::channel();
        let (written, seen) = std_mpsc::channel();
        let mirror = StdoutMirror::with_writer(GatedWriter { gate, written });

        mirror.mirror(b"one ");
        mirror.mirror(b"two ");
        mirror.mirror(b"three");
        assert!(seen.try_recv().is_err());

        let mut out = Vec::new();
        for _ in 0..3 {
            release.send(()).expect("release");
            out.extend(seen.recv_timeout(Duration::from_secs(5)).expect("write"));
        }
        assert_eq!(out, b"one two three");
    }

    #[test]
    fn plain_input_is_forwarded() {
        assert_eq!(split_interrupt(b"yes\r"), (&b"yes\r"[..], false));
    }

    #[test]
    fn ctrl_c_stops_forwarding() {
        assert_eq!(split_interrupt(b"ab\x03cd"), (&b"ab"[..], true));
        assert_eq!(split_interrupt(b"\x03"), (&b""[..], true));
    }
}
