use std::time::Duration;

use tokio::time::Instant;

/// DECSET 2026: begin synchronized update.
pub const SYNC_BEGIN: &[u8] = b"\x1b[?2026h";
/// DECRST 2026: end synchronized update.
pub const SYNC_END: &[u8] = b"\x1b[?2026l";

const MARKER_LEN: usize = 8;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);
pub const DEFAULT_SYNC_HOLD_LIMIT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct CoalescerConfig {
    /// Quiet period after the last chunk before the buffer is flushed.
    pub debounce: Duration,
    /// Longest time an unterminated synchronized block is held back.
    pub sync_hold_limit: Duration,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            sync_hold_limit: DEFAULT_SYNC_HOLD_LIMIT,
        }
    }
}

/// Buffers PTY output into debounced frames without splitting synchronized
/// updates. Purely a pacing device: bytes leave in exactly the order they came in.
///
/// The coalescer does not own a timer. The owner polls [`deadline`](Self::deadline)
/// after every call and invokes [`on_deadline`](Self::on_deadline) once it passes;
/// each `push` replaces the previous deadline.
#[derive(Debug)]
pub struct FrameCoalescer {
    config: CoalescerConfig,
    buf: Vec<u8>,
    /// Offset from which the next marker search starts.
    scan_from: usize,
    sync_started: Option<Instant>,
    deadline: Option<Instant>,
}

impl FrameCoalescer {
    pub fn new(config: CoalescerConfig) -> Self {
        Self {
            config,
            buf: Vec::new(),
            scan_from: 0,
            sync_started: None,
            deadline: None,
        }
    }

    pub fn in_sync(&self) -> bool {
        self.sync_started.is_some()
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Accept a chunk. Returns frames that are complete right now, which only
    /// happens when a synchronized block closes.
    pub fn push(&mut self, chunk: &[u8], now: Instant) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        if chunk.is_empty() {
            return frames;
        }
        self.buf.extend_from_slice(chunk);

        loop {
            if self.sync_started.is_none() {
                match find(&self.buf, SYNC_BEGIN, self.scan_from) {
                    Some(idx) => {
                        self.sync_started = Some(now);
                        self.scan_from = idx + MARKER_LEN;
                    }
                    None => {
                        self.scan_from = rescan_point(self.buf.len());
                        break;
                    }
                }
            } else {
                match find(&self.buf, SYNC_END, self.scan_from) {
                    Some(idx) => {
                        let cut = idx + MARKER_LEN;
                        let rest = self.buf.split_off(cut);
                        frames.push(std::mem::replace(&mut self.buf, rest));
                        self.sync_started = None;
                        self.scan_from = 0;
                    }
                    None => {
                        self.scan_from = rescan_point(self.buf.len());
                        break;
                    }
                }
            }
        }

        self.rearm(now);
        frames
    }

    /// Called by the owner once [`deadline`](Self::deadline) has passed.
    pub fn on_deadline(&mut self, now: Instant) -> Option<Vec<u8>> {
        match self.deadline {
            Some(deadline) if now >= deadline => {}
            _ => return None,
        }
        if self.sync_started.is_some() {
            tracing::debug!(
                held = self.buf.len(),
                "synchronized update never closed, releasing"
            );
            return self.drain();
        }

        // A begin marker may be arriving in pieces; keep its head for the next chunk.
        let keep = partial_marker_suffix(&self.buf, SYNC_BEGIN);
        let tail = self.buf.split_off(self.buf.len() - keep);
        let frame = std::mem::replace(&mut self.buf, tail);
        self.scan_from = 0;
        self.deadline = None;
        (!frame.is_empty()).then_some(frame)
    }

    /// Release everything buffered, regardless of synchronized state.
    pub fn drain(&mut self) -> Option<Vec<u8>> {
        self.sync_started = None;
        self.scan_from = 0;
        self.deadline = None;
        if self.buf.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buf))
        }
    }

    fn rearm(&mut self, now: Instant) {
        self.deadline = match self.sync_started {
            Some(started) => Some(started + self.config.sync_hold_limit),
            None if self.buf.is_empty() => None,
            None => Some(now + self.config.debounce),
        };
    }
}

impl Default for FrameCoalescer {
    fn default() -> Self {
        Self::new(CoalescerConfig::default())
    }
}

fn rescan_point(len: usize) -> usize {
    len.saturating_sub(MARKER_LEN - 1)
}

/// Length of the longest proper prefix of `marker` that `buf` ends with.
fn partial_marker_suffix(buf: &[u8], marker: &[u8]) -> usize {
    (1..marker.len())
        .rev()
        .find(|&n| buf.ends_with(&marker[..n]))
        .unwrap_or(0)
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coalescer() -> FrameCoalescer {
        FrameCoalescer::new(CoalescerConfig::default())
    }

    fn run(chunks: &[&[u8]]) -> (Vec<Vec<u8>>, FrameCoalescer) {
        let mut c = coalescer();
        let now = Instant::now();
        let mut frames = Vec::new();
        for chunk in chunks {
            frames.extend(c.push(chunk, now));
        }
        (frames, c)
    }

    #[test]
    fn plain_chunks_wait_for_debounce() {
        let mut c = coalescer();
        let t0 = Instant::now();
        assert!(c.push(b"abc", t0).is_empty());
        assert_eq!(c.deadline(), Some(t0 + DEFAULT_DEBOUNCE));

        let t1 = t0 + Duration::from_millis(50);
        assert!(c.push(b"def", t1).is_empty());
        assert_eq!(c.deadline(), Some(t1 + DEFAULT_DEBOUNCE));

        assert_eq!(c.on_deadline(t0 + DEFAULT_DEBOUNCE), None);
        assert_eq!(c.on_deadline(t1 + DEFAULT_DEBOUNCE), Some(b"abcdef".to_vec()));
        assert_eq!(c.deadline(), None);
        assert_eq!(c.pending(), 0);
    }

    #[test]
    fn sync_block_suspends_debounce_and_flushes_on_end() {
        let mut c = coalescer();
        let t0 = Instant::now();
        assert!(c.push(b"\x1b[?2026hredraw", t0).is_empty());
        assert!(c.in_sync());
        assert_eq!(c.deadline(), Some(t0 + DEFAULT_SYNC_HOLD_LIMIT));

        let later = t0 + Duration::from_millis(500);
        assert_eq!(c.on_deadline(later), None);

        let frames = c.push(b" more\x1b[?2026l", later);
        assert_eq!(frames, vec![b"\x1b[?2026hredraw more\x1b[?2026l".to_vec()]);
        assert!(!c.in_sync());
        assert_eq!(c.deadline(), None);
    }

    #[test]
    fn markers_split_across_chunks_are_detected() {
        let (frames, c) = run(&[b"pre\x1b[?20", b"26hbody\x1b[", b"?2026", b"l"]);
        assert_eq!(frames, vec![b"pre\x1b[?2026hbody\x1b[?2026l".to_vec()]);
        assert_eq!(c.pending(), 0);
    }

    #[test]
    fn bytes_after_end_marker_stay_buffered() {
        let (frames, c) = run(&[b"\x1b[?2026hA\x1b[?2026ltail\x1b[?2026hB"]);
        assert_eq!(frames, vec![b"\x1b[?2026hA\x1b[?2026l".to_vec()]);
        assert!(c.in_sync());
        assert_eq!(c.pending(), b"tail\x1b[?2026hB".len());
    }

    #[test]
    fn two_blocks_in_one_chunk_become_two_frames() {
        let (frames, c) = run(&[b"\x1b[?2026hA\x1b[?2026l\x1b[?2026hB\x1b[?2026l"]);
        assert_eq!(
            frames,
            vec![
                b"\x1b[?2026hA\x1b[?2026l".to_vec(),
                b"\x1b[?2026hB\x1b[?2026l".to_vec()
            ]
        );
        assert_eq!(c.pending(), 0);
    }

    #[test]
    fn debounce_flush_holds_back_partial_begin_marker() {
        let mut c = coalescer();
        let t0 = Instant::now();
        c.push(b"status\x1b[?20", t0);
        assert_eq!(c.on_deadline(t0 + DEFAULT_DEBOUNCE), Some(b"status".to_vec()));
        assert_eq!(c.pending(), 5);

        let frames = c.push(b"26hframe\x1b[?2026l", t0 + DEFAULT_DEBOUNCE);
        assert_eq!(frames, vec![b"\x1b[?2026hframe\x1b[?2026l".to_vec()]);
    }

    #[test]
    fn unterminated_block_is_released_after_hold_limit() {
        let mut c = coalescer();
        let t0 = Instant::now();
        c.push(b"\x1b[?2026hstuck", t0);
        let frame = c.on_deadline(t0 + DEFAULT_SYNC_HOLD_LIMIT);
        assert_eq!(frame, Some(b"\x1b[?2026hstuck".to_vec()));
        assert!(!c.in_sync());
    }

    #[test]
    fn output_is_preserved_for_every_split_point() {
        let input: &[u8] = b"one\x1b[?2026htwo\x1b[?2026lthree\x1b[?2026hfour\x1b[?2026lfive";
        for a in 0..=input.len() {
            for b in a..=input.len() {
                let mut c = coalescer();
                let now = Instant::now();
                let mut out = Vec::new();
                for chunk in [&input[..a], &input[a..b], &input[b..]] {
                    for frame in c.push(chunk, now) {
                        out.extend(frame);
                    }
                }
                if let Some(rest) = c.drain() {
                    out.extend(rest);
                }
                assert_eq!(out, input, "split at {a}/{b}");
            }
        }
    }

    #[test]
    fn sync_blocks_are_never_split_for_any_split_point() {
        let input: &[u8] = b"x\x1b[?2026hAAAA\x1b[?2026ly\x1b[?2026hBB\x1b[?2026l";
        let blocks: [&[u8]; 2] = [b"\x1b[?2026hAAAA\x1b[?2026l", b"\x1b[?2026hBB\x1b[?2026l"];
        for a in 0..=input.len() {
            for b in a..=input.len() {
                let mut c = coalescer();
                let t0 = Instant::now();
                let mut frames = Vec::new();
                for (i, chunk) in [&input[..a], &input[a..b], &input[b..]].into_iter().enumerate() {
                    let now = t0 + DEFAULT_DEBOUNCE * 2 * i as u32;
                    if let Some(frame) = c.on_deadline(now) {
                        frames.push(frame);
                    }
                    frames.extend(c.push(chunk, now));
                }
                frames.extend(c.drain());
                for block in blocks {
                    assert!(
                        frames.iter().any(|f| f.windows(block.len()).any(|w| w == block)),
                        "block split at {a}/{b}: {frames:?}"
                    );
                }
            }
        }
    }
}
