use std::collections::VecDeque;

pub const DEFAULT_BACKLOG_CAPACITY: usize = 100;

/// Most recent PTY output, replayed to clients that join late.
#[derive(Debug)]
pub struct OutputBacklog {
    chunks: VecDeque<Vec<u8>>,
    max_chunks: usize,
}

impl OutputBacklog {
    pub fn new(max_chunks: usize) -> Self {
        Self {
            chunks: VecDeque::with_capacity(max_chunks.max(1)),
            max_chunks: max_chunks.max(1),
        }
    }

    /// Append a chunk, evicting the oldest once full.
    pub fn push(&mut self, data: Vec<u8>) {
        self.chunks.push_back(data);
        while self.chunks.len() > self.max_chunks {
            let _ = self.chunks.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_chunks
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.chunks.iter().map(Vec::as_slice)
    }

    /// All retained chunks concatenated. Joined before decoding so multi-byte
    /// characters split across chunks survive.
    pub fn joined(&self) -> Vec<u8> {
        let total = self.chunks.iter().map(Vec::len).sum();
        let mut out = Vec::with_capacity(total);
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        out
    }

    pub fn joined_lossy(&self) -> String {
        String::from_utf8_lossy(&self.joined()).into_owned()
    }
}

impl Default for OutputBacklog {
    fn default() -> Self {
        Self::new(DEFAULT_BACKLOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::OutputBacklog;

    #[test]
    fn replay_is_bounded_and_ordered() {
        let mut backlog = OutputBacklog::new(2);
        backlog.push(vec![1]);
        backlog.push(vec![2]);
        backlog.push(vec![3]);

        let all: Vec<&[u8]> = backlog.iter().collect();
        assert_eq!(all, vec![&[2u8][..], &[3u8][..]]);
        assert_eq!(backlog.joined(), vec![2, 3]);
    }

    #[test]
    fn never_exceeds_capacity_and_evicts_oldest_first() {
        let mut backlog = OutputBacklog::new(100);
        for i in 0..1_000u32 {
            backlog.push(i.to_string().into_bytes());
            assert!(backlog.len() <= backlog.capacity());
        }
        assert_eq!(backlog.len(), 100);
        let first = backlog.iter().next().expect("first chunk");
        assert_eq!(first, b"900");
        let last = backlog.iter().last().expect("last chunk");
        assert_eq!(last, b"999");
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut backlog = OutputBacklog::new(0);
        backlog.push(b"a".to_vec());
        backlog.push(b"b".to_vec());
        assert_eq!(backlog.capacity(), 1);
        assert_eq!(backlog.joined(), b"b");
    }

    #[test]
    fn joined_lossy_keeps_split_utf8() {
        let mut backlog = OutputBacklog::new(8);
        let glyph = "❯".as_bytes();
        backlog.push(glyph[..1].to_vec());
        backlog.push(glyph[1..].to_vec());
        backlog.push(b" 1. Yes".to_vec());
        assert_eq!(backlog.joined_lossy(), "❯ 1. Yes");
    }
}
