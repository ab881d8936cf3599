use remotecc_protocol::QuestionOption;

/// Keys a remote client can press in the agent's menus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Up,
    Down,
    Enter,
}

impl Key {
    pub fn sequence(self) -> &'static str {
        match self {
            Key::Up => "\x1b[A",
            Key::Down => "\x1b[B",
            Key::Enter => "\r",
        }
    }
}

/// Client-side highlight over the latest option list. Wraps at both ends.
///
/// Starts at the first option whenever a new list arrives, whatever the
/// agent marked as selected.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MenuCursor {
    len: usize,
    index: usize,
}

impl MenuCursor {
    pub fn reset(&mut self, options: &[QuestionOption]) {
        self.len = options.len();
        self.index = 0;
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.index = 0;
    }

    pub fn index(&self) -> Option<usize> {
        (self.len > 0).then_some(self.index)
    }

    pub fn up(&mut self) {
        if self.len > 0 {
            self.index = (self.index + self.len - 1) % self.len;
        }
    }

    pub fn down(&mut self) {
        if self.len > 0 {
            self.index = (self.index + 1) % self.len;
        }
    }
}
