use vte::{Parser, Perform};

#[derive(Debug, Default)]
struct PlainText {
    out: String,
}

impl Perform for PlainText {
    fn print(&mut self, c: char) {
        self.out.push(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' => self.out.push('\n'),
            b'\r' => self.out.push('\r'),
            b'\t' => self.out.push('\t'),
            _ => {}
        }
    }
}

/// Removes escape sequences from a terminal byte stream.
///
/// Parser state survives between calls, so a sequence split across two
/// frames is still dropped as a whole.
pub struct AnsiStripper {
    parser: Parser,
    sink: PlainText,
}

impl AnsiStripper {
    pub fn new() -> Self {
        Self {
            parser: Parser::new(),
            sink: PlainText::default(),
        }
    }

    pub fn strip(&mut self, bytes: &[u8]) -> String {
        self.parser.advance(&mut self.sink, bytes);
        std::mem::take(&mut self.sink.out)
    }
}

impl Default for AnsiStripper {
    fn default() -> Self {
        Self::new()
    }
}
