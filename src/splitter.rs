use std::io::{self, BufRead};
use std::mem;

/// Line prefix that opens a new game block.
pub const GAME_START_MARKER: &str = "[Event ";

/// Streams a PGN source and yields one raw text block per game.
///
/// Single pass: once the reader is exhausted (or has failed) the iterator
/// only returns `None`. A read error is yielded once and the unread remainder
/// is dropped without emitting a partial block.
pub struct GameBlocks<R> {
    reader: R,
    line: Vec<u8>,
    buffer: String,
    done: bool,
}

impl<R: BufRead> GameBlocks<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::with_capacity(256),
            buffer: String::with_capacity(4096),
            done: false,
        }
    }

    fn finish(&mut self) -> Option<String> {
        self.done = true;
        (!self.buffer.is_empty()).then(|| mem::take(&mut self.buffer))
    }
}

impl<R: BufRead> Iterator for GameBlocks<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            self.line.clear();
            match self.reader.read_until(b'\n', &mut self.line) {
                Ok(0) => return self.finish().map(Ok),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    self.buffer.clear();
                    return Some(Err(e));
                }
            }

            let text = String::from_utf8_lossy(&self.line);
            let text = text.trim_end_matches(['\n', '\r']);

            let completed = if text.starts_with(GAME_START_MARKER) && !self.buffer.is_empty() {
                Some(mem::take(&mut self.buffer))
            } else {
                None
            };

            self.buffer.push_str(text);
            self.buffer.push('\n');

            if let Some(block) = completed {
                return Some(Ok(block));
            }
        }
    }
}
