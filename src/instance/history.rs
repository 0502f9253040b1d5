/// Console output retained for replay to newly subscribed sessions.
///
/// Capped at `capacity` bytes. When an append would exceed the cap the
/// oldest text is discarded, cutting on a char boundary, so the buffer
/// always holds the most recent output.
#[derive(Debug, Clone)]
pub struct ConsoleHistory {
    buf: String,
    capacity: usize,
}

impl ConsoleHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: String::new(),
            capacity,
        }
    }

    pub fn push(&mut self, chunk: &str) {
        self.buf.push_str(chunk);

        if self.buf.len() > self.capacity {
            let mut cut = self.buf.len() - self.capacity;
            while !self.buf.is_char_boundary(cut) {
                cut += 1;
            }
            self.buf.drain(..cut);
        }
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }
}
