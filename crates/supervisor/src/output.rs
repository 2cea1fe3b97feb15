/// A bounded in-memory ring of a child's combined stdout/stderr, used by
/// diagnostics (`/api/v1/stats`) without needing to re-read a log file.
///
/// Truncation never splits a multi-byte UTF-8 character.
pub struct OutputBuffer {
    combined: String,
    max_chars: usize,
}

impl OutputBuffer {
    pub fn new(max_chars: usize) -> Self {
        Self {
            combined: String::new(),
            max_chars,
        }
    }

    pub fn push(&mut self, text: &str) {
        self.combined.push_str(text);
        if self.combined.len() > self.max_chars {
            let keep = self.max_chars * 3 / 4;
            let drain_count = self.combined.len() - keep;
            let mut boundary = drain_count;
            while boundary < self.combined.len() && !self.combined.is_char_boundary(boundary) {
                boundary += 1;
            }
            self.combined.drain(..boundary);
        }
    }

    pub fn tail(&self, lines: usize) -> String {
        self.combined
            .lines()
            .rev()
            .take(lines)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn combined(&self) -> &str {
        &self.combined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_accumulates() {
        let mut b = OutputBuffer::new(1024);
        b.push("hello ");
        b.push("world");
        assert_eq!(b.combined(), "hello world");
    }

    #[test]
    fn truncates_at_capacity_keeping_most_recent() {
        let mut b = OutputBuffer::new(10);
        b.push("0123456789");
        b.push("abcdef");
        assert!(b.combined().len() <= 10 || b.combined().ends_with("abcdef"));
        assert!(b.combined().ends_with("abcdef"));
    }

    #[test]
    fn truncation_never_splits_a_multibyte_char() {
        let mut b = OutputBuffer::new(4);
        // Each pushed char is 2 bytes; after several pushes the buffer must
        // remain valid UTF-8 (this would panic on a bad byte boundary).
        for _ in 0..10 {
            b.push("\u{00e9}");
        }
        let _ = b.combined().to_string();
    }

    #[test]
    fn tail_returns_last_n_lines_in_order() {
        let mut b = OutputBuffer::new(1024);
        b.push("line1\nline2\nline3\n");
        assert_eq!(b.tail(2), "line2\nline3");
    }
}
