//! Line framing for the serial byte stream

use bytes::{Buf, BytesMut};

/// Splits modem output into trimmed lines
///
/// Lines end at `\r` or `\n`. The `>` send prompt is not followed by a line
/// terminator, so a buffer holding only the prompt is emitted as `">"`.
pub struct LineBuffer {
    buf: BytesMut,
    max_len: usize,
}

impl LineBuffer {
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
            max_len,
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn next_line(&mut self) -> Option<String> {
        loop {
            if let Some(pos) = self.buf.iter().position(|b| *b == b'\r' || *b == b'\n') {
                let line = self.buf.split_to(pos);
                self.buf.advance(1);
                let text = String::from_utf8_lossy(&line).trim().to_string();
                if text.is_empty() {
                    continue;
                }
                return Some(text);
            }

            if self.buf.trim_ascii() == b">" {
                self.buf.clear();
                return Some(">".to_string());
            }

            if self.buf.len() > self.max_len {
                let line = self.buf.split();
                return Some(String::from_utf8_lossy(&line).trim().to_string());
            }
            return None;
        }
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_splits_on_cr_and_lf() {
        let mut lines = LineBuffer::new(64);
        lines.extend(b"\r\n+CMTI: \"SM\",1\r\n\r\nOK\r\n+CM");
        assert_eq!(lines.next_line().unwrap(), "+CMTI: \"SM\",1");
        assert_eq!(lines.next_line().unwrap(), "OK");
        assert!(lines.next_line().is_none());
        assert_eq!(lines.buffered(), 3);

        lines.extend(b"GS: 4\r");
        assert_eq!(lines.next_line().unwrap(), "+CMGS: 4");
    }

    #[test]
    fn test_prompt_without_terminator() {
        let mut lines = LineBuffer::new(64);
        lines.extend(b"\r\n> ");
        assert_eq!(lines.next_line().unwrap(), ">");
        assert!(lines.next_line().is_none());
    }

    #[test]
    fn test_overlong_line_is_cut() {
        let mut lines = LineBuffer::new(4);
        lines.extend(b"0123456789");
        assert_eq!(lines.next_line().unwrap(), "0123456789");
        assert_eq!(lines.buffered(), 0);
    }
}
