//! Frame splitter for GPRS device sockets
//!
//! Devices do not agree on a terminator. Suntech units end frames with `\r`,
//! TK102B units end them with `;` and usually send nothing after it.

/// Accumulates socket bytes and yields complete frames
#[derive(Debug)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    max_len: usize,
}

impl FrameBuffer {
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: Vec::with_capacity(256),
            max_len: max_len.max(1),
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete frame, without its terminator
    pub fn next_frame(&mut self) -> Option<String> {
        loop {
            let start = self
                .buf
                .iter()
                .position(|b| !matches!(b, b'\r' | b'\n' | b' '))?;
            if start > 0 {
                self.buf.drain(..start);
            }

            let semicolon_ends = ends_at_semicolon(&self.buf);
            let end = self.buf.iter().position(|&b| {
                b == b'\r' || b == b'\n' || (semicolon_ends && b == b';')
            });

            let frame = match end {
                Some(end) => {
                    let frame: Vec<u8> = self.buf.drain(..=end).take(end).collect();
                    frame
                },
                None if self.buf.len() > self.max_len => {
                    let frame: Vec<u8> = self.buf.drain(..self.max_len).collect();
                    frame
                },
                None => return None,
            };

            let text = String::from_utf8_lossy(&frame).trim().to_string();
            if !text.is_empty() {
                return Some(text);
            }
        }
    }

    /// Whatever is left once the peer goes away
    pub fn flush(&mut self) -> Option<String> {
        let text = String::from_utf8_lossy(&self.buf).trim().to_string();
        self.buf.clear();
        (!text.is_empty()).then_some(text)
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

fn ends_at_semicolon(buf: &[u8]) -> bool {
    buf.starts_with(b"##")
        || buf.starts_with(b"imei:")
        || buf.first().is_some_and(u8::is_ascii_digit)
}
