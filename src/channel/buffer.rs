//! Sanitizing output buffer with a hard size ceiling.
//!
//! Accumulates channel output, stripping control sequences as data arrives.
//! Only search the tail for prompt candidates where possible; full scans are
//! reserved for the aggregate-prompt count, whose inputs are capped anyway.

use crate::sanitize::Sanitizer;

/// Buffer for accumulating sanitized output from one session.
#[derive(Debug)]
pub struct OutputBuffer {
    buffer: Vec<u8>,
    sanitizer: Sanitizer,
    /// Hard ceiling on accumulated bytes.
    max_len: usize,
}

impl OutputBuffer {
    /// Create a buffer with the given byte ceiling.
    pub fn new(max_len: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            sanitizer: Sanitizer::new(),
            max_len,
        }
    }

    /// Append raw channel data, sanitizing on the way in.
    ///
    /// Returns `false` once the ceiling is exceeded; the caller aborts the
    /// session with `OutputTooLarge`.
    pub fn extend(&mut self, data: &[u8]) -> bool {
        self.sanitizer.feed(data, &mut self.buffer);
        self.buffer.len() <= self.max_len
    }

    /// The sanitized contents so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Lossy text view of the contents.
    pub fn as_str_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.buffer)
    }

    /// Count non-overlapping occurrences of `needle`.
    pub fn count_occurrences(&self, needle: &[u8]) -> usize {
        if needle.is_empty() || self.buffer.len() < needle.len() {
            return 0;
        }
        let mut count = 0;
        let mut at = 0;
        while at + needle.len() <= self.buffer.len() {
            if &self.buffer[at..at + needle.len()] == needle {
                count += 1;
                at += needle.len();
            } else {
                at += 1;
            }
        }
        count
    }

    /// Take ownership of the contents and reset for the next command.
    ///
    /// Sanitizer state is deliberately preserved: an escape sequence may
    /// straddle the boundary between two commands' reads.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extend_sanitizes() {
        let mut buf = OutputBuffer::new(1024);
        assert!(buf.extend(b"\x1b[32mok\x1b[0m\r\n"));
        assert_eq!(buf.as_slice(), b"ok\n");
    }

    #[test]
    fn test_ceiling() {
        let mut buf = OutputBuffer::new(8);
        assert!(buf.extend(b"12345678"));
        assert!(!buf.extend(b"9"));
    }

    #[test]
    fn test_count_occurrences() {
        let mut buf = OutputBuffer::new(1024);
        buf.extend(b"sw1# show ver\noutput\nsw1# next\nsw1#");
        assert_eq!(buf.count_occurrences(b"sw1#"), 3);
        assert_eq!(buf.count_occurrences(b"absent>"), 0);
    }

    #[test]
    fn test_take_resets() {
        let mut buf = OutputBuffer::new(1024);
        buf.extend(b"data");
        assert_eq!(buf.take(), b"data");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_escape_across_take_boundary() {
        let mut buf = OutputBuffer::new(1024);
        buf.extend(b"first\x1b[");
        buf.take();
        buf.extend(b"0mclean");
        assert_eq!(buf.as_slice(), b"clean");
    }
}
