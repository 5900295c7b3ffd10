//! Prompt detection state machine.
//!
//! Two modes. *Probe* runs at initial contact: once the channel has been
//! quiet for the configured interval, the last non-empty line ending in a
//! prompt character is adopted as the expected prompt. *Tracking* runs for
//! every subsequent command: completion requires either the buffer to end
//! with the expected prompt anchored at a line start, or the expected prompt
//! to occur exactly once more than the number of commands issued so far.
//! The aggregate count is what keeps prompt-like text inside command output
//! from terminating a read early.

use crate::channel::OutputBuffer;

/// Characters a prompt line may end with.
const PROMPT_TERMINATORS: [char; 4] = ['#', '>', ':', '$'];

/// Detection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    /// Initial contact: no expected prompt yet.
    Probe,
    /// Expected prompt adopted; matching against it.
    Tracking,
}

/// Result of a detection check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptMatch {
    pub found: bool,
    pub prompt: String,
}

/// Explicit prompt state for one session.
///
/// The aggregate-prompt counter lives here and nowhere else; the session
/// increments it once per command sent.
#[derive(Debug)]
pub struct PromptDetector {
    mode: PromptMode,
    expected: String,
    commands_issued: usize,
}

impl PromptDetector {
    pub fn new() -> Self {
        Self {
            mode: PromptMode::Probe,
            expected: String::new(),
            commands_issued: 0,
        }
    }

    pub fn mode(&self) -> PromptMode {
        self.mode
    }

    pub fn expected(&self) -> &str {
        &self.expected
    }

    pub fn commands_issued(&self) -> usize {
        self.commands_issued
    }

    /// Record that one more command has been written to the channel.
    pub fn command_issued(&mut self) {
        self.commands_issued += 1;
    }

    /// Adopt a prompt and switch to tracking mode.
    pub fn adopt(&mut self, prompt: impl Into<String>) {
        self.expected = prompt.into();
        self.mode = PromptMode::Tracking;
    }

    /// Forget the adopted prompt. Required after commands that rewrite the
    /// prompt mid-session (privilege elevation, hostname change). The
    /// aggregate count restarts with the next probe's reseeded buffer.
    pub fn reprobe(&mut self) {
        self.expected.clear();
        self.mode = PromptMode::Probe;
        self.commands_issued = 0;
    }

    /// Probe-mode extraction over a quiet buffer.
    ///
    /// Picks the last non-empty line whose trailing character is one of
    /// `# > : $`. The candidate is trimmed and must be at least two
    /// characters with no control bytes.
    pub fn probe(buffer: &str) -> Option<String> {
        for line in buffer.lines().rev() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let last = line.chars().last()?;
            if !PROMPT_TERMINATORS.contains(&last) {
                continue;
            }
            let candidate = line.trim_start();
            if candidate.len() < 2 || candidate.chars().any(char::is_control) {
                continue;
            }
            return Some(candidate.to_string());
        }
        None
    }

    /// Tracking-mode completion check against the session buffer.
    ///
    /// A pure function of the accumulated buffer and the counter, so the
    /// outcome is independent of how the bytes were chunked.
    pub fn check(&self, buffer: &OutputBuffer) -> PromptMatch {
        if self.mode == PromptMode::Probe || self.expected.is_empty() {
            return PromptMatch {
                found: false,
                prompt: String::new(),
            };
        }

        let text = buffer.as_str_lossy();
        let trimmed = text.trim_end_matches([' ', '\t']);

        let anchored = trimmed.ends_with(&self.expected) && {
            let before = trimmed.len() - self.expected.len();
            before == 0 || trimmed.as_bytes()[before - 1] == b'\n'
        };

        let found = if anchored {
            true
        } else {
            buffer.count_occurrences(self.expected.as_bytes()) == self.commands_issued + 1
        };

        PromptMatch {
            found,
            prompt: self.expected.clone(),
        }
    }
}

impl Default for PromptDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_with(text: &[u8]) -> OutputBuffer {
        let mut buf = OutputBuffer::new(64 * 1024);
        buf.extend(text);
        buf
    }

    #[test]
    fn test_probe_last_prompt_line() {
        let banner = "Welcome to switch\nUnauthorized access prohibited\n\ncore-sw-01# ";
        assert_eq!(PromptDetector::probe(banner), Some("core-sw-01#".to_string()));
    }

    #[test]
    fn test_probe_terminators() {
        assert_eq!(PromptDetector::probe("host>"), Some("host>".to_string()));
        assert_eq!(PromptDetector::probe("login:"), Some("login:".to_string()));
        assert_eq!(PromptDetector::probe("user@box$"), Some("user@box$".to_string()));
        assert_eq!(PromptDetector::probe("no terminator here"), None);
    }

    #[test]
    fn test_probe_rejects_short_and_control() {
        assert_eq!(PromptDetector::probe("#"), None);
        assert_eq!(PromptDetector::probe("a\u{1}b#\nx"), None);
    }

    #[test]
    fn test_probe_skips_trailing_blank_lines() {
        assert_eq!(
            PromptDetector::probe("output\nsw1#\n\n   \n"),
            Some("sw1#".to_string())
        );
    }

    #[test]
    fn test_tracking_newline_anchor() {
        let mut det = PromptDetector::new();
        det.adopt("sw1#");
        det.command_issued();

        let buf = buffer_with(b"show version\nCisco IOS\nsw1# ");
        assert!(det.check(&buf).found);

        // Prompt text mid-line does not anchor.
        let buf = buffer_with(b"banner mentions sw1# but keeps going");
        assert!(!det.check(&buf).found);
    }

    #[test]
    fn test_tracking_aggregate_count() {
        let mut det = PromptDetector::new();
        det.adopt("sw1#");
        det.command_issued();
        det.command_issued();

        // Two commands issued: three occurrences mean both completed even
        // though output text follows the last prompt.
        let buf = buffer_with(b"sw1# cmd1\nout\nsw1# cmd2\nout\nsw1# trailing");
        assert!(det.check(&buf).found);

        // Only two occurrences and no anchored tail: still waiting.
        let buf = buffer_with(b"sw1# cmd1\nout\nsw1# cmd2 running");
        assert!(!det.check(&buf).found);
    }

    #[test]
    fn test_probe_mode_never_matches() {
        let det = PromptDetector::new();
        let buf = buffer_with(b"anything#\n");
        assert!(!det.check(&buf).found);
    }

    #[test]
    fn test_chunking_stability() {
        // Same bytes, different chunkings, same verdict (feed robustness).
        let mut det = PromptDetector::new();
        det.adopt("edge-rt-02>");
        det.command_issued();

        let bytes: &[u8] = b"show route\r\ninet.0: 5 routes\r\nedge-rt-02> ";
        for split in 0..bytes.len() {
            let mut buf = OutputBuffer::new(64 * 1024);
            buf.extend(&bytes[..split]);
            buf.extend(&bytes[split..]);
            assert!(det.check(&buf).found, "split at {}", split);
        }
    }

    #[test]
    fn test_reprobe_clears_expected_and_counter() {
        let mut det = PromptDetector::new();
        det.adopt("sw1>");
        det.command_issued();
        det.command_issued();
        det.reprobe();
        assert_eq!(det.mode(), PromptMode::Probe);
        assert!(det.expected().is_empty());
        assert_eq!(det.commands_issued(), 0);
    }
}
