//! Terminal control-sequence stripping and line-ending normalization.
//!
//! Device PTYs interleave CSI cursor movement, OSC title sequences, and bare
//! carriage returns with the text we actually want. Everything downstream
//! (prompt detection, template scoring, content hashing) operates on the
//! sanitized stream, so stripping must be stable regardless of how the bytes
//! were chunked by the transport.

/// Replacement marker for bytes that are not valid UTF-8 after stripping.
pub const REPLACEMENT: char = char::REPLACEMENT_CHARACTER;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ground,
    /// Saw ESC, waiting to classify the sequence.
    Escape,
    /// Inside `ESC [ ... final-byte`.
    Csi,
    /// Inside `ESC ] ... BEL|ST`.
    Osc,
    /// Saw ESC inside an OSC body; `\` completes the ST terminator.
    OscEscape,
    /// Charset designation `ESC ( X` / `ESC ) X`; one byte to swallow.
    Charset,
}

/// Incremental sanitizer.
///
/// Escape-sequence state and a pending carriage return survive across
/// [`feed`](Sanitizer::feed) calls, so splitting the input at any byte
/// boundary produces the same output as a single pass.
#[derive(Debug)]
pub struct Sanitizer {
    state: State,
    pending_cr: bool,
}

impl Sanitizer {
    pub fn new() -> Self {
        Self {
            state: State::Ground,
            pending_cr: false,
        }
    }

    /// Feed a chunk, appending sanitized bytes to `out`.
    pub fn feed(&mut self, chunk: &[u8], out: &mut Vec<u8>) {
        for &byte in chunk {
            match self.state {
                State::Ground => {
                    if self.pending_cr {
                        self.pending_cr = false;
                        if byte == b'\n' {
                            out.push(b'\n');
                            continue;
                        }
                        // CR not followed by newline is dropped; fall through
                        // and process the byte normally.
                    }
                    match byte {
                        0x1b => self.state = State::Escape,
                        b'\r' => self.pending_cr = true,
                        b'\n' | b'\t' => out.push(byte),
                        // Remaining C0 controls (BEL, BS, VT, FF, ...) are noise.
                        0x00..=0x1f => {}
                        _ => out.push(byte),
                    }
                }
                State::Escape => match byte {
                    b'[' => self.state = State::Csi,
                    b']' => self.state = State::Osc,
                    b'(' | b')' => self.state = State::Charset,
                    // Two-byte escape (RIS, keypad modes, ...): swallow it.
                    _ => self.state = State::Ground,
                },
                State::Csi => {
                    // Parameter and intermediate bytes are 0x20..=0x3f; the
                    // final byte 0x40..=0x7e ends the sequence.
                    if (0x40..=0x7e).contains(&byte) {
                        self.state = State::Ground;
                    }
                }
                State::Osc => match byte {
                    0x07 => self.state = State::Ground,
                    0x1b => self.state = State::OscEscape,
                    _ => {}
                },
                State::OscEscape => {
                    // ESC \ is ST; anything else restarts OSC body scanning.
                    self.state = if byte == b'\\' { State::Ground } else { State::Osc };
                }
                State::Charset => self.state = State::Ground,
            }
        }
    }

    /// Flush terminal state. A dangling CR or unterminated escape is dropped.
    pub fn finish(&mut self) {
        self.state = State::Ground;
        self.pending_cr = false;
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot sanitization. Idempotent: `sanitize(sanitize(x)) == sanitize(x)`.
pub fn sanitize(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut s = Sanitizer::new();
    s.feed(input, &mut out);
    s.finish();
    out
}

/// Sanitize and re-encode as text, substituting malformed bytes.
pub fn sanitize_text(input: &[u8]) -> String {
    String::from_utf8_lossy(&sanitize(input)).into_owned()
}
