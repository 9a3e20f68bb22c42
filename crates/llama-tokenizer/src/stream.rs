//! Streaming UTF-8 assembly.
//!
//! A single token may carry only part of a multi-byte character. Bytes are
//! held until they complete a character; only whole characters are released.

/// Longest valid UTF-8 sequence.
const MAX_SEQ: usize = 4;

#[derive(Debug, Clone, Default)]
pub struct Utf8Stream {
    pending: Vec<u8>,
}

impl Utf8Stream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every character now complete.
    ///
    /// Bytes that can never form a valid character are replaced with
    /// U+FFFD rather than held.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    out.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(err) => {
                    let good = err.valid_up_to();
                    // valid_up_to guarantees this prefix is UTF-8
                    out.push_str(&String::from_utf8_lossy(&self.pending[..good]));
                    match err.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..good + bad);
                        }
                        None => {
                            // Incomplete tail; wait for more bytes.
                            self.pending.drain(..good);
                            debug_assert!(self.pending.len() < MAX_SEQ);
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Bytes held back waiting for the rest of a character.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop any incomplete tail, returning how many bytes were discarded.
    pub fn finish(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}
