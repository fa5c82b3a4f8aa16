//! Body decoding: UTF-8 reassembly and usage sentinel splitting
//!
//! A response body is conversational text optionally followed by
//! [`USAGE_SENTINEL`] and a JSON metadata object. Chunk boundaries are
//! arbitrary, so both the sentinel and multi-byte characters may arrive
//! split across chunks; the types here make the result independent of where
//! the body was cut.

/// Marker separating conversational text from the usage metadata
pub const USAGE_SENTINEL: &str = "__USAGE_METADATA__:";

/// Reassembles UTF-8 text from arbitrarily cut byte chunks
///
/// An incomplete trailing character is carried to the next chunk. Invalid
/// sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    carry: Vec<u8>,
}

impl Utf8ChunkDecoder {
    /// Creates a decoder with an empty carry buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes one chunk, returning every complete character it finishes
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.carry);
        buf.extend_from_slice(chunk);

        let mut out = String::with_capacity(buf.len());
        let mut rest = buf.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    // valid_up_to guarantees this prefix is UTF-8
                    if let Ok(valid) = std::str::from_utf8(valid) {
                        out.push_str(valid);
                    }
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[len..];
                        }
                        None => {
                            self.carry = tail.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flushes a dangling partial character as U+FFFD
    pub fn finish(&mut self) -> String {
        if self.carry.is_empty() {
            return String::new();
        }
        let carry = std::mem::take(&mut self.carry);
        String::from_utf8_lossy(&carry).into_owned()
    }
}

/// Splits decoded body text into conversational text and metadata text
///
/// Before the sentinel is seen, any trailing text that could be the start
/// of the sentinel is withheld until a later chunk decides it. After the
/// sentinel, all text is metadata.
///
/// # Examples
///
/// ```
/// use personachat::ingest::demux::SentinelDemux;
///
/// let mut demux = SentinelDemux::new();
/// assert_eq!(demux.push("Hello __USAGE"), "Hello ");
/// assert_eq!(demux.push("_METADATA__:{\"input_tokens\":1}"), "");
/// assert!(demux.sentinel_seen());
/// assert_eq!(demux.metadata(), "{\"input_tokens\":1}");
/// ```
#[derive(Debug, Default)]
pub struct SentinelDemux {
    pending: String,
    metadata: String,
    seen: bool,
}

impl SentinelDemux {
    /// Creates a demultiplexer that has not seen the sentinel yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds decoded text, returning the conversational text it releases
    pub fn push(&mut self, text: &str) -> String {
        if self.seen {
            self.metadata.push_str(text);
            return String::new();
        }

        self.pending.push_str(text);
        if let Some(pos) = self.pending.find(USAGE_SENTINEL) {
            self.seen = true;
            self.metadata
                .push_str(&self.pending[pos + USAGE_SENTINEL.len()..]);
            self.pending.truncate(pos);
            return std::mem::take(&mut self.pending);
        }

        let hold = held_suffix_len(&self.pending);
        let held = self.pending.split_off(self.pending.len() - hold);
        std::mem::replace(&mut self.pending, held)
    }

    /// Releases withheld text at end of stream
    pub fn finish(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }

    /// True once the sentinel has been found
    pub fn sentinel_seen(&self) -> bool {
        self.seen
    }

    /// Metadata text received after the sentinel so far
    pub fn metadata(&self) -> &str {
        &self.metadata
    }

    /// Length of text currently withheld
    pub fn withheld_len(&self) -> usize {
        self.pending.len()
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of the
/// sentinel
fn held_suffix_len(text: &str) -> usize {
    let max = (USAGE_SENTINEL.len() - 1).min(text.len());
    (1..=max)
        .rev()
        .find(|&k| {
            text.is_char_boundary(text.len() - k) && text.ends_with(&USAGE_SENTINEL[..k])
        })
        .unwrap_or(0)
}
