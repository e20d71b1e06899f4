//! Owned audio produced by the synthesis client and consumed by a playback sink.

/// Encoded WAV bytes for one utterance.
///
/// Moved by value from the synthesizer to the sink; nothing else holds on to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBuffer {
    bytes: Vec<u8>,
}

impl AudioBuffer {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// True when the buffer starts with a RIFF/WAVE header.
    pub fn looks_like_wav(&self) -> bool {
        self.bytes.len() >= 12 && &self.bytes[0..4] == b"RIFF" && &self.bytes[8..12] == b"WAVE"
    }
}

impl From<Vec<u8>> for AudioBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}
