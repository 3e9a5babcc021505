//! Payload loading and the length-and-checksum verification performed at
//! FIN time (§3.4, §4.7).

use std::path::Path;

use crate::err::Error;
use crate::segment::checksum;

/// Reference deployment's payload length.
pub const LOREMSIZE: usize = 6328;

/// A loaded payload and its precomputed RFC-1071 checksum, read once at
/// process startup and then treated as immutable (§4.7: "the expected sum
/// precomputed once at server startup").
#[derive(Debug, Clone)]
pub struct Payload {
    bytes: Vec<u8>,
    sum: u16,
}

impl Payload {
    /// Loads `path` and precomputes its checksum. Does not enforce any
    /// particular length; callers that require exactly `LOREMSIZE` bytes
    /// should check `payload.bytes().len()` themselves (the client does,
    /// via `Error::PayloadSizeMismatch`).
    pub fn load(path: impl AsRef<Path>) -> Result<Payload, Error> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let sum = checksum(&bytes);
        Ok(Payload { bytes, sum })
    }

    pub fn require_len(self, expected: usize, path: impl AsRef<Path>) -> Result<Payload, Error> {
        if self.bytes.len() != expected {
            return Err(Error::PayloadSizeMismatch {
                path: path.as_ref().display().to_string(),
                expected,
                actual: self.bytes.len(),
            });
        }
        Ok(self)
    }

    #[cfg(test)]
    pub(crate) fn from_bytes(bytes: Vec<u8>) -> Payload {
        let sum = checksum(&bytes);
        Payload { bytes, sum }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn checksum(&self) -> u16 {
        self.sum
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }
}

/// Compares a server's accumulated receive buffer against the expected
/// `(length, checksum)` pair. Mismatch on either attribute means the
/// transfer is corrupt and the server must reply RST (§4.5 item 3).
pub fn verify(buffer: &[u8], expected_len: usize, expected_sum: u16) -> bool {
    buffer.len() == expected_len && checksum(buffer) == expected_sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_accepts_exact_match() {
        let data = b"some reassembled stream".to_vec();
        let sum = checksum(&data);
        assert!(verify(&data, data.len(), sum));
    }

    #[test]
    fn verify_rejects_wrong_length() {
        let data = b"some reassembled stream".to_vec();
        let sum = checksum(&data);
        assert!(!verify(&data, data.len() + 1, sum));
    }

    #[test]
    fn verify_rejects_wrong_checksum() {
        let data = b"some reassembled stream".to_vec();
        let sum = checksum(&data);
        assert!(!verify(&data, data.len(), sum ^ 0xffff));
    }
}
