use crate::storage::key::Key;

/// Upper bound on the stored payload size. Longer payloads are rejected
/// on insert; lookups copy at most this many bytes back to the caller.
pub const MAX_PAYLOAD_LEN: usize = 100;

/// A (key, payload) pair as seen by callers of the public API. The
/// payload is an opaque byte string; its content, including any trailing
/// NUL byte, is preserved verbatim. An empty payload passed to
/// `delete_record` means "delete every entry with this key".
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub key: Key,
    pub payload: Vec<u8>,
}

impl Record {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            payload: Vec::new(),
        }
    }

    pub fn with_payload(key: Key, payload: &[u8]) -> Self {
        Self {
            key,
            payload: payload.to_vec(),
        }
    }

    /// Fill the payload from a stored entry, truncated to the cap.
    pub(crate) fn set_payload(&mut self, payload: &[u8]) {
        let len = payload.len().min(MAX_PAYLOAD_LEN);
        self.payload = payload[..len].to_vec();
    }

    /// The miss convention: the caller's payload is cleared.
    pub(crate) fn clear_payload(&mut self) {
        self.payload.clear();
    }
}
