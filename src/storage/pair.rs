use std::fmt;

use crate::storage::{key::MAX_VARCHAR_LEN, record::MAX_PAYLOAD_LEN};

/// Capacity of the key part of a slot. Integer keys use 4 or 8 bytes;
/// string keys up to 127.
pub const PAIR_KEY_CAP: usize = MAX_VARCHAR_LEN;

/// On-disk size of one stored pair: length byte + key bytes + length
/// byte + payload bytes.
pub const PAIR_BYTES: usize = 1 + PAIR_KEY_CAP + 1 + MAX_PAYLOAD_LEN;

/// One stored entry: an encoded key and its payload. The derived
/// ordering — key bytes first, payload bytes second — is the global
/// order of an index, so duplicates of one key sort by payload.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pair {
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
}

impl Pair {
    pub fn new(key: Vec<u8>, payload: Vec<u8>) -> Self {
        Self { key, payload }
    }

    /// The smallest pair carrying `key`: positions range searches at the
    /// first duplicate.
    pub fn lower_bound(key: &[u8]) -> Self {
        Self {
            key: key.to_vec(),
            payload: Vec::new(),
        }
    }

    /// The smallest pair of the whole index order.
    pub fn min_pair() -> Self {
        Self {
            key: Vec::new(),
            payload: Vec::new(),
        }
    }

    /// The least pair strictly greater than `self`. Only used as a search
    /// bound; the payload may exceed the storage cap by the appended byte.
    pub fn step_after(&self) -> Self {
        let mut payload = self.payload.clone();
        payload.push(0);
        Self {
            key: self.key.clone(),
            payload,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PAIR_BYTES);
        buf.push(self.key.len() as u8);
        buf.extend_from_slice(&self.key);
        buf.resize(1 + PAIR_KEY_CAP, 0);
        buf.push(self.payload.len() as u8);
        buf.extend_from_slice(&self.payload);
        buf.resize(PAIR_BYTES, 0);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let key_len = bytes[0] as usize;
        let key = bytes[1..1 + key_len].to_vec();
        let payload_len = bytes[1 + PAIR_KEY_CAP] as usize;
        let payload_start = 1 + PAIR_KEY_CAP + 1;
        let payload = bytes[payload_start..payload_start + payload_len].to_vec();
        Self { key, payload }
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "({}, {})",
            hex::encode(&self.key),
            String::from_utf8_lossy(&self.payload)
        )
    }
}

impl fmt::Debug for Pair {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialisation_round_trip() {
        let pair = Pair::new(b"key".to_vec(), b"payload".to_vec());
        let bytes = pair.to_bytes();
        assert_eq!(bytes.len(), PAIR_BYTES);
        assert_eq!(Pair::from_bytes(&bytes), pair);

        let empty = Pair::new(Vec::new(), Vec::new());
        assert_eq!(Pair::from_bytes(&empty.to_bytes()), empty);
    }

    #[test]
    fn test_order_key_first_then_payload() {
        let a1 = Pair::new(b"a".to_vec(), b"1".to_vec());
        let a2 = Pair::new(b"a".to_vec(), b"2".to_vec());
        let b0 = Pair::new(b"b".to_vec(), Vec::new());

        assert!(a1 < a2);
        assert!(a2 < b0);
        assert!(Pair::lower_bound(b"a") <= a1);
        assert!(a1.step_after() > a1);
        assert!(a1.step_after() < a2);
    }
}
