use crate::error::IndexError;

/// Longest encoded form of a string key. Strings are stored without a
/// terminator, so this is also the longest accepted string.
pub const MAX_VARCHAR_LEN: usize = 127;

/// The key type an index is declared with. Every key stored in the index
/// carries the matching `Key` variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyType {
    /// 32-bit signed integer
    Short,
    /// 64-bit signed integer
    Int,
    /// string of fewer than 128 bytes
    Varchar,
}

impl KeyType {
    pub fn to_u8(&self) -> u8 {
        match self {
            KeyType::Short => 0,
            KeyType::Int => 1,
            KeyType::Varchar => 2,
        }
    }

    pub fn from_u8(v: u8) -> Result<Self, IndexError> {
        match v {
            0 => Ok(KeyType::Short),
            1 => Ok(KeyType::Int),
            2 => Ok(KeyType::Varchar),
            _ => Err(IndexError::fatal(&format!("invalid key type: {}", v))),
        }
    }
}

/// A typed key. The encoded form compares bytewise in the same order as
/// the semantic value: integers are written big-endian with the sign bit
/// inverted (so the order is independent of the host byte order), strings
/// are written as their raw bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Key {
    Short(i32),
    Int(i64),
    Varchar(String),
}

impl Key {
    pub fn key_type(&self) -> KeyType {
        match self {
            Key::Short(_) => KeyType::Short,
            Key::Int(_) => KeyType::Int,
            Key::Varchar(_) => KeyType::Varchar,
        }
    }

    /// Produce the memcmp-ordered byte form of this key.
    pub fn encode(&self) -> Result<Vec<u8>, IndexError> {
        match self {
            Key::Short(v) => {
                let mut bytes = (*v as u32).to_be_bytes().to_vec();
                bytes[0] ^= 0x80;
                Ok(bytes)
            }
            Key::Int(v) => {
                let mut bytes = (*v as u64).to_be_bytes().to_vec();
                bytes[0] ^= 0x80;
                Ok(bytes)
            }
            Key::Varchar(s) => {
                let raw = s.as_bytes();
                // the stored form runs up to the first NUL, if any
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                if end > MAX_VARCHAR_LEN {
                    return Err(IndexError::Failure(format!(
                        "varchar key too long: {} bytes",
                        end
                    )));
                }
                Ok(raw[..end].to_vec())
            }
        }
    }

    /// Reverse `encode`. `bytes` must come from a key of type
    /// `key_type`.
    pub fn decode(key_type: KeyType, bytes: &[u8]) -> Result<Self, IndexError> {
        match key_type {
            KeyType::Short => {
                if bytes.len() != 4 {
                    return Err(IndexError::fatal("bad short key length"));
                }
                let mut raw = [0u8; 4];
                raw.copy_from_slice(bytes);
                raw[0] ^= 0x80;
                Ok(Key::Short(u32::from_be_bytes(raw) as i32))
            }
            KeyType::Int => {
                if bytes.len() != 8 {
                    return Err(IndexError::fatal("bad int key length"));
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                raw[0] ^= 0x80;
                Ok(Key::Int(u64::from_be_bytes(raw) as i64))
            }
            KeyType::Varchar => {
                let s = String::from_utf8(bytes.to_vec())
                    .map_err(|_| IndexError::fatal("bad varchar key bytes"))?;
                Ok(Key::Varchar(s))
            }
        }
    }
}
