pub mod key;
pub mod pair;
pub mod record;

pub use key::{Key, KeyType, MAX_VARCHAR_LEN};
pub use pair::Pair;
pub use record::{Record, MAX_PAYLOAD_LEN};
