mod concurrent_status;
mod tx;
mod wait_for_graph;

pub use concurrent_status::{ConcurrentStatus, Lock, LockTarget, Permission};
pub use tx::{Transaction, TransactionID, TransactionStatus};
