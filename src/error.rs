use backtrace::Backtrace;
use log::error;
use thiserror::Error;

/// The closed set of failure outcomes the store reports to callers.
/// Success is `Ok`; everything else maps onto exactly one variant.
///
/// `KeyNotFound` and `EndOfIndex` are expected outcomes of lookups and
/// iteration, not faults; they never taint an explicit transaction.
/// `Deadlock` is recoverable by abort-and-retry. `Failure` is not.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("index already exists")]
    DbExists,

    #[error("index does not exist")]
    DbDoesNotExist,

    #[error("key not found")]
    KeyNotFound,

    #[error("end of index")]
    EndOfIndex,

    #[error("entry already exists")]
    EntryExists,

    #[error("entry does not exist")]
    EntryDoesNotExist,

    #[error("transaction does not exist")]
    TxnDoesNotExist,

    #[error("deadlock detected")]
    Deadlock,

    #[error("failure: {0}")]
    Failure(String),
}

impl IndexError {
    /// An unrecoverable fault (I/O error, corrupt log, ...). The
    /// construction site is logged with a backtrace; the enclosing
    /// transaction is expected to abort.
    pub fn fatal(msg: &str) -> Self {
        error!("fatal: {}\n{:?}", msg, Backtrace::new());
        IndexError::Failure(msg.to_string())
    }
}
