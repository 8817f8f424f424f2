use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{types::IndexResult, Database, IndexError};

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum TransactionStatus {
    Active,
    Aborted,
    Committed,
}

pub type TransactionID = u64;

static TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// A transaction handle. Cheap to clone; identity is the id, which
/// increases monotonically by 1.
#[derive(Eq, PartialEq, Clone)]
pub struct Transaction {
    id: TransactionID,
}

impl Transaction {
    /// Begin a transaction: allocate the id, register it as active and
    /// write the begin record. A log fault surfaces as `Failure` and
    /// the id is retired unused.
    pub fn new() -> Result<Self, IndexError> {
        let id = TRANSACTION_ID.fetch_add(1, Ordering::Relaxed);
        let instance = Self { id };

        Database::mut_concurrent_status()
            .transaction_status
            .insert(id, TransactionStatus::Active);

        if let Err(e) = instance.start() {
            Database::mut_concurrent_status()
                .transaction_status
                .insert(id, TransactionStatus::Aborted);
            return Err(e);
        }

        Ok(instance)
    }

    fn start(&self) -> IndexResult {
        Database::mut_log_manager().log_start(self)
    }

    pub fn commit(&self) -> IndexResult {
        self.ensure_active()?;

        // step 1: close the cursors owned by this transaction
        Database::mut_cursor_table().close_all(self.id);

        // step 2: flush the pages this transaction dirtied (forcing the
        // log up to each page LSN first), then write the COMMIT record
        // and force the log
        {
            let buffer_pool = Database::buffer_pool();
            let mut log_manager = Database::mut_log_manager();
            buffer_pool.flush_pages(self, &mut log_manager)?;
            log_manager.log_commit(self)?;
        }

        // step 3: release all locks (strict two-phase locking)
        let mut concurrent_status = Database::mut_concurrent_status();
        concurrent_status.remove_relation(self);
        concurrent_status
            .transaction_status
            .insert(self.id, TransactionStatus::Committed);

        Ok(())
    }

    pub fn abort(&self) -> IndexResult {
        self.ensure_active()?;

        // step 1: close the cursors owned by this transaction
        Database::mut_cursor_table().close_all(self.id);

        // step 2: roll back through the log, writing compensation
        // records, then write the ABORT record
        {
            let buffer_pool = Database::buffer_pool();
            let mut log_manager = Database::mut_log_manager();
            log_manager.log_abort(self, &buffer_pool)?;
        }

        // step 3: release all locks
        let mut concurrent_status = Database::mut_concurrent_status();
        concurrent_status.remove_relation(self);
        concurrent_status
            .transaction_status
            .insert(self.id, TransactionStatus::Aborted);

        Ok(())
    }

    fn ensure_active(&self) -> IndexResult {
        match Database::concurrent_status().transaction_status.get(&self.id) {
            Some(TransactionStatus::Active) => Ok(()),
            _ => Err(IndexError::TxnDoesNotExist),
        }
    }

    pub fn get_id(&self) -> TransactionID {
        self.id
    }
}

impl std::hash::Hash for Transaction {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "tx_{}", self.id)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}
