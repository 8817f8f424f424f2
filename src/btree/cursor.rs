use std::collections::HashMap;

use crate::{storage::pair::Pair, transaction::TransactionID};

/// Position of one transaction's cursor in one index. Positions are
/// value-based (the pair itself, or the sought key), so splits and
/// deletes performed by the owning transaction never invalidate them.
#[derive(Clone, Debug, PartialEq)]
pub enum Cursor {
    /// no positioning operation has run yet; the next step starts at the
    /// first entry
    Unpositioned,

    /// sitting on a live (or just-deleted) entry; the next step finds
    /// the first entry after it in (key, payload) order
    On(Pair),

    /// the previous lookup missed; the sought key is kept so the next
    /// step range-positions at the first entry with key >= it
    PendingRange(Vec<u8>),

    /// stepped past the last entry
    PastEnd,
}

/// All live cursors, keyed by (transaction, index). At most one cursor
/// exists per pair; they are destroyed when the transaction terminates.
pub struct CursorTable {
    cursors: HashMap<(TransactionID, u32), Cursor>,
}

impl CursorTable {
    pub fn new() -> Self {
        Self {
            cursors: HashMap::new(),
        }
    }

    /// The cursor of (tid, table), lazily created as unpositioned.
    pub fn get(&self, tid: TransactionID, table_id: u32) -> Cursor {
        self.cursors
            .get(&(tid, table_id))
            .cloned()
            .unwrap_or(Cursor::Unpositioned)
    }

    pub fn set(&mut self, tid: TransactionID, table_id: u32, cursor: Cursor) {
        self.cursors.insert((tid, table_id), cursor);
    }

    /// Destroy every cursor of the transaction. Called on commit and
    /// abort, before locks are released.
    pub fn close_all(&mut self, tid: TransactionID) {
        self.cursors.retain(|(owner, _), _| *owner != tid);
    }

    pub fn clear(&mut self) {
        self.cursors.clear();
    }
}
