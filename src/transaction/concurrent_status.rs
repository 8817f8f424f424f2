use core::fmt;
use std::{
    collections::{HashMap, HashSet},
    thread::sleep,
    time::Duration,
};

use log::warn;

use crate::{
    btree::page::BTreePageID,
    error::IndexError,
    transaction::{Transaction, TransactionID, TransactionStatus},
    types::IndexResult,
    Database,
};

use super::wait_for_graph::WaitForGraph;

#[derive(Debug, PartialEq)]
pub enum Lock {
    XLock,
    SLock,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Permission {
    ReadOnly,
    ReadWrite,
}

impl Permission {
    pub fn to_lock(&self) -> Lock {
        match self {
            Permission::ReadOnly => Lock::SLock,
            Permission::ReadWrite => Lock::XLock,
        }
    }
}

/// What a lock protects: a record key inside one index, or a page.
/// Record locks serialise access to one (key, *) run; page locks cover
/// structural reads and modifications of the tree.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum LockTarget {
    Record { table_id: u32, key: Vec<u8> },
    Page(BTreePageID),
}

impl LockTarget {
    pub fn record(table_id: u32, key: &[u8]) -> Self {
        LockTarget::Record {
            table_id,
            key: key.to_vec(),
        }
    }
}

impl fmt::Debug for LockTarget {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LockTarget::Record { table_id, key } => {
                write!(f, "record_{}_{}", table_id, hex::encode(key))
            }
            LockTarget::Page(pid) => write!(f, "page_{}", pid.get_short_repr()),
        }
    }
}

static POLL_INTERVAL_MS: u64 = 10;

/// The lock manager. Tracks shared and exclusive holders per target, the
/// wait-for graph feeding the deadlock detector, per-transaction dirty
/// pages and the transaction status table.
pub struct ConcurrentStatus {
    s_lock_map: HashMap<LockTarget, HashSet<TransactionID>>,
    x_lock_map: HashMap<LockTarget, TransactionID>,

    hold_locks: HashMap<TransactionID, HashSet<LockTarget>>,

    dirty_pages: HashMap<TransactionID, HashSet<BTreePageID>>,

    // Transaction status, used for transaction isolation. Given a
    // transaction id, it gives the transaction state (active, aborted,
    // committed).
    pub(crate) transaction_status: HashMap<TransactionID, TransactionStatus>,

    wait_for_graph: WaitForGraph,

    /// Deadlock victims picked by the detector. A victim's next lock
    /// request fails with `Deadlock`.
    victims: HashSet<TransactionID>,
}

impl ConcurrentStatus {
    pub fn new() -> Self {
        Self {
            s_lock_map: HashMap::new(),
            x_lock_map: HashMap::new(),
            hold_locks: HashMap::new(),
            dirty_pages: HashMap::new(),
            transaction_status: HashMap::new(),
            wait_for_graph: WaitForGraph::new(),
            victims: HashSet::new(),
        }
    }

    /// Request a lock on the given target. This api is blocking: the
    /// calling thread sleeps until the lock is granted or the deadlock
    /// detector picks the transaction as a victim.
    pub fn request_lock(tx: &Transaction, lock: &Lock, target: &LockTarget) -> IndexResult {
        loop {
            // acquire the lock on "concurrent_status" only for the
            // duration of one grant attempt
            {
                let mut concurrent_status = Database::mut_concurrent_status();

                if concurrent_status.victims.remove(&tx.get_id()) {
                    concurrent_status.wait_for_graph.remove_waiter(tx.get_id());
                    warn!("tx_{} aborted as deadlock victim", tx.get_id());
                    return Err(IndexError::Deadlock);
                }

                if concurrent_status.add_lock(tx, lock, target) {
                    // at this point, "tx" doesn't wait on any other
                    // transactions since a transaction only runs on a
                    // single thread
                    concurrent_status.wait_for_graph.remove_waiter(tx.get_id());
                    return Ok(());
                }

                concurrent_status.update_wait_for_graph(tx, lock, target);
            }

            sleep(Duration::from_millis(POLL_INTERVAL_MS));
        }
    }

    fn update_wait_for_graph(&mut self, tx: &Transaction, lock: &Lock, target: &LockTarget) {
        // every request has to wait for the transaction that holds the
        // X-lock
        if let Some(x_holder) = self.x_lock_map.get(target).cloned() {
            self.wait_for_graph.add_edge(tx.get_id(), x_holder);
        }

        if lock == &Lock::XLock {
            // only an X-lock request has to wait for the transactions
            // holding S-locks
            if let Some(s_holders) = self.s_lock_map.get(target).cloned() {
                for s_holder in s_holders {
                    self.wait_for_graph.add_edge(tx.get_id(), s_holder);
                }
            }
        }
    }

    // Add a lock to the given target. This api is idempotent and
    // non-blocking.
    //
    // # Return
    //
    // True if the lock was granted.
    fn add_lock(&mut self, tx: &Transaction, lock: &Lock, target: &LockTarget) -> bool {
        // if the target is held by another transaction with an X-lock,
        // the request fails regardless of its own mode
        if let Some(holder) = self.x_lock_map.get(target) {
            if *holder != tx.get_id() {
                return false;
            }
        }

        match lock {
            Lock::SLock => {
                self.s_lock_map
                    .entry(target.clone())
                    .or_insert_with(HashSet::new)
                    .insert(tx.get_id());
            }
            Lock::XLock => {
                // an upgrade is only granted once no other transaction
                // holds an S-lock on the target
                if let Some(s_holders) = self.s_lock_map.get(target) {
                    for holder in s_holders {
                        if *holder != tx.get_id() {
                            return false;
                        }
                    }
                }

                self.x_lock_map.insert(target.clone(), tx.get_id());
            }
        }

        self.hold_locks
            .entry(tx.get_id())
            .or_insert_with(HashSet::new)
            .insert(target.clone());

        true
    }

    pub fn holds_lock(&self, tx: &Transaction, target: &LockTarget) -> bool {
        self.hold_locks
            .get(&tx.get_id())
            .map_or(false, |targets| targets.contains(target))
    }

    /// Release every lock the transaction holds and forget its dirty
    /// set. Called at commit and abort (strict two-phase locking).
    pub(crate) fn remove_relation(&mut self, tx: &Transaction) {
        self.dirty_pages.remove(&tx.get_id());
        self.release_locks(tx);
        self.wait_for_graph.remove_transaction(tx.get_id());
        self.victims.remove(&tx.get_id());
    }

    fn release_locks(&mut self, tx: &Transaction) {
        let targets = match self.hold_locks.remove(&tx.get_id()) {
            Some(targets) => targets,
            None => return,
        };

        for target in targets {
            self.release_lock(tx, &target);
        }
    }

    fn release_lock(&mut self, tx: &Transaction, target: &LockTarget) {
        if let Some(holders) = self.s_lock_map.get_mut(target) {
            holders.remove(&tx.get_id());
            if holders.is_empty() {
                self.s_lock_map.remove(target);
            }
        }

        if self.x_lock_map.get(target) == Some(&tx.get_id()) {
            self.x_lock_map.remove(target);
        }
    }

    pub(crate) fn set_dirty_page(&mut self, tx: &Transaction, pid: &BTreePageID) {
        self.dirty_pages
            .entry(tx.get_id())
            .or_insert_with(HashSet::new)
            .insert(*pid);
    }

    pub(crate) fn get_dirty_pages(&self, tx: &Transaction) -> HashSet<BTreePageID> {
        self.dirty_pages
            .get(&tx.get_id())
            .cloned()
            .unwrap_or_default()
    }

    /// One pass of the deadlock detector: while the wait-for graph has a
    /// cycle, flag the youngest member as a victim and remove it from
    /// the graph.
    pub fn detect_deadlocks() {
        let mut concurrent_status = Database::mut_concurrent_status();

        while let Some(cycle) = concurrent_status.wait_for_graph.find_cycle() {
            // ids increase monotonically, so the largest id is the
            // youngest transaction
            let victim = *cycle.iter().max().unwrap();
            warn!("deadlock cycle {:?}, victim: tx_{}", cycle, victim);

            concurrent_status.victims.insert(victim);
            concurrent_status.wait_for_graph.remove_waiter(victim);
        }
    }

    pub fn clear(&mut self) {
        self.s_lock_map.clear();
        self.x_lock_map.clear();
        self.hold_locks.clear();
        self.dirty_pages.clear();
        self.victims.clear();
    }
}

impl fmt::Display for ConcurrentStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut depiction = "\n".to_string();

        depiction.push_str("s_lock_map: {");
        for (target, holders) in self.s_lock_map.iter() {
            depiction.push_str(&format!("\n\t{:?} -> {:?},", target, holders));
        }
        depiction.push_str("\n}\n");

        depiction.push_str("x_lock_map: {");
        for (target, holder) in self.x_lock_map.iter() {
            depiction.push_str(&format!("\n\t{:?} -> tx_{},", target, holder));
        }
        depiction.push_str("\n}\n");

        depiction.push_str("hold_locks: {");
        for (tid, targets) in self.hold_locks.iter() {
            depiction.push_str(&format!("\n\ttx_{} -> {:?},", tid, targets));
        }
        depiction.push_str("\n}\n");

        write!(f, "{}", depiction)
    }
}

impl fmt::Debug for ConcurrentStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}
