//! The public face of the store: index management, transaction verbs
//! and the record operations. Record operations take an optional
//! transaction; passing `None` runs the call under an implicit
//! transaction that commits on success and aborts on any other outcome,
//! propagating the operation's own result unchanged.

use log::debug;

use crate::{
    btree::cursor::Cursor,
    error::IndexError,
    registry::IndexHandle,
    storage::{Key, KeyType, Pair, Record, MAX_PAYLOAD_LEN},
    transaction::{ConcurrentStatus, Lock, LockTarget, Transaction},
    types::IndexResult,
    utils::HandyRwLock,
    Database,
};

/// Create a new index with the given key type. Fails with `DbExists`
/// when the name is already registered.
pub fn create(key_type: KeyType, name: &str) -> IndexResult {
    Database::mut_registry().create(key_type, name)
}

/// Open an index for this thread. Fails with `DbDoesNotExist` for
/// unknown names; the first opener materialises the on-disk tree.
pub fn open_index(name: &str) -> Result<IndexHandle, IndexError> {
    Database::mut_registry().open(name)
}

/// Release a handle. The physical index stays open until process exit.
pub fn close_index(handle: IndexHandle) -> IndexResult {
    Database::mut_registry().close(handle.name())
}

/// Begin a transaction. Fails with `Failure` when the begin record
/// cannot reach the log.
pub fn begin_transaction() -> Result<Transaction, IndexError> {
    Transaction::new()
}

pub fn commit_transaction(tx: &Transaction) -> IndexResult {
    tx.commit()
}

pub fn abort_transaction(tx: &Transaction) -> IndexResult {
    tx.abort()
}

/// Run `op` under the supplied transaction, or under an implicit one
/// when the caller passed `None`. The implicit transaction commits on
/// success and aborts otherwise; either way the operation's own result
/// is what the caller sees (a `Deadlock` is forwarded unchanged so the
/// caller can retry).
fn with_transaction<T>(
    txn: Option<&Transaction>,
    op: impl FnOnce(&Transaction) -> Result<T, IndexError>,
) -> Result<T, IndexError> {
    match txn {
        Some(tx) => op(tx),
        None => {
            let tx = Transaction::new()?;
            match op(&tx) {
                Ok(value) => {
                    tx.commit()?;
                    Ok(value)
                }
                Err(e) => {
                    let _ = tx.abort();
                    Err(e)
                }
            }
        }
    }
}

/// Encode the key of a record operation, checking it against the
/// index's declared type.
fn encode_key(handle: &IndexHandle, key: &Key) -> Result<Vec<u8>, IndexError> {
    if key.key_type() != handle.key_type() {
        return Err(IndexError::Failure(format!(
            "key type mismatch: index {} holds {:?}",
            handle.name(),
            handle.key_type()
        )));
    }
    key.encode()
}

/// Insert a (key, payload) pair. Fails with `EntryExists` when the
/// exact pair is already present; duplicate keys with distinct payloads
/// are fine.
pub fn insert_record(
    handle: &IndexHandle,
    txn: Option<&Transaction>,
    key: &Key,
    payload: &[u8],
) -> IndexResult {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(IndexError::Failure(format!(
            "payload too long: {} bytes",
            payload.len()
        )));
    }
    let key_bytes = encode_key(handle, key)?;

    with_transaction(txn, |tx| {
        ConcurrentStatus::request_lock(
            tx,
            &Lock::XLock,
            &LockTarget::record(handle.table_id(), &key_bytes),
        )?;

        let pair = Pair::new(key_bytes.clone(), payload.to_vec());
        handle.table().rl().insert_pair(tx, &pair)
    })
}

/// Point lookup. On a hit the first matching payload is copied into the
/// record and the cursor of (txn, index) sits on the entry. On a miss
/// the payload is cleared, the sought key is remembered as the cursor's
/// range anchor, and `KeyNotFound` is returned.
pub fn get(handle: &IndexHandle, txn: Option<&Transaction>, record: &mut Record) -> IndexResult {
    let key_bytes = match encode_key(handle, &record.key) {
        Ok(bytes) => bytes,
        Err(_) => {
            record.clear_payload();
            return Err(IndexError::KeyNotFound);
        }
    };

    with_transaction(txn, |tx| {
        ConcurrentStatus::request_lock(
            tx,
            &Lock::SLock,
            &LockTarget::record(handle.table_id(), &key_bytes),
        )?;

        let found = handle
            .table()
            .rl()
            .first_pair_ge(tx, &Pair::lower_bound(&key_bytes))?;

        let mut cursor_table = Database::mut_cursor_table();
        match found {
            Some(pair) if pair.key == key_bytes => {
                record.set_payload(&pair.payload);
                cursor_table.set(tx.get_id(), handle.table_id(), Cursor::On(pair));
                Ok(())
            }
            _ => {
                record.clear_payload();
                cursor_table.set(
                    tx.get_id(),
                    handle.table_id(),
                    Cursor::PendingRange(key_bytes.clone()),
                );
                Err(IndexError::KeyNotFound)
            }
        }
    })
}

/// Step the cursor of (txn, index) and return the entry it lands on.
///
/// After a missed `get` the cursor range-positions at the first entry
/// whose key is >= the missed key; otherwise it advances to the entry
/// immediately after its position in (key, payload) order. A cursor
/// that has never been positioned starts at the first entry. Fails with
/// `EndOfIndex` past the last entry.
pub fn get_next(handle: &IndexHandle, txn: Option<&Transaction>, record: &mut Record) -> IndexResult {
    with_transaction(txn, |tx| {
        let cursor = Database::mut_cursor_table().get(tx.get_id(), handle.table_id());

        let found = match &cursor {
            Cursor::PendingRange(anchor) => handle
                .table()
                .rl()
                .first_pair_ge(tx, &Pair::lower_bound(anchor))?,
            Cursor::On(pair) => handle.table().rl().first_pair_ge(tx, &pair.step_after())?,
            Cursor::Unpositioned => handle.table().rl().first_pair_ge(tx, &Pair::min_pair())?,
            Cursor::PastEnd => None,
        };

        match found {
            Some(pair) => {
                ConcurrentStatus::request_lock(
                    tx,
                    &Lock::SLock,
                    &LockTarget::record(handle.table_id(), &pair.key),
                )?;

                record.key = Key::decode(handle.key_type(), &pair.key)?;
                record.set_payload(&pair.payload);
                Database::mut_cursor_table().set(tx.get_id(), handle.table_id(), Cursor::On(pair));
                Ok(())
            }
            None => {
                record.clear_payload();
                Database::mut_cursor_table().set(tx.get_id(), handle.table_id(), Cursor::PastEnd);
                Err(IndexError::EndOfIndex)
            }
        }
    })
}

/// Delete records. An empty payload removes every entry with the key
/// (`KeyNotFound` when there is none); a non-empty payload removes the
/// exact pair (`EntryDoesNotExist` when absent) and seats the cursor on
/// the removed position, so iteration continues behind it.
pub fn delete_record(
    handle: &IndexHandle,
    txn: Option<&Transaction>,
    record: &Record,
) -> IndexResult {
    let key_bytes = match encode_key(handle, &record.key) {
        Ok(bytes) => bytes,
        Err(_) => return Err(IndexError::KeyNotFound),
    };

    with_transaction(txn, |tx| {
        ConcurrentStatus::request_lock(
            tx,
            &Lock::XLock,
            &LockTarget::record(handle.table_id(), &key_bytes),
        )?;

        if record.payload.is_empty() {
            debug!("delete all for key {}", hex::encode(&key_bytes));
            handle.table().rl().delete_all(tx, &key_bytes)
        } else {
            let len = record.payload.len().min(MAX_PAYLOAD_LEN);
            let pair = Pair::new(key_bytes.clone(), record.payload[..len].to_vec());
            handle.table().rl().delete_pair(tx, &pair)?;

            // seat the cursor on the removed pair; the next step
            // continues right after it
            Database::mut_cursor_table().set(tx.get_id(), handle.table_id(), Cursor::On(pair));
            Ok(())
        }
    })
}
