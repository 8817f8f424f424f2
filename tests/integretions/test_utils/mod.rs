use std::{
    fs,
    sync::{Mutex, MutexGuard},
};

use small_index::{api, utils, Database, IndexError, IndexHandle, Key, KeyType, Record, Transaction};

/// # Conduct the initialization
///
/// - Setting up log configurations.
/// - Removing the data directory.
/// - Resetting the database environment (which also runs recovery).
///
/// The returned guard serialises the tests, since they all share the
/// process-wide database environment.
pub fn setup() -> MutexGuard<'static, ()> {
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    let guard = TEST_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    utils::init_log();

    // remove the data directory, ignore the error
    let _ = fs::remove_dir_all("data");

    Database::reset();
    guard
}

/// Simulate a crash: drop all in-memory state and run recovery against
/// whatever reached the log and the page files.
pub fn crash() {
    Database::reset();
}

pub fn new_index(name: &str, key_type: KeyType) -> IndexHandle {
    api::create(key_type, name).unwrap();
    api::open_index(name).unwrap()
}

pub fn varchar(s: &str) -> Key {
    Key::Varchar(s.to_string())
}

pub fn insert(handle: &IndexHandle, tx: Option<&Transaction>, key: Key, payload: &str) {
    api::insert_record(handle, tx, &key, payload.as_bytes()).unwrap();
}

/// Point lookup returning the payload on a hit.
pub fn lookup(
    handle: &IndexHandle,
    tx: Option<&Transaction>,
    key: Key,
) -> Result<Vec<u8>, IndexError> {
    let mut record = Record::new(key);
    api::get(handle, tx, &mut record)?;
    Ok(record.payload)
}

/// Drain the index through the cursor of `tx`, returning every record
/// in order. The cursor must not have been used yet.
pub fn scan_all(handle: &IndexHandle, tx: &Transaction) -> Vec<(Key, Vec<u8>)> {
    let mut rows = Vec::new();
    loop {
        let mut record = Record::new(Key::Varchar(String::new()));
        match api::get_next(handle, Some(tx), &mut record) {
            Ok(()) => rows.push((record.key, record.payload)),
            Err(IndexError::EndOfIndex) => break,
            Err(e) => panic!("scan failed: {:?}", e),
        }
    }
    rows
}
