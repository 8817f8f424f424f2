use small_index::{api, Database, IndexError, KeyType, Record, Transaction};

use crate::test_utils::{crash, insert, lookup, new_index, setup, varchar};

#[test]
fn test_commit_survives_crash() {
    let _guard = setup();
    let handle = new_index("t", KeyType::Varchar);

    let tx = Transaction::new().unwrap();
    insert(&handle, Some(&tx), varchar("a"), "value one");
    insert(&handle, Some(&tx), varchar("b"), "value two");
    tx.commit().unwrap();

    crash();

    let handle = api::open_index("t").unwrap();
    assert_eq!(lookup(&handle, None, varchar("a")), Ok(b"value one".to_vec()));
    assert_eq!(lookup(&handle, None, varchar("b")), Ok(b"value two".to_vec()));
}

// a transaction that never terminated is a loser: recovery rolls it
// back with compensation records
#[test]
fn test_loser_rolled_back_after_crash() {
    let _guard = setup();
    let handle = new_index("t", KeyType::Varchar);

    insert(&handle, None, varchar("keep"), "value one");

    let tx = Transaction::new().unwrap();
    insert(&handle, Some(&tx), varchar("lost-1"), "value one");
    insert(&handle, Some(&tx), varchar("lost-2"), "value one");
    // no commit, no abort: the transaction dies with the crash

    crash();

    let handle = api::open_index("t").unwrap();
    assert_eq!(lookup(&handle, None, varchar("keep")), Ok(b"value one".to_vec()));
    assert_eq!(
        lookup(&handle, None, varchar("lost-1")),
        Err(IndexError::KeyNotFound)
    );
    assert_eq!(
        lookup(&handle, None, varchar("lost-2")),
        Err(IndexError::KeyNotFound)
    );
}

#[test]
fn test_abort_then_crash() {
    let _guard = setup();
    let handle = new_index("t", KeyType::Varchar);

    let tx = Transaction::new().unwrap();
    insert(&handle, Some(&tx), varchar("a"), "value one");
    tx.commit().unwrap();

    let tx = Transaction::new().unwrap();
    insert(&handle, Some(&tx), varchar("b"), "value one");
    tx.abort().unwrap();

    Database::log_manager().show_log_contents();

    crash();

    let handle = api::open_index("t").unwrap();
    assert_eq!(lookup(&handle, None, varchar("a")), Ok(b"value one".to_vec()));
    assert_eq!(
        lookup(&handle, None, varchar("b")),
        Err(IndexError::KeyNotFound)
    );
}

// commit, checkpoint, commit again: recovery starts at the checkpoint
// and still produces exactly the committed state
#[test]
fn test_recovery_from_checkpoint() {
    let _guard = setup();
    let handle = new_index("t", KeyType::Varchar);

    insert(&handle, None, varchar("before"), "value one");

    {
        let buffer_pool = Database::buffer_pool();
        let mut log_manager = Database::mut_log_manager();
        log_manager.log_checkpoint(&buffer_pool).unwrap();
    }

    insert(&handle, None, varchar("after"), "value two");

    let tx = Transaction::new().unwrap();
    insert(&handle, Some(&tx), varchar("loser"), "value three");
    // dies with the crash

    crash();

    let handle = api::open_index("t").unwrap();
    assert_eq!(
        lookup(&handle, None, varchar("before")),
        Ok(b"value one".to_vec())
    );
    assert_eq!(
        lookup(&handle, None, varchar("after")),
        Ok(b"value two".to_vec())
    );
    assert_eq!(
        lookup(&handle, None, varchar("loser")),
        Err(IndexError::KeyNotFound)
    );
}

// crashing twice in a row must not change the outcome
#[test]
fn test_recovery_is_idempotent() {
    let _guard = setup();
    let handle = new_index("t", KeyType::Varchar);

    insert(&handle, None, varchar("a"), "value one");

    let tx = Transaction::new().unwrap();
    insert(&handle, Some(&tx), varchar("b"), "value one");

    crash();
    crash();

    let handle = api::open_index("t").unwrap();
    assert_eq!(lookup(&handle, None, varchar("a")), Ok(b"value one".to_vec()));
    assert_eq!(
        lookup(&handle, None, varchar("b")),
        Err(IndexError::KeyNotFound)
    );
}

// deletes are undone like inserts: an aborted delete-all leaves the
// entries in place, a committed one survives a crash
#[test]
fn test_delete_recovery() {
    let _guard = setup();
    let handle = new_index("t", KeyType::Varchar);

    insert(&handle, None, varchar("a"), "value one");
    insert(&handle, None, varchar("a"), "value two");

    let tx = Transaction::new().unwrap();
    let record = Record::new(varchar("a"));
    api::delete_record(&handle, Some(&tx), &record).unwrap();
    tx.abort().unwrap();

    assert_eq!(lookup(&handle, None, varchar("a")), Ok(b"value one".to_vec()));

    let tx = Transaction::new().unwrap();
    api::delete_record(&handle, Some(&tx), &record).unwrap();
    tx.commit().unwrap();

    crash();

    let handle = api::open_index("t").unwrap();
    assert_eq!(
        lookup(&handle, None, varchar("a")),
        Err(IndexError::KeyNotFound)
    );
}
