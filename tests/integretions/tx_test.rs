use std::thread;

use small_index::{api, IndexError, KeyType, Record, Transaction};

use crate::test_utils::{insert, lookup, new_index, setup, varchar};

#[test]
fn test_commit_makes_writes_durable() {
    let _guard = setup();
    let handle = new_index("t", KeyType::Varchar);

    let tx = Transaction::new().unwrap();
    insert(&handle, Some(&tx), varchar("a"), "value one");
    tx.commit().unwrap();

    let tx = Transaction::new().unwrap();
    assert_eq!(lookup(&handle, Some(&tx), varchar("a")), Ok(b"value one".to_vec()));
    tx.commit().unwrap();
}

#[test]
fn test_abort_rolls_back() {
    let _guard = setup();
    let handle = new_index("t", KeyType::Varchar);

    insert(&handle, None, varchar("keep"), "value one");

    let tx = Transaction::new().unwrap();
    insert(&handle, Some(&tx), varchar("gone"), "value one");

    // the writer sees its own write
    assert_eq!(lookup(&handle, Some(&tx), varchar("gone")), Ok(b"value one".to_vec()));

    tx.abort().unwrap();

    assert_eq!(
        lookup(&handle, None, varchar("gone")),
        Err(IndexError::KeyNotFound)
    );
    assert_eq!(lookup(&handle, None, varchar("keep")), Ok(b"value one".to_vec()));
}

// write isolation: a reader running against an aborted write never
// observes it. The reader blocks on the writer's lock until the abort
// and then sees a clean index.
#[test]
fn test_reader_never_sees_aborted_write() {
    let _guard = setup();
    let handle = new_index("t", KeyType::Varchar);

    let tx = Transaction::new().unwrap();
    insert(&handle, Some(&tx), varchar("b"), "value one");

    let reader_handle = api::open_index("t").unwrap();
    let reader = thread::spawn(move || lookup(&reader_handle, None, varchar("b")));

    // give the reader time to block on the record lock, then abort
    thread::sleep(std::time::Duration::from_millis(50));
    tx.abort().unwrap();

    assert_eq!(reader.join().unwrap(), Err(IndexError::KeyNotFound));
}

// one transaction spanning two indices: the cursor of each index is
// independent, and the commit publishes both writes atomically
#[test]
fn test_transaction_spans_indices() {
    let _guard = setup();
    let i1 = new_index("i1", KeyType::Varchar);
    let i2 = new_index("i2", KeyType::Varchar);

    insert(&i1, None, varchar("x"), "value one");
    insert(&i1, None, varchar("y"), "value two");

    let tx = Transaction::new().unwrap();

    let mut record = Record::new(varchar(""));
    api::get_next(&i1, Some(&tx), &mut record).unwrap();
    assert_eq!(record.key, varchar("x"));

    insert(&i2, Some(&tx), varchar("b"), "value one");

    api::get_next(&i1, Some(&tx), &mut record).unwrap();
    assert_eq!(record.key, varchar("y"));

    tx.commit().unwrap();

    assert_eq!(lookup(&i2, None, varchar("b")), Ok(b"value one".to_vec()));
}

// a terminated transaction cannot be used again
#[test]
fn test_double_termination() {
    let _guard = setup();

    let tx = Transaction::new().unwrap();
    tx.commit().unwrap();
    assert_eq!(tx.commit(), Err(IndexError::TxnDoesNotExist));
    assert_eq!(tx.abort(), Err(IndexError::TxnDoesNotExist));

    let tx = Transaction::new().unwrap();
    tx.abort().unwrap();
    assert_eq!(tx.commit(), Err(IndexError::TxnDoesNotExist));
}

// record operations without a transaction run under an implicit one:
// success commits, a miss aborts, and either way the outcome is
// reported unchanged
#[test]
fn test_implicit_transactions() {
    let _guard = setup();
    let handle = new_index("t", KeyType::Varchar);

    insert(&handle, None, varchar("a"), "value one");
    assert_eq!(lookup(&handle, None, varchar("a")), Ok(b"value one".to_vec()));
    assert_eq!(
        lookup(&handle, None, varchar("z")),
        Err(IndexError::KeyNotFound)
    );

    // the implicit transaction of the failed lookup released its
    // locks; a plain write goes straight through
    insert(&handle, None, varchar("z"), "value two");
    assert_eq!(lookup(&handle, None, varchar("z")), Ok(b"value two".to_vec()));
}

// cursors die with their transaction: a fresh transaction starts
// unpositioned even after another one iterated
#[test]
fn test_cursor_dies_with_transaction() {
    let _guard = setup();
    let handle = new_index("t", KeyType::Varchar);

    insert(&handle, None, varchar("a"), "value one");
    insert(&handle, None, varchar("b"), "value one");

    let tx = Transaction::new().unwrap();
    let mut record = Record::new(varchar(""));
    api::get_next(&handle, Some(&tx), &mut record).unwrap();
    assert_eq!(record.key, varchar("a"));
    tx.commit().unwrap();

    let tx = Transaction::new().unwrap();
    let mut record = Record::new(varchar(""));
    api::get_next(&handle, Some(&tx), &mut record).unwrap();
    assert_eq!(record.key, varchar("a"));
    tx.commit().unwrap();
}

// deleting through the cursor: after an exact delete, the cursor sits
// on the removed position and stepping continues behind it
#[test]
fn test_step_after_exact_delete() {
    let _guard = setup();
    let handle = new_index("t", KeyType::Varchar);

    insert(&handle, None, varchar("a"), "value one");
    insert(&handle, None, varchar("b"), "value one");
    insert(&handle, None, varchar("c"), "value one");

    let tx = Transaction::new().unwrap();
    let record = Record::with_payload(varchar("b"), b"value one");
    api::delete_record(&handle, Some(&tx), &record).unwrap();

    let mut record = Record::new(varchar(""));
    api::get_next(&handle, Some(&tx), &mut record).unwrap();
    assert_eq!(record.key, varchar("c"));

    tx.commit().unwrap();
}
