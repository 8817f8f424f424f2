use small_index::{
    api,
    btree::{
        buffer_pool::BufferPool,
        page::{BTreeInternalPage, BTreeLeafPage},
    },
    utils::HandyRwLock,
    IndexError, Key, KeyType, Record, Transaction,
};

use crate::test_utils::{insert, lookup, new_index, scan_all, setup, varchar};

#[test]
fn test_create_and_open() {
    let _guard = setup();

    api::create(KeyType::Varchar, "names").unwrap();
    assert_eq!(
        api::create(KeyType::Varchar, "names"),
        Err(IndexError::DbExists)
    );

    assert!(api::open_index("names").is_ok());
    assert!(matches!(
        api::open_index("missing"),
        Err(IndexError::DbDoesNotExist)
    ));

    let handle = api::open_index("names").unwrap();
    api::close_index(handle).unwrap();
}

// get on an empty index misses; the miss arms the cursor so the next
// step range-positions after the missed key.
#[test]
fn test_miss_then_step() {
    let _guard = setup();
    let handle = new_index("t", KeyType::Varchar);

    let tx = Transaction::new().unwrap();

    let mut record = Record::new(varchar("a"));
    assert_eq!(
        api::get(&handle, Some(&tx), &mut record),
        Err(IndexError::KeyNotFound)
    );
    assert!(record.payload.is_empty());

    insert(&handle, Some(&tx), varchar("b"), "value one");

    api::get_next(&handle, Some(&tx), &mut record).unwrap();
    assert_eq!(record.key, varchar("b"));
    assert_eq!(record.payload, b"value one".to_vec());

    assert_eq!(
        api::get_next(&handle, Some(&tx), &mut record),
        Err(IndexError::EndOfIndex)
    );
    assert!(record.payload.is_empty());

    tx.commit().unwrap();
}

// duplicate pair rejection, exact delete, lookup miss afterwards
#[test]
fn test_duplicate_pair_and_exact_delete() {
    let _guard = setup();
    let handle = new_index("t", KeyType::Varchar);

    for key in &["a", "b", "c"] {
        insert(&handle, None, varchar(key), "value one");
    }

    let tx = Transaction::new().unwrap();

    assert_eq!(
        api::insert_record(&handle, Some(&tx), &varchar("c"), b"value one"),
        Err(IndexError::EntryExists)
    );

    let record = Record::with_payload(varchar("c"), b"value one");
    api::delete_record(&handle, Some(&tx), &record).unwrap();

    assert_eq!(
        lookup(&handle, Some(&tx), varchar("c")),
        Err(IndexError::KeyNotFound)
    );

    tx.commit().unwrap();
}

// a cursor that has never been positioned starts at the first entry
#[test]
fn test_step_without_lookup() {
    let _guard = setup();
    let handle = new_index("t", KeyType::Varchar);

    insert(&handle, None, varchar("a"), "value two");

    let tx = Transaction::new().unwrap();
    let mut record = Record::new(varchar(""));
    api::get_next(&handle, Some(&tx), &mut record).unwrap();
    assert_eq!(record.key, varchar("a"));
    assert_eq!(record.payload, b"value two".to_vec());

    assert_eq!(
        api::get_next(&handle, Some(&tx), &mut record),
        Err(IndexError::EndOfIndex)
    );
    tx.commit().unwrap();
}

// own writes are visible to the transaction's cursor, and a miss
// anchors the following step below them
#[test]
fn test_miss_steps_onto_own_write() {
    let _guard = setup();
    let handle = new_index("t", KeyType::Varchar);

    let tx = Transaction::new().unwrap();
    insert(&handle, Some(&tx), varchar("d"), "value one");

    let mut record = Record::new(varchar("b"));
    assert_eq!(
        api::get(&handle, Some(&tx), &mut record),
        Err(IndexError::KeyNotFound)
    );

    api::get_next(&handle, Some(&tx), &mut record).unwrap();
    assert_eq!(record.key, varchar("d"));
    assert_eq!(record.payload, b"value one".to_vec());

    tx.commit().unwrap();
}

// duplicate keys with distinct payloads coexist, sorted by payload;
// iteration visits each exactly once before advancing the key
#[test]
fn test_duplicate_keys() {
    let _guard = setup();
    let handle = new_index("t", KeyType::Varchar);

    insert(&handle, None, varchar("a"), "value two");
    insert(&handle, None, varchar("a"), "value one");
    insert(&handle, None, varchar("b"), "value one");

    let tx = Transaction::new().unwrap();
    let rows = scan_all(&handle, &tx);
    tx.commit().unwrap();

    assert_eq!(
        rows,
        vec![
            (varchar("a"), b"value one".to_vec()),
            (varchar("a"), b"value two".to_vec()),
            (varchar("b"), b"value one".to_vec()),
        ]
    );
}

// an empty payload deletes every entry with the key
#[test]
fn test_delete_all_for_key() {
    let _guard = setup();
    let handle = new_index("t", KeyType::Varchar);

    insert(&handle, None, varchar("a"), "value one");
    insert(&handle, None, varchar("a"), "value two");
    insert(&handle, None, varchar("b"), "value one");

    let record = Record::new(varchar("a"));
    api::delete_record(&handle, None, &record).unwrap();

    assert_eq!(
        lookup(&handle, None, varchar("a")),
        Err(IndexError::KeyNotFound)
    );
    assert_eq!(lookup(&handle, None, varchar("b")), Ok(b"value one".to_vec()));

    // a second delete-all finds nothing
    assert_eq!(
        api::delete_record(&handle, None, &record),
        Err(IndexError::KeyNotFound)
    );

    // deleting an absent exact pair is its own error
    let record = Record::with_payload(varchar("b"), b"value two");
    assert_eq!(
        api::delete_record(&handle, None, &record),
        Err(IndexError::EntryDoesNotExist)
    );
}

// signed integer keys iterate in numeric order regardless of the
// byte order of the machine
#[test]
fn test_short_key_order() {
    let _guard = setup();
    let handle = new_index("t", KeyType::Short);

    for v in &[-1i32, 0, 1, -2] {
        api::insert_record(&handle, None, &Key::Short(*v), b"value one").unwrap();
    }

    let tx = Transaction::new().unwrap();
    let rows = scan_all(&handle, &tx);
    tx.commit().unwrap();

    let keys: Vec<Key> = rows.into_iter().map(|(k, _)| k).collect();
    assert_eq!(
        keys,
        vec![Key::Short(-2), Key::Short(-1), Key::Short(0), Key::Short(1)]
    );
}

#[test]
fn test_int_key_order() {
    let _guard = setup();
    let handle = new_index("t", KeyType::Int);

    let values = [0i64, i64::max_value(), -1, 42, i64::min_value()];
    for v in &values {
        api::insert_record(&handle, None, &Key::Int(*v), b"v").unwrap();
    }

    let tx = Transaction::new().unwrap();
    let keys: Vec<Key> = scan_all(&handle, &tx).into_iter().map(|(k, _)| k).collect();
    tx.commit().unwrap();

    assert_eq!(
        keys,
        vec![
            Key::Int(i64::min_value()),
            Key::Int(-1),
            Key::Int(0),
            Key::Int(42),
            Key::Int(i64::max_value()),
        ]
    );
}

// a key of the wrong variant never reaches the tree
#[test]
fn test_key_type_mismatch() {
    let _guard = setup();
    let handle = new_index("t", KeyType::Varchar);

    assert!(matches!(
        api::insert_record(&handle, None, &Key::Int(1), b"v"),
        Err(IndexError::Failure(_))
    ));

    let mut record = Record::with_payload(Key::Int(1), b"junk");
    assert_eq!(
        api::get(&handle, None, &mut record),
        Err(IndexError::KeyNotFound)
    );
    assert!(record.payload.is_empty());
}

// drive the tree through leaf and internal splits with a small page
// size, then verify order and completeness
#[test]
fn test_splits_keep_order() {
    let _guard = setup();

    // use a small page size to get a deep tree quickly
    BufferPool::set_page_size(1024);
    let handle = new_index("t", KeyType::Short);

    // enough rows for several tiers of internal pages
    let rows = 3 * BTreeInternalPage::get_children_cap() * BTreeLeafPage::calculate_slots_count();

    let tx = Transaction::new().unwrap();
    for v in 0..rows as i32 {
        // zig-zag so both ends of every leaf see inserts
        let key = if v % 2 == 0 { v } else { -v };
        api::insert_record(&handle, Some(&tx), &Key::Short(key), b"value one").unwrap();
    }
    tx.commit().unwrap();

    let tx = Transaction::new().unwrap();
    let keys: Vec<i32> = scan_all(&handle, &tx)
        .into_iter()
        .map(|(k, _)| match k {
            Key::Short(v) => v,
            _ => panic!("wrong key type"),
        })
        .collect();
    tx.commit().unwrap();

    assert_eq!(keys.len(), rows);
    for window in keys.windows(2) {
        assert!(window[0] < window[1]);
    }

    let tx = Transaction::new().unwrap();
    handle.table().rl().check_integrity(&tx).unwrap();
    assert_eq!(handle.table().rl().pairs_count(&tx), rows);
    tx.commit().unwrap();
}

// a tiny pool forces eviction; reads must stay correct
#[test]
fn test_eviction_under_small_pool() {
    let _guard = setup();

    BufferPool::set_page_size(1024);
    BufferPool::set_pool_capacity(4);
    let handle = new_index("t", KeyType::Short);

    for v in 0..100 {
        api::insert_record(&handle, None, &Key::Short(v), b"value one").unwrap();
    }

    for v in 0..100 {
        assert_eq!(
            lookup(&handle, None, Key::Short(v)),
            Ok(b"value one".to_vec())
        );
    }
}

// payloads are opaque bytes, trailing NUL included
#[test]
fn test_payload_preserved_verbatim() {
    let _guard = setup();
    let handle = new_index("t", KeyType::Varchar);

    let payload = b"value one\0";
    api::insert_record(&handle, None, &varchar("a"), payload).unwrap();
    assert_eq!(lookup(&handle, None, varchar("a")), Ok(payload.to_vec()));
}
