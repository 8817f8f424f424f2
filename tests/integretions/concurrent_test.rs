use std::{
    sync::{Arc, Barrier},
    thread,
};

use log::debug;
use rand::Rng;
use small_index::{api, utils::HandyRwLock, IndexError, IndexHandle, Key, KeyType, Transaction};

use crate::test_utils::{new_index, scan_all, setup, varchar};

// Insert one random key, retrying on deadlock victims and the rare
// random-key collision. Sends the inserted key back to the validator.
fn inserter(handle: &IndexHandle, sender: &crossbeam::channel::Sender<i64>) {
    let mut rng = rand::thread_rng();

    loop {
        let key = rng.gen_range(i64::min_value(), i64::max_value());

        let tx = Transaction::new().unwrap();
        match api::insert_record(handle, Some(&tx), &Key::Int(key), b"value one") {
            Ok(()) => {
                tx.commit().unwrap();
                sender.send(key).unwrap();
                return;
            }
            Err(IndexError::Deadlock) | Err(IndexError::EntryExists) => {
                let _ = tx.abort();
            }
            Err(e) => panic!("insert failed: {:?}", e),
        }
    }
}

/// Many threads inserting at once: every committed key must be present
/// exactly once and iteration must stay sorted.
#[test]
fn test_concurrent_inserts() {
    let _guard = setup();
    new_index("t", KeyType::Int);

    let (sender, receiver) = crossbeam::channel::unbounded();

    let mut workers = vec![];
    for _ in 0..4 {
        let handle = api::open_index("t").unwrap();
        let sender = sender.clone();
        workers.push(thread::spawn(move || {
            for _ in 0..25 {
                inserter(&handle, &sender);
            }
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }
    drop(sender);

    let mut expected: Vec<i64> = receiver.iter().collect();
    expected.sort();

    let handle = api::open_index("t").unwrap();
    let tx = Transaction::new().unwrap();
    let keys: Vec<i64> = scan_all(&handle, &tx)
        .into_iter()
        .map(|(k, _)| match k {
            Key::Int(v) => v,
            _ => panic!("wrong key type"),
        })
        .collect();
    tx.commit().unwrap();

    debug!("inserted {} keys", keys.len());
    assert_eq!(keys, expected);

    let tx = Transaction::new().unwrap();
    handle.table().rl().check_integrity(&tx).unwrap();
    tx.commit().unwrap();
}

/// Two transactions locking two indices in opposite order: the detector
/// must abort exactly one of them with `Deadlock`, and the index stays
/// usable afterwards.
#[test]
fn test_deadlock_detection() {
    let _guard = setup();
    new_index("a", KeyType::Varchar);
    new_index("b", KeyType::Varchar);

    let barrier = Arc::new(Barrier::new(2));

    let crossing_writer = |first: &'static str, second: &'static str| {
        let barrier = barrier.clone();
        thread::spawn(move || {
            let first = api::open_index(first).unwrap();
            let second = api::open_index(second).unwrap();

            let tx = Transaction::new().unwrap();
            api::insert_record(&first, Some(&tx), &varchar("k"), b"value one").unwrap();

            // both threads hold their first index before either asks
            // for the second
            barrier.wait();

            match api::insert_record(&second, Some(&tx), &varchar("k"), b"value one") {
                Ok(()) => {
                    tx.commit().unwrap();
                    Ok(())
                }
                Err(e) => {
                    let _ = tx.abort();
                    Err(e)
                }
            }
        })
    };

    let t1 = crossing_writer("a", "b");
    let t2 = crossing_writer("b", "a");

    let r1 = t1.join().unwrap();
    let r2 = t2.join().unwrap();

    debug!("deadlock test results: {:?} / {:?}", r1, r2);
    match (&r1, &r2) {
        (Ok(()), Err(IndexError::Deadlock)) | (Err(IndexError::Deadlock), Ok(())) => {}
        other => panic!("expected exactly one deadlock victim, got {:?}", other),
    }

    // the victim retries and gets through
    let (first, second) = if r1.is_err() { ("a", "b") } else { ("b", "a") };
    let first = api::open_index(first).unwrap();
    let second = api::open_index(second).unwrap();
    let tx = Transaction::new().unwrap();
    api::insert_record(&first, Some(&tx), &varchar("retry"), b"value one").unwrap();
    api::insert_record(&second, Some(&tx), &varchar("retry"), b"value one").unwrap();
    tx.commit().unwrap();
}

/// Serialized effects under contention on a single counter-style key.
#[test]
fn test_exclusive_writers_on_one_key() {
    let _guard = setup();
    new_index("t", KeyType::Varchar);

    let mut workers = vec![];
    for worker_id in 0..4 {
        workers.push(thread::spawn(move || {
            let handle = api::open_index("t").unwrap();
            loop {
                let tx = Transaction::new().unwrap();
                let payload = format!("value {}", worker_id);
                match api::insert_record(&handle, Some(&tx), &varchar("shared"), payload.as_bytes())
                {
                    Ok(()) => {
                        tx.commit().unwrap();
                        return;
                    }
                    Err(IndexError::Deadlock) => {
                        let _ = tx.abort();
                    }
                    Err(e) => panic!("insert failed: {:?}", e),
                }
            }
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    // all four duplicates of the key made it in
    let handle = api::open_index("t").unwrap();
    let tx = Transaction::new().unwrap();
    let rows = scan_all(&handle, &tx);
    tx.commit().unwrap();
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().all(|(k, _)| *k == varchar("shared")));
}
