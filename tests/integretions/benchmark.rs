//! A miniature version of the mixed workload the store is tuned for:
//! populate, then interleaved lookups, scans, inserts and deletes.
//! Run with `cargo test --features benchmark -- --nocapture bench`.

use std::time::Instant;

use log::info;
use rand::{rngs::StdRng, Rng, SeedableRng};
use small_index::{api, IndexError, Key, KeyType, Record, Transaction};

use crate::test_utils::{new_index, scan_all, setup};

const SEED: u64 = 0x5eed;
const POPULATE: usize = 2_000;
const OPERATIONS: usize = 5_000;

#[test]
fn bench_mixed_workload() {
    let _guard = setup();
    let handle = new_index("bench", KeyType::Int);

    let mut rng = StdRng::seed_from_u64(SEED);

    // stage 1: populate
    let start = Instant::now();
    let tx = Transaction::new().unwrap();
    for i in 0..POPULATE {
        let key = Key::Int(i as i64 * 7);
        api::insert_record(&handle, Some(&tx), &key, b"benchmark payload").unwrap();
    }
    tx.commit().unwrap();
    info!("populate: {} rows in {:?}", POPULATE, start.elapsed());

    // stage 2: mixed operations under implicit transactions
    let start = Instant::now();
    let mut hits = 0;
    for _ in 0..OPERATIONS {
        let key = Key::Int(rng.gen_range(0, POPULATE as i64 * 7));
        match rng.gen_range(0, 4) {
            0 => {
                let mut record = Record::new(key);
                if api::get(&handle, None, &mut record).is_ok() {
                    hits += 1;
                }
            }
            1 => {
                let mut record = Record::new(key);
                let _ = api::get(&handle, None, &mut record);
            }
            2 => match api::insert_record(&handle, None, &key, b"benchmark payload") {
                Ok(()) | Err(IndexError::EntryExists) => {}
                Err(e) => panic!("insert failed: {:?}", e),
            },
            _ => {
                let record = Record::new(key);
                match api::delete_record(&handle, None, &record) {
                    Ok(()) | Err(IndexError::KeyNotFound) => {}
                    Err(e) => panic!("delete failed: {:?}", e),
                }
            }
        }
    }
    info!(
        "mixed workload: {} operations ({} hits) in {:?}",
        OPERATIONS,
        hits,
        start.elapsed()
    );

    // stage 3: the index is still sorted and scannable
    let tx = Transaction::new().unwrap();
    let rows = scan_all(&handle, &tx);
    tx.commit().unwrap();
    let keys: Vec<i64> = rows
        .iter()
        .map(|(k, _)| match k {
            Key::Int(v) => *v,
            _ => panic!("wrong key type"),
        })
        .collect();
    for window in keys.windows(2) {
        assert!(window[0] < window[1]);
    }
    info!("final row count: {}", rows.len());
}
