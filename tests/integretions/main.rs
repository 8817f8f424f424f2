mod test_utils;

mod concurrent_test;
mod index_test;
mod log_test;
mod tx_test;

#[cfg(feature = "benchmark")]
mod benchmark;
