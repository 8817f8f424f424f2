use std::{
    mem,
    path::PathBuf,
    sync::{Arc, Once, RwLock, RwLockReadGuard, RwLockWriteGuard},
    thread,
    time::Duration,
};

use log::info;

use crate::{
    btree::{buffer_pool::BufferPool, cursor::CursorTable},
    config::CONFIG,
    registry::IndexRegistry,
    transaction::ConcurrentStatus,
    tx_log::LogManager,
    types::Pod,
    utils::HandyRwLock,
};

/// We collect all global state of the storage environment here.
///
/// These members cannot be initialized as static variables, because
/// their initialization functions all rely on non-const fns (e.g.
/// `HashMap::new()`). They are reachable through static accessors so any
/// component can use them without threading references around.
pub struct Database {
    path: PathBuf,

    buffer_pool: Pod<BufferPool>,
    registry: Pod<IndexRegistry>,
    concurrent_status: Pod<ConcurrentStatus>,
    log_manager: Pod<LogManager>,
    cursor_table: Pod<CursorTable>,
}

static mut SINGLETON: *mut Database = 0 as *mut Database;

impl Database {
    fn new() -> Self {
        let db_path = PathBuf::from(&CONFIG.data_dir);
        if !db_path.exists() {
            std::fs::create_dir_all(&db_path).unwrap();
        }

        BufferPool::set_page_size(CONFIG.page_size);
        BufferPool::set_pool_capacity(CONFIG.pool_capacity);

        let log_path = db_path.join("wal.log");

        Self {
            path: db_path.clone(),

            buffer_pool: Arc::new(RwLock::new(BufferPool::new())),
            registry: Arc::new(RwLock::new(IndexRegistry::new(db_path))),
            concurrent_status: Arc::new(RwLock::new(ConcurrentStatus::new())),
            log_manager: Arc::new(RwLock::new(LogManager::new(log_path).unwrap())),
            cursor_table: Arc::new(RwLock::new(CursorTable::new())),
        }
    }

    /// (Re)build the environment: drop the in-memory state, reload the
    /// manifest and run log recovery. Called implicitly on first use,
    /// and explicitly by tests to simulate a restart.
    ///
    /// The singleton pointer is swapped before the manifest load and the
    /// recovery run, since both reach the environment through the static
    /// accessors.
    pub fn reset() {
        let singleton = Self::new();

        unsafe {
            // put it in the heap so it can outlive this call. The
            // previous instance, if any, stays allocated: the detector
            // thread may still hold a guard into it.
            SINGLETON = mem::transmute(Box::new(singleton));
        }

        Self::mut_registry().load_manifest().unwrap();

        {
            let buffer_pool = Self::buffer_pool();
            let mut log_manager = Self::mut_log_manager();
            log_manager.recover(&buffer_pool).unwrap();
        }

        Self::mut_concurrent_status().clear();
        Self::mut_cursor_table().clear();

        Self::start_deadlock_detector();

        info!("database environment ready at {:?}", Self::global().path);
    }

    pub fn global() -> &'static Self {
        unsafe {
            if SINGLETON.is_null() {
                Self::reset();
            }
            SINGLETON.as_ref().unwrap()
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// The background deadlock detector: periodically searches the
    /// wait-for graph and flags the youngest member of a cycle.
    fn start_deadlock_detector() {
        static DETECTOR: Once = Once::new();

        DETECTOR.call_once(|| {
            let interval = CONFIG.detect_interval_ms;
            thread::spawn(move || loop {
                thread::sleep(Duration::from_millis(interval));
                ConcurrentStatus::detect_deadlocks();
            });
        });
    }

    pub fn buffer_pool() -> RwLockReadGuard<'static, BufferPool> {
        Self::global().buffer_pool.rl()
    }

    pub fn mut_buffer_pool() -> RwLockWriteGuard<'static, BufferPool> {
        Self::global().buffer_pool.wl()
    }

    pub fn registry() -> RwLockReadGuard<'static, IndexRegistry> {
        Self::global().registry.rl()
    }

    pub fn mut_registry() -> RwLockWriteGuard<'static, IndexRegistry> {
        Self::global().registry.wl()
    }

    pub(crate) fn concurrent_status() -> RwLockReadGuard<'static, ConcurrentStatus> {
        Self::global().concurrent_status.rl()
    }

    pub(crate) fn mut_concurrent_status() -> RwLockWriteGuard<'static, ConcurrentStatus> {
        Self::global().concurrent_status.wl()
    }

    pub fn log_manager() -> RwLockReadGuard<'static, LogManager> {
        Self::global().log_manager.rl()
    }

    pub fn mut_log_manager() -> RwLockWriteGuard<'static, LogManager> {
        Self::global().log_manager.wl()
    }

    pub(crate) fn mut_cursor_table() -> RwLockWriteGuard<'static, CursorTable> {
        Self::global().cursor_table.wl()
    }
}
