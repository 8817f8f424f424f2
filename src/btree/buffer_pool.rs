use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc, RwLock,
};

use log::{debug, warn};

use crate::{
    error::IndexError,
    transaction::{ConcurrentStatus, LockTarget, Permission, Transaction},
    tx_log::{self, LogManager},
    types::{ConcurrentHashMap, Pod, ResultPod},
    utils::HandyRwLock,
    Database,
};

use super::page::{
    BTreeInternalPage, BTreeLeafPage, BTreePage, BTreePageID, BTreeRootPointerPage, PageCategory,
};

pub const DEFAULT_PAGE_SIZE: usize = 4096;
static PAGE_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_PAGE_SIZE);

pub const DEFAULT_POOL_CAPACITY: usize = 256;
static POOL_CAPACITY: AtomicUsize = AtomicUsize::new(DEFAULT_POOL_CAPACITY);

/// Page-granularity cache over the index files. Fetching a page acquires
/// the page lock for the calling transaction and returns a shared frame;
/// the frame counts as pinned for as long as the caller keeps the `Arc`
/// alive. When the frame count exceeds the configured capacity, the
/// least recently used unpinned frame is evicted; a dirty frame is only
/// written out once the log is durable up to its page LSN.
pub struct BufferPool {
    pub root_pointer_buffer: ConcurrentHashMap<BTreePageID, Pod<BTreeRootPointerPage>>,
    pub internal_buffer: ConcurrentHashMap<BTreePageID, Pod<BTreeInternalPage>>,
    pub leaf_buffer: ConcurrentHashMap<BTreePageID, Pod<BTreeLeafPage>>,

    access_clock: AtomicU64,
    last_access: ConcurrentHashMap<BTreePageID, u64>,
}

type Key = BTreePageID;

impl BufferPool {
    pub fn new() -> Self {
        Self {
            root_pointer_buffer: ConcurrentHashMap::new(),
            internal_buffer: ConcurrentHashMap::new(),
            leaf_buffer: ConcurrentHashMap::new(),
            access_clock: AtomicU64::new(0),
            last_access: ConcurrentHashMap::new(),
        }
    }

    pub fn clear(&self) {
        self.root_pointer_buffer.clear();
        self.internal_buffer.clear();
        self.leaf_buffer.clear();
        self.last_access.clear();
    }

    pub fn set_page_size(page_size: usize) {
        PAGE_SIZE.store(page_size, Ordering::Relaxed);
    }

    pub fn get_page_size() -> usize {
        PAGE_SIZE.load(Ordering::Relaxed)
    }

    pub fn set_pool_capacity(capacity: usize) {
        POOL_CAPACITY.store(capacity, Ordering::Relaxed);
    }

    pub fn get_pool_capacity() -> usize {
        POOL_CAPACITY.load(Ordering::Relaxed)
    }

    fn frames_count(&self) -> usize {
        self.root_pointer_buffer.len() + self.internal_buffer.len() + self.leaf_buffer.len()
    }

    /// Read the page from the backing file of its index.
    fn load_page<PAGE: BTreePage>(&self, pid: &Key) -> ResultPod<PAGE> {
        // stage 1: get the index the page belongs to
        let registry = Database::registry();
        let table_pod = registry
            .get_table_by_id(pid.get_table_id())
            .ok_or_else(|| IndexError::fatal(&format!("table {} not found", pid.get_table_id())))?;
        let table = table_pod.rl();

        // stage 2: read page content from disk
        let buf = table.read_page_from_disk(pid)?;

        // stage 3: page instantiation
        let page = PAGE::new(pid, &buf);

        debug!("page loaded from disk, pid: {}", pid);
        Ok(Arc::new(RwLock::new(page)))
    }

    /// Retrieve the specified page with the associated permissions. Will
    /// acquire a lock and may block if that lock is held by another
    /// transaction.
    pub fn get_root_ptr_page(
        &self,
        tx: &Transaction,
        perm: Permission,
        pid: &Key,
    ) -> ResultPod<BTreeRootPointerPage> {
        ConcurrentStatus::request_lock(tx, &perm.to_lock(), &LockTarget::Page(*pid))?;
        let pod = self
            .root_pointer_buffer
            .get_or_insert(pid, |pid| self.load_page(pid))?;
        self.touch(pid);
        self.evict_if_needed()?;
        Ok(pod)
    }

    pub fn get_internal_page(
        &self,
        tx: &Transaction,
        perm: Permission,
        pid: &Key,
    ) -> ResultPod<BTreeInternalPage> {
        ConcurrentStatus::request_lock(tx, &perm.to_lock(), &LockTarget::Page(*pid))?;
        let pod = self
            .internal_buffer
            .get_or_insert(pid, |pid| self.load_page(pid))?;
        self.touch(pid);
        self.evict_if_needed()?;
        Ok(pod)
    }

    pub fn get_leaf_page(
        &self,
        tx: &Transaction,
        perm: Permission,
        pid: &Key,
    ) -> ResultPod<BTreeLeafPage> {
        ConcurrentStatus::request_lock(tx, &perm.to_lock(), &LockTarget::Page(*pid))?;
        let pod = self
            .leaf_buffer
            .get_or_insert(pid, |pid| self.load_page(pid))?;
        self.touch(pid);
        self.evict_if_needed()?;
        Ok(pod)
    }

    fn touch(&self, pid: &Key) {
        let stamp = self.access_clock.fetch_add(1, Ordering::Relaxed);
        self.last_access.insert(*pid, stamp);
    }

    /// An I/O fault while writing out an evicted frame is surfaced to
    /// the fetching transaction, which is expected to abort.
    fn evict_if_needed(&self) -> Result<(), IndexError> {
        let capacity = Self::get_pool_capacity();
        while self.frames_count() > capacity {
            if !self.evict_one()? {
                // every frame is pinned or waiting for the log; let the
                // pool run over capacity rather than block
                warn!("buffer pool over capacity, no evictable frame");
                return Ok(());
            }
        }
        Ok(())
    }

    /// Drop the least recently used unpinned frame. Returns false if no
    /// frame is currently evictable.
    fn evict_one(&self) -> Result<bool, IndexError> {
        let mut candidates: Vec<(Key, u64)> = Vec::new();
        for pid in self.all_keys() {
            // root pointers are hot on every operation, keep them
            if pid.category == PageCategory::RootPointer {
                continue;
            }
            let stamp = self.last_access.get(&pid).unwrap_or(0);
            candidates.push((pid, stamp));
        }
        candidates.sort_by_key(|(_, stamp)| *stamp);

        for (pid, _) in candidates {
            let evicted = match pid.category {
                PageCategory::Internal => self.try_evict(&self.internal_buffer, &pid)?,
                PageCategory::Leaf => self.try_evict(&self.leaf_buffer, &pid)?,
                PageCategory::RootPointer => false,
            };
            if evicted {
                self.last_access.remove(&pid);
                debug!("evicted page {}", pid);
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn try_evict<PAGE: BTreePage>(
        &self,
        buffer: &ConcurrentHashMap<Key, Pod<PAGE>>,
        pid: &Key,
    ) -> Result<bool, IndexError> {
        let pod = match buffer.get(pid) {
            Some(pod) => pod,
            None => return Ok(false),
        };

        // one reference in the map, one held here; anything above that
        // means a caller still pins the frame
        if Arc::strong_count(&pod) > 2 {
            return Ok(false);
        }

        {
            let mut page = pod.wl();
            if page.is_dirty() {
                // the write-ahead rule: the log must be durable up to
                // the page LSN before the page goes to disk
                if page.get_lsn() >= tx_log::flushed_lsn() {
                    return Ok(false);
                }
                self.write_page_to_disk(pid, &page.get_page_data())?;
                page.set_dirty(false);
            }
        }

        buffer.remove(pid);
        Ok(true)
    }

    fn write_page_to_disk(&self, pid: &Key, data: &[u8]) -> Result<(), IndexError> {
        let registry = Database::registry();
        let table_pod = registry
            .get_table_by_id(pid.get_table_id())
            .ok_or_else(|| IndexError::fatal(&format!("table {} not found", pid.get_table_id())))?;
        let table = table_pod.rl();
        table.write_page_to_disk(pid, data)
    }

    /// Write all pages dirtied by the specified transaction to disk,
    /// forcing the log up to each page LSN first.
    pub fn flush_pages(
        &self,
        tx: &Transaction,
        log_manager: &mut LogManager,
    ) -> Result<(), IndexError> {
        let dirty_pages = Database::concurrent_status().get_dirty_pages(tx);
        for pid in dirty_pages {
            self.flush_page(&pid, log_manager)?;
        }
        Ok(())
    }

    /// Flush every dirty page in the pool.
    pub fn flush_all_pages(&self, log_manager: &mut LogManager) -> Result<(), IndexError> {
        for pid in self.all_keys() {
            self.flush_page(&pid, log_manager)?;
        }
        Ok(())
    }

    /// Write the content of a specific page to disk, if dirty.
    pub fn flush_page(&self, pid: &Key, log_manager: &mut LogManager) -> Result<(), IndexError> {
        match pid.category {
            PageCategory::RootPointer => {
                self.flush_page_inner(&self.root_pointer_buffer, pid, log_manager)
            }
            PageCategory::Internal => self.flush_page_inner(&self.internal_buffer, pid, log_manager),
            PageCategory::Leaf => self.flush_page_inner(&self.leaf_buffer, pid, log_manager),
        }
    }

    fn flush_page_inner<PAGE: BTreePage>(
        &self,
        buffer: &ConcurrentHashMap<Key, Pod<PAGE>>,
        pid: &Key,
        log_manager: &mut LogManager,
    ) -> Result<(), IndexError> {
        let pod = match buffer.get(pid) {
            Some(pod) => pod,
            None => return Ok(()),
        };

        let mut page = pod.wl();
        if !page.is_dirty() {
            return Ok(());
        }

        log_manager.flush_up_to(page.get_lsn())?;
        self.write_page_to_disk(pid, &page.get_page_data())?;
        page.set_dirty(false);
        Ok(())
    }

    /// Remove the specific page id from the buffer pool. Needed by the
    /// recovery manager to ensure that the pool doesn't keep a rolled
    /// back page in its cache.
    pub fn discard_page(&self, pid: &Key) {
        match pid.category {
            PageCategory::RootPointer => {
                self.root_pointer_buffer.remove(pid);
            }
            PageCategory::Internal => {
                self.internal_buffer.remove(pid);
            }
            PageCategory::Leaf => {
                self.leaf_buffer.remove(pid);
            }
        }
        self.last_access.remove(pid);
    }

    /// Replace the cached content of a page with a logged image.
    pub fn recover_page(&self, pid: &Key, data: &[u8], lsn: u64) {
        match pid.category {
            PageCategory::RootPointer => {
                Self::recover_into(&self.root_pointer_buffer, pid, data, lsn)
            }
            PageCategory::Internal => Self::recover_into(&self.internal_buffer, pid, data, lsn),
            PageCategory::Leaf => Self::recover_into(&self.leaf_buffer, pid, data, lsn),
        }
    }

    fn recover_into<PAGE: BTreePage>(
        buffer: &ConcurrentHashMap<Key, Pod<PAGE>>,
        pid: &Key,
        data: &[u8],
        lsn: u64,
    ) {
        match buffer.get(pid) {
            Some(pod) => {
                let mut page = pod.wl();
                *page = PAGE::new(pid, data);
                page.set_lsn(lsn);
            }
            None => {
                let mut page = PAGE::new(pid, data);
                page.set_lsn(lsn);
                buffer.insert(*pid, Arc::new(RwLock::new(page)));
            }
        }
    }

    pub fn all_keys(&self) -> Vec<Key> {
        let mut keys = vec![];
        keys.append(&mut self.root_pointer_buffer.keys());
        keys.append(&mut self.internal_buffer.keys());
        keys.append(&mut self.leaf_buffer.keys());
        keys
    }
}
