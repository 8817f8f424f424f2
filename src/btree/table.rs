use core::fmt;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use log::debug;

use crate::{
    btree::page::{
        empty_page_data, BTreeInternalPage, BTreeLeafPage, BTreePage, BTreePageID,
        BTreeRootPointerPage, Entry, PageCategory,
    },
    error::IndexError,
    io::BinFile,
    storage::{key::KeyType, pair::Pair},
    transaction::{Permission, Transaction},
    tx_log::RecordType,
    types::{IndexResult, Pod, ResultPod},
    utils::{lock_state, HandyRwLock},
    Database,
};

use super::buffer_pool::BufferPool;

enum SearchFor {
    Target(Pair),
    LeftMost,
}

/// Outcome of one step of a leaf-chain walk.
enum ChainStep {
    Found(usize),
    Continue(BTreePageID),
    End,
}

/// One index: a B+ tree over (encoded key, payload) pairs, backed by a
/// single page file. All access runs under a transaction; pages are
/// reached through the buffer pool, which takes the page locks, and
/// every mutation writes its page images to the log before returning.
pub struct BTreeTable {
    file_path: PathBuf,

    key_type: KeyType,

    table_id: u32,

    file: BinFile,
}

impl fmt::Display for BTreeTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<BTreeTable, file: {}, id: {}>",
            self.file_path.display(),
            self.table_id
        )
    }
}

// init functions
impl BTreeTable {
    /// Open (or create) the backing file. A fresh file is laid out as a
    /// root pointer page followed by one empty leaf, which is the root.
    pub fn open(file_path: &Path, table_id: u32, key_type: KeyType) -> Result<Self, IndexError> {
        let file = BinFile::open(file_path)?;

        if file.len()? == 0 {
            let page_size = BufferPool::get_page_size() as u64;
            file.write_at(0, &BTreeRootPointerPage::init_page_data())?;
            file.write_at(page_size, &empty_page_data())?;
            file.sync()?;
        }

        Ok(Self {
            file_path: file_path.to_path_buf(),
            key_type,
            table_id,
            file,
        })
    }

    pub fn get_id(&self) -> u32 {
        self.table_id
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }
}

// disk access
impl BTreeTable {
    pub fn read_page_from_disk(&self, pid: &BTreePageID) -> Result<Vec<u8>, IndexError> {
        let page_size = BufferPool::get_page_size();
        let offset = pid.page_index as u64 * page_size as u64;
        self.file.read_at(offset, page_size)
    }

    pub fn write_page_to_disk(&self, pid: &BTreePageID, data: &[u8]) -> IndexResult {
        let page_size = BufferPool::get_page_size();
        let offset = pid.page_index as u64 * page_size as u64;
        self.file.write_at(offset, data)?;
        self.file.sync()
    }

    fn write_empty_page_to_disk(&self, pid: &BTreePageID) -> IndexResult {
        self.write_page_to_disk(pid, &empty_page_data())
    }
}

// bookkeeping helpers
impl BTreeTable {
    /// Stamp a freshly mutated page into the log: one record carrying
    /// the before and after images, tagged with the operation that
    /// caused it. The page LSN and before image advance, and the page is
    /// tracked in the transaction's dirty set.
    fn log_page<PAGE: BTreePage>(
        &self,
        tx: &Transaction,
        rt: RecordType,
        pod: &Pod<PAGE>,
    ) -> IndexResult {
        let mut page = pod.wl();
        let pid = page.get_pid();

        let lsn = Database::mut_log_manager().log_update(
            rt,
            tx,
            &pid,
            &page.get_before_image(),
            &page.get_page_data(),
        )?;

        page.set_lsn(lsn);
        page.set_before_image();
        page.set_dirty(true);

        Database::mut_concurrent_status().set_dirty_page(tx, &pid);
        Ok(())
    }

    pub fn get_root_pid(&self, tx: &Transaction) -> Result<BTreePageID, IndexError> {
        let root_ptr_pid = BTreePageID::root_pointer(self.table_id);
        let root_ptr_rc =
            Database::buffer_pool().get_root_ptr_page(tx, Permission::ReadOnly, &root_ptr_pid)?;
        let pid = root_ptr_rc.rl().get_root_pid();
        Ok(pid)
    }

    fn set_root_pid(&self, tx: &Transaction, pid: &BTreePageID) -> IndexResult {
        let root_ptr_pid = BTreePageID::root_pointer(self.table_id);
        let root_ptr_rc =
            Database::buffer_pool().get_root_ptr_page(tx, Permission::ReadWrite, &root_ptr_pid)?;
        root_ptr_rc.wl().set_root_pid(pid);
        self.log_page(tx, RecordType::Insert, &root_ptr_rc)
    }

    /// Hand out a fresh page index, persisting the new high-water mark
    /// through the root pointer page.
    fn allocate_page_index(&self, tx: &Transaction) -> Result<u32, IndexError> {
        let root_ptr_pid = BTreePageID::root_pointer(self.table_id);
        let root_ptr_rc =
            Database::buffer_pool().get_root_ptr_page(tx, Permission::ReadWrite, &root_ptr_pid)?;
        let index = root_ptr_rc.wl().allocate_page_index();
        self.log_page(tx, RecordType::Insert, &root_ptr_rc)?;
        Ok(index)
    }

    fn get_empty_leaf_page(&self, tx: &Transaction) -> ResultPod<BTreeLeafPage> {
        let index = self.allocate_page_index(tx)?;
        let pid = BTreePageID::new(PageCategory::Leaf, self.table_id, index);
        self.write_empty_page_to_disk(&pid)?;
        Database::buffer_pool().get_leaf_page(tx, Permission::ReadWrite, &pid)
    }

    fn get_empty_internal_page(&self, tx: &Transaction) -> ResultPod<BTreeInternalPage> {
        let index = self.allocate_page_index(tx)?;
        let pid = BTreePageID::new(PageCategory::Internal, self.table_id, index);
        self.write_empty_page_to_disk(&pid)?;
        Database::buffer_pool().get_internal_page(tx, Permission::ReadWrite, &pid)
    }

    /// Update the parent pointer of an arbitrary child page.
    fn set_parent(&self, tx: &Transaction, child_pid: &BTreePageID, parent_pid: &BTreePageID) -> IndexResult {
        match child_pid.category {
            PageCategory::Leaf => {
                let child_rc =
                    Database::buffer_pool().get_leaf_page(tx, Permission::ReadWrite, child_pid)?;
                child_rc.wl().set_parent_pid(parent_pid);
                self.log_page(tx, RecordType::Insert, &child_rc)
            }
            PageCategory::Internal => {
                let child_rc = Database::buffer_pool().get_internal_page(
                    tx,
                    Permission::ReadWrite,
                    child_pid,
                )?;
                child_rc.wl().set_parent_pid(parent_pid);
                self.log_page(tx, RecordType::Insert, &child_rc)
            }
            PageCategory::RootPointer => Err(IndexError::fatal("root pointer has no parent")),
        }
    }
}

// search functions
impl BTreeTable {
    /// Descend from `pid` to the leaf page a target pair routes to (or
    /// the left-most leaf). Internal pages are latched shared; the leaf
    /// is taken with the requested permission.
    fn find_leaf_page(
        &self,
        tx: &Transaction,
        perm: Permission,
        pid: BTreePageID,
        search: &SearchFor,
    ) -> ResultPod<BTreeLeafPage> {
        let mut pid = pid;
        loop {
            match pid.category {
                PageCategory::Leaf => {
                    return Database::buffer_pool().get_leaf_page(tx, perm, &pid);
                }
                PageCategory::Internal => {
                    let internal_rc = Database::buffer_pool().get_internal_page(
                        tx,
                        Permission::ReadOnly,
                        &pid,
                    )?;

                    let child = {
                        let internal = internal_rc.rl();
                        match search {
                            SearchFor::Target(pair) => {
                                let mut child = None;
                                let mut last = None;
                                for e in internal.iter() {
                                    if pair < &e.get_key() {
                                        child = Some(e.get_left_child());
                                        break;
                                    }
                                    last = Some(e);
                                }
                                match child {
                                    Some(c) => c,
                                    None => last
                                        .map(|e| e.get_right_child())
                                        .ok_or_else(|| IndexError::fatal("empty internal page"))?,
                                }
                            }
                            SearchFor::LeftMost => internal.get_first_child_pid(),
                        }
                    };
                    pid = child;
                }
                PageCategory::RootPointer => {
                    return Err(IndexError::fatal("descended into root pointer page"));
                }
            }
        }
    }

    /// Walk the leaf chain from `leaf_rc` to the first slot holding a
    /// pair >= `bound`. Emptied leaves and exhausted pages are skipped
    /// through the right sibling link.
    fn first_slot_ge_chain(
        &self,
        tx: &Transaction,
        perm: Permission,
        leaf_rc: Pod<BTreeLeafPage>,
        bound: &Pair,
    ) -> Result<Option<(Pod<BTreeLeafPage>, usize)>, IndexError> {
        let mut leaf_rc = leaf_rc;
        loop {
            let step = {
                let leaf = leaf_rc.rl();
                match leaf.first_slot_ge(bound) {
                    Some(slot) => ChainStep::Found(slot),
                    None => match leaf.get_right_pid() {
                        Some(pid) => ChainStep::Continue(pid),
                        None => ChainStep::End,
                    },
                }
            };

            match step {
                ChainStep::Found(slot) => return Ok(Some((leaf_rc, slot))),
                ChainStep::End => return Ok(None),
                ChainStep::Continue(pid) => {
                    leaf_rc = Database::buffer_pool().get_leaf_page(tx, perm, &pid)?;
                }
            }
        }
    }

    /// The first pair >= `bound` in global order, if any.
    pub fn first_pair_ge(&self, tx: &Transaction, bound: &Pair) -> Result<Option<Pair>, IndexError> {
        let root_pid = self.get_root_pid(tx)?;
        let leaf_rc = self.find_leaf_page(
            tx,
            Permission::ReadOnly,
            root_pid,
            &SearchFor::Target(bound.clone()),
        )?;

        match self.first_slot_ge_chain(tx, Permission::ReadOnly, leaf_rc, bound)? {
            Some((leaf_rc, slot)) => Ok(leaf_rc.rl().get_pair(slot)),
            None => Ok(None),
        }
    }
}

// insert-related functions
impl BTreeTable {
    /// Insert a pair, keeping the pairs in sorted order. Fails with
    /// `EntryExists` if the exact (key, payload) pair is already
    /// present. May cause pages to split if the target leaf is full.
    pub fn insert_pair(&self, tx: &Transaction, pair: &Pair) -> IndexResult {
        let root_pid = self.get_root_pid(tx)?;
        let mut leaf_rc = self.find_leaf_page(
            tx,
            Permission::ReadWrite,
            root_pid,
            &SearchFor::Target(pair.clone()),
        )?;

        // exact duplicates are rejected
        if let Some((hit_rc, slot)) =
            self.first_slot_ge_chain(tx, Permission::ReadWrite, leaf_rc.clone(), pair)?
        {
            if hit_rc.rl().get_pair(slot).as_ref() == Some(pair) {
                return Err(IndexError::EntryExists);
            }
        }

        if leaf_rc.rl().empty_slots_count() == 0 {
            leaf_rc = self.split_leaf_page(tx, leaf_rc, pair)?;
        }
        leaf_rc.wl().insert_pair(pair);
        self.log_page(tx, RecordType::Insert, &leaf_rc)?;
        Ok(())
    }

    /// Split a leaf page to make room for new pairs and recursively
    /// split the parent node as needed to accommodate a new entry. The
    /// new entry is the first pair of the right-hand page (the pair is
    /// "copied up"): everything reachable left of it compares lower,
    /// everything right of it compares greater or equal.
    ///
    /// Return the leaf page into which `pair` should be inserted after
    /// the split.
    fn split_leaf_page(
        &self,
        tx: &Transaction,
        page_rc: Pod<BTreeLeafPage>,
        pair: &Pair,
    ) -> ResultPod<BTreeLeafPage> {
        let new_sibling_rc = self.get_empty_leaf_page(tx)?;
        let parent_pid: BTreePageID;
        let sep: Pair;
        let old_right_pid: Option<BTreePageID>;

        // borrow of new_sibling_rc and page_rc start here
        {
            let mut new_sibling = new_sibling_rc.wl();
            let mut page = page_rc.wl();

            // 1. adding a new page on the right of the existing page and
            // moving half of the pairs to the new page
            let used_slots: Vec<usize> = (0..page.get_slots_count())
                .filter(|i| page.is_slot_used(*i))
                .collect();
            let move_count = used_slots.len() / 2;
            let split_at = used_slots.len() - move_count;

            for &slot in &used_slots[split_at..] {
                let moved = page.get_pair(slot).unwrap();
                new_sibling.insert_pair(&moved);
                page.delete_pair(slot);
            }

            sep = new_sibling.iter().next().unwrap();
            parent_pid = page.get_parent_pid();
            old_right_pid = page.get_right_pid();

            // 2. hook the new page into the sibling chain
            new_sibling.set_right_pid(old_right_pid);
            new_sibling.set_left_pid(Some(page.get_pid()));
            page.set_right_pid(Some(new_sibling.get_pid()));
        }
        // borrow of new_sibling_rc and page_rc end here

        // set the left pointer for the old right sibling
        if let Some(old_right_pid) = old_right_pid {
            let old_right_rc =
                Database::buffer_pool().get_leaf_page(tx, Permission::ReadWrite, &old_right_pid)?;
            old_right_rc
                .wl()
                .set_left_pid(Some(new_sibling_rc.rl().get_pid()));
            self.log_page(tx, RecordType::Insert, &old_right_rc)?;
        }

        // 3. copy the separator up into the parent page, and recursively
        // split the parent as needed to accommodate the new entry.
        //
        // This is done outside all the borrow blocks since once the
        // parent page is split, a lot of children will be borrowed (may
        // include the current leaf page).
        let parent_rc = self.get_parent_with_empty_slots(tx, parent_pid, pair)?;

        // borrow of parent_rc, page_rc and new_sibling_rc start here
        {
            let mut parent = parent_rc.wl();
            let mut page = page_rc.wl();
            let mut new_sibling = new_sibling_rc.wl();

            let entry = Entry::new(sep.clone(), &page.get_pid(), &new_sibling.get_pid());
            debug!(
                "split leaf {} {}, sibling: {} {}, parent: {}, sep: {}",
                page.get_pid(),
                lock_state(page_rc.clone()),
                new_sibling.get_pid(),
                lock_state(new_sibling_rc.clone()),
                parent.get_pid(),
                sep,
            );
            parent.insert_entry(&entry)?;

            page.set_parent_pid(&parent.get_pid());
            new_sibling.set_parent_pid(&parent.get_pid());
        }
        // borrow of parent_rc, page_rc and new_sibling_rc end here

        self.log_page(tx, RecordType::Insert, &page_rc)?;
        self.log_page(tx, RecordType::Insert, &new_sibling_rc)?;
        self.log_page(tx, RecordType::Insert, &parent_rc)?;

        if pair >= &sep {
            Ok(new_sibling_rc)
        } else {
            Ok(page_rc)
        }
    }

    /// Method to encapsulate the process of getting a parent page ready
    /// to accept new entries: create a new root if the parent is the
    /// root pointer, split a full parent, or simply return it.
    fn get_parent_with_empty_slots(
        &self,
        tx: &Transaction,
        parent_id: BTreePageID,
        pair: &Pair,
    ) -> ResultPod<BTreeInternalPage> {
        match parent_id.category {
            PageCategory::RootPointer => {
                let new_parent_rc = self.get_empty_internal_page(tx)?;

                // update the root pointer
                let new_parent_pid = new_parent_rc.rl().get_pid();
                self.set_root_pid(tx, &new_parent_pid)?;

                Ok(new_parent_rc)
            }
            PageCategory::Internal => {
                let parent_rc = Database::buffer_pool().get_internal_page(
                    tx,
                    Permission::ReadWrite,
                    &parent_id,
                )?;

                let empty_slots_count = parent_rc.rl().empty_slots_count();
                if empty_slots_count > 0 {
                    Ok(parent_rc)
                } else {
                    // split upper parent
                    self.split_internal_page(tx, parent_rc, pair)
                }
            }
            _ => Err(IndexError::fatal("invalid parent category")),
        }
    }

    /// Split an internal page and push the middle entry up to the
    /// parent, recursively splitting it as needed. Return the internal
    /// page into which an entry routing `pair` should be inserted.
    fn split_internal_page(
        &self,
        tx: &Transaction,
        page_rc: Pod<BTreeInternalPage>,
        pair: &Pair,
    ) -> ResultPod<BTreeInternalPage> {
        let sibling_rc = self.get_empty_internal_page(tx)?;
        let sep: Pair;
        let mut parent_pid: BTreePageID;
        let mut moved_children: Vec<BTreePageID> = Vec::new();

        // borrow of sibling_rc and page_rc start here
        {
            let mut sibling = sibling_rc.wl();
            let mut page = page_rc.wl();

            parent_pid = page.get_parent_pid();

            let entries_count = page.entries_count();
            let move_count = entries_count / 2;

            // move the upper half of the entries to the sibling,
            // descending so each insert can hook onto the previous one
            let mut delete_ids: Vec<usize> = Vec::new();
            let mut it = page.iter();
            for e in it.by_ref().rev().take(move_count) {
                delete_ids.push(e.get_record_id());
                sibling.insert_entry(&e)?;
                moved_children.push(e.get_right_child());
            }

            // the middle entry is pushed up: its key becomes the parent
            // separator, its right child is already the left-most child
            // of the sibling
            let middle = it.next_back().unwrap();
            delete_ids.push(middle.get_record_id());
            for id in delete_ids {
                page.delete_key_and_right_child(id);
            }
            moved_children.push(middle.get_right_child());

            sep = middle.get_key();
        }
        // borrow of sibling_rc and page_rc end here

        // re-home the moved children
        let sibling_pid = sibling_rc.rl().get_pid();
        for child_pid in &moved_children {
            self.set_parent(tx, child_pid, &sibling_pid)?;
        }

        let parent_rc = self.get_parent_with_empty_slots(tx, parent_pid, pair)?;
        parent_pid = parent_rc.rl().get_pid();
        page_rc.wl().set_parent_pid(&parent_pid);
        sibling_rc.wl().set_parent_pid(&parent_pid);

        // borrow of parent_rc start here
        {
            let mut parent = parent_rc.wl();
            let entry = Entry::new(sep.clone(), &page_rc.rl().get_pid(), &sibling_pid);
            parent.insert_entry(&entry)?;
        }
        // borrow of parent_rc end here

        self.log_page(tx, RecordType::Insert, &page_rc)?;
        self.log_page(tx, RecordType::Insert, &sibling_rc)?;
        self.log_page(tx, RecordType::Insert, &parent_rc)?;

        if pair >= &sep {
            Ok(sibling_rc)
        } else {
            Ok(page_rc)
        }
    }
}

// delete-related functions
impl BTreeTable {
    /// Remove the exact (key, payload) pair. Fails with
    /// `EntryDoesNotExist` when it is not present. Pages are never
    /// merged; an emptied leaf stays in the chain and is skipped by
    /// iteration.
    pub fn delete_pair(&self, tx: &Transaction, pair: &Pair) -> IndexResult {
        let root_pid = self.get_root_pid(tx)?;
        let leaf_rc = self.find_leaf_page(
            tx,
            Permission::ReadWrite,
            root_pid,
            &SearchFor::Target(pair.clone()),
        )?;

        match self.first_slot_ge_chain(tx, Permission::ReadWrite, leaf_rc, pair)? {
            Some((leaf_rc, slot)) => {
                if leaf_rc.rl().get_pair(slot).as_ref() != Some(pair) {
                    return Err(IndexError::EntryDoesNotExist);
                }
                leaf_rc.wl().delete_pair(slot);
                self.log_page(tx, RecordType::Delete, &leaf_rc)?;
                Ok(())
            }
            None => Err(IndexError::EntryDoesNotExist),
        }
    }

    /// Remove every pair carrying `key`. Fails with `KeyNotFound` when
    /// there is none.
    pub fn delete_all(&self, tx: &Transaction, key: &[u8]) -> IndexResult {
        let bound = Pair::lower_bound(key);
        let mut deleted = 0;

        loop {
            let root_pid = self.get_root_pid(tx)?;
            let leaf_rc = self.find_leaf_page(
                tx,
                Permission::ReadWrite,
                root_pid,
                &SearchFor::Target(bound.clone()),
            )?;

            match self.first_slot_ge_chain(tx, Permission::ReadWrite, leaf_rc, &bound)? {
                Some((leaf_rc, slot)) => {
                    let hit = {
                        let leaf = leaf_rc.rl();
                        leaf.get_pair(slot).filter(|p| p.key == key)
                    };
                    match hit {
                        Some(_) => {
                            leaf_rc.wl().delete_pair(slot);
                            self.log_page(tx, RecordType::Delete, &leaf_rc)?;
                            deleted += 1;
                        }
                        None => break,
                    }
                }
                None => break,
            }
        }

        if deleted == 0 {
            return Err(IndexError::KeyNotFound);
        }
        debug!("deleted {} pairs for key {}", deleted, hex::encode(key));
        Ok(())
    }
}

// iteration and validation
impl BTreeTable {
    pub fn iter<'t>(&'t self, tx: &'t Transaction) -> BTreeTableIterator<'t> {
        BTreeTableIterator::new(tx, self)
    }

    /// Calculate the number of pairs in the index. Requires S-locks on
    /// all leaf pages.
    pub fn pairs_count(&self, tx: &Transaction) -> usize {
        self.iter(tx).count()
    }

    /// Verify the pair order across the whole leaf chain: strictly
    /// ascending, which also implies (key, payload) uniqueness.
    pub fn check_integrity(&self, tx: &Transaction) -> IndexResult {
        let pairs: Vec<Pair> = self.iter(tx).collect();
        for (a, b) in pairs.iter().tuple_windows() {
            if a >= b {
                return Err(IndexError::fatal(&format!(
                    "pairs out of order: {} >= {}",
                    a, b
                )));
            }
        }
        Ok(())
    }
}

/// Forward iterator over every pair of an index, in (key, payload)
/// order, following the leaf sibling chain.
pub struct BTreeTableIterator<'t> {
    tx: &'t Transaction,
    table: &'t BTreeTable,

    current: Option<Pod<BTreeLeafPage>>,
    slot: usize,
    started: bool,
}

impl<'t> BTreeTableIterator<'t> {
    pub fn new(tx: &'t Transaction, table: &'t BTreeTable) -> Self {
        Self {
            tx,
            table,
            current: None,
            slot: 0,
            started: false,
        }
    }
}

impl Iterator for BTreeTableIterator<'_> {
    type Item = Pair;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.started {
            self.started = true;
            let root_pid = self.table.get_root_pid(self.tx).ok()?;
            let leaf_rc = self
                .table
                .find_leaf_page(self.tx, Permission::ReadOnly, root_pid, &SearchFor::LeftMost)
                .ok()?;
            self.current = Some(leaf_rc);
            self.slot = 0;
        }

        loop {
            let leaf_rc = self.current.as_ref()?.clone();

            let mut found = None;
            let mut next_pid = None;
            {
                let leaf = leaf_rc.rl();
                while self.slot < leaf.get_slots_count() {
                    let slot = self.slot;
                    self.slot += 1;
                    if leaf.is_slot_used(slot) {
                        found = leaf.get_pair(slot);
                        break;
                    }
                }
                if found.is_none() {
                    next_pid = leaf.get_right_pid();
                }
            }

            if let Some(pair) = found {
                return Some(pair);
            }
            match next_pid {
                Some(pid) => {
                    let next_rc = Database::buffer_pool()
                        .get_leaf_page(self.tx, Permission::ReadOnly, &pid)
                        .ok()?;
                    self.current = Some(next_rc);
                    self.slot = 0;
                }
                None => return None,
            }
        }
    }
}
