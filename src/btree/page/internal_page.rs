use std::fmt;

use bit_vec::BitVec;

use log::error;

use crate::{
    btree::buffer_pool::BufferPool,
    error::IndexError,
    io::{BinReader, BinWriter},
    storage::pair::{Pair, PAIR_BYTES},
};

use super::{BTreeBasePage, BTreePage, BTreePageID, PageCategory};

/// Size of a child pointer on disk.
const INDEX_SIZE: usize = 4;

/// An internal page routes searches: slot 0 holds only the left-most
/// child pointer, every further used slot holds a separator pair and the
/// child to its right.
///
/// Separators are full (key, payload) pairs copied up from the first
/// entry of the right-hand page at a split, so runs of duplicate keys
/// spanning several leaves still route deterministically.
pub struct BTreeInternalPage {
    page: BTreeBasePage,

    pub keys: Vec<Pair>,

    /// note: the left child of the nth entry is not always located in
    /// the n-1 slot, but the nearest left slot which has been marked as
    /// used.
    pub children: Vec<BTreePageID>,

    slot_count: usize,

    // header bytes
    header: BitVec<u32>,

    /// category shared by all children of this page
    child_category: PageCategory,
}

impl std::ops::Deref for BTreeInternalPage {
    type Target = BTreeBasePage;
    fn deref(&self) -> &Self::Target {
        &self.page
    }
}

impl std::ops::DerefMut for BTreeInternalPage {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.page
    }
}

impl BTreeInternalPage {
    /// Retrieve the maximum number of child pointers this page can
    /// hold. Every slot costs a child pointer, a separator pair and one
    /// header bit; the fixed prefix is the parent pointer, the child
    /// category byte and the rounding byte of the header.
    pub fn get_children_cap() -> usize {
        let bits_per_slot_including_header = (PAIR_BYTES + INDEX_SIZE) * 8 + 1;
        let prefix_bits = (INDEX_SIZE + 1 + 1) * 8;
        (BufferPool::get_page_size() * 8 - prefix_bits) / bits_per_slot_including_header
    }

    /// The number of separator keys: one less than the child count.
    pub fn get_max_entries() -> usize {
        Self::get_children_cap() - 1
    }

    fn get_header_size(slot_count: usize) -> usize {
        slot_count / 8 + 1
    }

    pub fn empty_slots_count(&self) -> usize {
        let mut count = 0;
        // start from 1 because the first key slot is not used since a
        // node with m keys has m+1 children
        for i in 1..self.slot_count {
            if !self.is_slot_used(i) {
                count += 1
            }
        }
        count
    }

    pub fn entries_count(&self) -> usize {
        self.slot_count - self.empty_slots_count() - 1
    }

    pub fn is_slot_used(&self, slot_index: usize) -> bool {
        self.header[slot_index]
    }

    fn mark_slot_status(&mut self, slot_index: usize, used: bool) {
        self.header.set(slot_index, used);
    }

    pub fn child_category(&self) -> PageCategory {
        self.child_category
    }

    pub fn insert_entry(&mut self, e: &Entry) -> Result<(), IndexError> {
        if self.empty_slots_count() == 0 {
            return Err(IndexError::fatal("no empty slots on this page"));
        }

        self.child_category = e.get_left_child().category;

        // if this is the first entry, add it and return
        if self.entries_count() == 0 {
            self.children[0] = e.get_left_child();
            self.children[1] = e.get_right_child();
            self.keys[1] = e.get_key();
            self.mark_slot_status(0, true);
            self.mark_slot_status(1, true);
            return Ok(());
        }

        // find the first empty slot, start from 1
        let mut empty_slot = 0;
        for i in 1..self.slot_count {
            if !self.is_slot_used(i) {
                empty_slot = i;
                break;
            }
        }

        // find the child pointer matching the left or right child in
        // this entry
        let mut slot_just_ahead: usize = usize::MAX;
        for i in 0..self.slot_count {
            if !self.is_slot_used(i) {
                continue;
            }

            // circumstance 1: the new entry goes just after the current
            // entry
            if self.children[i] == e.get_left_child() {
                slot_just_ahead = i;
                break;
            }

            // circumstance 2: the new entry goes just inside the current
            // entry, so the right child of the current entry becomes the
            // left child of the new entry
            if self.children[i] == e.get_right_child() {
                slot_just_ahead = i;
                self.children[i] = e.get_left_child();
                break;
            }
        }

        if slot_just_ahead == usize::MAX {
            let err = IndexError::fatal(&format!(
                "no slot found for entry {}, pid: {}, entries count: {}",
                e,
                self.get_pid(),
                self.entries_count()
            ));
            error!("{}", err);
            return Err(err);
        }

        // shift entries back or forward to fill the empty slot and make
        // room for the new entry while keeping entries in sorted order
        let good_slot: usize;
        if empty_slot < slot_just_ahead {
            for i in empty_slot..slot_just_ahead {
                self.move_entry(i + 1, i);
            }
            good_slot = slot_just_ahead
        } else {
            for i in (slot_just_ahead + 1..empty_slot).rev() {
                self.move_entry(i, i + 1);
            }
            good_slot = slot_just_ahead + 1
        }

        self.keys[good_slot] = e.get_key();
        self.children[good_slot] = e.get_right_child();
        self.mark_slot_status(good_slot, true);
        Ok(())
    }

    fn move_entry(&mut self, from: usize, to: usize) {
        if self.is_slot_used(from) && !self.is_slot_used(to) {
            self.keys[to] = self.keys[from].clone();

            // note that we don't need to update the left child slot,
            // since the left child is the nearest `used` slot, which is
            // kept untouched
            self.children[to] = self.children[from];

            self.mark_slot_status(from, false);
            self.mark_slot_status(to, true);
        }
    }

    pub fn delete_key_and_right_child(&mut self, record_id: usize) {
        self.mark_slot_status(record_id, false);
    }

    pub fn get_first_child_pid(&self) -> BTreePageID {
        let mut it = BTreeInternalPageIterator::new(self);
        it.next().unwrap().get_left_child()
    }

    pub fn get_last_child_pid(&self) -> BTreePageID {
        let mut it = BTreeInternalPageIterator::new(self);
        it.next_back().unwrap().get_right_child()
    }

    pub fn iter(&self) -> BTreeInternalPageIterator<'_> {
        BTreeInternalPageIterator::new(self)
    }
}

impl BTreePage for BTreeInternalPage {
    fn new(pid: &BTreePageID, bytes: &[u8]) -> Self {
        let slot_count = Self::get_children_cap();
        let header_size = Self::get_header_size(slot_count);

        let mut reader = BinReader::new(bytes);
        let parent_index = reader.read_u32();
        let child_category = PageCategory::from_u8(reader.read_u8());
        let header = BitVec::from_bytes(&reader.read_bytes(header_size));

        let mut children = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            let child_index = reader.read_u32();
            children.push(BTreePageID::new(child_category, pid.table_id, child_index));
        }

        let mut keys = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            keys.push(Pair::from_bytes(&reader.read_bytes(PAIR_BYTES)));
        }

        let mut page = BTreeBasePage::new(pid);
        page.set_parent_page_index(parent_index);

        let mut instance = Self {
            page,
            keys,
            children,
            slot_count,
            header,
            child_category,
        };
        instance.set_before_image();
        instance
    }

    fn get_pid(&self) -> BTreePageID {
        self.page.get_pid()
    }

    fn get_page_data(&self) -> Vec<u8> {
        let mut writer = BinWriter::new();
        writer.write_u32(self.page.parent_page_index());
        writer.write_u8(self.child_category.to_u8());
        writer.write_bytes(&self.header.to_bytes());
        for i in 0..self.slot_count {
            writer.write_u32(self.children[i].page_index);
        }
        for i in 0..self.slot_count {
            writer.write_bytes(&self.keys[i].to_bytes());
        }
        writer.into_page(BufferPool::get_page_size())
    }

    fn get_before_image(&self) -> Vec<u8> {
        self.page.before_image().to_vec()
    }

    fn set_before_image(&mut self) {
        let data = self.get_page_data();
        self.page.set_before_image_bytes(data);
    }

    fn get_parent_pid(&self) -> BTreePageID {
        self.page.get_parent_pid()
    }

    fn set_parent_pid(&mut self, pid: &BTreePageID) {
        self.page.set_parent_pid(pid)
    }

    fn is_dirty(&self) -> bool {
        self.page.is_dirty()
    }

    fn set_dirty(&mut self, dirty: bool) {
        self.page.set_dirty(dirty)
    }

    fn get_lsn(&self) -> u64 {
        self.page.get_lsn()
    }

    fn set_lsn(&mut self, lsn: u64) {
        self.page.set_lsn(lsn)
    }
}

/// All pairs reachable through the left child compare strictly less than
/// the key; all pairs reachable through the right child compare greater
/// than or equal to it.
#[derive(Clone)]
pub struct Entry {
    key: Pair,
    left: BTreePageID,
    right: BTreePageID,

    // record position in the page
    record_id: usize,
}

impl Entry {
    pub fn new(key: Pair, left: &BTreePageID, right: &BTreePageID) -> Self {
        Self {
            key,
            left: *left,
            right: *right,
            record_id: 0,
        }
    }

    pub fn set_record_id(&mut self, record_id: usize) {
        self.record_id = record_id;
    }

    pub fn get_record_id(&self) -> usize {
        self.record_id
    }

    pub fn get_key(&self) -> Pair {
        self.key.clone()
    }

    pub fn get_left_child(&self) -> BTreePageID {
        self.left
    }

    pub fn get_right_child(&self) -> BTreePageID {
        self.right
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {}, {})", self.key, self.left, self.right)
    }
}

pub struct BTreeInternalPageIterator<'page> {
    page: &'page BTreeInternalPage,

    cursor: usize,
    left_child_position: usize,

    reverse_cursor: usize,
    right_child_position: usize,
}

impl<'page> BTreeInternalPageIterator<'page> {
    pub fn new(page: &'page BTreeInternalPage) -> Self {
        let mut right_child_position = page.slot_count;
        loop {
            right_child_position -= 1;
            if right_child_position == 0 || page.is_slot_used(right_child_position) {
                break;
            }
        }

        Self {
            page,

            cursor: 0,
            left_child_position: 0,

            reverse_cursor: right_child_position,
            right_child_position,
        }
    }
}

impl Iterator for BTreeInternalPageIterator<'_> {
    type Item = Entry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.cursor += 1;
            let cursor = self.cursor;

            if cursor >= self.page.slot_count {
                return None;
            }

            if !self.page.is_slot_used(cursor) {
                continue;
            }
            let mut e = Entry::new(
                self.page.keys[cursor].clone(),
                &self.page.children[self.left_child_position],
                &self.page.children[cursor],
            );
            e.set_record_id(cursor);

            // set left child position for next iteration
            self.left_child_position = cursor;

            return Some(e);
        }
    }
}

impl DoubleEndedIterator for BTreeInternalPageIterator<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(left_index) = self.reverse_cursor.checked_sub(1) {
                self.reverse_cursor = left_index;
                if !self.page.is_slot_used(left_index) {
                    continue;
                }

                let mut e = Entry::new(
                    self.page.keys[self.right_child_position].clone(),
                    &self.page.children[left_index],
                    &self.page.children[self.right_child_position],
                );
                e.set_record_id(self.right_child_position);

                // set right child position for next iteration
                self.right_child_position = left_index;

                return Some(e);
            } else {
                return None;
            }
        }
    }
}
