use bit_vec::BitVec;

use log::debug;

use crate::{
    btree::buffer_pool::BufferPool,
    io::{BinReader, BinWriter},
    storage::pair::{Pair, PAIR_BYTES},
};

use super::{BTreeBasePage, BTreePage, BTreePageID, PageCategory, EMPTY_PAGE_INDEX};

/// Bytes in front of the slot bitmap: parent, left sibling, right
/// sibling page indexes.
const LEAF_PREFIX_BYTES: usize = 12;

/// A leaf page: a sorted run of (key, payload) pairs plus sibling links.
/// Slots are fixed size; the bitmap in the header marks which are
/// occupied.
pub struct BTreeLeafPage {
    page: BTreeBasePage,

    pub slot_count: usize,

    // indicate slots' status: true means occupied, false means empty
    header: BitVec<u32>,

    // all pairs (include empty slots)
    pairs: Vec<Pair>,

    right_sibling_index: u32,
    left_sibling_index: u32,
}

impl std::ops::Deref for BTreeLeafPage {
    type Target = BTreeBasePage;
    fn deref(&self) -> &Self::Target {
        &self.page
    }
}

impl std::ops::DerefMut for BTreeLeafPage {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.page
    }
}

impl BTreeLeafPage {
    /// Retrieve the maximum number of pairs a leaf page can hold.
    pub fn calculate_slots_count() -> usize {
        let bits_per_pair_including_header = PAIR_BYTES * 8 + 1;
        let extra_bits = LEAF_PREFIX_BYTES * 8;
        (BufferPool::get_page_size() * 8 - extra_bits) / bits_per_pair_including_header
    }

    // Computes the number of bytes in the header of a leaf page with each
    // pair occupying PAIR_BYTES bytes
    pub fn calculate_header_size(slot_count: usize) -> usize {
        slot_count / 8 + 1
    }

    pub fn get_slots_count(&self) -> usize {
        self.slot_count
    }

    pub fn empty_slots_count(&self) -> usize {
        let mut count = 0;
        for i in 0..self.slot_count {
            if !self.is_slot_used(i) {
                count += 1;
            }
        }
        count
    }

    /// Returns the number of pairs currently stored on this page
    pub fn pairs_count(&self) -> usize {
        self.slot_count - self.empty_slots_count()
    }

    pub fn set_right_pid(&mut self, pid: Option<BTreePageID>) {
        match pid {
            Some(pid) => {
                self.right_sibling_index = pid.page_index;
            }
            None => {
                self.right_sibling_index = EMPTY_PAGE_INDEX;
            }
        }
    }

    pub fn get_right_pid(&self) -> Option<BTreePageID> {
        if self.right_sibling_index == EMPTY_PAGE_INDEX {
            None
        } else {
            Some(BTreePageID::new(
                PageCategory::Leaf,
                self.get_pid().table_id,
                self.right_sibling_index,
            ))
        }
    }

    pub fn set_left_pid(&mut self, pid: Option<BTreePageID>) {
        match pid {
            Some(pid) => {
                self.left_sibling_index = pid.page_index;
            }
            None => {
                self.left_sibling_index = EMPTY_PAGE_INDEX;
            }
        }
    }

    pub fn get_left_pid(&self) -> Option<BTreePageID> {
        if self.left_sibling_index == EMPTY_PAGE_INDEX {
            None
        } else {
            Some(BTreePageID::new(
                PageCategory::Leaf,
                self.get_pid().table_id,
                self.left_sibling_index,
            ))
        }
    }

    /// Adds the pair to the page such that all pairs remain in sorted
    /// (key, payload) order. The caller has verified there is at least
    /// one empty slot.
    pub fn insert_pair(&mut self, pair: &Pair) {
        // find the first empty slot
        let mut first_empty_slot: i32 = 0;
        for i in 0..self.slot_count {
            if !self.is_slot_used(i) {
                first_empty_slot = i as i32;
                break;
            }
        }

        // Find the last slot whose pair is less than the pair being
        // inserted.
        //
        // -1 indicates there is no such pair, so the new pair should be
        // inserted in slot 0 (-1 + 1).
        let mut last_less_slot: i32 = -1;
        for i in 0..self.slot_count {
            if self.is_slot_used(i) {
                if &self.pairs[i] < pair {
                    last_less_slot = i as i32;
                } else {
                    break;
                }
            }
        }

        // shift pairs back or forward to fill the empty slot and make
        // room for the new pair while keeping everything in sorted order
        let good_slot: usize;
        if first_empty_slot < last_less_slot {
            for i in first_empty_slot..last_less_slot {
                self.move_pair((i + 1) as usize, i as usize);
            }
            good_slot = last_less_slot as usize;
        } else {
            for i in (last_less_slot + 1..first_empty_slot).rev() {
                self.move_pair(i as usize, (i + 1) as usize);
            }
            good_slot = (last_less_slot + 1) as usize;
        }

        self.pairs[good_slot] = pair.clone();
        self.mark_slot_status(good_slot, true);

        debug!(
            "leaf {} insert at slot {}, first empty: {}, last less: {}",
            self.get_pid(),
            good_slot,
            first_empty_slot,
            last_less_slot
        );
    }

    // Move a pair from one slot to another slot, destination must be empty
    fn move_pair(&mut self, from: usize, to: usize) {
        if !self.is_slot_used(from) {
            return;
        }

        self.pairs[to] = self.pairs[from].clone();
        self.mark_slot_status(to, true);
        self.mark_slot_status(from, false);
    }

    pub fn get_pair(&self, slot_index: usize) -> Option<Pair> {
        if self.is_slot_used(slot_index) {
            return Some(self.pairs[slot_index].clone());
        }
        None
    }

    pub fn delete_pair(&mut self, slot_index: usize) {
        self.mark_slot_status(slot_index, false);
    }

    /// Slot of the first pair that compares greater than or equal to
    /// `bound`, if the page holds one.
    pub fn first_slot_ge(&self, bound: &Pair) -> Option<usize> {
        for i in 0..self.slot_count {
            if self.is_slot_used(i) && &self.pairs[i] >= bound {
                return Some(i);
            }
        }
        None
    }

    /// Slot holding exactly `pair`, if present.
    pub fn find_exact(&self, pair: &Pair) -> Option<usize> {
        for i in 0..self.slot_count {
            if self.is_slot_used(i) && &self.pairs[i] == pair {
                return Some(i);
            }
        }
        None
    }

    /// Returns true if associated slot on this page is filled.
    pub fn is_slot_used(&self, slot_index: usize) -> bool {
        self.header[slot_index]
    }

    pub fn mark_slot_status(&mut self, slot_index: usize, used: bool) {
        self.header.set(slot_index, used);
    }

    pub fn iter(&self) -> BTreeLeafPageIterator<'_> {
        BTreeLeafPageIterator::new(self)
    }
}

impl BTreePage for BTreeLeafPage {
    fn new(pid: &BTreePageID, bytes: &[u8]) -> Self {
        let slot_count = Self::calculate_slots_count();
        let header_size = Self::calculate_header_size(slot_count);

        let mut reader = BinReader::new(bytes);
        let parent_index = reader.read_u32();
        let left_sibling_index = reader.read_u32();
        let right_sibling_index = reader.read_u32();
        let header = BitVec::from_bytes(&reader.read_bytes(header_size));

        let mut pairs = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            pairs.push(Pair::from_bytes(&reader.read_bytes(PAIR_BYTES)));
        }

        let mut page = BTreeBasePage::new(pid);
        page.set_parent_page_index(parent_index);

        let mut instance = Self {
            page,
            slot_count,
            header,
            pairs,
            right_sibling_index,
            left_sibling_index,
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
        writer.write_u32(self.left_sibling_index);
        writer.write_u32(self.right_sibling_index);
        writer.write_bytes(&self.header.to_bytes());
        for i in 0..self.slot_count {
            writer.write_bytes(&self.pairs[i].to_bytes());
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

pub struct BTreeLeafPageIterator<'page> {
    page: &'page BTreeLeafPage,
    cursor: i32,
    reverse_cursor: i32,
}

impl<'page> BTreeLeafPageIterator<'page> {
    pub fn new(page: &'page BTreeLeafPage) -> Self {
        Self {
            page,
            cursor: -1,
            reverse_cursor: page.slot_count as i32,
        }
    }
}

impl Iterator for BTreeLeafPageIterator<'_> {
    type Item = Pair;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.cursor += 1;
            let cursor = self.cursor as usize;
            if cursor >= self.page.slot_count {
                return None;
            }

            if self.page.is_slot_used(cursor) {
                return Some(self.page.pairs[cursor].clone());
            }
        }
    }
}

impl DoubleEndedIterator for BTreeLeafPageIterator<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        loop {
            self.reverse_cursor -= 1;
            if self.reverse_cursor < 0 {
                return None;
            }

            let cursor = self.reverse_cursor as usize;
            if self.page.is_slot_used(cursor) {
                return Some(self.page.pairs[cursor].clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::page::empty_page_data;

    fn new_leaf() -> BTreeLeafPage {
        let pid = BTreePageID::new(PageCategory::Leaf, 0, 1);
        BTreeLeafPage::new(&pid, &empty_page_data())
    }

    #[test]
    fn test_sorted_insert() {
        let mut leaf = new_leaf();
        for key in &[b"c", b"a", b"b"] {
            leaf.insert_pair(&Pair::new(key.to_vec(), b"v".to_vec()));
        }

        let keys: Vec<Vec<u8>> = leaf.iter().map(|p| p.key).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_duplicates_sorted_by_payload() {
        let mut leaf = new_leaf();
        leaf.insert_pair(&Pair::new(b"a".to_vec(), b"2".to_vec()));
        leaf.insert_pair(&Pair::new(b"a".to_vec(), b"1".to_vec()));

        let payloads: Vec<Vec<u8>> = leaf.iter().map(|p| p.payload).collect();
        assert_eq!(payloads, vec![b"1".to_vec(), b"2".to_vec()]);
    }

    #[test]
    fn test_page_data_round_trip() {
        let mut leaf = new_leaf();
        leaf.insert_pair(&Pair::new(b"k".to_vec(), b"v".to_vec()));
        leaf.set_right_pid(Some(BTreePageID::new(PageCategory::Leaf, 0, 2)));

        let data = leaf.get_page_data();
        let reloaded = BTreeLeafPage::new(&leaf.get_pid(), &data);
        assert_eq!(reloaded.pairs_count(), 1);
        assert_eq!(
            reloaded.get_pair(leaf.find_exact(&Pair::new(b"k".to_vec(), b"v".to_vec())).unwrap()),
            Some(Pair::new(b"k".to_vec(), b"v".to_vec()))
        );
        assert_eq!(reloaded.get_right_pid(), leaf.get_right_pid());
    }
}
