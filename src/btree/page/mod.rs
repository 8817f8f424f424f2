mod internal_page;
mod leaf_page;
mod root_pointer_page;

pub use internal_page::{BTreeInternalPage, BTreeInternalPageIterator, Entry};
pub use leaf_page::{BTreeLeafPage, BTreeLeafPageIterator};
pub use root_pointer_page::BTreeRootPointerPage;

use std::fmt;

use crate::btree::buffer_pool::BufferPool;

/// Page index 0 is always the root pointer page of an index file; it
/// doubles as the "no page" sentinel for sibling pointers.
pub const EMPTY_PAGE_INDEX: u32 = 0;

#[derive(PartialEq, Copy, Clone, Eq, Hash, Debug)]
pub enum PageCategory {
    RootPointer,
    Internal,
    Leaf,
}

impl PageCategory {
    pub fn to_u8(&self) -> u8 {
        match self {
            PageCategory::RootPointer => 0,
            PageCategory::Internal => 1,
            PageCategory::Leaf => 2,
        }
    }

    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => PageCategory::RootPointer,
            1 => PageCategory::Internal,
            2 => PageCategory::Leaf,
            _ => panic!("invalid page category: {}", v),
        }
    }
}

// BTreePageID identifies a unique page, and contains the necessary
// metadata to locate it on disk.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct BTreePageID {
    /// category indicates the category of the page
    pub category: PageCategory,

    /// page_index represents the position of the page in the index file,
    /// start from 0
    pub page_index: u32,

    pub table_id: u32,
}

impl fmt::Display for BTreePageID {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}_{}", self.category, self.page_index)
    }
}

impl fmt::Debug for BTreePageID {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl BTreePageID {
    pub fn new(category: PageCategory, table_id: u32, page_index: u32) -> Self {
        Self {
            category,
            page_index,
            table_id,
        }
    }

    pub fn root_pointer(table_id: u32) -> Self {
        Self {
            category: PageCategory::RootPointer,
            page_index: 0,
            table_id,
        }
    }

    pub fn get_table_id(&self) -> u32 {
        self.table_id
    }

    pub fn get_short_repr(&self) -> String {
        format!("{:?}_{}", self.category, self.page_index)
    }
}

pub fn empty_page_data() -> Vec<u8> {
    vec![0; BufferPool::get_page_size()]
}

/// State shared by every page kind: identity, parent link, dirty flag,
/// page LSN and the before image used by the write-ahead log.
pub struct BTreeBasePage {
    pid: BTreePageID,

    parent_page_index: u32,

    dirty: bool,

    /// LSN of the last log record covering this page. The page may only
    /// be written to disk once the log is durable up to this LSN.
    lsn: u64,

    before_image: Vec<u8>,
}

impl BTreeBasePage {
    pub fn new(pid: &BTreePageID) -> Self {
        Self {
            pid: *pid,
            parent_page_index: EMPTY_PAGE_INDEX,
            dirty: false,
            lsn: 0,
            before_image: Vec::new(),
        }
    }

    pub fn get_pid(&self) -> BTreePageID {
        self.pid
    }

    pub fn get_parent_pid(&self) -> BTreePageID {
        let category = if self.parent_page_index == EMPTY_PAGE_INDEX {
            PageCategory::RootPointer
        } else {
            PageCategory::Internal
        };
        BTreePageID::new(category, self.pid.table_id, self.parent_page_index)
    }

    pub fn set_parent_pid(&mut self, pid: &BTreePageID) {
        self.parent_page_index = pid.page_index;
    }

    pub(crate) fn parent_page_index(&self) -> u32 {
        self.parent_page_index
    }

    pub(crate) fn set_parent_page_index(&mut self, index: u32) {
        self.parent_page_index = index;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    pub fn get_lsn(&self) -> u64 {
        self.lsn
    }

    pub fn set_lsn(&mut self, lsn: u64) {
        self.lsn = lsn;
    }

    pub(crate) fn before_image(&self) -> &[u8] {
        &self.before_image
    }

    pub(crate) fn set_before_image_bytes(&mut self, bytes: Vec<u8>) {
        self.before_image = bytes;
    }
}

/// Common surface of the three page kinds, used by the buffer pool and
/// the log manager.
pub trait BTreePage {
    fn new(pid: &BTreePageID, bytes: &[u8]) -> Self
    where
        Self: Sized;

    fn get_pid(&self) -> BTreePageID;

    /// Serialise the page into a page-size byte buffer.
    fn get_page_data(&self) -> Vec<u8>;

    fn get_before_image(&self) -> Vec<u8>;

    /// Snapshot the current content as the new before image. Called after
    /// the page state has been captured by a log record.
    fn set_before_image(&mut self);

    fn get_parent_pid(&self) -> BTreePageID;

    fn set_parent_pid(&mut self, pid: &BTreePageID);

    fn is_dirty(&self) -> bool;

    fn set_dirty(&mut self, dirty: bool);

    fn get_lsn(&self) -> u64;

    fn set_lsn(&mut self, lsn: u64);
}
