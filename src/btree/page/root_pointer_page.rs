use crate::{
    btree::buffer_pool::BufferPool,
    io::{BinReader, BinWriter},
};

use super::{BTreeBasePage, BTreePage, BTreePageID, PageCategory};

/// Page 0 of every index file. Records where the root of the tree lives
/// and the highest page index handed out so far, so allocation survives
/// a restart.
pub struct BTreeRootPointerPage {
    page: BTreeBasePage,

    root_category: PageCategory,
    root_page_index: u32,

    /// the page index of the last page in the file, increases
    /// monotonically by 1
    last_page_index: u32,
}

impl std::ops::Deref for BTreeRootPointerPage {
    type Target = BTreeBasePage;
    fn deref(&self) -> &Self::Target {
        &self.page
    }
}

impl std::ops::DerefMut for BTreeRootPointerPage {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.page
    }
}

impl BTreeRootPointerPage {
    pub fn get_root_pid(&self) -> BTreePageID {
        BTreePageID::new(
            self.root_category,
            self.get_pid().table_id,
            self.root_page_index,
        )
    }

    pub fn set_root_pid(&mut self, pid: &BTreePageID) {
        self.root_category = pid.category;
        self.root_page_index = pid.page_index;
    }

    pub fn last_page_index(&self) -> u32 {
        self.last_page_index
    }

    /// Hand out the next page index.
    pub fn allocate_page_index(&mut self) -> u32 {
        self.last_page_index += 1;
        self.last_page_index
    }

    /// Content of a fresh root pointer page: the root is leaf page 1,
    /// which is also the last allocated page.
    pub fn init_page_data() -> Vec<u8> {
        let mut writer = BinWriter::new();
        writer.write_u8(PageCategory::Leaf.to_u8());
        writer.write_u32(1);
        writer.write_u32(1);
        writer.into_page(BufferPool::get_page_size())
    }
}

impl BTreePage for BTreeRootPointerPage {
    fn new(pid: &BTreePageID, bytes: &[u8]) -> Self {
        let mut reader = BinReader::new(bytes);
        let root_category = PageCategory::from_u8(reader.read_u8());
        let root_page_index = reader.read_u32();
        let last_page_index = reader.read_u32();

        let mut instance = Self {
            page: BTreeBasePage::new(pid),
            root_category,
            root_page_index,
            last_page_index,
        };
        instance.set_before_image();
        instance
    }

    fn get_pid(&self) -> BTreePageID {
        self.page.get_pid()
    }

    fn get_page_data(&self) -> Vec<u8> {
        let mut writer = BinWriter::new();
        writer.write_u8(self.root_category.to_u8());
        writer.write_u32(self.root_page_index);
        writer.write_u32(self.last_page_index);
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
