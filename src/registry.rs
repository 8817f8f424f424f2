use std::{
    collections::hash_map::DefaultHasher,
    collections::HashMap,
    hash::{Hash, Hasher},
    path::PathBuf,
    sync::{Arc, RwLock},
};

use log::debug;

use crate::{
    btree::BTreeTable,
    error::IndexError,
    io::{BinFile, BinReader, BinWriter},
    storage::key::KeyType,
    types::{IndexResult, Pod},
};

const MANIFEST_FILE: &str = "manifest";

/// A per-thread handle to an open index, as returned by `open_index`.
/// It carries the declared key type and a reference to the shared tree.
#[derive(Clone)]
pub struct IndexHandle {
    name: String,
    key_type: KeyType,
    table: Pod<BTreeTable>,
}

impl IndexHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// The shared tree behind this handle. Exposed for validation and
    /// tooling; record access normally goes through the API functions.
    pub fn table(&self) -> &Pod<BTreeTable> {
        &self.table
    }

    pub(crate) fn table_id(&self) -> u32 {
        table_id_for(&self.name)
    }
}

struct IndexEntry {
    key_type: KeyType,
    table: Option<Pod<BTreeTable>>,
    open_count: usize,
}

/// The process-wide directory of named indices, guarded by the registry
/// lock of the database environment. Entries are persisted to the
/// manifest so the directory survives a restart; the backing tree of an
/// entry is materialised by its first opener (or by the manifest load
/// that precedes recovery).
pub struct IndexRegistry {
    dir: PathBuf,

    entries: HashMap<String, IndexEntry>,

    /// table id -> tree, for page loads and log replay
    by_id: HashMap<u32, Pod<BTreeTable>>,
}

/// Stable id derived from the index name; page ids and log records refer
/// to it across restarts.
pub(crate) fn table_id_for(name: &str) -> u32 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish() as u32
}

impl IndexRegistry {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            entries: HashMap::new(),
            by_id: HashMap::new(),
        }
    }

    /// Register a new index. Fails with `DbExists` when the name is
    /// taken. The tree file is not materialised until the first open.
    pub fn create(&mut self, key_type: KeyType, name: &str) -> IndexResult {
        if self.entries.contains_key(name) {
            return Err(IndexError::DbExists);
        }

        self.entries.insert(
            name.to_string(),
            IndexEntry {
                key_type,
                table: None,
                open_count: 0,
            },
        );
        self.save_manifest()?;

        debug!("index created: {} ({:?})", name, key_type);
        Ok(())
    }

    /// Open an index, materialising the on-disk tree on the first open.
    pub fn open(&mut self, name: &str) -> Result<IndexHandle, IndexError> {
        let dir = self.dir.clone();
        let entry = self
            .entries
            .get_mut(name)
            .ok_or(IndexError::DbDoesNotExist)?;

        if entry.table.is_none() {
            let table = materialise(&dir, name, entry.key_type)?;
            self.by_id.insert(table_id_for(name), table.clone());
            let entry = self.entries.get_mut(name).unwrap();
            entry.table = Some(table);
        }

        let entry = self.entries.get_mut(name).unwrap();
        entry.open_count += 1;

        Ok(IndexHandle {
            name: name.to_string(),
            key_type: entry.key_type,
            table: entry.table.clone().unwrap(),
        })
    }

    /// Mark a handle unused. The physical index stays open for the rest
    /// of the process lifetime; tearing it down and re-opening would
    /// cost more than keeping it.
    pub fn close(&mut self, name: &str) -> IndexResult {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or(IndexError::DbDoesNotExist)?;

        if entry.open_count > 0 {
            entry.open_count -= 1;
        }
        Ok(())
    }

    pub fn get_table_by_id(&self, table_id: u32) -> Option<Pod<BTreeTable>> {
        self.by_id.get(&table_id).cloned()
    }

    /// Load the manifest and materialise every recorded index, so log
    /// replay can resolve table ids before the API serves requests.
    pub fn load_manifest(&mut self) -> IndexResult {
        let path = self.dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(());
        }

        let file = BinFile::open(&path)?;
        let len = file.len()? as usize;
        if len == 0 {
            return Ok(());
        }
        let bytes = file.read_at(0, len)?;
        let mut reader = BinReader::new(&bytes);

        let count = reader.read_u32();
        for _ in 0..count {
            let name_len = reader.read_u16() as usize;
            let name = String::from_utf8(reader.read_bytes(name_len))
                .map_err(|_| IndexError::fatal("corrupt manifest"))?;
            let key_type = KeyType::from_u8(reader.read_u8())?;

            let table = materialise(&self.dir, &name, key_type)?;
            self.by_id.insert(table_id_for(&name), table.clone());
            self.entries.insert(
                name,
                IndexEntry {
                    key_type,
                    table: Some(table),
                    open_count: 0,
                },
            );
        }

        debug!("manifest loaded, {} indices", count);
        Ok(())
    }

    fn save_manifest(&self) -> IndexResult {
        let mut writer = BinWriter::new();
        writer.write_u32(self.entries.len() as u32);
        for (name, entry) in &self.entries {
            writer.write_u16(name.len() as u16);
            writer.write_bytes(name.as_bytes());
            writer.write_u8(entry.key_type.to_u8());
        }

        let path = self.dir.join(MANIFEST_FILE);
        let file = BinFile::open(&path)?;
        let bytes = writer.into_bytes();
        file.set_len(bytes.len() as u64)?;
        file.write_at(0, &bytes)?;
        file.sync()
    }
}

fn materialise(dir: &PathBuf, name: &str, key_type: KeyType) -> Result<Pod<BTreeTable>, IndexError> {
    let path = dir.join(format!("{}.idx", name));
    let table = BTreeTable::open(&path, table_id_for(name), key_type)?;
    Ok(Arc::new(RwLock::new(table)))
}
