use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use log::{debug, info};

use crate::{
    btree::{buffer_pool::BufferPool, page::BTreePageID, page::PageCategory},
    error::IndexError,
    io::{BinFile, BinReader, BinWriter},
    transaction::{Transaction, TransactionID},
    types::IndexResult,
    utils::HandyRwLock,
    Database,
};

/// Offset stored at the head of the log file when no checkpoint has been
/// taken yet.
const NO_CHECKPOINT: u64 = 0;

/// Size of the checkpoint pointer at the head of the log file.
const LOG_HEAD_BYTES: u64 = 8;

/// End offset of the durable log prefix. Kept outside the log manager so
/// the buffer pool can check the write-ahead rule without taking the log
/// latch.
static FLUSHED_LSN: AtomicU64 = AtomicU64::new(0);

pub(crate) fn flushed_lsn() -> u64 {
    FLUSHED_LSN.load(Ordering::Acquire)
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum RecordType {
    /// transaction begin
    Start,
    /// a page image pair written by an insert
    Insert,
    /// a page image pair written by a delete
    Delete,
    Commit,
    Abort,
    /// active-transaction table, flushed pool
    Checkpoint,
    /// a page image restored during rollback
    Compensation,
}

impl RecordType {
    fn to_u8(&self) -> u8 {
        match self {
            RecordType::Start => 0,
            RecordType::Insert => 1,
            RecordType::Delete => 2,
            RecordType::Commit => 3,
            RecordType::Abort => 4,
            RecordType::Checkpoint => 5,
            RecordType::Compensation => 6,
        }
    }

    fn from_u8(value: u8) -> Result<Self, IndexError> {
        match value {
            0 => Ok(RecordType::Start),
            1 => Ok(RecordType::Insert),
            2 => Ok(RecordType::Delete),
            3 => Ok(RecordType::Commit),
            4 => Ok(RecordType::Abort),
            5 => Ok(RecordType::Checkpoint),
            6 => Ok(RecordType::Compensation),
            _ => Err(IndexError::fatal(&format!(
                "invalid log record type: {}",
                value
            ))),
        }
    }
}

/// A parsed log record. Which fields are populated depends on the record
/// type; `before` doubles as the restored image of a compensation
/// record.
struct LogRecord {
    lsn: u64,
    rt: RecordType,
    tid: TransactionID,

    pid: Option<BTreePageID>,
    before: Option<Vec<u8>>,
    after: Option<Vec<u8>>,

    active_table: Vec<(TransactionID, u64)>,
}

/// The write-ahead log. Every page image enters the log before the page
/// itself may reach disk; COMMIT records are forced before commit
/// returns. The first 8 bytes of the file point at the most recent
/// checkpoint record.
pub struct LogManager {
    file: BinFile,
    file_path: PathBuf,

    /// The absolute position the next record will be appended at.
    current_offset: u64,

    /// Record the start position of each active transaction, so
    /// rollback and checkpointing know where each one begins.
    tx_start_position: HashMap<TransactionID, u64>,

    total_records: usize,
}

impl LogManager {
    pub fn new<P: AsRef<Path>>(file_path: P) -> Result<Self, IndexError> {
        let file = BinFile::open(&file_path)?;

        let mut len = file.len()?;
        if len < LOG_HEAD_BYTES {
            file.write_at(0, &NO_CHECKPOINT.to_be_bytes())?;
            file.sync()?;
            len = LOG_HEAD_BYTES;
        }

        // everything already on disk is durable
        FLUSHED_LSN.store(len, Ordering::Release);

        Ok(Self {
            file,
            file_path: file_path.as_ref().to_path_buf(),
            current_offset: len,
            tx_start_position: HashMap::new(),
            total_records: 0,
        })
    }

    /// Drop all log content. Used by tests to get a pristine
    /// environment; never called on a recovery path.
    pub fn reset(&mut self) -> IndexResult {
        self.file.set_len(0)?;
        self.file.write_at(0, &NO_CHECKPOINT.to_be_bytes())?;
        self.file.sync()?;
        self.current_offset = LOG_HEAD_BYTES;
        self.tx_start_position.clear();
        self.total_records = 0;
        FLUSHED_LSN.store(LOG_HEAD_BYTES, Ordering::Release);
        Ok(())
    }

    pub fn records_count(&self) -> usize {
        self.total_records
    }

    fn append(&mut self, bytes: &[u8]) -> Result<u64, IndexError> {
        let lsn = self.file.append(bytes)?;
        self.current_offset = lsn + bytes.len() as u64;
        self.total_records += 1;
        Ok(lsn)
    }

    /// Force the log down to durable storage.
    pub fn force(&mut self) -> IndexResult {
        self.file.sync()?;
        FLUSHED_LSN.store(self.current_offset, Ordering::Release);
        Ok(())
    }

    /// Make the log durable at least past the record starting at `lsn`.
    pub fn flush_up_to(&mut self, lsn: u64) -> IndexResult {
        if flushed_lsn() <= lsn {
            self.force()?;
        }
        Ok(())
    }

    pub fn log_start(&mut self, tx: &Transaction) -> IndexResult {
        let mut writer = BinWriter::new();
        writer.write_u8(RecordType::Start.to_u8());
        writer.write_u64(tx.get_id());

        let lsn = self.append(&writer.into_bytes())?;
        self.tx_start_position.insert(tx.get_id(), lsn);
        Ok(())
    }

    /// Write a page-image record for the given operation. Returns the
    /// LSN, which the caller stamps onto the page.
    pub fn log_update(
        &mut self,
        rt: RecordType,
        tx: &Transaction,
        pid: &BTreePageID,
        before: &[u8],
        after: &[u8],
    ) -> Result<u64, IndexError> {
        debug_assert!(rt == RecordType::Insert || rt == RecordType::Delete);

        let mut writer = BinWriter::new();
        writer.write_u8(rt.to_u8());
        writer.write_u64(tx.get_id());
        write_pid(&mut writer, pid);
        writer.write_u32(before.len() as u32);
        writer.write_bytes(before);
        writer.write_bytes(after);

        self.append(&writer.into_bytes())
    }

    fn log_compensation(
        &mut self,
        tid: TransactionID,
        pid: &BTreePageID,
        image: &[u8],
    ) -> Result<u64, IndexError> {
        let mut writer = BinWriter::new();
        writer.write_u8(RecordType::Compensation.to_u8());
        writer.write_u64(tid);
        write_pid(&mut writer, pid);
        writer.write_u32(image.len() as u32);
        writer.write_bytes(image);

        self.append(&writer.into_bytes())
    }

    pub fn log_commit(&mut self, tx: &Transaction) -> IndexResult {
        let mut writer = BinWriter::new();
        writer.write_u8(RecordType::Commit.to_u8());
        writer.write_u64(tx.get_id());

        self.append(&writer.into_bytes())?;
        self.force()?;
        self.tx_start_position.remove(&tx.get_id());
        Ok(())
    }

    /// Roll the transaction back through the log, then write the ABORT
    /// record and force.
    pub fn log_abort(&mut self, tx: &Transaction, buffer_pool: &BufferPool) -> IndexResult {
        if let Some(start) = self.tx_start_position.get(&tx.get_id()).copied() {
            self.undo_transaction(tx.get_id(), start, buffer_pool)?;
        }

        let mut writer = BinWriter::new();
        writer.write_u8(RecordType::Abort.to_u8());
        writer.write_u64(tx.get_id());
        self.append(&writer.into_bytes())?;
        self.force()?;

        self.tx_start_position.remove(&tx.get_id());
        Ok(())
    }

    /// Undo every not-yet-compensated page update of one transaction, in
    /// reverse order: write the compensation records, force the log,
    /// then restore the before images in cache and on disk.
    fn undo_transaction(
        &mut self,
        tid: TransactionID,
        start: u64,
        buffer_pool: &BufferPool,
    ) -> IndexResult {
        let mut updates: Vec<(BTreePageID, Vec<u8>)> = Vec::new();
        let mut compensated = 0;

        let mut pos = start;
        let end = self.current_offset;
        while pos < end {
            let (record, next) = self.read_record_at(pos)?;
            if record.tid == tid {
                match record.rt {
                    RecordType::Insert | RecordType::Delete => {
                        updates.push((record.pid.unwrap(), record.before.unwrap()));
                    }
                    RecordType::Compensation => {
                        compensated += 1;
                    }
                    _ => {}
                }
            }
            pos = next;
        }

        // the last `compensated` updates were already undone (a crash in
        // the middle of a previous rollback)
        let undo_until = updates.len().saturating_sub(compensated);

        let mut restores: Vec<(BTreePageID, Vec<u8>, u64)> = Vec::new();
        for (pid, before) in updates[..undo_until].iter().rev() {
            let lsn = self.log_compensation(tid, pid, before)?;
            restores.push((*pid, before.clone(), lsn));
        }
        self.force()?;

        for (pid, before, lsn) in restores {
            buffer_pool.recover_page(&pid, &before, lsn);
            self.write_page_direct(&pid, &before)?;
        }

        Ok(())
    }

    /// Write a page image straight to the index file, bypassing the
    /// buffer pool bookkeeping. Only used once the covering log records
    /// are durable.
    fn write_page_direct(&self, pid: &BTreePageID, data: &[u8]) -> IndexResult {
        let registry = Database::registry();
        let table_pod = registry
            .get_table_by_id(pid.get_table_id())
            .ok_or_else(|| IndexError::fatal(&format!("table {} not found", pid.get_table_id())))?;
        let table = table_pod.rl();
        table.write_page_to_disk(pid, data)
    }

    /// Flush every page, append a checkpoint record carrying the
    /// active-transaction table, and point the file head at it.
    pub fn log_checkpoint(&mut self, buffer_pool: &BufferPool) -> IndexResult {
        buffer_pool.flush_all_pages(self)?;

        let checkpoint_start = self.current_offset;

        let mut writer = BinWriter::new();
        writer.write_u8(RecordType::Checkpoint.to_u8());
        // no tid, but leave space for uniformity
        writer.write_u64(0);
        writer.write_u32(self.tx_start_position.len() as u32);
        for (tid, start) in &self.tx_start_position {
            writer.write_u64(*tid);
            writer.write_u64(*start);
        }
        self.append(&writer.into_bytes())?;

        // once the checkpoint is written, update its location at the
        // beginning of the log file
        self.file.write_at(0, &checkpoint_start.to_be_bytes())?;
        self.force()?;

        debug!("checkpoint taken at {}", checkpoint_start);
        Ok(())
    }

    /// Recovery at startup: analysis from the last checkpoint, redo of
    /// committed transactions, undo of losers.
    pub fn recover(&mut self, buffer_pool: &BufferPool) -> IndexResult {
        let file_len = self.file.len()?;
        if file_len <= LOG_HEAD_BYTES {
            return Ok(());
        }

        let head_bytes = self.file.read_at(0, 8)?;
        let mut head = [0u8; 8];
        head.copy_from_slice(&head_bytes);
        let checkpoint_pos = u64::from_be_bytes(head);

        // step 1: analysis. Start from the checkpoint's view of the
        // active transactions and scan forward.
        let mut active: HashMap<TransactionID, u64> = HashMap::new();
        let scan_from;
        if checkpoint_pos == NO_CHECKPOINT {
            scan_from = LOG_HEAD_BYTES;
        } else {
            let (checkpoint, next) = self.read_record_at(checkpoint_pos)?;
            if checkpoint.rt != RecordType::Checkpoint {
                return Err(IndexError::fatal("corrupt log: bad checkpoint pointer"));
            }
            for (tid, start) in checkpoint.active_table {
                active.insert(tid, start);
            }
            scan_from = next;
        }

        let mut committed: HashSet<TransactionID> = HashSet::new();
        let mut pos = scan_from;
        while pos < file_len {
            let (record, next) = self.read_record_at(pos)?;
            match record.rt {
                RecordType::Start => {
                    active.insert(record.tid, record.lsn);
                }
                RecordType::Commit => {
                    committed.insert(record.tid);
                    active.remove(&record.tid);
                }
                RecordType::Abort => {
                    active.remove(&record.tid);
                }
                _ => {}
            }
            pos = next;
        }
        self.current_offset = pos;

        // step 2: redo. Rewrite the after images of committed
        // transactions, and the images of every compensation record (a
        // rollback whose page writes were lost must still win). Pages
        // flushed by the checkpoint are already current, records before
        // it are covered.
        let mut redone = 0;
        let mut pos = scan_from;
        while pos < file_len {
            let (record, next) = self.read_record_at(pos)?;
            match record.rt {
                RecordType::Insert | RecordType::Delete => {
                    if committed.contains(&record.tid) {
                        let pid = record.pid.unwrap();
                        let after = record.after.unwrap();
                        buffer_pool.recover_page(&pid, &after, record.lsn);
                        self.write_page_direct(&pid, &after)?;
                        redone += 1;
                    }
                }
                RecordType::Compensation => {
                    let pid = record.pid.unwrap();
                    let image = record.before.unwrap();
                    buffer_pool.recover_page(&pid, &image, record.lsn);
                    self.write_page_direct(&pid, &image)?;
                    redone += 1;
                }
                _ => {}
            }
            pos = next;
        }

        // step 3: undo the losers, oldest first, writing compensation
        // records and an ABORT for each.
        let mut losers: Vec<(TransactionID, u64)> = active.into_iter().collect();
        losers.sort();
        for (tid, start) in &losers {
            self.undo_transaction(*tid, *start, buffer_pool)?;

            let mut writer = BinWriter::new();
            writer.write_u8(RecordType::Abort.to_u8());
            writer.write_u64(*tid);
            self.append(&writer.into_bytes())?;
        }
        self.force()?;

        // step 4: recovery ends with a clean slate and a fresh
        // checkpoint
        self.tx_start_position.clear();
        buffer_pool.flush_all_pages(self)?;
        self.log_checkpoint(buffer_pool)?;

        info!(
            "recovery finished, committed: {}, redone pages: {}, losers: {:?}",
            committed.len(),
            redone,
            losers.iter().map(|(tid, _)| *tid).collect::<Vec<_>>(),
        );
        Ok(())
    }

    fn read_record_at(&self, pos: u64) -> Result<(LogRecord, u64), IndexError> {
        let header = self.file.read_at(pos, 9)?;
        let rt = RecordType::from_u8(header[0])?;
        let mut tid_bytes = [0u8; 8];
        tid_bytes.copy_from_slice(&header[1..9]);
        let tid = u64::from_be_bytes(tid_bytes);

        let mut record = LogRecord {
            lsn: pos,
            rt,
            tid,
            pid: None,
            before: None,
            after: None,
            active_table: Vec::new(),
        };

        let next;
        match rt {
            RecordType::Start | RecordType::Commit | RecordType::Abort => {
                next = pos + 9;
            }
            RecordType::Insert | RecordType::Delete => {
                let body = self.file.read_at(pos + 9, 13)?;
                let mut reader = BinReader::new(&body);
                let (pid, image_len) = read_pid_and_len(&mut reader);
                let images = self.file.read_at(pos + 9 + 13, image_len * 2)?;
                record.pid = Some(pid);
                record.before = Some(images[..image_len].to_vec());
                record.after = Some(images[image_len..].to_vec());
                next = pos + 9 + 13 + (image_len as u64) * 2;
            }
            RecordType::Compensation => {
                let body = self.file.read_at(pos + 9, 13)?;
                let mut reader = BinReader::new(&body);
                let (pid, image_len) = read_pid_and_len(&mut reader);
                let image = self.file.read_at(pos + 9 + 13, image_len)?;
                record.pid = Some(pid);
                record.before = Some(image);
                next = pos + 9 + 13 + image_len as u64;
            }
            RecordType::Checkpoint => {
                let count_bytes = self.file.read_at(pos + 9, 4)?;
                let mut reader = BinReader::new(&count_bytes);
                let count = reader.read_u32() as usize;
                let table = self.file.read_at(pos + 9 + 4, count * 16)?;
                let mut reader = BinReader::new(&table);
                for _ in 0..count {
                    let tid = reader.read_u64();
                    let start = reader.read_u64();
                    record.active_table.push((tid, start));
                }
                next = pos + 9 + 4 + (count as u64) * 16;
            }
        }

        Ok((record, next))
    }

    /// Dump the log to the debug log, one line per record.
    pub fn show_log_contents(&self) {
        let mut depiction = String::new();

        let head = self
            .file
            .read_at(0, 8)
            .map(|b| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&b);
                u64::from_be_bytes(raw)
            })
            .unwrap_or(NO_CHECKPOINT);
        if head == NO_CHECKPOINT {
            depiction.push_str("├── [8 bytes] no checkpoint\n");
        } else {
            depiction.push_str(&format!("├── [8 bytes] last checkpoint: {}\n", head));
        }

        let mut pos = LOG_HEAD_BYTES;
        while pos < self.current_offset {
            let (record, next) = match self.read_record_at(pos) {
                Ok(v) => v,
                Err(_) => break,
            };
            match record.pid {
                Some(pid) => {
                    depiction.push_str(&format!(
                        "├── {:?}-[pos {}]-[tx_{}]-[{}]\n",
                        record.rt, record.lsn, record.tid, pid,
                    ));
                }
                None => {
                    depiction.push_str(&format!(
                        "├── {:?}-[pos {}]-[tx_{}]\n",
                        record.rt, record.lsn, record.tid,
                    ));
                }
            }
            pos = next;
        }

        debug!("log content ({}):\n{}", self.file_path.display(), depiction);
    }
}

fn write_pid(writer: &mut BinWriter, pid: &BTreePageID) {
    writer.write_u32(pid.table_id);
    writer.write_u8(pid.category.to_u8());
    writer.write_u32(pid.page_index);
}

fn read_pid_and_len(reader: &mut BinReader) -> (BTreePageID, usize) {
    let table_id = reader.read_u32();
    let category = PageCategory::from_u8(reader.read_u8());
    let page_index = reader.read_u32();
    let image_len = reader.read_u32() as usize;
    (BTreePageID::new(category, table_id, page_index), image_len)
}
