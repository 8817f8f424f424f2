use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::Path,
    sync::{Mutex, MutexGuard},
};

use crate::error::IndexError;

/// A file wrapper with positioned binary reads and writes. All access
/// goes through the internal mutex, so a `BinFile` can be shared between
/// threads.
pub struct BinFile {
    file: Mutex<File>,
}

impl BinFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, IndexError> {
        let file = OpenOptions::new()
            .write(true)
            .read(true)
            .create(true)
            .open(path)
            .map_err(|e| IndexError::fatal(&format!("open failed: {}", e)))?;

        Ok(Self {
            file: Mutex::new(file),
        })
    }

    fn lock(&self) -> MutexGuard<'_, File> {
        self.file.lock().unwrap()
    }

    pub fn len(&self) -> Result<u64, IndexError> {
        let file = self.lock();
        let metadata = file
            .metadata()
            .map_err(|e| IndexError::fatal(&format!("metadata failed: {}", e)))?;
        Ok(metadata.len())
    }

    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, IndexError> {
        let mut file = self.lock();
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| IndexError::fatal(&format!("seek failed: {}", e)))?;

        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)
            .map_err(|e| IndexError::fatal(&format!("read failed: {}", e)))?;
        Ok(buf)
    }

    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<(), IndexError> {
        let mut file = self.lock();
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| IndexError::fatal(&format!("seek failed: {}", e)))?;
        file.write_all(data)
            .map_err(|e| IndexError::fatal(&format!("write failed: {}", e)))?;
        Ok(())
    }

    /// Append `data` at the end of the file, returning the offset it was
    /// written at.
    pub fn append(&self, data: &[u8]) -> Result<u64, IndexError> {
        let mut file = self.lock();
        let offset = file
            .seek(SeekFrom::End(0))
            .map_err(|e| IndexError::fatal(&format!("seek failed: {}", e)))?;
        file.write_all(data)
            .map_err(|e| IndexError::fatal(&format!("write failed: {}", e)))?;
        Ok(offset)
    }

    pub fn set_len(&self, len: u64) -> Result<(), IndexError> {
        self.lock()
            .set_len(len)
            .map_err(|e| IndexError::fatal(&format!("set_len failed: {}", e)))
    }

    /// Push buffered bytes down to durable storage.
    pub fn sync(&self) -> Result<(), IndexError> {
        let mut file = self.lock();
        file.flush()
            .and_then(|_| file.sync_data())
            .map_err(|e| IndexError::fatal(&format!("sync failed: {}", e)))
    }
}

/// In-memory big-endian writer for page and log serialisation.
pub struct BinWriter {
    buf: Vec<u8>,
}

impl BinWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Consume the writer, padding the result with zeros up to `size`.
    /// Panics if the content is already larger; page layouts are sized so
    /// this cannot happen.
    pub fn into_page(self, size: usize) -> Vec<u8> {
        let mut buf = self.buf;
        assert!(buf.len() <= size, "page content overflow: {}", buf.len());
        buf.resize(size, 0);
        buf
    }
}

/// Big-endian reader over a byte slice, the counterpart of `BinWriter`.
pub struct BinReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BinReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn read_u8(&mut self) -> u8 {
        let v = self.buf[self.pos];
        self.pos += 1;
        v
    }

    pub fn read_u16(&mut self) -> u16 {
        let mut bytes = [0u8; 2];
        bytes.copy_from_slice(&self.buf[self.pos..self.pos + 2]);
        self.pos += 2;
        u16::from_be_bytes(bytes)
    }

    pub fn read_u32(&mut self) -> u32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        u32::from_be_bytes(bytes)
    }

    pub fn read_u64(&mut self) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.buf[self.pos..self.pos + 8]);
        self.pos += 8;
        u64::from_be_bytes(bytes)
    }

    pub fn read_bytes(&mut self, len: usize) -> Vec<u8> {
        let v = self.buf[self.pos..self.pos + len].to_vec();
        self.pos += len;
        v
    }
}
