//! Append-only blob log.
//!
//! Layout: a fixed-size header followed by length-prefixed entries. Each
//! entry is `kind (1) | key_len (4, BE) | value_len (4, BE) | key | value`;
//! tombstones carry an empty value. Recovery scans the whole log and
//! truncates a torn tail rather than failing the store.

use crate::error::StoreError;
use log::warn;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const LOG_MAGIC: &[u8; 8] = b"BSLTLOG1";
const LOG_VERSION: u32 = 1;

/// Size of the log header: magic (8) + version (4) + flags (4) + reserved (8).
/// A store whose log is exactly this size holds no blobs.
pub const LOG_HEADER_SIZE: u64 = 24;

const ENTRY_HEADER_SIZE: u64 = 1 + 4 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Put,
    Tombstone,
}

impl EntryKind {
    fn as_byte(self) -> u8 {
        match self {
            EntryKind::Put => 1,
            EntryKind::Tombstone => 2,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(EntryKind::Put),
            2 => Some(EntryKind::Tombstone),
            _ => None,
        }
    }
}

/// One entry observed during a recovery scan.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveredEntry {
    pub kind: EntryKind,
    pub key: String,
    /// Byte offset of the entry header in the log.
    pub entry_offset: u64,
    /// Byte offset of the value within the log.
    pub value_offset: u64,
    pub value_len: u32,
    /// Total on-disk size of the entry.
    pub entry_size: u64,
}

/// Location of a live blob value in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobLocation {
    pub entry_offset: u64,
    pub value_offset: u64,
    pub value_len: u32,
    pub entry_size: u64,
}

impl From<&RecoveredEntry> for BlobLocation {
    fn from(entry: &RecoveredEntry) -> Self {
        BlobLocation {
            entry_offset: entry.entry_offset,
            value_offset: entry.value_offset,
            value_len: entry.value_len,
            entry_size: entry.entry_size,
        }
    }
}

/// Open append handle to one blob log file.
#[derive(Debug)]
pub struct BlobLog {
    path: PathBuf,
    file: File,
    end_offset: u64,
}

impl BlobLog {
    /// Create a fresh log with just a header. Fails if the file exists.
    pub fn create(path: &Path) -> Result<Self, StoreError> {
        let mut file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| StoreError::from_io_error(e, "Failed to create blob log"))?;

        let mut header = Vec::with_capacity(LOG_HEADER_SIZE as usize);
        header.extend_from_slice(LOG_MAGIC);
        header.extend_from_slice(&LOG_VERSION.to_be_bytes());
        header.extend_from_slice(&0u32.to_be_bytes());
        header.extend_from_slice(&0u64.to_be_bytes());
        file.write_all(&header)
            .map_err(|e| StoreError::from_io_error(e, "Failed to write blob log header"))?;
        file.sync_all()
            .map_err(|e| StoreError::from_io_error(e, "Failed to sync blob log header"))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            end_offset: LOG_HEADER_SIZE,
        })
    }

    /// Open an existing log, scan every entry, and truncate any torn tail.
    pub fn recover(path: &Path) -> Result<(Self, Vec<RecoveredEntry>), StoreError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| StoreError::from_read_error(e, "Failed to open blob log"))?;

        let mut reader = BufReader::new(&file);
        read_and_check_header(&mut reader, path)?;

        let mut entries = Vec::new();
        let mut offset = LOG_HEADER_SIZE;
        loop {
            match read_entry_at(&mut reader, offset) {
                Ok(Some(entry)) => {
                    offset += entry.entry_size;
                    entries.push(entry);
                }
                Ok(None) => break,
                Err(details) => {
                    warn!(
                        "Truncating torn tail of {} at offset {offset}: {details}",
                        path.display()
                    );
                    break;
                }
            }
        }
        drop(reader);

        file.set_len(offset)
            .map_err(|e| StoreError::from_io_error(e, "Failed to truncate torn blob log tail"))?;

        let mut log = Self {
            path: path.to_path_buf(),
            file,
            end_offset: offset,
        };
        log.seek_to_end()?;
        Ok((log, entries))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes used by the log, header included.
    pub fn size_bytes(&self) -> u64 {
        self.end_offset
    }

    pub fn append_put(&mut self, key: &str, value: &[u8]) -> Result<BlobLocation, StoreError> {
        self.append_entry(EntryKind::Put, key, value)
    }

    pub fn append_tombstone(&mut self, key: &str) -> Result<BlobLocation, StoreError> {
        self.append_entry(EntryKind::Tombstone, key, &[])
    }

    fn append_entry(
        &mut self,
        kind: EntryKind,
        key: &str,
        value: &[u8],
    ) -> Result<BlobLocation, StoreError> {
        let key_bytes = key.as_bytes();
        let entry_offset = self.end_offset;

        let mut buffer =
            Vec::with_capacity(ENTRY_HEADER_SIZE as usize + key_bytes.len() + value.len());
        buffer.push(kind.as_byte());
        buffer.extend_from_slice(&(key_bytes.len() as u32).to_be_bytes());
        buffer.extend_from_slice(&(value.len() as u32).to_be_bytes());
        buffer.extend_from_slice(key_bytes);
        buffer.extend_from_slice(value);

        self.file
            .write_all(&buffer)
            .map_err(|e| StoreError::from_io_error(e, "Failed to append blob log entry"))?;
        self.end_offset += buffer.len() as u64;

        Ok(BlobLocation {
            entry_offset,
            value_offset: entry_offset + ENTRY_HEADER_SIZE + key_bytes.len() as u64,
            value_len: value.len() as u32,
            entry_size: buffer.len() as u64,
        })
    }

    pub fn sync(&self) -> Result<(), StoreError> {
        self.file
            .sync_all()
            .map_err(|e| StoreError::from_io_error(e, "Failed to sync blob log"))
    }

    /// Read a value through a dedicated reader handle so concurrent readers
    /// never disturb the append position.
    pub fn read_value(&self, location: BlobLocation) -> Result<Vec<u8>, StoreError> {
        read_value_from(&self.path, location)
    }

    fn seek_to_end(&mut self) -> Result<(), StoreError> {
        self.file
            .seek(SeekFrom::Start(self.end_offset))
            .map_err(|e| StoreError::from_read_error(e, "Failed to seek to blob log end"))?;
        Ok(())
    }
}

/// Read one value out of a log file by location.
pub fn read_value_from(path: &Path, location: BlobLocation) -> Result<Vec<u8>, StoreError> {
    let mut file = File::open(path)
        .map_err(|e| StoreError::from_read_error(e, "Failed to open blob log for read"))?;
    file.seek(SeekFrom::Start(location.value_offset))
        .map_err(|e| StoreError::from_read_error(e, "Failed to seek to blob value"))?;

    let mut value = vec![0u8; location.value_len as usize];
    file.read_exact(&mut value)
        .map_err(|e| StoreError::from_read_error(e, "Failed to read blob value"))?;
    Ok(value)
}

fn read_and_check_header(reader: &mut impl Read, path: &Path) -> Result<(), StoreError> {
    let mut header = [0u8; LOG_HEADER_SIZE as usize];
    reader
        .read_exact(&mut header)
        .map_err(|e| StoreError::from_read_error(e, "Failed to read blob log header"))?;

    if &header[0..8] != LOG_MAGIC {
        return Err(StoreError::DataCorruption {
            context: path.display().to_string(),
            details: "bad log magic".to_string(),
        });
    }
    let version = u32::from_be_bytes([header[8], header[9], header[10], header[11]]);
    if version != LOG_VERSION {
        return Err(StoreError::DataCorruption {
            context: path.display().to_string(),
            details: format!("unsupported log version {version}"),
        });
    }
    Ok(())
}

/// Read the entry starting at `offset`. `Ok(None)` is a clean end of log;
/// `Err` carries the reason the tail is considered torn.
fn read_entry_at(reader: &mut impl Read, offset: u64) -> Result<Option<RecoveredEntry>, String> {
    let mut entry_header = [0u8; ENTRY_HEADER_SIZE as usize];
    match reader.read_exact(&mut entry_header) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            // Clean end of log, or a partial header; either way the caller
            // truncates at `offset`, discarding any partial bytes.
            return Ok(None);
        }
        Err(e) => return Err(e.to_string()),
    }

    let kind = match EntryKind::from_byte(entry_header[0]) {
        Some(kind) => kind,
        None => return Err(format!("invalid entry kind {}", entry_header[0])),
    };
    let key_len = u32::from_be_bytes([
        entry_header[1],
        entry_header[2],
        entry_header[3],
        entry_header[4],
    ]);
    let value_len = u32::from_be_bytes([
        entry_header[5],
        entry_header[6],
        entry_header[7],
        entry_header[8],
    ]);

    let mut key_bytes = vec![0u8; key_len as usize];
    reader
        .read_exact(&mut key_bytes)
        .map_err(|e| e.to_string())?;
    let key = String::from_utf8(key_bytes).map_err(|e| e.to_string())?;

    let mut value = vec![0u8; value_len as usize];
    reader.read_exact(&mut value).map_err(|e| e.to_string())?;

    let entry_size = ENTRY_HEADER_SIZE + key_len as u64 + value_len as u64;
    Ok(Some(RecoveredEntry {
        kind,
        key,
        entry_offset: offset,
        value_offset: offset + ENTRY_HEADER_SIZE + key_len as u64,
        value_len,
        entry_size,
    }))
}
