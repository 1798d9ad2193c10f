//! Append-only record logs and the stores built on them.
//!
//! Each record is a `u32` little-endian length followed by a `bincode`
//! body. Appends are synced before they return; on open the whole log is
//! replayed into memory.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use mathsearch_index::{
    CrawlData, CrawlStore, DocumentId, FormulaId, FormulaPath, FormulaStore, MemoryFormulaStore,
    Occurrence, OccurrenceId, StoreError,
};

// ============================================================================
// Record log
// ============================================================================

pub struct RecordLog {
    file: Mutex<File>,
    path: PathBuf,
}

impl RecordLog {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record; returns the number of bytes written.
    pub fn append<T: Serialize>(&self, record: &T) -> Result<u64, StoreError> {
        let data = bincode::serialize(record).map_err(|e| StoreError::Codec(e.to_string()))?;
        let len = u32::try_from(data.len())
            .map_err(|_| StoreError::Codec(format!("record of {} bytes", data.len())))?;

        let mut file = self.file.lock();
        file.write_all(&len.to_le_bytes())?;
        file.write_all(&data)?;
        file.sync_data()?;
        Ok(u64::from(len) + 4)
    }

    /// Feed every record to `handler`, in append order. Returns the number
    /// of records read.
    pub fn replay<T, F>(&self, mut handler: F) -> Result<u64, StoreError>
    where
        T: DeserializeOwned,
        F: FnMut(T) -> Result<(), StoreError>,
    {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        let mut offset: u64 = 0;
        let mut count = 0;

        loop {
            let mut len_bytes = [0u8; 4];
            let read = read_up_to(&mut file, &mut len_bytes)?;
            if read == 0 {
                break;
            }
            if read < len_bytes.len() {
                return Err(truncated(&self.path, offset));
            }
            let len = u32::from_le_bytes(len_bytes) as usize;

            let mut data = vec![0u8; len];
            match file.read_exact(&mut data) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    return Err(truncated(&self.path, offset))
                }
                Err(e) => return Err(e.into()),
            }
            let record: T = bincode::deserialize(&data).map_err(|e| {
                StoreError::Codec(format!("{} at offset {offset}: {e}", self.path.display()))
            })?;
            handler(record)?;

            offset += 4 + len as u64;
            count += 1;
        }

        debug!(path = %self.path.display(), records = count, "replayed log");
        Ok(count)
    }
}

fn read_up_to(file: &mut File, buf: &mut [u8]) -> Result<usize, StoreError> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

fn truncated(path: &Path, offset: u64) -> StoreError {
    StoreError::Codec(format!(
        "{} has a truncated record at offset {offset}",
        path.display()
    ))
}

// ============================================================================
// Formula store
// ============================================================================

/// Formula occurrences persisted in `formula.log`.
pub struct LogFormulaStore {
    log: RecordLog,
    memory: MemoryFormulaStore,
}

impl LogFormulaStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let log = RecordLog::open(path)?;
        let memory = MemoryFormulaStore::new();
        log.replay(|occurrence: Occurrence| {
            memory.restore(occurrence);
            Ok(())
        })?;
        Ok(Self { log, memory })
    }

    pub fn path(&self) -> &Path {
        self.log.path()
    }

    pub fn max_formula(&self) -> Option<FormulaId> {
        self.memory.max_formula()
    }
}

impl FormulaStore for LogFormulaStore {
    fn put_occurrence(
        &self,
        formula: FormulaId,
        document: Option<DocumentId>,
        path: FormulaPath,
    ) -> Result<OccurrenceId, StoreError> {
        let occurrence = self.memory.next_occurrence(formula, document, path);
        self.log.append(&occurrence)?;
        let id = occurrence.id;
        self.memory.restore(occurrence);
        Ok(id)
    }

    fn occurrences_for(&self, formula: FormulaId) -> Result<Vec<Occurrence>, StoreError> {
        self.memory.occurrences_for(formula)
    }

    fn occurrence_count(&self) -> u64 {
        self.memory.occurrence_count()
    }
}

// ============================================================================
// Crawl store
// ============================================================================

/// Crawled documents persisted in `crawl.log`; a document's id is its
/// position in the log.
pub struct LogCrawlStore {
    log: RecordLog,
    documents: RwLock<Vec<CrawlData>>,
}

impl LogCrawlStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let log = RecordLog::open(path)?;
        let mut documents = Vec::new();
        log.replay(|data: CrawlData| {
            documents.push(data);
            Ok(())
        })?;
        Ok(Self {
            log,
            documents: RwLock::new(documents),
        })
    }

    pub fn path(&self) -> &Path {
        self.log.path()
    }
}

impl CrawlStore for LogCrawlStore {
    fn put_document(&self, data: &CrawlData) -> Result<DocumentId, StoreError> {
        let mut documents = self.documents.write();
        self.log.append(data)?;
        let id = DocumentId::new(documents.len() as u64);
        documents.push(data.clone());
        Ok(id)
    }

    fn get_document(&self, id: DocumentId) -> Result<CrawlData, StoreError> {
        self.documents
            .read()
            .get(id.raw() as usize)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("document {}", id.raw())))
    }

    fn document_count(&self) -> u64 {
        self.documents.read().len() as u64
    }
}
