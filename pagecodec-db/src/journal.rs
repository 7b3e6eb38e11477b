//! Rollback journal kept next to the database file as `<path>-journal`.
//!
//! Layout: a 16-byte header (8-byte magic, little-endian `u32` page size,
//! little-endian `u32` page count before the transaction), then one record
//! per journaled page: little-endian `u32` page number followed by the page
//! bytes exactly as the codec produced them for [`IoMode::WriteJournal`].
//!
//! [`IoMode::WriteJournal`]: pagecodec::IoMode::WriteJournal

use std::fs::{self, File};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use pagecodec::PageNumber;

use crate::error::{DbError, DbResult};

const JOURNAL_MAGIC: [u8; 8] = *b"pcjrnl01";
const JOURNAL_HEADER_SIZE: usize = 16;
const RECORD_PREFIX_SIZE: usize = 4;

/// Path of the journal belonging to the database at `db_path`.
pub(crate) fn journal_path(db_path: &Path) -> PathBuf {
    let mut name = db_path.as_os_str().to_owned();
    name.push("-journal");
    PathBuf::from(name)
}

/// A journal file open for appending during one write transaction.
#[derive(Debug)]
pub(crate) struct Journal {
    path: PathBuf,
    file: File,
    page_size: usize,
}

/// Everything a complete journal describes.
#[derive(Debug)]
pub(crate) struct JournalContents {
    pub(crate) original_page_count: PageNumber,
    pub(crate) records: Vec<(PageNumber, Vec<u8>)>,
}

impl Journal {
    /// Creates (or truncates) the journal and writes its header.
    pub(crate) fn create(
        path: PathBuf,
        page_size: usize,
        original_page_count: PageNumber,
    ) -> DbResult<Self> {
        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let mut header = [0u8; JOURNAL_HEADER_SIZE];
        header[..8].copy_from_slice(&JOURNAL_MAGIC);
        header[8..12].copy_from_slice(&page_size_field(page_size)?.to_le_bytes());
        header[12..16].copy_from_slice(&original_page_count.to_le_bytes());
        file.write_all(&header)?;
        Ok(Self {
            path,
            file,
            page_size,
        })
    }

    /// Appends the pre-transaction image of `page`.
    pub(crate) fn append(&mut self, page: PageNumber, stored: &[u8]) -> DbResult<()> {
        if stored.len() != self.page_size {
            return Err(DbError::PageSize {
                expected: self.page_size,
                actual: stored.len(),
            });
        }
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&page.to_le_bytes())?;
        self.file.write_all(stored)?;
        Ok(())
    }

    pub(crate) fn sync(&mut self) -> DbResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Reads back every complete record.
    pub(crate) fn contents(&mut self) -> DbResult<JournalContents> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::new();
        self.file.read_to_end(&mut bytes)?;
        parse(&bytes, self.page_size)?.ok_or_else(|| {
            DbError::CorruptJournal(format!("{} has no header", self.path.display()))
        })
    }

    /// Deletes the journal; this is the commit (or rollback) point.
    pub(crate) fn remove(self) -> DbResult<()> {
        drop(self.file);
        fs::remove_file(&self.path)?;
        Ok(())
    }
}

/// Reads a journal left behind by an interrupted transaction.
///
/// `Ok(None)` when there is no journal, or when it is too short to have a
/// header: the database file is only written after the header and records
/// are on disk, so such a journal protects nothing.
pub(crate) fn read_hot_journal(path: &Path, page_size: usize) -> DbResult<Option<JournalContents>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    parse(&bytes, page_size)
}

fn parse(bytes: &[u8], page_size: usize) -> DbResult<Option<JournalContents>> {
    let Some((header, mut rest)) = bytes.split_first_chunk::<JOURNAL_HEADER_SIZE>() else {
        return Ok(None);
    };
    if header[..8] != JOURNAL_MAGIC {
        return Err(DbError::CorruptJournal("bad magic".to_string()));
    }
    let journal_page_size = le_u32(&header[8..12]);
    if u32::try_from(page_size).ok() != Some(journal_page_size) {
        return Err(DbError::CorruptJournal(format!(
            "journal page size {journal_page_size} does not match {page_size}"
        )));
    }
    let original_page_count = le_u32(&header[12..16]);

    let mut records = Vec::new();
    // A torn trailing record is ignored.
    while rest.len() >= RECORD_PREFIX_SIZE + page_size {
        let (prefix, tail) = rest.split_at(RECORD_PREFIX_SIZE);
        let (page_bytes, tail) = tail.split_at(page_size);
        let page = le_u32(prefix);
        // Only pages that existed before the transaction are journaled.
        if page == 0 || page > original_page_count {
            return Err(DbError::CorruptJournal(format!(
                "record for page {page} outside 1..={original_page_count}"
            )));
        }
        records.push((page, page_bytes.to_vec()));
        rest = tail;
    }
    Ok(Some(JournalContents {
        original_page_count,
        records,
    }))
}

fn le_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

fn page_size_field(page_size: usize) -> DbResult<u32> {
    u32::try_from(page_size).map_err(|_| DbError::CorruptJournal(format!("page size {page_size}")))
}
