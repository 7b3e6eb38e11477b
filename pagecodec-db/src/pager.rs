//! Single-file pager with a rollback journal.
//!
//! Every page crossing the disk boundary goes through the file's
//! [`PagerHookAdapter`]: loads are decoded before they reach the cache, and
//! writes to the database or journal file are encoded from a copy, so the
//! cache only ever holds plaintext.
//!
//! Page 1 starts with a small header (magic and page size). The header is
//! checked on the first access after open or after a key change, and a
//! mismatch is reported as [`DbError::NotADatabase`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use pagecodec::{
    Codec, CodecError, ConnectionId, IoMode, PageCodecHooks, PageNumber, PagerHookAdapter,
    RekeyHost, MAX_PAGE_SIZE, MIN_PAGE_SIZE,
};

use crate::error::{DbError, DbResult};
use crate::journal::{journal_path, read_hot_journal, Journal};
use crate::options::OpenOptions;

/// Magic at the start of page 1.
pub const HEADER_MAGIC: [u8; 16] = *b"pagecodec fmt 1\0";

/// Bytes at the start of page 1 owned by the pager. Writes to page 1 have
/// this prefix overwritten with the header.
pub const HEADER_SIZE: usize = 24;

/// File offset of the first byte of the lock range. The page containing it
/// never holds data.
const PENDING_BYTE_OFFSET: u64 = 0x4000_0000;

/// Page that contains the lock byte range for `page_size`.
#[must_use]
pub fn locking_page(page_size: usize) -> PageNumber {
    let page = PENDING_BYTE_OFFSET / page_size as u64 + 1;
    PageNumber::try_from(page).unwrap_or(PageNumber::MAX)
}

/// Open write transaction state.
#[derive(Debug)]
struct PagerTxn {
    journal: Journal,
    journaled: HashSet<PageNumber>,
    dirty: BTreeMap<PageNumber, Vec<u8>>,
    original_page_count: PageNumber,
}

#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct Faults {
    pub(crate) fail_load_at: Option<PageNumber>,
    pub(crate) fail_commit_write_at: Option<PageNumber>,
}

/// One database file, its page cache and its codec hooks.
pub struct Pager {
    path: PathBuf,
    file: File,
    page_size: usize,
    sync: bool,
    page_count: PageNumber,
    hooks: PagerHookAdapter,
    cache: HashMap<PageNumber, Vec<u8>>,
    txn: Option<PagerTxn>,
    header_checked: bool,
    owner: ConnectionId,
    #[cfg(test)]
    pub(crate) faults: Faults,
}

impl Pager {
    /// Opens (or creates) the file at `path`.
    ///
    /// A journal left by an interrupted transaction is played back first.
    /// Playback writes the journaled bytes back verbatim, so it needs no key.
    ///
    /// # Errors
    ///
    /// I/O errors, an invalid page size, a corrupt journal, or
    /// [`DbError::NotADatabase`] when the file length is not a whole number
    /// of pages.
    pub fn open(path: &Path, owner: ConnectionId, options: &OpenOptions) -> DbResult<Self> {
        let page_size = options.page_size;
        if !page_size.is_power_of_two() || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(CodecError::InvalidPageSize(page_size).into());
        }
        let mut hooks = PagerHookAdapter::passthrough();
        hooks.page_size_changed(page_size)?;

        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(options.create)
            .truncate(false)
            .open(path)?;

        let journal = journal_path(path);
        if let Some(contents) = read_hot_journal(&journal, page_size)? {
            info!(
                "rolling back hot journal for {} ({} pages)",
                path.display(),
                contents.records.len()
            );
            for (page, stored) in &contents.records {
                write_raw(&mut file, page_size, *page, stored)?;
            }
            file.set_len(u64::from(contents.original_page_count) * page_size as u64)?;
            file.sync_all()?;
        }
        if journal.exists() {
            fs::remove_file(&journal)?;
        }

        let len = file.metadata()?.len();
        if len % page_size as u64 != 0 {
            warn!("{}: length {len} is not a multiple of {page_size}", path.display());
            return Err(DbError::NotADatabase);
        }
        let page_count =
            PageNumber::try_from(len / page_size as u64).map_err(|_| DbError::NotADatabase)?;
        debug!("opened {} with {page_count} pages", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            file,
            page_size,
            sync: options.sync,
            page_count,
            hooks,
            cache: HashMap::new(),
            txn: None,
            header_checked: false,
            owner,
            #[cfg(test)]
            faults: Faults::default(),
        })
    }

    /// Path of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Page size in bytes.
    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    /// Committed page count.
    #[must_use]
    pub const fn page_count(&self) -> PageNumber {
        self.page_count
    }

    /// Whether a write transaction is open.
    #[must_use]
    pub const fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    /// The codec hooks of this file.
    #[must_use]
    pub const fn hooks(&self) -> &PagerHookAdapter {
        &self.hooks
    }

    /// Installs `codec` for this file. Cached pages are dropped and the
    /// header is checked again on next access.
    ///
    /// # Errors
    ///
    /// [`DbError::Busy`] inside a transaction, or the codec's page size error.
    pub fn install_codec(&mut self, codec: Codec) -> DbResult<()> {
        if self.txn.is_some() {
            return Err(DbError::Busy);
        }
        self.hooks.install(codec)?;
        self.forget_cache();
        Ok(())
    }

    /// Removes the codec; the file is read and written as plaintext after.
    ///
    /// # Errors
    ///
    /// [`DbError::Busy`] inside a transaction.
    pub fn detach_codec(&mut self) -> DbResult<Option<Codec>> {
        if self.txn.is_some() {
            return Err(DbError::Busy);
        }
        let codec = self.hooks.detach();
        self.forget_cache();
        Ok(codec)
    }

    fn forget_cache(&mut self) {
        self.cache.clear();
        self.header_checked = false;
    }

    /// Checks the page 1 header. An empty file has nothing to check.
    ///
    /// # Errors
    ///
    /// [`DbError::NotADatabase`] if the decoded header does not match.
    pub fn verify(&mut self) -> DbResult<()> {
        if self.header_checked || self.page_count == 0 {
            return Ok(());
        }
        let page = self.load(1, IoMode::Load)?;
        if !header_matches(&page, self.page_size) {
            warn!("{}: page 1 header mismatch", self.path.display());
            return Err(DbError::NotADatabase);
        }
        self.header_checked = true;
        self.cache.insert(1, page);
        Ok(())
    }

    /// Reads one page as plaintext.
    ///
    /// Pages past the end read as zeros.
    ///
    /// # Errors
    ///
    /// [`DbError::PageOutOfRange`] for page 0, header and I/O errors, or
    /// [`DbError::PageIo`] when decoding fails.
    pub fn read_page(&mut self, page: PageNumber) -> DbResult<Vec<u8>> {
        if page == 0 {
            return Err(DbError::PageOutOfRange(page));
        }
        self.verify()?;
        if let Some(data) = self.txn.as_ref().and_then(|txn| txn.dirty.get(&page)) {
            return Ok(data.clone());
        }
        if let Some(data) = self.cache.get(&page) {
            return Ok(data.clone());
        }
        if page > self.page_count {
            return Ok(vec![0u8; self.page_size]);
        }
        let data = self.load(page, IoMode::Load)?;
        self.cache.insert(page, data.clone());
        Ok(data)
    }

    /// Starts a write transaction and creates the journal.
    ///
    /// # Errors
    ///
    /// [`DbError::Busy`] if one is already open, header or I/O errors.
    pub fn begin(&mut self) -> DbResult<()> {
        if self.txn.is_some() {
            return Err(DbError::Busy);
        }
        self.verify()?;
        let journal = Journal::create(journal_path(&self.path), self.page_size, self.page_count)?;
        let mut txn = PagerTxn {
            journal,
            journaled: HashSet::new(),
            dirty: BTreeMap::new(),
            original_page_count: self.page_count,
        };
        if self.page_count == 0 {
            let mut first = vec![0u8; self.page_size];
            stamp_header(&mut first, self.page_size);
            txn.dirty.insert(1, first);
        }
        self.txn = Some(txn);
        debug!("{}: transaction started", self.path.display());
        Ok(())
    }

    /// Stages a new image of `page`.
    ///
    /// The first write to an existing page journals its current contents.
    /// Pages may be appended one past the current end, not further.
    ///
    /// # Errors
    ///
    /// [`DbError::NoTransaction`], page range and size errors, or encoding
    /// and I/O errors while journaling.
    pub fn write_page(&mut self, page: PageNumber, data: &[u8]) -> DbResult<()> {
        if data.len() != self.page_size {
            return Err(DbError::PageSize {
                expected: self.page_size,
                actual: data.len(),
            });
        }
        let (original_page_count, already_journaled, current_count) = {
            let txn = self.txn.as_ref().ok_or(DbError::NoTransaction)?;
            let last_dirty = txn.dirty.keys().next_back().copied().unwrap_or(0);
            (
                txn.original_page_count,
                txn.journaled.contains(&page),
                self.page_count.max(last_dirty),
            )
        };
        if page == 0 || page > current_count.saturating_add(1) {
            return Err(DbError::PageOutOfRange(page));
        }
        if page == locking_page(self.page_size) {
            return Err(DbError::LockingPage(page));
        }

        if page <= original_page_count && !already_journaled {
            let mut original = match self.cache.get(&page) {
                Some(cached) => cached.clone(),
                None => self.load(page, IoMode::Load)?,
            };
            let stored = self.hooks.transform(page, &mut original, IoMode::WriteJournal)?;
            let txn = self.txn.as_mut().ok_or(DbError::NoTransaction)?;
            txn.journal.append(page, stored)?;
            txn.journaled.insert(page);
        }

        let mut image = data.to_vec();
        if page == 1 {
            stamp_header(&mut image, self.page_size);
        }
        let txn = self.txn.as_mut().ok_or(DbError::NoTransaction)?;
        txn.dirty.insert(page, image);
        Ok(())
    }

    /// Marks `page` dirty without changing it, so the commit rewrites it
    /// under the current write key.
    ///
    /// # Errors
    ///
    /// Same as [`read_page`](Self::read_page) and
    /// [`write_page`](Self::write_page).
    pub fn touch_page(&mut self, page: PageNumber) -> DbResult<()> {
        let data = self.read_page(page)?;
        self.write_page(page, &data)
    }

    /// Writes every dirty page to the database file and deletes the journal.
    ///
    /// On failure the transaction stays open; call
    /// [`rollback`](Self::rollback) to restore the file.
    ///
    /// # Errors
    ///
    /// [`DbError::NoTransaction`], encoding or I/O errors.
    pub fn commit(&mut self) -> DbResult<()> {
        let txn = self.txn.as_mut().ok_or(DbError::NoTransaction)?;
        if self.sync {
            txn.journal.sync()?;
        }
        // The dirty set is kept until every page is on disk, so a retry after
        // a failed write rewrites all of them.
        let mut page_count = self.page_count;
        for (&page, image) in &txn.dirty {
            #[cfg(test)]
            if self.faults.fail_commit_write_at == Some(page) {
                return Err(std::io::Error::other(format!("injected write fault on page {page}")).into());
            }
            let mut data = image.clone();
            let stored = self.hooks.transform(page, &mut data, IoMode::WriteMain)?;
            write_raw(&mut self.file, self.page_size, page, stored)?;
            page_count = page_count.max(page);
        }
        if self.sync {
            self.file.sync_all()?;
        }
        if let Some(txn) = self.txn.take() {
            txn.journal.remove()?;
            self.cache.extend(txn.dirty);
        }
        self.page_count = page_count;
        self.header_checked = true;
        debug!("{}: committed, {page_count} pages", self.path.display());
        Ok(())
    }

    /// Restores the file from the journal and ends the transaction.
    /// Without an open transaction this does nothing.
    ///
    /// # Errors
    ///
    /// Journal, decoding or I/O errors. The journal is kept on failure so
    /// the next open can finish the job.
    pub fn rollback(&mut self) -> DbResult<()> {
        let Some(mut txn) = self.txn.take() else {
            return Ok(());
        };
        let contents = txn.journal.contents()?;
        self.cache.retain(|&page, _| page <= contents.original_page_count);
        for (page, stored) in contents.records {
            write_raw(&mut self.file, self.page_size, page, &stored)?;
            let mut plain = stored;
            self.hooks.transform(page, &mut plain, IoMode::UndoJournal)?;
            self.cache.insert(page, plain);
        }
        self.file
            .set_len(u64::from(contents.original_page_count) * self.page_size as u64)?;
        if self.sync {
            self.file.sync_all()?;
        }
        txn.journal.remove()?;
        self.page_count = contents.original_page_count;
        debug!("{}: rolled back", self.path.display());
        Ok(())
    }

    /// Re-reads every cached page from disk.
    ///
    /// # Errors
    ///
    /// [`DbError::Busy`] inside a transaction, decoding or I/O errors.
    pub fn refresh_cache(&mut self) -> DbResult<()> {
        if self.txn.is_some() {
            return Err(DbError::Busy);
        }
        let len = self.file.metadata()?.len();
        self.page_count = PageNumber::try_from(len / self.page_size as u64)
            .map_err(|_| DbError::NotADatabase)?;
        let page_count = self.page_count;
        self.cache.retain(|&page, _| page <= page_count);
        let mut pages: Vec<PageNumber> = self.cache.keys().copied().collect();
        pages.sort_unstable();
        for page in pages {
            let data = self.load(page, IoMode::Reload)?;
            self.cache.insert(page, data);
        }
        Ok(())
    }

    fn load(&mut self, page: PageNumber, mode: IoMode) -> DbResult<Vec<u8>> {
        #[cfg(test)]
        if self.faults.fail_load_at == Some(page) {
            return Err(std::io::Error::other(format!("injected read fault on page {page}")).into());
        }
        let mut data = vec![0u8; self.page_size];
        self.file.seek(SeekFrom::Start(page_offset(self.page_size, page)))?;
        self.file.read_exact(&mut data)?;
        self.hooks.transform(page, &mut data, mode)?;
        Ok(data)
    }
}

impl RekeyHost for Pager {
    type Error = DbError;

    fn owner(&self) -> ConnectionId {
        self.owner
    }

    fn hooks(&mut self) -> &mut PagerHookAdapter {
        &mut self.hooks
    }

    fn begin_exclusive(&mut self) -> DbResult<()> {
        self.begin()
    }

    fn page_count(&mut self) -> DbResult<PageNumber> {
        Ok(self.page_count)
    }

    fn locking_page(&self) -> PageNumber {
        locking_page(self.page_size)
    }

    fn touch_page(&mut self, page: PageNumber) -> DbResult<()> {
        Self::touch_page(self, page)
    }

    fn commit(&mut self) -> DbResult<()> {
        Self::commit(self)
    }

    fn rollback(&mut self) -> DbResult<()> {
        Self::rollback(self)
    }
}

impl std::fmt::Debug for Pager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pager")
            .field("path", &self.path)
            .field("page_size", &self.page_size)
            .field("page_count", &self.page_count)
            .field("hooks", &self.hooks)
            .field("in_transaction", &self.txn.is_some())
            .finish_non_exhaustive()
    }
}

fn page_offset(page_size: usize, page: PageNumber) -> u64 {
    u64::from(page - 1) * page_size as u64
}

fn write_raw(file: &mut File, page_size: usize, page: PageNumber, bytes: &[u8]) -> DbResult<()> {
    file.seek(SeekFrom::Start(page_offset(page_size, page)))?;
    file.write_all(bytes)?;
    Ok(())
}

fn stamp_header(page: &mut [u8], page_size: usize) {
    page[..HEADER_MAGIC.len()].copy_from_slice(&HEADER_MAGIC);
    let size = u32::try_from(page_size).unwrap_or(u32::MAX);
    page[16..20].copy_from_slice(&size.to_le_bytes());
    page[20..HEADER_SIZE].fill(0);
}

fn header_matches(page: &[u8], page_size: usize) -> bool {
    let mut expected = [0u8; HEADER_SIZE];
    stamp_header(&mut expected, page_size);
    page.get(..HEADER_SIZE) == Some(&expected[..])
}
