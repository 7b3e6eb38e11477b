//! Write transaction guard over one pager.

use log::warn;
use pagecodec::PageNumber;

use crate::error::DbResult;
use crate::pager::Pager;

/// An open write transaction.
///
/// Automatically rolls back on drop unless explicitly committed.
pub struct Transaction<'p> {
    pager: &'p mut Pager,
    committed: bool,
}

impl<'p> Transaction<'p> {
    /// Begins a new transaction on `pager`.
    pub(crate) fn begin(pager: &'p mut Pager) -> DbResult<Self> {
        pager.begin()?;
        Ok(Self {
            pager,
            committed: false,
        })
    }

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// Any commit failure; the transaction is then rolled back on drop.
    pub fn commit(mut self) -> DbResult<()> {
        self.pager.commit()?;
        self.committed = true;
        Ok(())
    }

    /// Rolls back explicitly, reporting failures that drop would swallow.
    ///
    /// # Errors
    ///
    /// Journal or I/O errors from [`Pager::rollback`].
    pub fn rollback(mut self) -> DbResult<()> {
        self.committed = true;
        self.pager.rollback()
    }

    // ── Delegated Pager methods ─────────────────────────────────────────

    /// See [`Pager::read_page`].
    ///
    /// # Errors
    ///
    /// Same as [`Pager::read_page`].
    pub fn read_page(&mut self, page: PageNumber) -> DbResult<Vec<u8>> {
        self.pager.read_page(page)
    }

    /// See [`Pager::write_page`].
    ///
    /// # Errors
    ///
    /// Same as [`Pager::write_page`].
    pub fn write_page(&mut self, page: PageNumber, data: &[u8]) -> DbResult<()> {
        self.pager.write_page(page, data)
    }

    /// See [`Pager::page_size`].
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.pager.page_size()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.committed {
            // Best-effort rollback.
            if let Err(err) = self.pager.rollback() {
                warn!("rollback on drop failed: {err}");
            }
        }
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("pager", &self.pager)
            .field("committed", &self.committed)
            .finish()
    }
}
