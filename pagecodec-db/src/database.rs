//! A connection: the main database file plus any attached files.
//!
//! Each file has its own [`Pager`] and therefore its own codec. Keys are
//! applied per file; attaching without a key copies the main file's key
//! state, after which the two evolve independently.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, info};
use pagecodec::{
    codec_for_attached, AttachKey, Codec, ConnectionId, KeyMaterial, PageNumber, RekeyKind,
    RekeyOrchestrator,
};
use secrecy::ExposeSecret;

use crate::error::{DbError, DbResult};
use crate::options::OpenOptions;
use crate::pager::Pager;
use crate::transaction::Transaction;

/// Schema name of the file the connection was opened on.
pub const MAIN_SCHEMA: &str = "main";

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// A database connection.
///
/// Not `Sync`: the pagers and their codecs assume one caller at a time.
pub struct Database {
    owner: ConnectionId,
    options: OpenOptions,
    main: Pager,
    attached: BTreeMap<String, Pager>,
}

impl Database {
    /// Opens (or creates) the database at `path`. The file starts unkeyed.
    ///
    /// # Errors
    ///
    /// See [`Pager::open`].
    pub fn open(path: &Path, options: &OpenOptions) -> DbResult<Self> {
        let owner = ConnectionId(NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed));
        let main = Pager::open(path, owner, options)?;
        debug!("connection {owner} opened {}", path.display());
        Ok(Self {
            owner,
            options: options.clone(),
            main,
            attached: BTreeMap::new(),
        })
    }

    /// Identity passed to every codec this connection creates.
    #[must_use]
    pub const fn owner(&self) -> ConnectionId {
        self.owner
    }

    /// Sets the key of the main file. An empty key leaves it unkeyed.
    ///
    /// The key is not checked here; a wrong key shows up as
    /// [`DbError::NotADatabase`] on the first read.
    ///
    /// # Errors
    ///
    /// Key decoding errors, or [`DbError::Busy`] inside a transaction.
    pub fn key(&mut self, encoded_key: &str) -> DbResult<()> {
        self.key_schema(MAIN_SCHEMA, encoded_key)
    }

    /// Sets the key of the file attached as `schema`.
    ///
    /// # Errors
    ///
    /// As [`key`](Self::key), plus [`DbError::UnknownDatabase`].
    pub fn key_schema(&mut self, schema: &str, encoded_key: &str) -> DbResult<()> {
        if encoded_key.is_empty() {
            return Ok(());
        }
        let codec = Codec::with_key(self.owner, encoded_key)?;
        self.pager(schema)?.install_codec(codec)
    }

    /// Sets the key of the main file from hex text.
    ///
    /// # Errors
    ///
    /// As [`key`](Self::key).
    pub fn key_hex(&mut self, hex_key: &str) -> DbResult<()> {
        if hex_key.is_empty() {
            return Ok(());
        }
        let mut codec = Codec::new(self.owner);
        codec.set_write_key_hex(hex_key)?;
        codec.set_read_is_write();
        self.main.install_codec(codec)
    }

    /// Changes the key of the main file, re-encrypting every page.
    ///
    /// `None` (or an empty key) decrypts the file. The returned
    /// [`RekeyKind`] says what happened.
    ///
    /// # Errors
    ///
    /// Key decoding errors, or [`pagecodec::CodecError::TransactionFailure`]
    /// after the file and its keys were restored.
    pub fn rekey(&mut self, new_key: Option<&str>) -> DbResult<RekeyKind> {
        self.rekey_schema(MAIN_SCHEMA, new_key)
    }

    /// Changes the key of the file attached as `schema`.
    ///
    /// # Errors
    ///
    /// As [`rekey`](Self::rekey), plus [`DbError::UnknownDatabase`].
    pub fn rekey_schema(&mut self, schema: &str, new_key: Option<&str>) -> DbResult<RekeyKind> {
        let pager = self.pager(schema)?;
        let kind = RekeyOrchestrator::new(pager).rekey(new_key)?;
        info!("rekey of {schema} finished: {kind:?}");
        Ok(kind)
    }

    /// Changes the key of the main file to a hex-encoded key.
    ///
    /// # Errors
    ///
    /// As [`rekey`](Self::rekey).
    pub fn rekey_hex(&mut self, hex_key: &str) -> DbResult<RekeyKind> {
        if hex_key.is_empty() {
            return self.rekey(None);
        }
        let encoded = KeyMaterial::from_hex(hex_key)?.to_base64();
        self.rekey(Some(encoded.expose_secret()))
    }

    /// Attaches the file at `path` under `schema`.
    ///
    /// The header of the attached file is checked right away, so a wrong
    /// or missing key fails here with [`DbError::NotADatabase`].
    ///
    /// # Errors
    ///
    /// [`DbError::DuplicateDatabase`], key decoding, open and header errors.
    pub fn attach(&mut self, schema: &str, path: &Path, key: AttachKey<'_>) -> DbResult<()> {
        if schema == MAIN_SCHEMA || self.attached.contains_key(schema) {
            return Err(DbError::DuplicateDatabase(schema.to_string()));
        }
        let codec = codec_for_attached(self.main.hooks().codec(), key, self.owner)?;
        let mut pager = Pager::open(path, self.owner, &self.options)?;
        if let Some(codec) = codec {
            pager.install_codec(codec)?;
        }
        pager.verify()?;
        debug!(
            "connection {} attached {} as {schema} (encrypted: {})",
            self.owner,
            path.display(),
            pager.hooks().is_encrypted()
        );
        self.attached.insert(schema.to_string(), pager);
        Ok(())
    }

    /// Detaches the file attached as `schema`, dropping its codec.
    ///
    /// # Errors
    ///
    /// [`DbError::UnknownDatabase`], or [`DbError::Busy`] while it has an
    /// open transaction.
    pub fn detach(&mut self, schema: &str) -> DbResult<()> {
        let pager = self
            .attached
            .get(schema)
            .ok_or_else(|| DbError::UnknownDatabase(schema.to_string()))?;
        if pager.in_transaction() {
            return Err(DbError::Busy);
        }
        self.attached.remove(schema);
        Ok(())
    }

    /// Names of the attached files, in order.
    pub fn attached(&self) -> impl Iterator<Item = &str> {
        self.attached.keys().map(String::as_str)
    }

    /// The pager of `schema` (`"main"` or an attached name).
    ///
    /// # Errors
    ///
    /// [`DbError::UnknownDatabase`].
    pub fn pager(&mut self, schema: &str) -> DbResult<&mut Pager> {
        if schema == MAIN_SCHEMA {
            return Ok(&mut self.main);
        }
        self.attached
            .get_mut(schema)
            .ok_or_else(|| DbError::UnknownDatabase(schema.to_string()))
    }

    /// Checks the header of every file on this connection.
    ///
    /// # Errors
    ///
    /// The first [`DbError::NotADatabase`] (or I/O error) encountered.
    pub fn verify(&mut self) -> DbResult<()> {
        self.main.verify()?;
        for pager in self.attached.values_mut() {
            pager.verify()?;
        }
        Ok(())
    }

    /// Reads a page of the main file.
    ///
    /// # Errors
    ///
    /// See [`Pager::read_page`].
    pub fn read_page(&mut self, page: PageNumber) -> DbResult<Vec<u8>> {
        self.main.read_page(page)
    }

    /// Committed page count of the main file.
    #[must_use]
    pub const fn page_count(&self) -> PageNumber {
        self.main.page_count()
    }

    /// Begins a write transaction on the main file.
    ///
    /// # Errors
    ///
    /// See [`Pager::begin`].
    pub fn transaction(&mut self) -> DbResult<Transaction<'_>> {
        Transaction::begin(&mut self.main)
    }

    /// Begins a write transaction on the file attached as `schema`.
    ///
    /// # Errors
    ///
    /// [`DbError::UnknownDatabase`], or see [`Pager::begin`].
    pub fn transaction_on(&mut self, schema: &str) -> DbResult<Transaction<'_>> {
        Transaction::begin(self.pager(schema)?)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("owner", &self.owner)
            .field("main", &self.main)
            .field("attached", &self.attached.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
