//! Open-time configuration.

use serde::Deserialize;

/// Options applied when a database file is opened.
///
/// Deserializable so hosts can keep them alongside the rest of their
/// configuration; missing fields take the defaults.
///
/// ```rust
/// use pagecodec_db::OpenOptions;
///
/// let options: OpenOptions = serde_json::from_str(r#"{ "page_size": 1024 }"#)?;
/// assert_eq!(options.page_size, 1024);
/// assert!(options.sync);
/// # Ok::<(), serde_json::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OpenOptions {
    /// Page size in bytes: a power of two between 512 and 65536.
    pub page_size: usize,
    /// Fsync the journal before and the database after each commit.
    pub sync: bool,
    /// Create the file if it does not exist.
    pub create: bool,
}

impl OpenOptions {
    /// Default page size.
    pub const DEFAULT_PAGE_SIZE: usize = 4096;
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            page_size: Self::DEFAULT_PAGE_SIZE,
            sync: true,
            create: true,
        }
    }
}
