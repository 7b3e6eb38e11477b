//! Codec selection for attached database files.

use log::debug;

use crate::codec::Codec;
use crate::error::CodecResult;
use crate::ConnectionId;

/// Key argument supplied when attaching a database file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachKey<'k> {
    /// No key given: inherit the main database's key state, if it has one.
    Inherit,
    /// An explicit empty key: the attached file is plaintext.
    Plaintext,
    /// An explicit base64 key for the attached file alone.
    Explicit(&'k str),
}

impl<'k> AttachKey<'k> {
    /// Interprets an optional key argument the way `ATTACH ... KEY` does:
    /// absent inherits, empty means plaintext.
    #[must_use]
    pub fn from_option(key: Option<&'k str>) -> Self {
        match key {
            None => Self::Inherit,
            Some("") => Self::Plaintext,
            Some(key) => Self::Explicit(key),
        }
    }
}

/// Builds the codec for a newly attached file.
///
/// With [`AttachKey::Inherit`] the attached file gets a value copy of the
/// main codec's read and write keys, so it stays independent afterwards. An
/// explicit key always yields a fresh codec, regardless of the main file.
///
/// # Errors
///
/// Key decoding errors for [`AttachKey::Explicit`].
pub fn codec_for_attached(
    main: Option<&Codec>,
    key: AttachKey<'_>,
    owner: ConnectionId,
) -> CodecResult<Option<Codec>> {
    match key {
        AttachKey::Inherit => Ok(main.map(|codec| {
            debug!("codec {owner}: attached file inherits main key state");
            codec.clone_for(owner)
        })),
        AttachKey::Plaintext => Ok(None),
        AttachKey::Explicit(encoded) => Codec::with_key(owner, encoded).map(Some),
    }
}
