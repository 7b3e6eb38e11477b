//! Binding between a host pager's I/O path and the codec.
//!
//! The host owns one [`PagerHookAdapter`] per database file and calls it for
//! every page it loads or is about to write, tagged with an [`IoMode`]. With
//! no codec installed the adapter passes pages through untouched.

use std::fmt;

use log::trace;

use crate::codec::Codec;
use crate::error::{CodecError, CodecResult, PageIoError};
use crate::PageNumber;

/// Why the pager is handing a page to the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoMode {
    /// A page read back from the rollback journal during playback.
    UndoJournal,
    /// A cached page re-read from the database file.
    Reload,
    /// A page loaded from the database file.
    Load,
    /// A page about to be written to the database file.
    WriteMain,
    /// A page about to be written to the rollback journal.
    WriteJournal,
}

impl IoMode {
    /// Maps the numeric mode tags used by C-style pager callbacks.
    ///
    /// # Errors
    ///
    /// [`CodecError::CipherFailure`] for tags the codec does not handle.
    pub fn from_raw(tag: i32) -> CodecResult<Self> {
        match tag {
            0 => Ok(Self::UndoJournal),
            2 => Ok(Self::Reload),
            3 => Ok(Self::Load),
            6 => Ok(Self::WriteMain),
            7 => Ok(Self::WriteJournal),
            other => Err(CodecError::CipherFailure(format!(
                "unknown pager I/O mode {other}"
            ))),
        }
    }

    /// Whether the page flows from disk into the cache.
    #[must_use]
    pub const fn is_read(self) -> bool {
        matches!(self, Self::UndoJournal | Self::Reload | Self::Load)
    }
}

impl fmt::Display for IoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UndoJournal => "undo-journal",
            Self::Reload => "reload",
            Self::Load => "load",
            Self::WriteMain => "write-main",
            Self::WriteJournal => "write-journal",
        };
        f.write_str(name)
    }
}

/// Page I/O callbacks a pager invokes, injected at open time.
pub trait PageCodecHooks {
    /// The pager's page size changed (or became known).
    ///
    /// # Errors
    ///
    /// Returns an error if the size is unusable for encryption.
    fn page_size_changed(&mut self, page_size: usize) -> Result<(), PageIoError>;

    /// Transforms one page.
    ///
    /// Read modes decrypt `data` in place and return it. Write modes return
    /// the bytes to persist, which may live in a codec-owned buffer; `data`
    /// itself is left as is.
    ///
    /// # Errors
    ///
    /// On error the host must abort the I/O and discard `data`.
    fn transform<'a>(
        &'a mut self,
        page: PageNumber,
        data: &'a mut [u8],
        mode: IoMode,
    ) -> Result<&'a [u8], PageIoError>;
}

/// Adapter holding an optional codec for one database file.
#[derive(Debug, Default)]
pub struct PagerHookAdapter {
    codec: Option<Codec>,
    page_size: Option<usize>,
}

impl PagerHookAdapter {
    /// Adapter without a codec: pages pass through.
    #[must_use]
    pub const fn passthrough() -> Self {
        Self {
            codec: None,
            page_size: None,
        }
    }

    /// Installs `codec`, replacing any previous one, and reports the known
    /// page size to it.
    ///
    /// # Errors
    ///
    /// Returns the page size error if the new codec rejects the size; the
    /// codec is not installed in that case.
    pub fn install(&mut self, mut codec: Codec) -> CodecResult<()> {
        if let Some(size) = self.page_size {
            codec.notify_page_size(size)?;
        }
        self.codec = Some(codec);
        Ok(())
    }

    /// Removes and returns the codec; the file is treated as plaintext after.
    pub fn detach(&mut self) -> Option<Codec> {
        self.codec.take()
    }

    /// Installed codec, if any.
    #[must_use]
    pub const fn codec(&self) -> Option<&Codec> {
        self.codec.as_ref()
    }

    /// Installed codec, if any.
    pub fn codec_mut(&mut self) -> Option<&mut Codec> {
        self.codec.as_mut()
    }

    /// Whether a codec is installed.
    #[must_use]
    pub const fn is_encrypted(&self) -> bool {
        self.codec.is_some()
    }
}

impl PageCodecHooks for PagerHookAdapter {
    fn page_size_changed(&mut self, page_size: usize) -> Result<(), PageIoError> {
        if let Some(codec) = self.codec.as_mut() {
            codec
                .notify_page_size(page_size)
                .map_err(|err| surface(codec, 0, IoMode::Load, &err))?;
        }
        self.page_size = Some(page_size);
        Ok(())
    }

    fn transform<'a>(
        &'a mut self,
        page: PageNumber,
        data: &'a mut [u8],
        mode: IoMode,
    ) -> Result<&'a [u8], PageIoError> {
        let Some(codec) = self.codec.as_mut() else {
            return Ok(data);
        };
        trace!("codec {}: {mode} page {page}", codec.owner());

        // An error recorded by an earlier call that nobody polled aborts
        // this I/O rather than being lost.
        if let Some(cause) = codec.take_error() {
            return Err(PageIoError { page, mode, cause });
        }

        let use_write_key = match mode {
            IoMode::UndoJournal | IoMode::Reload | IoMode::Load => {
                if codec.has_read_key() {
                    codec
                        .decrypt(page, data)
                        .map_err(|err| surface(codec, page, mode, &err))?;
                }
                return Ok(data);
            }
            IoMode::WriteMain if codec.has_write_key() => true,
            // Journal pages must restore the state the read key describes,
            // even while a different write key is being rolled out.
            IoMode::WriteJournal if codec.has_read_key() => false,
            IoMode::WriteMain | IoMode::WriteJournal => return Ok(data),
        };

        let len = codec
            .encrypt_to_scratch(page, data, use_write_key)
            .map_err(|err| surface(codec, page, mode, &err))?;
        Ok(codec.scratch(len))
    }
}

/// Converts a failed dispatch into the host-facing error, consuming the slot.
fn surface(codec: &mut Codec, page: PageNumber, mode: IoMode, err: &CodecError) -> PageIoError {
    PageIoError {
        page,
        mode,
        cause: codec.take_error().unwrap_or_else(|| err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use test_case::test_case;

    use super::*;
    use crate::key::KEY_MATERIAL_SIZE;
    use crate::ConnectionId;

    const PAGE: usize = 1024;

    fn encoded(fill: u8) -> String {
        STANDARD.encode([fill; KEY_MATERIAL_SIZE])
    }

    fn keyed_adapter(fill: u8) -> PagerHookAdapter {
        let mut adapter = PagerHookAdapter::passthrough();
        adapter.page_size_changed(PAGE).expect("page size");
        adapter
            .install(Codec::with_key(ConnectionId(1), &encoded(fill)).expect("codec"))
            .expect("install");
        adapter
    }

    fn sample() -> Vec<u8> {
        (0..PAGE).map(|i| (i % 199).to_le_bytes()[0]).collect()
    }

    #[test_case(0, IoMode::UndoJournal)]
    #[test_case(2, IoMode::Reload)]
    #[test_case(3, IoMode::Load)]
    #[test_case(6, IoMode::WriteMain)]
    #[test_case(7, IoMode::WriteJournal)]
    fn test_from_raw(tag: i32, mode: IoMode) {
        assert_eq!(IoMode::from_raw(tag).expect("known tag"), mode);
    }

    #[test_case(1)]
    #[test_case(4)]
    #[test_case(-1)]
    fn test_from_raw_unknown(tag: i32) {
        match IoMode::from_raw(tag) {
            Err(CodecError::CipherFailure(_)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_passthrough_leaves_pages_alone() {
        let mut adapter = PagerHookAdapter::passthrough();
        adapter.page_size_changed(PAGE).expect("page size");
        let mut data = sample();
        for mode in [IoMode::Load, IoMode::WriteMain, IoMode::WriteJournal] {
            let out = adapter.transform(4, &mut data, mode).expect("transform");
            assert_eq!(out, sample().as_slice());
        }
        assert!(!adapter.is_encrypted());
    }

    #[test]
    fn test_write_then_load_round_trip() {
        let mut adapter = keyed_adapter(1);
        let mut data = sample();
        let mut stored = adapter
            .transform(9, &mut data, IoMode::WriteMain)
            .expect("encrypt")
            .to_vec();
        assert_eq!(data, sample(), "cached page must stay plaintext");
        assert_ne!(stored, sample());

        let plain = adapter.transform(9, &mut stored, IoMode::Load).expect("decrypt");
        assert_eq!(plain, sample().as_slice());
    }

    #[test]
    fn test_journal_uses_read_key_during_rekey() {
        let mut adapter = keyed_adapter(1);
        adapter
            .codec_mut()
            .expect("codec")
            .set_write_key(&encoded(2))
            .expect("write key");

        let mut data = sample();
        let journal = adapter
            .transform(3, &mut data, IoMode::WriteJournal)
            .expect("journal")
            .to_vec();
        let main = adapter
            .transform(3, &mut data, IoMode::WriteMain)
            .expect("main")
            .to_vec();
        assert_ne!(journal, main);

        // The journal image decodes with the read key.
        let mut undo = journal;
        let plain = adapter.transform(3, &mut undo, IoMode::UndoJournal).expect("undo");
        assert_eq!(plain, sample().as_slice());
    }

    #[test]
    fn test_first_encryption_writes_plain_journal() {
        let mut adapter = PagerHookAdapter::passthrough();
        adapter.page_size_changed(PAGE).expect("page size");
        let mut codec = Codec::new(ConnectionId(1));
        codec.set_write_key(&encoded(5)).expect("write key");
        adapter.install(codec).expect("install");

        let mut data = sample();
        let journal = adapter
            .transform(2, &mut data, IoMode::WriteJournal)
            .expect("journal")
            .to_vec();
        assert_eq!(journal, sample());
        let main = adapter
            .transform(2, &mut data, IoMode::WriteMain)
            .expect("main")
            .to_vec();
        assert_ne!(main, sample());

        // Without a read key loads are plaintext.
        let mut loaded = sample();
        let plain = adapter.transform(2, &mut loaded, IoMode::Load).expect("load");
        assert_eq!(plain, sample().as_slice());
    }

    #[test]
    fn test_decrypting_writes_plaintext() {
        let mut adapter = keyed_adapter(1);
        adapter.codec_mut().expect("codec").drop_write_key();
        let mut data = sample();
        let main = adapter
            .transform(2, &mut data, IoMode::WriteMain)
            .expect("main")
            .to_vec();
        assert_eq!(main, sample());
    }

    #[test]
    fn test_stale_error_aborts_next_io() {
        let mut adapter = keyed_adapter(1);
        let codec = adapter.codec_mut().expect("codec");
        codec.set_write_key("###").expect_err("bad key");
        assert!(codec.last_error().is_some());

        let mut data = sample();
        let err = adapter
            .transform(6, &mut data, IoMode::Load)
            .expect_err("stale error");
        assert_eq!(err.page, 6);
        assert_eq!(err.mode, IoMode::Load);
        assert!(adapter.codec().expect("codec").last_error().is_none());

        // The slot was consumed; the next I/O goes through.
        adapter
            .transform(6, &mut data, IoMode::WriteMain)
            .expect("write");
    }

    #[test]
    fn test_wrong_length_is_reported_and_consumed() {
        let mut adapter = keyed_adapter(1);
        let mut short = vec![0u8; PAGE / 2];
        let err = adapter
            .transform(2, &mut short, IoMode::WriteMain)
            .expect_err("length mismatch");
        assert!(err.cause.contains("512"), "cause: {}", err.cause);
        assert!(adapter.codec().expect("codec").last_error().is_none());
    }

    #[test]
    fn test_install_reports_known_page_size() {
        let adapter = keyed_adapter(1);
        assert_eq!(adapter.codec().expect("codec").page_size(), Some(PAGE));
    }

    #[test]
    fn test_bad_page_size_surfaces() {
        let mut adapter = keyed_adapter(1);
        let err = adapter.page_size_changed(1000).expect_err("bad size");
        assert!(err.cause.contains("1000"));
        assert_eq!(adapter.codec().expect("codec").page_size(), Some(PAGE));
    }

    #[test]
    fn test_detach_returns_codec() {
        let mut adapter = keyed_adapter(1);
        assert!(adapter.detach().is_some());
        assert!(!adapter.is_encrypted());
        assert!(adapter.detach().is_none());
    }
}
