//! Common test utilities shared across integration tests.
#![allow(dead_code, missing_docs)]

use std::path::Path;

use pagecodec::{KeyMaterial, PageNumber, KEY_MATERIAL_SIZE};
use pagecodec_db::{Database, OpenOptions};
use secrecy::ExposeSecret;

pub const PAGE_SIZE: usize = 1024;

pub fn options() -> OpenOptions {
    OpenOptions {
        page_size: PAGE_SIZE,
        sync: false,
        create: true,
    }
}

/// Deterministic base64 key.
pub fn key(fill: u8) -> String {
    KeyMaterial::from_bytes(&[fill; KEY_MATERIAL_SIZE])
        .expect("key material")
        .to_base64()
        .expose_secret()
        .to_string()
}

/// Same key as [`key`], hex encoded.
pub fn hex_key(fill: u8) -> String {
    format!("{fill:02x}").repeat(KEY_MATERIAL_SIZE)
}

/// Page contents derived from the page number and a generation tag.
pub fn content(page: PageNumber, generation: u8) -> Vec<u8> {
    let seed = page.to_le_bytes()[0] ^ generation.rotate_left(4);
    (0..=u8::MAX)
        .cycle()
        .take(PAGE_SIZE)
        .map(|b| b.wrapping_mul(7) ^ seed)
        .collect()
}

pub fn open(path: &Path, encoded_key: Option<&str>) -> Database {
    let mut db = Database::open(path, &options()).expect("open db");
    if let Some(encoded_key) = encoded_key {
        db.key(encoded_key).expect("key");
    }
    db
}

/// Writes pages 2..=`last` with [`content`] for `generation`.
pub fn fill(db: &mut Database, last: PageNumber, generation: u8) {
    let mut tx = db.transaction().expect("begin tx");
    for page in 2..=last {
        tx.write_page(page, &content(page, generation))
            .expect("write page");
    }
    tx.commit().expect("commit");
}

/// Asserts pages 2..=`last` hold [`content`] for `generation`.
pub fn assert_contents(db: &mut Database, last: PageNumber, generation: u8) {
    for page in 2..=last {
        assert_eq!(
            db.read_page(page).expect("read page"),
            content(page, generation),
            "page {page}"
        );
    }
}
