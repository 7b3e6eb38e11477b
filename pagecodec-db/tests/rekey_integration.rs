//! Integration tests for rekey.
mod common;

use std::fs;

use pagecodec::CodecError;
use pagecodec_db::cipher::{generate_key, open_encrypted};
use pagecodec_db::{DbError, OpenOptions, RekeyKind, HEADER_MAGIC, MAIN_SCHEMA};

#[test]
fn test_rekey_end_to_end() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("vault.db");

    let mut db = common::open(&path, Some(&common::key(1)));
    common::fill(&mut db, 6, 1);
    drop(db);

    let mut db = common::open(&path, Some(&common::key(1)));
    common::assert_contents(&mut db, 6, 1);
    assert_eq!(
        db.rekey(Some(&common::key(2))).expect("rekey"),
        RekeyKind::Reencrypt
    );
    common::assert_contents(&mut db, 6, 1);
    drop(db);

    let mut db = common::open(&path, Some(&common::key(2)));
    common::assert_contents(&mut db, 6, 1);

    let mut stale = common::open(&path, Some(&common::key(1)));
    match stale.read_page(2) {
        Err(DbError::NotADatabase) => {}
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn test_writes_after_rekey_use_new_key() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("vault.db");

    let mut db = common::open(&path, Some(&common::key(1)));
    common::fill(&mut db, 3, 1);
    db.rekey(Some(&common::key(2))).expect("rekey");
    common::fill(&mut db, 5, 2);
    drop(db);

    let mut db = common::open(&path, Some(&common::key(2)));
    common::assert_contents(&mut db, 5, 2);
}

#[test]
fn test_first_time_encryption() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("plain.db");

    let mut db = common::open(&path, None);
    common::fill(&mut db, 4, 1);
    assert_eq!(
        db.rekey(Some(&common::key(7))).expect("encrypt"),
        RekeyKind::Encrypt
    );
    common::assert_contents(&mut db, 4, 1);
    drop(db);

    let raw = fs::read(&path).expect("read raw");
    assert_ne!(&raw[..HEADER_MAGIC.len()], &HEADER_MAGIC);

    let mut unkeyed = common::open(&path, None);
    match unkeyed.verify() {
        Err(DbError::NotADatabase) => {}
        other => panic!("unexpected result: {other:?}"),
    }

    let mut db = common::open(&path, Some(&common::key(7)));
    common::assert_contents(&mut db, 4, 1);
}

#[test]
fn test_decrypt() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("vault.db");

    let mut db = common::open(&path, Some(&common::key(1)));
    common::fill(&mut db, 4, 3);
    assert_eq!(db.rekey(None).expect("decrypt"), RekeyKind::Decrypt);
    assert!(!db.pager(MAIN_SCHEMA).expect("main").hooks().is_encrypted());
    common::assert_contents(&mut db, 4, 3);
    drop(db);

    let raw = fs::read(&path).expect("read raw");
    assert_eq!(&raw[..HEADER_MAGIC.len()], &HEADER_MAGIC);

    let mut db = common::open(&path, None);
    common::assert_contents(&mut db, 4, 3);
}

#[test]
fn test_empty_rekey_key_decrypts() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("vault.db");

    let mut db = common::open(&path, Some(&common::key(1)));
    common::fill(&mut db, 2, 1);
    assert_eq!(db.rekey(Some("")).expect("decrypt"), RekeyKind::Decrypt);
}

#[test]
fn test_rekey_plaintext_without_key_is_noop() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("plain.db");

    let mut db = common::open(&path, None);
    common::fill(&mut db, 3, 1);
    assert_eq!(db.rekey(None).expect("noop"), RekeyKind::Unchanged);
    common::assert_contents(&mut db, 3, 1);
}

#[test]
fn test_rekey_empty_database() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("empty.db");

    let mut db = common::open(&path, Some(&common::key(1)));
    db.rekey(Some(&common::key(2))).expect("rekey");
    assert_eq!(db.page_count(), 1);
    drop(db);

    let mut db = common::open(&path, Some(&common::key(2)));
    db.verify().expect("header readable with new key");
}

#[test]
fn test_malformed_rekey_key_changes_nothing() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("vault.db");

    let mut db = common::open(&path, Some(&common::key(1)));
    common::fill(&mut db, 3, 1);
    match db.rekey(Some("not base64!")) {
        Err(DbError::Codec(CodecError::InvalidKeyEncoding(_))) => {}
        other => panic!("unexpected result: {other:?}"),
    }
    match db.rekey(Some("AAAA")) {
        Err(DbError::Codec(CodecError::InvalidKeySize { actual: 3, .. })) => {}
        other => panic!("unexpected result: {other:?}"),
    }
    common::assert_contents(&mut db, 3, 1);
    drop(db);

    let mut db = common::open(&path, Some(&common::key(1)));
    common::assert_contents(&mut db, 3, 1);
}

#[test]
fn test_hex_and_base64_keys_are_interchangeable() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("vault.db");

    let mut db = pagecodec_db::Database::open(&path, &common::options()).expect("open db");
    db.key_hex(&common::hex_key(3)).expect("hex key");
    common::fill(&mut db, 3, 1);
    drop(db);

    let mut db = common::open(&path, Some(&common::key(3)));
    common::assert_contents(&mut db, 3, 1);
    assert_eq!(
        db.rekey_hex(&common::hex_key(4)).expect("hex rekey"),
        RekeyKind::Reencrypt
    );
    drop(db);

    let mut db = common::open(&path, Some(&common::key(4)));
    common::assert_contents(&mut db, 3, 1);
}

#[test]
fn test_open_encrypted_with_generated_key() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("vault.db");
    let key = generate_key().expect("generate key");

    let mut db = open_encrypted(&path, &key, &common::options()).expect("open encrypted");
    common::fill(&mut db, 3, 9);
    drop(db);

    let mut db = open_encrypted(&path, &key, &common::options()).expect("reopen");
    common::assert_contents(&mut db, 3, 9);

    let other = generate_key().expect("generate key");
    match open_encrypted(&path, &other, &common::options()) {
        Err(DbError::NotADatabase) => {}
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn test_options_from_json() {
    let options: OpenOptions =
        serde_json::from_str(r#"{ "page_size": 8192, "sync": false }"#).expect("parse");
    assert_eq!(options.page_size, 8192);
    assert!(!options.sync);
    assert!(options.create);

    let defaults: OpenOptions = serde_json::from_str("{}").expect("parse");
    assert_eq!(defaults, OpenOptions::default());

    assert!(serde_json::from_str::<OpenOptions>(r#"{ "cipher": "aes" }"#).is_err());
}

#[test]
fn test_missing_file_without_create_fails() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let options = OpenOptions {
        create: false,
        ..common::options()
    };
    match pagecodec_db::Database::open(&dir.path().join("absent.db"), &options) {
        Err(DbError::Io(_)) => {}
        other => panic!("unexpected result: {other:?}"),
    }
}
