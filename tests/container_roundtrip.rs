//! Container Round-Trip Tests
//!
//! Build, save, reopen and validate containers whose data files mix
//! in-memory and on-disk content.

use std::fs;
use std::io::{Cursor, Read};

use asic_container::signing::SignatureDocument;
use asic_container::{
    Configuration, Container, ContainerBuilder, ContainerError, ContainerState, ContainerType,
    DataFile, Ed25519Signer, Ed25519Validator, Placement, Signature, StoragePolicy,
};
use tempfile::TempDir;

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 253) as u8).collect()
}

fn save_to_vec(container: &mut Container) -> Vec<u8> {
    let mut stream = container.save_as_stream().unwrap();
    let expected = stream.total_len();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).unwrap();
    assert_eq!(out.len() as u64, expected);
    out
}

fn reopen(bytes: Vec<u8>, config: Configuration) -> Container {
    ContainerBuilder::a_container(ContainerType::Bdoc)
        .from_stream(Cursor::new(bytes))
        .with_configuration(config)
        .build()
        .unwrap()
}

// =============================================================================
// Round trips
// =============================================================================

#[test]
fn test_round_trip_is_byte_identical_for_both_placements() {
    let spill = TempDir::new().unwrap();
    let small = patterned(100);
    let large = patterned(64 * 1024 + 17);
    let empty: Vec<u8> = Vec::new();

    for threshold in [0u64, 1024, 1024 * 1024] {
        let config = Configuration::default()
            .with_max_in_memory_bytes(threshold)
            .with_temp_dir(spill.path());

        let mut container = ContainerBuilder::a_container(ContainerType::Asice)
            .with_configuration(config.clone())
            .with_data_file_from_bytes(&small, "small.bin", "application/octet-stream")
            .with_data_file_from_reader(Cursor::new(large.clone()), "large.bin", "application/octet-stream")
            .with_data_file_from_bytes(&empty, "empty.txt", "text/plain")
            .build()
            .unwrap();

        let expected_large = if threshold >= large.len() as u64 {
            Placement::Memory
        } else {
            Placement::Disk
        };
        assert_eq!(container.data_files()[1].placement(), expected_large);

        let bytes = save_to_vec(&mut container);
        let reopened = reopen(bytes, config);

        assert_eq!(reopened.container_type(), ContainerType::Asice);
        let files = reopened.data_files();
        assert_eq!(files.len(), 3);
        assert_eq!(files[0].bytes().unwrap(), small, "threshold {}", threshold);
        assert_eq!(files[1].bytes().unwrap(), large, "threshold {}", threshold);
        assert_eq!(files[2].bytes().unwrap(), empty, "threshold {}", threshold);
        assert_eq!(files[2].mime_type(), "text/plain");
    }
}

#[test]
fn test_resave_after_reopen_is_identical() {
    let mut container = ContainerBuilder::a_container(ContainerType::Bdoc)
        .with_data_file_from_bytes(b"first", "a.txt", "text/plain")
        .with_data_file_from_bytes(b"second", "dir/b.txt", "text/plain")
        .build()
        .unwrap();
    let first = save_to_vec(&mut container);

    let mut reopened = reopen(first.clone(), Configuration::default());
    assert_eq!(save_to_vec(&mut reopened), first);
}

#[test]
fn test_three_source_kinds_reproduced() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.txt");
    fs::write(&path, "path bytes").unwrap();

    let policy = StoragePolicy::default();
    let path_file = DataFile::from_path(&path, "text/plain", &policy).unwrap();
    let byte_file = DataFile::from_bytes(&[1, 2, 3], "byte-file.txt", "text/plain", &policy).unwrap();
    let mut stream: &[u8] = b"stream bytes";
    let stream_file = DataFile::from_reader(&mut stream, "stream-file.txt", "text/plain", &policy).unwrap();

    let mut container = ContainerBuilder::a_container(ContainerType::Bdoc)
        .with_data_file(path_file)
        .with_data_file(byte_file)
        .with_data_file(stream_file)
        .build()
        .unwrap();
    assert_eq!(container.data_files().len(), 3);

    let bytes = save_to_vec(&mut container);
    assert!(!bytes.is_empty());

    let reopened = reopen(bytes, Configuration::default());
    let summary: Vec<(String, String, Vec<u8>)> = reopened
        .data_files()
        .iter()
        .map(|f| (f.name().to_string(), f.mime_type().to_string(), f.bytes().unwrap()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("test.txt".to_string(), "text/plain".to_string(), b"path bytes".to_vec()),
            ("byte-file.txt".to_string(), "text/plain".to_string(), vec![1, 2, 3]),
            ("stream-file.txt".to_string(), "text/plain".to_string(), b"stream bytes".to_vec()),
        ]
    );
}

#[test]
fn test_save_to_path_and_open_existing_file() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("doc.bdoc");

    let mut container = ContainerBuilder::a_container(ContainerType::Bdoc)
        .with_data_file_from_bytes(b"payload", "p.txt", "text/plain")
        .build()
        .unwrap();
    let written = container.save_to_path(&target).unwrap();
    assert_eq!(fs::metadata(&target).unwrap().len(), written);

    let reopened = ContainerBuilder::a_container(ContainerType::Asice)
        .from_existing_file(&target)
        .build()
        .unwrap();
    assert_eq!(reopened.container_type(), ContainerType::Bdoc);
    assert_eq!(reopened.data_file("p.txt").unwrap().bytes().unwrap(), b"payload");
}

#[test]
fn test_truncated_archive_is_malformed() {
    let mut container = ContainerBuilder::a_container(ContainerType::Bdoc)
        .with_data_file_from_bytes(&patterned(4096), "a.bin", "application/octet-stream")
        .build()
        .unwrap();
    let mut bytes = save_to_vec(&mut container);
    bytes.truncate(bytes.len() / 2);

    let err = ContainerBuilder::a_container(ContainerType::Bdoc)
        .from_stream(Cursor::new(bytes))
        .build()
        .unwrap_err();
    assert!(matches!(err, ContainerError::MalformedArchive(_)), "{}", err);
}

// =============================================================================
// Signing
// =============================================================================

#[test]
fn test_signed_container_survives_round_trip() {
    let signer = Ed25519Signer::generate();
    let mut container = ContainerBuilder::a_container(ContainerType::Bdoc)
        .with_data_file_from_bytes(b"contract", "contract.txt", "text/plain")
        .build()
        .unwrap();
    container.sign_with(&signer).unwrap();
    assert!(container.validate(&Ed25519Validator::new()).passed);

    let mut reopened = reopen(save_to_vec(&mut container), Configuration::default());
    assert_eq!(reopened.state(), ContainerState::Closed);
    assert_eq!(reopened.signatures().len(), 1);

    let report = reopened.validate(&Ed25519Validator::pinned(signer.fingerprint()));
    assert!(report.passed, "{:?}", report.errors);

    let wrong = Ed25519Signer::generate();
    assert!(!reopened.validate(&Ed25519Validator::pinned(wrong.fingerprint())).passed);
}

#[test]
fn test_reopened_signed_container_rejects_new_data() {
    let signer = Ed25519Signer::generate();
    let mut container = ContainerBuilder::a_container(ContainerType::Bdoc)
        .with_data_file_from_bytes(b"contract", "contract.txt", "text/plain")
        .build()
        .unwrap();
    container.sign_with(&signer).unwrap();
    let bytes = save_to_vec(&mut container);

    let err = ContainerBuilder::a_container(ContainerType::Bdoc)
        .from_stream(Cursor::new(bytes))
        .with_data_file_from_bytes(b"appendix", "appendix.txt", "text/plain")
        .build()
        .unwrap_err();
    assert!(matches!(err, ContainerError::ContainerClosed));
}

#[test]
fn test_signature_moved_to_other_content_fails() {
    let signer = Ed25519Signer::generate();
    let mut original = ContainerBuilder::a_container(ContainerType::Bdoc)
        .with_data_file_from_bytes(b"pay 10", "order.txt", "text/plain")
        .build()
        .unwrap();
    original.sign_with(&signer).unwrap();
    let signature: Signature = original.signatures()[0].clone();

    let mut forged = ContainerBuilder::a_container(ContainerType::Bdoc)
        .with_data_file_from_bytes(b"pay 99", "order.txt", "text/plain")
        .build()
        .unwrap();
    forged.add_signature(signature);

    let report = forged.validate(&Ed25519Validator::new());
    assert!(!report.passed);
    assert_eq!(report.signature_count, 1);
}

#[test]
fn test_multiple_signatures_kept_in_order() {
    let first = Ed25519Signer::generate();
    let second = Ed25519Signer::generate();
    let mut container = ContainerBuilder::a_container(ContainerType::Asice)
        .with_data_file_from_bytes(b"shared", "shared.txt", "text/plain")
        .build()
        .unwrap();
    container.sign_with(&first).unwrap();
    container.sign_with(&second).unwrap();

    let mut reopened = reopen(save_to_vec(&mut container), Configuration::default());
    let fingerprints: Vec<String> = reopened
        .signatures()
        .iter()
        .map(|s| SignatureDocument::from_signature(s).unwrap().pubkey_fingerprint)
        .collect();
    assert_eq!(fingerprints, vec![first.fingerprint(), second.fingerprint()]);
    assert!(reopened.validate(&Ed25519Validator::new()).passed);
}
