mod common;

use std::path::{Path, PathBuf};

use pakcore::compression::CompressionMethod;
use pakcore::pak::{ExtractOptions, PackageOptions, PakOperations, PakReader};
use pakcore::{ErrorKind, pack, unpack};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use common::{noise, write_tree};

const HEADER_SIZE: usize = 36;

fn stored_options() -> PackageOptions {
    PackageOptions::builder()
        .compression(CompressionMethod::None)
        .solid(false)
        .build()
        .unwrap()
}

/// Pack two plain stored files; `a.txt` occupies the first payload bytes.
fn stored_archive(temp: &TempDir) -> PathBuf {
    let src = temp.path().join("src");
    write_tree(
        &src,
        &[("a.txt", b"hello world".to_vec()), ("b.txt", b"second file".to_vec())],
    );
    let pak = temp.path().join("stored.pak");
    pack(&src, &pak, &stored_options()).unwrap();
    pak
}

fn patch(path: &Path, f: impl FnOnce(&mut Vec<u8>)) {
    let mut bytes = std::fs::read(path).unwrap();
    f(&mut bytes);
    std::fs::write(path, bytes).unwrap();
}

fn open_kind(path: &Path) -> ErrorKind {
    PakReader::open(path).unwrap_err().kind()
}

#[test]
fn test_flipped_payload_byte_is_checksum_mismatch() {
    let temp = TempDir::new().unwrap();
    let pak = stored_archive(&temp);
    patch(&pak, |bytes| bytes[HEADER_SIZE] ^= 0x20);

    let out = temp.path().join("out");
    let summary = unpack(&pak, &out).unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].path, "a.txt");
    assert_eq!(summary.failed[0].kind, ErrorKind::ChecksumMismatch);
    assert_eq!(std::fs::read(out.join("b.txt")).unwrap(), b"second file");
    assert!(!out.join("a.txt").exists());

    let err = PakOperations::read_file_bytes(&pak, "a.txt").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
}

#[test]
fn test_fail_fast_returns_first_error() {
    let temp = TempDir::new().unwrap();
    let pak = stored_archive(&temp);
    patch(&pak, |bytes| bytes[HEADER_SIZE] ^= 0x20);

    let err = PakOperations::extract_with_options(
        &pak,
        temp.path().join("out"),
        &ExtractOptions::fail_fast(),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
}

#[test]
fn test_corrupt_solid_block_is_reported_per_entry() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    let text: Vec<u8> = (0..2_000u64)
        .flat_map(|i| format!("data \"Damage\" \"{}d{}\"\n", i % 7, i * i).into_bytes())
        .collect();
    write_tree(&src, &[("one.txt", text.clone()), ("two.txt", text)]);
    let pak = temp.path().join("solid.pak");
    pack(&src, &pak, &PackageOptions::default()).unwrap();

    let block = PakReader::open(&pak).unwrap().index().blocks()[0];
    assert_eq!(block.compression, CompressionMethod::Lz4);
    let middle = (block.offset + block.size_compressed / 2) as usize;
    patch(&pak, |bytes| bytes[middle] ^= 0xff);

    let summary = unpack(&pak, temp.path().join("out")).unwrap();
    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.failed.len(), 2);
    for failure in &summary.failed {
        assert_eq!(failure.kind, ErrorKind::ChecksumMismatch, "{failure:?}");
    }
}

#[test]
fn test_flipped_compressed_byte_is_checksum_mismatch() {
    let text: Vec<u8> = (0..3_000u64)
        .flat_map(|i| format!("key_{i} = \"{}\"\n", i * 31 % 97).into_bytes())
        .collect();

    for method in [CompressionMethod::Lz4, CompressionMethod::Zlib] {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        write_tree(&src, &[("a.txt", text.clone()), ("b.txt", text.clone())]);
        let pak = temp.path().join("packed.pak");
        let options = PackageOptions::builder()
            .compression(method)
            .solid(false)
            .build()
            .unwrap();
        pack(&src, &pak, &options).unwrap();

        let entries = PakOperations::list_detailed(&pak).unwrap();
        let first = entries.iter().find(|e| e.path == "a.txt").unwrap();
        assert_eq!(first.compression, method);
        let start = first.offset as usize;
        let len = first.size_compressed as usize;
        let pristine = std::fs::read(&pak).unwrap();

        for at in [start, start + len / 3, start + len / 2, start + len - 1] {
            let mut damaged = pristine.clone();
            damaged[at] ^= 0x01;
            std::fs::write(&pak, &damaged).unwrap();

            let out = temp.path().join(format!("out-{at}"));
            let summary = unpack(&pak, &out).unwrap();
            assert_eq!(summary.succeeded, 1, "{method:?} at {at}");
            assert_eq!(summary.failed.len(), 1, "{method:?} at {at}");
            assert_eq!(summary.failed[0].path, "a.txt");
            assert_eq!(summary.failed[0].kind, ErrorKind::ChecksumMismatch);
            assert_eq!(std::fs::read(out.join("b.txt")).unwrap(), text);
        }
    }
}

#[test]
fn test_truncated_header() {
    let temp = TempDir::new().unwrap();
    let pak = stored_archive(&temp);

    let short = temp.path().join("short.pak");
    std::fs::write(&short, &std::fs::read(&pak).unwrap()[..20]).unwrap();
    assert_eq!(open_kind(&short), ErrorKind::MalformedHeader);

    let empty = temp.path().join("empty.pak");
    std::fs::write(&empty, b"").unwrap();
    assert_eq!(open_kind(&empty), ErrorKind::MalformedHeader);
}

#[test]
fn test_bad_magic() {
    let temp = TempDir::new().unwrap();
    let pak = stored_archive(&temp);
    patch(&pak, |bytes| bytes[..4].copy_from_slice(b"ZIPX"));
    assert_eq!(open_kind(&pak), ErrorKind::MalformedHeader);
}

#[test]
fn test_newer_version_is_rejected_before_index() {
    let temp = TempDir::new().unwrap();
    let pak = stored_archive(&temp);
    patch(&pak, |bytes| {
        bytes[4..8].copy_from_slice(&3u32.to_le_bytes());
        // Also break the index checksum; the version must still win
        bytes[32] ^= 0xff;
    });

    let err = PakReader::open(&pak).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedVersion);
    assert!(err.to_string().contains('3'));

    let err = unpack(&pak, temp.path().join("out")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedVersion);
}

#[test]
fn test_corrupt_index() {
    let temp = TempDir::new().unwrap();
    let pak = stored_archive(&temp);
    let bytes = std::fs::read(&pak).unwrap();
    let index_offset = u64::from_le_bytes(bytes[20..28].try_into().unwrap()) as usize;

    let flipped = temp.path().join("flipped.pak");
    let mut damaged = bytes.clone();
    damaged[index_offset + 2] ^= 0x01;
    std::fs::write(&flipped, damaged).unwrap();
    assert_eq!(open_kind(&flipped), ErrorKind::MalformedIndex);

    let truncated = temp.path().join("truncated.pak");
    std::fs::write(&truncated, &bytes[..bytes.len() - 10]).unwrap();
    assert_eq!(open_kind(&truncated), ErrorKind::MalformedIndex);
}

#[test]
fn test_incompressible_entries_survive() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    write_tree(&src, &[("noise.bin", noise(10_000, 3))]);

    let pak = temp.path().join("noise.pak");
    let opts = PackageOptions::builder().solid(false).build().unwrap();
    pack(&src, &pak, &opts).unwrap();

    let entries = PakOperations::list_detailed(&pak).unwrap();
    assert_eq!(entries[0].compression, CompressionMethod::None);
    assert_eq!(entries[0].size_compressed, 10_000);
    assert_eq!(
        PakOperations::read_file_bytes(&pak, "noise.bin").unwrap(),
        noise(10_000, 3)
    );
}
