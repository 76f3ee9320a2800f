mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use pakcore::compression::CompressionMethod;
use pakcore::pak::{
    EntrySource, ExtractOptions, IndexBuilder, PackageFlags, PackageOptions, PackageVersion,
    PakOperations, PakPhase, PakReader, PakWriter,
};
use pakcore::{ErrorKind, pack, unpack};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use common::{init_tracing, noise, read_tree, sample_files, write_tree};

fn options(compression: CompressionMethod, solid: bool) -> PackageOptions {
    PackageOptions::builder()
        .compression(compression)
        .solid(solid)
        .build()
        .unwrap()
}

#[test]
fn test_round_trip_all_modes() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    write_tree(&src, &sample_files());
    let expected = read_tree(&src);

    for compression in [CompressionMethod::None, CompressionMethod::Zlib, CompressionMethod::Lz4] {
        for solid in [false, true] {
            let label = format!("{}-{}", compression.as_str(), if solid { "solid" } else { "plain" });
            let pak = temp.path().join(format!("{label}.pak"));
            let out = temp.path().join(&label);

            pack(&src, &pak, &options(compression, solid)).unwrap();
            let summary = unpack(&pak, &out).unwrap();

            assert!(summary.is_complete(), "{label}: {summary:?}");
            assert_eq!(summary.succeeded, expected.len(), "{label}");
            assert_eq!(read_tree(&out), expected, "{label}");
        }
    }
}

#[test]
fn test_round_trip_fast_compression_and_v1() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    write_tree(&src, &sample_files());

    let fast = PackageOptions::builder()
        .compression(CompressionMethod::Zlib)
        .fast_compression(true)
        .build()
        .unwrap();
    let v1 = PackageOptions::builder()
        .version(PackageVersion::V1)
        .solid(false)
        .build()
        .unwrap();

    for (name, opts) in [("fast", fast), ("v1", v1)] {
        let pak = temp.path().join(format!("{name}.pak"));
        pack(&src, &pak, &opts).unwrap();
        unpack(&pak, temp.path().join(name)).unwrap();
        assert_eq!(read_tree(&temp.path().join(name)), read_tree(&src), "{name}");
    }

    let info = PakOperations::info(temp.path().join("v1.pak")).unwrap();
    assert_eq!(info.version, 1);
    assert_eq!(info.block_count, 0);
}

#[test]
fn test_pack_is_deterministic() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    write_tree(&src, &sample_files());

    let first = temp.path().join("first.pak");
    let second = temp.path().join("second.pak");
    pack(&src, &first, &PackageOptions::default()).unwrap();
    pack(&src, &second, &PackageOptions::default()).unwrap();
    assert_eq!(std::fs::read(&first).unwrap(), std::fs::read(&second).unwrap());

    // Unpacking and repacking reproduces the same archive
    let out = temp.path().join("out");
    unpack(&first, &out).unwrap();
    let third = temp.path().join("third.pak");
    pack(&out, &third, &PackageOptions::default()).unwrap();
    assert_eq!(std::fs::read(&first).unwrap(), std::fs::read(&third).unwrap());
}

#[test]
fn test_solid_not_larger_than_independent() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    let files: Vec<(String, Vec<u8>)> = (0..200)
        .map(|i| {
            (
                format!("Stats/Generated/Data/Spell_{i:03}.txt"),
                format!(
                    "new entry \"Projectile_Fireball_{i}\"\ntype \"SpellData\"\n\
                     data \"SpellType\" \"Projectile\"\ndata \"Level\" \"3\"\n"
                )
                .into_bytes(),
            )
        })
        .collect();
    let borrowed: Vec<(&str, Vec<u8>)> = files.iter().map(|(p, d)| (p.as_str(), d.clone())).collect();
    write_tree(&src, &borrowed);

    let solid = temp.path().join("solid.pak");
    let plain = temp.path().join("plain.pak");
    pack(&src, &solid, &options(CompressionMethod::Lz4, true)).unwrap();
    pack(&src, &plain, &options(CompressionMethod::Lz4, false)).unwrap();

    let solid_info = PakOperations::info(&solid).unwrap();
    let plain_info = PakOperations::info(&plain).unwrap();
    assert!(solid_info.solid);
    assert_eq!(solid_info.block_count, 1);
    assert!(
        solid_info.total_compressed <= plain_info.total_compressed,
        "solid {} > independent {}",
        solid_info.total_compressed,
        plain_info.total_compressed
    );
    assert!(std::fs::metadata(&solid).unwrap().len() <= std::fs::metadata(&plain).unwrap().len());
}

#[test]
fn test_small_solid_blocks_round_trip() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    write_tree(&src, &sample_files());

    let pak = temp.path().join("blocks.pak");
    let opts = PackageOptions::builder().solid_block_size(1024).build().unwrap();
    pack(&src, &pak, &opts).unwrap();

    let reader = PakReader::open(&pak).unwrap();
    assert!(reader.index().blocks().len() > 1);
    let out = temp.path().join("out");
    reader.extract_all(&out, &ExtractOptions::default()).unwrap();
    assert_eq!(read_tree(&out), read_tree(&src));
}

#[test]
fn test_case_collision_is_duplicate() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    write_tree(&src, &[("a/b.txt", b"lower".to_vec()), ("A/b.txt", b"upper".to_vec())]);

    let pak = temp.path().join("dup.pak");
    let err = pack(&src, &pak, &PackageOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateEntry);
    assert!(!pak.exists());
}

#[test]
fn test_source_errors() {
    let temp = TempDir::new().unwrap();
    let pak = temp.path().join("out.pak");

    let err = pack(temp.path().join("missing"), &pak, &PackageOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SourceNotFound);

    let empty = temp.path().join("empty");
    std::fs::create_dir_all(empty.join("nested")).unwrap();
    let err = pack(&empty, &pak, &PackageOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmptySource);
    assert!(!pak.exists());

    let allow = PackageOptions::builder().allow_empty(true).build().unwrap();
    pack(&empty, &pak, &allow).unwrap();
    assert!(PakOperations::list(&pak).unwrap().is_empty());
    let summary = unpack(&pak, temp.path().join("unpacked")).unwrap();
    assert_eq!(summary.total(), 0);
}

#[test]
fn test_failed_write_leaves_no_output() {
    let temp = TempDir::new().unwrap();
    let out_dir = temp.path().join("out");
    std::fs::create_dir_all(&out_dir).unwrap();

    let mut builder = IndexBuilder::new();
    builder
        .add_entry("present.txt", EntrySource::Bytes(b"here".to_vec()))
        .unwrap();
    builder
        .add_entry("vanished.txt", EntrySource::File(temp.path().join("does-not-exist")))
        .unwrap();

    let pak = out_dir.join("broken.pak");
    let writer = PakWriter::from_builder(builder, PackageOptions::default()).unwrap();
    let err = writer.write(&pak).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::IoRead);
    assert!(!pak.exists());
    assert_eq!(std::fs::read_dir(&out_dir).unwrap().count(), 0);
}

#[test]
fn test_selective_extraction() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    write_tree(&src, &sample_files());
    let pak = temp.path().join("sample.pak");
    pack(&src, &pak, &PackageOptions::default()).unwrap();

    let out = temp.path().join("subset");
    let summary = PakOperations::extract_files(
        &pak,
        &out,
        &["MODS/sample/META.LSX", "readme.md", "Readme.md"],
    )
    .unwrap();
    assert_eq!(summary.succeeded, 2);
    let tree = read_tree(&out);
    assert_eq!(tree.keys().collect::<Vec<_>>(), ["Mods/Sample/meta.lsx", "readme.md"]);

    let err = PakOperations::extract_files(&pak, &out, &["readme.md", "nope.txt"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EntryNotFound);

    let single = temp.path().join("single/texture.bin");
    PakOperations::extract_one(&pak, "Public\\Sample\\Assets\\texture.bin", &single).unwrap();
    assert_eq!(std::fs::read(&single).unwrap(), noise(40_000, 7));

    let bytes = PakOperations::read_file_bytes(&pak, "readme.md").unwrap();
    assert_eq!(bytes, b"# Sample\n");
    let err = PakOperations::read_file_bytes(&pak, "missing.md").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EntryNotFound);
}

#[test]
fn test_cancellation_skips_remaining_entries() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    let files: Vec<(String, Vec<u8>)> =
        (0..10).map(|i| (format!("file_{i}.txt"), vec![b'a' + i as u8; 100])).collect();
    let borrowed: Vec<(&str, Vec<u8>)> = files.iter().map(|(p, d)| (p.as_str(), d.clone())).collect();
    write_tree(&src, &borrowed);

    // One solid block, so members are extracted in order
    let pak = temp.path().join("cancel.pak");
    pack(&src, &pak, &PackageOptions::default()).unwrap();
    let reader = PakReader::open(&pak).unwrap();
    assert_eq!(reader.index().blocks().len(), 1);

    let cancel = Arc::new(AtomicBool::new(false));
    let options = ExtractOptions::new().with_cancel_flag(Arc::clone(&cancel));
    let out = temp.path().join("out");
    let summary = reader
        .extract_all_with_progress(&out, &options, &|progress| {
            if progress.phase == PakPhase::DecompressingFiles {
                cancel.store(true, Ordering::SeqCst);
            }
        })
        .unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.skipped, 9);
    assert!(!summary.is_complete());
    assert_eq!(read_tree(&out).len(), 1);

    // Already cancelled: nothing is written
    let out = temp.path().join("out2");
    let summary = reader.extract_all(&out, &options).unwrap();
    assert_eq!(summary.skipped, 10);
    assert!(read_tree(&out).is_empty());
}

#[test]
fn test_mapped_and_buffered_reads_agree() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    write_tree(&src, &sample_files());

    let mapped_pak = temp.path().join("mapped.pak");
    pack(&src, &mapped_pak, &PackageOptions::default()).unwrap();

    let unmapped_pak = temp.path().join("unmapped.pak");
    let no_mmap = PackageOptions::builder()
        .flags(PackageFlags::SOLID)
        .build()
        .unwrap();
    pack(&src, &unmapped_pak, &no_mmap).unwrap();

    let mapped = PakReader::open(&mapped_pak).unwrap();
    let buffered = PakReader::from_reader(std::fs::File::open(&mapped_pak).unwrap()).unwrap();
    let unmapped = PakReader::open(&unmapped_pak).unwrap();
    assert!(mapped.is_memory_mapped());
    assert!(!buffered.is_memory_mapped());
    assert!(!unmapped.is_memory_mapped());

    for entry in mapped.iter_all() {
        let expected = mapped.read_entry(&entry.path).unwrap();
        assert_eq!(buffered.read_entry(&entry.path).unwrap(), expected);
        assert_eq!(unmapped.read_entry(&entry.path).unwrap(), expected);
    }
}

#[test]
fn test_list_and_info() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    write_tree(&src, &sample_files());
    let pak = temp.path().join("sample.pak");
    let opts = PackageOptions::builder().priority(42).build().unwrap();
    pack(&src, &pak, &opts).unwrap();

    let listed = PakOperations::list(&pak).unwrap();
    let mut sorted = listed.clone();
    sorted.sort();
    assert_eq!(listed, sorted);
    assert_eq!(listed.len(), sample_files().len());

    let detailed = PakOperations::list_detailed(&pak).unwrap();
    let empty = detailed.iter().find(|e| e.path.ends_with("empty.txt")).unwrap();
    assert_eq!(empty.size_decompressed, 0);
    assert!(detailed.iter().all(|e| e.block == Some(0)));

    let info = PakOperations::info(&pak).unwrap();
    assert_eq!(info.version, 2);
    assert_eq!(info.priority, 42);
    assert!(info.solid && info.allow_memory_mapping && info.preload);
    assert_eq!(info.entry_count, listed.len());
    assert_eq!(info.archive_size, std::fs::metadata(&pak).unwrap().len());
}

#[test]
fn test_options_from_json() {
    let options: PackageOptions =
        serde_json::from_str(r#"{"compression": "zlib", "solid": false, "priority": 7}"#).unwrap();
    assert_eq!(options.compression(), CompressionMethod::Zlib);
    assert!(!options.is_solid());
    assert_eq!(options.priority(), 7);

    let err = serde_json::from_str::<PackageOptions>(r#"{"priority": 300}"#).unwrap_err();
    assert!(err.to_string().contains("priority"));
}
