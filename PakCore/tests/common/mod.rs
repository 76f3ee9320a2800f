#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;

use walkdir::WalkDir;

/// Route library logs to the test harness output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Write `files` (relative path, content) under `root`.
pub fn write_tree(root: &Path, files: &[(&str, Vec<u8>)]) {
    for (path, data) in files {
        let target = root.join(path);
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(target, data).unwrap();
    }
}

/// Every regular file under `root`, keyed by forward-slash relative path.
pub fn read_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .map(Result::unwrap)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let relative = e.path().strip_prefix(root).unwrap();
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            (key, std::fs::read(e.path()).unwrap())
        })
        .collect()
}

/// Deterministic pseudo-random bytes that do not compress.
pub fn noise(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

/// A small mod-like tree: nested text, an empty file and some binary data.
pub fn sample_files() -> Vec<(&'static str, Vec<u8>)> {
    let localization = "<contentList><content contentuid=\"h01\">Hello</content></contentList>\n"
        .repeat(400)
        .into_bytes();
    vec![
        ("Mods/Sample/meta.lsx", b"<?xml version=\"1.0\"?><save/>".to_vec()),
        ("Mods/Sample/Localization/English.xml", localization),
        ("Public/Sample/Assets/empty.txt", Vec::new()),
        ("Public/Sample/Assets/texture.bin", noise(40_000, 7)),
        ("Public/Sample/Stats/Generated/Data/Spell.txt", b"new entry \"Target_Sample\"\n".to_vec()),
        ("readme.md", b"# Sample\n".to_vec()),
    ]
}
