//! Shared fixtures: synthetic MP4 files and scan configurations.

use std::fs;
use std::path::{Path, PathBuf};

use vidupe::config::Config;

fn mp4_box(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
    out.extend_from_slice(kind);
    out.extend_from_slice(payload);
    out
}

/// A minimal MP4 with one video track; `body` fills the mdat box so
/// different bodies give different content hashes.
pub fn mp4(duration_ms: u32, width: u16, height: u16, body: &[u8]) -> Vec<u8> {
    let mut mvhd = vec![0u8; 12];
    mvhd.extend_from_slice(&1000u32.to_be_bytes());
    mvhd.extend_from_slice(&duration_ms.to_be_bytes());
    mvhd.extend_from_slice(&[0u8; 80]);

    let mut tkhd = vec![0u8; 76];
    tkhd.extend_from_slice(&(u32::from(width) << 16).to_be_bytes());
    tkhd.extend_from_slice(&(u32::from(height) << 16).to_be_bytes());

    let mut hdlr = vec![0u8; 8];
    hdlr.extend_from_slice(b"vide");
    hdlr.extend_from_slice(&[0u8; 13]);

    let mut entry = vec![0u8; 24];
    entry.extend_from_slice(&width.to_be_bytes());
    entry.extend_from_slice(&height.to_be_bytes());
    entry.extend_from_slice(&[0u8; 50]);
    let mut stsd = vec![0u8; 4];
    stsd.extend_from_slice(&1u32.to_be_bytes());
    stsd.extend_from_slice(&mp4_box(b"avc1", &entry));

    let minf = mp4_box(b"minf", &mp4_box(b"stbl", &mp4_box(b"stsd", &stsd)));
    let mut mdia = mp4_box(b"hdlr", &hdlr);
    mdia.extend_from_slice(&minf);
    let mut trak = mp4_box(b"tkhd", &tkhd);
    trak.extend_from_slice(&mp4_box(b"mdia", &mdia));
    let mut moov = mp4_box(b"mvhd", &mvhd);
    moov.extend_from_slice(&mp4_box(b"trak", &trak));

    let mut out = mp4_box(b"ftyp", b"isom\0\0\x02\0isomiso2");
    out.extend_from_slice(&mp4_box(b"moov", &moov));
    out.extend_from_slice(&mp4_box(b"mdat", body));
    out
}

/// Write `data` to `dir/name` and return the path.
pub fn write(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, data).unwrap();
    path
}

/// Quiet two-worker configuration scanning `root` with its cache at
/// `cache_path`.
pub fn config(root: &Path, cache_path: &Path) -> Config {
    Config {
        roots: vec![root.to_path_buf()],
        cache_path: Some(cache_path.to_path_buf()),
        workers: 2,
        quiet: true,
        ..Config::default()
    }
}

/// File names of the members of every group in a JSON report.
pub fn group_names(report: &serde_json::Value) -> Vec<Vec<String>> {
    report["groups"]
        .as_array()
        .unwrap()
        .iter()
        .map(|g| {
            g["members"]
                .as_array()
                .unwrap()
                .iter()
                .map(|m| file_name(m["path"].as_str().unwrap()))
                .collect()
        })
        .collect()
}

pub fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .unwrap()
        .to_string_lossy()
        .into_owned()
}
