use pipetar::archive::{encode_path, records, Block};
use pipetar::{create_archive, extract_archive, ArchiverError, Config};
use std::fs;
use std::io::Cursor;
use tempfile::tempdir;

fn sample_archive() -> (tempfile::TempDir, Vec<u8>) {
    let src = tempdir().unwrap();
    fs::write(src.path().join("a.txt"), vec![b'a'; 10_000]).unwrap();
    fs::write(src.path().join("b.txt"), vec![b'b'; 3_000]).unwrap();
    let mut archive = Vec::new();
    let config = Config { block_size: 1024, ..Config::default() };
    create_archive(&[src.path()], &mut archive, &config).unwrap();
    (src, archive)
}

/// Byte offsets where each record starts, plus the total length.
fn record_boundaries(archive: &[u8]) -> Vec<usize> {
    let mut offsets = vec![0];
    let mut pos = 0;
    for block in records(Cursor::new(archive)) {
        let block = block.unwrap();
        pos += 2 + encode_path(block.path()).len() + 1;
        if let Block::Data { data, .. } = &block {
            pos += 2 + data.len();
        }
        offsets.push(pos);
    }
    assert_eq!(pos, archive.len());
    offsets
}

#[test]
fn truncation_mid_record_aborts_extraction() {
    let (_src, archive) = sample_archive();
    let boundaries = record_boundaries(&archive);

    for window in boundaries.windows(2).step_by(3) {
        let cut = window[0] + (window[1] - window[0]) / 2;
        let out = tempdir().unwrap();
        let result = extract_archive(Cursor::new(archive[..cut].to_vec()), out.path(), &Config::default());
        assert!(matches!(result, Err(ArchiverError::Truncated(_))), "cut at {} gave {:?}", cut, result);
    }
}

#[test]
fn truncation_at_record_boundary_with_open_files_aborts() {
    let (_src, archive) = sample_archive();
    let boundaries = record_boundaries(&archive);
    let cut = boundaries[boundaries.len() - 2];

    let out = tempdir().unwrap();
    let result = extract_archive(Cursor::new(archive[..cut].to_vec()), out.path(), &Config::default());
    assert!(matches!(result, Err(ArchiverError::Unterminated(1))));
}

#[test]
fn unrecognized_flag_aborts_extraction() {
    let (_src, mut archive) = sample_archive();
    let path_len = u16::from_be_bytes([archive[0], archive[1]]) as usize;
    archive[2 + path_len] = 0b1000_0000;

    let out = tempdir().unwrap();
    let result = extract_archive(Cursor::new(archive), out.path(), &Config::default());
    assert!(matches!(result, Err(ArchiverError::UnknownFlag(0b1000_0000))));
}

#[test]
fn garbage_is_rejected() {
    let out = tempdir().unwrap();
    let result = extract_archive(Cursor::new(b"\x00\x03abc\x07".to_vec()), out.path(), &Config::default());
    assert!(matches!(result, Err(ArchiverError::UnknownFlag(7))));
}
