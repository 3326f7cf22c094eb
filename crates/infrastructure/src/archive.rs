//! Model definition archives stored alongside experiments.

use std::fs;
use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use intg_errors::{HarnessError, HarnessResult};

/// Pack the regular files directly inside `dir`, in name order, into a
/// gzip-compressed tar archive. Subdirectories are skipped.
pub fn read_model_definition(dir: impl AsRef<Path>) -> HarnessResult<Vec<u8>> {
    let dir = dir.as_ref();
    let io_error = |what: &str, e: std::io::Error| {
        HarnessError::archive(format!("{what} {}: {e}", dir.display()))
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| io_error("failed to read", e))? {
        let entry = entry.map_err(|e| io_error("failed to read", e))?;
        let metadata = entry.metadata().map_err(|e| io_error("failed to stat entry in", e))?;
        if metadata.is_file() {
            files.push((entry.file_name().to_string_lossy().into_owned(), metadata));
        }
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, metadata) in files {
        let contents =
            fs::read(dir.join(&name)).map_err(|e| io_error(&format!("failed to read {name} in"), e))?;

        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(file_mode(&metadata));
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(0);
        builder
            .append_data(&mut header, &name, contents.as_slice())
            .map_err(|e| HarnessError::archive(format!("failed to add {name} to archive: {e}")))?;
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| HarnessError::archive(format!("failed to finish archive: {e}")))?;
    encoder
        .finish()
        .map_err(|e| HarnessError::archive(format!("failed to compress archive: {e}")))
}

/// Unpack an archive produced by [`read_model_definition`] into
/// `(path, contents)` pairs.
pub fn read_archive_entries(bytes: &[u8]) -> HarnessResult<Vec<(String, Vec<u8>)>> {
    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    let mut out = Vec::new();
    let entries = archive
        .entries()
        .map_err(|e| HarnessError::archive(format!("invalid archive: {e}")))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| HarnessError::archive(format!("invalid archive entry: {e}")))?;
        let path = entry
            .path()
            .map_err(|e| HarnessError::archive(format!("invalid archive path: {e}")))?
            .to_string_lossy()
            .into_owned();
        let mut contents = Vec::new();
        entry
            .read_to_end(&mut contents)
            .map_err(|e| HarnessError::archive(format!("failed to read {path}: {e}")))?;
        out.push((path, contents));
    }
    Ok(out)
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn file_mode(_metadata: &fs::Metadata) -> u32 {
    0o644
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_archive_contains_top_level_files_in_order() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("model_def.py"), b"print('hi')\n").unwrap();
        fs::write(dir.path().join("const.yaml"), b"name: const\n").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("ignored.txt"), b"x").unwrap();

        let bytes = read_model_definition(dir.path()).unwrap();
        let entries = read_archive_entries(&bytes).unwrap();

        let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["const.yaml", "model_def.py"]);
        assert_eq!(entries[1].1, b"print('hi')\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_archive_keeps_permission_bits() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let script = dir.path().join("run.sh");
        fs::write(&script, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let bytes = read_model_definition(dir.path()).unwrap();
        let mut archive = tar::Archive::new(GzDecoder::new(bytes.as_slice()));
        let entry = archive.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(entry.header().mode().unwrap(), 0o755);
    }

    #[test]
    fn test_missing_directory_is_archive_error() {
        let err = read_model_definition("/definitely/not/here").unwrap_err();
        assert!(matches!(err, HarnessError::Archive(_)));
    }

    #[test]
    fn test_bundled_model_definition_archives() {
        let bytes = read_model_definition(intg_core::DEFAULT_MODEL_DEFINITION_PATH).unwrap();
        let entries = read_archive_entries(&bytes).unwrap();
        assert!(entries.iter().any(|(name, _)| name == "model_def.py"));
    }
}
