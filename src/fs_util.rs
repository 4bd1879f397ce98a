use std::fs;
use std::io;

use camino::Utf8Path;
use flate2::read::GzDecoder;

use crate::error::ImportError;

/// Spot-checks that a staged source is a readable gzip stream. Zero-byte
/// files are valid-but-empty: the center delivers them for cells with no
/// reads in a lane.
pub fn validate_gzip(path: &Utf8Path) -> Result<(), ImportError> {
    let metadata = fs::metadata(path.as_std_path())
        .map_err(|err| ImportError::Filesystem(format!("stat {path}: {err}")))?;
    if metadata.len() == 0 {
        return Ok(());
    }

    let file = fs::File::open(path.as_std_path())
        .map_err(|err| ImportError::Filesystem(format!("open {path}: {err}")))?;
    let mut decoder = GzDecoder::new(file);
    io::copy(&mut decoder, &mut io::sink())
        .map_err(|err| ImportError::CorruptGzip(format!("{path}: {err}")))?;
    Ok(())
}

/// Copies a file and verifies post-copy size equality.
pub fn copy_with_size_check(source: &Utf8Path, dest: &Utf8Path) -> Result<u64, ImportError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| ImportError::Filesystem(err.to_string()))?;
    }
    let expected = fs::metadata(source.as_std_path())
        .map_err(|err| ImportError::Filesystem(format!("stat {source}: {err}")))?
        .len();
    let copied = fs::copy(source.as_std_path(), dest.as_std_path())
        .map_err(|err| ImportError::Filesystem(format!("copy {source}: {err}")))?;
    if copied != expected {
        return Err(ImportError::CopySizeMismatch {
            path: dest.to_string(),
            expected,
            copied,
        });
    }
    Ok(copied)
}

/// Writes a text artifact through a temp file and rename, so a crashed run
/// never leaves a truncated report behind.
pub fn write_text_atomic(path: &Utf8Path, content: &str) -> Result<(), ImportError> {
    let parent = path
        .parent()
        .ok_or_else(|| ImportError::Filesystem(format!("no parent directory for {path}")))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| ImportError::Filesystem(err.to_string()))?;
    let temp = tempfile::Builder::new()
        .prefix("fqimport-report")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| ImportError::Filesystem(err.to_string()))?;
    fs::write(temp.path(), content.as_bytes())
        .map_err(|err| ImportError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| ImportError::Filesystem(err.to_string()))?;
    Ok(())
}
