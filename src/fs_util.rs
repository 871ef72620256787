use std::fs;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use tempfile::NamedTempFile;

use crate::error::LocusError;

pub fn open_text(path: &Path) -> Result<Box<dyn BufRead>, LocusError> {
    let file = fs::File::open(path)
        .map_err(|err| LocusError::Filesystem(format!("open {}: {err}", path.display())))?;
    let is_gzip = path.extension().map(|ext| ext == "gz").unwrap_or(false);
    if is_gzip {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

pub fn read_maybe_gzip(path: &Path) -> Result<Vec<u8>, LocusError> {
    let raw = fs::read(path)
        .map_err(|err| LocusError::Filesystem(format!("read {}: {err}", path.display())))?;
    if raw.starts_with(&[0x1f, 0x8b]) {
        let mut content = Vec::new();
        MultiGzDecoder::new(raw.as_slice())
            .read_to_end(&mut content)
            .map_err(|err| LocusError::Filesystem(format!("gunzip {}: {err}", path.display())))?;
        return Ok(content);
    }
    Ok(raw)
}

pub fn gzip(content: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content)?;
    encoder.finish()
}

pub fn write_atomic(path: &Path, content: &[u8]) -> Result<(), LocusError> {
    let temp = stage(path, content)?;
    temp.persist(path)
        .map_err(|err| LocusError::Filesystem(err.to_string()))?;
    Ok(())
}

/// Like [`write_atomic`] but never replaces an existing file. Returns `false`
/// when `path` already existed and nothing was written.
pub fn write_new_atomic(path: &Path, content: &[u8]) -> Result<bool, LocusError> {
    let temp = stage(path, content)?;
    match temp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(LocusError::Filesystem(err.to_string())),
    }
}

fn stage(path: &Path, content: &[u8]) -> Result<NamedTempFile, LocusError> {
    let parent = path
        .parent()
        .ok_or_else(|| LocusError::Filesystem("invalid destination path".to_string()))?;
    fs::create_dir_all(parent).map_err(|err| LocusError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix("locus-entry")
        .tempfile_in(parent)
        .map_err(|err| LocusError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| LocusError::Filesystem(err.to_string()))?;
    temp.as_file()
        .sync_all()
        .map_err(|err| LocusError::Filesystem(err.to_string()))?;
    Ok(temp)
}
