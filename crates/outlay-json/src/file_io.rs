//! JSON document I/O for the file-backed store.
//!
//! Writes go to a sibling temp file which is then renamed over the target,
//! so a single document is never observed half-written. Two documents are
//! still written one after the other.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};

use outlay_core::StoreError;

fn with_path(path: &Path, action: &str, err: io::Error) -> StoreError {
    StoreError::Io(io::Error::new(
        err.kind(),
        format!("failed to {} {}: {}", action, path.display(), err),
    ))
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let file = File::open(path).map_err(|e| with_path(path, "open", e))?;
    let data = serde_json::from_reader(BufReader::new(file)).map_err(|source| {
        StoreError::MalformedDocument {
            path: path.to_path_buf(),
            source,
        }
    })?;
    tracing::debug!(path = %path.display(), "Read document");
    Ok(data)
}

pub fn write_json<T: Serialize>(path: &Path, data: &T) -> Result<(), StoreError> {
    let temp_path = path.with_extension("json.tmp");

    let file = File::create(&temp_path).map_err(|e| with_path(&temp_path, "create", e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, data)?;
    writer.flush().map_err(|e| with_path(&temp_path, "flush", e))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| with_path(&temp_path, "sync", e))?;

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        with_path(path, "replace", e)
    })?;
    tracing::debug!(path = %path.display(), "Wrote document");
    Ok(())
}
