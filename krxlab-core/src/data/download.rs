//! Flat-file download: fetch a table's published CSV into the local data dir.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use super::provider::DataError;

/// Download `url` to `dest`, writing through a `.tmp` file and renaming into place.
///
/// Returns the number of bytes written.
pub fn download_flat_file(url: &str, dest: &Path, timeout: Duration) -> Result<u64, DataError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| DataError::Cache(format!("failed to create dir: {e}")))?;
    }

    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;

    let resp = client.get(url).send().map_err(|e| {
        if e.is_connect() || e.is_timeout() {
            DataError::NetworkUnreachable(e.to_string())
        } else {
            DataError::Other(e.to_string())
        }
    })?;

    let status = resp.status();
    if !status.is_success() {
        return Err(DataError::Other(format!("HTTP {status} downloading {url}")));
    }

    let bytes = resp
        .bytes()
        .map_err(|e| DataError::NetworkUnreachable(format!("reading body of {url}: {e}")))?;

    let tmp_path = dest.with_extension("csv.tmp");
    let mut file = fs::File::create(&tmp_path)
        .map_err(|e| DataError::Cache(format!("create {}: {e}", tmp_path.display())))?;
    file.write_all(&bytes)
        .map_err(|e| DataError::Cache(format!("write {}: {e}", tmp_path.display())))?;
    drop(file);

    fs::rename(&tmp_path, dest).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        DataError::Cache(format!("atomic rename failed: {e}"))
    })?;

    tracing::info!(url, path = %dest.display(), bytes = bytes.len(), "downloaded flat file");
    Ok(bytes.len() as u64)
}
