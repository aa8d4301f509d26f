//! Snapshot records and local file persistence for them.
//!
//! File snapshots live at
//! `<base_dir>/snapshots/<actor_type>/<actor_id>/snapshot.json`.
//! Writes are atomic via a temp-rename pattern so a crash mid-write never
//! leaves a torn snapshot behind.

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, PersistenceError};

/// A materialized actor state as of a position in its event log.
///
/// `sequence` is the number of events folded into `state`; replay resumes
/// with the event at `sequence + 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Serialized actor state.
    pub state: serde_json::Value,
    /// Sequence of the last event reflected in `state`.
    pub sequence: u64,
}

/// Write `snapshot` to `path` atomically.
///
/// # Errors
///
/// Returns [`PersistenceError`] if directory creation, writing, or the
/// rename fails.
pub(crate) async fn write_snapshot_file(
    path: &Path,
    snapshot: &SnapshotRecord,
) -> Result<(), PersistenceError> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }

    let tmp_path = path.with_extension("json.tmp");
    let json = serde_json::to_vec_pretty(snapshot).map_err(CodecError::from)?;
    tokio::fs::write(&tmp_path, &json).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

/// Read the snapshot at `path`.
///
/// A missing file or one that does not parse is a cache miss (`Ok(None)`);
/// parse failures are logged. Only unexpected I/O failures are errors.
pub(crate) async fn read_snapshot_file(
    path: &Path,
) -> Result<Option<SnapshotRecord>, PersistenceError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_slice::<SnapshotRecord>(&bytes) {
        Ok(snap) => Ok(Some(snap)),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to deserialize snapshot; treating as cache miss"
            );
            Ok(None)
        }
    }
}
