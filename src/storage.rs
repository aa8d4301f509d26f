//! The storage collaborator interface and the on-disk backend.

use std::fmt;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use uuid::Uuid;

use crate::error::{CodecError, PersistenceError};
use crate::event::EventRecord;
use crate::snapshot::{SnapshotRecord, read_snapshot_file, write_snapshot_file};

/// Address of one actor's event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId {
    /// The actor type (its `ACTOR_TYPE`).
    pub actor_type: &'static str,
    /// The actor instance identity.
    pub actor_id: Uuid,
}

impl StreamId {
    /// Build a stream address.
    pub fn new(actor_type: &'static str, actor_id: Uuid) -> Self {
        Self {
            actor_type,
            actor_id,
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.actor_type, self.actor_id)
    }
}

/// Durable append-only log plus snapshot store.
///
/// The engine only ever appends and reads; records are never rewritten or
/// deleted. Implementations must return events in append order.
#[async_trait::async_trait]
pub trait EventStorage: Send + Sync + 'static {
    /// Append one record to the stream.
    async fn append(&self, stream: &StreamId, record: &EventRecord) -> Result<(), PersistenceError>;

    /// Read, in order, every record with `sequence > after`.
    async fn read_events(
        &self,
        stream: &StreamId,
        after: u64,
    ) -> Result<Vec<EventRecord>, PersistenceError>;

    /// Load the latest snapshot, if any.
    async fn load_snapshot(&self, stream: &StreamId)
    -> Result<Option<SnapshotRecord>, PersistenceError>;

    /// Replace the stream's snapshot.
    async fn write_snapshot(
        &self,
        stream: &StreamId,
        snapshot: &SnapshotRecord,
    ) -> Result<(), PersistenceError>;
}

/// Name of the per-stream event log file.
const EVENTS_FILE: &str = "events.jsonl";

/// Manages the on-disk directory layout for actor streams.
///
/// The layout follows this structure:
/// ```text
/// <base_dir>/
///     streams/
///         <actor_type>/
///             <actor_id>/
///                 events.jsonl    -- one EventRecord per line
///     snapshots/
///         <actor_type>/
///             <actor_id>/
///                 snapshot.json
/// ```
#[derive(Debug, Clone)]
pub struct StreamLayout {
    base_dir: PathBuf,
}

impl StreamLayout {
    /// Create a layout rooted at `base_dir`. Directories are created lazily.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Returns the root directory of this layout.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// `<base_dir>/streams/<actor_type>/<actor_id>`
    pub fn stream_dir(&self, stream: &StreamId) -> PathBuf {
        self.base_dir
            .join("streams")
            .join(stream.actor_type)
            .join(stream.actor_id.to_string())
    }

    /// `<base_dir>/streams/<actor_type>/<actor_id>/events.jsonl`
    pub fn events_path(&self, stream: &StreamId) -> PathBuf {
        self.stream_dir(stream).join(EVENTS_FILE)
    }

    /// `<base_dir>/snapshots/<actor_type>/<actor_id>/snapshot.json`
    pub fn snapshot_path(&self, stream: &StreamId) -> PathBuf {
        self.base_dir
            .join("snapshots")
            .join(stream.actor_type)
            .join(stream.actor_id.to_string())
            .join("snapshot.json")
    }

    /// Create the stream directory if needed and return it. Idempotent.
    pub async fn ensure_stream(&self, stream: &StreamId) -> io::Result<PathBuf> {
        let dir = self.stream_dir(stream);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Lists all actor ids that have a stream directory for `actor_type`.
    ///
    /// Returns a sorted list; directories whose names are not UUIDs are
    /// skipped. An unknown actor type yields an empty list.
    pub async fn list_streams(&self, actor_type: &str) -> io::Result<Vec<Uuid>> {
        let type_dir = self.base_dir.join("streams").join(actor_type);

        let mut entries = match tokio::fs::read_dir(&type_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Ok(id) = Uuid::parse_str(&entry.file_name().to_string_lossy()) {
                ids.push(id);
            }
        }

        ids.sort();
        Ok(ids)
    }
}

/// File-backed [`EventStorage`] using [`StreamLayout`].
///
/// Each append writes a single JSON line and syncs it before returning, so
/// an acknowledged append survives a crash.
#[derive(Debug, Clone)]
pub struct FileStorage {
    layout: StreamLayout,
}

impl FileStorage {
    /// Store streams and snapshots under `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            layout: StreamLayout::new(base_dir),
        }
    }

    /// The directory layout in use.
    pub fn layout(&self) -> &StreamLayout {
        &self.layout
    }
}

/// Cut a torn trailing record (bytes after the last newline) off an event
/// log and return the resulting length.
///
/// A torn tail is left by a crash mid-append. It was never acknowledged, so
/// dropping it loses nothing, and the next record starts on a fresh line.
async fn trim_torn_tail(file: &mut tokio::fs::File, path: &Path) -> io::Result<u64> {
    let len = file.metadata().await?.len();
    if len == 0 {
        return Ok(0);
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1)).await?;
    file.read_exact(&mut last).await?;
    if last[0] == b'\n' {
        return Ok(len);
    }

    let mut contents = Vec::new();
    file.seek(SeekFrom::Start(0)).await?;
    file.read_to_end(&mut contents).await?;
    let keep = contents
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |i| i as u64 + 1);

    tracing::warn!(
        path = %path.display(),
        dropped_bytes = len - keep,
        "truncating torn trailing record"
    );
    file.set_len(keep).await?;
    file.sync_data().await?;
    Ok(keep)
}

#[async_trait::async_trait]
impl EventStorage for FileStorage {
    async fn append(
        &self,
        stream: &StreamId,
        record: &EventRecord,
    ) -> Result<(), PersistenceError> {
        let dir = self.layout.ensure_stream(stream).await?;

        let mut line = serde_json::to_vec(record).map_err(CodecError::from)?;
        line.push(b'\n');

        let path = dir.join(EVENTS_FILE);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await?;
        let end = trim_torn_tail(&mut file, &path).await?;
        file.seek(SeekFrom::Start(end)).await?;
        file.write_all(&line).await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn read_events(
        &self,
        stream: &StreamId,
        after: u64,
    ) -> Result<Vec<EventRecord>, PersistenceError> {
        let path = self.layout.events_path(stream);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        // A final line without its newline is a torn append from a crash; the
        // append was never acknowledged, so it is dropped.
        let complete = match contents.rfind('\n') {
            Some(end) => &contents[..=end],
            None => "",
        };
        if complete.len() < contents.len() {
            tracing::warn!(
                stream = %stream,
                path = %path.display(),
                "ignoring torn trailing record"
            );
        }

        let mut records = Vec::new();
        for line in complete.lines().filter(|l| !l.is_empty()) {
            let record: EventRecord = serde_json::from_str(line).map_err(CodecError::from)?;
            if record.sequence > after {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn load_snapshot(
        &self,
        stream: &StreamId,
    ) -> Result<Option<SnapshotRecord>, PersistenceError> {
        read_snapshot_file(&self.layout.snapshot_path(stream)).await
    }

    async fn write_snapshot(
        &self,
        stream: &StreamId,
        snapshot: &SnapshotRecord,
    ) -> Result<(), PersistenceError> {
        write_snapshot_file(&self.layout.snapshot_path(stream), snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tempfile::TempDir;

    use super::*;

    fn record(stream: &StreamId, sequence: u64) -> EventRecord {
        EventRecord {
            sequence,
            type_code: 1,
            aggregate_id: stream.actor_id,
            timestamp: Utc::now(),
            payload: serde_json::json!({"amount": sequence}),
        }
    }

    #[test]
    fn path_helpers_correct() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let layout = StreamLayout::new(tmp.path());
        let stream = StreamId::new("transfer", Uuid::nil());

        assert_eq!(layout.base_dir(), tmp.path());
        assert_eq!(
            layout.stream_dir(&stream),
            tmp.path()
                .join("streams/transfer/00000000-0000-0000-0000-000000000000")
        );
        assert_eq!(
            layout.events_path(&stream),
            layout.stream_dir(&stream).join("events.jsonl")
        );
        assert_eq!(
            layout.snapshot_path(&stream),
            tmp.path().join(
                "snapshots/transfer/00000000-0000-0000-0000-000000000000/snapshot.json"
            )
        );
    }

    #[test]
    fn stream_id_display() {
        let stream = StreamId::new("transfer", Uuid::nil());
        assert_eq!(
            stream.to_string(),
            "transfer/00000000-0000-0000-0000-000000000000"
        );
    }

    #[tokio::test]
    async fn ensure_stream_idempotent() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let layout = StreamLayout::new(tmp.path());
        let stream = StreamId::new("transfer", Uuid::new_v4());

        let first = layout.ensure_stream(&stream).await.expect("first ensure");
        let second = layout.ensure_stream(&stream).await.expect("second ensure");

        assert!(first.is_dir());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn list_streams_sorted_and_empty_for_unknown_type() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let layout = StreamLayout::new(tmp.path());

        assert!(layout.list_streams("transfer").await.expect("list").is_empty());

        let mut ids = vec![Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        for id in &ids {
            layout
                .ensure_stream(&StreamId::new("transfer", *id))
                .await
                .expect("ensure_stream should succeed");
        }
        ids.sort();

        assert_eq!(layout.list_streams("transfer").await.expect("list"), ids);
    }

    #[tokio::test]
    async fn append_then_read_tail() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let storage = FileStorage::new(tmp.path());
        let stream = StreamId::new("counter", Uuid::new_v4());

        for seq in 1..=4 {
            storage
                .append(&stream, &record(&stream, seq))
                .await
                .expect("append should succeed");
        }

        let all = storage.read_events(&stream, 0).await.expect("read all");
        assert_eq!(all.iter().map(|r| r.sequence).collect::<Vec<_>>(), [1, 2, 3, 4]);

        let tail = storage.read_events(&stream, 2).await.expect("read tail");
        assert_eq!(tail.iter().map(|r| r.sequence).collect::<Vec<_>>(), [3, 4]);
    }

    #[tokio::test]
    async fn read_unknown_stream_is_empty() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let storage = FileStorage::new(tmp.path());
        let stream = StreamId::new("counter", Uuid::new_v4());

        assert!(storage.read_events(&stream, 0).await.expect("read").is_empty());
        assert!(storage.load_snapshot(&stream).await.expect("load").is_none());
    }

    #[tokio::test]
    async fn torn_trailing_line_is_ignored() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let storage = FileStorage::new(tmp.path());
        let stream = StreamId::new("counter", Uuid::new_v4());

        storage
            .append(&stream, &record(&stream, 1))
            .await
            .expect("append should succeed");

        let path = storage.layout().events_path(&stream);
        let mut contents = std::fs::read_to_string(&path).expect("read log");
        contents.push_str("{\"sequence\":2,\"type_co");
        std::fs::write(&path, contents).expect("write torn log");

        let records = storage.read_events(&stream, 0).await.expect("read");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sequence, 1);
    }

    #[tokio::test]
    async fn append_after_torn_tail_starts_fresh_line() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let storage = FileStorage::new(tmp.path());
        let stream = StreamId::new("counter", Uuid::new_v4());

        storage
            .append(&stream, &record(&stream, 1))
            .await
            .expect("append should succeed");
        let path = storage.layout().events_path(&stream);
        let mut contents = std::fs::read_to_string(&path).expect("read log");
        contents.push_str("{\"sequence\":2,\"type_co");
        std::fs::write(&path, contents).expect("write torn log");

        storage
            .append(&stream, &record(&stream, 2))
            .await
            .expect("append over torn tail should succeed");
        storage
            .append(&stream, &record(&stream, 3))
            .await
            .expect("append should succeed");

        let records = storage.read_events(&stream, 0).await.expect("read");
        assert_eq!(
            records.iter().map(|r| r.sequence).collect::<Vec<_>>(),
            [1, 2, 3]
        );
        let log = std::fs::read_to_string(&path).expect("read log");
        assert_eq!(log.lines().count(), 3);
    }

    #[tokio::test]
    async fn append_over_fully_torn_log() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let storage = FileStorage::new(tmp.path());
        let stream = StreamId::new("counter", Uuid::new_v4());

        let dir = storage.layout().ensure_stream(&stream).await.expect("ensure");
        std::fs::write(dir.join("events.jsonl"), "{\"seq").expect("write torn log");

        storage
            .append(&stream, &record(&stream, 1))
            .await
            .expect("append should succeed");

        let records = storage.read_events(&stream, 0).await.expect("read");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sequence, 1);
    }

    #[tokio::test]
    async fn snapshot_roundtrip_through_storage() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let storage = FileStorage::new(tmp.path());
        let stream = StreamId::new("counter", Uuid::new_v4());
        let snapshot = SnapshotRecord {
            state: serde_json::json!({"value": 3}),
            sequence: 3,
        };

        storage
            .write_snapshot(&stream, &snapshot)
            .await
            .expect("write snapshot");
        let loaded = storage.load_snapshot(&stream).await.expect("load snapshot");

        assert_eq!(loaded, Some(snapshot));
    }
}
