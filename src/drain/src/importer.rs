//! Streams one remote log object into its day partition.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::archive::PartitionSink;
use crate::classifier::embedded_date;
use crate::error::ImportError;
use crate::remote::RemoteStore;

/// A remote object whose content is now durable in the local archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Imported {
    pub name: String,
    pub date: NaiveDate,
    pub bytes: u64,
    pub partition: PathBuf,
}

pub struct Importer<S> {
    remote: Arc<dyn RemoteStore>,
    sink: S,
}

impl<S: PartitionSink> Importer<S> {
    pub fn new(remote: Arc<dyn RemoteStore>, sink: S) -> Self {
        Self { remote, sink }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Copy the object `name` into the partition of its embedded date.
    ///
    /// On `Ok` the content has been flushed and synced and the remote object
    /// may be deleted. On `Err` nothing was deleted and no partial content is
    /// left in the partition.
    pub async fn import(&mut self, name: &str) -> Result<Imported, ImportError> {
        // Discovery filters names already; this guards the destructive path.
        let date = embedded_date(name).ok_or_else(|| ImportError::InvalidName(name.to_string()))?;

        let body = self
            .remote
            .get_stream(name)
            .await
            .map_err(|source| ImportError::RemoteOpen {
                name: name.to_string(),
                source,
            })?;

        let appended = self.sink.append(name, date, body).await?;

        Ok(Imported {
            name: name.to_string(),
            date,
            bytes: appended.bytes,
            partition: appended.partition,
        })
    }

    /// Sync and release the partitions opened since the last call.
    pub async fn finish_batch(&mut self) -> Result<(), ImportError> {
        self.sink.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::LocalArchive;
    use crate::testing::{FailingSink, FlakyRemote, SinkFailure};
    use tempfile::TempDir;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_import_appends_to_day_partition() {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(FlakyRemote::new());
        remote.insert("2024-01-05T10:00:00.123-app1.log", b"hello\n");
        let mut importer = Importer::new(remote.clone(), LocalArchive::new(dir.path()));

        let imported = importer
            .import("2024-01-05T10:00:00.123-app1.log")
            .await
            .unwrap();
        importer.finish_batch().await.unwrap();

        assert_eq!(imported.date, day(2024, 1, 5));
        assert_eq!(imported.bytes, 6);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("2024/01/2024-01-05.log")).unwrap(),
            "hello\n"
        );
        // Importing never deletes.
        assert!(remote.contains("2024-01-05T10:00:00.123-app1.log"));
    }

    #[tokio::test]
    async fn test_two_objects_same_day_both_land_in_order() {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(FlakyRemote::new());
        remote.insert("2024-01-05T10:00:00.123-app1.log", b"one\n");
        remote.insert("2024-01-05T23:59:59.999-app2.log", b"two\n");
        let mut importer = Importer::new(remote, LocalArchive::new(dir.path()));

        importer
            .import("2024-01-05T23:59:59.999-app2.log")
            .await
            .unwrap();
        importer
            .import("2024-01-05T10:00:00.123-app1.log")
            .await
            .unwrap();
        importer.finish_batch().await.unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("2024/01/2024-01-05.log")).unwrap(),
            "two\none\n"
        );
    }

    #[tokio::test]
    async fn test_large_object_is_streamed_in_chunks() {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(FlakyRemote::new().with_chunk_size(1024));
        let content: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        remote.insert("2024-01-05T10:00:00.123-big.log", &content);
        let mut importer = Importer::new(remote, LocalArchive::new(dir.path()));

        let imported = importer
            .import("2024-01-05T10:00:00.123-big.log")
            .await
            .unwrap();
        importer.finish_batch().await.unwrap();

        assert_eq!(imported.bytes, content.len() as u64);
        assert_eq!(
            std::fs::read(dir.path().join("2024/01/2024-01-05.log")).unwrap(),
            content
        );
    }

    #[tokio::test]
    async fn test_invalid_name_is_rejected_before_any_io() {
        let remote = Arc::new(FlakyRemote::new());
        let mut importer = Importer::new(remote.clone(), FailingSink::new(SinkFailure::Never));

        let err = importer.import("README.md").await.unwrap_err();
        assert!(matches!(err, ImportError::InvalidName(_)));

        let err = importer
            .import("2024-02-30T10:00:00.123-app1.log")
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::InvalidName(_)));
        assert_eq!(remote.get_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_object_is_remote_open_error() {
        let remote = Arc::new(FlakyRemote::new());
        let mut importer = Importer::new(remote, FailingSink::new(SinkFailure::Never));

        let err = importer
            .import("2024-01-05T10:00:00.123-gone.log")
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::RemoteOpen { .. }));
        assert!(importer.sink().appended().is_empty());
    }

    #[tokio::test]
    async fn test_sync_failure_is_persist_error() {
        let remote = Arc::new(FlakyRemote::new());
        remote.insert("2024-01-05T10:00:00.123-app1.log", b"hello\n");
        let mut importer = Importer::new(remote, FailingSink::new(SinkFailure::Persist));

        let err = importer
            .import("2024-01-05T10:00:00.123-app1.log")
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::Persist { .. }));
    }

    #[tokio::test]
    async fn test_stream_failure_leaves_partition_untouched() {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(FlakyRemote::new().with_chunk_size(2));
        remote.insert("2024-01-05T10:00:00.123-ok.log", b"kept\n");
        remote.insert("2024-01-05T11:00:00.000-cut.log", b"truncated\n");
        remote.fail_stream_of("2024-01-05T11:00:00.000-cut.log");
        let mut importer = Importer::new(remote, LocalArchive::new(dir.path()));

        importer
            .import("2024-01-05T10:00:00.123-ok.log")
            .await
            .unwrap();
        let err = importer
            .import("2024-01-05T11:00:00.000-cut.log")
            .await
            .unwrap_err();
        importer.finish_batch().await.unwrap();

        assert!(matches!(err, ImportError::RemoteRead { .. }));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("2024/01/2024-01-05.log")).unwrap(),
            "kept\n"
        );
    }
}
