//! Day-partitioned local archive.
//!
//! Every calendar day owns one append-only file at
//! `<root>/<YYYY>/<MM>/<YYYY>-<MM>-<DD>.log`. Handles are cached per batch and
//! every append is synced before it is reported as done.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::StreamExt;
use tokio::fs::{DirBuilder, File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::ImportError;
use crate::remote::ByteStream;

/// Outcome of a successful append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appended {
    /// Bytes copied from the remote object.
    pub bytes: u64,
    /// Partition the bytes were appended to.
    pub partition: PathBuf,
}

/// Destination for remote log content, partitioned by calendar day.
///
/// Implementations must only return from [`append`](PartitionSink::append)
/// with `Ok` once the content is durable; callers delete the remote object
/// right after.
#[async_trait]
pub trait PartitionSink: Send {
    /// Append the whole of `body`, read from the remote object `name`, to the
    /// partition for `date`.
    async fn append(
        &mut self,
        name: &str,
        date: NaiveDate,
        body: ByteStream,
    ) -> Result<Appended, ImportError>;

    /// Sync and release every partition opened since the last close.
    async fn close(&mut self) -> Result<(), ImportError>;
}

/// Path of the partition file for `date` under `root`.
pub fn partition_path(root: &Path, date: NaiveDate) -> PathBuf {
    root.join(date.format("%Y").to_string())
        .join(date.format("%m").to_string())
        .join(format!("{}.log", date.format("%Y-%m-%d")))
}

struct OpenPartition {
    path: PathBuf,
    file: File,
}

/// [`PartitionSink`] writing to the local filesystem.
pub struct LocalArchive {
    root: PathBuf,
    open: HashMap<NaiveDate, OpenPartition>,
}

impl LocalArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            open: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn partition_path(&self, date: NaiveDate) -> PathBuf {
        partition_path(&self.root, date)
    }

    /// Number of partition handles currently held open.
    pub fn open_partitions(&self) -> usize {
        self.open.len()
    }

    async fn partition(&mut self, date: NaiveDate) -> Result<&mut OpenPartition, ImportError> {
        let path = partition_path(&self.root, date);
        match self.open.entry(date) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let (file, synced_dirs) = open_partition_file(&path).await?;
                tracing::debug!(
                    partition = %path.display(),
                    synced_dirs = synced_dirs.len(),
                    "Opened partition file"
                );
                Ok(entry.insert(OpenPartition { path, file }))
            }
        }
    }
}

/// Open the partition file at `path` for appending, creating it and its
/// directories as needed.
///
/// The directory holding the file, and the parent of every directory created
/// here, are synced before returning so that a new file is reachable after a
/// crash. Returns the synced directories, deepest first.
async fn open_partition_file(path: &Path) -> Result<(File, Vec<PathBuf>), ImportError> {
    let local_path_err = |source| ImportError::LocalPath {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut created_dirs = Vec::new();
    for dir in parent.ancestors() {
        if dir.as_os_str().is_empty()
            || tokio::fs::try_exists(dir).await.map_err(local_path_err)?
        {
            break;
        }
        created_dirs.push(dir.to_path_buf());
    }

    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o755);
    builder.create(parent).await.map_err(local_path_err)?;

    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    options.mode(0o644);
    let file = options.open(path).await.map_err(local_path_err)?;

    let mut to_sync = vec![parent.to_path_buf()];
    to_sync.extend(created_dirs.iter().map(|dir| match dir.parent() {
        Some(up) if !up.as_os_str().is_empty() => up.to_path_buf(),
        _ => PathBuf::from("."),
    }));
    for dir in &to_sync {
        sync_dir(dir)
            .await
            .map_err(|source| ImportError::Persist {
                path: dir.clone(),
                source,
            })?;
    }

    Ok((file, to_sync))
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir).await?.sync_all().await
}

// Directory handles cannot be opened for syncing here.
#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

async fn copy_body(
    partition: &mut OpenPartition,
    name: &str,
    body: &mut ByteStream,
) -> Result<u64, ImportError> {
    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|source| ImportError::RemoteRead {
            name: name.to_string(),
            source,
        })?;
        partition
            .file
            .write_all(&chunk)
            .await
            .map_err(|source| ImportError::LocalWrite {
                path: partition.path.clone(),
                source,
            })?;
        written += chunk.len() as u64;
    }
    Ok(written)
}

/// Flush buffered writes and sync the file to stable storage.
async fn sync_partition(partition: &mut OpenPartition) -> Result<(), ImportError> {
    let persist_err = |source| ImportError::Persist {
        path: partition.path.clone(),
        source,
    };
    partition.file.flush().await.map_err(persist_err)?;
    partition.file.sync_all().await.map_err(persist_err)
}

/// Truncate back to `len` so a failed append leaves nothing behind.
async fn rollback(partition: &mut OpenPartition, len: u64) {
    let result = async {
        partition.file.set_len(len).await?;
        partition.file.sync_all().await
    }
    .await;

    match result {
        Ok(()) => tracing::warn!(
            partition = %partition.path.display(),
            len,
            "Rolled back partial append"
        ),
        Err(e) => tracing::error!(
            partition = %partition.path.display(),
            len,
            error = %e,
            "Failed to roll back partial append; partition may hold a truncated object"
        ),
    }
}

#[async_trait]
impl PartitionSink for LocalArchive {
    async fn append(
        &mut self,
        name: &str,
        date: NaiveDate,
        mut body: ByteStream,
    ) -> Result<Appended, ImportError> {
        let partition = self.partition(date).await?;
        let start = partition
            .file
            .metadata()
            .await
            .map_err(|source| ImportError::LocalPath {
                path: partition.path.clone(),
                source,
            })?
            .len();

        let outcome = match copy_body(partition, name, &mut body).await {
            Ok(bytes) => sync_partition(partition).await.map(|()| bytes),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(bytes) => Ok(Appended {
                bytes,
                partition: partition.path.clone(),
            }),
            Err(e) => {
                rollback(partition, start).await;
                self.open.remove(&date);
                Err(e)
            }
        }
    }

    async fn close(&mut self) -> Result<(), ImportError> {
        let mut first_error = None;
        for (_, mut partition) in self.open.drain() {
            if let Err(e) = sync_partition(&mut partition).await {
                tracing::error!(error = %e, "Failed to sync partition on close");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;
    use tempfile::TempDir;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn body(chunks: &[&'static str]) -> ByteStream {
        let chunks: Vec<object_store::Result<Bytes>> = chunks
            .iter()
            .map(|c| Ok(Bytes::from_static(c.as_bytes())))
            .collect();
        stream::iter(chunks).boxed()
    }

    #[test]
    fn test_partition_layout() {
        let path = partition_path(Path::new("/archive"), day(2024, 1, 5));
        assert_eq!(path, PathBuf::from("/archive/2024/01/2024-01-05.log"));
    }

    #[tokio::test]
    async fn test_append_creates_directories_and_file() {
        let dir = TempDir::new().unwrap();
        let mut archive = LocalArchive::new(dir.path());

        let appended = archive
            .append("a", day(2024, 1, 5), body(&["hello\n"]))
            .await
            .unwrap();
        archive.close().await.unwrap();

        assert_eq!(appended.bytes, 6);
        assert_eq!(appended.partition, dir.path().join("2024/01/2024-01-05.log"));
        let content = std::fs::read(dir.path().join("2024/01/2024-01-05.log")).unwrap();
        assert_eq!(content, b"hello\n");
    }

    #[tokio::test]
    async fn test_same_day_appends_in_call_order() {
        let dir = TempDir::new().unwrap();
        let mut archive = LocalArchive::new(dir.path());

        archive
            .append("a", day(2024, 1, 5), body(&["first\n"]))
            .await
            .unwrap();
        archive
            .append("b", day(2024, 1, 5), body(&["sec", "ond\n"]))
            .await
            .unwrap();
        assert_eq!(archive.open_partitions(), 1);
        archive.close().await.unwrap();
        assert_eq!(archive.open_partitions(), 0);

        let content = std::fs::read_to_string(archive.partition_path(day(2024, 1, 5))).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }

    #[tokio::test]
    async fn test_appends_to_existing_partition_across_batches() {
        let dir = TempDir::new().unwrap();
        let path = partition_path(dir.path(), day(2024, 1, 5));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"earlier run\n").unwrap();

        let mut archive = LocalArchive::new(dir.path());
        archive
            .append("a", day(2024, 1, 5), body(&["this run\n"]))
            .await
            .unwrap();
        archive.close().await.unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "earlier run\nthis run\n"
        );
    }

    #[tokio::test]
    async fn test_different_days_never_share_a_partition() {
        let dir = TempDir::new().unwrap();
        let mut archive = LocalArchive::new(dir.path());

        archive
            .append("a", day(2024, 1, 5), body(&["five\n"]))
            .await
            .unwrap();
        archive
            .append("b", day(2024, 1, 6), body(&["six\n"]))
            .await
            .unwrap();
        archive
            .append("c", day(2023, 12, 31), body(&["eve\n"]))
            .await
            .unwrap();
        archive.close().await.unwrap();

        let read = |d| std::fs::read_to_string(partition_path(dir.path(), d)).unwrap();
        assert_eq!(read(day(2024, 1, 5)), "five\n");
        assert_eq!(read(day(2024, 1, 6)), "six\n");
        assert_eq!(read(day(2023, 12, 31)), "eve\n");
    }

    #[tokio::test]
    async fn test_failed_stream_is_rolled_back() {
        let dir = TempDir::new().unwrap();
        let mut archive = LocalArchive::new(dir.path());
        archive
            .append("a", day(2024, 1, 5), body(&["kept\n"]))
            .await
            .unwrap();

        let failing: ByteStream = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(object_store::Error::Generic {
                store: "test",
                source: "connection reset".into(),
            }),
        ])
        .boxed();
        let err = archive
            .append("b", day(2024, 1, 5), failing)
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::RemoteRead { ref name, .. } if name == "b"));
        assert_eq!(archive.open_partitions(), 0);
        archive.close().await.unwrap();

        let content = std::fs::read_to_string(archive.partition_path(day(2024, 1, 5))).unwrap();
        assert_eq!(content, "kept\n");
    }

    #[tokio::test]
    async fn test_new_partition_syncs_every_new_directory_entry() {
        let dir = TempDir::new().unwrap();
        let path = partition_path(dir.path(), day(2024, 1, 5));

        let (_file, synced) = open_partition_file(&path).await.unwrap();

        assert_eq!(
            synced,
            vec![
                dir.path().join("2024/01"),
                dir.path().join("2024"),
                dir.path().to_path_buf(),
            ]
        );
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_existing_month_only_syncs_partition_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("2024/01")).unwrap();
        let path = partition_path(dir.path(), day(2024, 1, 5));

        let (_file, synced) = open_partition_file(&path).await.unwrap();

        assert_eq!(synced, vec![dir.path().join("2024/01")]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_permissions_are_at_most_owner_write() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let mut archive = LocalArchive::new(dir.path());
        archive
            .append("a", day(2024, 1, 5), body(&["x\n"]))
            .await
            .unwrap();
        archive.close().await.unwrap();

        let mode = |p: PathBuf| std::fs::metadata(p).unwrap().permissions().mode() & 0o777;
        let file_mode = mode(dir.path().join("2024/01/2024-01-05.log"));
        let dir_mode = mode(dir.path().join("2024/01"));
        assert_eq!(file_mode & !0o644, 0);
        assert_eq!(file_mode & 0o600, 0o600);
        assert_eq!(dir_mode & !0o755, 0);
        assert_eq!(dir_mode & 0o700, 0o700);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_flush_failure_is_persist_error() {
        // Writes to /dev/full are accepted into the buffer and fail on flush.
        let file = OpenOptions::new().write(true).open("/dev/full").await.unwrap();
        let mut partition = OpenPartition {
            path: PathBuf::from("/dev/full"),
            file,
        };

        let written = copy_body(&mut partition, "a", &mut body(&["hello\n"]))
            .await
            .unwrap();
        assert_eq!(written, 6);

        let err = sync_partition(&mut partition).await.unwrap_err();
        assert!(matches!(err, ImportError::Persist { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unwritable_root_is_local_path_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let mut archive = LocalArchive::new(&blocker);

        let err = archive
            .append("a", day(2024, 1, 5), body(&["x"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::LocalPath { .. }));
    }
}
