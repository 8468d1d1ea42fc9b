//! Test doubles for the remote store and the partition sink.
//!
//! Both doubles can share a [`Journal`] so tests can assert the relative order
//! of appends, syncs and deletes.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use futures::{StreamExt, TryStreamExt, stream};

use crate::archive::{Appended, PartitionSink};
use crate::error::ImportError;
use crate::remote::{ByteStream, RemoteStore};

/// Ordered record of operations across doubles.
#[derive(Clone, Debug, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Index of the first entry equal to `event`.
    pub fn position(&self, event: &str) -> Option<usize> {
        self.0.lock().unwrap().iter().position(|e| e == event)
    }
}

fn injected(what: &str) -> object_store::Error {
    object_store::Error::Generic {
        store: "flaky",
        source: format!("injected {what} failure").into(),
    }
}

/// In-memory [`RemoteStore`] with failure injection.
///
/// Listing returns keys in lexicographic order, like S3.
pub struct FlakyRemote {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    chunk_size: usize,
    fail_list: AtomicBool,
    failing_gets: Mutex<HashSet<String>>,
    failing_streams: Mutex<HashSet<String>>,
    failing_deletes: Mutex<HashSet<String>>,
    list_calls: AtomicUsize,
    get_calls: AtomicUsize,
    deleted: Mutex<Vec<String>>,
    journal: Journal,
}

impl Default for FlakyRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl FlakyRemote {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            chunk_size: 64 * 1024,
            fail_list: AtomicBool::new(false),
            failing_gets: Mutex::new(HashSet::new()),
            failing_streams: Mutex::new(HashSet::new()),
            failing_deletes: Mutex::new(HashSet::new()),
            list_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
            deleted: Mutex::new(Vec::new()),
            journal: Journal::new(),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    pub fn insert(&self, key: &str, content: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), content.to_vec());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn fail_list(&self) {
        self.fail_list.store(true, Ordering::SeqCst);
    }

    /// Opening `key` fails as if the store were unreachable.
    pub fn fail_get_of(&self, key: &str) {
        self.failing_gets.lock().unwrap().insert(key.to_string());
    }

    /// Reading `key` yields its first chunk and then fails.
    pub fn fail_stream_of(&self, key: &str) {
        self.failing_streams.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_delete_of(&self, key: &str) {
        self.failing_deletes.lock().unwrap().insert(key.to_string());
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteStore for FlakyRemote {
    async fn list(&self, max_keys: usize) -> object_store::Result<Vec<String>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.journal.record("list");
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(injected("list"));
        }
        Ok(self
            .objects
            .lock()
            .unwrap()
            .keys()
            .take(max_keys)
            .cloned()
            .collect())
    }

    async fn get_stream(&self, key: &str) -> object_store::Result<ByteStream> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.journal.record(format!("get:{key}"));
        if self.failing_gets.lock().unwrap().contains(key) {
            return Err(injected("get"));
        }
        let content = self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| object_store::Error::NotFound {
                path: key.to_string(),
                source: "no such object".into(),
            })?;

        let mut chunks: Vec<object_store::Result<Bytes>> = content
            .chunks(self.chunk_size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        if self.failing_streams.lock().unwrap().contains(key) {
            chunks.truncate(1);
            chunks.push(Err(injected("stream")));
        }
        Ok(stream::iter(chunks).boxed())
    }

    async fn delete(&self, key: &str) -> object_store::Result<()> {
        self.journal.record(format!("delete:{key}"));
        if self.failing_deletes.lock().unwrap().contains(key) {
            return Err(injected("delete"));
        }
        self.objects.lock().unwrap().remove(key);
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

/// Which appends a [`FailingSink`] should fail.
#[derive(Clone, Debug)]
pub enum SinkFailure {
    Never,
    /// Every append fails at the sync step.
    Persist,
    /// Appends of this object fail at the sync step.
    PersistFor(String),
    /// Every append fails to open its partition.
    LocalPath,
    /// Appends succeed; closing at the end of a batch fails to sync.
    Close,
}

/// In-memory [`PartitionSink`] that can fail on demand.
///
/// A successful append records `synced:<name>` in the journal; a failed one
/// records nothing.
pub struct FailingSink {
    failure: SinkFailure,
    appended: Vec<(String, NaiveDate, Vec<u8>)>,
    closes: usize,
    journal: Journal,
}

impl FailingSink {
    pub fn new(failure: SinkFailure) -> Self {
        Self {
            failure,
            appended: Vec::new(),
            closes: 0,
            journal: Journal::new(),
        }
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    pub fn appended(&self) -> &[(String, NaiveDate, Vec<u8>)] {
        &self.appended
    }

    pub fn closes(&self) -> usize {
        self.closes
    }

    fn partition(date: NaiveDate) -> PathBuf {
        PathBuf::from(format!("memory/{}.log", date.format("%Y-%m-%d")))
    }
}

#[async_trait]
impl PartitionSink for FailingSink {
    async fn append(
        &mut self,
        name: &str,
        date: NaiveDate,
        body: ByteStream,
    ) -> Result<Appended, ImportError> {
        let partition = Self::partition(date);
        if matches!(self.failure, SinkFailure::LocalPath) {
            return Err(ImportError::LocalPath {
                path: partition,
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "injected"),
            });
        }

        let chunks: Vec<Bytes> = body
            .try_collect()
            .await
            .map_err(|source| ImportError::RemoteRead {
                name: name.to_string(),
                source,
            })?;
        let content = chunks.concat();

        let fail_sync = match &self.failure {
            SinkFailure::Persist => true,
            SinkFailure::PersistFor(target) => target == name,
            SinkFailure::Never | SinkFailure::LocalPath | SinkFailure::Close => false,
        };
        if fail_sync {
            return Err(ImportError::Persist {
                path: partition,
                source: std::io::Error::other("injected sync failure"),
            });
        }

        let bytes = content.len() as u64;
        self.appended.push((name.to_string(), date, content));
        self.journal.record(format!("synced:{name}"));
        Ok(Appended { bytes, partition })
    }

    async fn close(&mut self) -> Result<(), ImportError> {
        self.closes += 1;
        self.journal.record("close");
        if matches!(self.failure, SinkFailure::Close) {
            return Err(ImportError::Persist {
                path: PathBuf::from("memory"),
                source: std::io::Error::other("injected close failure"),
            });
        }
        Ok(())
    }
}
