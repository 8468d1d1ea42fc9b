//! Bounded discovery of log objects in the remote store.

use std::sync::Arc;

use crate::classifier::classify;
use crate::error::DiscoveryError;
use crate::remote::RemoteStore;

/// One page of log object names, in listing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    /// Names that match the log naming convention.
    pub names: Vec<String>,
    /// Number of objects the store returned before filtering.
    pub listed: usize,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Number of listed objects that were not log files.
    pub fn ignored(&self) -> usize {
        self.listed - self.names.len()
    }
}

pub struct Discovery {
    remote: Arc<dyn RemoteStore>,
    max_keys: usize,
}

impl Discovery {
    pub fn new(remote: Arc<dyn RemoteStore>, max_keys: usize) -> Self {
        Self { remote, max_keys }
    }

    pub fn max_keys(&self) -> usize {
        self.max_keys
    }

    /// List one page of at most `max_keys` objects and keep the log files.
    ///
    /// # Errors
    ///
    /// [`DiscoveryError::EmptyBucket`] when the store has no objects at all;
    /// [`DiscoveryError::Listing`] when the listing call fails. A page made
    /// only of non-log objects is not an error and yields an empty batch.
    pub async fn next_batch(&self) -> Result<Batch, DiscoveryError> {
        let listed = self
            .remote
            .list(self.max_keys)
            .await
            .map_err(DiscoveryError::Listing)?;

        if listed.is_empty() {
            return Err(DiscoveryError::EmptyBucket);
        }

        let total = listed.len();
        let names: Vec<String> = listed
            .into_iter()
            .filter(|name| {
                let matches = classify(name).is_some();
                if !matches {
                    tracing::debug!(object = %name, "Ignoring object not named like a log file");
                }
                matches
            })
            .collect();

        Ok(Batch {
            names,
            listed: total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FlakyRemote;

    #[tokio::test]
    async fn test_empty_bucket_is_hard_stop() {
        let remote = Arc::new(FlakyRemote::new());
        let discovery = Discovery::new(remote, 500);

        let err = discovery.next_batch().await.unwrap_err();
        assert!(matches!(err, DiscoveryError::EmptyBucket));
    }

    #[tokio::test]
    async fn test_filters_non_log_objects() {
        let remote = Arc::new(FlakyRemote::new());
        remote.insert("2024-01-05T10:00:00.123-app1.log", b"a");
        remote.insert("README.md", b"b");
        remote.insert("2024-01-05T10:00:00-app1.log", b"c");
        remote.insert("2024-01-06T10:00:00.000-app2.log", b"d");
        let discovery = Discovery::new(remote, 500);

        let batch = discovery.next_batch().await.unwrap();
        assert_eq!(
            batch.names,
            vec![
                "2024-01-05T10:00:00.123-app1.log".to_string(),
                "2024-01-06T10:00:00.000-app2.log".to_string(),
            ]
        );
        assert_eq!(batch.listed, 4);
        assert_eq!(batch.ignored(), 2);
    }

    #[tokio::test]
    async fn test_only_non_log_objects_yields_empty_batch() {
        let remote = Arc::new(FlakyRemote::new());
        remote.insert("notes.txt", b"a");
        let discovery = Discovery::new(remote, 500);

        let batch = discovery.next_batch().await.unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.listed, 1);
    }

    #[tokio::test]
    async fn test_respects_max_keys() {
        let remote = Arc::new(FlakyRemote::new());
        for i in 0..5 {
            remote.insert(&format!("2024-01-0{}T10:00:00.000-app.log", i + 1), b"x");
        }
        let discovery = Discovery::new(remote, 3);

        let batch = discovery.next_batch().await.unwrap();
        assert_eq!(batch.names.len(), 3);
        assert_eq!(batch.names[0], "2024-01-01T10:00:00.000-app.log");
    }

    #[tokio::test]
    async fn test_listing_failure() {
        let remote = Arc::new(FlakyRemote::new());
        remote.insert("2024-01-05T10:00:00.123-app1.log", b"a");
        remote.fail_list();
        let discovery = Discovery::new(remote, 500);

        let err = discovery.next_batch().await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Listing(_)));
    }
}
