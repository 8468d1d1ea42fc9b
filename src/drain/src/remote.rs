//! The remote store capability the drain loop consumes.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use object_store::ObjectStore;
use object_store::path::Path as ObjectPath;

/// Body of a remote object, delivered in chunks.
pub type ByteStream = BoxStream<'static, object_store::Result<Bytes>>;

/// List, read and delete operations on the bucket holding the log objects.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// List at most `max_keys` object names, in store order.
    async fn list(&self, max_keys: usize) -> object_store::Result<Vec<String>>;

    /// Open a streaming read of the object called `key`.
    async fn get_stream(&self, key: &str) -> object_store::Result<ByteStream>;

    /// Delete the object called `key`.
    async fn delete(&self, key: &str) -> object_store::Result<()>;
}

/// [`RemoteStore`] backed by any `object_store` implementation (S3, local
/// filesystem, in-memory).
#[derive(Clone, Debug)]
pub struct ObjectStoreRemote {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreRemote {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn inner(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }
}

#[async_trait]
impl RemoteStore for ObjectStoreRemote {
    async fn list(&self, max_keys: usize) -> object_store::Result<Vec<String>> {
        self.store
            .list(None)
            .take(max_keys)
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await
    }

    async fn get_stream(&self, key: &str) -> object_store::Result<ByteStream> {
        let location = ObjectPath::parse(key)?;
        let result = self.store.get(&location).await?;
        Ok(result.into_stream())
    }

    async fn delete(&self, key: &str) -> object_store::Result<()> {
        let location = ObjectPath::parse(key)?;
        self.store.delete(&location).await
    }
}
