use std::path::PathBuf;

use thiserror::Error;

/// Errors from listing the remote store.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to list remote objects: {0}")]
    Listing(#[source] object_store::Error),

    /// The listing returned no objects at all. Not a failure: there is
    /// nothing left to drain.
    #[error("no objects in the bucket")]
    EmptyBucket,
}

/// Errors from importing a single remote object into the local archive.
///
/// Whatever the variant, the remote object has not been deleted and the run
/// can be repeated safely.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("object name {0:?} does not match the log naming convention")]
    InvalidName(String),

    #[error("unable to open remote object {name:?}: {source}")]
    RemoteOpen {
        name: String,
        #[source]
        source: object_store::Error,
    },

    #[error("failed reading remote object {name:?}: {source}")]
    RemoteRead {
        name: String,
        #[source]
        source: object_store::Error,
    },

    #[error("unable to prepare partition file {}: {source}", path.display())]
    LocalPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed writing to partition file {}: {source}", path.display())]
    LocalWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to sync partition file {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Fatal errors that stop the drain loop.
#[derive(Debug, Error)]
pub enum DrainError {
    #[error("failed to list remote objects: {0}")]
    Listing(#[source] object_store::Error),

    #[error("failed to import {name:?}: {source}")]
    Import {
        name: String,
        #[source]
        source: ImportError,
    },

    /// The object was imported and synced but is still present remotely. A
    /// rerun would import it a second time, so this needs an operator.
    #[error(
        "imported {name:?} but failed to delete it from the store; \
         remove it manually before the next run to avoid duplicating its content: {source}"
    )]
    Delete {
        name: String,
        #[source]
        source: object_store::Error,
    },

    /// Final sync of the batch's partition files failed. Every object deleted
    /// in the batch had already been synced individually.
    #[error("failed to close partition files at end of batch: {0}")]
    Close(#[source] ImportError),
}
