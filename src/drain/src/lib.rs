//! Import-and-partition pipeline for an append-only bucket of log files.
//!
//! Remote objects named `YYYY-MM-DDThh:mm:ss.mmm-<suffix>.log` are streamed
//! into one local file per calendar day and deleted from the store only once
//! their content has been synced to disk.

pub mod archive;
pub mod classifier;
pub mod discovery;
pub mod drainer;
pub mod error;
pub mod importer;
pub mod remote;
pub mod safety;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use archive::{Appended, LocalArchive, PartitionSink, partition_path};
pub use classifier::{LogName, classify, embedded_date};
pub use discovery::{Batch, Discovery};
pub use drainer::{
    DEFAULT_BATCH_SIZE, DrainOptions, DrainStats, DrainSummary, Drainer, StopReason,
};
pub use error::{DiscoveryError, DrainError, ImportError};
pub use importer::{Imported, Importer};
pub use remote::{ByteStream, ObjectStoreRemote, RemoteStore};
pub use safety::{default_cutoff, is_safe_to_process};
