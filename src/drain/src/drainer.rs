//! The batch-and-retry drain loop.
//!
//! Each iteration lists one page of log objects, imports and deletes every
//! one that is older than the cutoff day, and stops once a page contains an
//! object too recent to consume (the queue has caught up to "now") or the
//! bucket is empty.

use std::sync::Arc;

use chrono::NaiveDate;

use crate::archive::PartitionSink;
use crate::classifier::embedded_date;
use crate::discovery::{Batch, Discovery};
use crate::error::{DiscoveryError, DrainError, ImportError};
use crate::importer::{Imported, Importer};
use crate::remote::RemoteStore;
use crate::safety::is_safe_to_process;

/// Default number of objects listed per batch.
pub const DEFAULT_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainOptions {
    /// Only objects whose embedded date is strictly before this day are
    /// consumed.
    pub cutoff: NaiveDate,
    /// Maximum number of objects listed per batch. Must be positive.
    pub batch_size: usize,
    /// List one batch and report what would be done, without reading,
    /// writing or deleting anything.
    pub dry_run: bool,
}

impl DrainOptions {
    pub fn new(cutoff: NaiveDate) -> Self {
        Self {
            cutoff,
            batch_size: DEFAULT_BATCH_SIZE,
            dry_run: false,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Why a drain run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The listing returned no objects at all.
    EmptyBucket,
    /// A batch contained at least one object at or after the cutoff day.
    CaughtUp,
    /// A batch had nothing unsafe but nothing could be deleted either, so
    /// listing again would return the same page.
    NoProgress,
    /// Dry-run mode stops after the first batch.
    DryRun,
}

/// Counters accumulated over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub batches: usize,
    pub imported: usize,
    pub deleted: usize,
    pub skipped_unsafe: usize,
    pub skipped_invalid: usize,
    pub bytes_imported: u64,
    /// Safe objects found in dry-run mode.
    pub would_import: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainSummary {
    pub stop_reason: StopReason,
    pub stats: DrainStats,
}

#[derive(Debug, Default)]
struct BatchOutcome {
    saw_unsafe: bool,
    deleted: usize,
}

pub struct Drainer<S> {
    remote: Arc<dyn RemoteStore>,
    discovery: Discovery,
    importer: Importer<S>,
    options: DrainOptions,
}

impl<S: PartitionSink> Drainer<S> {
    pub fn new(remote: Arc<dyn RemoteStore>, sink: S, options: DrainOptions) -> Self {
        Self {
            discovery: Discovery::new(remote.clone(), options.batch_size),
            importer: Importer::new(remote.clone(), sink),
            remote,
            options,
        }
    }

    pub fn options(&self) -> &DrainOptions {
        &self.options
    }

    pub fn sink(&self) -> &S {
        self.importer.sink()
    }

    /// Drain the bucket until it is empty or caught up with the cutoff day.
    ///
    /// # Errors
    ///
    /// Any listing, import or delete failure stops the run immediately. No
    /// object is ever deleted before its content is synced locally, so a
    /// failed run can simply be repeated, except after
    /// [`DrainError::Delete`], which leaves an imported object in the store.
    pub async fn run(&mut self) -> Result<DrainSummary, DrainError> {
        tracing::info!(
            cutoff = %self.options.cutoff,
            batch_size = self.options.batch_size,
            dry_run = self.options.dry_run,
            "Starting drain"
        );

        let mut stats = DrainStats::default();

        let stop_reason = loop {
            tracing::info!("Getting new files");
            let batch = match self.discovery.next_batch().await {
                Ok(batch) => batch,
                Err(DiscoveryError::EmptyBucket) => {
                    tracing::info!("No files in the bucket");
                    break StopReason::EmptyBucket;
                }
                Err(DiscoveryError::Listing(source)) => {
                    tracing::error!(error = %source, "Unable to list remote objects");
                    return Err(DrainError::Listing(source));
                }
            };

            stats.batches += 1;
            tracing::info!(
                batch = stats.batches,
                listed = batch.listed,
                eligible = batch.names.len(),
                ignored = batch.ignored(),
                "Discovered batch"
            );

            if self.options.dry_run {
                self.preview(&batch, &mut stats);
                break StopReason::DryRun;
            }

            let processed = self.process_batch(&batch, &mut stats).await;
            let closed = self.importer.finish_batch().await;
            let outcome = match (processed, closed) {
                (Ok(outcome), Ok(())) => outcome,
                (Ok(_), Err(e)) => return Err(DrainError::Close(e)),
                (Err(e), closed) => {
                    if let Err(close_err) = closed {
                        tracing::warn!(error = %close_err, "Failed to close partition files after error");
                    }
                    return Err(e);
                }
            };

            if outcome.saw_unsafe {
                break StopReason::CaughtUp;
            }
            if outcome.deleted == 0 {
                tracing::warn!(
                    listed = batch.listed,
                    "Batch made no progress; stopping to avoid relisting the same page"
                );
                break StopReason::NoProgress;
            }
        };

        tracing::info!(
            ?stop_reason,
            batches = stats.batches,
            imported = stats.imported,
            deleted = stats.deleted,
            skipped_unsafe = stats.skipped_unsafe,
            skipped_invalid = stats.skipped_invalid,
            bytes = stats.bytes_imported,
            "Drain finished"
        );

        Ok(DrainSummary { stop_reason, stats })
    }

    async fn process_batch(
        &mut self,
        batch: &Batch,
        stats: &mut DrainStats,
    ) -> Result<BatchOutcome, DrainError> {
        let mut outcome = BatchOutcome::default();

        for name in &batch.names {
            if !is_safe_to_process(name, self.options.cutoff) {
                outcome.saw_unsafe = true;
                if embedded_date(name).is_none() {
                    tracing::warn!(object = %name, "Skipped (malformed date)");
                    stats.skipped_invalid += 1;
                } else {
                    tracing::info!(object = %name, "Skipped (unsafe)");
                    stats.skipped_unsafe += 1;
                }
                continue;
            }

            tracing::info!(object = %name, "Processing");
            match self.import_then_delete(name).await {
                Ok(imported) => {
                    tracing::info!(
                        object = %imported.name,
                        date = %imported.date,
                        bytes = imported.bytes,
                        partition = %imported.partition.display(),
                        "Done"
                    );
                    stats.imported += 1;
                    stats.deleted += 1;
                    stats.bytes_imported += imported.bytes;
                    outcome.deleted += 1;
                }
                Err(DrainError::Import {
                    name,
                    source: ImportError::InvalidName(_),
                }) => {
                    tracing::warn!(object = %name, "Skipped (invalid name)");
                    stats.skipped_invalid += 1;
                }
                Err(e) => {
                    tracing::error!(object = %name, error = %e, "Drain failed");
                    return Err(e);
                }
            }
        }

        Ok(outcome)
    }

    /// Import `name` and, only once its content is synced, delete it
    /// remotely.
    async fn import_then_delete(&mut self, name: &str) -> Result<Imported, DrainError> {
        let imported = self
            .importer
            .import(name)
            .await
            .map_err(|source| DrainError::Import {
                name: name.to_string(),
                source,
            })?;

        tracing::debug!(object = %name, "Deleting remote object");
        self.remote
            .delete(name)
            .await
            .map_err(|source| DrainError::Delete {
                name: name.to_string(),
                source,
            })?;

        Ok(imported)
    }

    fn preview(&self, batch: &Batch, stats: &mut DrainStats) {
        for name in &batch.names {
            if is_safe_to_process(name, self.options.cutoff) {
                tracing::info!(object = %name, "[DRY-RUN] Would import and delete");
                stats.would_import += 1;
            } else {
                tracing::info!(object = %name, "[DRY-RUN] Skipped (unsafe)");
                stats.skipped_unsafe += 1;
            }
        }
    }
}
