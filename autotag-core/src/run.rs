//! Run driver: list records, generate tags, merge, write back.
//!
//! Records are processed strictly one after another. Per-record failures
//! are logged and counted but never abort the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::catalog::{BookRecord, Catalog};
use crate::error::{Error, Result};
use crate::llm::ProviderRegistry;
use crate::orchestrator::TagOrchestrator;
use crate::tags::{merge, MergeMode};

/// Options for one tagging run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    pub merge_mode: MergeMode,
    /// Log the tags that would be written instead of writing them
    pub dry_run: bool,
    /// Free-text instruction appended to every prompt
    pub extra_instructions: Option<String>,
    /// Maximum number of records to process
    pub limit: Option<usize>,
    /// In append mode, re-read tags from the catalog right before merging
    pub refresh_before_merge: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            merge_mode: MergeMode::Append,
            dry_run: false,
            extra_instructions: None,
            limit: None,
            refresh_before_merge: true,
        }
    }
}

/// What happened to one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordStatus {
    /// Tags were written
    Tagged { tags: Vec<String> },
    /// Dry run: tags that would have been written
    WouldTag { tags: Vec<String> },
    /// Nothing to write for this record
    Skipped { reason: String },
    /// Writing failed
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordOutcome {
    pub record_id: i64,
    pub title: String,
    #[serde(flatten)]
    pub status: RecordStatus,
}

/// Totals for a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub total: usize,
    pub tagged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub outcomes: Vec<RecordOutcome>,
}

impl RunSummary {
    fn new(run_id: Uuid, dry_run: bool) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            started_at: now,
            finished_at: now,
            dry_run,
            total: 0,
            tagged: 0,
            skipped: 0,
            failed: 0,
            outcomes: Vec::new(),
        }
    }

    fn record(&mut self, outcome: RecordOutcome) {
        self.total += 1;
        match outcome.status {
            RecordStatus::Tagged { .. } | RecordStatus::WouldTag { .. } => self.tagged += 1,
            RecordStatus::Skipped { .. } => self.skipped += 1,
            RecordStatus::Failed { .. } => self.failed += 1,
        }
        self.outcomes.push(outcome);
    }
}

/// One pass over the catalog.
pub struct TaggingRun {
    catalog: Arc<dyn Catalog>,
    orchestrator: TagOrchestrator,
    registry: ProviderRegistry,
    options: RunOptions,
}

impl TaggingRun {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        orchestrator: TagOrchestrator,
        registry: ProviderRegistry,
        options: RunOptions,
    ) -> Self {
        Self {
            catalog,
            orchestrator,
            registry,
            options,
        }
    }

    /// Process every listed record. Fails only if the initial listing fails.
    pub async fn run(&self) -> Result<RunSummary> {
        let mut summary = RunSummary::new(Uuid::new_v4(), self.options.dry_run);

        let records = self.catalog.list_records(self.options.limit).await?;
        info!(
            run_id = %summary.run_id,
            records = records.len(),
            mode = %self.options.merge_mode,
            dry_run = self.options.dry_run,
            providers = ?self.registry.kinds(),
            "Starting tagging run"
        );

        let total = records.len();
        for (i, record) in records.iter().enumerate() {
            info!("[{}/{}] Processing '{}' (ID: {})", i + 1, total, record.title, record.id);
            let status = self.process_record(record).await;
            summary.record(RecordOutcome {
                record_id: record.id,
                title: record.title.clone(),
                status,
            });
        }

        summary.finished_at = Utc::now();
        info!(
            run_id = %summary.run_id,
            tagged = summary.tagged,
            skipped = summary.skipped,
            failed = summary.failed,
            "Tagging run complete"
        );
        Ok(summary)
    }

    #[instrument(skip_all, fields(record_id = record.id))]
    async fn process_record(&self, record: &BookRecord) -> RecordStatus {
        if record.title.trim().is_empty() {
            warn!("Skipping record without a title");
            return RecordStatus::Skipped {
                reason: "missing title".to_string(),
            };
        }

        if record.existing_tags.is_empty() {
            info!("Existing tags: none");
        } else {
            info!("Existing tags: {}", record.existing_tags.join(", "));
        }

        let generated = self
            .orchestrator
            .generate_tags(
                self.registry.providers(),
                &record.title,
                record.description.as_deref(),
                &record.existing_tags,
                self.options.extra_instructions.as_deref(),
            )
            .await;

        let Some(generated) = generated else {
            let err = Error::NoTagsProduced {
                record_id: record.id,
            };
            warn!(error = %err, "Skipping record");
            return RecordStatus::Skipped {
                reason: err.to_string(),
            };
        };

        let existing = self.merge_base(record).await;
        let tags = merge(&existing, &generated.tags, self.options.merge_mode);

        if self.options.dry_run {
            info!("DRY RUN: would apply tags: {}", tags.join(", "));
            return RecordStatus::WouldTag { tags };
        }

        info!("Applying tags: {}", tags.join(", "));
        match self.catalog.write_tags(record.id, &tags).await {
            Ok(()) => RecordStatus::Tagged { tags },
            Err(e) => {
                error!(error = %e, "Failed to write tags");
                RecordStatus::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Existing tags to merge with. Overwrite mode ignores them; append mode
    /// prefers a fresh catalog read and falls back to the listing snapshot.
    async fn merge_base(&self, record: &BookRecord) -> Vec<String> {
        match self.options.merge_mode {
            MergeMode::Overwrite => Vec::new(),
            MergeMode::Append if !self.options.refresh_before_merge => {
                record.existing_tags.clone()
            }
            MergeMode::Append => match self.catalog.read_tags(record.id).await {
                Ok(tags) => tags,
                Err(e) => {
                    warn!(
                        error = %e,
                        "Could not re-read existing tags; merging with listing snapshot"
                    );
                    record.existing_tags.clone()
                }
            },
        }
    }
}
