//! The migration loop.

use crate::checkpoint::{claim, CheckpointStore, MemoryCheckpointStore};
use crate::client::GitHubClient;
use crate::convert::IssueConverter;
use crate::error::{MigrationError, Result};
use crate::progress::{MigrationPhase, MigrationProgress};
use crate::source::{read_entries, IssueSource};
use crate::submit::{ImportOutcome, TargetSubmitter};
use crate::types::{MigrationConfig, MigrationOptions, MigrationReport, SourceEntry};
use crate::verify::MigrationVerifier;
use std::io::Write;
use tracing::{debug, info, warn};

/// Runs a migration from one source into one target repository.
///
/// Issues are processed strictly one after another in source id order. In
/// dry-run mode each payload is printed instead of submitted and the
/// checkpoint is only read.
pub struct MigrationDriver {
    config: MigrationConfig,
    options: MigrationOptions,
    source: Box<dyn IssueSource>,
    checkpoint: Box<dyn CheckpointStore>,
    client: GitHubClient,
    progress: MigrationProgress,
    output: Box<dyn Write + Send>,
}

impl MigrationDriver {
    /// Create a driver with an in-memory checkpoint that writes to stdout.
    pub fn new(
        config: MigrationConfig,
        options: MigrationOptions,
        source: Box<dyn IssueSource>,
    ) -> Result<Self> {
        config.validate()?;
        let client = GitHubClient::new(&config)?;

        Ok(Self {
            config,
            options,
            source,
            checkpoint: Box::new(MemoryCheckpointStore::new()),
            client,
            progress: MigrationProgress::new(),
            output: Box::new(std::io::stdout()),
        })
    }

    /// Use a persistent checkpoint store.
    pub fn with_checkpoint(mut self, checkpoint: Box<dyn CheckpointStore>) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    /// Set a progress tracker.
    pub fn with_progress(mut self, progress: MigrationProgress) -> Self {
        self.progress = progress;
        self
    }

    /// Redirect dry-run payloads and completion lines.
    pub fn with_output(mut self, output: Box<dyn Write + Send>) -> Self {
        self.output = output;
        self
    }

    /// Run the migration to the end or to the first fatal error.
    pub async fn run(&mut self) -> Result<MigrationReport> {
        let dry_run = self.options.dry_run;
        let mut report = MigrationReport::new(dry_run);
        info!(
            source = %self.config.source_repo,
            target = %self.config.target_repo,
            dry_run,
            "Starting migration"
        );

        self.progress.set_phase(MigrationPhase::FetchingIssues, 1);
        let entries = read_entries(self.source.as_ref(), self.options.skip).await?;
        report.total_entries = entries.len();

        self.prepare_checkpoint().await?;
        let mut id_map = self.checkpoint.id_map()?;

        let mut converter = IssueConverter::new(&self.config, &self.options, self.client.clone());
        let mut submitter = TargetSubmitter::new(self.client.clone(), &self.options);

        self.progress
            .set_phase(MigrationPhase::MigratingIssues, entries.len() as u64);
        let total = entries.len();

        for (index, entry) in entries.iter().enumerate() {
            let id = entry.id();

            if self.checkpoint.is_migrated(id)? {
                debug!(issue = id, "Already migrated");
                report.already_migrated += 1;
            } else {
                let (comments, changes, attachments) = match entry {
                    SourceEntry::Placeholder { .. } => Default::default(),
                    SourceEntry::Real(issue) => {
                        let comments = self.source.comments(id).await?;
                        let changes =
                            if self.options.annotate_changes || !issue.status.is_open_like() {
                                self.source.changes(id).await?
                            } else {
                                Vec::new()
                            };
                        let attachments = if self.options.annotate_attachments {
                            self.source.attachments(id).await?
                        } else {
                            Vec::new()
                        };
                        (comments, changes, attachments)
                    }
                };

                let payload = converter
                    .convert(entry, &comments, &changes, &attachments, &id_map)
                    .await?;

                if dry_run {
                    serde_json::to_writer_pretty(&mut self.output, &payload)?;
                    writeln!(self.output)?;
                } else {
                    self.checkpoint.mark_in_progress(id)?;
                    match submitter.submit(id, &payload).await? {
                        ImportOutcome::Imported { number } => {
                            self.checkpoint.mark_migrated(id, Some(number))?;
                            id_map.insert(id, number);
                        }
                        ImportOutcome::Unverified => {
                            self.checkpoint.mark_migrated(id, None)?;
                            report.unverified.push(id);
                            self.progress.message(&format!("#{id} unverified"));
                            report.add_warning(format!(
                                "Import of #{id} could not be confirmed; check the target issue"
                            ));
                        }
                    }
                }

                if entry.is_placeholder() {
                    report.placeholders_migrated += 1;
                } else {
                    report.issues_migrated += 1;
                }
                report.comments_migrated += payload.comments.len();
            }

            report.completed = index + 1;
            writeln!(self.output, "Completed {} of {total} issues", index + 1)?;
            self.output.flush()?;
            self.progress.increment(Some(&format!("#{id}")));
        }

        self.progress.set_phase(MigrationPhase::Complete, 0);
        report.complete();
        info!(
            completed = report.completed,
            already_migrated = report.already_migrated,
            "Migration finished"
        );
        Ok(report)
    }

    /// Check the checkpoint belongs to this run and reconcile interrupted
    /// imports. A dry run never writes to the checkpoint.
    async fn prepare_checkpoint(&mut self) -> Result<()> {
        let signature = self.config.signature();

        if self.options.dry_run {
            return match self.checkpoint.signature()? {
                Some(found) if found != signature => Err(MigrationError::CheckpointMismatch {
                    expected: signature,
                    found,
                }),
                _ => Ok(()),
            };
        }

        claim(self.checkpoint.as_ref(), &signature)?;

        self.progress.set_phase(MigrationPhase::Verifying, 1);
        let verifier = MigrationVerifier::new(self.client.clone());
        let result = verifier.verify(self.checkpoint.as_ref()).await?;
        if !result.is_clean() {
            warn!(
                confirmed = ?result.confirmed,
                cleared = ?result.cleared,
                "Reconciled interrupted imports"
            );
        }
        Ok(())
    }
}
