//! # Issuebridge
//!
//! Moves a Bitbucket issue tracker into a GitHub repository through GitHub's
//! issue import API, keeping every issue at its original number.
//!
//! ## Features
//!
//! - **Two sources**: the Bitbucket 1.0 REST API or an issue export archive
//! - **Number alignment**: deleted issues are filled with closed placeholders
//! - **Text conversion**: code blocks, changeset references, issue links and
//!   mentions are rewritten to GitHub markdown
//! - **Resumable**: a checkpoint records each imported issue, and interrupted
//!   imports are verified against the target before resuming
//! - **Dry run**: prints every payload instead of submitting it
//!
//! ## Example
//!
//! ```rust,ignore
//! use issuebridge_migrate::{
//!     BitbucketSource, MigrationConfig, MigrationDriver, MigrationOptions,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = MigrationConfig::new("owner/repo".parse()?, "org/repo".parse()?)
//!         .with_target_token("ghp_xxx");
//!     let options = MigrationOptions::default().with_dry_run(true);
//!
//!     let source = BitbucketSource::new(&config)?;
//!     let mut driver = MigrationDriver::new(config, options, Box::new(source))?;
//!     let report = driver.run().await?;
//!
//!     report.print_summary();
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod bitbucket;
pub mod checkpoint;
pub mod client;
pub mod config;
pub mod convert;
pub mod driver;
pub mod error;
pub mod milestones;
pub mod progress;
pub mod source;
pub mod submit;
pub mod text;
pub mod types;
pub mod users;
pub mod verify;

// Re-export main types
pub use archive::ArchiveSource;
pub use bitbucket::BitbucketSource;
pub use checkpoint::{CheckpointEntry, CheckpointStore, JsonFileCheckpointStore, MemoryCheckpointStore};
pub use client::GitHubClient;
pub use config::FileConfig;
pub use convert::IssueConverter;
pub use driver::MigrationDriver;
pub use error::{MigrationError, Result};
pub use milestones::MilestoneRegistry;
pub use progress::{ConsoleProgressReporter, MigrationProgress, ProgressCallback};
pub use source::{fill_gaps, read_entries, IssueSource};
pub use submit::{ImportOutcome, TargetSubmitter};
pub use text::{IssueIdMap, TextTransformer};
pub use types::*;
pub use users::UserResolver;
pub use verify::MigrationVerifier;

/// Version of the migration tools.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
