//! Configuration file support.
//!
//! ```toml
//! [source]
//! repo = "owner/project"
//! username = "owner"
//!
//! [target]
//! repo = "org/project"
//!
//! [options]
//! link_changesets = true
//! annotate_changes = true
//! checkpoint = "project.checkpoint.json"
//!
//! [users]
//! bb-name = "gh-name"
//! ```

use crate::error::{MigrationError, Result};
use crate::types::{ChangesetMode, MigrationOptions, RepoSlug};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Contents of a configuration file. Every field is optional; command-line
/// flags take precedence over anything set here.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub source: SourceSection,
    #[serde(default)]
    pub target: TargetSection,
    #[serde(default)]
    pub options: OptionsSection,
    /// Source username to GitHub username.
    #[serde(default)]
    pub users: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSection {
    pub repo: Option<RepoSlug>,
    pub api_url: Option<String>,
    pub web_url: Option<String>,
    /// Username for HTTP basic auth against a private tracker.
    pub username: Option<String>,
    /// Read from an export archive instead of the API.
    pub archive: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetSection {
    pub repo: Option<RepoSlug>,
    pub api_url: Option<String>,
    pub web_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptionsSection {
    pub skip: Option<u64>,
    pub link_changesets: Option<bool>,
    pub annotate_changes: Option<bool>,
    pub annotate_attachments: Option<bool>,
    pub checkpoint: Option<PathBuf>,
    pub poll_interval_ms: Option<u64>,
    pub min_submit_interval_ms: Option<u64>,
    pub max_rate_limit_retries: Option<u32>,
    pub max_rate_limit_wait_secs: Option<u64>,
}

impl FileConfig {
    /// Parse a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
            .map_err(|e| MigrationError::InvalidConfig(format!("{}: {e}", path.display())))
    }

    /// Parse configuration text.
    pub fn parse(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Migration options with every value this file sets applied over the
    /// defaults.
    pub fn options(&self) -> MigrationOptions {
        let section = &self.options;
        let mut options = MigrationOptions::default();

        if let Some(skip) = section.skip {
            options.skip = skip;
        }
        if section.link_changesets == Some(true) {
            options.changeset_mode = ChangesetMode::Link;
        }
        if let Some(annotate) = section.annotate_changes {
            options.annotate_changes = annotate;
        }
        if let Some(annotate) = section.annotate_attachments {
            options.annotate_attachments = annotate;
        }
        if let Some(ms) = section.poll_interval_ms {
            options.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = section.min_submit_interval_ms {
            options.min_submit_interval = Duration::from_millis(ms);
        }
        if let Some(retries) = section.max_rate_limit_retries {
            options.max_rate_limit_retries = retries;
        }
        if let Some(secs) = section.max_rate_limit_wait_secs {
            options.max_rate_limit_wait = Duration::from_secs(secs);
        }
        options.user_mapping = self.users.clone();
        options
    }
}
