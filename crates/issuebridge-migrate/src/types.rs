//! Common types for migration operations.

use crate::error::{MigrationError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default Bitbucket 1.0 API root.
pub const DEFAULT_SOURCE_API_URL: &str = "https://api.bitbucket.org/1.0";
/// Default Bitbucket web root.
pub const DEFAULT_SOURCE_WEB_URL: &str = "https://bitbucket.org";
/// Default GitHub API root.
pub const DEFAULT_TARGET_API_URL: &str = "https://api.github.com";
/// Default GitHub web root.
pub const DEFAULT_TARGET_WEB_URL: &str = "https://github.com";

/// A repository identifier in `owner/name` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoSlug {
    pub owner: String,
    pub name: String,
}

impl RepoSlug {
    /// Create a slug from its parts.
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl FromStr for RepoSlug {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() != 2 || parts.iter().any(|p| p.trim().is_empty()) {
            return Err(MigrationError::InvalidConfig(format!(
                "Invalid repository format: {s}. Expected 'owner/repo'"
            )));
        }
        Ok(Self::new(parts[0].trim(), parts[1].trim()))
    }
}

impl TryFrom<String> for RepoSlug {
    type Error = MigrationError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<RepoSlug> for String {
    fn from(slug: RepoSlug) -> Self {
        slug.to_string()
    }
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A secret value that never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    /// Wrap a secret.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the secret for use in a request.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(***)")
    }
}

/// HTTP basic credentials for a private source tracker.
#[derive(Debug, Clone)]
pub struct SourceCredentials {
    pub username: String,
    pub password: SecretString,
}

/// Configuration for a migration operation.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Source repository on Bitbucket.
    pub source_repo: RepoSlug,

    /// Target repository on GitHub.
    pub target_repo: RepoSlug,

    /// Bitbucket API root.
    pub source_api_url: String,

    /// Bitbucket web root, used for back links.
    pub source_web_url: String,

    /// GitHub API root.
    pub target_api_url: String,

    /// GitHub web root, used for profile links.
    pub target_web_url: String,

    /// GitHub token for the import API.
    pub target_token: Option<SecretString>,

    /// Credentials for a private Bitbucket tracker.
    pub source_credentials: Option<SourceCredentials>,
}

impl MigrationConfig {
    /// Create a new migration configuration with public platform URLs.
    pub fn new(source_repo: RepoSlug, target_repo: RepoSlug) -> Self {
        Self {
            source_repo,
            target_repo,
            source_api_url: DEFAULT_SOURCE_API_URL.to_string(),
            source_web_url: DEFAULT_SOURCE_WEB_URL.to_string(),
            target_api_url: DEFAULT_TARGET_API_URL.to_string(),
            target_web_url: DEFAULT_TARGET_WEB_URL.to_string(),
            target_token: None,
            source_credentials: None,
        }
    }

    /// Set the GitHub token.
    pub fn with_target_token(mut self, token: impl Into<String>) -> Self {
        self.target_token = Some(SecretString::new(token));
        self
    }

    /// Set Bitbucket basic-auth credentials.
    pub fn with_source_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.source_credentials = Some(SourceCredentials {
            username: username.into(),
            password: SecretString::new(password),
        });
        self
    }

    /// Override the Bitbucket API root.
    pub fn with_source_api_url(mut self, url: impl Into<String>) -> Self {
        self.source_api_url = trim_url(url.into());
        self
    }

    /// Override the Bitbucket web root.
    pub fn with_source_web_url(mut self, url: impl Into<String>) -> Self {
        self.source_web_url = trim_url(url.into());
        self
    }

    /// Override the GitHub API root.
    pub fn with_target_api_url(mut self, url: impl Into<String>) -> Self {
        self.target_api_url = trim_url(url.into());
        self
    }

    /// Override the GitHub web root.
    pub fn with_target_web_url(mut self, url: impl Into<String>) -> Self {
        self.target_web_url = trim_url(url.into());
        self
    }

    /// Identifies the source/target pair a checkpoint belongs to.
    pub fn signature(&self) -> String {
        format!("bitbucket:{} -> github:{}", self.source_repo, self.target_repo)
    }

    /// Check that every endpoint is an absolute http(s) URL.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("source API URL", &self.source_api_url),
            ("source web URL", &self.source_web_url),
            ("target API URL", &self.target_api_url),
            ("target web URL", &self.target_web_url),
        ] {
            let parsed = url::Url::parse(value).map_err(|e| {
                MigrationError::InvalidConfig(format!("Invalid {name} '{value}': {e}"))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(MigrationError::InvalidConfig(format!(
                    "Invalid {name} '{value}': expected http or https"
                )));
            }
        }
        Ok(())
    }
}

fn trim_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

/// How changeset references in source text are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangesetMode {
    /// Remove changeset back-reference lines.
    #[default]
    Strip,
    /// Turn revision hashes into links to the source commit view.
    Link,
}

/// Options for controlling how the migration runs.
#[derive(Debug, Clone)]
pub struct MigrationOptions {
    /// Print converted payloads instead of submitting them.
    pub dry_run: bool,

    /// Number of leading source issues to skip.
    pub skip: u64,

    /// Changeset handling.
    pub changeset_mode: ChangesetMode,

    /// Render field changes as synthetic comments.
    pub annotate_changes: bool,

    /// List attachment names in the issue body.
    pub annotate_attachments: bool,

    /// Map of source usernames to GitHub usernames.
    pub user_mapping: HashMap<String, String>,

    /// Delay between import status checks.
    pub poll_interval: Duration,

    /// Minimum delay between consecutive import submissions.
    pub min_submit_interval: Duration,

    /// How many times a rate-limited submission is retried.
    pub max_rate_limit_retries: u32,

    /// Upper bound for a single rate-limit wait.
    pub max_rate_limit_wait: Duration,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            skip: 0,
            changeset_mode: ChangesetMode::Strip,
            annotate_changes: false,
            annotate_attachments: false,
            user_mapping: HashMap::new(),
            poll_interval: Duration::from_secs(1),
            min_submit_interval: Duration::from_secs(1),
            max_rate_limit_retries: 3,
            max_rate_limit_wait: Duration::from_secs(3600),
        }
    }
}

impl MigrationOptions {
    /// Enable or disable dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Skip the first `skip` source issues.
    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    /// Choose how changeset references are handled.
    pub fn with_changeset_mode(mut self, mode: ChangesetMode) -> Self {
        self.changeset_mode = mode;
        self
    }

    /// Enable or disable change annotations.
    pub fn with_change_annotations(mut self, annotate: bool) -> Self {
        self.annotate_changes = annotate;
        self
    }

    /// Enable or disable attachment annotations.
    pub fn with_attachment_annotations(mut self, annotate: bool) -> Self {
        self.annotate_attachments = annotate;
        self
    }

    /// Add a user mapping.
    pub fn with_user_mapping(
        mut self,
        source_user: impl Into<String>,
        target_user: impl Into<String>,
    ) -> Self {
        self.user_mapping
            .insert(source_user.into(), target_user.into());
        self
    }

    /// Set the import status poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the minimum interval between submissions.
    pub fn with_min_submit_interval(mut self, interval: Duration) -> Self {
        self.min_submit_interval = interval;
        self
    }
}

/// Issue status on the source platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueStatus {
    New,
    Open,
    OnHold,
    Resolved,
    Wontfix,
    Invalid,
    Duplicate,
    Closed,
    Other(String),
}

impl IssueStatus {
    /// Statuses that keep the issue open on the target.
    pub fn is_open_like(&self) -> bool {
        matches!(self, Self::New | Self::Open | Self::OnHold)
    }

    /// The status as Bitbucket spells it.
    pub fn as_str(&self) -> &str {
        match self {
            Self::New => "new",
            Self::Open => "open",
            Self::OnHold => "on hold",
            Self::Resolved => "resolved",
            Self::Wontfix => "wontfix",
            Self::Invalid => "invalid",
            Self::Duplicate => "duplicate",
            Self::Closed => "closed",
            Self::Other(other) => other,
        }
    }
}

impl From<&str> for IssueStatus {
    fn from(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "new" => Self::New,
            "open" => Self::Open,
            "on hold" | "on_hold" | "onhold" => Self::OnHold,
            "resolved" => Self::Resolved,
            "wontfix" => Self::Wontfix,
            "invalid" => Self::Invalid,
            "duplicate" => Self::Duplicate,
            "closed" => Self::Closed,
            _ => Self::Other(value.to_string()),
        }
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user identity on the source platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceUser {
    pub username: String,
    pub display_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl SourceUser {
    /// A user known only by username.
    pub fn named(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }

    /// Human readable name.
    pub fn display(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.username)
    }

    /// `first last` when both parts are known, else [`SourceUser::display`].
    pub fn full_name(&self) -> String {
        match (self.first_name.as_deref(), self.last_name.as_deref()) {
            (Some(first), Some(last)) if !first.is_empty() && !last.is_empty() => {
                format!("{first} {last}")
            }
            _ => self.display().to_string(),
        }
    }
}

/// An issue read from the source platform.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceIssue {
    pub id: u64,
    pub title: String,
    pub content: String,
    pub status: IssueStatus,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
    pub reporter: Option<SourceUser>,
    pub assignee: Option<SourceUser>,
    pub priority: String,
    pub component: Option<String>,
    pub kind: Option<String>,
    pub version: Option<String>,
    pub milestone: Option<String>,
}

/// One position in the gap-filled issue sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEntry {
    /// An issue that exists on the source.
    Real(SourceIssue),
    /// Filler for a deleted source issue.
    Placeholder { id: u64 },
}

impl SourceEntry {
    /// The source identifier of this position.
    pub fn id(&self) -> u64 {
        match self {
            Self::Real(issue) => issue.id,
            Self::Placeholder { id } => *id,
        }
    }

    /// Whether this entry is filler.
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Self::Placeholder { .. })
    }
}

/// A comment on a source issue.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceComment {
    pub id: u64,
    pub created_on: DateTime<Utc>,
    pub author: Option<SourceUser>,
    pub content: String,
}

/// A single field transition inside a change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub field: String,
    pub old: Option<String>,
    pub new: Option<String>,
}

/// A change event on a source issue.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceChange {
    pub created_on: DateTime<Utc>,
    pub author: Option<SourceUser>,
    pub fields: Vec<FieldChange>,
}

/// Issue in the target's import schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertedIssue {
    pub title: String,
    pub body: String,
    pub closed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub labels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
}

/// Comment in the target's import schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertedComment {
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Body posted to the import endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportPayload {
    pub issue: ConvertedIssue,
    pub comments: Vec<ConvertedComment>,
}

/// Parses the timestamp formats used by the Bitbucket API and exports.
pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%:z", "%Y-%m-%d %H:%M:%S%.f%:z"] {
        if let Ok(ts) = DateTime::parse_from_str(value, format) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, format) {
            return Some(ts.and_utc());
        }
    }
    None
}

/// Parse a timestamp the source must provide.
pub(crate) fn require_timestamp(
    value: Option<&str>,
    context: impl FnOnce() -> String,
) -> Result<DateTime<Utc>> {
    value
        .and_then(parse_timestamp)
        .ok_or_else(|| MigrationError::InvalidTimestamp {
            context: context(),
            value: value.map(str::to_string),
        })
}

/// Report of a completed migration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Whether this was a dry run.
    pub dry_run: bool,

    /// Entries in the gap-filled sequence.
    pub total_entries: usize,

    /// Entries processed in this run (including ones already migrated).
    pub completed: usize,

    /// Real issues submitted or printed.
    pub issues_migrated: usize,

    /// Placeholders submitted or printed.
    pub placeholders_migrated: usize,

    /// Comments (including change annotations) carried over.
    pub comments_migrated: usize,

    /// Entries skipped because the checkpoint marked them migrated.
    pub already_migrated: usize,

    /// Imports whose resulting number could not be confirmed.
    pub unverified: Vec<u64>,

    /// Warnings generated during migration.
    pub warnings: Vec<String>,

    /// Start time of migration.
    pub started_at: Option<DateTime<Utc>>,

    /// End time of migration.
    pub completed_at: Option<DateTime<Utc>>,
}

impl MigrationReport {
    /// Create a new empty report.
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Mark the migration as complete.
    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    /// Whether every entry of the sequence was handled.
    pub fn is_successful(&self) -> bool {
        self.completed == self.total_entries
    }

    /// Add a warning to the report.
    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Get the duration of the migration.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Print a summary of the migration.
    pub fn print_summary(&self) {
        println!("\n=== Migration Summary ===\n");
        println!(
            "Mode:               {}",
            if self.dry_run { "Dry run" } else { "Live" }
        );
        println!("Issues:             {}", self.issues_migrated);
        println!("Placeholders:       {}", self.placeholders_migrated);
        println!("Comments:           {}", self.comments_migrated);
        println!("Already migrated:   {}", self.already_migrated);

        if !self.unverified.is_empty() {
            let ids: Vec<String> = self.unverified.iter().map(|id| format!("#{id}")).collect();
            println!("Unverified imports: {}", ids.join(", "));
        }

        if let Some(duration) = self.duration() {
            println!("\nCompleted in {} seconds", duration.num_seconds());
        }

        if !self.warnings.is_empty() {
            println!("\nWarnings ({}):", self.warnings.len());
            for warning in &self.warnings {
                println!("  - {warning}");
            }
        }

        println!(
            "\nCompleted {} of {} issues",
            self.completed, self.total_entries
        );
    }
}
