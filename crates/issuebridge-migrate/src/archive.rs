//! Bitbucket export archive source.
//!
//! Bitbucket's issue export is a zip holding `db-1.0.json`. Both the zip and
//! the extracted JSON file are accepted.

use crate::error::{MigrationError, Result};
use crate::source::IssueSource;
use crate::types::{
    parse_timestamp, require_timestamp, FieldChange, IssueStatus, SourceChange, SourceComment,
    SourceIssue, SourceUser,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::info;
use zip::ZipArchive;

/// Name of the database file inside an export.
pub const DATABASE_FILE: &str = "db-1.0.json";

#[derive(Debug, Deserialize)]
struct ArchiveDatabase {
    #[serde(default)]
    issues: Vec<ArchiveIssue>,
    #[serde(default)]
    comments: Vec<ArchiveComment>,
    #[serde(default)]
    logs: Vec<ArchiveLog>,
    #[serde(default)]
    attachments: Vec<ArchiveAttachment>,
}

#[derive(Debug, Deserialize)]
struct ArchiveIssue {
    id: u64,
    title: String,
    #[serde(default)]
    content: Option<String>,
    status: String,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    component: Option<String>,
    #[serde(default)]
    milestone: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    reporter: Option<ArchiveUser>,
    #[serde(default)]
    assignee: Option<ArchiveUser>,
    #[serde(default)]
    created_on: Option<String>,
    #[serde(default)]
    updated_on: Option<String>,
}

/// Older exports store users as plain usernames, newer ones as objects.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ArchiveUser {
    Name(String),
    Profile {
        #[serde(default)]
        display_name: Option<String>,
        #[serde(default)]
        nickname: Option<String>,
        #[serde(default)]
        account_id: Option<String>,
    },
}

impl ArchiveUser {
    fn into_source_user(self) -> Option<SourceUser> {
        match self {
            Self::Name(name) if !name.trim().is_empty() => Some(SourceUser::named(name)),
            Self::Name(_) => None,
            Self::Profile {
                display_name,
                nickname,
                account_id,
            } => {
                let username = nickname.or(account_id).or_else(|| display_name.clone())?;
                Some(SourceUser {
                    display_name,
                    ..SourceUser::named(username)
                })
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ArchiveComment {
    id: u64,
    issue: u64,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    user: Option<ArchiveUser>,
    #[serde(default)]
    created_on: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArchiveLog {
    issue: u64,
    field: String,
    #[serde(default)]
    changed_from: Option<String>,
    #[serde(default)]
    changed_to: Option<String>,
    #[serde(default)]
    user: Option<ArchiveUser>,
    #[serde(default)]
    created_on: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArchiveAttachment {
    issue: u64,
    filename: String,
}

/// Issues loaded from an export archive.
#[derive(Debug, Default)]
pub struct ArchiveSource {
    issues: Vec<SourceIssue>,
    comments: HashMap<u64, Vec<SourceComment>>,
    changes: HashMap<u64, Vec<SourceChange>>,
    attachments: HashMap<u64, Vec<String>>,
}

impl ArchiveSource {
    /// Load an export, either the zip or the extracted database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let is_zip = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));

        let json = if is_zip {
            read_from_zip(File::open(path)?)?
        } else {
            std::fs::read_to_string(path)?
        };

        let source = Self::from_json(&json)?;
        info!(
            path = %path.display(),
            issues = source.issues.len(),
            "Loaded export archive"
        );
        Ok(source)
    }

    /// Build a source from the text of `db-1.0.json`.
    pub fn from_json(json: &str) -> Result<Self> {
        let db: ArchiveDatabase =
            serde_json::from_str(json).map_err(|e| MigrationError::schema(DATABASE_FILE, e))?;

        let mut source = Self {
            issues: db
                .issues
                .into_iter()
                .map(convert_issue)
                .collect::<Result<_>>()?,
            ..Default::default()
        };

        for comment in db.comments {
            let Some(content) = comment.content.filter(|c| !c.trim().is_empty()) else {
                continue;
            };
            let created_on = require_timestamp(comment.created_on.as_deref(), || {
                format!("comment {} of issue #{}", comment.id, comment.issue)
            })?;
            source
                .comments
                .entry(comment.issue)
                .or_default()
                .push(SourceComment {
                    id: comment.id,
                    created_on,
                    author: comment.user.and_then(ArchiveUser::into_source_user),
                    content,
                });
        }
        for comments in source.comments.values_mut() {
            comments.sort_by_key(|c| (c.created_on, c.id));
        }

        for log in db.logs {
            let created_on = require_timestamp(log.created_on.as_deref(), || {
                format!("log entry of issue #{}", log.issue)
            })?;
            source.changes.entry(log.issue).or_default().push(SourceChange {
                created_on,
                author: log.user.and_then(ArchiveUser::into_source_user),
                fields: vec![FieldChange {
                    field: log.field,
                    old: log.changed_from,
                    new: log.changed_to,
                }],
            });
        }
        for changes in source.changes.values_mut() {
            changes.sort_by_key(|c| c.created_on);
        }

        for attachment in db.attachments {
            source
                .attachments
                .entry(attachment.issue)
                .or_default()
                .push(attachment.filename);
        }

        Ok(source)
    }
}

#[async_trait]
impl IssueSource for ArchiveSource {
    async fn issues(&self) -> Result<Vec<SourceIssue>> {
        Ok(self.issues.clone())
    }

    async fn comments(&self, issue_id: u64) -> Result<Vec<SourceComment>> {
        Ok(self.comments.get(&issue_id).cloned().unwrap_or_default())
    }

    async fn changes(&self, issue_id: u64) -> Result<Vec<SourceChange>> {
        Ok(self.changes.get(&issue_id).cloned().unwrap_or_default())
    }

    async fn attachments(&self, issue_id: u64) -> Result<Vec<String>> {
        Ok(self.attachments.get(&issue_id).cloned().unwrap_or_default())
    }
}

fn read_from_zip(file: File) -> Result<String> {
    let mut archive = ZipArchive::new(file)?;
    let name = archive
        .file_names()
        .find(|name| name.rsplit('/').next() == Some(DATABASE_FILE))
        .map(str::to_string)
        .ok_or(zip::result::ZipError::FileNotFound)?;

    let mut json = String::new();
    archive.by_name(&name)?.read_to_string(&mut json)?;
    Ok(json)
}

fn convert_issue(issue: ArchiveIssue) -> Result<SourceIssue> {
    let created_on =
        require_timestamp(issue.created_on.as_deref(), || format!("issue #{}", issue.id))?;
    let updated_on = issue
        .updated_on
        .as_deref()
        .and_then(parse_timestamp)
        .unwrap_or(created_on);

    Ok(SourceIssue {
        id: issue.id,
        title: issue.title,
        content: issue.content.unwrap_or_default(),
        status: IssueStatus::from(issue.status.as_str()),
        created_on,
        updated_on,
        reporter: issue.reporter.and_then(ArchiveUser::into_source_user),
        assignee: issue.assignee.and_then(ArchiveUser::into_source_user),
        priority: issue.priority.unwrap_or_default(),
        component: issue.component,
        kind: issue.kind,
        version: issue.version,
        milestone: issue.milestone,
    })
}
