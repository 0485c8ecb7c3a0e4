//! Bitbucket 1.0 issue API source.

use crate::error::{MigrationError, Result};
use crate::source::IssueSource;
use crate::VERSION;
use crate::types::{
    parse_timestamp, require_timestamp, FieldChange, IssueStatus, MigrationConfig, RepoSlug,
    SourceChange, SourceComment, SourceCredentials, SourceIssue, SourceUser,
};
use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

const PAGE_SIZE: usize = 50;

#[derive(Debug, Deserialize)]
struct IssuePage {
    /// Total issue count. Some deployments omit it.
    #[serde(default)]
    count: Option<u64>,
    #[serde(default)]
    issues: Vec<BitbucketIssue>,
}

#[derive(Debug, Deserialize)]
struct BitbucketIssue {
    local_id: u64,
    title: String,
    #[serde(default)]
    content: Option<String>,
    status: String,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    reported_by: Option<BitbucketUser>,
    #[serde(default)]
    responsible: Option<BitbucketUser>,
    #[serde(default)]
    metadata: BitbucketMetadata,
    #[serde(default)]
    utc_created_on: Option<String>,
    #[serde(default)]
    created_on: Option<String>,
    #[serde(default)]
    utc_last_updated: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BitbucketMetadata {
    kind: Option<String>,
    component: Option<String>,
    version: Option<String>,
    milestone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BitbucketUser {
    username: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
}

impl From<BitbucketUser> for SourceUser {
    fn from(user: BitbucketUser) -> Self {
        let non_empty = |s: Option<String>| s.filter(|s| !s.trim().is_empty());
        Self {
            username: user.username,
            display_name: non_empty(user.display_name),
            first_name: non_empty(user.first_name),
            last_name: non_empty(user.last_name),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BitbucketComment {
    comment_id: u64,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    author_info: Option<BitbucketUser>,
    #[serde(default)]
    utc_created_on: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BitbucketChange {
    #[serde(default)]
    changes: BTreeMap<String, BitbucketFieldChange>,
    #[serde(default)]
    user: Option<BitbucketUser>,
    #[serde(default)]
    utc_created_on: Option<String>,
    #[serde(default)]
    created_on: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BitbucketFieldChange {
    #[serde(default)]
    old: Option<serde_json::Value>,
    #[serde(default)]
    new: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct BitbucketAttachment {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    filename: Option<String>,
}

/// Reads issues from the Bitbucket 1.0 REST API.
pub struct BitbucketSource {
    client: Client,
    api_url: String,
    repo: RepoSlug,
    credentials: Option<SourceCredentials>,
}

impl BitbucketSource {
    /// Create a source for the configured repository.
    pub fn new(config: &MigrationConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!("issuebridge/{VERSION}"))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| MigrationError::NetworkError(e.to_string()))?;

        Ok(Self {
            client,
            api_url: config.source_api_url.clone(),
            repo: config.source_repo.clone(),
            credentials: config.source_credentials.clone(),
        })
    }

    fn issues_url(&self) -> String {
        format!(
            "{}/repositories/{}/{}/issues",
            self.api_url, self.repo.owner, self.repo.name
        )
    }

    /// Whether the tracker refuses anonymous access.
    pub async fn probe_auth_required(&self) -> Result<bool> {
        let url = format!("{}/", self.issues_url());
        let response = self
            .client
            .request(Method::HEAD, &url)
            .send()
            .await
            .map_err(|e| MigrationError::NetworkError(e.to_string()))?;

        let status = response.status();
        debug!(url = %url, status = status.as_u16(), "Probed source tracker");
        Ok(matches!(
            status,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ))
    }

    async fn get(&self, url: &str) -> Result<Response> {
        let mut request = self.client.get(url);
        if let Some(credentials) = &self.credentials {
            request = request.basic_auth(
                &credentials.username,
                Some(credentials.password.expose()),
            );
        }
        request
            .send()
            .await
            .map_err(|e| MigrationError::NetworkError(e.to_string()))
    }

    async fn parse<T: DeserializeOwned>(response: Response, context: &str) -> Result<T> {
        let text = response
            .text()
            .await
            .map_err(|e| MigrationError::NetworkError(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| MigrationError::schema(context, e))
    }

    fn is_success(status: StatusCode) -> bool {
        matches!(status, StatusCode::OK | StatusCode::ACCEPTED)
    }

    fn fatal(url: &str, status: StatusCode) -> MigrationError {
        match status {
            StatusCode::UNAUTHORIZED => MigrationError::AuthenticationFailed(
                "Invalid Bitbucket credentials".to_string(),
            ),
            status => MigrationError::UnexpectedStatus {
                url: url.to_string(),
                status: status.as_u16(),
            },
        }
    }
}

#[async_trait]
impl IssueSource for BitbucketSource {
    async fn issues(&self) -> Result<Vec<SourceIssue>> {
        let mut issues = Vec::new();
        let mut start = 0usize;

        loop {
            let url = format!("{}/?start={start}&limit={PAGE_SIZE}", self.issues_url());
            let response = self.get(&url).await?;
            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                return Err(MigrationError::RepositoryNotFound(self.repo.to_string()));
            }
            if !Self::is_success(status) {
                return Err(Self::fatal(&url, status));
            }

            let page: IssuePage = Self::parse(response, "issue list").await?;
            debug!(start, received = page.issues.len(), total = ?page.count, "Fetched issue page");
            if page.issues.is_empty() {
                break;
            }

            start += page.issues.len();
            for issue in page.issues {
                issues.push(convert_issue(issue)?);
            }
            // Without a total, keep going until an empty page.
            if page.count.is_some_and(|count| start as u64 >= count) {
                break;
            }
        }

        Ok(issues)
    }

    async fn comments(&self, issue_id: u64) -> Result<Vec<SourceComment>> {
        let url = format!("{}/{issue_id}/comments/", self.issues_url());
        let response = self.get(&url).await?;
        let status = response.status();
        if !Self::is_success(status) {
            return Err(Self::fatal(&url, status));
        }

        let raw: Vec<BitbucketComment> = Self::parse(response, "comment list").await?;
        let mut comments = Vec::with_capacity(raw.len());
        for comment in raw {
            // Status updates come through as comments without a body.
            let Some(content) = comment.content.filter(|c| !c.trim().is_empty()) else {
                continue;
            };
            let created_on = require_timestamp(comment.utc_created_on.as_deref(), || {
                format!("comment {} of issue #{issue_id}", comment.comment_id)
            })?;
            comments.push(SourceComment {
                id: comment.comment_id,
                created_on,
                author: comment.author_info.map(SourceUser::from),
                content,
            });
        }
        comments.sort_by_key(|c| (c.created_on, c.id));
        Ok(comments)
    }

    async fn changes(&self, issue_id: u64) -> Result<Vec<SourceChange>> {
        let url = format!("{}/{issue_id}/changes/", self.issues_url());
        let response = self.get(&url).await?;
        let status = response.status();
        if status.is_server_error() {
            warn!(issue = issue_id, status = status.as_u16(), "Change history unavailable");
            return Ok(Vec::new());
        }
        if !Self::is_success(status) {
            return Err(Self::fatal(&url, status));
        }

        let raw: Vec<BitbucketChange> = Self::parse(response, "change list").await?;
        raw.into_iter()
            .map(|change| {
                let created_on = require_timestamp(
                    change
                        .utc_created_on
                        .as_deref()
                        .or(change.created_on.as_deref()),
                    || format!("change history of issue #{issue_id}"),
                )?;
                Ok(SourceChange {
                    created_on,
                    author: change.user.map(SourceUser::from),
                    fields: change
                        .changes
                        .into_iter()
                        .map(|(field, values)| FieldChange {
                            field,
                            old: values.old.and_then(value_text),
                            new: values.new.and_then(value_text),
                        })
                        .collect(),
                })
            })
            .collect()
    }

    async fn attachments(&self, issue_id: u64) -> Result<Vec<String>> {
        let url = format!("{}/{issue_id}/attachments/", self.issues_url());
        let response = self.get(&url).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !Self::is_success(status) {
            return Err(Self::fatal(&url, status));
        }

        let raw: Vec<BitbucketAttachment> = Self::parse(response, "attachment list").await?;
        Ok(raw
            .into_iter()
            .filter_map(|a| a.name.or(a.filename))
            .collect())
    }
}

fn convert_issue(issue: BitbucketIssue) -> Result<SourceIssue> {
    let id = issue.local_id;
    let created_on = require_timestamp(
        issue
            .utc_created_on
            .as_deref()
            .or(issue.created_on.as_deref()),
        || format!("issue #{id}"),
    )?;
    let updated_on = issue
        .utc_last_updated
        .as_deref()
        .and_then(parse_timestamp)
        .unwrap_or(created_on);

    Ok(SourceIssue {
        id,
        title: issue.title,
        content: issue.content.unwrap_or_default(),
        status: IssueStatus::from(issue.status.as_str()),
        created_on,
        updated_on,
        reporter: issue.reported_by.map(SourceUser::from),
        assignee: issue.responsible.map(SourceUser::from),
        priority: issue.priority.unwrap_or_default(),
        component: issue.metadata.component,
        kind: issue.metadata.kind,
        version: issue.metadata.version,
        milestone: issue.metadata.milestone,
    })
}

fn value_text(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}
