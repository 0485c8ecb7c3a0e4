//! Conversion of source issues into import payloads.

use crate::client::GitHubClient;
use crate::error::Result;
use crate::milestones::MilestoneRegistry;
use crate::text::{IssueIdMap, TextTransformer};
use crate::types::{
    ConvertedComment, ConvertedIssue, ImportPayload, IssueStatus, MigrationConfig,
    MigrationOptions, SourceChange, SourceComment, SourceEntry, SourceIssue,
};
use crate::users::UserResolver;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;
use std::fmt::Write as _;

/// Longest label the target accepts.
pub const MAX_LABEL_LEN: usize = 50;

/// Title given to filler issues.
pub const PLACEHOLDER_TITLE: &str = "Deleted issue";

/// Body given to filler issues.
pub const PLACEHOLDER_BODY: &str =
    "This issue was deleted on Bitbucket. It exists only to keep issue numbers aligned.";

const FOOTER_RULE: &str = "---------------------------------------";

/// Turns source entries into import payloads.
pub struct IssueConverter {
    transformer: TextTransformer,
    users: UserResolver,
    milestones: MilestoneRegistry,
    issue_url_base: String,
    assignees: HashMap<String, String>,
    annotate_changes: bool,
    annotate_attachments: bool,
}

impl IssueConverter {
    /// Build a converter and the caches it owns.
    pub fn new(config: &MigrationConfig, options: &MigrationOptions, client: GitHubClient) -> Self {
        Self {
            transformer: TextTransformer::new(
                &config.source_web_url,
                &config.source_repo,
                options.changeset_mode,
                options.user_mapping.clone(),
            ),
            users: UserResolver::new(
                client.clone(),
                config.source_web_url.clone(),
                config.target_web_url.clone(),
                options.user_mapping.clone(),
            ),
            milestones: MilestoneRegistry::new(client, options.dry_run),
            issue_url_base: format!(
                "{}/{}/{}/issue",
                config.source_web_url, config.source_repo.owner, config.source_repo.name
            ),
            assignees: options.user_mapping.clone(),
            annotate_changes: options.annotate_changes,
            annotate_attachments: options.annotate_attachments,
        }
    }

    /// Convert one entry together with its comments, changes and attachment names.
    pub async fn convert(
        &mut self,
        entry: &SourceEntry,
        comments: &[SourceComment],
        changes: &[SourceChange],
        attachments: &[String],
        id_map: &IssueIdMap,
    ) -> Result<ImportPayload> {
        let issue = match entry {
            SourceEntry::Placeholder { .. } => return Ok(placeholder_payload()),
            SourceEntry::Real(issue) => issue,
        };

        let body = self.issue_body(issue, attachments, id_map).await?;

        let closed = !issue.status.is_open_like();
        let milestone = match issue.milestone.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => Some(self.milestones.ensure(title).await?),
            _ => None,
        };
        let assignee = issue
            .assignee
            .as_ref()
            .and_then(|user| self.assignees.get(&user.username))
            .cloned();

        let mut converted = Vec::with_capacity(comments.len());
        for comment in comments {
            let author = self.users.resolve(comment.author.as_ref()).await?;
            let text = self.transformer.transform(&comment.content, id_map);
            converted.push(ConvertedComment {
                body: format!("{text}\n\n{FOOTER_RULE}\nOriginal Comment By: {author}"),
                created_at: Some(comment.created_on),
            });
        }
        if self.annotate_changes {
            for change in changes {
                if let Some(annotation) = self.annotate(change).await? {
                    converted.push(annotation);
                }
            }
        }
        converted.sort_by_key(|c| c.created_at);

        Ok(ImportPayload {
            issue: ConvertedIssue {
                title: issue.title.clone(),
                body,
                closed,
                created_at: Some(issue.created_on),
                updated_at: Some(issue.updated_on),
                closed_at: closed.then(|| closed_at(issue, changes)),
                labels: build_labels(issue),
                milestone,
                assignee,
            },
            comments: converted,
        })
    }

    async fn issue_body(
        &mut self,
        issue: &SourceIssue,
        attachments: &[String],
        id_map: &IssueIdMap,
    ) -> Result<String> {
        let mut body = self.transformer.transform(&issue.content, id_map);

        if self.annotate_attachments && !attachments.is_empty() {
            body.push_str("\n\nAttachments (not migrated):\n");
            for name in attachments {
                let _ = write!(body, "\n- `{name}`");
            }
        }

        let reporter = self.users.resolve(issue.reporter.as_ref()).await?;
        let _ = write!(
            body,
            "\n\n{FOOTER_RULE}\n- Bitbucket: {}/{}\n- Originally Reported By: {reporter}\n- Originally Created At: {}",
            self.issue_url_base,
            issue.id,
            issue.created_on.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        Ok(body)
    }

    async fn annotate(&mut self, change: &SourceChange) -> Result<Option<ConvertedComment>> {
        let lines: Vec<String> = change
            .fields
            .iter()
            .filter(|f| f.field != "content" && f.old != f.new)
            .map(|f| {
                format!(
                    "changed {} from {} to {}",
                    f.field,
                    describe(f.old.as_deref()),
                    describe(f.new.as_deref())
                )
            })
            .collect();
        if lines.is_empty() {
            return Ok(None);
        }

        let author = self.users.resolve(change.author.as_ref()).await?;
        let body = lines
            .iter()
            .map(|line| format!("{author} {line}"))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(Some(ConvertedComment {
            body,
            created_at: Some(change.created_on),
        }))
    }
}

fn describe(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => format!("`{v}`"),
        _ => "(none)".to_string(),
    }
}

fn placeholder_payload() -> ImportPayload {
    ImportPayload {
        issue: ConvertedIssue {
            title: PLACEHOLDER_TITLE.to_string(),
            body: PLACEHOLDER_BODY.to_string(),
            closed: true,
            created_at: None,
            updated_at: None,
            closed_at: None,
            labels: Vec::new(),
            milestone: None,
            assignee: None,
        },
        comments: Vec::new(),
    }
}

/// Labels for an issue: priority first, then component, kind and version.
pub fn build_labels(issue: &SourceIssue) -> Vec<String> {
    let candidates = std::iter::once(Some(issue.priority.as_str())).chain([
        issue.component.as_deref(),
        issue.kind.as_deref(),
        issue.version.as_deref(),
    ]);

    let mut labels: Vec<String> = Vec::new();
    for value in candidates.flatten() {
        let label = sanitize_label(value);
        if !label.is_empty() && !labels.contains(&label) {
            labels.push(label);
        }
    }
    labels
}

/// Remove commas and cap the length at [`MAX_LABEL_LEN`] characters.
pub fn sanitize_label(value: &str) -> String {
    value
        .replace(',', "")
        .trim()
        .chars()
        .take(MAX_LABEL_LEN)
        .collect()
}

/// When the issue was closed: the latest open-to-closed status transition,
/// else its last update.
pub fn closed_at(issue: &SourceIssue, changes: &[SourceChange]) -> DateTime<Utc> {
    changes
        .iter()
        .filter(|change| {
            change.fields.iter().any(|f| {
                f.field == "status"
                    && f.old
                        .as_deref()
                        .is_some_and(|old| IssueStatus::from(old).is_open_like())
                    && f.new
                        .as_deref()
                        .is_some_and(|new| !IssueStatus::from(new).is_open_like())
            })
        })
        .map(|change| change.created_on)
        .max()
        .unwrap_or(issue.updated_on)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::tests::issue;
    use crate::types::{FieldChange, SourceUser};
    use chrono::TimeZone;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2013, 5, day, 12, 0, 0).unwrap()
    }

    fn status_change(day: u32, old: &str, new: &str) -> SourceChange {
        SourceChange {
            created_on: at(day),
            author: None,
            fields: vec![FieldChange {
                field: "status".to_string(),
                old: Some(old.to_string()),
                new: Some(new.to_string()),
            }],
        }
    }

    fn converter(server: &MockServer, options: MigrationOptions) -> IssueConverter {
        let config = MigrationConfig::new(
            "owner/repo".parse().unwrap(),
            "gh/repo".parse().unwrap(),
        )
        .with_target_api_url(server.uri());
        let client = GitHubClient::new(&config).unwrap();
        IssueConverter::new(&config, &options, client)
    }

    fn comment(id: u64, day: u32, content: &str) -> SourceComment {
        SourceComment {
            id,
            created_on: at(day),
            author: Some(SourceUser::named("dave")),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_label_truncation_and_commas() {
        let long = "x".repeat(60);
        let mut source = issue(1);
        source.priority = "critical".to_string();
        source.component = Some(format!("a,b{long}"));
        source.kind = Some("critical".to_string());
        source.version = Some(String::new());

        let labels = build_labels(&source);
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[0], "critical");
        assert_eq!(labels[1].chars().count(), MAX_LABEL_LEN);
        assert!(labels[1].starts_with("abxx"));
        assert!(!labels[1].contains(','));
    }

    #[test]
    fn test_closed_at_uses_latest_close() {
        let mut source = issue(1);
        source.status = IssueStatus::Resolved;
        source.updated_on = at(20);

        let changes = vec![
            status_change(2, "new", "resolved"),
            status_change(3, "resolved", "open"),
            status_change(9, "open", "wontfix"),
            status_change(12, "wontfix", "invalid"),
        ];
        assert_eq!(closed_at(&source, &changes), at(9));
        assert_eq!(closed_at(&source, &[]), at(20));
    }

    #[tokio::test]
    async fn test_placeholder() {
        let server = MockServer::start().await;
        let mut converter = converter(&server, MigrationOptions::default());

        let payload = converter
            .convert(
                &SourceEntry::Placeholder { id: 3 },
                &[comment(1, 1, "ignored")],
                &[],
                &[],
                &IssueIdMap::new(),
            )
            .await
            .unwrap();

        assert_eq!(payload.issue.title, PLACEHOLDER_TITLE);
        assert!(payload.issue.closed);
        assert!(payload.comments.is_empty());
        assert!(payload.issue.labels.is_empty());
    }

    #[tokio::test]
    async fn test_real_issue() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/users/dave"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/gh/repo/milestones"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"number": 2, "title": "1.0"}
            ])))
            .mount(&server)
            .await;

        let options = MigrationOptions::default()
            .with_change_annotations(true)
            .with_attachment_annotations(true)
            .with_user_mapping("erin", "erin-gh");
        let mut converter = converter(&server, options);

        let mut source = issue(5);
        source.content = "See https://bitbucket.org/owner/repo/issue/1 {{{x}}}".to_string();
        source.status = IssueStatus::Resolved;
        source.milestone = Some("1.0".to_string());
        source.assignee = Some(SourceUser::named("erin"));
        source.reporter = Some(SourceUser::named("erin"));

        let changes = vec![
            status_change(4, "new", "resolved"),
            SourceChange {
                created_on: at(3),
                author: None,
                fields: vec![FieldChange {
                    field: "content".to_string(),
                    old: Some("a".to_string()),
                    new: Some("b".to_string()),
                }],
            },
        ];
        let comments = vec![comment(1, 2, "first"), comment(2, 6, "second")];
        let mut id_map = IssueIdMap::new();
        id_map.insert(1, 1);

        let payload = converter
            .convert(
                &SourceEntry::Real(source),
                &comments,
                &changes,
                &["log.txt".to_string()],
                &id_map,
            )
            .await
            .unwrap();

        let issue = &payload.issue;
        assert!(issue.closed);
        assert_eq!(issue.closed_at, Some(at(4)));
        assert_eq!(issue.milestone, Some(2));
        assert_eq!(issue.assignee.as_deref(), Some("erin-gh"));
        assert!(issue.body.starts_with("See #1 `x`"));
        assert!(issue.body.contains("- `log.txt`"));
        assert!(issue
            .body
            .contains("- Bitbucket: https://bitbucket.org/owner/repo/issue/5"));
        assert!(issue.body.contains(
            "- Originally Reported By: [erin](https://bitbucket.org/erin) \
             ([@erin-gh](https://github.com/erin-gh))"
        ));

        // Two comments plus one status annotation; the content edit is dropped.
        let bodies: Vec<&str> = payload.comments.iter().map(|c| c.body.as_str()).collect();
        assert_eq!(bodies.len(), 3);
        assert!(bodies[0].starts_with("first"));
        assert!(bodies[0].ends_with("Original Comment By: [dave](https://bitbucket.org/dave)"));
        assert_eq!(bodies[1], "Anonymous changed status from `new` to `resolved`");
        assert!(bodies[2].starts_with("second"));
    }

    #[tokio::test]
    async fn test_open_issue_has_no_closed_at() {
        let server = MockServer::start().await;
        let mut converter = converter(&server, MigrationOptions::default());

        let payload = converter
            .convert(
                &SourceEntry::Real(issue(1)),
                &[],
                &[],
                &[],
                &IssueIdMap::new(),
            )
            .await
            .unwrap();

        assert!(!payload.issue.closed);
        assert!(payload.issue.closed_at.is_none());
        assert_eq!(payload.issue.labels, vec!["major"]);
        assert!(payload.issue.body.contains("Originally Reported By: Anonymous"));
    }
}
