//! Reading issues from a source tracker.

use crate::error::{MigrationError, Result};
use crate::types::{SourceChange, SourceComment, SourceEntry, SourceIssue};
use async_trait::async_trait;
use tracing::{debug, info};

/// A place issues can be read from: the live API or an export archive.
#[async_trait]
pub trait IssueSource: Send + Sync {
    /// Every issue in the tracker, in any order.
    async fn issues(&self) -> Result<Vec<SourceIssue>>;

    /// Comments of one issue with empty-bodied ones already removed.
    async fn comments(&self, issue_id: u64) -> Result<Vec<SourceComment>>;

    /// Field change events of one issue.
    async fn changes(&self, issue_id: u64) -> Result<Vec<SourceChange>>;

    /// Attachment file names of one issue.
    async fn attachments(&self, issue_id: u64) -> Result<Vec<String>>;
}

/// Read every issue past `skip` as a contiguous, gap-filled sequence.
pub async fn read_entries(source: &dyn IssueSource, skip: u64) -> Result<Vec<SourceEntry>> {
    let issues = source.issues().await?;
    info!(count = issues.len(), skip, "Fetched source issues");
    fill_gaps(issues, skip)
}

/// Sort issues by id and insert placeholders so ids run from `skip + 1`
/// without holes.
pub fn fill_gaps(mut issues: Vec<SourceIssue>, skip: u64) -> Result<Vec<SourceEntry>> {
    let mut next = skip
        .checked_add(1)
        .ok_or_else(|| MigrationError::InvalidConfig(format!("skip count {skip} is too large")))?;

    issues.retain(|issue| issue.id > skip);
    issues.sort_by_key(|issue| issue.id);
    issues.dedup_by_key(|issue| issue.id);

    let mut entries = Vec::with_capacity(issues.len());
    for issue in issues {
        while next < issue.id {
            debug!(issue = next, "Filling gap with placeholder");
            entries.push(SourceEntry::Placeholder { id: next });
            next += 1;
        }
        next = issue.id.saturating_add(1);
        entries.push(SourceEntry::Real(issue));
    }
    Ok(entries)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::IssueStatus;
    use chrono::{TimeZone, Utc};

    pub(crate) fn issue(id: u64) -> SourceIssue {
        let at = Utc.with_ymd_and_hms(2013, 4, 1, 10, 0, 0).unwrap();
        SourceIssue {
            id,
            title: format!("Issue {id}"),
            content: format!("Content of {id}"),
            status: IssueStatus::New,
            created_on: at,
            updated_on: at,
            reporter: None,
            assignee: None,
            priority: "major".to_string(),
            component: None,
            kind: None,
            version: None,
            milestone: None,
        }
    }

    fn shape(entries: &[SourceEntry]) -> Vec<(u64, bool)> {
        entries.iter().map(|e| (e.id(), e.is_placeholder())).collect()
    }

    #[test]
    fn test_fill_gaps() {
        let entries = fill_gaps(vec![issue(7), issue(2), issue(4)], 0).unwrap();
        assert_eq!(
            shape(&entries),
            vec![
                (1, true),
                (2, false),
                (3, true),
                (4, false),
                (5, true),
                (6, true),
                (7, false),
            ]
        );
    }

    #[test]
    fn test_fill_gaps_with_skip() {
        let entries = fill_gaps(vec![issue(1), issue(3), issue(6)], 2).unwrap();
        assert_eq!(shape(&entries), vec![(3, false), (4, true), (5, true), (6, false)]);
    }

    #[test]
    fn test_fill_gaps_contiguous() {
        let entries = fill_gaps((1..=5).rev().map(issue).collect(), 0).unwrap();
        assert!(entries.iter().all(|e| !e.is_placeholder()));
        assert_eq!(entries.len(), 5);
    }

    #[test]
    fn test_fill_gaps_empty() {
        assert!(fill_gaps(vec![], 0).unwrap().is_empty());
        assert!(fill_gaps(vec![issue(1)], 5).unwrap().is_empty());
    }

    #[test]
    fn test_fill_gaps_at_the_top_of_the_range() {
        assert!(matches!(
            fill_gaps(vec![issue(1)], u64::MAX),
            Err(MigrationError::InvalidConfig(_))
        ));

        let entries = fill_gaps(vec![issue(u64::MAX), issue(u64::MAX - 1)], u64::MAX - 2).unwrap();
        assert_eq!(
            shape(&entries),
            vec![(u64::MAX - 1, false), (u64::MAX, false)]
        );
    }
}
