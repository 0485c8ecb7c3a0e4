//! Submitting payloads through the asynchronous issue import API.

use crate::client::{issue_number_from_url, GitHubClient, ImportStatus};
use crate::error::{MigrationError, Result};
use crate::types::{ImportPayload, MigrationOptions};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Where a single submission currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitState {
    Built,
    Submitted,
    Polling,
    Imported,
    Failed,
}

/// Result of a finished import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    /// Imported and confirmed at this number.
    Imported { number: u64 },
    /// Accepted, but the status check could not confirm the number.
    Unverified,
}

/// Submits one issue at a time and waits for the import to settle.
pub struct TargetSubmitter {
    client: GitHubClient,
    poll_interval: Duration,
    min_submit_interval: Duration,
    max_rate_limit_retries: u32,
    max_rate_limit_wait: Duration,
    last_submit: Option<Instant>,
}

impl TargetSubmitter {
    /// Create a submitter using the timing settings from `options`.
    pub fn new(client: GitHubClient, options: &MigrationOptions) -> Self {
        Self {
            client,
            poll_interval: options.poll_interval,
            min_submit_interval: options.min_submit_interval,
            max_rate_limit_retries: options.max_rate_limit_retries,
            max_rate_limit_wait: options.max_rate_limit_wait,
            last_submit: None,
        }
    }

    /// Import `payload` and wait until the target has created the issue.
    pub async fn submit(&mut self, source_id: u64, payload: &ImportPayload) -> Result<ImportOutcome> {
        let mut state = SubmitState::Built;
        debug!(issue = source_id, ?state, "Submitting issue");

        let status_url = self.start(source_id, payload).await?;
        state = SubmitState::Submitted;
        debug!(issue = source_id, ?state, url = %status_url, "Import accepted");

        loop {
            match self.client.import_status(&status_url).await? {
                ImportStatus::Pending => {
                    if state != SubmitState::Polling {
                        state = SubmitState::Polling;
                        debug!(issue = source_id, ?state, "Import pending");
                    }
                    sleep(self.poll_interval).await;
                }
                ImportStatus::Imported { issue_url } => {
                    state = SubmitState::Imported;
                    let Some(number) = issue_url.as_deref().and_then(issue_number_from_url) else {
                        warn!(issue = source_id, "Import finished without an issue URL");
                        return Ok(ImportOutcome::Unverified);
                    };
                    debug!(issue = source_id, ?state, number, "Import finished");
                    if number != source_id {
                        return Err(MigrationError::Misaligned {
                            expected: source_id,
                            actual: number,
                        });
                    }
                    info!(issue = source_id, "Imported issue");
                    return Ok(ImportOutcome::Imported { number });
                }
                ImportStatus::Failed { errors } => {
                    state = SubmitState::Failed;
                    debug!(issue = source_id, ?state, "Import failed");
                    return Err(MigrationError::ImportFailed { source_id, errors });
                }
                ImportStatus::Unavailable(status) => {
                    warn!(
                        issue = source_id,
                        status, "Import status check refused; assuming the import went through"
                    );
                    return Ok(ImportOutcome::Unverified);
                }
            }
        }
    }

    async fn start(&mut self, source_id: u64, payload: &ImportPayload) -> Result<String> {
        let mut attempts = 0;
        loop {
            self.throttle().await;
            self.last_submit = Some(Instant::now());

            match self.client.start_import(source_id, payload).await {
                Err(MigrationError::RateLimitExceeded(wait))
                    if attempts < self.max_rate_limit_retries =>
                {
                    attempts += 1;
                    let wait = Duration::from_secs(wait).min(self.max_rate_limit_wait);
                    warn!(
                        issue = source_id,
                        attempt = attempts,
                        wait_secs = wait.as_secs(),
                        "Rate limited, waiting for reset"
                    );
                    sleep(wait).await;
                }
                result => return result,
            }
        }
    }

    async fn throttle(&self) {
        if let Some(last) = self.last_submit {
            let elapsed = last.elapsed();
            if elapsed < self.min_submit_interval {
                sleep(self.min_submit_interval - elapsed).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConvertedIssue, MigrationConfig};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const IMPORT: &str = "/repos/gh/repo/import/issues";
    const STATUS: &str = "/repos/gh/repo/import/issues/77";

    fn submitter(server: &MockServer) -> TargetSubmitter {
        let config = MigrationConfig::new(
            "bb/repo".parse().unwrap(),
            "gh/repo".parse().unwrap(),
        )
        .with_target_api_url(server.uri());
        let options = MigrationOptions::default()
            .with_poll_interval(Duration::from_millis(5))
            .with_min_submit_interval(Duration::ZERO);
        TargetSubmitter::new(GitHubClient::new(&config).unwrap(), &options)
    }

    fn payload() -> ImportPayload {
        ImportPayload {
            issue: ConvertedIssue {
                title: "t".to_string(),
                body: "b".to_string(),
                closed: false,
                created_at: None,
                updated_at: None,
                closed_at: None,
                labels: vec![],
                milestone: None,
                assignee: None,
            },
            comments: vec![],
        }
    }

    async fn mount_accept(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path(IMPORT))
            .respond_with(ResponseTemplate::new(202).set_body_json(serde_json::json!({
                "id": 77,
                "status": "pending",
                "url": format!("{}{STATUS}", server.uri()),
            })))
            .mount(server)
            .await;
    }

    fn imported(number: u64) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "imported",
            "issue_url": format!("https://api.github.com/repos/gh/repo/issues/{number}"),
        }))
    }

    #[tokio::test]
    async fn test_polls_until_imported() {
        let server = MockServer::start().await;
        mount_accept(&server).await;
        Mock::given(method("GET"))
            .and(path(STATUS))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "pending"})),
            )
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(STATUS))
            .respond_with(imported(3))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = submitter(&server).submit(3, &payload()).await.unwrap();
        assert_eq!(outcome, ImportOutcome::Imported { number: 3 });
    }

    #[tokio::test]
    async fn test_misaligned_number_aborts() {
        let server = MockServer::start().await;
        mount_accept(&server).await;
        Mock::given(method("GET"))
            .and(path(STATUS))
            .respond_with(imported(8))
            .mount(&server)
            .await;

        assert!(matches!(
            submitter(&server).submit(3, &payload()).await,
            Err(MigrationError::Misaligned {
                expected: 3,
                actual: 8
            })
        ));
    }

    #[tokio::test]
    async fn test_failed_import() {
        let server = MockServer::start().await;
        mount_accept(&server).await;
        Mock::given(method("GET"))
            .and(path(STATUS))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "failed",
                "errors": [{"resource": "Issue", "code": "invalid"}],
            })))
            .mount(&server)
            .await;

        assert!(matches!(
            submitter(&server).submit(1, &payload()).await,
            Err(MigrationError::ImportFailed { source_id: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_status_quirk_is_unverified() {
        let server = MockServer::start().await;
        mount_accept(&server).await;
        Mock::given(method("GET"))
            .and(path(STATUS))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let outcome = submitter(&server).submit(1, &payload()).await.unwrap();
        assert_eq!(outcome, ImportOutcome::Unverified);
    }

    #[tokio::test]
    async fn test_rate_limit_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(IMPORT))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("x-ratelimit-remaining", "0")
                    .insert_header("x-ratelimit-reset", "0"),
            )
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        mount_accept(&server).await;
        Mock::given(method("GET"))
            .and(path(STATUS))
            .respond_with(imported(1))
            .mount(&server)
            .await;

        let outcome = submitter(&server).submit(1, &payload()).await.unwrap();
        assert_eq!(outcome, ImportOutcome::Imported { number: 1 });
    }

    #[tokio::test]
    async fn test_rate_limit_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(IMPORT))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .expect(4)
            .mount(&server)
            .await;

        assert!(matches!(
            submitter(&server).submit(1, &payload()).await,
            Err(MigrationError::RateLimitExceeded(0))
        ));
    }
}
