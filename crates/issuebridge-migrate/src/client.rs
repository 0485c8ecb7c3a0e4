//! GitHub API client for migration operations.

use crate::error::{MigrationError, Result};
use crate::types::{ImportPayload, MigrationConfig, RepoSlug, SecretString};
use crate::VERSION;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, LOCATION};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

/// Media type required by the issue import API.
pub const IMPORT_MEDIA_TYPE: &str = "application/vnd.github.golden-comet-preview+json";

const JSON_MEDIA_TYPE: &str = "application/vnd.github.v3+json";
const MILESTONES_PER_PAGE: usize = 100;

/// A milestone on the target repository.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Milestone {
    pub number: u64,
    pub title: String,
}

#[derive(Debug, Serialize)]
struct CreateMilestoneRequest<'a> {
    title: &'a str,
}

#[derive(Debug, Deserialize)]
struct ImportAccepted {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImportStatusBody {
    status: String,
    #[serde(default)]
    issue_url: Option<String>,
    #[serde(default)]
    errors: serde_json::Value,
}

/// State of an import job as reported by the status endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportStatus {
    /// Still being processed.
    Pending,
    /// Created; carries the new issue's API URL when the target reports it.
    Imported { issue_url: Option<String> },
    /// Rejected asynchronously.
    Failed { errors: serde_json::Value },
    /// The status check itself was refused (403/404); the import may still
    /// have succeeded.
    Unavailable(u16),
}

/// Client for the parts of the GitHub API the migration uses.
#[derive(Clone)]
pub struct GitHubClient {
    client: Client,
    api_url: String,
    repo: RepoSlug,
    token: Option<SecretString>,
}

impl GitHubClient {
    /// Create a client bound to the configured target repository.
    pub fn new(config: &MigrationConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!("issuebridge/{VERSION}"))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| MigrationError::NetworkError(e.to_string()))?;

        Ok(Self {
            client,
            api_url: config.target_api_url.clone(),
            repo: config.target_repo.clone(),
            token: config.target_token.clone(),
        })
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}{path}",
            self.api_url, self.repo.owner, self.repo.name
        )
    }

    fn request(&self, method: Method, url: &str, accept: &str) -> RequestBuilder {
        let mut request = self.client.request(method, url).header(ACCEPT, accept);
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("token {}", token.expose()));
        }
        request
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        request
            .send()
            .await
            .map_err(|e| MigrationError::NetworkError(e.to_string()))
    }

    async fn json<T: DeserializeOwned>(response: Response, context: &str) -> Result<T> {
        let text = response
            .text()
            .await
            .map_err(|e| MigrationError::NetworkError(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| MigrationError::schema(context, e))
    }

    /// Check whether a GitHub account exists.
    ///
    /// Only 200 and 404 are conclusive; anything else (notably 403 when the
    /// API quota is gone) is an error.
    pub async fn user_exists(&self, username: &str) -> Result<bool> {
        let url = format!("{}/users/{username}", self.api_url);
        let response = self
            .send(self.request(Method::HEAD, &url, JSON_MEDIA_TYPE))
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(MigrationError::UserLookup {
                username: username.to_string(),
                status: status.as_u16(),
            }),
        }
    }

    /// Check whether issue `number` exists on the target repository.
    pub async fn issue_exists(&self, number: u64) -> Result<bool> {
        let url = self.repo_url(&format!("/issues/{number}"));
        let response = self
            .send(self.request(Method::GET, &url, JSON_MEDIA_TYPE))
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(false),
            StatusCode::UNAUTHORIZED => Err(MigrationError::AuthenticationFailed(
                "GitHub rejected the token".to_string(),
            )),
            status => Err(MigrationError::UnexpectedStatus {
                url,
                status: status.as_u16(),
            }),
        }
    }

    /// List every milestone of the target repository, open and closed.
    pub async fn list_milestones(&self) -> Result<Vec<Milestone>> {
        let mut milestones = Vec::new();
        let mut page = 1;

        loop {
            let url = self.repo_url(&format!(
                "/milestones?state=all&per_page={MILESTONES_PER_PAGE}&page={page}"
            ));
            let response = self
                .send(self.request(Method::GET, &url, JSON_MEDIA_TYPE))
                .await?;
            let response = check_status(response, &url)?;
            let items: Vec<Milestone> = Self::json(response, "milestone list").await?;

            let count = items.len();
            milestones.extend(items);
            if count < MILESTONES_PER_PAGE {
                break;
            }
            page += 1;
        }

        debug!(count = milestones.len(), "Loaded target milestones");
        Ok(milestones)
    }

    /// Create a milestone and return it.
    pub async fn create_milestone(&self, title: &str) -> Result<Milestone> {
        let url = self.repo_url("/milestones");
        let response = self
            .send(
                self.request(Method::POST, &url, JSON_MEDIA_TYPE)
                    .json(&CreateMilestoneRequest { title }),
            )
            .await?;
        let response = check_status(response, &url)?;
        Self::json(response, "created milestone").await
    }

    /// Start an import job and return its status URL.
    pub async fn start_import(&self, source_id: u64, payload: &ImportPayload) -> Result<String> {
        let url = self.repo_url("/import/issues");
        let response = self
            .send(
                self.request(Method::POST, &url, IMPORT_MEDIA_TYPE)
                    .json(payload),
            )
            .await?;

        match response.status() {
            StatusCode::ACCEPTED | StatusCode::OK | StatusCode::CREATED => {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let accepted: ImportAccepted = Self::json(response, "import response").await?;
                debug!(issue = source_id, job = ?accepted.id, "Import accepted");

                accepted
                    .url
                    .or(location)
                    .ok_or_else(|| MigrationError::UnexpectedStatus {
                        url: url.clone(),
                        status: StatusCode::ACCEPTED.as_u16(),
                    })
            }
            StatusCode::UNPROCESSABLE_ENTITY => {
                let errors = response
                    .json::<serde_json::Value>()
                    .await
                    .unwrap_or(serde_json::Value::Null);
                Err(MigrationError::ImportRejected { source_id, errors })
            }
            _ => Err(error_for(response, &url)),
        }
    }

    /// Check the state of an import job.
    pub async fn import_status(&self, status_url: &str) -> Result<ImportStatus> {
        let response = self
            .send(self.request(Method::GET, status_url, IMPORT_MEDIA_TYPE))
            .await?;

        match response.status() {
            status @ (StatusCode::FORBIDDEN | StatusCode::NOT_FOUND)
                if rate_limit_wait(response.headers()).is_none() =>
            {
                Ok(ImportStatus::Unavailable(status.as_u16()))
            }
            status if status.is_success() => {
                let body: ImportStatusBody = Self::json(response, "import status").await?;
                Ok(match body.status.as_str() {
                    "imported" => ImportStatus::Imported {
                        issue_url: body.issue_url,
                    },
                    "failed" => ImportStatus::Failed {
                        errors: body.errors,
                    },
                    "pending" => ImportStatus::Pending,
                    other => {
                        warn!(status = other, "Unknown import status, polling again");
                        ImportStatus::Pending
                    }
                })
            }
            _ => Err(error_for(response, status_url)),
        }
    }
}

/// Extract the issue number from an issue API or web URL.
pub fn issue_number_from_url(url: &str) -> Option<u64> {
    url.trim_end_matches('/').rsplit('/').next()?.parse().ok()
}

/// Seconds to wait when a response signals an exhausted rate limit.
fn rate_limit_wait(headers: &HeaderMap) -> Option<u64> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    if let Some(retry_after) = header("retry-after").and_then(|v| v.trim().parse().ok()) {
        return Some(retry_after);
    }
    if header("x-ratelimit-remaining").map(str::trim) != Some("0") {
        return None;
    }
    let reset: i64 = header("x-ratelimit-reset")?.trim().parse().ok()?;
    let now = chrono::Utc::now().timestamp();
    Some(u64::try_from(reset - now).unwrap_or(0))
}

fn check_status(response: Response, url: &str) -> Result<Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(error_for(response, url))
    }
}

fn error_for(response: Response, url: &str) -> MigrationError {
    let status = response.status();
    if matches!(
        status,
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS
    ) {
        if let Some(wait) = rate_limit_wait(response.headers()) {
            return MigrationError::RateLimitExceeded(wait);
        }
    }
    match status {
        StatusCode::UNAUTHORIZED => MigrationError::AuthenticationFailed(
            "GitHub rejected the token".to_string(),
        ),
        StatusCode::FORBIDDEN => MigrationError::AuthenticationFailed(
            "Access denied. Check your token permissions.".to_string(),
        ),
        StatusCode::NOT_FOUND => MigrationError::RepositoryNotFound(url.to_string()),
        status => MigrationError::UnexpectedStatus {
            url: url.to_string(),
            status: status.as_u16(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConvertedIssue;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> GitHubClient {
        let config = MigrationConfig::new(
            "bb/repo".parse().unwrap(),
            "gh/repo".parse().unwrap(),
        )
        .with_target_api_url(server.uri())
        .with_target_token("ghp_test");
        GitHubClient::new(&config).unwrap()
    }

    fn payload() -> ImportPayload {
        ImportPayload {
            issue: ConvertedIssue {
                title: "Title".to_string(),
                body: "Body".to_string(),
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

    #[test]
    fn test_issue_number_from_url() {
        assert_eq!(
            issue_number_from_url("https://api.github.com/repos/gh/repo/issues/17"),
            Some(17)
        );
        assert_eq!(issue_number_from_url("https://github.com/gh/repo/issues/3/"), Some(3));
        assert_eq!(issue_number_from_url("https://github.com/gh/repo"), None);
    }

    #[tokio::test]
    async fn test_user_exists() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/users/alice"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/users/ghost"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/users/limited"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(client.user_exists("alice").await.unwrap());
        assert!(!client.user_exists("ghost").await.unwrap());
        assert!(matches!(
            client.user_exists("limited").await,
            Err(MigrationError::UserLookup { status: 403, .. })
        ));
    }

    #[tokio::test]
    async fn test_start_import_accepted() {
        let server = MockServer::start().await;
        let status_url = format!("{}/repos/gh/repo/import/issues/9", server.uri());
        Mock::given(method("POST"))
            .and(path("/repos/gh/repo/import/issues"))
            .and(header("accept", IMPORT_MEDIA_TYPE))
            .and(header("authorization", "token ghp_test"))
            .and(header("user-agent", format!("issuebridge/{VERSION}").as_str()))
            .respond_with(ResponseTemplate::new(202).set_body_json(serde_json::json!({
                "id": 9,
                "status": "pending",
                "url": status_url,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let url = client.start_import(1, &payload()).await.unwrap();
        assert_eq!(url, status_url);
    }

    #[tokio::test]
    async fn test_start_import_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/gh/repo/import/issues"))
            .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
                "message": "Validation Failed",
                "errors": [{"field": "title", "code": "missing"}],
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        match client.start_import(5, &payload()).await {
            Err(MigrationError::ImportRejected { source_id, errors }) => {
                assert_eq!(source_id, 5);
                assert_eq!(errors["errors"][0]["field"], "title");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rate_limited_import() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/gh/repo/import/issues"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("x-ratelimit-remaining", "0")
                    .insert_header("x-ratelimit-reset", "0"),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(matches!(
            client.start_import(1, &payload()).await,
            Err(MigrationError::RateLimitExceeded(0))
        ));
    }

    #[tokio::test]
    async fn test_import_status_states() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status/done"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "imported",
                "issue_url": "https://api.github.com/repos/gh/repo/issues/4",
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/status/broken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "failed",
                "errors": [{"code": "invalid"}],
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/status/hidden"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let base = server.uri();

        assert_eq!(
            client.import_status(&format!("{base}/status/done")).await.unwrap(),
            ImportStatus::Imported {
                issue_url: Some("https://api.github.com/repos/gh/repo/issues/4".to_string())
            }
        );
        assert!(matches!(
            client.import_status(&format!("{base}/status/broken")).await.unwrap(),
            ImportStatus::Failed { .. }
        ));
        assert_eq!(
            client.import_status(&format!("{base}/status/hidden")).await.unwrap(),
            ImportStatus::Unavailable(404)
        );
    }

    #[tokio::test]
    async fn test_list_milestones_paginates() {
        let server = MockServer::start().await;
        let first: Vec<serde_json::Value> = (1..=100)
            .map(|n| serde_json::json!({"number": n, "title": format!("m{n}")}))
            .collect();
        Mock::given(method("GET"))
            .and(path("/repos/gh/repo/milestones"))
            .and(query_param("state", "all"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(first))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/gh/repo/milestones"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"number": 101, "title": "last"}
            ])))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let milestones = client.list_milestones().await.unwrap();
        assert_eq!(milestones.len(), 101);
        assert_eq!(milestones[100].title, "last");
    }
}
