//! Milestone lookup and creation on the target repository.

use crate::client::GitHubClient;
use crate::error::Result;
use std::collections::HashMap;
use tracing::{debug, info};

/// Maps milestone titles to target milestone numbers.
///
/// Existing milestones are loaded on first use. A title is created at most
/// once per run; in dry-run mode nothing is created and new titles get
/// provisional numbers above the highest known one.
pub struct MilestoneRegistry {
    client: GitHubClient,
    dry_run: bool,
    numbers: Option<HashMap<String, u64>>,
    next_provisional: u64,
}

impl MilestoneRegistry {
    /// Create an empty registry.
    pub fn new(client: GitHubClient, dry_run: bool) -> Self {
        Self {
            client,
            dry_run,
            numbers: None,
            next_provisional: 1,
        }
    }

    async fn loaded(&mut self) -> Result<&mut HashMap<String, u64>> {
        if self.numbers.is_none() {
            let existing = self.client.list_milestones().await?;
            self.next_provisional = existing.iter().map(|m| m.number).max().unwrap_or(0) + 1;
            self.numbers = Some(
                existing
                    .into_iter()
                    .map(|m| (m.title, m.number))
                    .collect(),
            );
        }
        Ok(self.numbers.get_or_insert_with(HashMap::new))
    }

    /// The number of the milestone titled `title`, creating it if needed.
    pub async fn ensure(&mut self, title: &str) -> Result<u64> {
        if let Some(&number) = self.loaded().await?.get(title) {
            return Ok(number);
        }

        let number = if self.dry_run {
            let number = self.next_provisional;
            self.next_provisional += 1;
            debug!(title, number, "Assigned provisional milestone number");
            number
        } else {
            let milestone = self.client.create_milestone(title).await?;
            info!(title, number = milestone.number, "Created milestone");
            self.next_provisional = self.next_provisional.max(milestone.number + 1);
            milestone.number
        };

        self.loaded().await?.insert(title.to_string(), number);
        Ok(number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MigrationConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> GitHubClient {
        let config = MigrationConfig::new(
            "bb/repo".parse().unwrap(),
            "gh/repo".parse().unwrap(),
        )
        .with_target_api_url(server.uri());
        GitHubClient::new(&config).unwrap()
    }

    async fn mount_existing(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/repos/gh/repo/milestones"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"number": 3, "title": "1.0"}
            ])))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_existing_milestone_reused() {
        let server = MockServer::start().await;
        mount_existing(&server).await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let mut registry = MilestoneRegistry::new(client_for(&server), false);
        assert_eq!(registry.ensure("1.0").await.unwrap(), 3);
        assert_eq!(registry.ensure("1.0").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_new_milestone_created_once() {
        let server = MockServer::start().await;
        mount_existing(&server).await;
        Mock::given(method("POST"))
            .and(path("/repos/gh/repo/milestones"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(serde_json::json!({"number": 4, "title": "2.0"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut registry = MilestoneRegistry::new(client_for(&server), false);
        assert_eq!(registry.ensure("2.0").await.unwrap(), 4);
        assert_eq!(registry.ensure("2.0").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_dry_run_assigns_provisional_numbers() {
        let server = MockServer::start().await;
        mount_existing(&server).await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let mut registry = MilestoneRegistry::new(client_for(&server), true);
        assert_eq!(registry.ensure("2.0").await.unwrap(), 4);
        assert_eq!(registry.ensure("3.0").await.unwrap(), 5);
        assert_eq!(registry.ensure("2.0").await.unwrap(), 4);
        assert_eq!(registry.ensure("1.0").await.unwrap(), 3);
    }
}
