//! Formatting of source users as markdown mentions.

use crate::client::GitHubClient;
use crate::error::Result;
use crate::types::SourceUser;
use std::collections::HashMap;
use tracing::debug;

/// Rendered for content without an author.
pub const ANONYMOUS: &str = "Anonymous";

/// Resolves source users to a profile link plus, when one exists, a mention
/// of the matching GitHub account.
pub struct UserResolver {
    client: GitHubClient,
    source_web_url: String,
    target_web_url: String,
    mapping: HashMap<String, String>,
    /// `None` records a confirmed-absent account.
    cache: HashMap<String, Option<String>>,
}

impl UserResolver {
    /// Create a resolver. Explicit mappings are never looked up remotely.
    pub fn new(
        client: GitHubClient,
        source_web_url: impl Into<String>,
        target_web_url: impl Into<String>,
        mapping: HashMap<String, String>,
    ) -> Self {
        Self {
            client,
            source_web_url: source_web_url.into(),
            target_web_url: target_web_url.into(),
            mapping,
            cache: HashMap::new(),
        }
    }

    /// Format `user` for an issue or comment footer.
    pub async fn resolve(&mut self, user: Option<&SourceUser>) -> Result<String> {
        let Some(user) = user else {
            return Ok(ANONYMOUS.to_string());
        };

        let profile = format!(
            "[{}]({}/{})",
            user.full_name(),
            self.source_web_url,
            user.username
        );

        Ok(match self.target_username(&user.username).await? {
            Some(target) => format!(
                "{profile} ([@{target}]({}/{target}))",
                self.target_web_url
            ),
            None => profile,
        })
    }

    /// The GitHub account for a source username, if one exists.
    pub async fn target_username(&mut self, username: &str) -> Result<Option<String>> {
        if let Some(mapped) = self.mapping.get(username) {
            return Ok(Some(mapped.clone()));
        }
        if let Some(cached) = self.cache.get(username) {
            return Ok(cached.clone());
        }

        let exists = self.client.user_exists(username).await?;
        debug!(user = username, exists, "Looked up GitHub account");
        let resolved = exists.then(|| username.to_string());
        self.cache.insert(username.to_string(), resolved.clone());
        Ok(resolved)
    }
}
