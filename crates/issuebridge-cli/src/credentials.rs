//! Credential lookup.
//!
//! Secrets come from, in order: a command-line flag or its environment
//! variable, the system keyring, and finally an interactive prompt.

use anyhow::{Context, Result};
use std::io::IsTerminal;
use tracing::debug;

/// Keyring service name.
pub const SERVICE_NAME: &str = "issuebridge";

/// One place a secret may come from.
pub trait CredentialProvider {
    /// Short name for log lines.
    fn name(&self) -> &'static str;

    /// Look up the secret for `account`. `Ok(None)` moves on to the next
    /// provider.
    fn credential(&self, account: &str) -> Result<Option<String>>;
}

/// A value given on the command line or through the environment.
pub struct Explicit(Option<String>);

impl Explicit {
    pub fn new(value: Option<String>) -> Self {
        Self(value.filter(|v| !v.is_empty()))
    }
}

impl CredentialProvider for Explicit {
    fn name(&self) -> &'static str {
        "command line"
    }

    fn credential(&self, _account: &str) -> Result<Option<String>> {
        Ok(self.0.clone())
    }
}

/// The system keyring.
pub struct Keyring;

impl CredentialProvider for Keyring {
    fn name(&self) -> &'static str {
        "keyring"
    }

    fn credential(&self, account: &str) -> Result<Option<String>> {
        let entry = keyring::Entry::new(SERVICE_NAME, account)?;
        match entry.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(keyring::Error::NoStorageAccess(_)) => {
                debug!("Keyring not available");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Ask on the terminal. Does nothing when stdin is not a terminal.
pub struct Prompt {
    label: String,
}

impl Prompt {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl CredentialProvider for Prompt {
    fn name(&self) -> &'static str {
        "prompt"
    }

    fn credential(&self, _account: &str) -> Result<Option<String>> {
        if !std::io::stdin().is_terminal() {
            return Ok(None);
        }
        let secret = rpassword::prompt_password(&self.label).context("Failed to read secret")?;
        Ok(Some(secret).filter(|s| !s.is_empty()))
    }
}

/// Ask each provider in turn and return the first secret found.
pub fn resolve(providers: &[&dyn CredentialProvider], account: &str) -> Result<Option<String>> {
    for provider in providers {
        if let Some(secret) = provider.credential(account)? {
            debug!(account, provider = provider.name(), "Found credential");
            return Ok(Some(secret));
        }
    }
    Ok(None)
}

/// Save a secret in the keyring.
pub fn store(account: &str, secret: &str) -> Result<()> {
    let entry = keyring::Entry::new(SERVICE_NAME, account)?;
    entry
        .set_password(secret)
        .with_context(|| format!("Failed to store credential for {account}"))?;
    debug!(account, "Stored credential in keyring");
    Ok(())
}

/// Keyring account for a GitHub token, keyed by API host so GitHub
/// Enterprise tokens are kept apart.
pub fn github_account(api_url: &str) -> String {
    let host = url::Url::parse(api_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| api_url.to_string());
    format!("github:{host}")
}

/// Keyring account for a Bitbucket password.
pub fn bitbucket_account(username: &str) -> String {
    format!("bitbucket:{username}")
}
