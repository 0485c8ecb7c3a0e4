//! Resume verification.
//!
//! An interrupted run can leave issues flagged in progress: the import was
//! submitted but the run stopped before the result was recorded. Before
//! resuming, each of those is looked up on the target so it is neither
//! imported twice nor silently lost.

use crate::checkpoint::CheckpointStore;
use crate::client::GitHubClient;
use crate::error::Result;
use tracing::{info, warn};

/// What resume verification found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationResult {
    /// Issues found on the target and now marked migrated.
    pub confirmed: Vec<u64>,

    /// Issues missing on the target whose in-progress flag was cleared.
    pub cleared: Vec<u64>,
}

impl VerificationResult {
    /// Whether there was nothing to reconcile.
    pub fn is_clean(&self) -> bool {
        self.confirmed.is_empty() && self.cleared.is_empty()
    }
}

/// Reconciles a checkpoint with the target repository.
pub struct MigrationVerifier {
    client: GitHubClient,
}

impl MigrationVerifier {
    /// Create a new verifier.
    pub fn new(client: GitHubClient) -> Self {
        Self { client }
    }

    /// Resolve every in-progress checkpoint entry against the target.
    pub async fn verify(&self, store: &dyn CheckpointStore) -> Result<VerificationResult> {
        let mut result = VerificationResult::default();

        let pending: Vec<u64> = store
            .entries()?
            .into_iter()
            .filter(|e| e.in_progress && !e.migrated)
            .map(|e| e.source_id)
            .collect();
        if pending.is_empty() {
            return Ok(result);
        }

        info!(count = pending.len(), "Verifying interrupted imports");
        for source_id in pending {
            if self.client.issue_exists(source_id).await? {
                store.mark_migrated(source_id, Some(source_id))?;
                result.confirmed.push(source_id);
            } else {
                warn!(issue = source_id, "Interrupted import never reached the target");
                store.clear_in_progress(source_id)?;
                result.cleared.push(source_id);
            }
        }

        Ok(result)
    }
}
