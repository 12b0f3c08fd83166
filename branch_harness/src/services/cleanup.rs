//! Out-of-band housekeeping: single-branch delete and the stale-branch sweep.
//!
//! Both are run by external schedulers. Neither may fail a pipeline because
//! of a deletion problem; only a failed listing is an error.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::NeonError;
use crate::models::BranchInfo;
use crate::services::neon_client::{DeleteOutcome, NeonClient};
use crate::services::validator::is_test_branch_name;

/// Delete one branch if an id was given. Always succeeds.
pub async fn cleanup_branch(client: &NeonClient, branch_id: Option<&str>) -> Option<DeleteOutcome> {
    let branch_id = branch_id.map(str::trim).filter(|id| !id.is_empty());
    let Some(branch_id) = branch_id else {
        tracing::info!("No branch id given, nothing to clean up");
        return None;
    };
    Some(client.delete_test_branch(branch_id).await)
}

#[derive(Debug, Clone)]
pub struct SweepOptions {
    /// Test branches older than this are deleted.
    pub retention: Duration,
    /// Report what would be deleted without deleting.
    pub dry_run: bool,
    /// Never deleted, whatever their name (staging, primary).
    pub protected_ids: Vec<String>,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(3 * 60 * 60),
            dry_run: false,
            protected_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub deleted: Vec<String>,
    pub kept: Vec<String>,
    pub failed: Vec<String>,
    /// Branches not following the test naming convention.
    pub ignored: usize,
}

impl std::fmt::Display for SweepSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "deleted {}, kept {}, failed {} (ignored {} non-test branches)",
            self.deleted.len(),
            self.kept.len(),
            self.failed.len(),
            self.ignored
        )
    }
}

/// Test branches past `retention` at `now`, minus protected ids.
pub fn select_stale<'a>(
    branches: &'a [BranchInfo],
    now: DateTime<Utc>,
    options: &SweepOptions,
) -> (Vec<&'a BranchInfo>, Vec<&'a BranchInfo>) {
    let retention = chrono::Duration::from_std(options.retention).unwrap_or(chrono::Duration::MAX);
    branches
        .iter()
        .filter(|b| is_test_branch_name(&b.name))
        .partition(|b| b.age(now) > retention && !options.protected_ids.contains(&b.id))
}

/// List every branch and delete stale test branches one by one.
pub async fn sweep_stale_branches(
    client: &NeonClient,
    now: DateTime<Utc>,
    options: &SweepOptions,
) -> Result<SweepSummary, NeonError> {
    let branches = client.list_all_branches().await?;
    let (stale, fresh) = select_stale(&branches, now, options);

    let mut summary = SweepSummary {
        kept: fresh.iter().map(|b| b.id.clone()).collect(),
        ignored: branches.len() - stale.len() - fresh.len(),
        ..Default::default()
    };

    for branch in stale {
        let age_min = branch.age(now).num_minutes();
        if options.dry_run {
            tracing::info!(branch_id = %branch.id, name = %branch.name, age_min, "Would delete stale branch");
            summary.deleted.push(branch.id.clone());
            continue;
        }
        tracing::info!(branch_id = %branch.id, name = %branch.name, age_min, "Deleting stale branch");
        match client.delete_test_branch(&branch.id).await {
            DeleteOutcome::Failed(_) => summary.failed.push(branch.id.clone()),
            DeleteOutcome::Deleted | DeleteOutcome::AlreadyGone => summary.deleted.push(branch.id.clone()),
        }
    }

    crate::metrics::branches_kept(summary.kept.len() + summary.failed.len());
    tracing::info!(dry_run = options.dry_run, "Sweep finished: {summary}");
    Ok(summary)
}
