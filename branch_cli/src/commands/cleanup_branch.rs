use branch_harness::services::cleanup::cleanup_branch;
use branch_harness::ProcessEnv;

/// Never fails the pipeline: every problem is logged and the exit code is 0.
pub async fn run(branch_id: Option<String>) -> i32 {
    let Some(branch_id) = branch_id.filter(|id| !id.trim().is_empty()) else {
        tracing::info!("No branch id given, nothing to clean up");
        return 0;
    };

    let client = match super::client_from_env(&ProcessEnv) {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(%branch_id, "Skipping cleanup: {e}");
            return 0;
        }
    };

    if let Some(outcome) = cleanup_branch(&client, Some(&branch_id)).await {
        println!("{branch_id}: {outcome:?}");
    }
    0
}
