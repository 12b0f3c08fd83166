use branch_harness::config::retention_from_hours;
use branch_harness::services::cleanup::{sweep_stale_branches, SweepOptions};
use branch_harness::{HarnessConfig, ProcessEnv};

pub async fn run(retention_hours: Option<u64>, dry_run: bool) -> i32 {
    let env = ProcessEnv;
    let retention = match retention_hours {
        None => HarnessConfig::from_env(&env).retention,
        Some(hours) => match retention_from_hours(hours) {
            Some(retention) => retention,
            None => {
                tracing::error!("--retention-hours {hours} is out of range");
                return 1;
            }
        },
    };

    let client = match super::client_from_env(&env) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!("Cannot sweep stale branches: {e}");
            return 1;
        }
    };

    let protected_ids = [client.staging_branch_id(), client.primary_branch_id()]
        .into_iter()
        .flatten()
        .map(str::to_string)
        .collect();
    let options = SweepOptions {
        retention,
        dry_run,
        protected_ids,
    };

    match sweep_stale_branches(&client, chrono::Utc::now(), &options).await {
        Ok(summary) => {
            let verb = if dry_run { "would delete" } else { "deleted" };
            for id in &summary.deleted {
                println!("{verb} {id}");
            }
            for id in &summary.failed {
                println!("failed {id}");
            }
            println!("{summary}");
            0
        }
        Err(e) => {
            tracing::error!("Listing branches failed: {e}");
            1
        }
    }
}
