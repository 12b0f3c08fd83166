pub mod cleanup_branch;
pub mod cleanup_stale;
pub mod verify;

use branch_harness::config::vars;
use branch_harness::{EnvStore, HarnessConfig, NeonApiConfig, NeonClient, NeonError, ProcessEnv};

/// Client configured from the process environment, or why it could not be built.
fn client_from_env(env: &ProcessEnv) -> Result<NeonClient, String> {
    let api = NeonApiConfig::from_env(env).map_err(|e| e.to_string())?;
    let client = NeonClient::new(&api).map_err(|e: NeonError| e.to_string())?;
    Ok(client
        .with_branch_guards(
            env.get_non_empty(vars::NEON_STAGING_BRANCH_ID),
            env.get_non_empty(vars::NEON_PRIMARY_BRANCH_ID),
        )
        .with_harness_config(&HarnessConfig::from_env(env)))
}
