//! Harness configuration: loaded from environment variables.

use std::time::Duration;

use crate::env_store::EnvStore;
use crate::error::TestEnvironmentError;

/// Variable names that form the process boundary.
pub mod vars {
    pub const NEON_API_KEY: &str = "NEON_API_KEY";
    pub const NEON_PROJECT_ID: &str = "NEON_PROJECT_ID";
    pub const NEON_STAGING_BRANCH_ID: &str = "NEON_STAGING_BRANCH_ID";
    pub const NEON_PRIMARY_BRANCH_ID: &str = "NEON_PRIMARY_BRANCH_ID";
    pub const NEON_API_BASE_URL: &str = "NEON_API_BASE_URL";
    pub const NEON_BRANCH_ID: &str = "NEON_BRANCH_ID";
    pub const BRANCH_CREATED_AT: &str = "BRANCH_CREATED_AT";
    pub const NODE_ENV: &str = "NODE_ENV";
    pub const TEST_TYPE: &str = "TEST_TYPE";
    pub const TEST_NEEDS_DB: &str = "TEST_NEEDS_DB";
    pub const DATABASE_URL: &str = "DATABASE_URL";
    pub const DIRECT_URL: &str = "DIRECT_URL";
    pub const UNIT_DATABASE_URL: &str = "UNIT_DATABASE_URL";
    pub const UNIT_DIRECT_URL: &str = "UNIT_DIRECT_URL";
    pub const E2E_DATABASE_URL: &str = "E2E_DATABASE_URL";
    pub const E2E_DIRECT_URL: &str = "E2E_DIRECT_URL";

    /// Third-party keys that must never hold live credentials during tests.
    pub const GUARDED_API_KEYS: [&str; 3] = ["OPENAI_API_KEY", "RESEND_API_KEY", "GOOGLE_AI_API_KEY"];
}

pub const DEFAULT_NEON_API_BASE_URL: &str = "https://console.neon.tech/api/v2";
pub const TEST_NODE_ENV: &str = "test";

/// Validated snapshot of the test-run configuration.
///
/// Building one is the only sanctioned way to read database and API settings
/// for a test run; `node_env` is always `"test"` once constructed.
#[derive(Clone)]
pub struct TestEnvironment {
    pub database_url: Option<String>,
    pub direct_url: Option<String>,
    pub neon_api_key: String,
    pub neon_project_id: String,
    pub neon_staging_branch_id: String,
    pub neon_primary_branch_id: Option<String>,
    pub node_env: String,
}

impl TestEnvironment {
    pub fn from_env(env: &impl EnvStore) -> Result<Self, TestEnvironmentError> {
        let mut problems = Vec::new();

        let node_env = env.get_non_empty(vars::NODE_ENV).unwrap_or_default();
        if node_env != TEST_NODE_ENV {
            problems.push(format!(
                "{} must be '{TEST_NODE_ENV}' (got '{node_env}')",
                vars::NODE_ENV
            ));
        }

        let mut required = |key: &str| {
            let value = env.get_non_empty(key);
            if value.is_none() {
                problems.push(format!("{key} is not set"));
            }
            value.unwrap_or_default()
        };
        let neon_api_key = required(vars::NEON_API_KEY);
        let neon_project_id = required(vars::NEON_PROJECT_ID);
        let neon_staging_branch_id = required(vars::NEON_STAGING_BRANCH_ID);

        if !problems.is_empty() {
            return Err(TestEnvironmentError::new(problems));
        }

        Ok(Self {
            database_url: env.get_non_empty(vars::DATABASE_URL),
            direct_url: env.get_non_empty(vars::DIRECT_URL),
            neon_api_key,
            neon_project_id,
            neon_staging_branch_id,
            neon_primary_branch_id: env.get_non_empty(vars::NEON_PRIMARY_BRANCH_ID),
            node_env,
        })
    }

    pub fn neon_api(&self, env: &impl EnvStore) -> NeonApiConfig {
        NeonApiConfig {
            api_key: self.neon_api_key.clone(),
            project_id: self.neon_project_id.clone(),
            base_url: env
                .get_non_empty(vars::NEON_API_BASE_URL)
                .unwrap_or_else(|| DEFAULT_NEON_API_BASE_URL.to_string()),
        }
    }
}

impl std::fmt::Debug for TestEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestEnvironment")
            .field("neon_project_id", &self.neon_project_id)
            .field("neon_staging_branch_id", &self.neon_staging_branch_id)
            .field("neon_primary_branch_id", &self.neon_primary_branch_id)
            .field("node_env", &self.node_env)
            .finish_non_exhaustive()
    }
}

/// Just enough to talk to the Neon API; all the cleanup commands need.
#[derive(Clone)]
pub struct NeonApiConfig {
    pub api_key: String,
    pub project_id: String,
    pub base_url: String,
}

impl NeonApiConfig {
    pub fn from_env(env: &impl EnvStore) -> Result<Self, TestEnvironmentError> {
        let api_key = env.get_non_empty(vars::NEON_API_KEY);
        let project_id = env.get_non_empty(vars::NEON_PROJECT_ID);
        match (api_key, project_id) {
            (Some(api_key), Some(project_id)) => Ok(Self {
                api_key,
                project_id,
                base_url: env
                    .get_non_empty(vars::NEON_API_BASE_URL)
                    .unwrap_or_else(|| DEFAULT_NEON_API_BASE_URL.to_string()),
            }),
            (api_key, project_id) => {
                let mut problems = Vec::new();
                if api_key.is_none() {
                    problems.push(format!("{} is not set", vars::NEON_API_KEY));
                }
                if project_id.is_none() {
                    problems.push(format!("{} is not set", vars::NEON_PROJECT_ID));
                }
                Err(TestEnvironmentError::new(problems))
            }
        }
    }
}

impl std::fmt::Debug for NeonApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NeonApiConfig")
            .field("project_id", &self.project_id)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Tunables with sensible defaults.
#[derive(Clone, Debug)]
pub struct HarnessConfig {
    /// Budget for a new branch to become usable.
    pub ready_timeout: Duration,
    /// Sleep between readiness polls.
    pub ready_poll_interval: Duration,
    /// Test branches older than this are swept.
    pub retention: Duration,
    /// Role used in connection strings; first unprotected role when unset.
    pub role_name: Option<String>,
    pub database_name: String,
    /// Shell command that applies the schema to `DIRECT_URL`.
    pub migrate_command: String,
    pub migrate_timeout: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_millis(60_000),
            ready_poll_interval: Duration::from_millis(2_000),
            retention: Duration::from_secs(3 * 60 * 60),
            role_name: None,
            database_name: "neondb".to_string(),
            migrate_command: "npx prisma db push --skip-generate".to_string(),
            migrate_timeout: Duration::from_secs(300),
        }
    }
}

impl HarnessConfig {
    pub fn from_env(env: &impl EnvStore) -> Self {
        let defaults = Self::default();

        let ready_timeout = parse_or(env, "NEON_READY_TIMEOUT_MS", 60_000u64);
        let ready_poll_interval = parse_or(env, "NEON_READY_POLL_MS", 2_000u64);
        let retention_hours = parse_or(env, "NEON_BRANCH_RETENTION_HOURS", 3u64);
        let migrate_timeout = parse_or(env, "TEST_MIGRATE_TIMEOUT_SECS", 300u64);

        Self {
            ready_timeout: Duration::from_millis(ready_timeout),
            ready_poll_interval: Duration::from_millis(ready_poll_interval),
            retention: retention_from_hours(retention_hours).unwrap_or_else(|| {
                tracing::warn!(
                    "NEON_BRANCH_RETENTION_HOURS={retention_hours} is out of range, using {}h",
                    defaults.retention.as_secs() / 3600
                );
                defaults.retention
            }),
            role_name: env.get_non_empty("NEON_ROLE_NAME"),
            database_name: env
                .get_non_empty("NEON_DATABASE_NAME")
                .unwrap_or(defaults.database_name),
            migrate_command: env
                .get_non_empty("TEST_MIGRATE_COMMAND")
                .unwrap_or(defaults.migrate_command),
            migrate_timeout: Duration::from_secs(migrate_timeout),
        }
    }
}

/// `hours` as a duration; `None` when the seconds do not fit in a `u64`.
pub fn retention_from_hours(hours: u64) -> Option<Duration> {
    hours.checked_mul(60 * 60).map(Duration::from_secs)
}

fn parse_or<T>(env: &impl EnvStore, key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    match env.get_non_empty(key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("{key}={raw} is not a valid number, using {default}");
            default
        }),
    }
}
