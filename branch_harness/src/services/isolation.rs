//! Environment isolation between concurrently running test processes.
//!
//! Each test context owns a prefixed pair of variables (`UNIT_*`, `E2E_*`);
//! the generic `DATABASE_URL`/`DIRECT_URL` pair is a fallback for code that
//! knows nothing about isolation, such as a migration subprocess. Two runners
//! on one machine must be two processes, never two writers in one.

use crate::config::vars;
use crate::env_store::EnvStore;
use crate::models::{ConnectionStrings, TestType};

/// The database a test context is bound to.
///
/// Immutable inside the process; [`IsolatedDatabase::env_pairs`] is its
/// serialized form at the process boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolatedDatabase {
    pub test_type: TestType,
    pub connection: ConnectionStrings,
}

impl IsolatedDatabase {
    pub fn new(test_type: TestType, connection: ConnectionStrings) -> Self {
        Self {
            test_type,
            connection,
        }
    }

    /// Variables a child process needs to reach this database.
    pub fn env_pairs(&self) -> Vec<(String, String)> {
        let db = &self.connection.database_url;
        let direct = &self.connection.direct_url;
        vec![
            (self.test_type.database_url_var(), db.clone()),
            (self.test_type.direct_url_var(), direct.clone()),
            (vars::DATABASE_URL.to_string(), db.clone()),
            (vars::DIRECT_URL.to_string(), direct.clone()),
            (vars::TEST_TYPE.to_string(), self.test_type.as_str().to_string()),
        ]
    }
}

/// Current test context; `unit` when unset or unrecognized.
pub fn get_test_type(env: &impl EnvStore) -> TestType {
    match env.get_non_empty(vars::TEST_TYPE) {
        None => TestType::Unit,
        Some(raw) => raw.parse().unwrap_or_else(|err| {
            tracing::warn!("{err}, defaulting to unit");
            TestType::Unit
        }),
    }
}

/// Pooled URL for the current context, falling back to `DATABASE_URL`.
pub fn get_test_database_url(env: &impl EnvStore) -> Option<String> {
    let test_type = get_test_type(env);
    env.get_non_empty(&test_type.database_url_var())
        .or_else(|| env.get_non_empty(vars::DATABASE_URL))
}

/// Direct URL for the current context, falling back to `DIRECT_URL`.
pub fn get_test_direct_url(env: &impl EnvStore) -> Option<String> {
    let test_type = get_test_type(env);
    env.get_non_empty(&test_type.direct_url_var())
        .or_else(|| env.get_non_empty(vars::DIRECT_URL))
}

/// Write the prefixed pair, the generic fallback pair and the type marker.
pub fn set_test_environment(
    env: &mut impl EnvStore,
    test_type: TestType,
    database_url: &str,
    direct_url: &str,
) {
    let db = IsolatedDatabase::new(
        test_type,
        ConnectionStrings {
            database_url: database_url.to_string(),
            direct_url: direct_url.to_string(),
        },
    );
    apply(env, &db);
}

/// [`set_test_environment`] for an already-built [`IsolatedDatabase`].
pub fn apply(env: &mut impl EnvStore, db: &IsolatedDatabase) {
    for (key, value) in db.env_pairs() {
        env.set(&key, &value);
    }
    tracing::debug!(test_type = %db.test_type, "Published isolated database URLs");
}

/// Record which branch backs the current run.
pub fn set_branch_markers(env: &mut impl EnvStore, branch_id: &str, created_at: &str) {
    env.set(vars::NEON_BRANCH_ID, branch_id);
    env.set(vars::BRANCH_CREATED_AT, created_at);
}

/// Remove the prefixed pair and branch markers. The generic pair stays.
pub fn clear_test_environment(env: &mut impl EnvStore, test_type: TestType) {
    env.remove(&test_type.database_url_var());
    env.remove(&test_type.direct_url_var());
    env.remove(vars::NEON_BRANCH_ID);
    env.remove(vars::BRANCH_CREATED_AT);
}
