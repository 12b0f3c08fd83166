//! Global setup/teardown for one test-suite invocation.
//!
//! Setup validates the environment, forks a schema-only branch from staging,
//! waits for it, publishes its URLs and migrates it. The returned
//! [`SetupContext`] is the only handle on the branch; teardown consumes it.
//!
//! Flow: idle -> validating -> (skipped) | branch-creating -> awaiting-ready
//! -> migrating -> ready-for-tests -> tearing-down -> done. A failure after
//! the branch exists goes through emergency-cleanup and re-raises unchanged.

use std::fmt;
use std::sync::Arc;

use crate::config::{vars, HarnessConfig, TestEnvironment, TEST_NODE_ENV};
use crate::env_store::EnvStore;
use crate::error::{HarnessError, Result};
use crate::models::{BranchInfo, TestType};
use crate::services::emergency::EmergencyCleanupGuard;
use crate::services::isolation::{self, IsolatedDatabase};
use crate::services::migrations::{CommandMigrationRunner, MigrationRunner};
use crate::services::neon_client::{CreateBranchOptions, DeleteOutcome, NeonClient};
use crate::services::retry::RetryPolicy;
use crate::services::safety::run_safety_checks;
use crate::services::validator::validate_not_production_branch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupPhase {
    Idle,
    Validating,
    Skipped,
    BranchCreating,
    AwaitingReady,
    Migrating,
    ReadyForTests,
    EmergencyCleanup,
    TearingDown,
    Done,
}

impl fmt::Display for SetupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SetupPhase::Idle => "idle",
            SetupPhase::Validating => "validating",
            SetupPhase::Skipped => "skipped",
            SetupPhase::BranchCreating => "branch-creating",
            SetupPhase::AwaitingReady => "awaiting-ready",
            SetupPhase::Migrating => "migrating",
            SetupPhase::ReadyForTests => "ready-for-tests",
            SetupPhase::EmergencyCleanup => "emergency-cleanup",
            SetupPhase::TearingDown => "tearing-down",
            SetupPhase::Done => "done",
        };
        f.write_str(s)
    }
}

/// Everything teardown needs, handed from setup to the caller.
#[derive(Debug)]
pub struct SetupContext {
    pub branch: BranchInfo,
    pub database: IsolatedDatabase,
    client: NeonClient,
    guard: Option<EmergencyCleanupGuard>,
}

impl SetupContext {
    pub fn branch_id(&self) -> &str {
        &self.branch.id
    }

    /// Variables to hand to a child test process.
    pub fn env_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = self.database.env_pairs();
        pairs.push((vars::NEON_BRANCH_ID.to_string(), self.branch.id.clone()));
        pairs.push((vars::BRANCH_CREATED_AT.to_string(), self.branch.created_at.to_rfc3339()));
        pairs.push((vars::NODE_ENV.to_string(), TEST_NODE_ENV.to_string()));
        pairs
    }
}

#[derive(Debug)]
pub enum SetupOutcome {
    /// `TEST_NEEDS_DB` was not set; nothing touched the network.
    Skipped,
    Ready(SetupContext),
}

impl SetupOutcome {
    pub fn into_context(self) -> Option<SetupContext> {
        match self {
            SetupOutcome::Skipped => None,
            SetupOutcome::Ready(ctx) => Some(ctx),
        }
    }
}

pub struct GlobalSetup {
    config: HarnessConfig,
    migrations: Arc<dyn MigrationRunner>,
    retry: RetryPolicy,
    phase: SetupPhase,
}

impl GlobalSetup {
    pub fn new(config: HarnessConfig, migrations: Arc<dyn MigrationRunner>) -> Self {
        Self {
            config,
            migrations,
            retry: RetryPolicy::default(),
            phase: SetupPhase::Idle,
        }
    }

    /// Tunables from the environment, migrations via `TEST_MIGRATE_COMMAND`.
    pub fn from_env(env: &impl EnvStore) -> Self {
        let config = HarnessConfig::from_env(env);
        let runner = CommandMigrationRunner::new(config.migrate_command.clone(), config.migrate_timeout);
        Self::new(config, Arc::new(runner))
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn phase(&self) -> SetupPhase {
        self.phase
    }

    fn enter(&mut self, phase: SetupPhase) {
        tracing::info!(from = %self.phase, to = %phase, "Test setup phase");
        self.phase = phase;
    }

    pub async fn run(&mut self, env: &mut impl EnvStore) -> Result<SetupOutcome> {
        env.set(vars::NODE_ENV, TEST_NODE_ENV);
        self.enter(SetupPhase::Validating);

        if !env.flag(vars::TEST_NEEDS_DB) {
            tracing::info!("{} not set, skipping test branch provisioning", vars::TEST_NEEDS_DB);
            self.enter(SetupPhase::Skipped);
            return Ok(SetupOutcome::Skipped);
        }

        let test_env = TestEnvironment::from_env(env)?;
        run_safety_checks(env)?;
        validate_not_production_branch(
            &test_env.neon_staging_branch_id,
            test_env.neon_primary_branch_id.as_deref(),
        )?;

        let test_type = isolation::get_test_type(env);
        let client = NeonClient::new(&test_env.neon_api(env))?
            .with_branch_guards(
                Some(test_env.neon_staging_branch_id.clone()),
                test_env.neon_primary_branch_id.clone(),
            )
            .with_harness_config(&self.config)
            .with_retry_policy(self.retry);

        self.enter(SetupPhase::BranchCreating);
        let name = format!(
            "{}-{}",
            test_type.branch_prefix(),
            chrono::Utc::now().timestamp_millis()
        );
        let branch = client
            .create_test_branch(Some(&name), CreateBranchOptions::default())
            .await?;
        let guard = EmergencyCleanupGuard::arm(&client, &branch.id);

        match self.provision(env, &client, &branch, test_type).await {
            Ok(database) => {
                self.enter(SetupPhase::ReadyForTests);
                Ok(SetupOutcome::Ready(SetupContext {
                    branch,
                    database,
                    client,
                    guard: Some(guard),
                }))
            }
            Err(err) => {
                self.enter(SetupPhase::EmergencyCleanup);
                tracing::error!(branch_id = %branch.id, "Test setup failed: {err}");
                guard.disarm();
                client.delete_test_branch(&branch.id).await;
                isolation::clear_test_environment(env, test_type);
                Err(err)
            }
        }
    }

    async fn provision(
        &mut self,
        env: &mut impl EnvStore,
        client: &NeonClient,
        branch: &BranchInfo,
        test_type: TestType,
    ) -> Result<IsolatedDatabase> {
        self.enter(SetupPhase::AwaitingReady);
        client
            .wait_for_branch_ready(&branch.id, self.config.ready_timeout)
            .await?;
        let connection = client.get_branch_connection_strings(&branch.id).await?;

        let database = IsolatedDatabase::new(test_type, connection);
        isolation::apply(env, &database);
        isolation::set_branch_markers(env, &branch.id, &branch.created_at.to_rfc3339());

        self.enter(SetupPhase::Migrating);
        self.migrations
            .migrate(&database.connection)
            .await
            .map_err(HarnessError::from)?;
        Ok(database)
    }
}

/// Delete the branch from setup and clear its namespace.
///
/// No context means nothing was provisioned. Never fails: a teardown error
/// must not mask the test result.
pub async fn global_teardown(
    env: &mut impl EnvStore,
    context: Option<SetupContext>,
) -> Option<DeleteOutcome> {
    let Some(mut ctx) = context else {
        tracing::debug!("No test branch to tear down");
        return None;
    };

    tracing::info!(branch_id = %ctx.branch.id, phase = %SetupPhase::TearingDown, "Tearing down test branch");
    if let Some(guard) = ctx.guard.take() {
        guard.disarm();
    }
    let outcome = ctx.client.delete_test_branch(&ctx.branch.id).await;
    isolation::clear_test_environment(env, ctx.database.test_type);
    tracing::info!(branch_id = %ctx.branch.id, phase = %SetupPhase::Done, ?outcome, "Teardown complete");
    Some(outcome)
}
