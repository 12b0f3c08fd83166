//! Read-only verification of a test setup (`verify-test-setup`).
//!
//! Mutates nothing unless `TEST_NEEDS_DB` is set, in which case one
//! throwaway branch is provisioned and deleted as a smoke test.

use std::fmt;

use crate::config::{vars, HarnessConfig, NeonApiConfig, TEST_NODE_ENV};
use crate::env_store::EnvStore;
use crate::error::NeonError;
use crate::models::TestType;
use crate::services::neon_client::{CreateBranchOptions, NeonClient};
use crate::services::safety;
use crate::services::validator::validate_not_production_branch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Pass,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub name: String,
    pub severity: Severity,
    pub detail: String,
}

impl Diagnostic {
    fn pass(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            severity: Severity::Pass,
            detail: detail.into(),
        }
    }

    fn warning(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            severity: Severity::Warning,
            detail: detail.into(),
        }
    }

    fn critical(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            severity: Severity::Critical,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiagnosticReport {
    pub checks: Vec<Diagnostic>,
}

impl DiagnosticReport {
    fn push(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Pass => tracing::debug!(check = %diagnostic.name, "{}", diagnostic.detail),
            Severity::Warning => tracing::warn!(check = %diagnostic.name, "{}", diagnostic.detail),
            Severity::Critical => tracing::error!(check = %diagnostic.name, "{}", diagnostic.detail),
        }
        self.checks.push(diagnostic);
    }

    pub fn worst(&self) -> Severity {
        self.checks
            .iter()
            .map(|c| c.severity)
            .max()
            .unwrap_or(Severity::Pass)
    }

    /// 0 all clear, 1 critical failures, 2 warnings only.
    pub fn exit_code(&self) -> i32 {
        match self.worst() {
            Severity::Pass => 0,
            Severity::Critical => 1,
            Severity::Warning => 2,
        }
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.checks.iter().filter(|c| c.severity == severity).count()
    }
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for check in &self.checks {
            let tag = match check.severity {
                Severity::Pass => "PASS",
                Severity::Warning => "WARN",
                Severity::Critical => "FAIL",
            };
            writeln!(f, "[{tag}] {}: {}", check.name, check.detail)?;
        }
        write!(
            f,
            "{} passed, {} warning(s), {} critical",
            self.count(Severity::Pass),
            self.count(Severity::Warning),
            self.count(Severity::Critical)
        )
    }
}

/// Checks that need no network access.
pub fn check_configuration(env: &impl EnvStore) -> DiagnosticReport {
    let mut report = DiagnosticReport::default();

    for key in [vars::NEON_API_KEY, vars::NEON_PROJECT_ID, vars::NEON_STAGING_BRANCH_ID] {
        report.push(match env.get_non_empty(key) {
            Some(_) => Diagnostic::pass(key, "set"),
            None => Diagnostic::critical(key, "not set"),
        });
    }

    match (
        env.get_non_empty(vars::NEON_STAGING_BRANCH_ID),
        env.get_non_empty(vars::NEON_PRIMARY_BRANCH_ID),
    ) {
        (_, None) => report.push(Diagnostic::warning(
            vars::NEON_PRIMARY_BRANCH_ID,
            "not set, production parent guard is disabled",
        )),
        (Some(staging), Some(primary)) => {
            report.push(match validate_not_production_branch(&staging, Some(&primary)) {
                Ok(()) => Diagnostic::pass("staging-not-primary", "staging branch differs from primary"),
                Err(e) => Diagnostic::critical("staging-not-primary", e.to_string()),
            })
        }
        (None, Some(_)) => {}
    }

    match env.get_non_empty(vars::NODE_ENV) {
        Some(v) if v == TEST_NODE_ENV => report.push(Diagnostic::pass(vars::NODE_ENV, "test")),
        other => report.push(Diagnostic::warning(
            vars::NODE_ENV,
            format!(
                "is '{}', setup will force '{TEST_NODE_ENV}'",
                other.unwrap_or_default()
            ),
        )),
    }

    if let Some(raw) = env.get_non_empty(vars::TEST_TYPE) {
        report.push(match raw.parse::<TestType>() {
            Ok(t) => Diagnostic::pass(vars::TEST_TYPE, t.as_str()),
            Err(e) => Diagnostic::warning(vars::TEST_TYPE, e.to_string()),
        });
    }

    // NODE_ENV is reported above as a warning; the rest are hard failures.
    for outcome in safety::evaluate(env) {
        if outcome.name == "node-env-is-test" {
            continue;
        }
        report.push(match outcome.violation {
            None => Diagnostic::pass(outcome.name, "ok"),
            Some(msg) => Diagnostic::critical(outcome.name, msg),
        });
    }

    report
}

/// Configuration checks, API reachability, and the optional smoke test.
pub async fn verify_test_setup(env: &impl EnvStore) -> DiagnosticReport {
    let mut report = check_configuration(env);

    let api = match NeonApiConfig::from_env(env) {
        Ok(api) => api,
        Err(_) => return report,
    };
    let config = HarnessConfig::from_env(env);
    let client = match NeonClient::new(&api) {
        Ok(client) => client
            .with_branch_guards(
                env.get_non_empty(vars::NEON_STAGING_BRANCH_ID),
                env.get_non_empty(vars::NEON_PRIMARY_BRANCH_ID),
            )
            .with_harness_config(&config),
        Err(e) => {
            report.push(Diagnostic::critical("neon-api", e.to_string()));
            return report;
        }
    };

    match client.list_all_branches().await {
        Ok(branches) => report.push(Diagnostic::pass(
            "neon-api",
            format!("reachable, {} branch(es) in project", branches.len()),
        )),
        Err(e) => {
            report.push(Diagnostic::critical("neon-api", e.to_string()));
            return report;
        }
    }

    if env.flag(vars::TEST_NEEDS_DB) {
        report.push(match smoke_test(&client, &config).await {
            Ok(detail) => Diagnostic::pass("branch-smoke-test", detail),
            Err(e) => Diagnostic::critical("branch-smoke-test", e.to_string()),
        });
    }

    report
}

async fn smoke_test(client: &NeonClient, config: &HarnessConfig) -> Result<String, NeonError> {
    let name = format!("test-verify-{}", chrono::Utc::now().timestamp_millis());
    let branch = client
        .create_test_branch(Some(&name), CreateBranchOptions::default())
        .await?;

    let result = async {
        client
            .wait_for_branch_ready(&branch.id, config.ready_timeout)
            .await?;
        client.get_branch_connection_strings(&branch.id).await
    }
    .await;

    let deleted = client.delete_test_branch(&branch.id).await;
    let connection = result?;
    if !deleted.is_gone() {
        tracing::warn!(branch_id = %branch.id, "Smoke test branch was not deleted");
    }
    Ok(format!(
        "created, reached and deleted {} ({})",
        branch.name,
        crate::models::branch::redact(&connection.direct_url)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env_store::MemoryEnv;

    #[test]
    fn exit_codes_follow_worst_severity() {
        let mut report = DiagnosticReport::default();
        assert_eq!(report.exit_code(), 0);
        report.checks.push(Diagnostic::warning("a", "meh"));
        assert_eq!(report.exit_code(), 2);
        report.checks.push(Diagnostic::critical("b", "bad"));
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn empty_environment_is_critical() {
        let report = check_configuration(&MemoryEnv::new());
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.count(Severity::Critical), 3);
    }

    #[test]
    fn complete_environment_only_warns_about_missing_primary() {
        let env = MemoryEnv::new()
            .with(vars::NODE_ENV, "test")
            .with(vars::NEON_API_KEY, "napi_x")
            .with(vars::NEON_PROJECT_ID, "proj-1")
            .with(vars::NEON_STAGING_BRANCH_ID, "br-staging");
        let report = check_configuration(&env);
        assert_eq!(report.exit_code(), 2);
        assert_eq!(report.count(Severity::Warning), 1);
        assert!(report.to_string().contains("[WARN] NEON_PRIMARY_BRANCH_ID"));
    }

    #[test]
    fn production_url_is_critical() {
        let env = MemoryEnv::new()
            .with(vars::NODE_ENV, "test")
            .with(vars::NEON_API_KEY, "napi_x")
            .with(vars::NEON_PROJECT_ID, "proj-1")
            .with(vars::NEON_STAGING_BRANCH_ID, "br-staging")
            .with(vars::NEON_PRIMARY_BRANCH_ID, "br-main")
            .with(vars::DATABASE_URL, "postgres://u:p@db.x.rds.amazonaws.com/app");
        let report = check_configuration(&env);
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.count(Severity::Critical), 1);
    }
}
