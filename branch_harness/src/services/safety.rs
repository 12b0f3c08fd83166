//! Pre-flight safety checks run before anything destructive.
//!
//! Every check runs even when an earlier one fails, so a single invocation
//! reports the full list of misconfigurations.

use crate::config::{vars, TEST_NODE_ENV};
use crate::env_store::EnvStore;
use crate::error::SafetyError;
use crate::services::validator::{is_production_api_key, is_production_database_url};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub name: &'static str,
    /// `None` when the check passed.
    pub violation: Option<String>,
}

/// Passed checks of a clean run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyReport {
    pub passed: Vec<&'static str>,
}

/// Evaluate every check without short-circuiting.
pub fn evaluate(env: &impl EnvStore) -> Vec<CheckOutcome> {
    vec![
        check_node_env(env),
        check_url(env, "database-url-not-production", &[
            vars::DATABASE_URL,
            vars::UNIT_DATABASE_URL,
            vars::E2E_DATABASE_URL,
        ]),
        check_url(env, "direct-url-not-production", &[
            vars::DIRECT_URL,
            vars::UNIT_DIRECT_URL,
            vars::E2E_DIRECT_URL,
        ]),
        check_api_keys(env),
        check_branch_not_primary(env),
    ]
}

/// Run all checks; fail with every violation listed, 1-based.
pub fn run_safety_checks(env: &impl EnvStore) -> Result<SafetyReport, SafetyError> {
    let outcomes = evaluate(env);
    let mut passed = Vec::new();
    let mut violations = Vec::new();

    for outcome in outcomes {
        match outcome.violation {
            None => passed.push(outcome.name),
            Some(msg) => {
                crate::metrics::safety_violation(outcome.name);
                tracing::error!(check = outcome.name, "Safety check failed: {msg}");
                violations.push(msg);
            }
        }
    }

    if violations.is_empty() {
        tracing::debug!(checks = passed.len(), "All safety checks passed");
        Ok(SafetyReport { passed })
    } else {
        Err(SafetyError { violations })
    }
}

fn check_node_env(env: &impl EnvStore) -> CheckOutcome {
    let node_env = env.get_non_empty(vars::NODE_ENV).unwrap_or_default();
    CheckOutcome {
        name: "node-env-is-test",
        violation: (node_env != TEST_NODE_ENV).then(|| {
            format!("NODE_ENV must be '{TEST_NODE_ENV}', found '{node_env}'")
        }),
    }
}

fn check_url(env: &impl EnvStore, name: &'static str, keys: &[&str]) -> CheckOutcome {
    let offenders: Vec<&str> = keys
        .iter()
        .copied()
        .filter(|key| {
            env.get_non_empty(key)
                .is_some_and(|url| is_production_database_url(&url))
        })
        .collect();

    CheckOutcome {
        name,
        violation: (!offenders.is_empty())
            .then(|| format!("{} points at a production database", offenders.join(", "))),
    }
}

fn check_api_keys(env: &impl EnvStore) -> CheckOutcome {
    let offenders: Vec<&str> = vars::GUARDED_API_KEYS
        .iter()
        .copied()
        .filter(|key| {
            env.get_non_empty(key)
                .is_some_and(|value| is_production_api_key(&value))
        })
        .collect();

    CheckOutcome {
        name: "no-production-api-keys",
        violation: (!offenders.is_empty())
            .then(|| format!("{} holds a live API key", offenders.join(", "))),
    }
}

fn check_branch_not_primary(env: &impl EnvStore) -> CheckOutcome {
    let primary = env.get_non_empty(vars::NEON_PRIMARY_BRANCH_ID);
    let offenders: Vec<&str> = [vars::NEON_STAGING_BRANCH_ID, vars::NEON_BRANCH_ID]
        .into_iter()
        .filter(|key| {
            matches!(
                (&primary, env.get_non_empty(key)),
                (Some(primary), Some(id)) if *primary == id
            )
        })
        .collect();

    CheckOutcome {
        name: "branch-id-not-primary",
        violation: (!offenders.is_empty()).then(|| {
            format!(
                "{} equals NEON_PRIMARY_BRANCH_ID (production branch)",
                offenders.join(", ")
            )
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env_store::MemoryEnv;

    fn safe_env() -> MemoryEnv {
        MemoryEnv::new()
            .with(vars::NODE_ENV, "test")
            .with(vars::DATABASE_URL, "postgres://localhost/app_test")
            .with(vars::NEON_STAGING_BRANCH_ID, "br-staging")
            .with(vars::NEON_PRIMARY_BRANCH_ID, "br-main")
            .with("OPENAI_API_KEY", "test_openai")
    }

    #[test]
    fn clean_environment_passes_every_check() {
        let report = run_safety_checks(&safe_env()).unwrap();
        assert_eq!(report.passed.len(), 5);
    }

    #[test]
    fn reports_two_failures_not_one() {
        let env = safe_env()
            .with(vars::NODE_ENV, "production")
            .with(vars::DATABASE_URL, "postgres://u:p@app.abc.us-east-1.rds.amazonaws.com/app");

        let err = run_safety_checks(&env).unwrap_err();

        assert_eq!(err.violations.len(), 2);
        let msg = err.to_string();
        assert!(msg.contains("  1. NODE_ENV must be 'test'"));
        assert!(msg.contains("  2. DATABASE_URL points at a production database"));
    }

    #[test]
    fn surfaces_every_violation_at_once() {
        let env = MemoryEnv::new()
            .with(vars::NODE_ENV, "development")
            .with(vars::E2E_DATABASE_URL, "postgres://u:p@main.us-east-2.aws.neon.tech/db")
            .with(vars::DIRECT_URL, "postgres://u:p@db.supabase.co/db")
            .with("RESEND_API_KEY", "re_live123")
            .with("GOOGLE_AI_API_KEY", "AIzaSyLive")
            .with(vars::NEON_STAGING_BRANCH_ID, "br-main")
            .with(vars::NEON_PRIMARY_BRANCH_ID, "br-main");

        let err = run_safety_checks(&env).unwrap_err();

        assert_eq!(err.violations.len(), 5);
        assert!(err.violations[3].contains("RESEND_API_KEY, GOOGLE_AI_API_KEY"));
        assert!(err.violations[4].contains("NEON_STAGING_BRANCH_ID"));
    }

    #[test]
    fn branch_check_is_skipped_without_primary_id() {
        let env = MemoryEnv::new()
            .with(vars::NODE_ENV, "test")
            .with(vars::NEON_STAGING_BRANCH_ID, "br-anything");
        assert!(run_safety_checks(&env).is_ok());
    }
}
