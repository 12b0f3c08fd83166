//! Error taxonomy for branch provisioning and test isolation.

use std::time::Duration;

use thiserror::Error;

/// Missing or unsafe test configuration.
///
/// Always carries the complete list of problems found, never just the first.
#[derive(Debug, Error)]
#[error("invalid test environment:\n{}", format_indexed(.problems))]
pub struct TestEnvironmentError {
    pub problems: Vec<String>,
}

impl TestEnvironmentError {
    pub fn new(problems: Vec<String>) -> Self {
        Self { problems }
    }
}

/// Failures talking to the Neon API, or safety gates that refuse to.
#[derive(Debug, Error)]
pub enum NeonError {
    #[error("branch name '{name}' must start with one of test-, unit-, e2e-, integration-")]
    InvalidBranchName { name: String },

    #[error("no parent branch given and no staging branch configured")]
    NoParent,

    #[error("refusing to use production branch {branch_id} as a parent")]
    ProductionParent { branch_id: String },

    #[error("Neon API {method} {path} returned {status}: {body}")]
    Status {
        method: String,
        path: String,
        status: u16,
        body: String,
    },

    #[error("Neon API request failed after {attempts} attempt(s): {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected Neon API response: {0}")]
    Decode(String),

    #[error("branch {branch_id} has no endpoints")]
    NoEndpoints { branch_id: String },

    #[error("branch {branch_id} has no usable database role")]
    NoRole { branch_id: String },

    #[error("empty connection URI returned for branch {branch_id}")]
    EmptyConnectionUri { branch_id: String },

    #[error("branch {branch_id} not ready after {:?}", .waited)]
    ReadyTimeout { branch_id: String, waited: Duration },
}

impl NeonError {
    /// HTTP status carried by the error, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            NeonError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Aggregate of every failed pre-flight safety check.
#[derive(Debug, Error)]
#[error("safety checks failed ({} violation(s)):\n{}", .violations.len(), format_indexed(.violations))]
pub struct SafetyError {
    pub violations: Vec<String>,
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to spawn migration command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("migration command `{command}` exited with {exit_code}: {stderr}")]
    Failed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("migration command `{command}` timed out after {}s", .timeout.as_secs())]
    Timeout { command: String, timeout: Duration },
}

/// Everything the setup orchestrator can fail with.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Environment(#[from] TestEnvironmentError),

    #[error(transparent)]
    Safety(#[from] SafetyError),

    #[error(transparent)]
    Neon(#[from] NeonError),

    #[error(transparent)]
    Migration(#[from] MigrationError),
}

pub type Result<T, E = HarnessError> = std::result::Result<T, E>;

/// Render messages as a 1-based, indented list.
pub(crate) fn format_indexed(items: &[String]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, msg)| format!("  {}. {}", i + 1, msg))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safety_error_lists_every_violation_with_index() {
        let err = SafetyError {
            violations: vec!["NODE_ENV is 'production'".into(), "DATABASE_URL is production".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 violation(s)"));
        assert!(msg.contains("  1. NODE_ENV is 'production'"));
        assert!(msg.contains("  2. DATABASE_URL is production"));
    }

    #[test]
    fn status_is_exposed_only_for_http_errors() {
        let err = NeonError::Status {
            method: "DELETE".into(),
            path: "/projects/p/branches/b".into(),
            status: 404,
            body: "not found".into(),
        };
        assert_eq!(err.status(), Some(404));
        assert_eq!(
            NeonError::NoEndpoints {
                branch_id: "br-x".into()
            }
            .status(),
            None
        );
    }
}
