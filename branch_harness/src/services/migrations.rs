//! Schema migrations against a freshly created branch.
//!
//! Migrations always use the direct URL: they need session-level locks the
//! pooler does not reliably provide.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::vars;
use crate::error::MigrationError;
use crate::models::ConnectionStrings;

/// Output kept per stream when reporting a failed migration.
const MAX_OUTPUT_BYTES: usize = 16 * 1024;

#[async_trait]
pub trait MigrationRunner: Send + Sync {
    async fn migrate(&self, connection: &ConnectionStrings) -> Result<(), MigrationError>;
}

/// Runs a shell command (e.g. `npx prisma db push`) with the branch URLs exported.
#[derive(Debug, Clone)]
pub struct CommandMigrationRunner {
    pub command: String,
    pub timeout: Duration,
}

impl CommandMigrationRunner {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

#[async_trait]
impl MigrationRunner for CommandMigrationRunner {
    async fn migrate(&self, connection: &ConnectionStrings) -> Result<(), MigrationError> {
        tracing::info!(command = %self.command, "Running schema migrations");
        let started = Instant::now();

        let mut cmd = Command::new("sh");
        cmd.args(["-c", &self.command])
            .env(vars::DATABASE_URL, &connection.direct_url)
            .env(vars::DIRECT_URL, &connection.direct_url)
            .env(vars::NODE_ENV, "test")
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(MigrationError::Spawn {
                    command: self.command.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(MigrationError::Timeout {
                    command: self.command.clone(),
                    timeout: self.timeout,
                })
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        if output.status.success() {
            tracing::info!(duration_ms, "Schema migrations applied");
            return Ok(());
        }

        let stderr = tail(&String::from_utf8_lossy(&output.stderr));
        let stdout = tail(&String::from_utf8_lossy(&output.stdout));
        tracing::error!(duration_ms, stdout = %stdout, "Schema migration failed");
        Err(MigrationError::Failed {
            command: self.command.clone(),
            exit_code: output.status.code().unwrap_or(-1),
            stderr,
        })
    }
}

/// Last `MAX_OUTPUT_BYTES` of `text`, on a char boundary.
fn tail(text: &str) -> String {
    if text.len() <= MAX_OUTPUT_BYTES {
        return text.trim_end().to_string();
    }
    let mut start = text.len() - MAX_OUTPUT_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...truncated...\n{}", text[start..].trim_end())
}
