//! neon-test: branch housekeeping and test-run wrapper for Neon test branches.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "neon-test", about = "Isolated Neon branches for test runs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Delete one test branch (always exits 0)
    #[command(name = "cleanup-branch")]
    CleanupBranch {
        /// Branch to delete
        #[arg(env = "NEON_BRANCH_ID")]
        branch_id: Option<String>,
    },
    /// Delete test branches older than the retention window
    #[command(name = "cleanup-stale-branches")]
    CleanupStaleBranches {
        /// Overrides NEON_BRANCH_RETENTION_HOURS
        #[arg(long)]
        retention_hours: Option<u64>,
        /// List what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },
    /// Check configuration and API access
    #[command(name = "verify-test-setup")]
    VerifyTestSetup,
    /// Provision a branch, run a command against it, tear it down
    #[command(name = "run-tests")]
    RunTests {
        /// Test command and its arguments
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    init_tracing();
    let Cli { command } = Cli::parse();

    let code = match command {
        Command::CleanupBranch { branch_id } => commands::cleanup_branch::run(branch_id).await,
        Command::CleanupStaleBranches {
            retention_hours,
            dry_run,
        } => commands::cleanup_stale::run(retention_hours, dry_run).await,
        Command::VerifyTestSetup => commands::verify::run().await,
        Command::RunTests { command } => commands::run_tests::run(command).await?,
    };

    std::process::exit(code);
}
