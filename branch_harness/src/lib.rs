//! Neon test-branch harness.
//!
//! Provisions a disposable, schema-only Postgres branch per test run, refuses
//! to go anywhere near production, keeps concurrent unit and E2E runners in
//! separate environment namespaces, and cleans branches up afterwards,
//! including when the run is interrupted.
//!
//! The [`services`] modules hold the moving parts; [`config`] and
//! [`env_store`] define how configuration crosses the process boundary.

pub mod config;
pub mod env_store;
pub mod error;
pub mod metrics;
pub mod models;
pub mod services;

pub use config::{HarnessConfig, NeonApiConfig, TestEnvironment};
pub use env_store::{EnvStore, MemoryEnv, ProcessEnv};
pub use error::{HarnessError, MigrationError, NeonError, SafetyError, TestEnvironmentError};
pub use models::{BranchInfo, ConnectionStrings, TestType};
pub use services::neon_client::{CreateBranchOptions, DeleteOutcome, NeonClient};
pub use services::orchestrator::{global_teardown, GlobalSetup, SetupContext, SetupOutcome};
