//! Branch provisioning, isolation and cleanup services.

pub mod cleanup;
pub mod diagnostics;
pub mod emergency;
pub mod isolation;
pub mod migrations;
pub mod neon_client;
pub mod orchestrator;
pub mod retry;
pub mod safety;
pub mod validator;
