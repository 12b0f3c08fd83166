//! Data carried between the Neon API, the orchestrator and test processes.

pub mod branch;
pub mod test_type;

pub use branch::{BranchInfo, ConnectionStrings, Endpoint, Role};
pub use test_type::TestType;
