//! Logical test contexts and the environment namespace each one uses.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TestType {
    #[default]
    Unit,
    Integration,
    E2e,
}

impl TestType {
    pub fn as_str(self) -> &'static str {
        match self {
            TestType::Unit => "unit",
            TestType::Integration => "integration",
            TestType::E2e => "e2e",
        }
    }

    /// Variable prefix. Integration shares the unit namespace and branch.
    pub fn env_prefix(self) -> &'static str {
        match self {
            TestType::E2e => "E2E",
            TestType::Unit | TestType::Integration => "UNIT",
        }
    }

    /// Prefix for branch names created on behalf of this context.
    pub fn branch_prefix(self) -> &'static str {
        match self {
            TestType::E2e => "e2e",
            TestType::Unit | TestType::Integration => "unit",
        }
    }

    pub fn database_url_var(self) -> String {
        format!("{}_DATABASE_URL", self.env_prefix())
    }

    pub fn direct_url_var(self) -> String {
        format!("{}_DIRECT_URL", self.env_prefix())
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTestType(pub String);

impl fmt::Display for UnknownTestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown test type '{}' (expected unit, integration or e2e)", self.0)
    }
}

impl std::error::Error for UnknownTestType {}

impl FromStr for TestType {
    type Err = UnknownTestType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unit" => Ok(TestType::Unit),
            "integration" => Ok(TestType::Integration),
            "e2e" => Ok(TestType::E2e),
            _ => Err(UnknownTestType(s.to_string())),
        }
    }
}
