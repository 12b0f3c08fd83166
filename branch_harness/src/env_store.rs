//! Environment-variable access behind a trait.
//!
//! The process environment is the hand-off channel to child processes and
//! later-loaded test code. Everything inside the crate reads and writes it
//! through [`EnvStore`] so the same logic can run against an in-memory map.

use std::collections::BTreeMap;

pub trait EnvStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str);
    fn remove(&mut self, key: &str);

    /// Value of `key` with surrounding whitespace trimmed; empty counts as unset.
    fn get_non_empty(&self, key: &str) -> Option<String> {
        self.get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// `true`, `1` and `yes` (any case) are truthy.
    fn flag(&self, key: &str) -> bool {
        self.get_non_empty(key)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false)
    }
}

/// The real process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvStore for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn set(&mut self, key: &str, value: &str) {
        std::env::set_var(key, value);
    }

    fn remove(&mut self, key: &str) {
        std::env::remove_var(key);
    }
}

/// In-memory environment, used to stage configuration without touching the process.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemoryEnv {
    vars: BTreeMap<String, String>,
}

impl MemoryEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }
}

impl EnvStore for MemoryEnv {
    fn get(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.vars.insert(key.to_string(), value.to_string());
    }

    fn remove(&mut self, key: &str) {
        self.vars.remove(key);
    }
}
