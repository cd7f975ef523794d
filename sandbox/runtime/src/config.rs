//! Host configuration.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Configuration for a [`Host`](crate::Host).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Maximum nesting of dynamic-link invocations.
    pub max_link_depth: usize,

    /// Instruction budget per sandbox run. `None` runs without a limit.
    pub fuel: Option<u64>,

    /// argv[0] for POSIX guests whose context names no program.
    pub posix_program_name: String,

    /// Timeout for remote virtual files and `get_url`.
    pub fetch_timeout_secs: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_link_depth: 8,
            fuel: None,
            posix_program_name: "a.out".to_string(),
            fetch_timeout_secs: 30,
        }
    }
}

impl HostConfig {
    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
