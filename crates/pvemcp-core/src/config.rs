//! Execution settings

use std::time::Duration;

use base64::Engine;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ExecFailure};

/// Settings for the guest-agent and container executors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Delay between guest-agent status polls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Total time allowed for a guest-agent command to finish
    #[serde(default = "default_poll_budget_secs")]
    pub poll_budget_secs: u64,
    /// argv prefix the command string is appended to inside a VM
    #[serde(default = "default_shell")]
    pub guest_shell: Vec<String>,
    /// How the guest agent encodes captured output
    #[serde(default)]
    pub guest_output_encoding: OutputEncoding,
    /// Host-side wrapper used to enter a container
    #[serde(default = "default_container_exec_tool")]
    pub container_exec_tool: String,
    /// Shell inside the container that interprets the command
    #[serde(default = "default_shell")]
    pub container_shell: Vec<String>,
    /// Patterns on the wrapper's stderr meaning the container never ran the command
    #[serde(default = "default_not_running_patterns")]
    pub container_not_running_patterns: Vec<String>,
}

/// Longest guest-agent wait a configuration may ask for
pub const MAX_POLL_BUDGET_SECS: u64 = 24 * 60 * 60;

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_poll_budget_secs() -> u64 {
    30
}

fn default_shell() -> Vec<String> {
    vec!["/bin/sh".to_string(), "-c".to_string()]
}

fn default_container_exec_tool() -> String {
    "pct exec".to_string()
}

fn default_not_running_patterns() -> Vec<String> {
    vec![r"(?im)^\s*(?:ct|container)\s+'?\d+'?\s+(?:is\s+)?not\s+running".to_string()]
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            poll_budget_secs: default_poll_budget_secs(),
            guest_shell: default_shell(),
            guest_output_encoding: OutputEncoding::default(),
            container_exec_tool: default_container_exec_tool(),
            container_shell: default_shell(),
            container_not_running_patterns: default_not_running_patterns(),
        }
    }
}

impl ExecConfig {
    /// Poll timing for guest-agent commands
    #[must_use]
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.poll_interval_ms),
            budget: Duration::from_secs(self.poll_budget_secs),
        }
    }

    /// Compile the container-not-running patterns
    ///
    /// # Errors
    /// Returns `ConfigError` if a pattern is not a valid regex
    pub fn not_running_patterns(&self) -> Result<Vec<Regex>, ConfigError> {
        self.container_not_running_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    ConfigError(format!("invalid container_not_running_patterns entry {p:?}: {e}"))
                })
            })
            .collect()
    }

    /// Check settings that serde cannot
    ///
    /// # Errors
    /// Returns `ConfigError` describing the first invalid setting
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_budget_secs == 0 {
            return Err(ConfigError("poll_budget_secs must be greater than 0".into()));
        }
        if self.poll_budget_secs > MAX_POLL_BUDGET_SECS {
            return Err(ConfigError(format!(
                "poll_budget_secs must be at most {MAX_POLL_BUDGET_SECS}"
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError("poll_interval_ms must be greater than 0".into()));
        }
        let policy = self.poll_policy();
        if policy.interval > policy.budget {
            return Err(ConfigError(format!(
                "poll interval {:?} exceeds poll budget {:?}",
                policy.interval, policy.budget
            )));
        }
        if self.guest_shell.is_empty() {
            return Err(ConfigError("guest_shell must not be empty".into()));
        }
        if self.container_exec_tool.trim().is_empty() {
            return Err(ConfigError("container_exec_tool must not be empty".into()));
        }
        self.not_running_patterns()?;
        Ok(())
    }
}

/// Timing of the guest-agent status loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub budget: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        ExecConfig::default().poll_policy()
    }
}

/// Transport encoding of guest-agent output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputEncoding {
    /// Output arrives as text
    #[default]
    Plain,
    /// Output arrives base64 encoded
    Base64,
}

impl OutputEncoding {
    /// Decode one captured stream; a missing stream is empty
    ///
    /// # Errors
    /// Returns `ExecFailure::Protocol` if the data is not valid for this encoding
    pub fn decode(self, data: Option<&str>) -> Result<String, ExecFailure> {
        let Some(data) = data else {
            return Ok(String::new());
        };
        match self {
            OutputEncoding::Plain => Ok(data.to_string()),
            OutputEncoding::Base64 => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(data)
                    .map_err(|e| {
                        ExecFailure::Protocol(format!("agent returned undecodable output: {e}"))
                    })?;
                Ok(String::from_utf8(bytes)
                    .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned()))
            }
        }
    }
}
