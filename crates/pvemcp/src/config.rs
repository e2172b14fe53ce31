//! Configuration loading and types

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{WrapErr, bail, eyre};
use serde::Deserialize;

use pvemcp_client::{ApiToken, ClientOptions};
use pvemcp_core::ExecConfig;
use pvemcp_exec::{KeySource, SshSettings};

/// Environment variables naming the config file, in priority order
pub const CONFIG_ENV_VARS: &[&str] = &["PVEMCP_CONFIG", "PROXMOX_MCP_CONFIG"];

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub proxmox: ProxmoxSection,
    pub auth: AuthSection,
    #[serde(default)]
    pub logging: LoggingSection,
    /// Remote shell access to nodes; container and host commands need it
    #[serde(default)]
    pub ssh: Option<SshSection>,
    #[serde(default)]
    pub exec: ExecConfig,
}

/// Proxmox VE API endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ProxmoxSection {
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub verify_ssl: bool,
    #[serde(default = "default_service")]
    pub service: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// API token credentials
#[derive(Clone, Deserialize)]
pub struct AuthSection {
    pub user: String,
    pub token_name: String,
    pub token_value: String,
}

impl fmt::Debug for AuthSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSection")
            .field("user", &self.user)
            .field("token_name", &self.token_name)
            .field("token_value", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Anything but `json` means text, so older configs carrying a format string still load
impl From<String> for LogFormat {
    fn from(s: String) -> Self {
        if s.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default, deserialize_with = "log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
            file: None,
        }
    }
}

fn log_format<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<LogFormat, D::Error> {
    Ok(String::deserialize(deserializer)?.into())
}

/// SSH access to cluster nodes
#[derive(Clone, Deserialize)]
pub struct SshSection {
    #[serde(default = "default_ssh_user")]
    pub username: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    /// Variable holding a base64-encoded private key
    #[serde(default)]
    pub key_env: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Seconds, applied to connect and to execution separately
    #[serde(default = "default_timeout_secs")]
    pub timeout: u64,
    #[serde(default)]
    pub known_hosts: Option<PathBuf>,
    /// Node name to SSH address
    #[serde(default)]
    pub node_addresses: HashMap<String, String>,
    #[serde(default)]
    pub use_sudo: bool,
    #[serde(default)]
    pub keep_alive: bool,
    #[serde(default = "default_max_idle")]
    pub max_idle_per_node: usize,
}

impl fmt::Debug for SshSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshSection")
            .field("username", &self.username)
            .field("port", &self.port)
            .field("key_file", &self.key_file)
            .field("key_env", &self.key_env)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("known_hosts", &self.known_hosts)
            .field("node_addresses", &self.node_addresses)
            .field("use_sudo", &self.use_sudo)
            .field("keep_alive", &self.keep_alive)
            .field("max_idle_per_node", &self.max_idle_per_node)
            .finish()
    }
}

impl SshSection {
    /// Key file, then key from the environment, then password, then default identities
    #[must_use]
    pub fn key_source(&self) -> KeySource {
        if let Some(path) = &self.key_file {
            KeySource::Path(path.clone())
        } else if let Some(var) = &self.key_env {
            KeySource::Env(var.clone())
        } else if let Some(password) = &self.password {
            KeySource::Password(password.clone())
        } else {
            KeySource::Default
        }
    }

    #[must_use]
    pub fn settings(&self) -> SshSettings {
        let mut settings = SshSettings::new(&self.username, self.key_source())
            .with_port(self.port)
            .with_timeout(Duration::from_secs(self.timeout));
        if let Some(path) = &self.known_hosts {
            settings = settings.with_known_hosts(path);
        }
        if self.keep_alive {
            settings = settings.with_keep_alive(self.max_idle_per_node);
        }
        settings
    }
}

fn default_api_port() -> u16 {
    8006
}

fn default_true() -> bool {
    true
}

fn default_service() -> String {
    "PVE".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_max_idle() -> usize {
    2
}

impl Config {
    /// Load and validate configuration from a JSON file
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or validated
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("cannot read config file {}", path.display()))?;
        Self::parse(&content).wrap_err_with(|| format!("invalid config file {}", path.display()))
    }

    /// Parse and validate configuration text
    ///
    /// # Errors
    /// Returns error if the JSON is malformed or a setting is invalid
    pub fn parse(content: &str) -> eyre::Result<Self> {
        let config: Config = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> eyre::Result<()> {
        if self.proxmox.host.trim().is_empty() {
            bail!("proxmox.host cannot be empty");
        }
        if self.proxmox.timeout_secs == 0 {
            bail!("proxmox.timeout_secs must be greater than 0");
        }
        for (field, value) in [
            ("auth.user", &self.auth.user),
            ("auth.token_name", &self.auth.token_name),
            ("auth.token_value", &self.auth.token_value),
        ] {
            if value.trim().is_empty() {
                bail!("{field} cannot be empty");
            }
        }
        if let Some(ssh) = &self.ssh {
            if ssh.username.trim().is_empty() {
                bail!("ssh.username cannot be empty");
            }
            if ssh.timeout == 0 {
                bail!("ssh.timeout must be greater than 0");
            }
        }
        self.exec.validate()?;
        Ok(())
    }

    #[must_use]
    pub fn client_options(&self) -> ClientOptions {
        let token = ApiToken::new(
            &self.auth.user,
            &self.auth.token_name,
            &self.auth.token_value,
        );
        ClientOptions {
            host: self.proxmox.host.clone(),
            port: self.proxmox.port,
            verify_ssl: self.proxmox.verify_ssl,
            timeout: Duration::from_secs(self.proxmox.timeout_secs),
            token,
        }
    }
}

/// Standard locations searched when no path is given
fn default_locations() -> Vec<PathBuf> {
    let mut paths = vec![
        PathBuf::from("proxmox-config/config.json"),
        PathBuf::from("config.json"),
    ];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("pvemcp/config.json"));
    }
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".proxmox-mcp/config.json"));
    }
    paths
}

fn first_existing(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|p| p.is_file()).cloned()
}

/// Find the config file: explicit path, then environment, then standard locations
///
/// # Errors
/// Returns error listing the searched locations if none exists
pub fn locate(explicit: Option<&Path>) -> eyre::Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    for var in CONFIG_ENV_VARS {
        if let Some(path) = std::env::var_os(var).filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(path));
        }
    }

    let candidates = default_locations();
    first_existing(&candidates).ok_or_else(|| {
        let searched: Vec<String> = candidates
            .iter()
            .map(|p| format!("   - {}", p.display()))
            .collect();
        eyre!(
            "config file not found; pass --config, set {}, or place config.json in one of:\n{}",
            CONFIG_ENV_VARS.join(" or "),
            searched.join("\n")
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pvemcp_core::OutputEncoding;
    use std::io::Write;

    const MINIMAL: &str = r#"{
        "proxmox": {"host": "pve.lan"},
        "auth": {"user": "root@pam", "token_name": "mcp", "token_value": "secret"}
    }"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = Config::parse(MINIMAL).unwrap();
        assert_eq!(config.proxmox.port, 8006);
        assert!(config.proxmox.verify_ssl);
        assert_eq!(config.proxmox.service, "PVE");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.ssh.is_none());
        assert_eq!(config.exec.poll_budget_secs, 30);
    }

    #[test]
    fn test_full_config() {
        let json = r#"{
            "proxmox": {"host": "10.0.0.10", "port": 8007, "verify_ssl": false},
            "auth": {"user": "root@pam", "token_name": "mcp", "token_value": "secret"},
            "logging": {"level": "DEBUG", "format": "json", "file": "/tmp/pvemcp.log"},
            "ssh": {
                "username": "admin",
                "password": "hunter2",
                "node_addresses": {"pve2": "10.0.0.12"},
                "use_sudo": true,
                "keep_alive": true
            },
            "exec": {"poll_interval_ms": 250, "guest_output_encoding": "base64"}
        }"#;
        let config = Config::parse(json).unwrap();

        assert_eq!(config.logging.format, LogFormat::Json);
        let ssh = config.ssh.as_ref().unwrap();
        assert!(matches!(ssh.key_source(), KeySource::Password(_)));
        assert_eq!(ssh.node_addresses["pve2"], "10.0.0.12");
        assert_eq!(ssh.max_idle_per_node, 2);
        assert!(!format!("{ssh:?}").contains("hunter2"));
        assert_eq!(config.exec.guest_output_encoding, OutputEncoding::Base64);

        let options = config.client_options();
        assert_eq!(options.port, 8007);
        assert!(!options.verify_ssl);
    }

    #[test]
    fn test_python_style_log_format_is_text() {
        let json = r#"{
            "proxmox": {"host": "pve.lan"},
            "auth": {"user": "root@pam", "token_name": "mcp", "token_value": "secret"},
            "logging": {"level": "INFO", "format": "%(asctime)s - %(levelname)s - %(message)s"}
        }"#;
        assert_eq!(Config::parse(json).unwrap().logging.format, LogFormat::Text);
    }

    #[test]
    fn test_validation_errors() {
        let empty_host = MINIMAL.replace("pve.lan", " ");
        let err = Config::parse(&empty_host).unwrap_err();
        assert!(err.to_string().contains("proxmox.host"));

        let empty_token = MINIMAL.replace("secret", "");
        let err = Config::parse(&empty_token).unwrap_err();
        assert!(err.to_string().contains("auth.token_value"));

        let bad_exec = MINIMAL.replace(
            r#""proxmox""#,
            r#""exec": {"poll_budget_secs": 0}, "proxmox""#,
        );
        assert!(Config::parse(&bad_exec).is_err());

        assert!(Config::parse("{not json").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.proxmox.host, "pve.lan");

        let err = Config::load(Path::new("/nonexistent/pvemcp.json")).unwrap_err();
        assert!(err.to_string().contains("cannot read config file"));
    }

    #[test]
    fn test_first_existing_location() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("config.json");
        std::fs::write(&present, MINIMAL).unwrap();

        let candidates = vec![dir.path().join("missing.json"), present.clone()];
        assert_eq!(first_existing(&candidates), Some(present));
        assert_eq!(first_existing(&candidates[..1]), None);
    }

    #[test]
    fn test_explicit_path_wins() {
        let path = locate(Some(Path::new("/etc/pvemcp/custom.json"))).unwrap();
        assert_eq!(path, PathBuf::from("/etc/pvemcp/custom.json"));
    }
}
