//! SSH credential management and resolution

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

/// Identity files tried when no explicit credential is configured
const DEFAULT_IDENTITIES: &[&str] = &["id_ed25519", "id_ecdsa", "id_rsa"];

static TEMP_KEY_COUNTER: AtomicU64 = AtomicU64::new(0);

/// SSH credential resolution strategy
#[derive(Clone)]
pub enum KeySource {
    /// Explicit path to key file
    Path(PathBuf),
    /// Base64-encoded key from environment
    Env(String),
    /// Password authentication
    Password(String),
    /// Default identities under `~/.ssh`
    Default,
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::Path(p) => f.debug_tuple("Path").field(p).finish(),
            KeySource::Env(var) => f.debug_tuple("Env").field(var).finish(),
            KeySource::Password(_) => f.write_str("Password(<redacted>)"),
            KeySource::Default => f.write_str("Default"),
        }
    }
}

impl KeySource {
    /// Resolve the source to something the SSH client can authenticate with
    ///
    /// For `Env`, decodes base64 and writes to temp file
    ///
    /// # Errors
    /// Returns `KeyError` if key resolution fails (env not set, invalid base64, etc.)
    pub fn resolve(&self) -> Result<ResolvedKey, KeyError> {
        match self {
            KeySource::Path(path) => {
                if !path.exists() {
                    return Err(KeyError::NotFound(path.display().to_string()));
                }
                validate_key_permissions(path)?;
                Ok(ResolvedKey::Path(path.clone()))
            }
            KeySource::Env(var_name) => {
                let base64_key =
                    env::var(var_name).map_err(|_| KeyError::EnvNotSet(var_name.clone()))?;
                let key_data = base64_decode(&base64_key).map_err(|_| KeyError::InvalidBase64)?;

                let temp_path = write_temp_key(&key_data)?;
                Ok(ResolvedKey::Temp(temp_path))
            }
            KeySource::Password(password) => Ok(ResolvedKey::Password(password.clone())),
            KeySource::Default => {
                let candidates = default_identities();
                debug!(count = candidates.len(), "found default SSH identities");
                Ok(ResolvedKey::Identities(candidates))
            }
        }
    }
}

/// Resolved credential
pub enum ResolvedKey {
    /// Path to key file
    Path(PathBuf),
    /// Temporary file (will be deleted on drop)
    Temp(PathBuf),
    /// Password
    Password(String),
    /// Candidate identity files, tried in order
    Identities(Vec<PathBuf>),
}

impl fmt::Debug for ResolvedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedKey::Path(p) => f.debug_tuple("Path").field(p).finish(),
            ResolvedKey::Temp(p) => f.debug_tuple("Temp").field(p).finish(),
            ResolvedKey::Password(_) => f.write_str("Password(<redacted>)"),
            ResolvedKey::Identities(paths) => f.debug_tuple("Identities").field(paths).finish(),
        }
    }
}

impl ResolvedKey {
    /// Key files to attempt public key authentication with
    #[must_use]
    pub fn key_paths(&self) -> Vec<&Path> {
        match self {
            ResolvedKey::Path(p) | ResolvedKey::Temp(p) => vec![p.as_path()],
            ResolvedKey::Identities(paths) => paths.iter().map(PathBuf::as_path).collect(),
            ResolvedKey::Password(_) => Vec::new(),
        }
    }

    /// Password, when password authentication is configured
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        match self {
            ResolvedKey::Password(p) => Some(p),
            _ => None,
        }
    }
}

/// Key resolution errors
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("environment variable {0} not set")]
    EnvNotSet(String),

    #[error("invalid base64 encoding")]
    InvalidBase64,

    #[error("key file permissions too open: {0} (should be 600)")]
    BadPermissions(String),

    #[error("key file not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn base64_decode(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(input.trim())
}

fn default_identities() -> Vec<PathBuf> {
    let Some(home) = env::var_os("HOME") else {
        return Vec::new();
    };
    let ssh_dir = PathBuf::from(home).join(".ssh");

    DEFAULT_IDENTITIES
        .iter()
        .map(|name| ssh_dir.join(name))
        .filter(|p| p.exists())
        .collect()
}

fn validate_key_permissions(path: &Path) -> Result<(), KeyError> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path).map_err(KeyError::Io)?;
    let mode = metadata.permissions().mode();

    // group and other must have no access
    if mode & 0o77 != 0 {
        return Err(KeyError::BadPermissions(path.display().to_string()));
    }

    Ok(())
}

fn write_temp_key(key_data: &[u8]) -> Result<PathBuf, KeyError> {
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let seq = TEMP_KEY_COUNTER.fetch_add(1, Ordering::Relaxed);
    let temp_path =
        env::temp_dir().join(format!("pvemcp_ssh_key_{}_{seq}", std::process::id()));

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&temp_path)?;
    file.write_all(key_data)?;

    debug!(path = %temp_path.display(), "wrote temporary SSH key");

    Ok(temp_path)
}

impl Drop for ResolvedKey {
    fn drop(&mut self) {
        if let ResolvedKey::Temp(path) = self
            && let Err(e) = std::fs::remove_file(&*path)
        {
            warn!(path = %path.display(), error = %e, "failed to remove temp key");
        }
    }
}
