//! SSH command execution using russh crate

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use russh::keys::{PrivateKeyWithHashAlg, check_known_hosts_path, load_secret_key, ssh_key};
use russh::{ChannelMsg, Disconnect, client};
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ExecError;
use crate::keys::{KeySource, ResolvedKey};
use crate::pool::{PoolableSession, PooledSession, SessionPool};
use crate::result::{CommandResult, ConnectionInfo};
use crate::traits::RemoteShell;

/// SSH client handler for russh
///
/// Without a `known_hosts` file every server key is accepted.
#[derive(Debug)]
struct SshClientHandler {
    host: String,
    port: u16,
    known_hosts: Option<PathBuf>,
    rejection: Arc<OnceLock<String>>,
}

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        let Some(path) = &self.known_hosts else {
            return Ok(true);
        };

        let reason = match check_known_hosts_path(&self.host, self.port, server_public_key, path) {
            Ok(true) => return Ok(true),
            Ok(false) => format!("{} is not present in {}", self.host, path.display()),
            Err(e) => format!("{} does not match {}: {e}", self.host, path.display()),
        };
        warn!(host = %self.host, reason = %reason, "rejecting server key");
        let _ = self.rejection.set(reason);
        Ok(false)
    }
}

/// Connection defaults shared by every node
#[derive(Debug, Clone)]
pub struct SshSettings {
    /// Login user
    pub user: String,
    /// SSH port
    pub port: u16,
    /// How to authenticate
    pub key_source: KeySource,
    /// Bound on TCP connect plus authentication
    pub connect_timeout: Duration,
    /// Bound on a single command once connected
    pub exec_timeout: Duration,
    /// Optional `known_hosts` file to verify server keys against
    pub known_hosts: Option<PathBuf>,
    /// Park sessions for reuse instead of closing them after each command
    pub keep_alive: bool,
    /// Idle sessions kept per node when `keep_alive` is set
    pub max_idle_per_node: usize,
}

impl SshSettings {
    /// Settings with the usual defaults (port 22, 30s timeouts, no pooling)
    pub fn new(user: impl Into<String>, key_source: KeySource) -> Self {
        Self {
            user: user.into(),
            port: 22,
            key_source,
            connect_timeout: Duration::from_secs(30),
            exec_timeout: Duration::from_secs(30),
            known_hosts: None,
            keep_alive: false,
            max_idle_per_node: 2,
        }
    }

    /// Set custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Use one timeout for connecting and for running commands
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self.exec_timeout = timeout;
        self
    }

    /// Verify server keys against a `known_hosts` file
    #[must_use]
    pub fn with_known_hosts(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts = Some(path.into());
        self
    }

    /// Enable session reuse
    #[must_use]
    pub fn with_keep_alive(mut self, max_idle_per_node: usize) -> Self {
        self.keep_alive = true;
        self.max_idle_per_node = max_idle_per_node;
        self
    }
}

/// An authenticated SSH connection to one node
pub struct SshSession {
    handle: client::Handle<SshClientHandler>,
    host: String,
}

impl SshSession {
    /// Run one command on a fresh channel and collect its output
    #[instrument(skip(self, cmd), fields(host = %self.host))]
    async fn exec(&mut self, cmd: &str) -> Result<CommandResult, ExecError> {
        debug!(command = %cmd, "executing remote command");

        let start = Instant::now();

        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;

        channel
            .exec(true, cmd)
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;

        let mut output = ChannelOutput::default();

        // Exit status may arrive after EOF, so read until the channel closes.
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => output.stdout(&data),
                ChannelMsg::ExtendedData { data, ext } => {
                    if ext == 1 {
                        output.stderr(&data);
                    }
                }
                ChannelMsg::ExitStatus { exit_status } => output.exit_status(exit_status),
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    debug!(signal = ?signal_name, "remote process killed by signal");
                    output.exit_signal();
                }
                _ => {}
            }
        }

        let result = output.finish(start.elapsed())?;
        debug!(
            command = %cmd,
            status = ?result.status,
            duration = ?result.duration,
            "remote command completed"
        );
        Ok(result)
    }
}

/// Output collected from one exec channel
#[derive(Debug, Default)]
struct ChannelOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    status: Option<i32>,
    signalled: bool,
}

impl ChannelOutput {
    fn stdout(&mut self, data: &[u8]) {
        self.stdout.extend_from_slice(data);
    }

    fn stderr(&mut self, data: &[u8]) {
        self.stderr.extend_from_slice(data);
    }

    fn exit_status(&mut self, status: u32) {
        self.status = Some(status.cast_signed());
    }

    fn exit_signal(&mut self) {
        self.signalled = true;
    }

    /// A channel that closed with neither an exit status nor a signal lost its connection
    fn finish(self, duration: Duration) -> Result<CommandResult, ExecError> {
        if self.status.is_none() && !self.signalled {
            return Err(ExecError::IoError(
                "channel closed without exit status".to_string(),
            ));
        }
        Ok(CommandResult {
            status: self.status,
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
            duration,
        })
    }
}

impl PoolableSession for SshSession {
    fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    fn close(self) {
        let SshSession { handle, host } = self;
        // Outside a runtime the connection is torn down when the handle drops.
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Err(e) = handle
                    .disconnect(Disconnect::ByApplication, "", "English")
                    .await
                {
                    debug!(host = %host, error = %e, "SSH disconnect failed");
                } else {
                    debug!(host = %host, "SSH disconnected");
                }
            });
        }
    }
}

/// SSH-backed [`RemoteShell`]
///
/// Opens one session per command unless `keep_alive` is set, in which case
/// sessions are parked per node and reused one command at a time.
pub struct SshShell {
    settings: SshSettings,
    key: ResolvedKey,
    pool: SessionPool<SshSession>,
}

impl std::fmt::Debug for SshShell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshShell")
            .field("settings", &self.settings)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl SshShell {
    /// Create a new SSH shell
    ///
    /// # Errors
    /// Returns `ExecError::SshKeyError` if key resolution fails
    pub fn new(settings: SshSettings) -> Result<Self, ExecError> {
        let key = settings
            .key_source
            .resolve()
            .map_err(|e| ExecError::SshKeyError(e.to_string()))?;
        let pool = SessionPool::new(settings.keep_alive, settings.max_idle_per_node);

        Ok(Self {
            settings,
            key,
            pool,
        })
    }

    /// Connection settings
    pub fn settings(&self) -> &SshSettings {
        &self.settings
    }

    fn connection_info(&self, host: &str) -> ConnectionInfo {
        ConnectionInfo::new(host, &self.settings.user).with_port(self.settings.port)
    }

    /// Reuse an idle session or open a new one
    async fn checkout(&self, info: &ConnectionInfo) -> Result<PooledSession<SshSession>, ExecError> {
        let key = info.pool_key();
        if let Some(session) = self.pool.take_idle(&key) {
            debug!(host = %info.host, "reusing pooled SSH session");
            return Ok(session);
        }

        let session = match timeout(self.settings.connect_timeout, self.connect(info)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ExecError::ConnectionFailed(format!(
                    "timed out after {:?} connecting to {}:{}",
                    self.settings.connect_timeout, info.host, info.port
                )));
            }
        };
        Ok(self.pool.attach(&key, session))
    }

    /// Connect and authenticate to the remote host
    #[instrument(skip(self), fields(host = %info.host))]
    async fn connect(&self, info: &ConnectionInfo) -> Result<SshSession, ExecError> {
        info!(
            host = %info.host,
            port = info.port,
            user = %info.user,
            "connecting to SSH"
        );

        let config = client::Config {
            keepalive_interval: self
                .settings
                .keep_alive
                .then(|| Duration::from_secs(15)),
            ..Default::default()
        };
        let config = Arc::new(config);

        let rejection = Arc::new(OnceLock::new());
        let handler = SshClientHandler {
            host: info.host.clone(),
            port: info.port,
            known_hosts: self.settings.known_hosts.clone(),
            rejection: Arc::clone(&rejection),
        };

        let mut handle = match client::connect(config, (&info.host[..], info.port), handler).await
        {
            Ok(handle) => handle,
            Err(e) => {
                if let Some(reason) = rejection.get() {
                    return Err(ExecError::HostKeyMismatch(reason.clone()));
                }
                return Err(ExecError::ConnectionFailed(e.to_string()));
            }
        };

        self.authenticate(&mut handle, &info.user).await?;

        info!(host = %info.host, "SSH connected and authenticated");

        Ok(SshSession {
            handle,
            host: info.host.clone(),
        })
    }

    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        user: &str,
    ) -> Result<(), ExecError> {
        if let Some(password) = self.key.password() {
            let auth_res = handle
                .authenticate_password(user, password)
                .await
                .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?;
            if !auth_res.success() {
                return Err(ExecError::AuthenticationFailed(
                    "password authentication failed".to_string(),
                ));
            }
            return Ok(());
        }

        let explicit = matches!(self.key, ResolvedKey::Path(_) | ResolvedKey::Temp(_));
        let paths = self.key.key_paths();
        if paths.is_empty() {
            return Err(ExecError::AuthenticationFailed(
                "no authentication method available".to_string(),
            ));
        }

        for key_path in paths {
            let key_pair = match load_secret_key(key_path, None) {
                Ok(key_pair) => key_pair,
                Err(e) if explicit => return Err(ExecError::SshKeyError(e.to_string())),
                Err(e) => {
                    debug!(path = %key_path.display(), error = %e, "skipping identity");
                    continue;
                }
            };

            let hash_alg = handle
                .best_supported_rsa_hash()
                .await
                .ok()
                .flatten()
                .flatten();
            let auth_res = handle
                .authenticate_publickey(
                    user,
                    PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg),
                )
                .await
                .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?;

            if auth_res.success() {
                return Ok(());
            }
        }

        Err(ExecError::AuthenticationFailed(
            "public key authentication failed".to_string(),
        ))
    }
}

impl Drop for SshShell {
    fn drop(&mut self) {
        self.pool.clear();
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    #[instrument(skip(self, cmd), fields(host = %host))]
    async fn run_with_timeout(
        &self,
        host: &str,
        cmd: &str,
        timeout_duration: Duration,
    ) -> Result<CommandResult, ExecError> {
        let info = self.connection_info(host);
        let mut session = self.checkout(&info).await?;

        let start = Instant::now();
        debug!(command = %cmd, timeout = ?timeout_duration, "executing with timeout");

        match timeout(timeout_duration, session.exec(cmd)).await {
            Ok(Ok(cmd_result)) => Ok(cmd_result),
            Ok(Err(e)) => {
                warn!(pool_key = session.key(), error = %e, "discarding broken SSH session");
                session.discard();
                Err(e)
            }
            Err(_) => {
                error!(
                    command = %cmd,
                    timeout = ?timeout_duration,
                    elapsed = ?start.elapsed(),
                    "command timed out"
                );
                session.discard();
                Err(ExecError::Timeout {
                    timeout: timeout_duration,
                })
            }
        }
    }

    fn default_timeout(&self) -> Duration {
        self.settings.exec_timeout
    }

    fn transport(&self) -> &'static str {
        "ssh"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_builder() {
        let settings = SshSettings::new("root", KeySource::Password("secret".into()))
            .with_port(2222)
            .with_timeout(Duration::from_secs(5))
            .with_keep_alive(3);

        assert_eq!(settings.port, 2222);
        assert_eq!(settings.connect_timeout, Duration::from_secs(5));
        assert_eq!(settings.exec_timeout, Duration::from_secs(5));
        assert!(settings.keep_alive);
        assert_eq!(settings.max_idle_per_node, 3);
    }

    #[test]
    fn test_shell_uses_configured_user_and_port() {
        let settings =
            SshSettings::new("admin", KeySource::Password("secret".into())).with_port(2200);
        let shell = SshShell::new(settings).unwrap();

        let info = shell.connection_info("pve1.lan");
        assert_eq!(info, ConnectionInfo::new("pve1.lan", "admin").with_port(2200));
        assert_eq!(shell.transport(), "ssh");
    }

    #[test]
    fn test_unresolvable_key_is_rejected_at_construction() {
        let settings = SshSettings::new(
            "root",
            KeySource::Path(PathBuf::from("/nonexistent/pvemcp/id_ed25519")),
        );
        let err = SshShell::new(settings).unwrap_err();
        assert!(matches!(err, ExecError::SshKeyError(_)));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_connection_failure() {
        let settings = SshSettings::new("root", KeySource::Password("secret".into()))
            .with_port(1)
            .with_timeout(Duration::from_secs(2));
        let shell = SshShell::new(settings).unwrap();

        let err = shell.run("127.0.0.1", "true").await.unwrap_err();
        assert!(err.is_connection_failure(), "unexpected error: {err}");
    }

    #[test]
    fn test_channel_output_with_exit_status() {
        let mut output = ChannelOutput::default();
        output.stdout(b"hi\n");
        output.stderr(b"warn\n");
        output.exit_status(3);

        let result = output.finish(Duration::from_millis(5)).unwrap();
        assert_eq!(result.status, Some(3));
        assert_eq!(result.stdout, "hi\n");
        assert_eq!(result.stderr, "warn\n");
    }

    #[test]
    fn test_channel_output_killed_by_signal() {
        let mut output = ChannelOutput::default();
        output.stdout(b"partial");
        output.exit_signal();

        let result = output.finish(Duration::ZERO).unwrap();
        assert_eq!(result.status, None);
        assert_eq!(result.stdout, "partial");
    }

    #[test]
    fn test_channel_closed_without_exit_status_is_error() {
        let mut output = ChannelOutput::default();
        output.stdout(b"partial");

        let err = output.finish(Duration::ZERO).unwrap_err();
        assert!(matches!(err, ExecError::IoError(_)));
        assert_eq!(err.to_string(), "I/O error: channel closed without exit status");
    }

    #[tokio::test]
    #[ignore = "requires SSH server"]
    async fn test_ssh_roundtrip() {
        let settings = SshSettings::new("root", KeySource::Default);
        let shell = SshShell::new(settings).unwrap();
        let result = shell.run("localhost", "printf 'a\\nb'").await.unwrap();
        assert_eq!(result.stdout, "a\nb");
    }
}
