//! pvemcp-exec: Remote shell transport
//!
//! SSH connection handling, credential resolution and scoped session
//! management used to run commands on cluster nodes.

pub mod error;
pub mod keys;
pub mod pool;
pub mod result;
pub mod ssh;
pub mod traits;

pub use error::ExecError;
pub use keys::{KeyError, KeySource, ResolvedKey};
pub use pool::{PoolableSession, PooledSession, SessionPool};
pub use result::{CommandResult, ConnectionInfo};
pub use ssh::{SshSettings, SshShell};
pub use traits::RemoteShell;
