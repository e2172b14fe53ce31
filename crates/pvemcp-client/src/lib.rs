//! pvemcp-client: Proxmox VE API client
//!
//! Token-authenticated HTTP access to the cluster inventory and the QEMU
//! guest agent. [`ProxmoxClient`] implements the core `Inventory` and
//! `GuestAgent` traits.
//!
//! ```no_run
//! use pvemcp_client::{ApiToken, ClientOptions, ProxmoxClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let token = ApiToken::new("root@pam", "mcp", "00000000-0000-0000-0000-000000000000");
//! let client = ProxmoxClient::new(&ClientOptions::new("pve.lan", token))?;
//!
//! for node in client.nodes().await? {
//!     println!("{}", node.node);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cluster;
pub mod error;
pub mod http;
pub mod types;

pub use error::{ClientError, Result};
pub use http::{ApiToken, ClientOptions, ProxmoxClient};
