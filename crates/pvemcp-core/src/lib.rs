//! pvemcp-core: Command execution across VMs, containers and nodes
//!
//! Resolves targets against the cluster inventory, runs commands through the
//! guest agent or a remote shell, and reports every result as an
//! [`ExecutionOutcome`].

pub mod agent;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod guest;
pub mod inventory;
pub mod outcome;
pub mod poll;
pub mod resolver;
pub mod shell;
pub mod target;

pub use agent::{AgentError, AgentExecStatus, GuestAgent, GuestAgentTask};
pub use config::{ExecConfig, OutputEncoding, PollPolicy};
pub use coordinator::ExecutionCoordinator;
pub use error::{ConfigError, ErrorKind, ExecFailure};
pub use executor::Executor;
pub use guest::GuestAgentExecutor;
pub use inventory::{GuestEntry, GuestKind, Inventory, InventoryError, NodeEntry};
pub use outcome::{ExecutionOutcome, ExecutionRequest, OutcomeStatus};
pub use resolver::TargetResolver;
pub use shell::{ContainerExec, NodeAddresses, NotRunningClassifier, RemoteShellExecutor, shell_quote};
pub use target::{Target, TargetKind, Vmid};
