//! # raft-core
//!
//! why: implement the core raft consensus algorithm in pure, portable rust
//! relations: driven by raft-runtime's actor, persisted via raft-storage
//! what: state machine, election logic, log management, message types, timeout rolling

pub mod config;
pub mod error;
pub mod log;
pub mod message;
pub mod node;
pub mod timer;

/// Opaque node identifier, fixed for the node's lifetime
pub type NodeId = u64;
/// Logical clock; each term has at most one leader
pub type Term = u64;

pub use config::RaftConfig;
pub use error::{RaftError, Result};
pub use log::{LogEntry, RaftLog};
pub use message::{AppendEntries, RaftMessage, Reply, RequestVote};
pub use node::{NodeState, RaftNode};
pub use timer::{roll_timeout, roll_timeout_with};
