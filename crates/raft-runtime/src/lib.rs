//! # raft-runtime
//!
//! why: drive the pure raft-core state machine with real time and real peers
//! relations: wraps raft-core's RaftNode, persists through raft-storage, talks to peers via Contact
//! what: ConsensusModule actor, RaftHandle, ElectionTimer, Contact trait, LocalNetwork

pub mod contact;
pub mod error;
pub mod handle;
pub mod local;
pub mod module;
pub mod timer;

use std::fmt;

pub use contact::Contact;
pub use error::{ContactError, RuntimeError};
pub use handle::{NodeStatus, RaftHandle};
pub use local::{LocalContact, LocalNetwork};
pub use module::{AppliedEntries, ConsensusModule};
pub use timer::{ElectionTimer, TimerExpired};

/// Anything a client can submit. The runtime never looks inside a command.
pub trait Command: Clone + fmt::Debug + Send + Sync + 'static {}

impl<T: Clone + fmt::Debug + Send + Sync + 'static> Command for T {}
