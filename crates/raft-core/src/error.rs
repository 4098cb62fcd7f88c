//! # error
//!
//! why: give every recoverable failure in the consensus core a typed name
//! relations: returned by log.rs lookups, config.rs validation, node.rs submissions
//! what: RaftError enum and the crate-wide Result alias

use thiserror::Error;

use crate::NodeId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RaftError {
    /// log lookups outside `1..=last_index`; index 0 is reserved
    #[error("log index {index} out of range (last index is {last_index})")]
    IndexOutOfRange { index: u64, last_index: u64 },

    #[error("not the leader, current leader is node {leader_id:?}")]
    NotLeader { leader_id: Option<NodeId> },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, RaftError>;
