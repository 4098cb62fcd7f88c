//! # error
//!
//! why: separate "a peer did not answer" from "this node cannot serve the request"
//! relations: ContactError comes back from Contact impls, RuntimeError from RaftHandle
//! what: ContactError, RuntimeError

use std::io;

use raft_core::{NodeId, RaftError};
use thiserror::Error;

/// Failure to reach a peer. Local only: it shrinks the set of replies, nothing more.
#[derive(Error, Debug)]
pub enum ContactError {
    #[error("peer {0} is unreachable")]
    Unreachable(NodeId),

    #[error("rpc to peer {0} timed out")]
    Timeout(NodeId),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("not the leader, current leader is node {leader_id:?}")]
    NotLeader { leader_id: Option<NodeId> },

    #[error("consensus module has stopped")]
    Stopped,

    #[error("storage error: {0}")]
    Storage(#[from] io::Error),

    #[error(transparent)]
    Core(RaftError),
}

impl From<RaftError> for RuntimeError {
    fn from(err: RaftError) -> Self {
        match err {
            RaftError::NotLeader { leader_id } => RuntimeError::NotLeader { leader_id },
            other => RuntimeError::Core(other),
        }
    }
}
