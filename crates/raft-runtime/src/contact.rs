//! # contact
//!
//! why: the consensus module never opens connections; it only asks a collaborator
//! relations: implemented by transports (LocalNetwork in-process), called by module.rs
//! what: Contact trait

use async_trait::async_trait;
use raft_core::{AppendEntries, NodeId, Reply, RequestVote};

use crate::error::ContactError;
use crate::Command;

/// Peer discovery and request/reply delivery for one node.
///
/// Implementations may be slow or fail; the module applies its own per-peer
/// deadline on top and treats any error as a missing reply.
#[async_trait]
pub trait Contact<C: Command>: Send + Sync {
    /// Every other voting member, excluding the caller
    fn list_peers(&self) -> Vec<NodeId>;

    async fn send_request_vote(
        &self,
        peer: NodeId,
        request: RequestVote,
    ) -> Result<Reply, ContactError>;

    async fn send_append_entries(
        &self,
        peer: NodeId,
        request: AppendEntries<C>,
    ) -> Result<Reply, ContactError>;
}
