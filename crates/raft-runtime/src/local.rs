//! # local
//!
//! why: run whole clusters inside one process for tests and demos
//! relations: implements contact.rs's Contact by routing to registered RaftHandles
//! what: LocalNetwork (membership, partitions), LocalContact (one node's view)
//!
//! Every request and reply is encoded to json and decoded again on its way
//! through, so commands that cannot cross a real wire fail here too.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use raft_core::{AppendEntries, NodeId, RaftMessage, Reply, RequestVote};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::contact::Contact;
use crate::error::ContactError;
use crate::handle::RaftHandle;
use crate::Command;

struct Routes<C> {
    members: Vec<NodeId>,
    handles: HashMap<NodeId, RaftHandle<C>>,
    // directional: (from, to)
    cut: HashSet<(NodeId, NodeId)>,
}

/// Shared in-process switchboard for a fixed set of members
pub struct LocalNetwork<C> {
    routes: Arc<RwLock<Routes<C>>>,
}

impl<C> Clone for LocalNetwork<C> {
    fn clone(&self) -> Self {
        Self {
            routes: Arc::clone(&self.routes),
        }
    }
}

impl<C: Command + Serialize + DeserializeOwned> LocalNetwork<C> {
    pub fn new(members: impl IntoIterator<Item = NodeId>) -> Self {
        let routes = Routes {
            members: members.into_iter().collect(),
            handles: HashMap::new(),
            cut: HashSet::new(),
        };
        Self {
            routes: Arc::new(RwLock::new(routes)),
        }
    }

    pub fn members(&self) -> Vec<NodeId> {
        self.read(|r| r.members.clone())
    }

    /// The Contact a given member should be spawned with
    pub fn contact_for(&self, id: NodeId) -> Arc<LocalContact<C>> {
        Arc::new(LocalContact {
            id,
            network: self.clone(),
        })
    }

    /// Make a running node reachable. Replaces any earlier handle for the same id.
    pub fn register(&self, handle: RaftHandle<C>) {
        self.write(|r| {
            r.handles.insert(handle.id(), handle);
        });
    }

    pub fn unregister(&self, id: NodeId) {
        self.write(|r| {
            r.handles.remove(&id);
        });
    }

    /// Drop traffic from `from` to `to`. The reverse direction is untouched.
    pub fn partition(&self, from: NodeId, to: NodeId) {
        tracing::info!(from, to, "cutting link");
        self.write(|r| {
            r.cut.insert((from, to));
        });
    }

    pub fn heal(&self, from: NodeId, to: NodeId) {
        tracing::info!(from, to, "healing link");
        self.write(|r| {
            r.cut.remove(&(from, to));
        });
    }

    /// Cut every link into and out of `id`
    pub fn isolate(&self, id: NodeId) {
        tracing::info!(node_id = id, "isolating node");
        self.write(|r| {
            for other in r.members.clone() {
                if other != id {
                    r.cut.insert((id, other));
                    r.cut.insert((other, id));
                }
            }
        });
    }

    pub fn heal_all(&self) {
        tracing::info!("healing all links");
        self.write(|r| r.cut.clear());
    }

    fn route(&self, from: NodeId, to: NodeId) -> Result<RaftHandle<C>, ContactError> {
        self.read(|r| {
            if r.cut.contains(&(from, to)) {
                return None;
            }
            r.handles.get(&to).cloned()
        })
        .ok_or(ContactError::Unreachable(to))
    }

    fn is_cut(&self, from: NodeId, to: NodeId) -> bool {
        self.read(|r| r.cut.contains(&(from, to)))
    }

    fn read<T>(&self, f: impl FnOnce(&Routes<C>) -> T) -> T {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        f(&routes)
    }

    fn write<T>(&self, f: impl FnOnce(&mut Routes<C>) -> T) -> T {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut routes)
    }
}

/// One member's view of a LocalNetwork
pub struct LocalContact<C> {
    id: NodeId,
    network: LocalNetwork<C>,
}

fn over_the_wire<C: Serialize + DeserializeOwned>(
    message: RaftMessage<C>,
) -> Result<RaftMessage<C>, ContactError> {
    let bytes = message.encode()?;
    Ok(RaftMessage::decode(&bytes)?)
}

fn unexpected(kind: &str) -> ContactError {
    ContactError::Codec(serde::de::Error::custom(format!(
        "expected {kind} on the wire"
    )))
}

impl<C: Command + Serialize + DeserializeOwned> LocalContact<C> {
    async fn exchange(
        &self,
        peer: NodeId,
        message: RaftMessage<C>,
    ) -> Result<Reply, ContactError> {
        let handle = self.network.route(self.id, peer)?;

        let answer = match over_the_wire(message)? {
            RaftMessage::RequestVote(request) => handle.request_vote(request).await,
            RaftMessage::AppendEntries(request) => handle.append_entries(request).await,
            RaftMessage::Reply(_) => return Err(unexpected("a request")),
        };
        // stopped peers look like dead ones
        let reply = answer.map_err(|_| ContactError::Unreachable(peer))?;

        // the reply travels the other way
        if self.network.is_cut(peer, self.id) {
            return Err(ContactError::Unreachable(peer));
        }

        match over_the_wire(RaftMessage::<C>::Reply(reply))? {
            RaftMessage::Reply(reply) => Ok(reply),
            _ => Err(unexpected("a reply")),
        }
    }
}

#[async_trait]
impl<C: Command + Serialize + DeserializeOwned> Contact<C> for LocalContact<C> {
    fn list_peers(&self) -> Vec<NodeId> {
        self.network
            .members()
            .into_iter()
            .filter(|&m| m != self.id)
            .collect()
    }

    async fn send_request_vote(
        &self,
        peer: NodeId,
        request: RequestVote,
    ) -> Result<Reply, ContactError> {
        let message = RaftMessage::RequestVote(request);
        self.exchange(peer, message).await
    }

    async fn send_append_entries(
        &self,
        peer: NodeId,
        request: AppendEntries<C>,
    ) -> Result<Reply, ContactError> {
        let message = RaftMessage::AppendEntries(request);
        self.exchange(peer, message).await
    }
}
