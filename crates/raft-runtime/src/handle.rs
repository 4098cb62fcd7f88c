//! # handle
//!
//! why: give transports and clients a cheap, cloneable way into the actor
//! relations: every method posts an Event into module.rs's queue and awaits the answer
//! what: RaftHandle, NodeStatus snapshot

use raft_core::{AppendEntries, LogEntry, NodeId, NodeState, Reply, RequestVote, Term};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::RuntimeError;
use crate::module::Event;
use crate::Command;

/// Point-in-time view of a node, published after every handled event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub id: NodeId,
    pub state: NodeState,
    pub term: Term,
    pub voted_for: Option<NodeId>,
    pub leader_id: Option<NodeId>,
    pub last_log_index: u64,
    pub commit_index: u64,
}

pub struct RaftHandle<C> {
    id: NodeId,
    events: mpsc::Sender<Event<C>>,
    status: watch::Receiver<NodeStatus>,
}

impl<C> Clone for RaftHandle<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            events: self.events.clone(),
            status: self.status.clone(),
        }
    }
}

impl<C: Command> RaftHandle<C> {
    pub(crate) fn new(
        id: NodeId,
        events: mpsc::Sender<Event<C>>,
        status: watch::Receiver<NodeStatus>,
    ) -> Self {
        Self { id, events, status }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Inbound RequestVote from a peer
    pub async fn request_vote(&self, request: RequestVote) -> Result<Reply, RuntimeError> {
        let event = |respond| Event::RequestVote { request, respond };
        self.call(event).await
    }

    /// Inbound AppendEntries from a peer
    pub async fn append_entries(&self, request: AppendEntries<C>) -> Result<Reply, RuntimeError> {
        let event = |respond| Event::AppendEntries { request, respond };
        self.call(event).await
    }

    /// Submit a client command. Only a leader accepts; the result is the log index.
    pub async fn submit(&self, command: C) -> Result<u64, RuntimeError> {
        let event = |respond| Event::Submit { command, respond };
        self.call(event).await?
    }

    /// Read the entry at a 1-based log index
    pub async fn get(&self, index: u64) -> Result<LogEntry<C>, RuntimeError> {
        self.call(|respond| Event::Get { index, respond }).await?
    }

    /// Behave as if the election timer had just expired
    pub async fn trigger_election(&self) -> Result<(), RuntimeError> {
        self.send(Event::TriggerElection).await
    }

    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.send(Event::Shutdown).await
    }

    pub fn status(&self) -> NodeStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<NodeStatus> {
        self.status.clone()
    }

    /// Wait until the published status satisfies `predicate`
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&NodeStatus) -> bool,
    ) -> Result<NodeStatus, RuntimeError> {
        let mut status = self.status.clone();
        let found = status
            .wait_for(|s| predicate(s))
            .await
            .map_err(|_| RuntimeError::Stopped)?;
        Ok(found.clone())
    }

    async fn send(&self, event: Event<C>) -> Result<(), RuntimeError> {
        self.events
            .send(event)
            .await
            .map_err(|_| RuntimeError::Stopped)
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Event<C>,
    ) -> Result<T, RuntimeError> {
        let (respond, answer) = oneshot::channel();
        self.send(make(respond)).await?;
        answer.await.map_err(|_| RuntimeError::Stopped)
    }
}
