//! # module
//!
//! why: own a RaftNode and serialize everything that touches it through one queue
//! relations: driven by handle.rs (clients, transports), timer.rs and its own rpc tasks
//! what: Event enum, ConsensusModule actor (spawn, run loop, persistence, fan-out)
//!
//! Only the actor task mutates node state. Timer expiries, inbound rpcs, rpc
//! completions and client calls all arrive as events, so no handler ever
//! races another. Outbound rpcs run in their own tasks and report back as
//! events tagged with the term they were sent in.

use std::io;
use std::sync::Arc;

use raft_core::{
    AppendEntries, LogEntry, NodeId, NodeState, RaftConfig, RaftNode, Reply, RequestVote, Term,
};
use raft_storage::Storage;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;

use crate::contact::Contact;
use crate::error::{ContactError, RuntimeError};
use crate::handle::{NodeStatus, RaftHandle};
use crate::timer::{ElectionTimer, TimerExpired};
use crate::Command;

/// Committed entries in log order, one message per entry.
///
/// The channel is unbounded so that delivery never stalls the actor. A
/// receiver that is kept but never read holds every committed entry in
/// memory; drain it or drop it. Once dropped, entries are discarded.
pub type AppliedEntries<C> = mpsc::UnboundedReceiver<LogEntry<C>>;

const EVENT_QUEUE: usize = 256;

pub(crate) enum Event<C> {
    TimerFired(TimerExpired),
    RequestVote {
        request: RequestVote,
        respond: oneshot::Sender<Reply>,
    },
    AppendEntries {
        request: AppendEntries<C>,
        respond: oneshot::Sender<Reply>,
    },
    VoteReply {
        peer: NodeId,
        term: Term,
        reply: Reply,
    },
    AppendReply {
        peer: NodeId,
        term: Term,
        prev_log_index: u64,
        sent: u64,
        reply: Reply,
    },
    Submit {
        command: C,
        respond: oneshot::Sender<Result<u64, RuntimeError>>,
    },
    Get {
        index: u64,
        respond: oneshot::Sender<Result<LogEntry<C>, RuntimeError>>,
    },
    TriggerElection,
    Shutdown,
}

impl<C> From<TimerExpired> for Event<C> {
    fn from(expired: TimerExpired) -> Self {
        Event::TimerFired(expired)
    }
}

pub struct ConsensusModule<C: Command> {
    node: RaftNode<C>,
    contact: Arc<dyn Contact<C>>,
    storage: Box<dyn Storage<C> + Send>,
    timer: ElectionTimer<Event<C>>,
    events_tx: mpsc::Sender<Event<C>>,
    events: mpsc::Receiver<Event<C>>,
    status: watch::Sender<NodeStatus>,
    applied: mpsc::UnboundedSender<LogEntry<C>>,
    // what storage is known to hold
    durable_hard_state: (Term, Option<NodeId>),
    durable_log_from: Option<u64>,
}

impl<C: Command> ConsensusModule<C> {
    /// Load durable state, start the actor task and hand back its handle and apply stream.
    ///
    /// The node always starts as a follower. Must be called within a tokio runtime.
    pub fn spawn(
        id: NodeId,
        config: RaftConfig,
        contact: Arc<dyn Contact<C>>,
        storage: Box<dyn Storage<C> + Send>,
    ) -> Result<(RaftHandle<C>, AppliedEntries<C>), RuntimeError> {
        config.validate()?;

        let (term, voted_for) = storage.load_term_and_vote()?;
        let log = storage.load_log()?;
        let mut cluster = contact.list_peers();
        cluster.push(id);
        let node = RaftNode::restore(id, cluster, config.clone(), term, voted_for, log);

        tracing::info!(
            node_id = id,
            term,
            ?voted_for,
            last_log_index = node.last_log_index(),
            cluster = ?node.cluster_nodes,
            "starting consensus module"
        );

        let (events_tx, events) = mpsc::channel(EVENT_QUEUE);
        let (status, status_rx) = watch::channel(snapshot(&node));
        let (applied, applied_rx) = mpsc::unbounded_channel();

        let module = Self {
            node,
            contact,
            storage,
            timer: ElectionTimer::new(config, events_tx.clone()),
            events_tx: events_tx.clone(),
            events,
            status,
            applied,
            durable_hard_state: (term, voted_for),
            durable_log_from: None,
        };
        tokio::spawn(module.run());

        Ok((RaftHandle::new(id, events_tx, status_rx), applied_rx))
    }

    async fn run(mut self) {
        self.timer.arm(self.node.state);

        while let Some(event) = self.events.recv().await {
            if matches!(event, Event::Shutdown) {
                break;
            }
            self.handle(event);
            self.publish_status();
        }

        self.timer.disarm();
        tracing::info!(
            node_id = self.node.id,
            term = self.node.current_term,
            "consensus module stopped"
        );
    }

    fn handle(&mut self, event: Event<C>) {
        match event {
            Event::TimerFired(expired) => {
                if self.timer.is_current(expired) {
                    self.on_timeout();
                }
            }
            Event::TriggerElection => self.on_timeout(),
            Event::RequestVote { request, respond } => {
                let reply = self.on_request_vote(request);
                let _ = respond.send(reply);
            }
            Event::AppendEntries { request, respond } => {
                let reply = self.on_append_entries(request);
                let _ = respond.send(reply);
            }
            Event::VoteReply { peer, term, reply } => self.on_vote_reply(peer, term, reply),
            Event::AppendReply {
                peer,
                term,
                prev_log_index,
                sent,
                reply,
            } => self.on_append_reply(peer, term, prev_log_index, sent, reply),
            Event::Submit { command, respond } => {
                let result = self.on_submit(command);
                let _ = respond.send(result);
            }
            Event::Get { index, respond } => {
                let result = self
                    .node
                    .get_entry(index)
                    .cloned()
                    .map_err(RuntimeError::from);
                let _ = respond.send(result);
            }
            // handled by the run loop
            Event::Shutdown => {}
        }
    }

    // -- timer --

    fn on_timeout(&mut self) {
        if self.node.is_leader() {
            self.broadcast_append();
            self.timer.arm(NodeState::Leader);
            return;
        }

        let Some(request) = self.node.handle_election_timeout() else {
            return;
        };
        if let Err(e) = self.persist() {
            // a vote we cannot remember is a vote we must not ask for
            tracing::error!(
                node_id = self.node.id,
                error = %e,
                "failed to persist election state"
            );
            self.node.abandon_election();
            self.timer.arm(self.node.state);
            return;
        }

        if self.node.is_leader() {
            self.on_became_leader();
        } else {
            for peer in self.node.peers().collect::<Vec<_>>() {
                self.send_request_vote(peer, request.clone());
            }
            self.timer.arm(self.node.state);
        }
    }

    // -- inbound rpcs --

    fn on_request_vote(&mut self, request: RequestVote) -> Reply {
        let before = self.node.state;
        let (reply, reset) = self.node.handle_vote_request(&request);
        let reply = self.persist_then(reply);
        self.rearm_if(reset, before);
        reply
    }

    fn on_append_entries(&mut self, request: AppendEntries<C>) -> Reply {
        let before = self.node.state;
        let (reply, reset) = self.node.handle_append_entries(request);
        let reply = self.persist_then(reply);
        self.rearm_if(reset, before);
        if reply.success() {
            self.deliver_committed();
        }
        reply
    }

    /// Persist, downgrading the reply to a rejection if that fails
    fn persist_then(&mut self, reply: Reply) -> Reply {
        match self.persist() {
            Ok(()) => reply,
            Err(e) => {
                tracing::error!(
                    node_id = self.node.id,
                    error = %e,
                    "failed to persist state, rejecting"
                );
                Reply::rejected(self.node.current_term)
            }
        }
    }

    fn rearm_if(&mut self, reset: bool, before: NodeState) {
        if reset || self.node.state != before {
            self.timer.arm(self.node.state);
        }
    }

    // -- rpc completions --

    fn is_stale(&self, sent_in: Term, reply: Reply) -> bool {
        sent_in != self.node.current_term && reply.term <= self.node.current_term
    }

    fn on_vote_reply(&mut self, peer: NodeId, term: Term, reply: Reply) {
        if self.is_stale(term, reply) {
            tracing::trace!(
                node_id = self.node.id,
                peer_id = peer,
                term,
                "dropping stale vote reply"
            );
            return;
        }
        let before = (self.node.state, self.node.current_term);
        let won = self.node.handle_vote_reply(peer, reply);
        if won {
            self.on_became_leader();
        } else if (self.node.state, self.node.current_term) != before {
            self.after_step_down();
        }
    }

    fn on_append_reply(
        &mut self,
        peer: NodeId,
        term: Term,
        prev_log_index: u64,
        sent: u64,
        reply: Reply,
    ) {
        if self.is_stale(term, reply) {
            tracing::trace!(
                node_id = self.node.id,
                peer_id = peer,
                term,
                "dropping stale append reply"
            );
            return;
        }
        let before = (self.node.state, self.node.current_term);
        let advanced = self
            .node
            .handle_append_reply(peer, prev_log_index, sent, reply);

        if (self.node.state, self.node.current_term) != before {
            self.after_step_down();
            return;
        }
        if !self.node.is_leader() {
            return;
        }
        if advanced {
            self.deliver_committed();
        }
        if !reply.success() {
            // next_index already backed off; retry right away
            if let Some(request) = self.node.append_entries_for(peer) {
                self.send_append_entries(peer, request);
            }
        }
    }

    fn after_step_down(&mut self) {
        if let Err(e) = self.persist() {
            tracing::error!(
                node_id = self.node.id,
                error = %e,
                "failed to persist term after stepping down"
            );
        }
        self.timer.arm(self.node.state);
    }

    fn on_became_leader(&mut self) {
        let heartbeat = self.node.heartbeat(true);
        for peer in self.node.peers().collect::<Vec<_>>() {
            self.send_append_entries(peer, heartbeat.clone());
        }
        self.timer.arm(NodeState::Leader);
    }

    // -- client calls --

    fn on_submit(&mut self, command: C) -> Result<u64, RuntimeError> {
        let index = self.node.submit(command)?;
        if let Err(e) = self.persist() {
            // an entry the leader could not store is never replicated or counted
            self.node.discard_from(index);
            tracing::error!(
                node_id = self.node.id,
                index,
                error = %e,
                "failed to persist command, discarding it"
            );
            return Err(e.into());
        }
        self.broadcast_append();
        self.deliver_committed();
        Ok(index)
    }

    fn deliver_committed(&mut self) {
        for entry in self.node.take_committed() {
            // nobody listening is fine
            let _ = self.applied.send(entry);
        }
    }

    // -- persistence --

    /// Write whatever changed since the last successful call.
    ///
    /// On success the node learns its whole log is stored, which is what lets
    /// a leader count its own copy toward a commit.
    fn persist(&mut self) -> io::Result<()> {
        let hard_state = (self.node.current_term, self.node.voted_for);
        if hard_state != self.durable_hard_state {
            self.storage.save_term_and_vote(hard_state.0, hard_state.1)?;
            self.durable_hard_state = hard_state;
        }

        if let Some(from) = self.node.log.take_unsynced() {
            self.durable_log_from = Some(self.durable_log_from.map_or(from, |f| f.min(from)));
        }
        if let Some(from) = self.durable_log_from {
            self.storage.truncate_log_from(from)?;
            let suffix = self.node.log.entries_from(from);
            if !suffix.is_empty() {
                self.storage.append_entries(&suffix)?;
            }
            self.durable_log_from = None;
        }
        self.node.mark_stored(self.node.last_log_index());
        Ok(())
    }

    // -- fan-out --

    fn broadcast_append(&mut self) {
        for peer in self.node.peers().collect::<Vec<_>>() {
            if let Some(request) = self.node.append_entries_for(peer) {
                self.send_append_entries(peer, request);
            }
        }
    }

    fn send_request_vote(&self, peer: NodeId, request: RequestVote) {
        let contact = Arc::clone(&self.contact);
        let events = self.events_tx.clone();
        let deadline = self.node.config.rpc_timeout();
        let term = request.term;
        let node_id = self.node.id;

        tokio::spawn(async move {
            let result = timeout(deadline, contact.send_request_vote(peer, request))
                .await
                .unwrap_or_else(|_| Err(ContactError::Timeout(peer)));
            match result {
                Ok(reply) => {
                    let _ = events.send(Event::VoteReply { peer, term, reply }).await;
                }
                Err(e) => {
                    tracing::warn!(
                        node_id,
                        peer_id = peer,
                        term,
                        error = %e,
                        "request vote failed"
                    )
                }
            }
        });
    }

    fn send_append_entries(&self, peer: NodeId, request: AppendEntries<C>) {
        let contact = Arc::clone(&self.contact);
        let events = self.events_tx.clone();
        let deadline = self.node.config.rpc_timeout();
        let term = request.term;
        let prev_log_index = request.prev_log_index;
        let sent = request.entries.len() as u64;
        let node_id = self.node.id;

        tokio::spawn(async move {
            let result = timeout(deadline, contact.send_append_entries(peer, request))
                .await
                .unwrap_or_else(|_| Err(ContactError::Timeout(peer)));
            match result {
                Ok(reply) => {
                    let event = Event::AppendReply {
                        peer,
                        term,
                        prev_log_index,
                        sent,
                        reply,
                    };
                    let _ = events.send(event).await;
                }
                // heartbeats to a dead peer are routine
                Err(e) => {
                    tracing::trace!(
                        node_id,
                        peer_id = peer,
                        term,
                        error = %e,
                        "append entries failed"
                    )
                }
            }
        });
    }

    // -- status --

    fn publish_status(&self) {
        let current = snapshot(&self.node);
        self.status.send_if_modified(|published| {
            if *published == current {
                return false;
            }
            *published = current;
            true
        });
    }
}

fn snapshot<C: Command>(node: &RaftNode<C>) -> NodeStatus {
    NodeStatus {
        id: node.id,
        state: node.state,
        term: node.current_term,
        voted_for: node.voted_for,
        leader_id: node.leader_id,
        last_log_index: node.last_log_index(),
        commit_index: node.commit_index,
    }
}
