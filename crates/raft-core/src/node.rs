//! # node
//!
//! why: define the raft node state machine and state transitions
//! relations: uses message.rs for rpc types, log.rs for entry management
//! what: NodeState enum, RaftNode struct, vote/append handlers, outbound builders
//!
//! Every method here is synchronous and side-effect free beyond `self`. The
//! caller owns the clock and the network: it decides when a timeout fired and
//! where messages go, then feeds the results back in.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::RaftConfig;
use crate::error::{RaftError, Result};
use crate::log::{LogEntry, RaftLog};
use crate::message::{AppendEntries, Reply, RequestVote};
use crate::{NodeId, Term};

/// The three possible states a Raft node can be in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    /// Passive state - listens for heartbeats, votes when asked
    #[default]
    Follower,
    /// Transitional state - requesting votes to become leader
    Candidate,
    /// Active state - manages log replication, sends heartbeats
    Leader,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Follower => write!(f, "Follower"),
            NodeState::Candidate => write!(f, "Candidate"),
            NodeState::Leader => write!(f, "Leader"),
        }
    }
}

/// A single Raft node in the cluster
#[derive(Debug)]
pub struct RaftNode<C = Vec<u8>> {
    /// Unique identifier for this node
    pub id: NodeId,
    /// Every voting member, this node included
    pub cluster_nodes: Vec<NodeId>,
    pub config: RaftConfig,
    /// Current state (Follower, Candidate, or Leader)
    pub state: NodeState,
    /// Current term number
    pub current_term: Term,
    /// Node ID that received our vote in current term (if any)
    pub voted_for: Option<NodeId>,
    pub log: RaftLog<C>,
    pub commit_index: u64,
    pub last_applied: u64,
    /// Highest index the driver has confirmed is on stable storage
    pub stored_index: u64,
    /// Last node known to lead `current_term`
    pub leader_id: Option<NodeId>,
    /// Granted votes in the current election, self included
    pub votes_received: Vec<NodeId>,
    // leader only, rebuilt on every election win
    pub next_index: HashMap<NodeId, u64>,
    pub match_index: HashMap<NodeId, u64>,
}

impl<C: Clone + fmt::Debug> RaftNode<C> {
    /// Create a new Raft node in Follower state
    pub fn new(id: NodeId, cluster_nodes: Vec<NodeId>) -> Self {
        Self::with_config(id, cluster_nodes, RaftConfig::default())
    }

    pub fn with_config(id: NodeId, cluster_nodes: Vec<NodeId>, config: RaftConfig) -> Self {
        Self::restore(id, cluster_nodes, config, 0, None, Vec::new())
    }

    /// Rebuild a node from durable state. Volatile state always starts fresh.
    pub fn restore(
        id: NodeId,
        mut cluster_nodes: Vec<NodeId>,
        config: RaftConfig,
        current_term: Term,
        voted_for: Option<NodeId>,
        log: Vec<LogEntry<C>>,
    ) -> Self {
        if !cluster_nodes.contains(&id) {
            cluster_nodes.push(id);
        }
        let mut seen = HashSet::new();
        cluster_nodes.retain(|n| seen.insert(*n));
        Self {
            id,
            cluster_nodes,
            config,
            state: NodeState::Follower,
            current_term,
            voted_for,
            stored_index: log.len() as u64,
            log: RaftLog::from_persisted(log),
            commit_index: 0,
            last_applied: 0,
            leader_id: None,
            votes_received: Vec::new(),
            next_index: HashMap::new(),
            match_index: HashMap::new(),
        }
    }

    // -- cluster helpers --

    pub fn peers(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.cluster_nodes
            .iter()
            .copied()
            .filter(move |&n| n != self.id)
    }

    /// strict majority of the voting members
    pub fn quorum_size(&self) -> usize {
        self.cluster_nodes.len() / 2 + 1
    }

    pub fn has_quorum(&self) -> bool {
        self.votes_received.len() >= self.quorum_size()
    }

    pub fn is_leader(&self) -> bool {
        self.state == NodeState::Leader
    }

    // -- log helpers --

    pub fn last_log_index(&self) -> u64 {
        self.log.last_index()
    }

    pub fn last_log_term(&self) -> Term {
        self.log.last_term()
    }

    pub fn get_term_at(&self, index: u64) -> Term {
        self.log.term_at(index)
    }

    /// Entry at a 1-based index; fails outside `1..=last_log_index()`
    pub fn get_entry(&self, index: u64) -> Result<&LogEntry<C>> {
        self.log.get(index)
    }

    /// Append entries to the tail of the log as one unit
    pub fn append_to_log(&mut self, entries: Vec<LogEntry<C>>) {
        self.log.append(entries);
    }

    /// (last_log_term, last_log_index) comparison from the election restriction
    pub fn is_log_up_to_date(&self, last_log_index: u64, last_log_term: Term) -> bool {
        (last_log_term, last_log_index) >= (self.last_log_term(), self.last_log_index())
    }

    // -- state transitions --

    /// Step down to follower, adopting `term` if it is newer.
    ///
    /// The vote is only cleared when the term actually advances.
    pub fn become_follower(&mut self, term: Term) {
        if term > self.current_term {
            self.current_term = term;
            self.voted_for = None;
            self.leader_id = None;
        }
        if self.state != NodeState::Follower {
            tracing::info!(
                node_id = self.id,
                term = self.current_term,
                from = %self.state,
                "stepping down to follower"
            );
        }
        self.state = NodeState::Follower;
        self.votes_received.clear();
        self.next_index.clear();
        self.match_index.clear();
    }

    /// Begin a new election: bump the term, vote for ourselves, ask everyone else
    pub fn start_election(&mut self) -> RequestVote {
        self.state = NodeState::Candidate;
        self.current_term += 1;
        self.voted_for = Some(self.id);
        self.votes_received = vec![self.id];
        self.leader_id = None;

        tracing::info!(
            node_id = self.id,
            term = self.current_term,
            "starting election"
        );

        let request = self.new_request_vote(false);
        if self.has_quorum() {
            self.become_leader();
        }
        request
    }

    /// Back out of an election whose term and vote never reached storage.
    ///
    /// Term and vote stay as they are, so no second vote can be cast in this term.
    pub fn abandon_election(&mut self) {
        tracing::warn!(
            node_id = self.id,
            term = self.current_term,
            "abandoning election"
        );
        self.state = NodeState::Follower;
        self.leader_id = None;
        self.votes_received.clear();
        self.next_index.clear();
        self.match_index.clear();
    }

    /// Timer expiry. Leaders never start elections; they heartbeat instead.
    pub fn handle_election_timeout(&mut self) -> Option<RequestVote> {
        match self.state {
            NodeState::Leader => None,
            NodeState::Follower | NodeState::Candidate => Some(self.start_election()),
        }
    }

    pub fn become_leader(&mut self) {
        self.state = NodeState::Leader;
        self.leader_id = Some(self.id);
        self.votes_received.clear();

        let next = self.last_log_index() + 1;
        let peers: Vec<NodeId> = self.peers().collect();
        self.next_index = peers.iter().map(|&p| (p, next)).collect();
        self.match_index = peers.iter().map(|&p| (p, 0)).collect();

        tracing::info!(node_id = self.id, term = self.current_term, "became leader");
    }

    // -- inbound rpc handlers --

    /// Handle a RequestVote. The bool tells the caller to re-arm its election timer.
    pub fn handle_vote_request(&mut self, request: &RequestVote) -> (Reply, bool) {
        if request.term < self.current_term {
            tracing::debug!(
                node_id = self.id,
                candidate = request.candidate_id,
                term = request.term,
                current_term = self.current_term,
                "rejecting stale vote request"
            );
            return (Reply::rejected(self.current_term), false);
        }
        if request.term > self.current_term {
            self.become_follower(request.term);
        }

        let free_to_vote = self
            .voted_for
            .map_or(true, |voted| voted == request.candidate_id);
        let granted = free_to_vote
            && self.is_log_up_to_date(request.last_log_index, request.last_log_term);

        tracing::debug!(
            node_id = self.id,
            candidate = request.candidate_id,
            term = self.current_term,
            granted,
            "vote request"
        );

        if granted {
            self.voted_for = Some(request.candidate_id);
            (Reply::granted(self.current_term), true)
        } else {
            (Reply::rejected(self.current_term), false)
        }
    }

    /// Handle an AppendEntries. The bool tells the caller to re-arm its election timer.
    pub fn handle_append_entries(&mut self, request: AppendEntries<C>) -> (Reply, bool) {
        if request.term < self.current_term {
            tracing::debug!(
                node_id = self.id,
                leader = request.leader_id,
                term = request.term,
                current_term = self.current_term,
                "rejecting stale append entries"
            );
            return (Reply::rejected(self.current_term), false);
        }

        // a valid leader exists for this term, whatever we were before
        self.become_follower(request.term);
        self.leader_id = Some(request.leader_id);

        let prev = request.prev_log_index;
        if prev > 0
            && (prev > self.last_log_index() || self.get_term_at(prev) != request.prev_log_term)
        {
            tracing::debug!(
                node_id = self.id,
                prev_log_index = prev,
                prev_log_term = request.prev_log_term,
                last_log_index = self.last_log_index(),
                "log consistency check failed"
            );
            return (Reply::rejected(self.current_term), true);
        }

        let received = request.entries.len() as u64;
        let mut appended = 0usize;
        for (offset, entry) in request.entries.into_iter().enumerate() {
            let index = prev + 1 + offset as u64;
            if index <= self.last_log_index() {
                if self.get_term_at(index) == entry.term {
                    continue;
                }
                self.discard_from(index);
            }
            self.log.append(std::iter::once(entry));
            appended += 1;
        }
        if appended > 0 {
            tracing::debug!(
                node_id = self.id,
                appended,
                last_log_index = self.last_log_index(),
                "appended entries"
            );
        }

        let last_new_index = prev + received;
        if request.leader_commit > self.commit_index {
            self.commit_index = request
                .leader_commit
                .min(last_new_index)
                .max(self.commit_index);
        }

        (Reply::granted(self.current_term), true)
    }

    // -- reply handlers --

    /// Count a vote reply. Returns true if this reply won the election.
    pub fn handle_vote_reply(&mut self, from: NodeId, reply: Reply) -> bool {
        if reply.term > self.current_term {
            self.become_follower(reply.term);
            return false;
        }
        if self.state != NodeState::Candidate || reply.term < self.current_term {
            return false;
        }
        if reply.vote_granted
            && self.cluster_nodes.contains(&from)
            && !self.votes_received.contains(&from)
        {
            self.votes_received.push(from);
            tracing::debug!(
                node_id = self.id,
                peer_id = from,
                votes = self.votes_received.len(),
                needed = self.quorum_size(),
                "received vote"
            );
        }
        if self.has_quorum() {
            self.become_leader();
            return true;
        }
        false
    }

    /// Process a follower's answer to an AppendEntries we sent it.
    ///
    /// `prev_log_index` and `sent` describe the request that produced `reply`.
    /// Returns true if the commit index advanced.
    pub fn handle_append_reply(
        &mut self,
        from: NodeId,
        prev_log_index: u64,
        sent: u64,
        reply: Reply,
    ) -> bool {
        if reply.term > self.current_term {
            self.become_follower(reply.term);
            return false;
        }
        if self.state != NodeState::Leader || reply.term < self.current_term {
            return false;
        }

        let fallback = self.last_log_index() + 1;
        if reply.success() {
            let matched = prev_log_index + sent;
            let match_index = self.match_index.entry(from).or_insert(0);
            *match_index = (*match_index).max(matched);
            let next_index = self.next_index.entry(from).or_insert(fallback);
            *next_index = (*next_index).max(matched + 1);
            self.advance_commit_index()
        } else {
            let next_index = self.next_index.entry(from).or_insert(fallback);
            *next_index = (*next_index).min(prev_log_index).max(1);
            tracing::debug!(
                node_id = self.id,
                peer_id = from,
                next_index = *next_index,
                "follower rejected, backing off"
            );
            false
        }
    }

    // -- outbound builders --

    /// Build a heartbeat.
    ///
    /// The first heartbeat after winning an election starts from the empty
    /// prefix (index 0, term 0), which every follower accepts; later ones
    /// point at the leader's own last entry.
    pub fn heartbeat(&self, is_first: bool) -> AppendEntries<C> {
        let (prev_log_index, prev_log_term) = if is_first {
            (0, 0)
        } else {
            (self.last_log_index(), self.last_log_term())
        };
        AppendEntries {
            term: self.current_term,
            leader_id: self.id,
            prev_log_index,
            prev_log_term,
            entries: Vec::new(),
            leader_commit: self.commit_index,
        }
    }

    /// Build a RequestVote; `is_first` advertises an empty log.
    pub fn new_request_vote(&self, is_first: bool) -> RequestVote {
        let (last_log_index, last_log_term) = if is_first {
            (0, 0)
        } else {
            (self.last_log_index(), self.last_log_term())
        };
        RequestVote {
            term: self.current_term,
            candidate_id: self.id,
            last_log_index,
            last_log_term,
        }
    }

    /// Build the replication message for one follower from its `next_index`.
    ///
    /// Entries are empty once the follower is caught up. None if not leader.
    pub fn append_entries_for(&self, peer: NodeId) -> Option<AppendEntries<C>> {
        if self.state != NodeState::Leader {
            return None;
        }
        let next = self
            .next_index
            .get(&peer)
            .copied()
            .unwrap_or(self.last_log_index() + 1)
            .max(1);
        let prev_log_index = next - 1;
        Some(AppendEntries {
            term: self.current_term,
            leader_id: self.id,
            prev_log_index,
            prev_log_term: self.get_term_at(prev_log_index),
            entries: self.log.entries_from(next),
            leader_commit: self.commit_index,
        })
    }

    // -- client commands --

    /// Append a client command as a new entry in the current term.
    ///
    /// Returns the new entry's index, or NotLeader with the last known leader.
    pub fn submit(&mut self, command: C) -> Result<u64> {
        if self.state != NodeState::Leader {
            return Err(RaftError::NotLeader {
                leader_id: self.leader_id,
            });
        }
        self.log.append(std::iter::once(LogEntry::new(self.current_term, command)));
        let index = self.last_log_index();
        tracing::debug!(
            node_id = self.id,
            index,
            term = self.current_term,
            "appended command to log"
        );
        Ok(index)
    }

    /// Record that the log up to `upto` is on stable storage.
    ///
    /// A leader only counts its own copy of an entry once it is stored, so
    /// this is where a single-node cluster commits. Returns true if the
    /// commit index advanced.
    pub fn mark_stored(&mut self, upto: u64) -> bool {
        self.stored_index = upto.min(self.last_log_index());
        self.is_leader() && self.advance_commit_index()
    }

    /// Drop every entry at `index` and beyond, e.g. one that failed to reach storage
    pub fn discard_from(&mut self, index: u64) {
        self.log.truncate_from(index);
        self.stored_index = self.stored_index.min(index.saturating_sub(1));
    }

    /// Committed entries not yet handed out, in log order. Each is returned once.
    pub fn take_committed(&mut self) -> Vec<LogEntry<C>> {
        let upto = self.commit_index.min(self.last_log_index());
        if upto <= self.last_applied {
            return Vec::new();
        }
        let entries = self.log.slice(self.last_applied + 1, upto);
        self.last_applied = upto;
        entries
    }

    fn advance_commit_index(&mut self) -> bool {
        let mut matched: Vec<u64> = self
            .peers()
            .map(|p| self.match_index.get(&p).copied().unwrap_or(0))
            .collect();
        matched.push(self.stored_index);
        matched.sort_unstable_by(|a, b| b.cmp(a));

        let candidate = matched[self.quorum_size() - 1];
        // only entries from our own term are committed by counting replicas
        if candidate > self.commit_index && self.get_term_at(candidate) == self.current_term {
            self.commit_index = candidate;
            tracing::debug!(
                node_id = self.id,
                commit_index = candidate,
                "advanced commit index"
            );
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_node_starts_as_follower() {
        let node: RaftNode = RaftNode::new(1, vec![1, 2, 3]);
        assert_eq!(node.state, NodeState::Follower);
        assert_eq!(node.current_term, 0);
        assert_eq!(node.voted_for, None);
    }

    #[test]
    fn node_adds_itself_to_cluster() {
        let node: RaftNode = RaftNode::new(4, vec![1, 2, 3]);
        assert_eq!(node.cluster_nodes, vec![1, 2, 3, 4]);
        assert_eq!(node.peers().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn state_names_display() {
        assert_eq!(NodeState::Candidate.to_string(), "Candidate");
    }
}
