//! # message
//!
//! why: define all raft rpc message types for node communication
//! relations: built and consumed by node.rs, carried by the runtime's peer contact
//! what: RequestVote, AppendEntries, Reply payloads and the RaftMessage wire envelope

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::log::LogEntry;
use crate::{NodeId, Term};

/// Sent by candidates to gather votes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestVote {
    pub term: Term,
    pub candidate_id: NodeId,
    pub last_log_index: u64,
    pub last_log_term: Term,
}

/// Replicate log entries (also serves as heartbeat when entries is empty)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntries<C = Vec<u8>> {
    pub term: Term,
    pub leader_id: NodeId,
    pub prev_log_index: u64,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry<C>>,
    /// leader's commit index; followers never commit past their own log
    pub leader_commit: u64,
}

impl<C> AppendEntries<C> {
    pub fn is_heartbeat(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Response to both RPC kinds.
///
/// For AppendEntries `vote_granted` means "success".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub term: Term,
    pub vote_granted: bool,
}

impl Reply {
    pub fn granted(term: Term) -> Self {
        Self {
            term,
            vote_granted: true,
        }
    }

    pub fn rejected(term: Term) -> Self {
        Self {
            term,
            vote_granted: false,
        }
    }

    pub fn success(&self) -> bool {
        self.vote_granted
    }
}

/// All possible Raft messages between nodes, as they travel on a wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RaftMessage<C = Vec<u8>> {
    RequestVote(RequestVote),
    AppendEntries(AppendEntries<C>),
    Reply(Reply),
}

impl<C: Serialize + DeserializeOwned> RaftMessage<C> {
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_is_tagged() {
        let msg: RaftMessage = RaftMessage::Reply(Reply::granted(3));
        let json = String::from_utf8(msg.encode().unwrap()).unwrap();
        assert!(json.contains("\"type\":\"reply\""));
    }

    #[test]
    fn heartbeat_carries_string_commands_through_the_wire() {
        let ae = AppendEntries {
            term: 2,
            leader_id: 1,
            prev_log_index: 1,
            prev_log_term: 1,
            entries: vec![LogEntry::new(2, "set x 1".to_string())],
            leader_commit: 1,
        };
        let bytes = RaftMessage::AppendEntries(ae.clone()).encode().unwrap();

        match RaftMessage::<String>::decode(&bytes).unwrap() {
            RaftMessage::AppendEntries(decoded) => {
                assert_eq!(decoded, ae);
                assert!(!decoded.is_heartbeat());
            }
            _ => panic!("expected AppendEntries"),
        }
    }

    #[test]
    fn garbage_does_not_decode() {
        assert!(RaftMessage::<Vec<u8>>::decode(b"{not json").is_err());
    }
}
