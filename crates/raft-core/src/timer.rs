//! # timer
//!
//! why: election timeouts must be randomized per arm so split votes resolve
//! relations: used by the runtime's ElectionTimer every time it (re)arms
//! what: role-dependent duration rolling

use std::time::Duration;

use rand::Rng;

use crate::config::RaftConfig;
use crate::node::NodeState;

/// Roll a fresh timeout for `state` using the thread-local rng
pub fn roll_timeout(config: &RaftConfig, state: NodeState) -> Duration {
    roll_timeout_with(&mut rand::thread_rng(), config, state)
}

/// Roll a fresh timeout for `state` from the given rng.
///
/// Leaders get the short heartbeat interval, everyone else the election timeout.
/// Each draw is independent of the previous one.
pub fn roll_timeout_with<R: Rng + ?Sized>(
    rng: &mut R,
    config: &RaftConfig,
    state: NodeState,
) -> Duration {
    let range = match state {
        NodeState::Leader => config.heartbeat_interval_range(),
        NodeState::Follower | NodeState::Candidate => config.election_timeout_range(),
    };
    Duration::from_millis(rng.gen_range(range))
}
