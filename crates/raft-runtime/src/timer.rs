//! # timer
//!
//! why: turn "no leader contact for a while" into an event on the module's queue
//! relations: owned by module.rs; durations come from raft_core::roll_timeout
//! what: ElectionTimer (arm/disarm), TimerExpired event with an epoch

use std::time::Duration;

use raft_core::{roll_timeout, NodeState, RaftConfig};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Posted when an armed countdown runs out.
///
/// `epoch` identifies which arm produced it; anything but the latest is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerExpired {
    pub epoch: u64,
}

/// A cancellable, re-armable countdown that posts into an event queue.
///
/// Every `arm` rolls a fresh duration for the given role and replaces any
/// pending countdown, so a queue never sees more than one live expiry.
pub struct ElectionTimer<E> {
    config: RaftConfig,
    events: mpsc::Sender<E>,
    pending: Option<JoinHandle<()>>,
    epoch: u64,
}

impl<E> ElectionTimer<E>
where
    E: From<TimerExpired> + Send + 'static,
{
    pub fn new(config: RaftConfig, events: mpsc::Sender<E>) -> Self {
        Self {
            config,
            events,
            pending: None,
            epoch: 0,
        }
    }

    /// Start or restart the countdown. Returns the duration that was rolled.
    pub fn arm(&mut self, state: NodeState) -> Duration {
        self.disarm();
        self.epoch += 1;

        let duration = roll_timeout(&self.config, state);
        let expired = TimerExpired { epoch: self.epoch };
        let events = self.events.clone();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            // receiver gone means the module shut down
            let _ = events.send(E::from(expired)).await;
        }));

        tracing::trace!(epoch = self.epoch, ?duration, %state, "timer armed");
        duration
    }

    /// Stop the countdown without firing
    pub fn disarm(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    /// True if `expired` came from the arm that is still in effect
    pub fn is_current(&self, expired: TimerExpired) -> bool {
        self.pending.is_some() && expired.epoch == self.epoch
    }
}

impl<E> Drop for ElectionTimer<E> {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer() -> (ElectionTimer<TimerExpired>, mpsc::Receiver<TimerExpired>) {
        let (tx, rx) = mpsc::channel(8);
        (ElectionTimer::new(RaftConfig::default(), tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn fires_exactly_once() {
        let (mut timer, mut rx) = timer();
        let duration = timer.arm(NodeState::Follower);
        let range = Duration::from_millis(250)..Duration::from_millis(450);
        assert!(range.contains(&duration));

        let expired = rx.recv().await.unwrap();
        assert!(timer.is_current(expired));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_replaces_pending_countdown() {
        let (mut timer, mut rx) = timer();
        timer.arm(NodeState::Follower);
        tokio::time::sleep(Duration::from_millis(200)).await;
        timer.arm(NodeState::Follower);

        let expired = rx.recv().await.unwrap();
        assert_eq!(expired.epoch, 2);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn disarm_prevents_firing() {
        let (mut timer, mut rx) = timer();
        timer.arm(NodeState::Candidate);
        timer.disarm();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
        assert!(!timer.is_armed());
        assert!(!timer.is_current(TimerExpired { epoch: 1 }));
    }

    #[tokio::test(start_paused = true)]
    async fn leader_rolls_short_interval() {
        let (mut timer, _rx) = timer();
        let range = Duration::from_millis(50)..Duration::from_millis(200);
        for _ in 0..1_000 {
            let d = timer.arm(NodeState::Leader);
            assert!(range.contains(&d));
        }
    }
}
