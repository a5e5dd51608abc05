//! Observable network reachability state.
//!
//! The host (or its `Connection`) updates the state; the client only
//! exposes it. Subscribers hold a `watch::Receiver` and unsubscribe by
//! dropping it.

use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReachabilityState {
    #[default]
    Unknown,
    NotReachable,
    ReachableViaWifi,
    ReachableViaWwan,
}

impl ReachabilityState {
    pub fn is_reachable(&self) -> bool {
        matches!(
            self,
            ReachabilityState::ReachableViaWifi | ReachabilityState::ReachableViaWwan
        )
    }
}

#[derive(Debug)]
pub struct Reachability {
    state: watch::Sender<ReachabilityState>,
}

impl Default for Reachability {
    fn default() -> Self {
        Self::new()
    }
}

impl Reachability {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ReachabilityState::Unknown);
        Self { state }
    }

    pub fn state(&self) -> ReachabilityState {
        *self.state.borrow()
    }

    pub fn is_reachable(&self) -> bool {
        self.state().is_reachable()
    }

    /// Publish a new state. Subscribers are only woken on an actual change.
    pub fn set_state(&self, new_state: ReachabilityState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == new_state {
                return false;
            }
            *current = new_state;
            true
        });
        if changed {
            debug!(state = ?new_state, "reachability changed");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ReachabilityState> {
        self.state.subscribe()
    }
}
