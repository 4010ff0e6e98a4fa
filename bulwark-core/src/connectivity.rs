//! Connectivity signal source
//!
//! The recovery engine only needs two things from the outside world: a
//! synchronous "is currently online" query and a stream of edge events.
//! [`ConnectivityMonitor`] is the in-process implementation; hosts feed it from
//! whatever platform signal they have.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// An online/offline transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

impl ConnectivityEvent {
    fn from_online(online: bool) -> Self {
        if online {
            ConnectivityEvent::Online
        } else {
            ConnectivityEvent::Offline
        }
    }
}

/// Source of connectivity state
pub trait ConnectivitySource: Send + Sync + fmt::Debug {
    /// Current state, without waiting
    fn is_online(&self) -> bool;

    /// Receiver that observes every state change
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// In-process connectivity state, cheap to clone
#[derive(Clone)]
pub struct ConnectivityMonitor {
    state: Arc<watch::Sender<bool>>,
}

impl fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("online", &self.is_online())
            .finish()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self {
            state: Arc::new(state),
        }
    }

    /// Record the current state. Returns the edge when the state changed.
    pub fn set_online(&self, online: bool) -> Option<ConnectivityEvent> {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            let event = ConnectivityEvent::from_online(online);
            info!(?event, "Connectivity changed");
            Some(event)
        } else {
            None
        }
    }
}

impl ConnectivitySource for ConnectivityMonitor {
    fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

/// Wait for the next edge on `receiver`. Returns `None` once the source is gone.
///
/// Changes made between two waits are coalesced into the latest state, so
/// the returned event reflects where the source ended up, not every edge.
pub async fn next_edge(receiver: &mut watch::Receiver<bool>) -> Option<ConnectivityEvent> {
    receiver.changed().await.ok()?;
    let online = *receiver.borrow_and_update();
    Some(ConnectivityEvent::from_online(online))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_online_reports_edges_only() {
        let monitor = ConnectivityMonitor::new(true);
        assert!(monitor.is_online());

        assert_eq!(monitor.set_online(true), None);
        assert_eq!(monitor.set_online(false), Some(ConnectivityEvent::Offline));
        assert!(!monitor.is_online());
        assert_eq!(monitor.set_online(false), None);
        assert_eq!(monitor.set_online(true), Some(ConnectivityEvent::Online));
    }

    #[tokio::test]
    async fn test_subscribers_observe_edges() {
        let monitor = ConnectivityMonitor::new(false);
        let mut receiver = monitor.subscribe();

        monitor.set_online(true);
        assert_eq!(next_edge(&mut receiver).await, Some(ConnectivityEvent::Online));

        monitor.set_online(false);
        assert_eq!(next_edge(&mut receiver).await, Some(ConnectivityEvent::Offline));
    }
}
