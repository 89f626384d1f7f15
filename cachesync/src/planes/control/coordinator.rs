use crate::clock::SystemClock;
use crate::events::SyncPayload;
use crate::planes::control::link::{Inbox, LocalLink};
use crate::planes::data::memory::MemoryCacheStore;
use crate::ports::Clock;
use crate::subscription::SubscriptionRegistry;
use dashmap::DashMap;
use shared::WindowId;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Outcome of one fan-out
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub gaps: Vec<WindowId>,
}

/// Relay process core: tracks connected windows and fans messages out
///
/// Each window owns a FIFO mailbox. A payload from one window is queued for
/// every other window, never for its origin.
pub struct Coordinator {
    peers: DashMap<WindowId, mpsc::UnboundedSender<SyncPayload>>,
    next_window: AtomicU64,
    // the coordinator's own cache, never relayed
    cache: MemoryCacheStore,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            peers: DashMap::new(),
            next_window: AtomicU64::new(1),
            cache: MemoryCacheStore::new("coordinator", SubscriptionRegistry::new(), clock),
        }
    }

    /// Register a new window and hand back its identity and mailbox
    pub fn connect(&self) -> (WindowId, Inbox) {
        let window_id = WindowId(self.next_window.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.insert(window_id, tx);
        info!("{} connected ({} window(s))", window_id, self.peers.len());
        (window_id, Inbox::new(window_id, rx))
    }

    /// Connect an in-process window
    pub fn attach(self: &Arc<Self>) -> (LocalLink, Inbox) {
        let (window_id, inbox) = self.connect();
        (LocalLink::new(window_id, Arc::clone(self)), inbox)
    }

    pub fn disconnect(&self, window_id: WindowId) -> bool {
        let removed = self.peers.remove(&window_id).is_some();
        if removed {
            info!("{} disconnected ({} window(s))", window_id, self.peers.len());
        }
        removed
    }

    pub fn window_count(&self) -> usize {
        self.peers.len()
    }

    pub fn windows(&self) -> Vec<WindowId> {
        let mut windows: Vec<WindowId> = self.peers.iter().map(|peer| *peer.key()).collect();
        windows.sort();
        windows
    }

    /// Queue `payload` for every connected window except `origin`.
    ///
    /// The peer set is snapshotted first, so windows joining or leaving during
    /// the fan-out only affect their own delivery.
    pub fn broadcast_except(&self, origin: WindowId, payload: &SyncPayload) -> BroadcastReport {
        let targets: Vec<(WindowId, mpsc::UnboundedSender<SyncPayload>)> = self
            .peers
            .iter()
            .filter(|peer| *peer.key() != origin)
            .map(|peer| (*peer.key(), peer.value().clone()))
            .collect();

        let mut report = BroadcastReport::default();
        for (window_id, tx) in targets {
            if tx.send(payload.clone()).is_err() {
                debug!("Delivery gap: {} is unreachable, dropping it", window_id);
                self.peers.remove(&window_id);
                report.gaps.push(window_id);
            } else {
                report.delivered += 1;
            }
        }

        debug!(
            "Broadcasted cache sync {}:{:?} from {} to {} window(s)",
            payload.scope().as_str(),
            payload.keys(),
            origin,
            report.delivered
        );
        report
    }

    pub fn local_cache(&self) -> &MemoryCacheStore {
        &self.cache
    }

    /// Drop every mailbox and the local cache
    pub fn shutdown(&self) {
        self.peers.clear();
        self.cache.clear();
        debug!("Coordinator cleanup completed");
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("windows", &self.peers.len())
            .finish()
    }
}
