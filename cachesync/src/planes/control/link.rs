use crate::events::SyncPayload;
use crate::planes::control::coordinator::Coordinator;
use crate::ports::CoordinatorLink;
use shared::{Result, WindowId};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError};

/// Window-side mailbox of payloads relayed by the coordinator
#[derive(Debug)]
pub struct Inbox {
    window_id: WindowId,
    rx: mpsc::UnboundedReceiver<SyncPayload>,
}

impl Inbox {
    pub fn new(window_id: WindowId, rx: mpsc::UnboundedReceiver<SyncPayload>) -> Self {
        Self { window_id, rx }
    }

    pub fn window_id(&self) -> WindowId {
        self.window_id
    }

    /// Next queued payload, without waiting
    pub fn try_recv(&mut self) -> Option<SyncPayload> {
        match self.rx.try_recv() {
            Ok(payload) => Some(payload),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Wait for the next payload; `None` once the coordinator side is gone
    pub async fn recv(&mut self) -> Option<SyncPayload> {
        self.rx.recv().await
    }
}

/// In-process link to a [`Coordinator`] living in the same address space
#[derive(Debug)]
pub struct LocalLink {
    window_id: WindowId,
    coordinator: Arc<Coordinator>,
}

impl LocalLink {
    pub(crate) fn new(window_id: WindowId, coordinator: Arc<Coordinator>) -> Self {
        Self {
            window_id,
            coordinator,
        }
    }
}

impl CoordinatorLink for LocalLink {
    fn window_id(&self) -> WindowId {
        self.window_id
    }

    fn send_to_coordinator(&self, payload: SyncPayload) -> Result<()> {
        self.coordinator.broadcast_except(self.window_id, &payload);
        Ok(())
    }
}

impl Drop for LocalLink {
    fn drop(&mut self) {
        self.coordinator.disconnect(self.window_id);
    }
}
