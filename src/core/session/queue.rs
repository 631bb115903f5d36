use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

use crate::core::api::QueueSnapshot;

use super::{Coordinator, CoordinatorEvent};

impl Coordinator {
    /// Poll the backend queue while any job is tracked. Ends on shutdown.
    pub fn spawn_queue_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        let period = self.settings.poll_interval;
        tokio::spawn(async move {
            info!("Queue monitor started (every {:?})", period);
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => coordinator.poll_queue_once().await,
                }
            }
            info!("Queue monitor stopped");
        })
    }

    /// One poll. With nothing tracked the snapshot is cleared instead of
    /// fetched; failures keep the last snapshot.
    pub async fn poll_queue_once(&self) {
        if self.registry().is_empty() {
            self.set_queue(None);
            return;
        }
        match self.backend.queue_status().await {
            Ok(snapshot) => self.set_queue(Some(snapshot)),
            Err(e) => debug!("Queue status poll failed: {}", e),
        }
    }

    fn set_queue(&self, snapshot: Option<QueueSnapshot>) {
        let changed = self.queue_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot.clone();
                true
            }
        });
        if changed {
            self.emit(CoordinatorEvent::QueueChanged(snapshot));
        }
    }

    pub fn subscribe_queue(&self) -> tokio::sync::watch::Receiver<Option<QueueSnapshot>> {
        self.queue_tx.subscribe()
    }
}
