//! Per-mission FIFO of pending user messages.
//!
//! Backed by `queue.json` so queued messages survive a restart (a resumed
//! mission picks up where it left off). `take_next` is the single-consumer
//! dequeue used by the mission's worker at turn start; workers block on
//! [`MessageQueue::wait_nonempty`] between turns.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use uuid::Uuid;

use mc_domain::error::{Error, Result};
use mc_domain::queue::QueuedMessage;

/// Pending message queue backed by a JSON file.
pub struct MessageQueue {
    path: PathBuf,
    queues: RwLock<HashMap<String, VecDeque<QueuedMessage>>>,
    notifiers: Mutex<HashMap<String, Arc<Notify>>>,
    /// Per-mission cap; 0 = unbounded.
    cap: usize,
}

impl MessageQueue {
    /// Load or create the queue at `state_path/queue.json`.
    pub fn new(state_path: &Path, cap: usize) -> Result<Self> {
        std::fs::create_dir_all(state_path)?;
        let path = state_path.join("queue.json");
        let queues: HashMap<String, VecDeque<QueuedMessage>> = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        let pending: usize = queues.values().map(|q| q.len()).sum();
        if pending > 0 {
            tracing::info!(pending, "message queue loaded with pending messages");
        }

        Ok(Self {
            path,
            queues: RwLock::new(queues),
            notifiers: Mutex::new(HashMap::new()),
            cap,
        })
    }

    fn notifier(&self, mission_id: &str) -> Arc<Notify> {
        self.notifiers
            .lock()
            .entry(mission_id.to_owned())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Append a message to a mission's queue.
    pub fn enqueue(
        &self,
        mission_id: &str,
        content: impl Into<String>,
        agent: Option<String>,
    ) -> Result<QueuedMessage> {
        let message = QueuedMessage::new(mission_id, content, agent);
        {
            let mut queues = self.queues.write();
            let queue = queues.entry(mission_id.to_owned()).or_default();
            if self.cap > 0 && queue.len() >= self.cap {
                return Err(Error::QueueBusy {
                    mission_id: mission_id.to_owned(),
                    cap: self.cap,
                });
            }
            queue.push_back(message.clone());
        }
        self.flush()?;
        self.notifier(mission_id).notify_waiters();
        Ok(message)
    }

    /// Consume and remove the next message in one step. Single consumer:
    /// only the mission's worker calls this.
    pub fn take_next(&self, mission_id: &str) -> Result<Option<QueuedMessage>> {
        let taken = {
            let mut queues = self.queues.write();
            queues.get_mut(mission_id).and_then(|q| q.pop_front())
        };
        if taken.is_some() {
            self.flush()?;
        }
        Ok(taken)
    }

    /// Remove a specific message if it has not been dequeued yet.
    pub fn remove(&self, message_id: &Uuid) -> Result<QueuedMessage> {
        let removed = {
            let mut queues = self.queues.write();
            let mut found = None;
            for queue in queues.values_mut() {
                if let Some(pos) = queue.iter().position(|m| m.id == *message_id) {
                    found = queue.remove(pos);
                    break;
                }
            }
            found
        };
        match removed {
            Some(message) => {
                self.flush()?;
                Ok(message)
            }
            None => Err(Error::NotFound(format!("queued message {message_id}"))),
        }
    }

    /// Drop all pending messages for a mission. Returns the count cleared.
    pub fn clear(&self, mission_id: &str) -> Result<usize> {
        let cleared = {
            let mut queues = self.queues.write();
            queues.remove(mission_id).map(|q| q.len()).unwrap_or(0)
        };
        if cleared > 0 {
            self.flush()?;
        }
        Ok(cleared)
    }

    pub fn list(&self, mission_id: &str) -> Vec<QueuedMessage> {
        self.queues
            .read()
            .get(mission_id)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// All pending messages across missions, oldest first.
    pub fn list_all(&self) -> Vec<QueuedMessage> {
        let mut all: Vec<QueuedMessage> = self
            .queues
            .read()
            .values()
            .flat_map(|q| q.iter().cloned())
            .collect();
        all.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at));
        all
    }

    pub fn len(&self, mission_id: &str) -> usize {
        self.queues.read().get(mission_id).map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, mission_id: &str) -> bool {
        self.len(mission_id) == 0
    }

    /// Wait until the mission's queue has at least one message.
    ///
    /// The notified future is created before the emptiness check so an
    /// enqueue racing with the check cannot be missed.
    pub async fn wait_nonempty(&self, mission_id: &str) {
        loop {
            let notify = self.notifier(mission_id);
            let notified = notify.notified();
            if !self.is_empty(mission_id) {
                return;
            }
            notified.await;
        }
    }

    fn flush(&self) -> Result<()> {
        let queues = self.queues.read();
        let json = serde_json::to_string_pretty(&*queues)
            .map_err(|e| Error::Storage(format!("serializing queue: {e}")))?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
