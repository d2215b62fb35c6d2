//! Tool-call coordination.
//!
//! When the agent loop emits a `tool_call` that expects a reply, it
//! registers a waiter and suspends on it. Posting a tool result resolves
//! the waiter through a `oneshot` channel. `resolve` and `cancel` are
//! mutually exclusive: whichever removes the pending entry first wins and
//! the other becomes a no-op.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio::sync::oneshot;

use mc_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a suspended tool call ended.
#[derive(Debug)]
pub enum ToolOutcome {
    /// A result was posted.
    Result {
        tool_name: Option<String>,
        content: String,
        metadata: Map<String, Value>,
    },
    /// The mission was cancelled or reached a terminal status first.
    Cancelled { reason: String },
}

/// A registered tool call awaiting its result.
struct PendingToolCall {
    mission_id: String,
    created_at: DateTime<Utc>,
    /// Registration order; timestamps alone can collide within a tick.
    seq: u64,
    respond: oneshot::Sender<ToolOutcome>,
}

/// The worker's side of the rendezvous.
pub struct Waiter {
    rx: oneshot::Receiver<ToolOutcome>,
}

impl Waiter {
    /// Suspend until the call is resolved or cancelled.
    ///
    /// A dropped sender (coordinator shutdown) reads as cancellation, so
    /// the worker never hangs on a vanished entry.
    pub async fn wait(self) -> ToolOutcome {
        self.rx.await.unwrap_or(ToolOutcome::Cancelled {
            reason: "coordinator dropped".into(),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Coordinator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Correlates outbound tool calls with inbound results by id.
///
/// The coordinator never times out; the stall detector flags stuck
/// waiters instead.
pub struct ToolCallCoordinator {
    pending: RwLock<HashMap<String, PendingToolCall>>,
    next_seq: std::sync::atomic::AtomicU64,
}

impl Default for ToolCallCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolCallCoordinator {
    pub fn new() -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
            next_seq: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Register a fresh tool call and return the waiter to suspend on.
    pub fn register(&self, tool_call_id: &str, mission_id: &str) -> Waiter {
        let (tx, rx) = oneshot::channel();
        self.pending.write().insert(
            tool_call_id.to_owned(),
            PendingToolCall {
                mission_id: mission_id.to_owned(),
                created_at: Utc::now(),
                seq: self
                    .next_seq
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed),
                respond: tx,
            },
        );
        Waiter { rx }
    }

    /// Resolve a pending call with a posted result.
    ///
    /// `NotFound` covers duplicate posts and results for calls that were
    /// already cancelled; no suspension is released in either case.
    pub fn resolve(
        &self,
        tool_call_id: &str,
        tool_name: Option<String>,
        content: String,
        metadata: Map<String, Value>,
    ) -> Result<()> {
        let pending = self
            .pending
            .write()
            .remove(tool_call_id)
            .ok_or_else(|| Error::NotFound(format!("no waiter for tool call {tool_call_id}")))?;
        let _ = pending.respond.send(ToolOutcome::Result {
            tool_name,
            content,
            metadata,
        });
        Ok(())
    }

    /// Cancel a single pending call. Returns true if one was pending.
    pub fn cancel(&self, tool_call_id: &str, reason: &str) -> bool {
        if let Some(pending) = self.pending.write().remove(tool_call_id) {
            let _ = pending.respond.send(ToolOutcome::Cancelled {
                reason: reason.to_owned(),
            });
            true
        } else {
            false
        }
    }

    /// Cancel every pending call of a mission. Returns the call ids, so
    /// the caller can emit a synthetic `tool_result` for each.
    pub fn cancel_all_for(&self, mission_id: &str, reason: &str) -> Vec<String> {
        let drained: Vec<(String, PendingToolCall)> = {
            let mut pending = self.pending.write();
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, p)| p.mission_id == mission_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|p| (id, p)))
                .collect()
        };

        drained
            .into_iter()
            .map(|(id, p)| {
                let _ = p.respond.send(ToolOutcome::Cancelled {
                    reason: reason.to_owned(),
                });
                id
            })
            .collect()
    }

    /// Pending call ids for a mission, oldest first (snapshot input).
    pub fn pending_for(&self, mission_id: &str) -> Vec<String> {
        let pending = self.pending.read();
        let mut calls: Vec<(&String, &PendingToolCall)> = pending
            .iter()
            .filter(|(_, p)| p.mission_id == mission_id)
            .collect();
        calls.sort_by_key(|(_, p)| p.seq);
        calls.into_iter().map(|(id, _)| id.clone()).collect()
    }

    /// Snapshot of every pending call (dashboard introspection).
    pub fn list_pending(&self) -> Vec<PendingInfo> {
        let pending = self.pending.read();
        let mut all: Vec<PendingInfo> = pending
            .iter()
            .map(|(id, p)| PendingInfo {
                tool_call_id: id.clone(),
                mission_id: p.mission_id.clone(),
                created_at: p.created_at,
                seq: p.seq,
            })
            .collect();
        all.sort_by_key(|p| p.seq);
        all
    }
}

/// Serializable view of a pending tool call.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PendingInfo {
    pub tool_call_id: String,
    pub mission_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub seq: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
