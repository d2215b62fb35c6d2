//! Append-only JSONL event logs.
//!
//! Each mission gets a `<missionId>.jsonl` file under the events directory.
//! Every committed event is appended as a single JSON line. Sequences are
//! contiguous per mission starting at 1; a torn tail left by a crash
//! mid-append is detected on load and truncated so contiguity holds.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use mc_domain::error::{Error, Result};
use mc_domain::event::{EventDraft, EventType, StoredEvent};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-mission log
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Interior state for one mission's log: the on-disk path plus an
/// in-memory copy for range reads. Held behind a `Mutex` so appends are
/// linearizable within the mission while missions append independently.
struct MissionLog {
    path: PathBuf,
    events: Vec<StoredEvent>,
    last_sequence: i64,
}

impl MissionLog {
    fn empty(path: PathBuf) -> Self {
        Self {
            path,
            events: Vec::new(),
            last_sequence: 0,
        }
    }

    /// Load a log file, truncating any torn tail.
    ///
    /// Walks line by line; the first line that fails to parse, or whose
    /// sequence breaks contiguity, marks the torn tail. Everything from
    /// that byte offset on is discarded on disk and in memory.
    fn load(path: PathBuf) -> Result<Self> {
        let raw = match std::fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::empty(path));
            }
            Err(e) => return Err(e.into()),
        };

        let mut events: Vec<StoredEvent> = Vec::new();
        let mut offset = 0usize;
        let mut good_end = 0usize;
        let mut torn = false;

        for line in raw.split_inclusive('\n') {
            let line_start = offset;
            offset += line.len();
            let trimmed = line.trim_end_matches('\n');
            if trimmed.is_empty() {
                good_end = offset;
                continue;
            }
            // A line without its trailing newline is itself a torn append.
            let complete = line.ends_with('\n');
            match serde_json::from_str::<StoredEvent>(trimmed) {
                Ok(ev) if complete => {
                    let expected = events.last().map(|e: &StoredEvent| e.sequence + 1).unwrap_or(1);
                    if ev.sequence != expected {
                        tracing::warn!(
                            path = %path.display(),
                            sequence = ev.sequence,
                            expected,
                            "event log breaks contiguity, truncating tail"
                        );
                        torn = true;
                        good_end = line_start;
                        break;
                    }
                    events.push(ev);
                    good_end = offset;
                }
                _ => {
                    tracing::warn!(
                        path = %path.display(),
                        at_byte = line_start,
                        "torn tail in event log, truncating"
                    );
                    torn = true;
                    good_end = line_start;
                    break;
                }
            }
        }

        if torn {
            let file = std::fs::OpenOptions::new().write(true).open(&path)?;
            file.set_len(good_end as u64)?;
        }

        let last_sequence = events.last().map(|e| e.sequence).unwrap_or(0);
        Ok(Self {
            path,
            events,
            last_sequence,
        })
    }

    fn append(&mut self, event: StoredEvent) -> Result<()> {
        let json = serde_json::to_string(&event)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{json}")?;
        self.last_sequence = event.sequence;
        self.events.push(event);
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Durable, per-mission, sequence-numbered event log.
///
/// Missions must be registered (by the registry) before events can be
/// appended; appending to an unknown mission is a `MissionUnknown` error.
pub struct EventStore {
    base_dir: PathBuf,
    logs: RwLock<HashMap<String, Arc<Mutex<MissionLog>>>>,
    /// Globally monotonic event id, seeded past everything on disk.
    next_id: AtomicI64,
}

impl EventStore {
    /// Create the store under `state_path/events`.
    pub fn new(state_path: &Path) -> Result<Self> {
        let base_dir = state_path.join("events");
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            logs: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        })
    }

    fn log_path(&self, mission_id: &str) -> PathBuf {
        self.base_dir.join(format!("{mission_id}.jsonl"))
    }

    /// Register a mission, loading (and recovering) its log if one exists.
    /// Idempotent.
    pub fn register_mission(&self, mission_id: &str) -> Result<()> {
        {
            let logs = self.logs.read();
            if logs.contains_key(mission_id) {
                return Ok(());
            }
        }
        let log = MissionLog::load(self.log_path(mission_id))?;
        if let Some(max_id) = log.events.iter().map(|e| e.id).max() {
            self.next_id.fetch_max(max_id + 1, Ordering::SeqCst);
        }
        let mut logs = self.logs.write();
        logs.entry(mission_id.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(log)));
        Ok(())
    }

    fn log_for(&self, mission_id: &str) -> Result<Arc<Mutex<MissionLog>>> {
        self.logs
            .read()
            .get(mission_id)
            .cloned()
            .ok_or_else(|| Error::MissionUnknown(mission_id.to_owned()))
    }

    /// Append a draft: assigns `id`, `sequence = last + 1`, stamps the
    /// timestamp and a fresh `event_id`, persists, and returns the record.
    pub fn append(&self, mission_id: &str, draft: EventDraft) -> Result<StoredEvent> {
        let log = self.log_for(mission_id)?;
        let mut log = log.lock();

        let event = StoredEvent {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            mission_id: mission_id.to_owned(),
            sequence: log.last_sequence + 1,
            timestamp: Utc::now(),
            event_type: draft.event_type,
            event_id: Uuid::new_v4(),
            tool_call_id: draft.tool_call_id,
            tool_name: draft.tool_name,
            content: draft.content,
            metadata: draft.metadata,
        };
        log.append(event.clone())?;
        Ok(event)
    }

    /// Read events ordered by `(sequence asc, id asc)`, filtered by type,
    /// with `offset` applied to the filtered sequence.
    pub fn read_range(
        &self,
        mission_id: &str,
        types: Option<&[EventType]>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredEvent>> {
        let log = self.log_for(mission_id)?;
        let log = log.lock();
        Ok(log
            .events
            .iter()
            .filter(|e| types.map_or(true, |ts| ts.contains(&e.event_type)))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    /// Read events with `sequence > since`, up to `limit` (replay paging).
    pub fn read_after(
        &self,
        mission_id: &str,
        since_sequence: i64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>> {
        let log = self.log_for(mission_id)?;
        let log = log.lock();
        let start = log
            .events
            .partition_point(|e| e.sequence <= since_sequence);
        Ok(log.events[start..].iter().take(limit).cloned().collect())
    }

    pub fn last_sequence(&self, mission_id: &str) -> Result<i64> {
        let log = self.log_for(mission_id)?;
        let last = log.lock().last_sequence;
        Ok(last)
    }

    /// Timestamp of the most recent event, if any (stall detection input).
    pub fn last_event_time(&self, mission_id: &str) -> Option<chrono::DateTime<Utc>> {
        let log = self.logs.read().get(mission_id)?.clone();
        let last = log.lock().events.last().map(|e| e.timestamp);
        last
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
