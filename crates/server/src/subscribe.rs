//! Subscription sessions: replay-then-tail over one mission or the
//! global stream.
//!
//! The store cursor is taken before the bus receiver yields anything, so
//! the handoff is atomic: replay covers everything up to the cursor, the
//! live tail resumes at exactly `cursor + 1`, and anything seen twice
//! during the window is dropped by the cursor check. Bus lag re-invokes
//! the catch-up transparently; quiet periods produce keepalives.

use std::collections::HashMap;
use std::time::Duration;

use mc_domain::error::Result;
use mc_domain::event::StoredEvent;
use mc_domain::stream::BoxStream;

use crate::state::AppState;

/// What a subscription session is watching.
#[derive(Debug, Clone)]
pub enum SubscriptionFilter {
    Mission(String),
    All,
}

/// Items delivered to one subscriber.
#[derive(Debug, Clone)]
pub enum SubscriptionItem {
    Event(StoredEvent),
    /// Emitted after `keepalive_seconds` of silence.
    Keepalive,
}

/// Open a subscription. Validates the filter target, then returns the
/// session stream; the subscription is freed when the stream is dropped.
pub fn open(
    state: &AppState,
    filter: SubscriptionFilter,
    since_sequence: Option<i64>,
) -> Result<BoxStream<'static, SubscriptionItem>> {
    match filter {
        SubscriptionFilter::Mission(mission_id) => {
            mc_domain::ident::validate_id("mission", &mission_id)?;
            state.registry.get(&mission_id)?;
            Ok(mission_stream(state.clone(), mission_id, since_sequence))
        }
        SubscriptionFilter::All => Ok(all_stream(state.clone(), since_sequence)),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Single-mission session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn mission_stream(
    state: AppState,
    mission_id: String,
    since_sequence: Option<i64>,
) -> BoxStream<'static, SubscriptionItem> {
    Box::pin(async_stream::stream! {
        let page_limit = state.config.runtime.effective_page_limit();
        let keepalive = Duration::from_secs(state.config.runtime.keepalive_seconds.max(1));

        // Cursor before subscribing: the replay below covers the window
        // between this read and the first live delivery.
        let mut cursor = match since_sequence {
            Some(s) => s,
            None => state.events.last_sequence(&mission_id).unwrap_or(0),
        };
        let mut rx = state.bus.subscribe_mission(&mission_id);

        // Catch up from the store, in pages.
        loop {
            let page = match state.events.read_after(&mission_id, cursor, page_limit) {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(mission_id = %mission_id, error = %e, "replay failed");
                    return;
                }
            };
            if page.is_empty() {
                break;
            }
            for event in page {
                cursor = event.sequence;
                yield SubscriptionItem::Event(event);
            }
        }

        // Tail live.
        loop {
            match tokio::time::timeout(keepalive, rx.recv()).await {
                Err(_) => yield SubscriptionItem::Keepalive,
                Ok(Ok(event)) => {
                    if event.sequence <= cursor {
                        // Seen during the replay/live handoff window.
                        continue;
                    }
                    if event.sequence > cursor + 1 {
                        // A hole means deliveries were dropped; heal from
                        // the store (the held event is in there too).
                        match replay_pages(&state, &mission_id, &mut cursor, page_limit).await {
                            Ok(events) => {
                                for event in events {
                                    yield SubscriptionItem::Event(event);
                                }
                            }
                            Err(()) => return,
                        }
                        continue;
                    }
                    cursor = event.sequence;
                    yield SubscriptionItem::Event(event);
                }
                Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(missed))) => {
                    tracing::debug!(
                        mission_id = %mission_id,
                        missed,
                        "subscription lagged, replaying from store"
                    );
                    match replay_pages(&state, &mission_id, &mut cursor, page_limit).await {
                        Ok(events) => {
                            for event in events {
                                yield SubscriptionItem::Event(event);
                            }
                        }
                        Err(()) => return,
                    }
                }
                Ok(Err(tokio::sync::broadcast::error::RecvError::Closed)) => return,
            }
        }
    })
}

/// Drain everything past the cursor from the store. `Err` means a
/// storage failure already logged; the session should end.
async fn replay_pages(
    state: &AppState,
    mission_id: &str,
    cursor: &mut i64,
    page_limit: usize,
) -> std::result::Result<Vec<StoredEvent>, ()> {
    let mut collected = Vec::new();
    loop {
        let page = match state.events.read_after(mission_id, *cursor, page_limit) {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(mission_id = %mission_id, error = %e, "lag replay failed");
                return Err(());
            }
        };
        if page.is_empty() {
            return Ok(collected);
        }
        for event in page {
            *cursor = event.sequence;
            collected.push(event);
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Global session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The "all" filter keeps one cursor per mission. With `since_sequence`
/// set, every registered mission replays from it; missions first seen
/// during a lag window replay from their beginning.
fn all_stream(
    state: AppState,
    since_sequence: Option<i64>,
) -> BoxStream<'static, SubscriptionItem> {
    Box::pin(async_stream::stream! {
        let page_limit = state.config.runtime.effective_page_limit();
        let keepalive = Duration::from_secs(state.config.runtime.keepalive_seconds.max(1));

        let mut cursors: HashMap<String, i64> = HashMap::new();
        for id in state.registry.ids() {
            let cursor = match since_sequence {
                Some(s) => s,
                None => state.events.last_sequence(&id).unwrap_or(0),
            };
            cursors.insert(id, cursor);
        }
        let mut rx = state.bus.subscribe_all();

        if since_sequence.is_some() {
            let ids: Vec<String> = cursors.keys().cloned().collect();
            for id in ids {
                let mut cursor = cursors.get(&id).copied().unwrap_or(0);
                match replay_pages(&state, &id, &mut cursor, page_limit).await {
                    Ok(events) => {
                        for event in events {
                            yield SubscriptionItem::Event(event);
                        }
                    }
                    Err(()) => return,
                }
                cursors.insert(id, cursor);
            }
        }

        loop {
            match tokio::time::timeout(keepalive, rx.recv()).await {
                Err(_) => yield SubscriptionItem::Keepalive,
                Ok(Ok(event)) => {
                    let cursor = cursors.entry(event.mission_id.clone()).or_insert(0);
                    if event.sequence <= *cursor {
                        continue;
                    }
                    if event.sequence > *cursor + 1 {
                        match replay_pages(&state, &event.mission_id, cursor, page_limit).await {
                            Ok(events) => {
                                for event in events {
                                    yield SubscriptionItem::Event(event);
                                }
                            }
                            Err(()) => return,
                        }
                        continue;
                    }
                    *cursor = event.sequence;
                    yield SubscriptionItem::Event(event);
                }
                Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(missed))) => {
                    tracing::debug!(missed, "global subscription lagged, replaying");
                    // Catch up every mission, including ones first seen
                    // during the lag window.
                    for id in state.registry.ids() {
                        let cursor = cursors.entry(id.clone()).or_insert(0);
                        match replay_pages(&state, &id, cursor, page_limit).await {
                            Ok(events) => {
                                for event in events {
                                    yield SubscriptionItem::Event(event);
                                }
                            }
                            Err(()) => return,
                        }
                    }
                }
                Ok(Err(tokio::sync::broadcast::error::RecvError::Closed)) => return,
            }
        }
    })
}
