//! The agent loop: one worker task per active mission.
//!
//! A worker idles on the mission's queue, acquires a scheduler slot,
//! runs one turn (model stream, tool-call suspensions, assistant
//! message), then releases the slot and idles again. Cancellation and
//! shutdown interrupt any suspension point; the exit path resolves
//! stray waiters and quiesces the mission to `interrupted` unless the
//! controller that stopped it took over the transition.

use futures_util::StreamExt;
use serde_json::json;
use uuid::Uuid;

use mc_domain::error::{Error, Result};
use mc_domain::event::{CostSource, EventDraft, EventType};
use mc_domain::message::{Message, ToolCall};
use mc_domain::mission::MissionStatus;
use mc_domain::stream::{ModelEvent, Usage};
use mc_model::ChatRequest;

use crate::state::AppState;

use super::cancel::CancelToken;
use super::scheduler::WorkerPhase;
use super::waiters::ToolOutcome;
use super::{commit, end_mission, truncate_str};

/// How a turn ended, from the worker loop's point of view.
enum TurnEnd {
    /// Assistant message committed (or nothing to do); keep looping.
    Finished,
    /// Cancel or shutdown interrupted the turn; stop the worker.
    Cancelled,
    /// The turn transitioned the mission to a terminal status itself.
    MissionEnded,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn run_worker(state: AppState, mission_id: String) {
    let cancel = state.cancel_map.register(&mission_id);
    tracing::debug!(mission_id = %mission_id, "worker started");

    loop {
        // Idle: block on queue-non-empty, cancel, or shutdown.
        tokio::select! {
            _ = state.queue.wait_nonempty(&mission_id) => {}
            _ = cancel.cancelled() => break,
            _ = state.shutdown.cancelled() => break,
        }

        // Admission: FIFO slot under the parallel cap.
        let permit = tokio::select! {
            p = state.scheduler.acquire_slot(&mission_id) => match p {
                Ok(p) => p,
                Err(_) => break,
            },
            _ = cancel.cancelled() => break,
            _ = state.shutdown.cancelled() => break,
        };

        let end = run_turn(&state, &mission_id, &cancel).await;
        state.scheduler.set_phase(&mission_id, WorkerPhase::Idle);
        drop(permit);

        match end {
            Ok(TurnEnd::Finished) => continue,
            Ok(TurnEnd::Cancelled) | Ok(TurnEnd::MissionEnded) => break,
            Err(err) => {
                fail_mission(&state, &mission_id, &err);
                break;
            }
        }
    }

    finish_worker(&state, &mission_id, &cancel);
    tracing::debug!(mission_id = %mission_id, "worker stopped");
}

/// Storage or provider failure mid-turn is fatal for the mission.
fn fail_mission(state: &AppState, mission_id: &str, err: &Error) {
    tracing::error!(mission_id = %mission_id, error = %err, "turn failed");
    let reason = match err {
        Error::Model(_) => "model error",
        _ => "storage",
    };
    // Best-effort: the error event and status flip may themselves hit the
    // same storage fault.
    let _ = commit(
        state,
        mission_id,
        EventDraft::error(err.to_string(), true),
    );
    if let Err(e) = end_mission(state, mission_id, MissionStatus::Failed, Some(reason)) {
        tracing::warn!(mission_id = %mission_id, error = %e, "failed to record mission failure");
    }
}

/// Worker exit path: resolve stray waiters with synthetic cancelled
/// results, quiesce the mission, and drop the bookkeeping.
fn finish_worker(state: &AppState, mission_id: &str, cancel: &CancelToken) {
    for call_id in state.waiters.cancel_all_for(mission_id, "worker stopped") {
        let draft = EventDraft::tool_result(&call_id, None, "")
            .with_meta("status", json!("cancelled"));
        if let Err(e) = commit(state, mission_id, draft) {
            tracing::warn!(mission_id = %mission_id, error = %e, "failed to record cancelled tool call");
        }
    }

    let quiesce = !cancel.is_takeover()
        && matches!(
            state.registry.get(mission_id),
            Ok(m) if m.status == MissionStatus::Active
        );
    if quiesce {
        let reason = if state.shutdown.is_cancelled() {
            "server shutdown"
        } else {
            "cancelled"
        };
        if let Err(e) = end_mission(state, mission_id, MissionStatus::Interrupted, Some(reason)) {
            tracing::warn!(mission_id = %mission_id, error = %e, "failed to quiesce mission");
        }
    }

    state.cancel_map.remove(mission_id);
    state.scheduler.unregister_worker(mission_id);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// One turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_turn(state: &AppState, mission_id: &str, cancel: &CancelToken) -> Result<TurnEnd> {
    let Some(message) = state.queue.take_next(mission_id)? else {
        // Spurious wakeup (message removed before we got the slot).
        return Ok(TurnEnd::Finished);
    };

    if let Err(e) = state
        .registry
        .set_title_if_empty(mission_id, &truncate_str(&message.content, 80))
    {
        tracing::warn!(mission_id = %mission_id, error = %e, "failed to set mission title");
    }

    // The user message is on the log before anything this turn produces.
    let mut draft =
        EventDraft::user_message(&message.content).with_meta("queued_message_id", json!(message.id));
    if let Some(agent) = &message.agent {
        draft = draft.with_meta("agent", json!(agent));
    }
    commit(state, mission_id, draft)?;

    let mut messages = history_from_log(state, mission_id)?;
    let mission = state.registry.get(mission_id)?;
    let model_name = mission
        .model_override
        .clone()
        .unwrap_or_else(|| state.provider.model_name().to_string());

    let mut total_usage = Usage::default();
    let mut reported_cost_cents: i64 = 0;
    // Actual cost requires every invocation to have reported one.
    let mut cost_reports: usize = 0;
    let mut invocations: usize = 0;

    for iteration in 0..state.config.runtime.max_iterations {
        tracing::debug!(mission_id = %mission_id, iteration, "model invocation");
        invocations += 1;
        state
            .scheduler
            .set_activity(mission_id, Some("invoking model".into()));

        let req = ChatRequest {
            messages: messages.clone(),
            model: mission.model_override.clone(),
        };
        let mut stream = state
            .provider
            .chat_stream(req)
            .await
            .map_err(|e| Error::Model(e.to_string()))?;

        let mut text_buf = String::new();
        let mut thought: Option<String> = None;
        let mut pending_calls: Vec<ToolCall> = Vec::new();
        let mut was_cancelled = false;
        let mut fatal_error: Option<String> = None;
        let mut soft_error: Option<String> = None;

        loop {
            let event = tokio::select! {
                ev = stream.next() => match ev {
                    Some(ev) => ev,
                    None => break,
                },
                _ = cancel.cancelled() => {
                    was_cancelled = true;
                    break;
                }
                _ = state.shutdown.cancelled() => {
                    was_cancelled = true;
                    break;
                }
            };
            state.scheduler.heartbeat(mission_id);

            match event {
                ModelEvent::Text { text } => {
                    // Cumulative snapshot; recorded as observed.
                    text_buf = text.clone();
                    commit(state, mission_id, EventDraft::text_delta(text))?;
                }
                ModelEvent::Thinking { text } => {
                    for draft in merge_thinking(&mut thought, &text) {
                        commit(state, mission_id, draft)?;
                    }
                }
                ModelEvent::ToolCallRequest { call } => {
                    pending_calls.push(call);
                }
                ModelEvent::Done {
                    usage,
                    reported_cost_cents: cost,
                } => {
                    if let Some(u) = usage {
                        total_usage.add(&u);
                    }
                    if let Some(c) = cost {
                        reported_cost_cents += c;
                        cost_reports += 1;
                    }
                }
                ModelEvent::Error { message, fatal } => {
                    commit(state, mission_id, EventDraft::error(&message, true))?;
                    if fatal {
                        fatal_error = Some(message);
                    } else {
                        soft_error = Some(message);
                    }
                    break;
                }
            }
        }

        if was_cancelled {
            // Partial deltas stay in the log; the turn is left open.
            return Ok(TurnEnd::Cancelled);
        }
        if let Some(message) = fatal_error {
            end_mission(state, mission_id, MissionStatus::Failed, Some(&message))?;
            return Ok(TurnEnd::MissionEnded);
        }
        if let Some(message) = soft_error {
            // Close the turn unsuccessfully; the mission stays active.
            emit_assistant(
                state,
                mission_id,
                &message,
                false,
                &model_name,
                &total_usage,
                (invocations > 0 && cost_reports == invocations).then_some(reported_cost_cents),
            )?;
            return Ok(TurnEnd::Finished);
        }

        if pending_calls.is_empty() {
            // Final answer; closes any open thinking/text_delta stream.
            emit_assistant(
                state,
                mission_id,
                &text_buf,
                true,
                &model_name,
                &total_usage,
                (invocations > 0 && cost_reports == invocations).then_some(reported_cost_cents),
            )?;
            return Ok(TurnEnd::Finished);
        }

        // Tool dispatch: suspend on each call in request order.
        messages.push(Message::assistant_with_tools(&text_buf, pending_calls.clone()));
        for call in pending_calls {
            let call_id = if call.call_id.is_empty() {
                Uuid::new_v4().to_string()
            } else {
                call.call_id.clone()
            };

            // Register before the event is visible so a subscriber can
            // answer the moment it sees the tool_call.
            let waiter = state.waiters.register(&call_id, mission_id);
            commit(
                state,
                mission_id,
                EventDraft::tool_call(&call_id, &call.tool_name, call.arguments.clone()),
            )?;

            state
                .scheduler
                .set_phase(mission_id, WorkerPhase::WaitingForTool);
            state.scheduler.set_activity(
                mission_id,
                Some(format!("waiting on tool {} ({call_id})", call.tool_name)),
            );

            let mut wait = std::pin::pin!(waiter.wait());
            let outcome = tokio::select! {
                outcome = &mut wait => outcome,
                _ = cancel.cancelled() => {
                    if state.waiters.cancel(&call_id, "mission cancelled") {
                        ToolOutcome::Cancelled { reason: "mission cancelled".into() }
                    } else {
                        // A result won the race; take it.
                        wait.await
                    }
                }
                _ = state.shutdown.cancelled() => {
                    if state.waiters.cancel(&call_id, "server shutdown") {
                        ToolOutcome::Cancelled { reason: "server shutdown".into() }
                    } else {
                        wait.await
                    }
                }
            };

            match outcome {
                ToolOutcome::Result {
                    tool_name,
                    content,
                    metadata,
                } => {
                    let mut draft = EventDraft::tool_result(
                        &call_id,
                        tool_name.or_else(|| Some(call.tool_name.clone())),
                        &content,
                    );
                    draft.metadata.extend(metadata);
                    commit(state, mission_id, draft)?;
                    messages.push(Message::tool_result(&call_id, &content));
                    state.scheduler.set_phase(mission_id, WorkerPhase::Running);
                    state.scheduler.set_activity(mission_id, None);
                }
                ToolOutcome::Cancelled { reason } => {
                    let draft = EventDraft::tool_result(&call_id, Some(call.tool_name.clone()), "")
                        .with_meta("status", json!("cancelled"))
                        .with_meta("reason", json!(reason));
                    commit(state, mission_id, draft)?;
                    return Ok(TurnEnd::Cancelled);
                }
            }
        }
    }

    // Iteration budget exceeded.
    emit_assistant(
        state,
        mission_id,
        "iteration limit",
        false,
        &model_name,
        &total_usage,
        (invocations > 0 && cost_reports == invocations).then_some(reported_cost_cents),
    )?;
    end_mission(state, mission_id, MissionStatus::Blocked, Some("iteration limit"))?;
    Ok(TurnEnd::MissionEnded)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The authoritative thinking merge rule: a chunk that neither extends
/// nor is extended by the in-progress thought finalizes it (done=true)
/// and begins a new one. Consumers do no other de-duplication.
fn merge_thinking(current: &mut Option<String>, incoming: &str) -> Vec<EventDraft> {
    match current.take() {
        None => {
            *current = Some(incoming.to_owned());
            vec![EventDraft::thinking(incoming, false)]
        }
        Some(cur) if incoming.starts_with(&cur) => {
            *current = Some(incoming.to_owned());
            vec![EventDraft::thinking(incoming, false)]
        }
        Some(cur) if cur.starts_with(incoming) => {
            // Already subsumed by the accumulated thought.
            *current = Some(cur);
            Vec::new()
        }
        Some(cur) => {
            let finalize = EventDraft::thinking(cur, true);
            *current = Some(incoming.to_owned());
            vec![finalize, EventDraft::thinking(incoming, false)]
        }
    }
}

/// Commit the `assistant_message` that terminates the turn, carrying
/// model, usage and cost metadata.
fn emit_assistant(
    state: &AppState,
    mission_id: &str,
    content: &str,
    success: bool,
    model_name: &str,
    usage: &Usage,
    reported_cost_cents: Option<i64>,
) -> Result<()> {
    let (cost_cents, cost_source) = match reported_cost_cents {
        Some(cents) => (Some(cents), CostSource::Actual),
        None => match state.config.model.pricing.get(model_name) {
            Some(pricing) => (Some(pricing.estimate_cents(usage)), CostSource::Estimated),
            None => (None, CostSource::Unknown),
        },
    };

    let mut draft = EventDraft::assistant_message(content, success)
        .with_meta("model", json!(model_name))
        .with_meta("prompt_tokens", json!(usage.prompt_tokens))
        .with_meta("completion_tokens", json!(usage.completion_tokens))
        .with_meta("total_tokens", json!(usage.total_tokens))
        .with_meta("cost_source", json!(cost_source.as_str()));
    if let Some(cents) = cost_cents {
        draft = draft.with_meta("cost_cents", json!(cents));
    }
    commit(state, mission_id, draft)?;
    Ok(())
}

/// Rebuild the rolling history from the durable log.
fn history_from_log(state: &AppState, mission_id: &str) -> Result<Vec<Message>> {
    let events = state.events.read_range(
        mission_id,
        Some(&[
            EventType::UserMessage,
            EventType::AssistantMessage,
            EventType::ToolCall,
            EventType::ToolResult,
        ]),
        usize::MAX,
        0,
    )?;

    let mut messages = Vec::with_capacity(events.len());
    for event in events {
        match event.event_type {
            EventType::UserMessage => messages.push(Message::user(event.content)),
            EventType::AssistantMessage => messages.push(Message::assistant(event.content)),
            EventType::ToolCall => {
                let call = ToolCall {
                    call_id: event.tool_call_id.clone().unwrap_or_default(),
                    tool_name: event.tool_name.clone().unwrap_or_default(),
                    arguments: event
                        .metadata
                        .get("arguments")
                        .cloned()
                        .unwrap_or(serde_json::Value::Null),
                };
                messages.push(Message::assistant_with_tools(event.content, vec![call]));
            }
            EventType::ToolResult => {
                let call_id = event.tool_call_id.clone().unwrap_or_default();
                messages.push(Message::tool_result(call_id, event.content));
            }
            _ => {}
        }
    }
    Ok(messages)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
