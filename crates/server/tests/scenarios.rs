//! End-to-end scenarios against a real state directory and a scripted
//! model provider: full turns, tool round-trips, cancellation,
//! reconnect catch-up, the parallel cap, and the iteration budget.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;

use mc_domain::config::Config;
use mc_domain::event::{EventType, StoredEvent};
use mc_domain::mission::{CreateMissionParams, MissionStatus, WorkerState};
use mc_domain::stream::{ModelEvent, Usage};
use mc_model::{ModelProvider, ScriptedProvider};
use mc_server::bootstrap;
use mc_server::control::MissionControl;
use mc_server::subscribe::{SubscriptionFilter, SubscriptionItem};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn build(
    dir: &tempfile::TempDir,
    provider: ScriptedProvider,
    tweak: impl FnOnce(&mut Config),
) -> MissionControl {
    let mut config = Config::default();
    config.storage.state_path = dir.path().to_path_buf();
    tweak(&mut config);
    let provider: Arc<dyn ModelProvider> = Arc::new(provider);
    MissionControl::new(bootstrap::build_state(config, provider).unwrap())
}

fn events_of(control: &MissionControl, mission_id: &str) -> Vec<StoredEvent> {
    control.read_events(mission_id, None, None, 0).unwrap()
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn wait_for_type(control: &MissionControl, mission_id: &str, ty: EventType) {
    let control = control.clone();
    let mission_id = mission_id.to_string();
    wait_until(ty.as_str(), move || {
        events_of(&control, &mission_id)
            .iter()
            .any(|e| e.event_type == ty)
    })
    .await;
}

fn done(usage_tokens: u32) -> ModelEvent {
    ModelEvent::Done {
        usage: Some(Usage {
            prompt_tokens: usage_tokens,
            completion_tokens: usage_tokens,
            total_tokens: usage_tokens * 2,
        }),
        reported_cost_cents: None,
    }
}

fn tool_call(id: &str, name: &str) -> ModelEvent {
    ModelEvent::ToolCallRequest {
        call: mc_domain::message::ToolCall {
            call_id: id.into(),
            tool_name: name.into(),
            arguments: serde_json::json!({"path": "/a"}),
        },
    }
}

/// Assert invariant 1: sequences are exactly 1..=N.
fn assert_contiguous(events: &[StoredEvent]) {
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.sequence, i as i64 + 1, "gap at {:?}", event.event_type);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S1: basic turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s1_basic_turn() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(vec![vec![
        ModelEvent::Text { text: "Hi".into() },
        ModelEvent::Text {
            text: "Hi there".into(),
        },
        done(5),
    ]]);
    let control = build(&dir, provider, |_| {});

    let mission = control.create_mission(CreateMissionParams::default()).unwrap();
    control.post_message(&mission.id, "hello", None).unwrap();

    wait_for_type(&control, &mission.id, EventType::AssistantMessage).await;
    let events = events_of(&control, &mission.id);
    assert_contiguous(&events);

    let types: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
    assert_eq!(
        types,
        vec![
            EventType::MissionStatusChanged,
            EventType::UserMessage,
            EventType::TextDelta,
            EventType::TextDelta,
            EventType::AssistantMessage,
        ]
    );

    assert_eq!(events[0].meta_str("to"), Some("active"));
    assert!(events[0].metadata.get("from").unwrap().is_null());
    assert_eq!(events[1].content, "hello");
    // Deltas are cumulative within the thought.
    assert_eq!(events[2].content, "Hi");
    assert_eq!(events[3].content, "Hi there");
    assert_eq!(events[4].content, "Hi there");
    assert!(events[4].meta_bool("success"));
    // No pricing configured and nothing reported: cost is hidden.
    assert_eq!(events[4].meta_str("cost_source"), Some("unknown"));
    assert!(events[4].metadata.get("cost_cents").is_none());

    // The mission picked up a title from the first message.
    assert_eq!(control.get_mission(&mission.id).unwrap().title.as_deref(), Some("hello"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S2: tool-call round-trip
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s2_tool_call_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::tool_then_text(
        "T1",
        "read_file",
        serde_json::json!({"path": "/a"}),
        "file read",
    );
    let control = build(&dir, provider, |_| {});

    let mission = control.create_mission(CreateMissionParams::default()).unwrap();
    control.post_message(&mission.id, "read it", None).unwrap();

    wait_for_type(&control, &mission.id, EventType::ToolCall).await;

    // The worker is suspended on the waiter.
    {
        let control = control.clone();
        let id = mission.id.clone();
        wait_until("waiting_for_tool snapshot", move || {
            control
                .running_missions()
                .iter()
                .any(|s| s.mission_id == id && s.state == WorkerState::WaitingForTool)
        })
        .await;
    }

    control
        .post_tool_result("T1", Some("read_file".into()), serde_json::json!({"content": "abc"}))
        .unwrap();

    wait_for_type(&control, &mission.id, EventType::AssistantMessage).await;
    let events = events_of(&control, &mission.id);
    assert_contiguous(&events);

    let call = events.iter().find(|e| e.event_type == EventType::ToolCall).unwrap();
    let result = events.iter().find(|e| e.event_type == EventType::ToolResult).unwrap();
    assert_eq!(call.tool_call_id.as_deref(), Some("T1"));
    assert_eq!(result.tool_call_id.as_deref(), Some("T1"));
    assert_eq!(result.content, "abc");
    assert_eq!(result.sequence, call.sequence + 1);

    // Duplicate post: NotFound, and no new event.
    let before = events.len();
    let err = control
        .post_tool_result("T1", Some("read_file".into()), serde_json::json!({"content": "abc"}))
        .unwrap_err();
    assert_eq!(err.code(), "not_found");
    assert_eq!(events_of(&control, &mission.id).len(), before);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S3: cancellation mid-tool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s3_cancel_mid_tool() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(vec![vec![tool_call("T1", "exec"), done(3)]]);
    let control = build(&dir, provider, |_| {});

    let mission = control.create_mission(CreateMissionParams::default()).unwrap();
    control.post_message(&mission.id, "run it", None).unwrap();
    wait_for_type(&control, &mission.id, EventType::ToolCall).await;

    let cancelled = control.cancel_mission(&mission.id).await.unwrap();
    assert_eq!(cancelled.status, MissionStatus::Interrupted);
    assert!(cancelled.interrupted_at.is_some());

    let events = events_of(&control, &mission.id);
    assert_contiguous(&events);
    let n = events.len();
    // Synthetic tool_result, then the interrupted transition.
    assert_eq!(events[n - 2].event_type, EventType::ToolResult);
    assert_eq!(events[n - 2].tool_call_id.as_deref(), Some("T1"));
    assert_eq!(events[n - 2].meta_str("status"), Some("cancelled"));
    assert_eq!(events[n - 1].event_type, EventType::MissionStatusChanged);
    assert_eq!(events[n - 1].meta_str("to"), Some("interrupted"));

    // Cancel of an already-terminal mission is a no-op.
    let again = control.cancel_mission(&mission.id).await.unwrap();
    assert_eq!(again.status, MissionStatus::Interrupted);
    assert_eq!(events_of(&control, &mission.id).len(), n);

    // Resume with skip_message: one status event, no synthetic message.
    let resumed = control.resume_mission(&mission.id, true).unwrap();
    assert_eq!(resumed.status, MissionStatus::Active);
    let events = events_of(&control, &mission.id);
    assert_eq!(events.last().unwrap().meta_str("to"), Some("active"));
    let user_messages = events
        .iter()
        .filter(|e| e.event_type == EventType::UserMessage)
        .count();
    assert_eq!(user_messages, 1);

    // Double resume: the second is a no-op (single active transition).
    control.resume_mission(&mission.id, true).unwrap();
    let actives = events_of(&control, &mission.id)
        .iter()
        .filter(|e| {
            e.event_type == EventType::MissionStatusChanged && e.meta_str("to") == Some("active")
        })
        .count();
    assert_eq!(actives, 1);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S4: reconnect catch-up
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s4_replay_equals_live() {
    let dir = tempfile::tempdir().unwrap();
    let deltas: Vec<ModelEvent> = (1..=5)
        .map(|i| ModelEvent::Text {
            text: "x".repeat(i),
        })
        .chain([done(2)])
        .collect();
    let provider = ScriptedProvider::new(vec![deltas]);
    let control = build(&dir, provider, |_| {});

    let mission = control.create_mission(CreateMissionParams::default()).unwrap();

    // Subscriber A: live from the beginning.
    let mut live = control
        .subscribe(SubscriptionFilter::Mission(mission.id.clone()), Some(0))
        .unwrap();

    control.post_message(&mission.id, "go", None).unwrap();
    wait_for_type(&control, &mission.id, EventType::AssistantMessage).await;

    let total = events_of(&control, &mission.id).len() as i64;
    let mut live_seqs = Vec::new();
    while live_seqs.len() < total as usize {
        match tokio::time::timeout(Duration::from_secs(5), live.next()).await {
            Ok(Some(SubscriptionItem::Event(e))) => live_seqs.push(e.sequence),
            Ok(Some(SubscriptionItem::Keepalive)) => {}
            other => panic!("live stream ended early: {other:?}"),
        }
    }

    // Subscriber B: reconnects with since_sequence = 4.
    let mut replayed = control
        .subscribe(SubscriptionFilter::Mission(mission.id.clone()), Some(4))
        .unwrap();
    let mut replay_seqs = Vec::new();
    while replay_seqs.len() < (total - 4) as usize {
        match tokio::time::timeout(Duration::from_secs(5), replayed.next()).await {
            Ok(Some(SubscriptionItem::Event(e))) => replay_seqs.push(e.sequence),
            Ok(Some(SubscriptionItem::Keepalive)) => {}
            other => panic!("replay stream ended early: {other:?}"),
        }
    }

    // Replay equals live: same subsequence after the cursor.
    assert_eq!(live_seqs, (1..=total).collect::<Vec<i64>>());
    assert_eq!(replay_seqs, (5..=total).collect::<Vec<i64>>());
}

#[tokio::test]
async fn s4b_quiet_subscription_emits_keepalive() {
    let dir = tempfile::tempdir().unwrap();
    let control = build(&dir, ScriptedProvider::new(vec![]), |c| {
        c.runtime.keepalive_seconds = 1;
    });
    let mission = control.create_mission(CreateMissionParams::default()).unwrap();

    let mut stream = control
        .subscribe(SubscriptionFilter::Mission(mission.id.clone()), None)
        .unwrap();

    let item = tokio::time::timeout(Duration::from_secs(3), stream.next())
        .await
        .expect("keepalive within the window")
        .unwrap();
    assert!(matches!(item, SubscriptionItem::Keepalive));
}

#[tokio::test]
async fn s4c_lagged_subscriber_recovers_from_store() {
    let dir = tempfile::tempdir().unwrap();
    let deltas: Vec<ModelEvent> = (1..=30)
        .map(|i| ModelEvent::Text {
            text: "y".repeat(i),
        })
        .chain([done(2)])
        .collect();
    let provider = ScriptedProvider::new(vec![deltas]);
    // Tiny buffer so an unpolled subscriber overflows.
    let control = build(&dir, provider, |c| {
        c.runtime.subscription_buffer = 4;
    });

    let mission = control.create_mission(CreateMissionParams::default()).unwrap();
    let mut stream = control
        .subscribe(SubscriptionFilter::Mission(mission.id.clone()), Some(0))
        .unwrap();

    // Produce the whole turn without polling the stream.
    control.post_message(&mission.id, "flood", None).unwrap();
    wait_for_type(&control, &mission.id, EventType::AssistantMessage).await;

    let total = events_of(&control, &mission.id).len() as i64;
    let mut seqs = Vec::new();
    while seqs.len() < total as usize {
        match tokio::time::timeout(Duration::from_secs(5), stream.next()).await {
            Ok(Some(SubscriptionItem::Event(e))) => seqs.push(e.sequence),
            Ok(Some(SubscriptionItem::Keepalive)) => {}
            other => panic!("lagged stream ended early: {other:?}"),
        }
    }
    // Nothing dropped, nothing duplicated.
    assert_eq!(seqs, (1..=total).collect::<Vec<i64>>());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S5: parallel cap
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s5_parallel_cap_fifo() {
    let dir = tempfile::tempdir().unwrap();
    let scripts = (0..3)
        .map(|i| {
            vec![
                ModelEvent::Text {
                    text: format!("answer {i}"),
                },
                done(2),
            ]
        })
        .collect();
    let provider =
        ScriptedProvider::new(scripts).with_event_delay(Duration::from_millis(300));
    let control = build(&dir, provider, |c| {
        c.runtime.max_parallel_missions = 2;
    });

    let m1 = control.create_mission(CreateMissionParams::default()).unwrap();
    let m2 = control.create_mission(CreateMissionParams::default()).unwrap();
    control.post_message(&m1.id, "one", None).unwrap();
    control.post_message(&m2.id, "two", None).unwrap();

    // Let both claim their slots, then queue the third.
    {
        let control = control.clone();
        wait_until("two running workers", move || {
            control
                .running_missions()
                .iter()
                .filter(|s| s.state == WorkerState::Running)
                .count()
                == 2
        })
        .await;
    }
    let m3 = control.create_mission(CreateMissionParams::default()).unwrap();
    control.post_message(&m3.id, "three", None).unwrap();

    {
        let control = control.clone();
        let id = m3.id.clone();
        wait_until("third mission queued", move || {
            control
                .running_missions()
                .iter()
                .any(|s| s.mission_id == id && s.state == WorkerState::Queued)
        })
        .await;
    }

    // A finishing turn frees a slot and the queued mission runs.
    wait_for_type(&control, &m3.id, EventType::AssistantMessage).await;
    for id in [&m1.id, &m2.id] {
        wait_for_type(&control, id, EventType::AssistantMessage).await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S6: blocked by iteration cap
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s6_iteration_cap_blocks_then_resumes() {
    let dir = tempfile::tempdir().unwrap();
    let scripts = (1..=3)
        .map(|i| vec![tool_call(&format!("T{i}"), "probe"), done(2)])
        .collect();
    let control = build(&dir, ScriptedProvider::new(scripts), |c| {
        c.runtime.max_iterations = 3;
    });

    let mission = control.create_mission(CreateMissionParams::default()).unwrap();
    control.post_message(&mission.id, "loop forever", None).unwrap();

    for i in 1..=3 {
        let call_id = format!("T{i}");
        {
            let control = control.clone();
            let mid = mission.id.clone();
            let call_id = call_id.clone();
            wait_until("tool call emitted", move || {
                events_of(&control, &mid)
                    .iter()
                    .any(|e| e.tool_call_id.as_deref() == Some(&call_id))
            })
            .await;
        }
        control
            .post_tool_result(&call_id, Some("probe".into()), serde_json::json!({"content": "ok"}))
            .unwrap();
    }

    {
        let control = control.clone();
        let mid = mission.id.clone();
        wait_until("mission blocked", move || {
            control.get_mission(&mid).unwrap().status == MissionStatus::Blocked
        })
        .await;
    }

    let events = events_of(&control, &mission.id);
    assert_contiguous(&events);
    let n = events.len();
    assert_eq!(events[n - 2].event_type, EventType::AssistantMessage);
    assert_eq!(events[n - 2].content, "iteration limit");
    assert!(!events[n - 2].meta_bool("success"));
    assert_eq!(events[n - 1].meta_str("to"), Some("blocked"));

    // Resume consumes the synthetic message with a fresh turn (the
    // scripted provider echoes once its scripts run out).
    control.resume_mission(&mission.id, false).unwrap();
    {
        let control = control.clone();
        let mid = mission.id.clone();
        wait_until("resumed turn completed", move || {
            events_of(&control, &mid)
                .iter()
                .any(|e| e.content == "ECHO: MISSION RESUMED")
        })
        .await;
    }
    assert!(events_of(&control, &mission.id)
        .iter()
        .any(|e| e.event_type == EventType::UserMessage && e.content == "MISSION RESUMED"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cross-cutting invariants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn dequeued_message_ids_are_unique_in_log() {
    let dir = tempfile::tempdir().unwrap();
    let control = build(&dir, ScriptedProvider::new(vec![]), |_| {});
    let mission = control.create_mission(CreateMissionParams::default()).unwrap();

    for i in 0..4 {
        control
            .post_message(&mission.id, format!("msg {i}").as_str(), None)
            .unwrap();
    }
    {
        let control = control.clone();
        let mid = mission.id.clone();
        wait_until("all turns complete", move || {
            events_of(&control, &mid)
                .iter()
                .filter(|e| e.event_type == EventType::AssistantMessage)
                .count()
                == 4
        })
        .await;
    }

    let events = events_of(&control, &mission.id);
    assert_contiguous(&events);
    let ids: Vec<&str> = events
        .iter()
        .filter(|e| e.event_type == EventType::UserMessage)
        .filter_map(|e| e.meta_str("queued_message_id"))
        .collect();
    let unique: std::collections::HashSet<&str> = ids.iter().copied().collect();
    assert_eq!(ids.len(), 4);
    assert_eq!(unique.len(), 4);
    // Everything consumed.
    assert!(control.list_queue(Some(&mission.id)).unwrap().is_empty());
}

#[tokio::test]
async fn messages_posted_while_interrupted_survive_for_resume() {
    let dir = tempfile::tempdir().unwrap();
    let control = build(&dir, ScriptedProvider::new(vec![]), |_| {});
    let mission = control.create_mission(CreateMissionParams::default()).unwrap();

    control.cancel_mission(&mission.id).await.unwrap();
    control.post_message(&mission.id, "while down", None).unwrap();
    assert_eq!(control.list_queue(Some(&mission.id)).unwrap().len(), 1);

    control.resume_mission(&mission.id, true).unwrap();
    {
        let control = control.clone();
        let mid = mission.id.clone();
        wait_until("queued message consumed after resume", move || {
            events_of(&control, &mid)
                .iter()
                .any(|e| e.event_type == EventType::UserMessage && e.content == "while down")
        })
        .await;
    }
}

#[tokio::test]
async fn terminal_status_stops_the_event_stream() {
    let dir = tempfile::tempdir().unwrap();
    let control = build(&dir, ScriptedProvider::always_text("done"), |_| {});
    let mission = control.create_mission(CreateMissionParams::default()).unwrap();
    control.post_message(&mission.id, "work", None).unwrap();
    wait_for_type(&control, &mission.id, EventType::AssistantMessage).await;

    let completed = control
        .set_mission_status(&mission.id, MissionStatus::Completed, Some("all deliverables met"))
        .await
        .unwrap();
    assert_eq!(completed.status, MissionStatus::Completed);

    let events = events_of(&control, &mission.id);
    assert_eq!(events.last().unwrap().meta_str("to"), Some("completed"));
    assert_eq!(events.last().unwrap().meta_str("reason"), Some("all deliverables met"));

    // No worker remains, and nothing new is appended afterwards.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(events_of(&control, &mission.id).len(), events.len());
    assert!(control.running_missions().is_empty());

    // Invalid transition out of a terminal state.
    let err = control
        .set_mission_status(&mission.id, MissionStatus::Blocked, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_transition");
}

#[tokio::test]
async fn protocol_errors_do_not_mutate_state() {
    let dir = tempfile::tempdir().unwrap();
    let control = build(&dir, ScriptedProvider::new(vec![]), |_| {});
    let mission = control.create_mission(CreateMissionParams::default()).unwrap();

    let err = control.post_message(&mission.id, "   ", None).unwrap_err();
    assert_eq!(err.code(), "protocol");
    assert!(control.list_queue(Some(&mission.id)).unwrap().is_empty());

    assert_eq!(
        control.post_message("bad/id", "hello", None).unwrap_err().code(),
        "protocol"
    );
    assert_eq!(
        control.remove_from_queue("not-a-uuid").unwrap_err().code(),
        "protocol"
    );
    assert_eq!(
        control.get_mission("also bad").unwrap_err().code(),
        "protocol"
    );

    // Unknown but well-formed id: NotFound, not Protocol.
    assert_eq!(
        control.get_mission("0000-unknown").unwrap_err().code(),
        "mission_not_found"
    );
}

#[tokio::test]
async fn restart_recovers_stranded_missions() {
    let dir = tempfile::tempdir().unwrap();
    let mission_id = {
        let registry = mc_missions::MissionRegistry::new(dir.path()).unwrap();
        registry.create(CreateMissionParams::default()).unwrap().id
    };

    let control = build(&dir, ScriptedProvider::new(vec![]), |_| {});
    let mission = control.get_mission(&mission_id).unwrap();
    assert_eq!(mission.status, MissionStatus::Interrupted);
    assert!(mission.resumable());

    let events = events_of(&control, &mission_id);
    let last = events.last().unwrap();
    assert_eq!(last.event_type, EventType::MissionStatusChanged);
    assert_eq!(last.meta_str("to"), Some("interrupted"));
    assert_eq!(last.meta_str("reason"), Some("server restart"));
}

#[tokio::test]
async fn shutdown_quiesces_workers_to_interrupted() {
    let dir = tempfile::tempdir().unwrap();
    let control = build(&dir, ScriptedProvider::always_text("done"), |_| {});

    let m1 = control.create_mission(CreateMissionParams::default()).unwrap();
    let m2 = control.create_mission(CreateMissionParams::default()).unwrap();
    control.post_message(&m1.id, "work", None).unwrap();
    wait_for_type(&control, &m1.id, EventType::AssistantMessage).await;

    control.shutdown().await;

    for id in [&m1.id, &m2.id] {
        let mission = control.get_mission(id).unwrap();
        assert_eq!(mission.status, MissionStatus::Interrupted);
        let last = events_of(&control, id).last().cloned().unwrap();
        assert_eq!(last.meta_str("to"), Some("interrupted"));
        assert_eq!(last.meta_str("reason"), Some("server shutdown"));
    }
    assert!(control.running_missions().is_empty());
}

#[tokio::test]
async fn global_subscription_sees_every_mission() {
    let dir = tempfile::tempdir().unwrap();
    let control = build(&dir, ScriptedProvider::new(vec![]), |_| {});

    let mut all = control.subscribe(SubscriptionFilter::All, None).unwrap();

    let m1 = control.create_mission(CreateMissionParams::default()).unwrap();
    let m2 = control.create_mission(CreateMissionParams::default()).unwrap();
    control.post_message(&m1.id, "first", None).unwrap();
    control.post_message(&m2.id, "second", None).unwrap();
    for id in [&m1.id, &m2.id] {
        wait_for_type(&control, id, EventType::AssistantMessage).await;
    }

    // Both missions' committed totals must arrive, each in order.
    let expect = events_of(&control, &m1.id).len() + events_of(&control, &m2.id).len();
    let mut seen: std::collections::HashMap<String, Vec<i64>> = Default::default();
    let mut count = 0;
    while count < expect {
        match tokio::time::timeout(Duration::from_secs(5), all.next()).await {
            Ok(Some(SubscriptionItem::Event(e))) => {
                seen.entry(e.mission_id.clone()).or_default().push(e.sequence);
                count += 1;
            }
            Ok(Some(SubscriptionItem::Keepalive)) => {}
            other => panic!("global stream ended early: {other:?}"),
        }
    }
    for id in [&m1.id, &m2.id] {
        let seqs = &seen[id.as_str()];
        let expected: Vec<i64> = (1..=seqs.len() as i64).collect();
        assert_eq!(seqs, &expected, "per-mission order for {id}");
    }
}

#[tokio::test]
async fn estimated_cost_metadata_from_pricing_table() {
    let dir = tempfile::tempdir().unwrap();
    let control = build(&dir, ScriptedProvider::always_text("hi"), |c| {
        c.model.pricing.insert(
            "scripted-1".into(),
            mc_domain::config::ModelPricing {
                input_cents_per_1k: 100.0,
                output_cents_per_1k: 100.0,
            },
        );
    });
    let mission = control.create_mission(CreateMissionParams::default()).unwrap();
    control.post_message(&mission.id, "hello", None).unwrap();
    wait_for_type(&control, &mission.id, EventType::AssistantMessage).await;

    let events = events_of(&control, &mission.id);
    let assistant = events
        .iter()
        .find(|e| e.event_type == EventType::AssistantMessage)
        .unwrap();
    assert_eq!(assistant.meta_str("cost_source"), Some("estimated"));
    assert_eq!(assistant.metadata["cost_cents"], 1);
    assert_eq!(assistant.meta_str("model"), Some("scripted-1"));
}
