//! Review dispatch, artifact persistence, and reviewer sessions spawned by
//! the --review option.

use serde_json::json;

use foreman::runtime::RuntimeEvent;
use foreman::{AgentId, AgentState, SupervisorOptions};

use crate::fixtures::{Harness, Script};

#[tokio::test]
async fn test_review_dispatch_sends_scope_and_delivery() {
    let mut h = Harness::new(&["build (name: builder)"]).unwrap();
    h.start().await;

    h.supervisor
        .handle_line("review builder base main --detached")
        .await;
    h.sync().await;

    let reviews = h.recorded_reviews();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].0, h.thread(1));
    assert_eq!(reviews[0].1, json!({ "type": "baseBranch", "branch": "main" }));
    assert_eq!(reviews[0].2.as_deref(), Some("detached"));
}

#[tokio::test]
async fn test_failed_review_leaves_agent_state_untouched() {
    let script = Script {
        review_result: Err("review target has no changes".to_string()),
        ..Default::default()
    };
    let mut h =
        Harness::with(&["build (name: builder)"], Default::default(), script).unwrap();
    h.start().await;

    h.supervisor
        .handle_line("review builder uncommitted --inline")
        .await;
    h.sync().await;

    assert_eq!(h.recorded_reviews().len(), 1, "the dispatch attempt is made");
    assert_eq!(
        h.supervisor.state(AgentId(1)),
        AgentState::Running,
        "a failed review must not alter the agent"
    );
    assert_eq!(h.supervisor.queued(AgentId(1)), 0);
}

#[tokio::test]
async fn test_review_completion_writes_artifact() {
    let mut h = Harness::new(&["build (name: builder)"]).unwrap();
    h.start().await;
    let thread = h.thread(1);

    h.supervisor
        .handle_event(RuntimeEvent::ReviewStarted {
            thread: thread.clone(),
            review_id: "r1".to_string(),
            label: Some("uncommitted".to_string()),
        })
        .await;
    h.supervisor
        .handle_event(RuntimeEvent::ReviewCompleted {
            thread: thread.clone(),
            review_id: "r1".to_string(),
            output: "verdict: correct\n".to_string(),
        })
        .await;

    let entries: Vec<_> = std::fs::read_dir(h.logs_dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with("review-"))
        .collect();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].starts_with(&format!("review-{}-r1-", thread)));
    assert!(entries[0].ends_with(".md"));

    let content =
        std::fs::read_to_string(h.logs_dir.path().join(&entries[0])).unwrap();
    assert!(content.contains("verdict: correct"));
    assert!(content.contains("Label: uncommitted"));
}

#[tokio::test]
async fn test_duplicate_review_completion_writes_once() {
    let mut h = Harness::new(&["build (name: builder)"]).unwrap();
    h.start().await;
    let thread = h.thread(1);

    for _ in 0..2 {
        h.supervisor
            .handle_event(RuntimeEvent::ReviewCompleted {
                thread: thread.clone(),
                review_id: "r7".to_string(),
                output: "done".to_string(),
            })
            .await;
    }

    let count = std::fs::read_dir(h.logs_dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("review-"))
        .count();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_review_option_spawns_reviewer_over_final_output() {
    let options = SupervisorOptions {
        review: true,
        ..Default::default()
    };
    let mut h = Harness::with(
        &["build the parser (name: builder)"],
        options,
        Script::default(),
    )
    .unwrap();
    h.start().await;

    h.agent_message(1, "parser builds cleanly").await;
    h.complete_turn(1, "completed").await;
    h.sync().await;

    assert_eq!(h.supervisor.state(AgentId(1)), AgentState::Done);
    let turns = h.turns();
    assert_eq!(turns.len(), 2, "a reviewer turn must start after Done");
    let reviewer_prompt = &turns[1].1;
    assert!(reviewer_prompt.contains("build the parser"));
    assert!(reviewer_prompt.contains("parser builds cleanly"));

    // The run is not over until the reviewer finishes.
    assert!(!h.supervisor.run_complete());
    let reviewer_thread = turns[1].0.clone();
    h.supervisor
        .handle_event(RuntimeEvent::TurnCompleted {
            thread: reviewer_thread,
            status: "completed".to_string(),
        })
        .await;
    assert!(h.supervisor.run_complete());
}
