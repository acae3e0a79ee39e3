//! Prompt queue ordering, queue bypass for ready sessions, and the
//! max-parallel cap.

use foreman::{AgentId, AgentState, SupervisorOptions};

use crate::fixtures::{Harness, Script};

#[tokio::test]
async fn test_prompts_to_busy_agent_queue_in_fifo_order() {
    let mut h = Harness::new(&["build the project (name: builder)"]).unwrap();
    h.start().await;

    h.supervisor.handle_line("builder: fix the failing test").await;
    h.supervisor.handle_line("1 update the changelog").await;
    assert_eq!(h.supervisor.queued(AgentId(1)), 2);

    h.complete_turn(1, "completed").await;
    assert_eq!(h.supervisor.state(AgentId(1)), AgentState::Running);
    assert_eq!(h.supervisor.queued(AgentId(1)), 1);

    h.complete_turn(1, "completed").await;
    h.complete_turn(1, "completed").await;
    h.sync().await;

    let prompts: Vec<String> = h.turns().into_iter().map(|(_, text)| text).collect();
    assert_eq!(
        prompts,
        vec![
            "build the project (name: builder)".to_string(),
            "fix the failing test".to_string(),
            "update the changelog".to_string(),
        ]
    );
    assert_eq!(h.supervisor.state(AgentId(1)), AgentState::Done);
}

#[tokio::test]
async fn test_ready_session_bypasses_queue() {
    let mut h = Harness::new(&["build (name: builder)"]).unwrap();
    h.start().await;
    h.complete_turn(1, "completed").await;
    assert_eq!(h.supervisor.state(AgentId(1)), AgentState::Done);

    h.supervisor.handle_line("builder: one more thing").await;
    h.sync().await;

    assert_eq!(h.supervisor.state(AgentId(1)), AgentState::Running);
    assert_eq!(h.supervisor.queued(AgentId(1)), 0, "dispatch must bypass the queue");
    assert_eq!(h.turns().len(), 2);
}

#[tokio::test]
async fn test_max_parallel_caps_concurrent_sessions() {
    let options = SupervisorOptions {
        max_parallel: Some(2),
        ..Default::default()
    };
    let mut h = Harness::with(&["first", "second", "third"], options, Script::default()).unwrap();
    h.start().await;
    h.sync().await;

    assert_eq!(h.supervisor.state(AgentId(1)), AgentState::Running);
    assert_eq!(h.supervisor.state(AgentId(2)), AgentState::Running);
    assert_eq!(h.supervisor.state(AgentId(3)), AgentState::Idle);
    assert_eq!(h.turns().len(), 2);

    h.complete_turn(1, "completed").await;
    h.sync().await;

    assert_eq!(h.supervisor.state(AgentId(3)), AgentState::Running);
    assert_eq!(h.turns().len(), 3);
    assert!(h.turns()[2].1.contains("third"));
}

#[tokio::test]
async fn test_unknown_selector_is_rejected_without_effect() {
    let mut h = Harness::new(&["build (name: builder)"]).unwrap();
    h.start().await;

    h.supervisor.handle_line("ghost: do something").await;
    h.sync().await;

    assert_eq!(h.supervisor.queued(AgentId(1)), 0);
    assert_eq!(h.turns().len(), 1);
}

#[tokio::test]
async fn test_status_strip_markers() {
    let mut h = Harness::new(&["build (name: builder)", "lint"]).unwrap();
    h.start().await;
    assert_eq!(h.supervisor.status_strip(), "1.:builder  2.");

    h.complete_turn(2, "completed").await;
    h.supervisor.handle_line("builder: follow up").await;
    assert_eq!(h.supervisor.status_strip(), "1.+1:builder  2✓");

    h.raise_approval(1, 5, "rm -rf build").await;
    assert_eq!(h.supervisor.status_strip(), "1!+1:builder  2✓");
}
