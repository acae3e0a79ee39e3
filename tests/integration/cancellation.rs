//! Turn cancellation: accepted and rejected interrupts, queued-head removal,
//! and settling after a cancelled run.

use foreman::{AgentId, AgentState};

use crate::fixtures::{Harness, Script};

#[tokio::test]
async fn test_accepted_cancel_transitions_to_idle() {
    let mut h = Harness::new(&["build (name: builder)"]).unwrap();
    h.start().await;
    assert_eq!(h.supervisor.state(AgentId(1)), AgentState::Running);

    h.supervisor.handle_line("builder stop wrong branch").await;
    assert_eq!(h.supervisor.state(AgentId(1)), AgentState::Idle);

    // The runtime still reports the aborted turn; the agent stays settled.
    h.complete_turn(1, "aborted").await;
    assert_eq!(h.supervisor.state(AgentId(1)), AgentState::Idle);
    assert!(h.supervisor.run_complete());
}

#[tokio::test]
async fn test_rejected_cancel_keeps_agent_running() {
    let script = Script {
        cancel_accepted: false,
        ..Default::default()
    };
    let mut h = Harness::with(&["build (name: builder)"], Default::default(), script).unwrap();
    h.start().await;

    h.supervisor.handle_line("builder stop").await;
    assert_eq!(
        h.supervisor.state(AgentId(1)),
        AgentState::Running,
        "a rejected interrupt must not be silently dropped into Idle"
    );
    assert!(!h.supervisor.run_complete());
}

#[tokio::test]
async fn test_cancel_without_inflight_turn_removes_queued_head() {
    let mut h = Harness::new(&["build (name: builder)"]).unwrap();
    h.start().await;
    h.supervisor.handle_line("builder: second task").await;
    h.supervisor.handle_line("builder: third task").await;
    assert_eq!(h.supervisor.queued(AgentId(1)), 2);

    // First stop interrupts the in-flight turn.
    h.supervisor.handle_line("builder stop").await;
    assert_eq!(h.supervisor.state(AgentId(1)), AgentState::Idle);
    assert_eq!(h.supervisor.queued(AgentId(1)), 2);

    // Second stop has no turn to interrupt and drops the queued head instead.
    h.supervisor.handle_line("builder stop changed my mind").await;
    assert_eq!(h.supervisor.queued(AgentId(1)), 1);

    // The aborted turn completes and the remaining prompt dispatches.
    h.complete_turn(1, "aborted").await;
    h.sync().await;
    assert_eq!(h.supervisor.state(AgentId(1)), AgentState::Running);
    assert_eq!(h.supervisor.queued(AgentId(1)), 0);
    let turns = h.turns();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1].1, "third task");
}

#[tokio::test]
async fn test_cancel_on_settled_agent_is_idempotent() {
    let mut h = Harness::new(&["build (name: builder)"]).unwrap();
    h.start().await;
    h.complete_turn(1, "completed").await;
    assert_eq!(h.supervisor.state(AgentId(1)), AgentState::Done);

    h.supervisor.handle_line("builder stop").await;
    assert_eq!(h.supervisor.state(AgentId(1)), AgentState::Done);
    assert!(h.supervisor.run_complete());
}
