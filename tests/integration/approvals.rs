//! Approval resolution order and no-op semantics.

use foreman::approval::ApprovalChoice;
use serde_json::json;

use foreman::{AgentId, AgentState};

use crate::fixtures::Harness;

#[tokio::test]
async fn test_bare_letter_resolves_global_oldest_first() {
    let mut h = Harness::new(&["build (name: builder)", "test (name: tester)"]).unwrap();
    h.start().await;

    // Raised in this order: tester first, then builder.
    h.raise_approval(2, 21, "rm -rf target").await;
    h.raise_approval(1, 22, "git push --force").await;
    assert_eq!(h.supervisor.pending_approvals(), 2);
    assert_eq!(h.supervisor.state(AgentId(1)), AgentState::ApprovalPending);
    assert_eq!(h.supervisor.state(AgentId(2)), AgentState::ApprovalPending);

    h.supervisor.handle_line("approve a").await;
    h.supervisor.handle_line("approve a").await;
    h.sync().await;

    let recorded = h.recorded_approvals();
    assert_eq!(
        recorded,
        vec![
            (json!(21), ApprovalChoice::Accept),
            (json!(22), ApprovalChoice::Accept),
        ],
        "resolution must follow raise order, not agent order"
    );
    assert_eq!(h.supervisor.pending_approvals(), 0);
    assert_eq!(h.supervisor.state(AgentId(1)), AgentState::Running);
    assert_eq!(h.supervisor.state(AgentId(2)), AgentState::Running);
}

#[tokio::test]
async fn test_agent_selector_targets_that_agents_request() {
    let mut h = Harness::new(&["build (name: builder)", "test (name: tester)"]).unwrap();
    h.start().await;

    h.raise_approval(1, 31, "patch src/lib.rs").await;
    h.raise_approval(2, 32, "run integration suite").await;

    h.supervisor.handle_line("tester d").await;
    h.sync().await;

    assert_eq!(
        h.recorded_approvals(),
        vec![(json!(32), ApprovalChoice::Decline)]
    );
    assert_eq!(h.supervisor.state(AgentId(2)), AgentState::Running);
    assert_eq!(
        h.supervisor.state(AgentId(1)),
        AgentState::ApprovalPending,
        "the other agent's request must stay pending"
    );
}

#[tokio::test]
async fn test_resolution_without_match_is_a_noop() {
    let mut h = Harness::new(&["build (name: builder)", "test (name: tester)"]).unwrap();
    h.start().await;
    h.raise_approval(1, 41, "apply patch").await;

    // tester has nothing pending; nothing must be consumed or sent.
    h.supervisor.handle_line("tester a").await;
    h.sync().await;

    assert!(h.recorded_approvals().is_empty());
    assert_eq!(h.supervisor.pending_approvals(), 1);
    assert_eq!(h.supervisor.state(AgentId(1)), AgentState::ApprovalPending);
}

#[tokio::test]
async fn test_decline_resumes_the_turn() {
    let mut h = Harness::new(&["build (name: builder)"]).unwrap();
    h.start().await;
    h.raise_approval(1, 51, "rm -rf /").await;

    h.supervisor.handle_line("builder d").await;
    h.sync().await;

    assert_eq!(
        h.recorded_approvals(),
        vec![(json!(51), ApprovalChoice::Decline)]
    );
    // Declining one request does not end the turn.
    assert_eq!(h.supervisor.state(AgentId(1)), AgentState::Running);
}

#[tokio::test]
async fn test_agent_stays_pending_while_more_requests_outstanding() {
    let mut h = Harness::new(&["build (name: builder)"]).unwrap();
    h.start().await;
    h.raise_approval(1, 61, "first").await;
    h.raise_approval(1, 62, "second").await;

    h.supervisor.handle_line("builder a").await;
    assert_eq!(h.supervisor.state(AgentId(1)), AgentState::ApprovalPending);

    h.supervisor.handle_line("builder a").await;
    h.sync().await;
    assert_eq!(h.supervisor.state(AgentId(1)), AgentState::Running);
    assert_eq!(
        h.recorded_approvals(),
        vec![
            (json!(61), ApprovalChoice::Accept),
            (json!(62), ApprovalChoice::Accept),
        ]
    );
}
