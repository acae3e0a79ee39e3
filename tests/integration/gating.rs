//! Gate release semantics: agent gates, status gates, and registration-time
//! validation.

use std::path::PathBuf;

use foreman::{AgentId, AgentState, Error};

use crate::fixtures::Harness;

#[tokio::test]
async fn test_gated_agent_waits_for_dependency() {
    let mut h = Harness::new(&[
        "build the project (name: builder)",
        "WAIT_FOR_AGENT: builder || run the test suite (name: tester)",
    ])
    .unwrap();
    h.start().await;
    h.sync().await;

    assert_eq!(h.supervisor.state(AgentId(1)), AgentState::Running);
    assert_eq!(h.supervisor.state(AgentId(2)), AgentState::Idle);
    assert_eq!(h.supervisor.pending_gates(), 1);
    assert_eq!(h.turns().len(), 1, "only the ungated agent starts");

    h.complete_turn(1, "completed").await;
    h.sync().await;

    assert_eq!(h.supervisor.state(AgentId(1)), AgentState::Done);
    assert_eq!(h.supervisor.state(AgentId(2)), AgentState::Running);
    assert_eq!(h.supervisor.pending_gates(), 0);

    let turns = h.turns();
    assert_eq!(turns.len(), 2);
    assert!(turns[1].1.contains("run the test suite"));
}

#[tokio::test]
async fn test_all_dependencies_must_be_done() {
    let mut h = Harness::new(&[
        "build (name: a)",
        "lint (name: b)",
        "WAIT_FOR_AGENTS: a, b || integrate (name: c)",
    ])
    .unwrap();
    h.start().await;
    h.sync().await;

    h.complete_turn(1, "completed").await;
    assert_eq!(
        h.supervisor.state(AgentId(3)),
        AgentState::Idle,
        "one of two dependencies must not unlock the gate"
    );
    assert_eq!(h.supervisor.pending_gates(), 1);

    h.complete_turn(2, "completed").await;
    h.sync().await;
    assert_eq!(h.supervisor.state(AgentId(3)), AgentState::Running);
    assert_eq!(h.supervisor.pending_gates(), 0);
}

#[tokio::test]
async fn test_dependency_by_index() {
    let mut h = Harness::new(&["build", "WAIT_FOR_AGENT: 1 || test"]).unwrap();
    h.start().await;
    h.complete_turn(1, "completed").await;
    h.sync().await;
    assert_eq!(h.supervisor.state(AgentId(2)), AgentState::Running);
}

#[tokio::test]
async fn test_cycle_rejected_before_any_agent_starts() {
    let result = Harness::new(&[
        "WAIT_FOR_AGENT: b || first (name: a)",
        "WAIT_FOR_AGENT: a || second (name: b)",
    ]);
    let err = result.err().expect("cyclic gates must be rejected");
    assert!(matches!(err, Error::GateCycle(_)));
    assert!(err.is_configuration());
}

#[tokio::test]
async fn test_cycle_written_with_mixed_index_and_name_rejected() {
    // The same two-agent cycle, with one edge referencing its dependency by
    // index instead of name. It can never resolve and must not register.
    let result = Harness::new(&[
        "WAIT_FOR_AGENT: 2 || first (name: a)",
        "WAIT_FOR_AGENT: a || second (name: b)",
    ]);
    let err = result.err().expect("aliased cycle must be rejected");
    assert!(matches!(err, Error::GateCycle(_)));
    assert!(err.is_configuration());
}

#[tokio::test]
async fn test_unknown_gate_target_rejected() {
    let err = Harness::new(&["WAIT_FOR_AGENT: ghost || go (name: a)"])
        .err()
        .expect("unknown dependency must be rejected");
    assert!(matches!(err, Error::UnknownGateTarget { .. }));
    assert!(err.is_configuration());
}

#[tokio::test]
async fn test_status_gate_releases_on_marker_match() {
    let dir = tempfile::tempdir().unwrap();
    let status_file: PathBuf = dir.path().join("status.txt");
    let spec = format!(
        "WAIT_FOR_STATUS: {} | ready || deploy the service",
        status_file.display()
    );

    let mut h = Harness::new(&[&spec]).unwrap();
    h.start().await;
    assert_eq!(h.supervisor.pending_gates(), 1);

    // Missing file, then a non-matching first line: both keep the gate shut.
    h.supervisor.poll_status_gates().await;
    assert_eq!(h.supervisor.pending_gates(), 1);

    std::fs::write(&status_file, "building\n").unwrap();
    h.supervisor.poll_status_gates().await;
    assert_eq!(h.supervisor.pending_gates(), 1);

    // Marker must match the first line only.
    std::fs::write(&status_file, "ready\nextra detail\n").unwrap();
    h.supervisor.poll_status_gates().await;
    h.sync().await;

    assert_eq!(h.supervisor.pending_gates(), 0);
    assert_eq!(h.supervisor.state(AgentId(1)), AgentState::Running);
    assert!(h.turns()[0].1.contains("deploy the service"));
}

#[tokio::test]
async fn test_run_completes_when_all_agents_settle() {
    let mut h = Harness::new(&["build (name: a)", "WAIT_FOR_AGENT: a || test"]).unwrap();
    h.start().await;
    assert!(!h.supervisor.run_complete());

    h.complete_turn(1, "completed").await;
    assert!(!h.supervisor.run_complete(), "gated agent is still running");

    h.complete_turn(2, "completed").await;
    assert!(h.supervisor.run_complete());
}

#[tokio::test]
async fn test_failed_turn_stops_agent() {
    let mut h = Harness::new(&["build (name: a)", "WAIT_FOR_AGENT: a || test"]).unwrap();
    h.start().await;

    h.complete_turn(1, "failed").await;
    assert_eq!(h.supervisor.state(AgentId(1)), AgentState::Stopped);
    assert_eq!(
        h.supervisor.pending_gates(),
        1,
        "a failed dependency must not satisfy the gate"
    );
}
