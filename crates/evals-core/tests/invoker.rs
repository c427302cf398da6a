//! Process-level invoker behaviour against a fake `sh` assistant.

mod common;

use std::time::{Duration, Instant};

use evals_core::{
    EvalError, Event, InvokeContext, Invoker, ProcessInvoker, RunStatus, ToolOutcome,
};

fn invoker(command: evals_core::AssistantCommand) -> ProcessInvoker {
    ProcessInvoker::new(command).with_grace_period(Duration::from_millis(500))
}

fn seeded_workspace() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join(".rwx")).unwrap();
    std::fs::create_dir_all(dir.path().join(".github/workflows")).unwrap();
    std::fs::write(dir.path().join(".rwx/simple-ci-rwx.yml"), "tasks: []\n").unwrap();
    std::fs::write(dir.path().join(".github/workflows/simple-ci.yml"), "name: CI\n").unwrap();
    dir
}

#[tokio::test]
async fn replayed_transcript_preserves_order_and_outcomes() {
    let ws = seeded_workspace();
    let command = common::replaying(&common::transcript("review-gha-simple.jsonl"));
    let ctx = InvokeContext::with_timeout(Duration::from_secs(30));
    let run = invoker(command)
        .invoke(&ctx, "/rwx:review-gha-migration .rwx/simple-ci-rwx.yml", ws.path())
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    let kinds: Vec<&str> = run.events.iter().map(Event::kind).collect();
    assert_eq!(
        kinds,
        vec![
            "skill_activation",
            "text_chunk",
            "tool_invocation",
            "tool_invocation",
            "text_chunk"
        ]
    );
    assert_eq!(run.skills().collect::<Vec<_>>(), vec!["rwx:review-gha-migration"]);
    assert_eq!(run.tools().collect::<Vec<_>>(), vec!["Bash", "Read"]);
    for event in &run.events {
        if let Event::ToolInvocation { outcome, .. } = event {
            assert!(matches!(outcome, ToolOutcome::Success { .. }), "{outcome:?}");
        }
    }
    assert!(run.text_output().contains("go vet"));
    assert_eq!(run.session.session_id.as_deref(), Some("fake-session-1"));
    assert_eq!(run.session.num_turns, Some(4));
}

#[tokio::test]
async fn unseeded_workspace_fails_the_run() {
    let ws = tempfile::tempdir().unwrap();
    let command = common::replaying(&common::transcript("review-gha-simple.jsonl"));
    let ctx = InvokeContext::with_timeout(Duration::from_secs(30));
    let run = invoker(command).invoke(&ctx, "review", ws.path()).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.exit_code, Some(3));
    assert!(run.events.is_empty());
    assert!(run.stderr_tail.contains("workspace not seeded"));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn timeout_kills_the_whole_process_tree() {
    let ws = tempfile::tempdir().unwrap();
    let pid_file = ws.path().join("child.pid");
    // A background grandchild that ignores SIGTERM plus a foreground wait.
    let script = format!(
        r#"echo '{{"type":"assistant","message":{{"content":[{{"type":"text","text":"working"}}]}}}}'
sh -c 'trap "" TERM; while true; do sleep 1; done' &
echo $! > {pid}
wait"#,
        pid = pid_file.display()
    );
    let ctx = InvokeContext::with_timeout(Duration::from_millis(700));
    let started = Instant::now();
    let err = invoker(common::fake_assistant(&script))
        .invoke(&ctx, "x", ws.path())
        .await
        .unwrap_err();

    // Deadline plus two grace periods, with slack for a loaded machine.
    assert!(started.elapsed() < Duration::from_secs(5), "{:?}", started.elapsed());
    let partial = err.partial_run().expect("timeout keeps the partial run");
    assert_eq!(partial.status, RunStatus::TimedOut);
    assert_eq!(partial.text_output(), "working");

    let pid: u32 = std::fs::read_to_string(&pid_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    while common::is_alive(pid) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!common::is_alive(pid), "grandchild {pid} survived the timeout");
}

#[tokio::test]
async fn cancellation_returns_within_grace_bound() {
    let ws = tempfile::tempdir().unwrap();
    let ctx = InvokeContext::new();
    let cancel = ctx.clone();
    let started = Instant::now();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
    });

    let err = invoker(common::fake_assistant("trap '' TERM; sleep 30"))
        .invoke(&ctx, "x", ws.path())
        .await
        .unwrap_err();
    assert!(matches!(err, EvalError::Timeout { .. }));
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn malformed_output_is_protocol_error_with_raw_line() {
    let ws = tempfile::tempdir().unwrap();
    let script = r#"echo '{"type":"system","session_id":"s"}'
echo '{"type":"assistant","message":'"#;
    let ctx = InvokeContext::with_timeout(Duration::from_secs(10));
    let err = invoker(common::fake_assistant(script))
        .invoke(&ctx, "x", ws.path())
        .await
        .unwrap_err();
    match err {
        EvalError::Protocol { line_no, raw, .. } => {
            assert_eq!(line_no, 2);
            assert_eq!(raw, r#"{"type":"assistant","message":"#);
        }
        other => panic!("expected protocol error, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_assistant_is_spawn_error() {
    let ws = tempfile::tempdir().unwrap();
    let command = evals_core::AssistantCommand::new("no-such-assistant-binary", vec![]);
    let ctx = InvokeContext::with_timeout(Duration::from_secs(10));
    let err = invoker(command).invoke(&ctx, "x", ws.path()).await.unwrap_err();
    assert!(matches!(err, EvalError::Spawn { .. }));
}
