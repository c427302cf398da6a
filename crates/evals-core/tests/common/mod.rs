//! Shared helpers for integration tests: paths into `testdata/` and a fake
//! assistant built from `sh` that replays a canned stream-json transcript.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use evals_core::{AssistantCommand, EvalConfig};

pub fn repo_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

pub fn fixtures_dir() -> PathBuf {
    repo_root().join("testdata/fixtures")
}

pub fn transcript(name: &str) -> PathBuf {
    repo_root().join("testdata/transcripts").join(name)
}

pub fn scenario_file(name: &str) -> PathBuf {
    repo_root().join("scenarios").join(name)
}

/// An assistant that runs `script` under `sh -c`; the instruction is `$1`.
pub fn fake_assistant(script: &str) -> AssistantCommand {
    AssistantCommand::new(
        "sh",
        vec!["-c".to_string(), script.to_string(), "fake-assistant".to_string()],
    )
}

/// An assistant that checks the workspace was seeded, then prints `transcript`.
pub fn replaying(transcript: &Path) -> AssistantCommand {
    fake_assistant(
        r#"test -f .rwx/simple-ci-rwx.yml && test -f .github/workflows/simple-ci.yml || { echo "workspace not seeded" >&2; exit 3; }
cat "$EVALS_FAKE_TRANSCRIPT""#,
    )
    .with_env("EVALS_FAKE_TRANSCRIPT", transcript.display().to_string())
}

/// Configuration rooted in `dir` with the repository fixtures.
pub fn test_config(dir: &Path, assistant: AssistantCommand) -> EvalConfig {
    EvalConfig {
        timeout_secs: 30,
        grace_period_ms: 500,
        fixtures_dir: fixtures_dir(),
        archive_dir: dir.join("output"),
        baseline_dir: dir.join("baselines"),
        assistant,
        ..EvalConfig::default()
    }
}

/// Whether `pid` names a live (non-zombie) process.
#[cfg(target_os = "linux")]
pub fn is_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => {
            // Format: `pid (comm) state ...`; comm may contain spaces.
            let state = stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.split_whitespace().next());
            !matches!(state, Some("Z") | Some("X") | None)
        }
        Err(_) => false,
    }
}
