//! Integration tests for the conductor CLI

use std::fs;
use std::path::Path;

use assert_cmd::cargo;
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a Command for the conductor binary, isolated from the user's config.
fn conductor(project: &Path) -> Command {
    let mut cmd = Command::new(cargo::cargo_bin!("conductor"));
    cmd.env("XDG_CONFIG_HOME", project.join(".xdg"))
        .env_remove("CONDUCTOR_OFFLINE")
        .env_remove("RUST_LOG")
        .arg("--project")
        .arg(project);
    cmd
}

fn write_config(project: &Path, toml: &str) {
    let dir = project.join(".conductor");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("config.toml"), toml).unwrap();
}

/// A generator that ignores its prompt and emits one passing shell script.
const SH_GENERATOR_CONFIG: &str = r#"
required_tools = []
tick_ms = 0

[isolation]
offline = true

[generator]
command = ["sh", "-c", "cat > /dev/null; printf '# filename: hello.sh\\necho hi\\nexit 0\\n'"]
"#;

#[test]
fn test_help() {
    let temp = TempDir::new().unwrap();
    conductor(temp.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("bounded supervisor"));
}

#[test]
fn test_version() {
    let temp = TempDir::new().unwrap();
    conductor(temp.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_digest_ignores_volatile_values() {
    let temp = TempDir::new().unwrap();
    let a = temp.path().join("a.log");
    let b = temp.path().join("b.log");
    fs::write(&a, "Traceback at 2026-01-01T10:00:00 pid=100 in /home/a/x.py\n").unwrap();
    fs::write(&b, "Traceback at 2026-03-09T23:59:59 pid=999 in /srv/b/y.py\n").unwrap();

    let first = conductor(temp.path()).arg("digest").arg(&a).output().unwrap();
    let second = conductor(temp.path()).arg("digest").arg(&b).output().unwrap();

    assert!(first.status.success());
    assert_eq!(first.stdout, second.stdout);
    assert_eq!(String::from_utf8_lossy(&first.stdout).trim().len(), 64);
}

#[test]
fn test_digest_show_prints_normalized_text() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("out.txt");
    fs::write(&file, "crash at 0xdeadbeef\n").unwrap();

    conductor(temp.path())
        .arg("digest")
        .arg(&file)
        .arg("--show")
        .assert()
        .success()
        .stdout(predicate::str::contains("[HEX_ADDR]"));
}

#[test]
fn test_config_show_reflects_project_file() {
    let temp = TempDir::new().unwrap();
    write_config(temp.path(), "tick_ms = 10\n[guardian]\nmax_iterations = 7\n");

    conductor(temp.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tick_ms = 10"))
        .stdout(predicate::str::contains("max_iterations = 7"))
        .stdout(predicate::str::contains("# project:"));
}

#[test]
fn test_config_show_with_preset() {
    let temp = TempDir::new().unwrap();
    write_config(temp.path(), "[presets.quick]\nmode = \"fast\"\n");

    conductor(temp.path())
        .args(["config", "show", "--preset", "quick"])
        .assert()
        .success()
        .stdout(predicate::str::contains("default_mode = \"fast\""));
}

#[test]
fn test_missing_preset_is_config_error() {
    let temp = TempDir::new().unwrap();
    conductor(temp.path())
        .args(["config", "show", "--preset", "nope"])
        .assert()
        .code(7)
        .stderr(predicate::str::contains("preset 'nope' not found"));
}

#[test]
fn test_invalid_service_url_rejected() {
    let temp = TempDir::new().unwrap();
    write_config(
        temp.path(),
        "[isolation]\nservice_url = \"http://192.0.2.10:8080\"\n",
    );
    conductor(temp.path())
        .args(["config", "show"])
        .assert()
        .code(7)
        .stderr(predicate::str::contains("isolation.service_url"));
}

#[test]
fn test_send_queues_command() {
    let temp = TempDir::new().unwrap();
    conductor(temp.path())
        .args(["send", "checkpoint", "before-tests"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/checkpoint before-tests"));
    conductor(temp.path()).args(["send", "/pause"]).assert().success();

    let inbox = fs::read_to_string(temp.path().join("state/inbox.md")).unwrap();
    assert_eq!(inbox, "/checkpoint before-tests\n/pause\n");
}

#[test]
fn test_send_rejects_unknown_verb() {
    let temp = TempDir::new().unwrap();
    conductor(temp.path())
        .args(["send", "deploy"])
        .assert()
        .failure();
    conductor(temp.path())
        .args(["send", "rollback"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown or incomplete command"));
}

#[test]
fn test_status_without_run() {
    let temp = TempDir::new().unwrap();
    conductor(temp.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No run status"));
    conductor(temp.path())
        .args(["status", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("null"));
}

#[test]
fn test_approve_without_pending_plan_fails() {
    let temp = TempDir::new().unwrap();
    conductor(temp.path())
        .arg("approve")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No plan is awaiting approval"));
}

#[test]
fn test_approve_writes_answer() {
    let temp = TempDir::new().unwrap();
    let state = temp.path().join("state");
    fs::create_dir_all(&state).unwrap();
    fs::write(state.join("pending_approval.md"), "plan").unwrap();

    conductor(temp.path())
        .arg("reject")
        .assert()
        .success()
        .stdout(predicate::str::contains("Plan rejected"));
    assert_eq!(
        fs::read_to_string(state.join("approval")).unwrap().trim(),
        "reject"
    );
}

#[test]
fn test_resume_without_session() {
    let temp = TempDir::new().unwrap();
    write_config(temp.path(), SH_GENERATOR_CONFIG);
    conductor(temp.path())
        .arg("resume")
        .assert()
        .code(5)
        .stderr(predicate::str::contains("Cannot resume"));
}

#[test]
fn test_run_without_generator_is_config_error() {
    let temp = TempDir::new().unwrap();
    write_config(temp.path(), "required_tools = []\n");
    conductor(temp.path())
        .args(["run", "--prompt", "anything"])
        .assert()
        .code(7)
        .stderr(predicate::str::contains("generator.command is not configured"));
}

#[test]
fn test_run_with_missing_tool() {
    let temp = TempDir::new().unwrap();
    write_config(
        temp.path(),
        "required_tools = [\"definitely-not-installed-xyz\"]\n",
    );
    conductor(temp.path())
        .args(["run", "--prompt", "anything"])
        .assert()
        .code(6)
        .stderr(predicate::str::contains("definitely-not-installed-xyz"));
}

#[cfg(unix)]
#[test]
fn test_fast_run_end_to_end() {
    let temp = TempDir::new().unwrap();
    write_config(temp.path(), SH_GENERATOR_CONFIG);

    conductor(temp.path())
        .args(["run", "--prompt", "say hi", "--mode", "fast"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Run complete"));

    assert!(temp.path().join("state/plan.md").exists());
    let status = fs::read_to_string(temp.path().join("state/status.json")).unwrap();
    assert!(status.contains("\"complete\""));

    let activity = fs::read_to_string(temp.path().join("logs/activity.jsonl")).unwrap();
    assert!(activity.contains("\"STARTED\""));
    assert!(activity.contains("\"COMPLETED\""));

    let persisted: Vec<_> = walk_files(&temp.path().join("tests"))
        .into_iter()
        .filter(|p| p.ends_with("hello.sh"))
        .collect();
    assert_eq!(persisted.len(), 1);

    conductor(temp.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("complete"));
}

#[cfg(unix)]
#[test]
fn test_run_hits_iteration_ceiling() {
    let temp = TempDir::new().unwrap();
    write_config(temp.path(), SH_GENERATOR_CONFIG);

    conductor(temp.path())
        .args(["run", "--prompt", "say hi", "--mode", "fast", "--max-iterations", "0"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("iteration ceiling"));
}

fn walk_files(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut files = Vec::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return files;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            files.extend(walk_files(&path));
        } else {
            files.push(path);
        }
    }
    files
}
