//! Integration tests for procflow
//!
//! These drive the compiled binary end to end against real processes.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a procflow Command
fn procflow() -> Command {
    cargo_bin_cmd!("procflow")
}

/// Helper to create a temporary project directory
fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_procflow_help() {
        procflow().arg("--help").assert().success();
    }

    #[test]
    fn test_procflow_version() {
        procflow().arg("--version").assert().success();
    }

    #[test]
    fn test_parallel_requires_commands() {
        procflow().arg("parallel").assert().failure();
    }
}

// =============================================================================
// Single Command Tests
// =============================================================================

#[cfg(unix)]
mod run {
    use super::*;

    #[test]
    fn test_run_prints_stdout() {
        let dir = create_temp_project();
        procflow()
            .current_dir(dir.path())
            .args(["run", "echo hello"])
            .assert()
            .success()
            .stdout(predicate::str::contains("hello"));
    }

    #[test]
    fn test_run_mirrors_exit_code() {
        let dir = create_temp_project();
        procflow()
            .current_dir(dir.path())
            .args(["run", "--shell", "exit 3"])
            .assert()
            .code(3);
    }

    #[test]
    fn test_run_in_directory() {
        let dir = create_temp_project();
        fs::write(dir.path().join("marker.txt"), "x").unwrap();
        procflow()
            .args(["run", "ls", "--cwd"])
            .arg(dir.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("marker.txt"));
    }

    #[test]
    fn test_run_timeout() {
        let dir = create_temp_project();
        procflow()
            .current_dir(dir.path())
            .args(["run", "sleep 5", "--timeout", "1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("timed out"));
    }

    #[test]
    fn test_run_stream() {
        let dir = create_temp_project();
        procflow()
            .current_dir(dir.path())
            .args(["run", "--shell", "--stream", "echo one; echo two"])
            .assert()
            .success()
            .stdout(predicate::str::contains("one").and(predicate::str::contains("two")));
    }

    #[test]
    fn test_run_retry_until_success() {
        let dir = create_temp_project();
        let script = "c=$(cat count 2>/dev/null || echo 0); c=$((c+1)); echo $c > count; [ $c -ge 2 ]";
        procflow()
            .current_dir(dir.path())
            .args(["run", "--shell", "--retry", "3", "--retry-delay", "10", script])
            .assert()
            .success();
        assert_eq!(fs::read_to_string(dir.path().join("count")).unwrap().trim(), "2");
    }

    #[test]
    fn test_exists() {
        procflow().args(["exists", "sh"]).assert().success();
        procflow()
            .args(["exists", "definitely-not-a-real-binary-xyz"])
            .assert()
            .code(1);
    }
}

// =============================================================================
// Batch Tests
// =============================================================================

#[cfg(unix)]
mod batches {
    use super::*;

    #[test]
    fn test_parallel_keeps_all_results() {
        procflow()
            .args(["parallel", "echo 1", "false", "echo 3"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("[echo 1] 1"))
            .stdout(predicate::str::contains("[echo 3] 3"))
            .stderr(predicate::str::contains("2/3 succeeded"));
    }

    #[test]
    fn test_parallel_all_successful() {
        procflow()
            .args(["parallel", "echo a", "echo b"])
            .assert()
            .success();
    }

    #[test]
    fn test_sequence_stops_on_failure() {
        procflow()
            .args(["sequence", "--shell", "echo a", "exit 1", "echo c"])
            .assert()
            .code(1)
            .stdout(predicate::str::contains("[echo a] a"))
            .stdout(predicate::str::contains("[echo c]").not());
    }

    #[test]
    fn test_sequence_continue_on_error() {
        procflow()
            .args([
                "sequence",
                "--shell",
                "--continue-on-error",
                "echo a",
                "exit 1",
                "echo c",
            ])
            .assert()
            .failure()
            .stdout(predicate::str::contains("[echo c] c"));
    }

    #[test]
    fn test_sequence_pipe() {
        procflow()
            .args(["sequence", "--pipe", "echo hello", "tr a-z A-Z"])
            .assert()
            .success()
            .stdout(predicate::str::contains("HELLO"));
    }

    #[test]
    fn test_sequence_transaction_runs_rollback() {
        let dir = create_temp_project();
        procflow()
            .current_dir(dir.path())
            .args([
                "sequence",
                "--shell",
                "--transaction",
                "--rollback",
                "touch rolled_back",
                "touch step1",
                "exit 4",
            ])
            .assert()
            .code(4)
            .stderr(predicate::str::contains("Transaction rolled back"));

        assert!(dir.path().join("step1").exists());
        assert!(dir.path().join("rolled_back").exists());
    }
}

// =============================================================================
// Template Tests
// =============================================================================

mod templates {
    use super::*;

    #[test]
    fn test_list_builtin_templates() {
        let dir = create_temp_project();
        procflow()
            .current_dir(dir.path())
            .arg("templates")
            .assert()
            .success()
            .stdout(predicate::str::contains("docker-build"))
            .stdout(predicate::str::contains("git-commit"));
    }

    #[test]
    fn test_dry_run_expands_template() {
        let dir = create_temp_project();
        procflow()
            .current_dir(dir.path())
            .args(["template", "git-commit", "message=fix build", "--dry-run"])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#"git commit -m "fix build""#));
    }

    #[test]
    fn test_missing_required_parameter() {
        let dir = create_temp_project();
        procflow()
            .current_dir(dir.path())
            .args(["template", "docker-build", "--dry-run"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid parameters for template 'docker-build'"));
    }

    #[test]
    fn test_unknown_template() {
        let dir = create_temp_project();
        procflow()
            .current_dir(dir.path())
            .args(["template", "nope"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Template 'nope' not found"));
    }

    #[test]
    fn test_config_template() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".procflow")).unwrap();
        fs::write(
            dir.path().join(".procflow/procflow.toml"),
            r#"
[[templates]]
name = "greet"
command = "echo hello {{who}}"

[templates.defaults]
who = "world"
"#,
        )
        .unwrap();

        procflow()
            .current_dir(dir.path())
            .args(["template", "greet", "--dry-run"])
            .assert()
            .success()
            .stdout(predicate::str::contains("echo hello world"));

        procflow()
            .args(["--project-dir"])
            .arg(dir.path())
            .args(["template", "greet", "who=procflow"])
            .assert()
            .success()
            .stdout(predicate::str::contains("hello procflow"));
    }

    #[test]
    fn test_invalid_config_is_reported() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".procflow")).unwrap();
        fs::write(dir.path().join(".procflow/procflow.toml"), "[client\n").unwrap();

        procflow()
            .current_dir(dir.path())
            .arg("templates")
            .assert()
            .failure()
            .stderr(predicate::str::contains("procflow.toml"));
    }
}
