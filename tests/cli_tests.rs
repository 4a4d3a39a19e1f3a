use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;

const MEMORY_CONFIG: &str = "[database]\nbackend = \"memory\"\n\n[fees]\ntaker_fee = 0.0\n";

fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write temp file");
    path
}

fn oddsmith() -> Command {
    let mut cmd = Command::cargo_bin("oddsmith").expect("binary builds");
    cmd.env_remove("ODDSMITH_DATABASE_URL").env("RUST_LOG", "warn");
    cmd
}

#[test]
fn check_reports_the_backend() {
    let dir = tempfile::tempdir().unwrap();
    let example = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config.example.toml");

    oddsmith()
        .arg("check")
        .arg(&example)
        .env("ODDSMITH_DATABASE_URL", dir.path().join("ledger.db"))
        .assert()
        .success()
        .stdout(predicate::str::contains("config ok: backend=sqlite"));
}

#[test]
fn check_fails_on_invalid_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = write(dir.path(), "bad.toml", "[retry]\nattempts = 0\n");

    oddsmith()
        .arg("check")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("retry.attempts"));
}

#[test]
fn replay_prints_one_line_per_step_and_a_summary() {
    let dir = tempfile::tempdir().unwrap();
    let config = write(dir.path(), "config.toml", MEMORY_CONFIG);
    let script = write(
        dir.path(),
        "script.jsonl",
        r#"{"op":"create_user","id":"alice"}
{"op":"create_user","id":"bob"}
{"op":"grant","user":"alice","amount":500}
{"op":"grant","user":"bob","amount":500}
{"op":"create_market","name":"who","creator":"alice","mechanism":"multi-pool-sum-to-one","ante":100,"answers":["x","y"]}
{"op":"bet","market":"who","user":"bob","outcome":"YES","amount":20,"answer":1}
{"op":"resolve","market":"who","user":"alice","outcome":{"kind":"CHOICE","answer_id":"1"}}
"#,
    );

    let output = oddsmith()
        .arg("replay")
        .arg(&config)
        .arg(&script)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let text = String::from_utf8(output).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 8, "{text}");
    assert!(lines[..7].iter().all(|l| l.contains("\"ok\":true")), "{text}");
    assert!(lines[7].contains("\"failures\":0"), "{text}");
}

#[test]
fn replay_stops_at_the_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    let config = write(dir.path(), "config.toml", MEMORY_CONFIG);
    let script = write(
        dir.path(),
        "script.jsonl",
        r#"{"op":"grant","user":"nobody","amount":5}
{"op":"create_user","id":"late"}
"#,
    );

    oddsmith()
        .arg("replay")
        .arg(&config)
        .arg(&script)
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"ok\":false"))
        .stdout(predicate::str::contains("create_user").not());
}

#[test]
fn replay_keep_going_runs_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let config = write(dir.path(), "config.toml", MEMORY_CONFIG);
    let script = write(
        dir.path(),
        "script.jsonl",
        r#"{"op":"grant","user":"nobody","amount":5}
{"op":"create_user","id":"late"}
"#,
    );

    oddsmith()
        .arg("replay")
        .arg(&config)
        .arg(&script)
        .arg("--keep-going")
        .assert()
        .failure()
        .stdout(predicate::str::contains("create_user"))
        .stdout(predicate::str::contains("\"failures\":1"));
}

#[test]
fn malformed_scripts_are_rejected_before_running() {
    let dir = tempfile::tempdir().unwrap();
    let config = write(dir.path(), "config.toml", MEMORY_CONFIG);
    let script = write(dir.path(), "script.jsonl", "{\"op\":\"teleport\"}\n");

    oddsmith()
        .arg("replay")
        .arg(&config)
        .arg(&script)
        .assert()
        .failure()
        .stderr(predicate::str::contains("line 1"));
}
