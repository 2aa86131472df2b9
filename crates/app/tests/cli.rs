//! End-to-end runs of `progressctl` against a throwaway SQLite file.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const HALF_RIGHT: &str =
    r#"[{"questionId":1,"answers":[{"answerId":1}]},{"questionId":2,"answers":[{"answerId":3}]}]"#;

struct Db {
    dir: TempDir,
    url: String,
}

impl Db {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let url = format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("data").join("progress.sqlite3").display()
        );
        Self { dir, url }
    }

    fn cmd(&self) -> Command {
        #[allow(deprecated)]
        let mut cmd = Command::cargo_bin("progressctl").unwrap();
        cmd.env("RUST_LOG", "warn").arg("--db").arg(&self.url);
        cmd
    }

    fn seeded() -> Self {
        let db = Self::new();
        db.cmd()
            .arg("seed")
            .assert()
            .success()
            .stdout(predicate::str::contains("\"questions\": 4"));
        db
    }
}

#[test]
fn help_lists_subcommands() {
    #[allow(deprecated)]
    Command::cargo_bin("progressctl")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("submit"))
        .stdout(predicate::str::contains("retake-status"));
}

#[test]
fn migrate_creates_the_database_directory() {
    let db = Db::new();
    db.cmd()
        .arg("migrate")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"migrated\": true"));
    assert!(db.dir.path().join("data").join("progress.sqlite3").exists());
}

#[test]
fn submit_scores_and_rejects_a_second_attempt() {
    let db = Db::seeded();
    db.cmd()
        .args(["enroll", "--course", "1", "--student", "7"])
        .assert()
        .success();

    db.cmd()
        .args(["submit", "--lesson", "2", "--student", "7", "--answers", HALF_RIGHT])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"score\": 50"))
        .stdout(predicate::str::contains("\"isPassed\": true"));

    db.cmd()
        .args(["submit", "--lesson", "2", "--student", "7", "--answers", HALF_RIGHT])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("already"));

    db.cmd()
        .args(["retake-status", "--lesson", "2", "--student", "7"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\": \"cooling_down\""));

    db.cmd()
        .args(["results", "--course", "1", "--passed", "true"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"score\": 50"));
}

#[test]
fn paid_quiz_needs_enrollment() {
    let db = Db::seeded();
    db.cmd()
        .args(["submit", "--lesson", "2", "--student", "8", "--answers", HALF_RIGHT])
        .assert()
        .code(1);
}

#[test]
fn malformed_answers_are_reported() {
    let db = Db::seeded();
    db.cmd()
        .args(["submit", "--lesson", "2", "--student", "7", "--answers", "not json"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("parsing --answers"));
}

#[test]
fn invalid_ids_are_rejected_by_the_parser() {
    let db = Db::new();
    db.cmd()
        .args(["stats", "--course", "first"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("CourseId"));
}
