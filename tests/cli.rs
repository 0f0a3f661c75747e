// Copyright 2025 Martin Pool

//! End-to-end tests for the CLI surface that don't require a Docker daemon:
//! usage errors, `list-mutants` against a fixture repo, and `resume` against
//! a run directory with no recorded metadata.

use assert_cmd::Command;
use predicates::prelude::*;

const BIN_NAME: &str = "swemutate";

#[test]
fn no_subcommand_is_a_usage_error() {
    Command::cargo_bin(BIN_NAME)
        .unwrap()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn list_mutants_finds_functions_and_methods() {
    Command::cargo_bin(BIN_NAME)
        .unwrap()
        .args(["list-mutants", "--repo", "tests/fixtures/sample_repo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("calculator.py::add"))
        .stdout(predicate::str::contains("calculator.py::Accumulator"))
        .stdout(predicate::str::contains("calculator.py::Accumulator::add"));
}

#[test]
fn list_mutants_json_is_restricted_to_one_file() {
    Command::cargo_bin(BIN_NAME)
        .unwrap()
        .args([
            "list-mutants",
            "--repo",
            "tests/fixtures/sample_repo",
            "--target",
            "calculator.py",
            "--json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"name\": \"add\""));
}

#[test]
fn resume_without_run_meta_fails() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin(BIN_NAME)
        .unwrap()
        .args(["resume", "--out", dir.path().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("run metadata"));
}
