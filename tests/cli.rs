//! CLI test cases.
//!
//! Anything touching PostgreSQL, object storage, or an LLM endpoint is
//! `#[ignore]`d so the default test run stays hermetic.

use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;

/// Create a new `Command` with our binary.
fn cmd() -> Command {
    Command::cargo_bin("menu-pipeline").unwrap()
}

#[test]
fn test_help() {
    cmd().arg("--help").assert().success();
}

#[test]
fn test_version() {
    cmd().arg("--version").assert().success();
}

#[test]
fn test_retry_requires_a_uuid() {
    cmd()
        .arg("retry")
        .arg("not-a-uuid")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn test_retry_requires_database_url() {
    cmd()
        .env_remove("DATABASE_URL")
        .arg("retry")
        .arg("4fa4e7b3-7a85-4f26-9a9d-2c6cf0b9f2d0")
        .assert()
        .failure()
        .stderr(predicate::str::contains("DATABASE_URL"));
}

#[test]
#[ignore = "Requires a PostgreSQL database"]
fn test_migrate() {
    cmd().arg("migrate").assert().success();
}
