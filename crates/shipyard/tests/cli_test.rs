#![allow(deprecated)] // Command::cargo_bin

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const VALID: &str = r#"
application:
  name: myapp
  servers:
    master:
      master: true
    workers:
      count: 2
  app:
    web:
      servers: [master]
      domain: example.com
      subdomain: www
      port: 3000
provider:
  hetzner: { server_type: cx22, server_location: fsn1 }
"#;

fn write_config(contents: &str) -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("shipyard.yaml");
    fs::write(&path, contents).unwrap();
    (dir, path)
}

fn shipyard() -> Command {
    Command::cargo_bin("shipyard").unwrap()
}

#[test]
fn help_lists_every_command() {
    shipyard()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("deploy"))
        .stdout(predicate::str::contains("delete"))
        .stdout(predicate::str::contains("validate"));
}

#[test]
fn delete_help_mentions_strict() {
    shipyard()
        .args(["delete", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--strict"));
}

#[test]
fn offline_validate_accepts_a_good_config() {
    let (_dir, path) = write_config(VALID);

    shipyard()
        .arg("validate")
        .arg("--offline")
        .arg("--config")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("servers.master"))
        .stdout(predicate::str::contains("(master)"))
        .stdout(predicate::str::contains("https://www.example.com"));
}

#[test]
fn branch_renames_the_application() {
    let (_dir, path) = write_config(VALID);

    shipyard()
        .args(["validate", "--offline", "--branch", "feature-x", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("myapp-feature-x"))
        .stdout(predicate::str::contains("https://feature-x-www.example.com"));
}

#[test]
fn validate_rejects_two_masters() {
    let (_dir, path) = write_config(&VALID.replace("count: 2", "master: true"));

    shipyard()
        .args(["validate", "--offline", "--config"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid configuration"));
}

#[test]
fn validate_reports_a_missing_file() {
    let dir = TempDir::new().unwrap();

    shipyard()
        .args(["validate", "--offline", "--config"])
        .arg(dir.path().join("missing.yaml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("config file not found"));
}

#[test]
fn online_validate_needs_a_token() {
    let (_dir, path) = write_config(VALID);

    temp_env::with_var_unset("HCLOUD_TOKEN", || {
        shipyard()
            .env_remove("HCLOUD_TOKEN")
            .args(["validate", "--config"])
            .arg(&path)
            .assert()
            .failure()
            .stderr(predicate::str::contains("HCLOUD_TOKEN"));
    });
}
