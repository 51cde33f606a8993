//! Integration tests for the `netrules` CLI binary.
//!
//! Zone-backed tests run in dry-run mode against a small zone file, so no
//! router agent is ever contacted.
#![allow(clippy::unwrap_used)]

use std::io::Write as _;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::NamedTempFile;

const ACCOUNT_UUID: &str = "5d1f0c6e-2a4b-4c1e-9d7a-0b3c2e1f4a01";
const NETWORK_UUID: &str = "5d1f0c6e-2a4b-4c1e-9d7a-0b3c2e1f4a02";
const IP_UUID: &str = "5d1f0c6e-2a4b-4c1e-9d7a-0b3c2e1f4a03";
const WEB_UUID: &str = "5d1f0c6e-2a4b-4c1e-9d7a-0b3c2e1f4a04";

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `netrules` binary with env isolation.
///
/// Clears all `NETRULES_*` env vars and points config directories at a
/// nonexistent path so tests never touch the user's real configuration.
fn netrules_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("netrules");
    cmd.env("HOME", "/tmp/netrules-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/netrules-cli-test-nonexistent")
        .env_remove("NETRULES_ZONE")
        .env_remove("NETRULES_ACCOUNT")
        .env_remove("NETRULES_CONFIG")
        .env_remove("NETRULES_OUTPUT")
        .env_remove("NETRULES_VPN_PASSWORD")
        .env_remove("NETRULES_VM_PASSWORD")
        .env_remove("RUST_LOG");
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

/// One isolated guest network behind a running router, a public address
/// associated with it, and a web VM at 192.168.1.10.
fn zone_yaml() -> String {
    format!(
        r"accounts:
  - id: 1
    uuid: {ACCOUNT_UUID}
    name: tenant
    domain_id: 1
    role: user
networks:
  - id: 1
    uuid: {NETWORK_UUID}
    name: guest
    zone_type: advanced
    guest_type: isolated
    account_id: 1
    domain_id: 1
    cidr: 192.168.1.0/24
    gateway: 192.168.1.1
    vlan_tag: vlan://100
routers:
  - id: 1
    uuid: 5d1f0c6e-2a4b-4c1e-9d7a-0b3c2e1f4a05
    name: r-1-VM
    control_ip: 169.254.3.1
    state: running
    role: standalone
    network_ids: [1]
vms:
  - id: 10
    uuid: {WEB_UUID}
    name: web
    state: running
    account_id: 1
    domain_id: 1
nics:
  - id: 110
    owner:
      type: vm
      id: 10
    kind: guest
    network_id: 1
    ip: 192.168.1.10
    netmask: 255.255.255.0
    gateway: 192.168.1.1
    mac: 02:00:00:00:00:6e
    vlan_tag: vlan://100
    is_default: true
ip_addresses:
  - id: 1
    uuid: {IP_UUID}
    address: 10.0.0.5
    state: allocated
    vlan:
      tag: vlan://20
      gateway: 10.0.0.1
      netmask: 255.255.255.0
    associated_with_network: 1
    account_id: 1
    domain_id: 1
"
    )
}

fn zone_file() -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(zone_yaml().as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = netrules_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    netrules_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("port-forward")
            .and(predicate::str::contains("firewall"))
            .and(predicate::str::contains("load-balancer"))
            .and(predicate::str::contains("acl")),
    );
}

#[test]
fn test_version_flag() {
    netrules_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("netrules"));
}

#[test]
fn test_invalid_subcommand() {
    let output = netrules_cmd().arg("frobnicate").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_dry_run_conflicts_with_write() {
    let output = netrules_cmd()
        .args(["--dry-run", "--write", "ip", "list"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    netrules_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_completions_zsh() {
    netrules_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honours_flag() {
    netrules_cmd()
        .args(["--config", "/tmp/netrules-cli-test-nonexistent/cfg.toml"])
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cfg.toml"));
}

#[test]
fn test_config_init_refuses_to_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let path = path.to_str().unwrap();

    netrules_cmd()
        .args(["--config", path, "config", "init"])
        .assert()
        .success();
    assert!(std::path::Path::new(path).exists());

    let output = netrules_cmd()
        .args(["--config", path, "config", "init"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("--force"));
}

// ── Zone-backed commands ────────────────────────────────────────────

#[test]
fn test_missing_zone_is_a_usage_error() {
    let output = netrules_cmd().args(["ip", "list"]).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let text = combined_output(&output);
    assert!(text.contains("zone"), "Expected a zone hint:\n{text}");
}

#[test]
fn test_ip_list_reads_zone() {
    let zone = zone_file();
    netrules_cmd()
        .arg("--zone")
        .arg(zone.path())
        .args(["-o", "json", "ip", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("10.0.0.5").and(predicate::str::contains(IP_UUID)));
}

#[test]
fn test_rules_list_empty_zone() {
    let zone = zone_file();
    netrules_cmd()
        .arg("--zone")
        .arg(zone.path())
        .args(["-o", "json", "rules", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

#[test]
fn test_dry_run_port_forward_records_router_commands() {
    let zone = zone_file();
    let before = std::fs::read_to_string(zone.path()).unwrap();

    netrules_cmd()
        .arg("--zone")
        .arg(zone.path())
        .args(["--dry-run", "pf", "create"])
        .args(["--ip", IP_UUID, "--vm", WEB_UUID, "--public-port", "22"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("SetPortForwardingRules")
                .and(predicate::str::contains("169.254.3.1")),
        );

    // Dry runs never touch the zone file.
    assert_eq!(std::fs::read_to_string(zone.path()).unwrap(), before);
}

#[test]
fn test_account_selector_by_name() {
    let zone = zone_file();
    netrules_cmd()
        .arg("--zone")
        .arg(zone.path())
        .args(["--account", "tenant", "-o", "plain", "ip", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("10.0.0.5"));
}

#[test]
fn test_unknown_account() {
    let zone = zone_file();
    let output = netrules_cmd()
        .arg("--zone")
        .arg(zone.path())
        .args(["--account", "nobody", "ip", "list"])
        .output()
        .unwrap();
    assert_ne!(output.status.code(), Some(0));
    assert!(combined_output(&output).contains("nobody"));
}

#[test]
fn test_unknown_ip_is_not_found() {
    let zone = zone_file();
    let output = netrules_cmd()
        .arg("--zone")
        .arg(zone.path())
        .args(["--dry-run", "pf", "create"])
        .args(["--ip", "5d1f0c6e-2a4b-4c1e-9d7a-0b3c2e1f4aff"])
        .args(["--vm", WEB_UUID, "--public-port", "22"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4), "Expected exit code 4");
}

#[test]
fn test_bad_port_span_is_rejected_by_parser() {
    let zone = zone_file();
    let output = netrules_cmd()
        .arg("--zone")
        .arg(zone.path())
        .args(["--dry-run", "pf", "create"])
        .args(["--ip", IP_UUID, "--vm", WEB_UUID, "--public-port", "90-80"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}
