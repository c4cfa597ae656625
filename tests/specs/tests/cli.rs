// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Drives the compiled `procura` binary against the mock backend. The
//! session persists in a temp state directory between invocations.

use std::path::Path;
use std::process::Output;

use serde_json::Value;
use tokio::process::Command;

use procura_specs::{procura_binary, MockBackend, PASSWORD};

async fn procura(backend: &MockBackend, state_dir: &Path, args: &[&str]) -> anyhow::Result<Output> {
    let output = Command::new(procura_binary())
        .arg("--base-url")
        .arg(backend.base_url())
        .arg("--state-dir")
        .arg(state_dir)
        .args(args)
        .env("PROCURA_PASSWORD", PASSWORD)
        .kill_on_drop(true)
        .output()
        .await?;
    Ok(output)
}

#[tokio::test]
async fn login_status_request_logout() -> anyhow::Result<()> {
    if !procura_binary().exists() {
        eprintln!("skipping: {} not built", procura_binary().display());
        return Ok(());
    }
    let backend = MockBackend::start().await?;
    let dir = tempfile::tempdir()?;

    let login = procura(&backend, dir.path(), &["login", "--username", "alice"]).await?;
    assert!(login.status.success(), "{}", String::from_utf8_lossy(&login.stderr));
    assert!(String::from_utf8_lossy(&login.stdout).contains("logged in as alice"));
    assert!(dir.path().join("session.json").exists());

    let status = procura(&backend, dir.path(), &["status"]).await?;
    assert!(status.status.success());
    let report: Value = serde_json::from_slice(&status.stdout)?;
    assert_eq!(report["session_valid"], true);
    assert_eq!(report["user"]["username"], "alice");

    backend.revoke_access_tokens();
    let request = procura(&backend, dir.path(), &["request", "get", "/purchases/orders/"]).await?;
    assert!(request.status.success(), "{}", String::from_utf8_lossy(&request.stderr));
    let body: Value = serde_json::from_slice(&request.stdout)?;
    assert_eq!(body["results"][0]["id"], 1);
    assert_eq!(backend.refresh_calls(), 1);

    let logout = procura(&backend, dir.path(), &["logout"]).await?;
    assert!(logout.status.success());
    assert_eq!(backend.blacklisted().len(), 1);
    assert!(!dir.path().join("session.json").exists());
    Ok(())
}

#[tokio::test]
async fn request_without_session_fails() -> anyhow::Result<()> {
    if !procura_binary().exists() {
        eprintln!("skipping: {} not built", procura_binary().display());
        return Ok(());
    }
    let backend = MockBackend::start().await?;
    let dir = tempfile::tempdir()?;

    let output = procura(&backend, dir.path(), &["request", "get", "/purchases/orders/"]).await?;
    assert_eq!(output.status.code(), Some(1));
    assert!(!output.stderr.is_empty());
    Ok(())
}

#[tokio::test]
async fn invalid_flags_exit_with_usage_code() -> anyhow::Result<()> {
    if !procura_binary().exists() {
        eprintln!("skipping: {} not built", procura_binary().display());
        return Ok(());
    }
    let backend = MockBackend::start().await?;
    let dir = tempfile::tempdir()?;

    let output = procura(&backend, dir.path(), &["--log-format", "yaml", "status"]).await?;
    assert_eq!(output.status.code(), Some(2));
    Ok(())
}
