// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subcommand implementations. Each returns a process exit code.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::info;

use procura_client::navigate::Navigator;
use procura_client::request::{ApiResponse, Method, Part, RequestBody, RequestDescriptor};
use procura_client::token::medium::FileMedium;
use procura_client::token::{SessionStore, TokenStore};
use procura_client::{ApiError, ClientConfig, SessionClient};

use crate::cli::{Cli, Command};

/// Interval at which `keepalive` reports status and marks activity.
const KEEPALIVE_TICK: Duration = Duration::from_secs(60);

/// "Redirect" for a terminal: tell the user to log in again, once.
#[derive(Debug, Default)]
pub struct LoginPrompt {
    shown: AtomicBool,
}

impl Navigator for LoginPrompt {
    fn current_path(&self) -> String {
        if self.shown.load(Ordering::Relaxed) { "/login".to_owned() } else { "/".to_owned() }
    }

    fn navigate(&self, _path: &str) {
        if !self.shown.swap(true, Ordering::Relaxed) {
            eprintln!("session ended; run `procura login` to sign in again");
        }
    }
}

/// Client over the session file in the configured state directory.
pub fn open_client(config: &ClientConfig) -> anyhow::Result<SessionClient> {
    let store = SessionStore::with_settings(FileMedium::new(config.session_file()), config.store_settings());
    SessionClient::builder(config.clone())
        .store(Arc::new(store))
        .navigator(Arc::new(LoginPrompt::default()))
        .build()
}

pub async fn run(cli: Cli) -> anyhow::Result<i32> {
    let client = open_client(&cli.client)?;
    let code = match cli.command {
        Command::Login { username, password } => login(&client, &username, &password).await,
        Command::Logout => {
            client.logout().await;
            println!("logged out");
            0
        }
        Command::Status => {
            println!("{}", serde_json::to_string_pretty(&status_report(&client))?);
            0
        }
        Command::Request { method, path, data, query } => {
            let descriptor = build_request(method, &path, data.as_deref(), query)?;
            print_outcome(client.api().execute(descriptor).await)
        }
        Command::Upload { path, file, field, text } => {
            let parts = upload_parts(&file, &field, text).await?;
            print_outcome(client.api().upload(&path, parts).await)
        }
        Command::Keepalive { duration_secs } => {
            keepalive(&client, duration_secs.map(Duration::from_secs)).await
        }
    };
    // Exiting mid-refresh would strand the session file on a refresh token
    // the server has already rotated away.
    if client.queue_status().refreshing {
        client.manual_refresh().await;
    }
    client.dispose();
    Ok(code)
}

async fn login(client: &SessionClient, username: &str, password: &str) -> i32 {
    match client.login(username, password).await {
        Ok(user) => {
            println!("logged in as {} ({})", user.username, user.email);
            0
        }
        Err(e) => {
            eprintln!("error: login failed: {e}");
            1
        }
    }
}

pub fn status_report(client: &SessionClient) -> serde_json::Value {
    serde_json::json!({
        "user": client.user(),
        "session_valid": client.has_valid_session(),
        "refresh": client.status(),
        "queue": client.queue_status(),
    })
}

pub fn build_request(
    method: Method,
    path: &str,
    data: Option<&str>,
    query: Vec<(String, String)>,
) -> anyhow::Result<RequestDescriptor> {
    let mut descriptor = RequestDescriptor::new(method, path);
    descriptor.query = query;
    if let Some(data) = data {
        let value: serde_json::Value =
            serde_json::from_str(data).map_err(|e| anyhow::anyhow!("--data is not valid JSON: {e}"))?;
        descriptor.body = RequestBody::Json(value);
    }
    Ok(descriptor)
}

pub async fn upload_parts(
    file: &Path,
    field: &str,
    text: Vec<(String, String)>,
) -> anyhow::Result<Vec<Part>> {
    let bytes = tokio::fs::read(file)
        .await
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", file.display()))?;
    let mut parts: Vec<Part> =
        text.into_iter().map(|(name, value)| Part::Text { name, value }).collect();
    parts.push(Part::File {
        name: field.to_owned(),
        file_name: file.file_name().map(|n| n.to_string_lossy().into_owned()),
        mime: None,
        bytes: Bytes::from(bytes),
    });
    Ok(parts)
}

fn print_outcome(outcome: Result<ApiResponse, ApiError>) -> i32 {
    match outcome {
        Ok(response) => {
            let text = response.text();
            if !text.is_empty() {
                println!("{text}");
            }
            0
        }
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    }
}

async fn keepalive(client: &SessionClient, duration: Option<Duration>) -> i32 {
    if !client.has_valid_session() {
        eprintln!("error: no session; run `procura login` first");
        return 1;
    }

    let shutdown = CancellationToken::new();
    {
        let sd = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received SIGINT");
            }
            sd.cancel();
        });
    }
    if let Some(duration) = duration {
        let sd = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            sd.cancel();
        });
    }

    let mut ticker = tokio::time::interval(KEEPALIVE_TICK);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if !client.has_valid_session() {
                    eprintln!("error: session ended");
                    return 1;
                }
                // Holding the session open counts as activity.
                TokenStore::touch_activity(client.store().as_ref());
                let status = client.status();
                info!(
                    next_refresh_ms = status.time_until_next_refresh_ms,
                    expires_in_ms = status.time_until_expiry_ms,
                    attempts = status.attempt_count,
                    "session alive"
                );
            }
        }
    }
    0
}

#[cfg(test)]
#[path = "commands_tests.rs"]
mod tests;
