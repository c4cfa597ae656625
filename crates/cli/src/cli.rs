// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use procura_client::request::Method;
use procura_client::ClientConfig;

/// Session-aware command line client for the procurement API.
#[derive(Debug, Parser)]
#[command(name = "procura", version)]
pub struct Cli {
    #[command(flatten)]
    pub client: ClientConfig,

    /// Log format (json or text).
    #[arg(long, env = "PROCURA_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "PROCURA_LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Exchange credentials for a session and persist it
    Login {
        #[arg(long)]
        username: String,
        #[arg(long, env = "PROCURA_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Blacklist the refresh token and forget the session
    Logout,
    /// Print user, session validity and refresh status as JSON
    Status,
    /// Issue an authenticated API call and print the response body
    Request {
        /// GET, POST, PUT, PATCH or DELETE
        method: Method,
        /// Path below the API base URL, e.g. /purchases/requests/
        path: String,
        /// JSON request body
        #[arg(long)]
        data: Option<String>,
        /// Query parameter as key=value (repeatable)
        #[arg(long = "query", value_parser = parse_key_val)]
        query: Vec<(String, String)>,
    },
    /// Upload a file as multipart/form-data
    Upload {
        /// Path below the API base URL, e.g. /documents/
        path: String,
        #[arg(long)]
        file: PathBuf,
        /// Form field name for the file
        #[arg(long, default_value = "file")]
        field: String,
        /// Extra text field as key=value (repeatable)
        #[arg(long = "text", value_parser = parse_key_val)]
        text: Vec<(String, String)>,
    },
    /// Keep the session fresh until Ctrl-C or the duration elapses
    Keepalive {
        #[arg(long)]
        duration_secs: Option<u64>,
    },
}

impl Cli {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.client.validate()?;
        if !matches!(self.log_format.as_str(), "json" | "text") {
            anyhow::bail!("--log-format must be json or text");
        }
        if let Command::Request { data: Some(data), .. } = &self.command {
            serde_json::from_str::<serde_json::Value>(data)
                .map_err(|e| anyhow::anyhow!("--data is not valid JSON: {e}"))?;
        }
        Ok(())
    }
}

pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_owned(), v.to_owned())),
        _ => Err(format!("expected key=value, got {s:?}")),
    }
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
