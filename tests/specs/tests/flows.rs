// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end flows against the mock backend over real HTTP.

use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;

use procura_client::request::Part;
use procura_client::token::TokenStore;
use procura_client::ApiError;
use procura_specs::{wait_for, MockBackend, PASSWORD};

const ORDERS: &str = "/purchases/orders/";
const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn login_then_authenticated_call() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    let client = backend.client()?;

    let user = client.login("alice", PASSWORD).await?;
    assert_eq!(user.username, "alice");
    assert!(client.has_valid_session());

    let body: Value = client.api().get_json(ORDERS).await?;
    assert_eq!(body["results"][0]["status"], "open");
    assert_eq!(backend.refresh_calls(), 0);

    client.dispose();
    Ok(())
}

#[tokio::test]
async fn wrong_password_is_rejected() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    let client = backend.client()?;

    let err = client.login("alice", "hunter2").await.err();
    assert_eq!(err.as_ref().and_then(ApiError::status), Some(401));
    assert!(!client.has_valid_session());
    assert_eq!(backend.logins(), 0);
    Ok(())
}

#[tokio::test]
async fn expired_access_token_is_refreshed_and_request_replayed() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    let client = backend.client()?;
    client.login("alice", PASSWORD).await?;
    let stale = client.store().access_token();

    backend.revoke_access_tokens();
    let body: Value = client.api().get_json(ORDERS).await?;

    assert_eq!(body["results"][0]["id"], 1);
    assert_eq!(backend.refresh_calls(), 1);
    assert_eq!(backend.order_hits(), 2);
    assert!(client.store().access_token().is_some_and(|t| Some(&t) != stale.as_ref()));

    client.dispose();
    Ok(())
}

#[tokio::test]
async fn concurrent_rejections_share_one_refresh() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    let client = backend.client()?;
    client.login("alice", PASSWORD).await?;

    backend.revoke_access_tokens();
    backend.delay_refresh(Duration::from_millis(200));

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..5 {
        let api = client.api().clone();
        tasks.spawn(async move { api.get(ORDERS).await });
    }
    while let Some(joined) = tasks.join_next().await {
        let response = joined??;
        assert_eq!(response.status, 200);
    }

    assert_eq!(backend.refresh_calls(), 1);
    assert_eq!(client.queue_status().queue_length, 0);

    client.dispose();
    Ok(())
}

#[tokio::test]
async fn rejected_refresh_ends_the_session() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    let client = backend.client()?;
    client.login("alice", PASSWORD).await?;

    backend.revoke_access_tokens();
    backend.reject_refresh();
    let err = client.api().get(ORDERS).await.err();

    assert!(matches!(err, Some(ApiError::Refresh(_) | ApiError::SessionEnded)), "got {err:?}");
    assert!(!client.has_valid_session());
    assert!(client.user().is_none());
    assert!(!client.status().active);
    assert_eq!(backend.refresh_calls(), 1);

    client.dispose();
    Ok(())
}

#[tokio::test]
async fn server_errors_are_retried() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    let client = backend.client()?;
    client.login("alice", PASSWORD).await?;

    backend.fail_orders(2);
    let response = client.api().get(ORDERS).await?;

    assert_eq!(response.status, 200);
    assert_eq!(backend.order_hits(), 3);

    client.dispose();
    Ok(())
}

#[tokio::test]
async fn upload_is_sent_as_multipart() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    let client = backend.client()?;
    client.login("alice", PASSWORD).await?;

    let parts = vec![
        Part::Text { name: "kind".into(), value: "quote".into() },
        Part::File {
            name: "file".into(),
            file_name: Some("quote.pdf".into()),
            mime: Some("application/pdf".into()),
            bytes: Bytes::from_static(b"%PDF-1.7"),
        },
    ];
    let response = client.api().upload("/documents/", parts).await?;

    assert_eq!(response.status, 201);
    let content_types = backend.upload_content_types();
    assert_eq!(content_types.len(), 1);
    assert!(content_types[0].starts_with("multipart/form-data; boundary="), "{content_types:?}");

    client.dispose();
    Ok(())
}

#[tokio::test]
async fn short_lived_token_is_refreshed_proactively() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    backend.set_access_ttl(60);
    let client = backend.client()?;
    client.login("alice", PASSWORD).await?;
    let first = client.store().access_token();

    wait_for(TIMEOUT, || backend.refresh_calls() >= 1).await?;
    wait_for(TIMEOUT, || client.status().last_refresh_at_ms.is_some()).await?;

    assert_ne!(client.store().access_token(), first);
    assert!(client.has_valid_session());

    client.dispose();
    Ok(())
}

#[tokio::test]
async fn logout_blacklists_the_refresh_token() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    let client = backend.client()?;
    client.login("alice", PASSWORD).await?;
    let refresh = client.store().refresh_token();

    client.logout().await;

    assert_eq!(backend.blacklisted(), refresh.into_iter().collect::<Vec<_>>());
    assert!(!client.has_valid_session());
    assert_eq!(backend.refresh_calls(), 0);

    client.dispose();
    Ok(())
}
