// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::*;

#[tokio::test]
async fn siblings_receive_publisher_does_not() -> anyhow::Result<()> {
    let hub = BroadcastHub::default();
    let a = hub.join();
    let b = hub.join();
    let mut a_sub = a.subscribe();
    let mut b_sub = b.subscribe();

    a.publish(AuthEventKind::Refreshed);

    let got = tokio::time::timeout(Duration::from_secs(1), b_sub.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("hub closed"))?;
    assert_eq!(got.kind, AuthEventKind::Refreshed);

    let own = tokio::time::timeout(Duration::from_millis(50), a_sub.recv()).await;
    assert!(own.is_err(), "publisher must not see its own event");
    Ok(())
}

#[tokio::test]
async fn publish_without_listeners_is_ignored() {
    let hub = BroadcastHub::default();
    let a = hub.join();
    a.publish(AuthEventKind::LoggedOut);
    a.publish(AuthEventKind::LoggedIn);
}

#[tokio::test]
async fn lagging_subscriber_skips_missed_events() -> anyhow::Result<()> {
    let hub = BroadcastHub::new(2);
    let a = hub.join();
    let mut b_sub = hub.join().subscribe();

    a.publish(AuthEventKind::LoggedIn);
    a.publish(AuthEventKind::Refreshed);
    a.publish(AuthEventKind::Refreshed);
    a.publish(AuthEventKind::LoggedOut);

    let got = b_sub.recv().await.ok_or_else(|| anyhow::anyhow!("hub closed"))?;
    assert_eq!(got.kind, AuthEventKind::Refreshed);
    let got = b_sub.recv().await.ok_or_else(|| anyhow::anyhow!("hub closed"))?;
    assert_eq!(got.kind, AuthEventKind::LoggedOut);
    Ok(())
}

#[yare::parameterized(
    refreshed = { AuthEventKind::Refreshed, "TOKEN_REFRESH" },
    logged_out = { AuthEventKind::LoggedOut, "LOGOUT" },
    logged_in = { AuthEventKind::LoggedIn, "LOGIN" },
)]
fn wire_names(kind: AuthEventKind, expected: &str) {
    let event = AuthEvent { kind, timestamp_ms: 42 };
    let json = serde_json::to_value(&event).unwrap_or_default();
    assert_eq!(json["type"], expected);
    assert_eq!(json["timestamp_ms"], 42);
}
