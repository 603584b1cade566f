//! Health and metrics endpoint tests.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use mesh_test_utils::TestRoomServer;
use reqwest::StatusCode;
use serde_json::Value;

#[tokio::test]
async fn test_liveness_probe() -> Result<()> {
    let server = TestRoomServer::spawn().await?;

    let response = reqwest::get(format!("{}/health", server.url())).await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    assert_eq!(body["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn test_readiness_follows_health_state() -> Result<()> {
    let server = TestRoomServer::spawn().await?;

    let ready = reqwest::get(format!("{}/ready", server.url())).await?;
    assert_eq!(ready.status(), StatusCode::OK);

    server.health().set_not_ready();
    let draining = reqwest::get(format!("{}/ready", server.url())).await?;
    assert_eq!(draining.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = draining.json().await?;
    assert_eq!(body["status"], "not_ready");

    // Liveness is unaffected.
    let live = reqwest::get(format!("{}/health", server.url())).await?;
    assert_eq!(live.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn test_metrics_endpoint_is_scrapeable() -> Result<()> {
    let server = TestRoomServer::spawn().await?;

    let response = reqwest::get(format!("{}/metrics", server.url())).await?;

    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn test_unknown_route_is_not_found() -> Result<()> {
    let server = TestRoomServer::spawn().await?;

    let response = reqwest::get(format!("{}/api/nothing/here", server.url())).await?;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}
