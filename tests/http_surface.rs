// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-ConfluenceMcp-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Confluence MCP and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::sync::Arc;
use std::time::Duration;

use confluence_mcp::confluence::ConfluenceConnector;
use confluence_mcp::convert::Converter;
use confluence_mcp::gateway::rate_limit::RateLimitSettings;
use confluence_mcp::gateway::{self, AppState, GatewaySettings};
use confluence_mcp::mcp::{ConfluenceMcp, ToolContext};
use confluence_mcp::render::ChromiumRenderer;
use confluence_mcp::store::{PageMappingStore, ProjectConfigStore};
use tokio::sync::oneshot;

const KEY: &str = "integration-key";

struct Running {
    base: String,
    stop: Option<oneshot::Sender<()>>,
    server: tokio::task::JoinHandle<std::io::Result<()>>,
    _dir: tempfile::TempDir,
}

async fn start() -> Running {
    let dir = tempfile::tempdir().expect("tempdir");
    let mcp = ConfluenceMcp::new(ToolContext {
        project_config: Arc::new(ProjectConfigStore::open(dir.path().join("config.json"))),
        page_mappings: Arc::new(PageMappingStore::open(dir.path().join("mapping.json"))),
        connector: Arc::new(ConfluenceConnector),
        converter: Arc::new(Converter::new(Arc::new(ChromiumRenderer::default()))),
    });
    let state = AppState::new(
        mcp,
        GatewaySettings {
            api_key: Some(KEY.to_owned()),
            rate_limit: RateLimitSettings { window: Duration::from_secs(60), max_requests: 1_000 },
            trust_proxy: false,
        },
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let base = format!("http://{}", listener.local_addr().expect("addr"));
    let (stop, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(gateway::serve(listener, state, async move {
        let _ = stopped.await;
    }));

    Running { base, stop: Some(stop), server, _dir: dir }
}

#[tokio::test]
async fn health_is_public_and_protected_routes_need_the_key() {
    let mut running = start().await;
    let client = reqwest::Client::new();

    let health = client
        .get(format!("{}/health", running.base))
        .send()
        .await
        .expect("health");
    assert_eq!(health.status(), 200);
    assert_eq!(
        health.headers().get("x-frame-options").and_then(|v| v.to_str().ok()),
        Some("DENY")
    );
    let body: serde_json::Value = health.json().await.expect("json");
    assert_eq!(body, serde_json::json!({ "status": "ok" }));

    let denied = client
        .get(format!("{}/mcp", running.base))
        .send()
        .await
        .expect("stream");
    assert_eq!(denied.status(), 401);

    let unknown = client
        .post(format!("{}/messages?sessionId=missing", running.base))
        .header("x-mcp-api-key", KEY)
        .json(&serde_json::json!({ "jsonrpc": "2.0", "method": "ping", "id": 1 }))
        .send()
        .await
        .expect("message");
    assert_eq!(unknown.status(), 404);
    assert_eq!(unknown.text().await.expect("text"), "Session not found");

    if let Some(stop) = running.stop.take() {
        let _ = stop.send(());
    }
    running.server.await.expect("join").expect("serve");
}

#[tokio::test]
async fn stream_announces_the_message_endpoint() {
    let mut running = start().await;
    let client = reqwest::Client::new();

    let mut stream = client
        .get(format!("{}/mcp?apiKey={KEY}", running.base))
        .send()
        .await
        .expect("stream");
    assert_eq!(stream.status(), 200);

    let mut received = String::new();
    while !received.contains("\n\n") {
        let chunk = tokio::time::timeout(Duration::from_secs(5), stream.chunk())
            .await
            .expect("endpoint event in time")
            .expect("chunk")
            .expect("stream open");
        received.push_str(&String::from_utf8_lossy(&chunk));
    }
    assert!(received.starts_with("event: endpoint\ndata: /messages?sessionId="));

    if let Some(stop) = running.stop.take() {
        let _ = stop.send(());
    }
    drop(stream);
    running.server.await.expect("join").expect("serve");
}
