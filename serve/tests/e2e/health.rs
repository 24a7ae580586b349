//! `GET /health`.

use crate::common::spawn_server;

#[tokio::test]
async fn health_reports_ok_status() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/health", server.base_url))
        .send()
        .await
        .expect("request");

    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.expect("json body");
    assert_eq!(body["ok"], true);
    assert!(body.get("uptime_s").is_some());
    assert!(body.get("internet").is_some());
}

#[tokio::test]
async fn admin_system_status_lists_builtin_scheduler_and_mcp_rollup() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/admin/system-status", server.base_url))
        .send()
        .await
        .expect("request");

    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.expect("json body");
    assert!(body["scheduler"]["tasks"].is_array());
    assert!(body["mcp"]["servers"].is_array());
}
