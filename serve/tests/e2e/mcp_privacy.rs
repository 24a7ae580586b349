//! A client whose declared identity differs from a private bank's owner
//! gets a JSON-RPC `-32003` permission-denied error from `tools/call`, and
//! the state store is left unchanged.

use std::time::Duration;

use futures::StreamExt;
use serde_json::{json, Value};

use crate::common::spawn_server;

/// Pulls the next complete `event: .. \n data: .. \n\n` SSE frame off the
/// stream, buffering partial reads across chunk boundaries.
async fn next_sse_frame(
    stream: &mut (impl futures::Stream<Item = reqwest::Result<bytes::Bytes>> + Unpin),
    buf: &mut String,
) -> Option<(String, String)> {
    loop {
        if let Some(idx) = buf.find("\n\n") {
            let block = buf[..idx].to_string();
            *buf = buf[idx + 2..].to_string();
            let mut event = "message".to_string();
            let mut data = String::new();
            for line in block.lines() {
                if let Some(rest) = line.strip_prefix("event: ") {
                    event = rest.to_string();
                } else if let Some(rest) = line.strip_prefix("data: ") {
                    data.push_str(rest);
                }
            }
            return Some((event, data));
        }
        match tokio::time::timeout(Duration::from_secs(5), stream.next()).await {
            Ok(Some(Ok(chunk))) => buf.push_str(&String::from_utf8_lossy(&chunk)),
            _ => return None,
        }
    }
}

#[tokio::test]
async fn private_bank_read_denied_for_non_owner() {
    let server = spawn_server().await;

    server
        .ctx
        .state_store
        .config_set(
            "bank:k_alice",
            json!({ "is_private": true, "owner": "alice" }),
            "test",
        )
        .await
        .expect("seed bank config");

    let client = reqwest::Client::new();
    let sse_resp = client
        .get(format!("{}/mcp/sse", server.base_url))
        .send()
        .await
        .expect("sse connect");
    assert!(sse_resp.status().is_success());
    let mut stream = sse_resp.bytes_stream();
    let mut buf = String::new();

    let (event, data) = next_sse_frame(&mut stream, &mut buf)
        .await
        .expect("endpoint event");
    assert_eq!(event, "endpoint");
    let endpoint: Value = serde_json::from_str(&data).expect("endpoint json");
    let uri = endpoint["uri"].as_str().expect("uri field").to_string();
    let post_url = format!("{}{}", server.base_url, uri);

    // Declare identity "bob" via `initialize`.
    client
        .post(&post_url)
        .json(&json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": { "clientInfo": { "name": "bob" } }
        }))
        .send()
        .await
        .expect("initialize post");
    let (_event, _data) = next_sse_frame(&mut stream, &mut buf)
        .await
        .expect("initialize reply");

    // bob reads alice's private bank.
    client
        .post(&post_url)
        .json(&json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": { "name": "query_facts", "arguments": { "kb_id": "k_alice" } }
        }))
        .send()
        .await
        .expect("tools/call post");
    let (_event, data) = next_sse_frame(&mut stream, &mut buf)
        .await
        .expect("tools/call reply");
    let reply: Value = serde_json::from_str(&data).expect("reply json");

    assert_eq!(reply["error"]["code"], -32003);
    assert!(reply.get("result").is_none());

    // No fact rows were created or exposed as a side effect of the denied call.
    let facts = server
        .ctx
        .state_store
        .fact_query("k_alice")
        .await
        .expect("fact query");
    assert!(facts.is_empty());
}

#[tokio::test]
async fn owner_can_read_their_own_private_bank() {
    let server = spawn_server().await;

    server
        .ctx
        .state_store
        .config_set(
            "bank:k_alice",
            json!({ "is_private": true, "owner": "alice" }),
            "test",
        )
        .await
        .expect("seed bank config");

    let client = reqwest::Client::new();
    let sse_resp = client
        .get(format!("{}/mcp/sse", server.base_url))
        .send()
        .await
        .expect("sse connect");
    let mut stream = sse_resp.bytes_stream();
    let mut buf = String::new();
    let (_event, data) = next_sse_frame(&mut stream, &mut buf)
        .await
        .expect("endpoint event");
    let endpoint: Value = serde_json::from_str(&data).expect("endpoint json");
    let post_url = format!("{}{}", server.base_url, endpoint["uri"].as_str().unwrap());

    client
        .post(&post_url)
        .json(&json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": { "clientInfo": { "name": "alice" } }
        }))
        .send()
        .await
        .expect("initialize post");
    next_sse_frame(&mut stream, &mut buf).await.expect("initialize reply");

    client
        .post(&post_url)
        .json(&json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": { "name": "query_facts", "arguments": { "kb_id": "k_alice" } }
        }))
        .send()
        .await
        .expect("tools/call post");
    let (_event, data) = next_sse_frame(&mut stream, &mut buf)
        .await
        .expect("tools/call reply");
    let reply: Value = serde_json::from_str(&data).expect("reply json");

    assert!(reply.get("error").is_none(), "owner read should succeed: {reply}");
    assert!(reply.get("result").is_some());
}
