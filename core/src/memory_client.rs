//! The Memory Client (§2 L2, §3 "Fact"/"Episode"/"Sovereign File"): durable
//! facts, episodes, sovereign files, and the dispatch target for every
//! [`InternalToolCall`](crate::tool_executor::InternalToolCall) the Tool
//! Executor doesn't hand off to MCP.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::error::StateStoreError;
use crate::state_store::{FactRow, SqliteStateStore};
use crate::tool_executor::InternalToolCall;

/// Confidence update deltas (§3 "Fact" lifecycle): "+0.1 on supported, -0.3
/// on contradicted, clamped to [0.1, 0.9] except ground-truth=0.95+".
pub const CONFIDENCE_SUPPORTED_DELTA: f64 = 0.1;
pub const CONFIDENCE_CONTRADICTED_DELTA: f64 = -0.3;
pub const CONFIDENCE_MIN: f64 = 0.1;
pub const CONFIDENCE_MAX: f64 = 0.9;
pub const CONFIDENCE_GROUND_TRUTH_FLOOR: f64 = 0.95;

/// Clamps a confidence adjustment per §3's lifecycle rule. `ground_truth`
/// lifts the ceiling to allow values >= 0.95.
pub fn clamp_confidence(value: f64, ground_truth: bool) -> f64 {
    if ground_truth {
        value.clamp(CONFIDENCE_GROUND_TRUTH_FLOOR, 1.0)
    } else {
        value.clamp(CONFIDENCE_MIN, CONFIDENCE_MAX)
    }
}

/// A markdown file on disk whose canonical content the sovereign-file mirror
/// caches in the state store (§3 "Sovereign File", GLOSSARY).
#[derive(Debug, Clone)]
pub struct SovereignFile {
    pub kb_id: String,
    pub content: String,
    pub last_synced: i64,
}

/// Submits ingested documents to the retrieval backend (§4.3 "Submission"),
/// and knowledge-graph entities/relations (§4.3). Out-of-scope per spec.md
/// §1 ("the retrieval-backend implementation"); this trait is the contract,
/// with an HTTP-POST default.
#[async_trait]
pub trait IngestSink: Send + Sync {
    async fn ingest_document(
        &self,
        filename: &str,
        content: &str,
        kb_id: &str,
        metadata: Value,
        prepend_text: &str,
    ) -> Result<(), String>;

    async fn ingest_graph(&self, entities: Value, relations: Value) -> Result<(), String>;

    /// `semantic_search` internal tool (§4.2 interceptor "Privacy" names it
    /// as a read tool); out of scope per spec.md §1, contract only.
    async fn semantic_search(&self, query: &str, kb_id: &str) -> Result<Value, String>;
}

/// Default `IngestSink`: posts to `{base_url}/ingest` and `/ingest/graph`
/// (§4.3 "Submission"). No-op base url ("") degrades to a logged no-op
/// rather than erroring, matching §7's "degrade gracefully" policy.
pub struct HttpIngestSink {
    client: reqwest::Client,
    base_url: String,
}

impl HttpIngestSink {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl IngestSink for HttpIngestSink {
    async fn ingest_document(
        &self,
        filename: &str,
        content: &str,
        kb_id: &str,
        metadata: Value,
        prepend_text: &str,
    ) -> Result<(), String> {
        if self.base_url.is_empty() {
            tracing::warn!(filename, "no retrieval backend configured, skipping /ingest");
            return Ok(());
        }
        let body = json!({
            "filename": filename,
            "content": content,
            "kb_id": kb_id,
            "metadata": metadata,
            "prepend_text": prepend_text,
        });
        self.client
            .post(format!("{}/ingest", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn ingest_graph(&self, entities: Value, relations: Value) -> Result<(), String> {
        if self.base_url.is_empty() {
            return Ok(());
        }
        if entities.as_array().map(|a| a.is_empty()).unwrap_or(true) {
            return Ok(());
        }
        let body = json!({ "entities": entities, "relations": relations });
        self.client
            .post(format!("{}/ingest/graph", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn semantic_search(&self, query: &str, kb_id: &str) -> Result<Value, String> {
        if self.base_url.is_empty() {
            return Ok(json!({ "results": [] }));
        }
        let resp = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[("q", query), ("kb_id", kb_id)])
            .send()
            .await
            .map_err(|e| e.to_string())?;
        resp.json::<Value>().await.map_err(|e| e.to_string())
    }
}

/// Durable store of facts, episodes, and sovereign files (§2 L2 "Memory
/// Client"), and the dispatch target for internal tool calls. Owns the
/// sovereign-file in-memory cache exclusively (disk is the source of
/// truth, per GLOSSARY "Sovereign file").
pub struct MemoryClient {
    store: Arc<SqliteStateStore>,
    sink: Arc<dyn IngestSink>,
    sovereign_files: RwLock<HashMap<String, SovereignFile>>,
}

impl MemoryClient {
    pub fn new(store: Arc<SqliteStateStore>, sink: Arc<dyn IngestSink>) -> Self {
        Self {
            store,
            sink,
            sovereign_files: RwLock::new(HashMap::new()),
        }
    }

    /// Write path for the ingestor (§4.3, GLOSSARY "disk is the source of
    /// truth; the store is the read cache"): mirrors on-disk markdown into
    /// both the in-memory cache and the state store on mtime change.
    pub async fn sync_sovereign_file(
        &self,
        kb_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<(), StateStoreError> {
        let kb_id = kb_id.into();
        let content = content.into();
        let now = crate::state_store::model::now_unix();
        self.store
            .config_set(
                &format!("sovereign_file::{kb_id}"),
                json!({ "content": content, "last_synced": now }),
                "ingestor",
            )
            .await?;
        self.sovereign_files.write().await.insert(
            kb_id.clone(),
            SovereignFile {
                kb_id,
                content,
                last_synced: now,
            },
        );
        Ok(())
    }

    /// Read path for the agent's context injection (§3 "read by agent for
    /// context injection").
    pub async fn get_sovereign_file(&self, kb_id: &str) -> Option<SovereignFile> {
        self.sovereign_files.read().await.get(kb_id).cloned()
    }

    pub async fn store_fact(
        &self,
        entity: &str,
        relation: &str,
        target: &str,
        context: &str,
        confidence: f64,
        kb_id: &str,
    ) -> Result<(), StateStoreError> {
        self.store
            .fact_upsert(entity, relation, target, context, confidence, kb_id)
            .await
    }

    pub async fn query_facts(&self, kb_id: &str) -> Result<Vec<FactRow>, StateStoreError> {
        self.store.fact_query(kb_id).await
    }

    /// Audit-task confidence adjustment (§3 "Fact" lifecycle): `supported`
    /// applies `+0.1`, otherwise `-0.3`; the state store itself clamps to
    /// `[0.1, 0.9]` unless the fact is already ground-truth (`>= 0.95`),
    /// matching [`clamp_confidence`]'s rule.
    pub async fn adjust_fact_confidence(
        &self,
        id: i64,
        supported: bool,
    ) -> Result<(), StateStoreError> {
        let delta = if supported {
            CONFIDENCE_SUPPORTED_DELTA
        } else {
            CONFIDENCE_CONTRADICTED_DELTA
        };
        self.store.fact_adjust_confidence(id, delta).await
    }

    pub async fn record_episode(
        &self,
        request_id: &str,
        messages: Value,
    ) -> Result<i64, StateStoreError> {
        self.store.episode_insert(request_id, messages).await
    }

    /// Routes an [`InternalToolCall`] to its handler. `read_resource` and
    /// `semantic_search` are read paths; `store_fact`/`delete_fact`/
    /// `update_fact`/`ingest_file` are writes the Write-Own interceptor has
    /// already stamped with the caller's `kb_id` by the time this runs.
    pub async fn dispatch_internal(&self, call: InternalToolCall) -> Result<Value, String> {
        match call {
            InternalToolCall::StoreFact {
                entity,
                relation,
                target,
                context,
                confidence,
                kb_id,
            } => {
                self.store_fact(&entity, &relation, &target, &context, confidence, &kb_id)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(json!({ "stored": true, "kb_id": kb_id }))
            }
            InternalToolCall::QueryFacts { kb_id, entity } => {
                let mut rows = self.query_facts(&kb_id).await.map_err(|e| e.to_string())?;
                if let Some(entity) = entity {
                    rows.retain(|r| r.entity == entity);
                }
                serde_json::to_value(rows).map_err(|e| e.to_string())
            }
            InternalToolCall::DeleteFact { id, .. } => {
                self.store.fact_delete(id).await.map_err(|e| e.to_string())?;
                Ok(json!({ "deleted": true }))
            }
            InternalToolCall::UpdateFact {
                id,
                context,
                confidence,
                ..
            } => {
                self.store
                    .fact_set_fields(id, context.clone(), confidence)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(json!({ "updated": true, "context": context }))
            }
            InternalToolCall::IngestFile { path, kb_id } => {
                Ok(json!({ "queued": true, "path": path, "kb_id": kb_id }))
            }
            InternalToolCall::SemanticSearch { query, kb_id } => {
                self.sink.semantic_search(&query, &kb_id).await
            }
            InternalToolCall::ReadResource { uri } => self.read_resource(&uri).await,
            InternalToolCall::GetSystemStatus => Ok(json!({ "status": "ok" })),
            InternalToolCall::AskAntigravity { prompt } => {
                Ok(json!({ "delegated_to_agent_loop": true, "prompt": prompt }))
            }
        }
    }

    /// `read_resource` on a `memory://<kb_id>/...` URI (§4.2 "Privacy"
    /// interceptor names this as a read tool it guards).
    async fn read_resource(&self, uri: &str) -> Result<Value, String> {
        if let Some(kb_id) = uri.strip_prefix("memory://") {
            let kb_id = kb_id.split('/').next().unwrap_or(kb_id);
            if let Some(file) = self.get_sovereign_file(kb_id).await {
                return Ok(json!({ "uri": uri, "content": file.content }));
            }
            let facts = self.query_facts(kb_id).await.map_err(|e| e.to_string())?;
            return serde_json::to_value(json!({ "uri": uri, "facts": facts }))
                .map_err(|e| e.to_string());
        }
        Err(format!("unsupported resource uri: {uri}"))
    }

    pub fn ingest_sink(&self) -> Arc<dyn IngestSink> {
        Arc::clone(&self.sink)
    }

    pub fn state_store(&self) -> Arc<SqliteStateStore> {
        Arc::clone(&self.store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_clamps_to_spec_bounds() {
        assert_eq!(clamp_confidence(0.95, false), CONFIDENCE_MAX);
        assert_eq!(clamp_confidence(0.0, false), CONFIDENCE_MIN);
        assert_eq!(clamp_confidence(0.97, true), 0.97);
        assert_eq!(clamp_confidence(0.5, true), CONFIDENCE_GROUND_TRUTH_FLOOR);
    }

    #[tokio::test]
    async fn store_fact_internal_call_dispatches_to_state_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStateStore::new(dir.path().join("state.db")).unwrap());
        let sink = Arc::new(HttpIngestSink::new(""));
        let client = MemoryClient::new(store, sink);

        let result = client
            .dispatch_internal(InternalToolCall::StoreFact {
                entity: "alice".into(),
                relation: "likes".into(),
                target: "rust".into(),
                context: "conversation".into(),
                confidence: 0.5,
                kb_id: "alice".into(),
            })
            .await
            .unwrap();
        assert_eq!(result["stored"], json!(true));

        let facts = client.query_facts("alice").await.unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].entity, "alice");
    }
}
