//! SQLite-backed `StateStore` (L0 of §2). Persistent across process
//! restarts, matching the teacher's `SqliteStore`/`SqliteSaver` pattern: the
//! connection is opened fresh per call inside `spawn_blocking` rather than
//! held live across awaits, so the struct itself is trivially `Send + Sync`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};

use super::model::*;
use crate::error::StateStoreError;

/// Client for the durable key-value and relational records every layer reads
/// and writes (§2 L0 "State Store Client").
pub struct SqliteStateStore {
    db_path: PathBuf,
}

impl SqliteStateStore {
    /// Opens (creating if needed) the database at `path` and ensures every
    /// table from §6 "Persisted state" exists.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StateStoreError> {
        let db_path = path.as_ref().to_path_buf();
        let conn = Connection::open(&db_path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS config_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                source TEXT NOT NULL,
                last_updated INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS system_state (
                item TEXT PRIMARY KEY,
                details TEXT NOT NULL,
                category TEXT NOT NULL,
                last_updated INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS task_def (
                name TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                enabled INTEGER NOT NULL,
                schedule TEXT,
                idle_only INTEGER NOT NULL,
                priority TEXT NOT NULL,
                description TEXT NOT NULL,
                prompt TEXT,
                config TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS mcp_server (
                name TEXT PRIMARY KEY,
                command TEXT NOT NULL,
                args TEXT NOT NULL,
                env TEXT NOT NULL,
                enabled INTEGER NOT NULL,
                core_service INTEGER NOT NULL,
                transport TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS fact (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity TEXT NOT NULL,
                relation TEXT NOT NULL,
                target TEXT NOT NULL,
                context TEXT NOT NULL,
                confidence REAL NOT NULL,
                kb_id TEXT NOT NULL,
                UNIQUE(entity, relation, target, kb_id)
            );
            CREATE TABLE IF NOT EXISTS episode (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                request_id TEXT NOT NULL,
                messages TEXT NOT NULL,
                consolidated INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS ingestion_history (
                file_hash TEXT PRIMARY KEY,
                kb_id TEXT NOT NULL,
                file_path TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                ingested_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS tool_rating (
                tool_name TEXT PRIMARY KEY,
                overall_rating REAL NOT NULL,
                success_rate REAL NOT NULL,
                usage_count INTEGER NOT NULL,
                deprecated INTEGER NOT NULL,
                deprecation_reason TEXT,
                last_evaluated INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS tool_performance (
                tool TEXT PRIMARY KEY,
                success_count INTEGER NOT NULL DEFAULT 0,
                failure_count INTEGER NOT NULL DEFAULT 0,
                reliability_score REAL NOT NULL DEFAULT 1.0,
                last_used INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS sentinel_rules (
                pattern TEXT NOT NULL,
                allowed INTEGER NOT NULL,
                reason TEXT NOT NULL,
                added_at INTEGER NOT NULL,
                source TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self { db_path })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StateStoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StateStoreError> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path)?;
            f(&conn)
        })
        .await
        .map_err(|e| StateStoreError::Pool(e.to_string()))?
    }

    // -- config_state -----------------------------------------------------

    pub async fn config_set(
        &self,
        key: &str,
        value: serde_json::Value,
        source: &str,
    ) -> Result<(), StateStoreError> {
        let key = key.to_string();
        let source = source.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO config_state (key, value, source, last_updated) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, source = excluded.source, last_updated = excluded.last_updated",
                params![key, serde_json::to_string(&value)?, source, now_unix()],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn config_get(&self, key: &str) -> Result<Option<ConfigStateRow>, StateStoreError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT key, value, source, last_updated FROM config_state WHERE key = ?1",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?
            .map(|(key, value, source, last_updated)| {
                Ok(ConfigStateRow {
                    key,
                    value: serde_json::from_str(&value)?,
                    source,
                    last_updated,
                })
            })
            .transpose()
        })
        .await
    }

    // -- system_state -------------------------------------------------------

    pub async fn system_state_put(
        &self,
        item: &str,
        details: serde_json::Value,
        category: &str,
    ) -> Result<(), StateStoreError> {
        let item = item.to_string();
        let category = category.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO system_state (item, details, category, last_updated) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(item) DO UPDATE SET details = excluded.details, category = excluded.category, last_updated = excluded.last_updated",
                params![item, serde_json::to_string(&details)?, category, now_unix()],
            )?;
            Ok(())
        })
        .await
    }

    // -- task_def (hot-reload mirror) ---------------------------------------

    pub async fn task_def_upsert(&self, row: TaskDefRow) -> Result<(), StateStoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO task_def (name, kind, enabled, schedule, idle_only, priority, description, prompt, config)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(name) DO UPDATE SET kind = excluded.kind, enabled = excluded.enabled,
                     schedule = excluded.schedule, idle_only = excluded.idle_only, priority = excluded.priority,
                     description = excluded.description, prompt = excluded.prompt, config = excluded.config",
                params![
                    row.name,
                    row.kind,
                    row.enabled,
                    row.schedule,
                    row.idle_only,
                    row.priority,
                    row.description,
                    row.prompt,
                    serde_json::to_string(&row.config)?
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn task_def_list(&self) -> Result<Vec<TaskDefRow>, StateStoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name, kind, enabled, schedule, idle_only, priority, description, prompt, config FROM task_def",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, bool>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, bool>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, Option<String>>(7)?,
                        row.get::<_, String>(8)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(
                    |(name, kind, enabled, schedule, idle_only, priority, description, prompt, config)| {
                        Ok(TaskDefRow {
                            name,
                            kind,
                            enabled,
                            schedule,
                            idle_only,
                            priority,
                            description,
                            prompt,
                            config: serde_json::from_str(&config)?,
                        })
                    },
                )
                .collect()
        })
        .await
    }

    // -- mcp_server -----------------------------------------------------------

    pub async fn mcp_server_upsert(&self, row: McpServerRow) -> Result<(), StateStoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO mcp_server (name, command, args, env, enabled, core_service, transport)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(name) DO UPDATE SET command = excluded.command, args = excluded.args,
                     env = excluded.env, enabled = excluded.enabled, core_service = excluded.core_service,
                     transport = excluded.transport",
                params![
                    row.name,
                    row.command,
                    serde_json::to_string(&row.args)?,
                    serde_json::to_string(&row.env)?,
                    row.enabled,
                    row.core_service,
                    row.transport
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn mcp_server_list(&self) -> Result<Vec<McpServerRow>, StateStoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name, command, args, env, enabled, core_service, transport FROM mcp_server",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, bool>(4)?,
                        row.get::<_, bool>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|(name, command, args, env, enabled, core_service, transport)| {
                    Ok(McpServerRow {
                        name,
                        command,
                        args: serde_json::from_str(&args)?,
                        env: serde_json::from_str::<HashMap<String, String>>(&env)?,
                        enabled,
                        core_service,
                        transport,
                    })
                })
                .collect()
        })
        .await
    }

    // -- fact ------------------------------------------------------------------

    /// Inserts or updates a fact keyed by `(entity, relation, target, kb_id)`.
    pub async fn fact_upsert(
        &self,
        entity: &str,
        relation: &str,
        target: &str,
        context: &str,
        confidence: f64,
        kb_id: &str,
    ) -> Result<(), StateStoreError> {
        let (entity, relation, target, context, kb_id) = (
            entity.to_string(),
            relation.to_string(),
            target.to_string(),
            context.to_string(),
            kb_id.to_string(),
        );
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO fact (entity, relation, target, context, confidence, kb_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(entity, relation, target, kb_id) DO UPDATE SET
                     context = excluded.context, confidence = excluded.confidence",
                params![entity, relation, target, context, confidence, kb_id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn fact_query(&self, kb_id: &str) -> Result<Vec<FactRow>, StateStoreError> {
        let kb_id = kb_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, entity, relation, target, context, confidence, kb_id FROM fact WHERE kb_id = ?1",
            )?;
            let rows = stmt
                .query_map(params![kb_id], |row| {
                    Ok(FactRow {
                        id: row.get(0)?,
                        entity: row.get(1)?,
                        relation: row.get(2)?,
                        target: row.get(3)?,
                        context: row.get(4)?,
                        confidence: row.get(5)?,
                        kb_id: row.get(6)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Adjusts a fact's confidence, clamping to `[0.1, 0.9]` unless already
    /// ground-truth (`>= 0.95`), per §3 "Fact ... Lifecycle".
    pub async fn fact_adjust_confidence(
        &self,
        id: i64,
        delta: f64,
    ) -> Result<(), StateStoreError> {
        self.with_conn(move |conn| {
            let current: f64 = conn.query_row(
                "SELECT confidence FROM fact WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            let updated = if current >= 0.95 {
                current
            } else {
                (current + delta).clamp(0.1, 0.9)
            };
            conn.execute(
                "UPDATE fact SET confidence = ?1 WHERE id = ?2",
                params![updated, id],
            )?;
            Ok(())
        })
        .await
    }

    /// Direct field update for `update_fact` (sets absolute values rather
    /// than the delta-based adjustment `fact_adjust_confidence` performs for
    /// the audit task).
    pub async fn fact_set_fields(
        &self,
        id: i64,
        context: Option<String>,
        confidence: Option<f64>,
    ) -> Result<(), StateStoreError> {
        self.with_conn(move |conn| {
            if let Some(context) = &context {
                conn.execute(
                    "UPDATE fact SET context = ?1 WHERE id = ?2",
                    params![context, id],
                )?;
            }
            if let Some(confidence) = confidence {
                conn.execute(
                    "UPDATE fact SET confidence = ?1 WHERE id = ?2",
                    params![confidence, id],
                )?;
            }
            Ok(())
        })
        .await
    }

    pub async fn fact_delete(&self, id: i64) -> Result<(), StateStoreError> {
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM fact WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }

    /// Distinct `kb_id`s with at least one fact row, used by the stale-fact
    /// pruner task to iterate every partition rather than just `"default"`.
    pub async fn fact_kb_ids(&self) -> Result<Vec<String>, StateStoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT DISTINCT kb_id FROM fact")?;
            let rows = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(rows)
        })
        .await
    }

    // -- episode ---------------------------------------------------------------

    pub async fn episode_insert(
        &self,
        request_id: &str,
        messages: serde_json::Value,
    ) -> Result<i64, StateStoreError> {
        let request_id = request_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO episode (request_id, messages, consolidated) VALUES (?1, ?2, 0)",
                params![request_id, serde_json::to_string(&messages)?],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn episode_list_unconsolidated(&self) -> Result<Vec<EpisodeRow>, StateStoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, request_id, messages, consolidated FROM episode WHERE consolidated = 0",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, bool>(3)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|(id, request_id, messages, consolidated)| {
                    Ok(EpisodeRow {
                        id,
                        request_id,
                        messages: serde_json::from_str(&messages)?,
                        consolidated,
                    })
                })
                .collect()
        })
        .await
    }

    pub async fn episode_mark_consolidated(&self, id: i64) -> Result<(), StateStoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE episode SET consolidated = 1 WHERE id = ?1",
                params![id],
            )?;
            Ok(())
        })
        .await
    }

    // -- ingestion_history (dedup cache, P6) -------------------------------------

    pub async fn ingestion_history_has(&self, file_hash: &str) -> Result<bool, StateStoreError> {
        let file_hash = file_hash.to_string();
        self.with_conn(move |conn| {
            let found: Option<String> = conn
                .query_row(
                    "SELECT file_hash FROM ingestion_history WHERE file_hash = ?1",
                    params![file_hash],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    /// Inserts the hash row. Uses `INSERT OR IGNORE` so that two concurrent
    /// ingestions of the same file race safely to a single row (P6).
    pub async fn ingestion_history_insert(
        &self,
        row: IngestionHistoryRow,
    ) -> Result<(), StateStoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO ingestion_history (file_hash, kb_id, file_path, file_size, ingested_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![row.file_hash, row.kb_id, row.file_path, row.file_size, row.ingested_at],
            )?;
            Ok(())
        })
        .await
    }

    // -- tool_rating / tool_performance -----------------------------------------

    pub async fn tool_performance_record(
        &self,
        tool: &str,
        success: bool,
    ) -> Result<(), StateStoreError> {
        let tool = tool.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO tool_performance (tool, success_count, failure_count, reliability_score, last_used)
                 VALUES (?1, ?2, ?3, 1.0, ?4)
                 ON CONFLICT(tool) DO UPDATE SET
                     success_count = success_count + excluded.success_count,
                     failure_count = failure_count + excluded.failure_count,
                     last_used = excluded.last_used",
                params![tool, if success { 1 } else { 0 }, if success { 0 } else { 1 }, now_unix()],
            )?;
            conn.execute(
                "UPDATE tool_performance SET reliability_score =
                     CAST(success_count AS REAL) / MAX(1, success_count + failure_count)
                 WHERE tool = ?1",
                params![tool],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn tool_performance_get(
        &self,
        tool: &str,
    ) -> Result<Option<ToolPerformanceRow>, StateStoreError> {
        let tool = tool.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT tool, success_count, failure_count, reliability_score, last_used FROM tool_performance WHERE tool = ?1",
                params![tool],
                |row| {
                    Ok(ToolPerformanceRow {
                        tool: row.get(0)?,
                        success_count: row.get(1)?,
                        failure_count: row.get(2)?,
                        reliability_score: row.get(3)?,
                        last_used: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(StateStoreError::from)
        })
        .await
    }

    // -- sentinel_rules -----------------------------------------------------------

    pub async fn sentinel_rule_insert(&self, row: SentinelRuleRow) -> Result<(), StateStoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO sentinel_rules (pattern, allowed, reason, added_at, source) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![row.pattern, row.allowed, row.reason, row.added_at, row.source],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn sentinel_rule_list(&self) -> Result<Vec<SentinelRuleRow>, StateStoreError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT pattern, allowed, reason, added_at, source FROM sentinel_rules")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(SentinelRuleRow {
                        pattern: row.get(0)?,
                        allowed: row.get(1)?,
                        reason: row.get(2)?,
                        added_at: row.get(3)?,
                        source: row.get(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    // -- tool_rating ----------------------------------------------------------

    /// Upserts the rating row used by the agent engine's tool-ranking step
    /// (§4.5 "deprecated tools filtered unless core").
    pub async fn tool_rating_upsert(&self, row: ToolRatingRow) -> Result<(), StateStoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO tool_rating (tool_name, overall_rating, success_rate, usage_count, deprecated, deprecation_reason, last_evaluated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(tool_name) DO UPDATE SET
                     overall_rating = excluded.overall_rating,
                     success_rate = excluded.success_rate,
                     usage_count = excluded.usage_count,
                     deprecated = excluded.deprecated,
                     deprecation_reason = excluded.deprecation_reason,
                     last_evaluated = excluded.last_evaluated",
                params![
                    row.tool_name,
                    row.overall_rating,
                    row.success_rate,
                    row.usage_count,
                    row.deprecated,
                    row.deprecation_reason,
                    row.last_evaluated,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn tool_rating_get(
        &self,
        tool_name: &str,
    ) -> Result<Option<ToolRatingRow>, StateStoreError> {
        let tool_name = tool_name.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT tool_name, overall_rating, success_rate, usage_count, deprecated, deprecation_reason, last_evaluated
                 FROM tool_rating WHERE tool_name = ?1",
                params![tool_name],
                |row| {
                    Ok(ToolRatingRow {
                        tool_name: row.get(0)?,
                        overall_rating: row.get(1)?,
                        success_rate: row.get(2)?,
                        usage_count: row.get(3)?,
                        deprecated: row.get(4)?,
                        deprecation_reason: row.get(5)?,
                        last_evaluated: row.get(6)?,
                    })
                },
            )
            .optional()
            .map_err(StateStoreError::from)
        })
        .await
    }

    pub async fn tool_rating_list(&self) -> Result<Vec<ToolRatingRow>, StateStoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT tool_name, overall_rating, success_rate, usage_count, deprecated, deprecation_reason, last_evaluated
                 FROM tool_rating",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(ToolRatingRow {
                        tool_name: row.get(0)?,
                        overall_rating: row.get(1)?,
                        success_rate: row.get(2)?,
                        usage_count: row.get(3)?,
                        deprecated: row.get(4)?,
                        deprecation_reason: row.get(5)?,
                        last_evaluated: row.get(6)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_store() -> (SqliteStateStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStateStore::new(dir.path().join("state.db")).unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn config_set_then_get_roundtrips() {
        let (store, _dir) = temp_store().await;
        store
            .config_set("NIGHT_SHIFT_START", serde_json::json!(1), "env")
            .await
            .unwrap();
        let row = store.config_get("NIGHT_SHIFT_START").await.unwrap().unwrap();
        assert_eq!(row.value, serde_json::json!(1));
        assert_eq!(row.source, "env");
    }

    #[tokio::test]
    async fn fact_upsert_is_idempotent_by_natural_key() {
        let (store, _dir) = temp_store().await;
        store
            .fact_upsert("alice", "likes", "rust", "chat", 0.5, "kb1")
            .await
            .unwrap();
        store
            .fact_upsert("alice", "likes", "rust", "chat, again", 0.6, "kb1")
            .await
            .unwrap();
        let rows = store.fact_query("kb1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].confidence, 0.6);
    }

    #[tokio::test]
    async fn fact_kb_ids_lists_each_partition_once() {
        let (store, _dir) = temp_store().await;
        store.fact_upsert("a", "r", "t1", "c", 0.5, "kb1").await.unwrap();
        store.fact_upsert("a", "r", "t2", "c", 0.5, "kb1").await.unwrap();
        store.fact_upsert("a", "r", "t3", "c", 0.5, "kb2").await.unwrap();
        let mut kbs = store.fact_kb_ids().await.unwrap();
        kbs.sort();
        assert_eq!(kbs, vec!["kb1".to_string(), "kb2".to_string()]);
    }

    #[tokio::test]
    async fn fact_adjust_confidence_clamps_unless_ground_truth() {
        let (store, _dir) = temp_store().await;
        store
            .fact_upsert("a", "r", "t", "c", 0.85, "kb")
            .await
            .unwrap();
        let id = store.fact_query("kb").await.unwrap()[0].id;
        store.fact_adjust_confidence(id, 0.1).await.unwrap();
        let rows = store.fact_query("kb").await.unwrap();
        assert_eq!(rows[0].confidence, 0.9);

        store
            .fact_upsert("g", "r", "t", "c", 0.97, "kb2")
            .await
            .unwrap();
        let id2 = store.fact_query("kb2").await.unwrap()[0].id;
        store.fact_adjust_confidence(id2, -0.5).await.unwrap();
        let rows2 = store.fact_query("kb2").await.unwrap();
        assert_eq!(rows2[0].confidence, 0.97, "ground-truth facts are not clamped down");
    }

    #[tokio::test]
    async fn ingestion_history_insert_is_dedup_safe() {
        let (store, _dir) = temp_store().await;
        let row = IngestionHistoryRow {
            file_hash: "abc123".into(),
            kb_id: "default".into(),
            file_path: "/ingest/foo.txt".into(),
            file_size: 10,
            ingested_at: now_unix(),
        };
        store.ingestion_history_insert(row.clone()).await.unwrap();
        store.ingestion_history_insert(row).await.unwrap();
        assert!(store.ingestion_history_has("abc123").await.unwrap());
    }

    #[tokio::test]
    async fn task_def_upsert_overwrites_by_name() {
        let (store, _dir) = temp_store().await;
        let mut row = TaskDefRow {
            name: "morning_briefing".into(),
            kind: "scheduled".into(),
            enabled: true,
            schedule: Some("08:00".into()),
            idle_only: false,
            priority: "medium".into(),
            description: "send a briefing".into(),
            prompt: None,
            config: serde_json::json!({}),
        };
        store.task_def_upsert(row.clone()).await.unwrap();
        row.enabled = false;
        store.task_def_upsert(row).await.unwrap();
        let rows = store.task_def_list().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].enabled);
    }
}
