//! The Ingestion Pipeline (§4.3, §2 L3): watch/poll an ingest directory,
//! dedup, triage, extract, enrich, submit, and file.

pub mod extract;
pub mod triage;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::error::{IngestError, IngestOutcome};
use crate::memory_client::MemoryClient;
use crate::state_store::IngestionHistoryRow;
use extract::VisionClient;
use triage::Weight;

const PAUSED_SENTINEL: &str = ".paused";
const TRIGGER_NOW_SENTINEL: &str = ".trigger_now";

/// The front-matter prefix `file_artifact` writes onto every sidecar it
/// files. A candidate whose extracted content already starts with this is
/// one of the pipeline's own previously-filed outputs, fed back into the
/// ingest directory.
const FILED_ARTIFACT_PREFIX: &str = "---\nkb_id:";

/// Raises the two exception-style outcomes a real extraction failure can
/// produce: empty content (nothing usable came out of extraction) or a
/// previously-filed artifact looping back in, rather than scanning
/// arbitrary document text for marker substrings.
fn check_quality(content: &str) -> Result<(), IngestError> {
    if content.starts_with(FILED_ARTIFACT_PREFIX) {
        return Err(IngestError::Recursion(
            "content carries this pipeline's own filed front matter".to_string(),
        ));
    }
    if content.trim().is_empty() {
        return Err(IngestError::QualityReject("no content extracted".to_string()));
    }
    Ok(())
}

/// `{kb_id, authority, global_summary, shadow_tags}` (§4.3 "Enrichment").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrichment {
    pub kb_id: String,
    pub authority: f64,
    pub global_summary: String,
    #[serde(default)]
    pub shadow_tags: Vec<String>,
}

impl Default for Enrichment {
    /// §4.3 "On failure, default to `{kb_id:"default", authority:0.5}`".
    fn default() -> Self {
        Self {
            kb_id: "default".to_string(),
            authority: 0.5,
            global_summary: String::new(),
            shadow_tags: Vec::new(),
        }
    }
}

/// Classifies extracted content into an [`Enrichment`] via a short
/// JSON-only LLM prompt (§4.3). Out of scope per spec.md §1 (model
/// inference runtime); contract only.
#[async_trait]
pub trait ClassifierClient: Send + Sync {
    async fn classify(&self, content: &str) -> Result<Enrichment, String>;
}

pub struct DefaultingClassifier;

#[async_trait]
impl ClassifierClient for DefaultingClassifier {
    async fn classify(&self, _content: &str) -> Result<Enrichment, String> {
        Err("no classifier configured".to_string())
    }
}

/// `{entities, relations}` extracted for the knowledge graph (§4.3
/// "Submission").
#[async_trait]
pub trait GraphExtractorClient: Send + Sync {
    async fn extract(&self, content: &str) -> Result<(Value, Value), String>;
}

pub struct NoGraphExtractor;

#[async_trait]
impl GraphExtractorClient for NoGraphExtractor {
    async fn extract(&self, _content: &str) -> Result<(Value, Value), String> {
        Ok((json!([]), json!([])))
    }
}

/// The `ingest/` directory layout of §6, rooted at `root`.
#[derive(Debug, Clone)]
pub struct IngestLayout {
    pub root: PathBuf,
}

impl IngestLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn deferred(&self) -> PathBuf {
        self.root.join("deferred")
    }
    pub fn processed(&self) -> PathBuf {
        self.root.join("processed")
    }
    pub fn review(&self) -> PathBuf {
        self.root.join("review")
    }
    pub fn rejected(&self) -> PathBuf {
        self.root.join("rejected")
    }
    pub fn duplicates(&self) -> PathBuf {
        self.root.join("duplicates")
    }
    pub fn paused_sentinel(&self) -> PathBuf {
        self.root.join(PAUSED_SENTINEL)
    }
    pub fn trigger_now_sentinel(&self) -> PathBuf {
        self.root.join(TRIGGER_NOW_SENTINEL)
    }

    fn all_subdirs(&self) -> [PathBuf; 5] {
        [
            self.deferred(),
            self.processed(),
            self.review(),
            self.rejected(),
            self.duplicates(),
        ]
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        for d in self.all_subdirs() {
            std::fs::create_dir_all(d)?;
        }
        Ok(())
    }
}

/// The ingestion pipeline itself (§2 L3 "Ingestion Pipeline"). One instance
/// per watched root; `run_once` is concurrency-guarded by an exclusive lock
/// (§5 "Ingestion pipeline iterations are serialized by an exclusive
/// lock.").
pub struct Pipeline {
    layout: IngestLayout,
    memory: Arc<MemoryClient>,
    vision: Arc<dyn VisionClient>,
    classifier: Arc<dyn ClassifierClient>,
    graph: Arc<dyn GraphExtractorClient>,
    running: Mutex<()>,
    night_start: chrono::NaiveTime,
    night_end: chrono::NaiveTime,
    /// Treated as "this file mirrors the brain directory" when true (§4.3
    /// "Dedup": brain-originated duplicates are skipped silently rather
    /// than moved to `duplicates/`).
    from_brain: bool,
}

impl Pipeline {
    pub fn new(layout: IngestLayout, memory: Arc<MemoryClient>) -> Self {
        Self {
            layout,
            memory,
            vision: Arc::new(extract::UnavailableVision),
            classifier: Arc::new(DefaultingClassifier),
            graph: Arc::new(NoGraphExtractor),
            running: Mutex::new(()),
            night_start: chrono::NaiveTime::from_hms_opt(1, 0, 0).unwrap(),
            night_end: chrono::NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
            from_brain: false,
        }
    }

    pub fn with_vision(mut self, vision: Arc<dyn VisionClient>) -> Self {
        self.vision = vision;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ClassifierClient>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_graph_extractor(mut self, graph: Arc<dyn GraphExtractorClient>) -> Self {
        self.graph = graph;
        self
    }

    pub fn with_night_window(mut self, start: chrono::NaiveTime, end: chrono::NaiveTime) -> Self {
        self.night_start = start;
        self.night_end = end;
        self
    }

    pub fn with_brain_source(mut self, from_brain: bool) -> Self {
        self.from_brain = from_brain;
        self
    }

    /// §4.3 "A `.paused` sentinel file in the ingest directory pauses the
    /// whole loop; polling returns immediately while present."
    pub fn is_paused(&self) -> bool {
        self.layout.paused_sentinel().exists()
    }

    fn in_night_window_or_triggered(&self) -> bool {
        if self.layout.trigger_now_sentinel().exists() {
            return true;
        }
        let now = chrono::Local::now().time();
        crate::scheduler::schedule::in_night_window(now, self.night_start, self.night_end)
    }

    /// One pass over the watched root: scans non-reserved entries directly
    /// under it (flat; `processed/` etc. are the only subdirectories and are
    /// never themselves scanned) and processes each candidate file.
    pub async fn run_once(&self) -> Result<Vec<(PathBuf, IngestOutcome)>, IngestError> {
        if self.is_paused() {
            return Ok(Vec::new());
        }
        let _guard = self.running.lock().await;

        self.layout.ensure_dirs()?;

        let reserved: Vec<PathBuf> = {
            let mut v = self.layout.all_subdirs().to_vec();
            v.push(self.layout.paused_sentinel());
            v.push(self.layout.trigger_now_sentinel());
            v
        };

        let mut results = Vec::new();
        let entries = std::fs::read_dir(&self.layout.root)?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() || reserved.contains(&path) {
                continue;
            }
            let outcome = self.process_file(&path).await?;
            results.push((path, outcome));
        }
        Ok(results)
    }

    /// Handles one candidate file end-to-end: dedup, triage, extraction,
    /// quality gate, enrichment, submission, filing.
    async fn process_file(&self, path: &Path) -> Result<IngestOutcome, IngestError> {
        let bytes = std::fs::read(path)?;
        let hash = sha256_hex(&bytes);

        let seen = self
            .memory
            .state_store()
            .ingestion_history_has(&hash)
            .await
            .map_err(|e| IngestError::Hashing(e.to_string()))?;
        if seen {
            if self.from_brain {
                return Ok(IngestOutcome::Duplicate);
            }
            self.move_to(path, &self.layout.duplicates())?;
            return Ok(IngestOutcome::Duplicate);
        }

        let file_size = bytes.len() as u64;
        if triage::classify(path, file_size) == Weight::Heavy && !self.in_night_window_or_triggered() {
            self.move_to(path, &self.layout.deferred())?;
            return Ok(IngestOutcome::Deferred);
        }

        let extraction = self.extract_content(path, &bytes).await.and_then(|content| {
            check_quality(&content)?;
            Ok(content)
        });
        let content = match extraction {
            Ok(content) => content,
            Err(e) => {
                let outcome = e.outcome();
                let dest = match outcome {
                    IngestOutcome::QualityReject => self.layout.rejected(),
                    IngestOutcome::Recursion => self.layout.review(),
                    _ => self.layout.review(),
                };
                self.move_to(path, &dest)?;
                return Ok(outcome);
            }
        };

        let enrichment = self
            .classifier
            .classify(&content)
            .await
            .unwrap_or_default();

        self.submit(path, &content, &enrichment).await?;
        self.file_artifact(path, &content, &hash, file_size, &enrichment)
            .await?;

        Ok(IngestOutcome::Ok)
    }

    async fn extract_content(&self, path: &Path, bytes: &[u8]) -> Result<String, IngestError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "txt" | "md" => Ok(extract::extract_text(bytes)),
            "csv" => extract::extract_csv(bytes),
            "png" | "jpg" | "jpeg" => {
                extract::extract_image(path, bytes, self.vision.as_ref()).await
            }
            "pdf" => extract::extract_pdf(bytes, self.vision.as_ref(), None).await,
            other => Err(IngestError::Extraction(format!(
                "no extractor for extension {other:?}"
            ))),
        }
    }

    /// §4.3 "Submission": POST document + `prepend_text` to the retrieval
    /// backend, then extract graph entities/relations and POST those too.
    async fn submit(
        &self,
        path: &Path,
        content: &str,
        enrichment: &Enrichment,
    ) -> Result<(), IngestError> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        let prepend_text = format!("[DOCUMENT SUMMARY: {}]", enrichment.global_summary);
        let metadata = json!({
            "authority": enrichment.authority,
            "shadow_tags": enrichment.shadow_tags,
        });

        self.memory
            .ingest_sink()
            .ingest_document(&filename, content, &enrichment.kb_id, metadata, &prepend_text)
            .await
            .map_err(IngestError::Submission)?;

        match self.graph.extract(content).await {
            Ok((entities, relations)) => {
                let _ = self
                    .memory
                    .ingest_sink()
                    .ingest_graph(entities, relations)
                    .await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "knowledge-graph extraction failed, continuing");
            }
        }
        Ok(())
    }

    /// §4.3 "Filing": move original into `processed/` (collision-safe
    /// rename), write a markdown sidecar, then — only after the move
    /// succeeds — record the hash in `ingestion_history`.
    async fn file_artifact(
        &self,
        path: &Path,
        content: &str,
        hash: &str,
        file_size: u64,
        enrichment: &Enrichment,
    ) -> Result<(), IngestError> {
        let processed = self.layout.processed();
        let dest = self.collision_safe_dest(&processed, path);
        std::fs::rename(path, &dest)?;

        let sidecar_path = dest.with_extension(format!(
            "{}.md",
            dest.extension().and_then(|e| e.to_str()).unwrap_or("")
        ));
        let front_matter = format!(
            "---\nkb_id: {}\nauthority: {}\ningested_at: {}\nkeywords: {:?}\n---\n\n{}\n",
            enrichment.kb_id,
            enrichment.authority,
            crate::state_store::model::now_unix(),
            enrichment.shadow_tags,
            content,
        );
        std::fs::write(&sidecar_path, front_matter)?;

        self.memory
            .state_store()
            .ingestion_history_insert(IngestionHistoryRow {
                file_hash: hash.to_string(),
                kb_id: enrichment.kb_id.clone(),
                file_path: dest.to_string_lossy().into_owned(),
                file_size: file_size as i64,
                ingested_at: crate::state_store::model::now_unix(),
            })
            .await
            .map_err(|e| IngestError::Filing(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;

        Ok(())
    }

    /// Moves `path` into `dest_dir`, renaming with a unix-timestamp suffix
    /// on name collision (§4.3 "On name collision, rename to
    /// `<stem>_<unix_ts><ext>`").
    fn move_to(&self, path: &Path, dest_dir: &Path) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(dest_dir)?;
        let dest = self.collision_safe_dest(dest_dir, path);
        std::fs::rename(path, &dest)?;
        Ok(dest)
    }

    fn collision_safe_dest(&self, dest_dir: &Path, source: &Path) -> PathBuf {
        let name = source
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "artifact".into());
        let candidate = dest_dir.join(&name);
        if !candidate.exists() {
            return candidate;
        }
        let stem = source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("artifact");
        let ext = source.extension().and_then(|e| e.to_str()).unwrap_or("");
        let ts = crate::state_store::model::now_unix();
        let renamed = if ext.is_empty() {
            format!("{stem}_{ts}")
        } else {
            format!("{stem}_{ts}.{ext}")
        };
        dest_dir.join(renamed)
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_client::HttpIngestSink;
    use crate::state_store::SqliteStateStore;

    fn test_pipeline(root: &Path) -> Pipeline {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStateStore::new(dir.path().join("state.db")).unwrap());
        let memory = Arc::new(MemoryClient::new(store, Arc::new(HttpIngestSink::new(""))));
        Pipeline::new(IngestLayout::new(root), memory)
    }

    #[tokio::test]
    async fn text_file_is_processed_and_filed() {
        let root = tempfile::tempdir().unwrap();
        let pipeline = test_pipeline(root.path());
        std::fs::write(root.path().join("note.txt"), "hello world").unwrap();

        let results = pipeline.run_once().await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1, IngestOutcome::Ok);
        assert!(pipeline.layout.processed().join("note.txt").exists());
    }

    #[tokio::test]
    async fn duplicate_second_ingestion_is_detected() {
        let root = tempfile::tempdir().unwrap();
        let pipeline = test_pipeline(root.path());
        std::fs::write(root.path().join("note.txt"), "same content").unwrap();
        pipeline.run_once().await.unwrap();

        std::fs::write(root.path().join("note.txt"), "same content").unwrap();
        let results = pipeline.run_once().await.unwrap();
        assert_eq!(results[0].1, IngestOutcome::Duplicate);
        assert!(pipeline.layout.duplicates().join("note.txt").exists());
    }

    #[tokio::test]
    async fn paused_sentinel_skips_the_pass_entirely() {
        let root = tempfile::tempdir().unwrap();
        let pipeline = test_pipeline(root.path());
        std::fs::create_dir_all(root.path()).unwrap();
        std::fs::write(root.path().join(".paused"), "maintenance").unwrap();
        std::fs::write(root.path().join("note.txt"), "hello").unwrap();

        let results = pipeline.run_once().await.unwrap();
        assert!(results.is_empty());
        assert!(root.path().join("note.txt").exists());
    }

    #[tokio::test]
    async fn heavy_video_file_is_deferred_outside_night_window() {
        let root = tempfile::tempdir().unwrap();
        // Night window set to a range guaranteed not to contain "now" in CI.
        let pipeline = test_pipeline(root.path()).with_night_window(
            chrono::NaiveTime::from_hms_opt(3, 0, 0).unwrap(),
            chrono::NaiveTime::from_hms_opt(3, 1, 0).unwrap(),
        );
        std::fs::write(root.path().join("movie.mp4"), vec![0u8; 100]).unwrap();

        let results = pipeline.run_once().await.unwrap();
        let now = chrono::Local::now().time();
        if crate::scheduler::schedule::in_night_window(
            now,
            chrono::NaiveTime::from_hms_opt(3, 0, 0).unwrap(),
            chrono::NaiveTime::from_hms_opt(3, 1, 0).unwrap(),
        ) {
            // Extremely rare timing coincidence; nothing meaningful to assert.
            return;
        }
        assert_eq!(results[0].1, IngestOutcome::Deferred);
        assert!(pipeline.layout.deferred().join("movie.mp4").exists());
    }

    #[tokio::test]
    async fn refiled_artifact_is_detected_as_recursion() {
        let root = tempfile::tempdir().unwrap();
        let pipeline = test_pipeline(root.path());
        // Mirrors `file_artifact`'s own sidecar front matter: this is what a
        // previously-filed document looks like if it's fed back in.
        std::fs::write(
            root.path().join("loopback.md"),
            "---\nkb_id: default\nauthority: 0.5\ningested_at: 0\nkeywords: []\n---\n\nhello\n",
        )
        .unwrap();

        let results = pipeline.run_once().await.unwrap();
        assert_eq!(results[0].1, IngestOutcome::Recursion);
        assert!(pipeline.layout.review().join("loopback.md").exists());
    }

    #[tokio::test]
    async fn empty_extracted_content_is_quality_rejected() {
        let root = tempfile::tempdir().unwrap();
        let pipeline = test_pipeline(root.path());
        std::fs::write(root.path().join("blank.txt"), "").unwrap();

        let results = pipeline.run_once().await.unwrap();
        assert_eq!(results[0].1, IngestOutcome::QualityReject);
        assert!(pipeline.layout.rejected().join("blank.txt").exists());
    }
}
