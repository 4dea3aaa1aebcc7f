//! Index Manager (C2): owns the collection lifecycle — change detection,
//! reachability waiting, tokenizer (re)build, and batched embed+upsert.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use concord_core::DocumentReference;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::bm25::{SparseTokenizer, SparseVector};
use crate::error::{RetrievalError, Result};
use crate::retriever::DenseEmbedder;

const BACKOFF_BASE_SECS: u64 = 5;
const BACKOFF_CAP_SECS: u64 = 300;
const MAX_REACHABILITY_ATTEMPTS: u32 = 10;
const JITTER_FRACTION: f64 = 0.10;

/// Deterministic pseudo-random jitter in `0..=JITTER_FRACTION * base_secs`,
/// derived from the current monotonic timestamp to avoid a `rand` dependency.
fn jitter_secs(base_secs: u64) -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let max_jitter = ((base_secs as f64) * JITTER_FRACTION) as u64;
    if max_jitter == 0 {
        return 0;
    }
    (nanos as u64) % max_jitter
}

/// A unit of content available for indexing (a wiki page, a verified FAQ, …).
#[derive(Debug, Clone)]
pub struct CorpusDocument {
    pub doc_type: String,
    pub natural_id: Option<String>,
    pub title: String,
    pub section: Option<String>,
    pub protocol: String,
    pub category: String,
    pub url: Option<String>,
    pub content: String,
}

impl CorpusDocument {
    /// Identity used for the content-addressed point ID. Identical content
    /// under the same natural key yields the same ID across rebuilds.
    fn doc_key(&self) -> String {
        let natural_key = self
            .natural_id
            .clone()
            .unwrap_or_else(|| format!("{}|{}|{}", self.title, self.section.as_deref().unwrap_or(""), self.protocol));
        let content_hash = sha1_hex(&self.content);
        format!("{}:{}:{}", self.doc_type, natural_key, content_hash)
    }

    fn to_reference(&self) -> DocumentReference {
        DocumentReference {
            document_id: self.doc_key(),
            title: self.title.clone(),
            url: self.url.clone(),
            section: self.section.clone(),
            category: self.category.clone(),
            protocol: self.protocol.clone(),
            relevance_score: 0.0,
        }
    }
}

fn sha1_hex(content: &str) -> String {
    use sha1::Sha1;
    hex::encode(Sha1::digest(content.as_bytes()))
}

/// Maps `doc_key()` to a stable 63-bit point ID (§4.2 step 5).
pub fn stable_point_id(doc_key: &str) -> u64 {
    let digest = Sha256::digest(doc_key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[0..8]);
    u64::from_be_bytes(bytes) & 0x7FFF_FFFF_FFFF_FFFF
}

/// A tracked input source: anything whose (mtime, size) change should
/// trigger a rebuild, plus the documents it currently contributes.
#[async_trait]
pub trait CorpusSource: Send + Sync {
    fn name(&self) -> &str;
    async fn fingerprint(&self) -> Result<(i64, u64)>;
    async fn documents(&self) -> Result<Vec<CorpusDocument>>;
    fn source_path(&self) -> String;
}

/// A file-backed corpus (e.g. the wiki export) tracked by (mtime, size).
pub struct FileCorpusSource<F> {
    name: String,
    path: PathBuf,
    load: F,
}

impl<F> FileCorpusSource<F>
where
    F: Fn(&str) -> Result<Vec<CorpusDocument>> + Send + Sync,
{
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, load: F) -> Self {
        Self { name: name.into(), path: path.into(), load }
    }
}

#[async_trait]
impl<F> CorpusSource for FileCorpusSource<F>
where
    F: Fn(&str) -> Result<Vec<CorpusDocument>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn fingerprint(&self) -> Result<(i64, u64)> {
        let meta = std::fs::metadata(&self.path)?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Ok((mtime, meta.len()))
    }

    async fn documents(&self) -> Result<Vec<CorpusDocument>> {
        let text = std::fs::read_to_string(&self.path)?;
        (self.load)(&text)
    }

    fn source_path(&self) -> String {
        self.path.to_string_lossy().to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct SourceFingerprint {
    path: String,
    mtime: i64,
    size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct QdrantMetadata {
    collection: String,
    points_upserted: usize,
    embedding_model: String,
    embedding_dimensions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexMetadata {
    last_build: String,
    sources: HashMap<String, SourceFingerprint>,
    qdrant: QdrantMetadata,
}

/// A point staged for upsert: dense vector, sparse vector, and payload.
pub struct IndexPoint {
    pub id: u64,
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
    pub payload: DocumentReference,
}

/// The vector collection this manager maintains. Injected so this crate
/// never depends on a concrete vector database client.
#[async_trait]
pub trait CollectionStore: Send + Sync {
    async fn is_reachable(&self) -> bool;
    async fn collection_exists(&self) -> Result<bool>;
    async fn recreate_collection(&self, dense_dim: usize) -> Result<()>;
    async fn upsert_batch(&self, points: Vec<IndexPoint>) -> Result<()>;
}

pub struct IndexManagerConfig {
    pub collection_name: String,
    pub metadata_path: PathBuf,
    pub vocabulary_path: PathBuf,
    pub embed_batch_size: usize,
    pub bm25_k1: f32,
    pub bm25_b: f32,
    pub max_input_bytes: usize,
    pub max_vocabulary_size: usize,
}

/// Owns collection lifecycle: change detection, rebuild, and the frozen
/// tokenizer queries are served against (§4.2).
pub struct IndexManager {
    sources: Vec<Arc<dyn CorpusSource>>,
    store: Arc<dyn CollectionStore>,
    embedder: Arc<dyn DenseEmbedder>,
    config: IndexManagerConfig,
    tokenizer: AsyncMutex<Option<Arc<SparseTokenizer>>>,
    rebuild_lock: AsyncMutex<()>,
}

impl IndexManager {
    pub fn new(
        sources: Vec<Arc<dyn CorpusSource>>,
        store: Arc<dyn CollectionStore>,
        embedder: Arc<dyn DenseEmbedder>,
        config: IndexManagerConfig,
    ) -> Self {
        Self {
            sources,
            store,
            embedder,
            config,
            tokenizer: AsyncMutex::new(None),
            rebuild_lock: AsyncMutex::new(()),
        }
    }

    pub async fn tokenizer(&self) -> Option<Arc<SparseTokenizer>> {
        self.tokenizer.lock().await.clone()
    }

    async fn current_fingerprints(&self) -> Result<HashMap<String, SourceFingerprint>> {
        let mut out = HashMap::with_capacity(self.sources.len());
        for source in &self.sources {
            let (mtime, size) = source.fingerprint().await?;
            out.insert(source.name().to_string(), SourceFingerprint { path: source.source_path(), mtime, size });
        }
        Ok(out)
    }

    fn load_metadata(&self) -> Option<IndexMetadata> {
        let bytes = std::fs::read(&self.config.metadata_path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// True when the collection is missing, metadata is missing, or any
    /// tracked source's fingerprint or the source set itself has changed
    /// (§4.2 Change detection, §I7).
    pub async fn needs_rebuild(&self) -> Result<bool> {
        if !self.store.collection_exists().await? {
            return Ok(true);
        }
        let current = self.current_fingerprints().await?;
        match self.load_metadata() {
            None => Ok(true),
            Some(meta) => Ok(meta.sources != current),
        }
    }

    /// Rebuild only if needed. Safe to call concurrently — the second
    /// caller blocks on the rebuild lock and, once it holds it, observes
    /// the now-fresh metadata and returns without rebuilding again.
    pub async fn ensure_fresh(&self) -> Result<()> {
        if !self.needs_rebuild().await? {
            return Ok(());
        }
        let _guard = self.rebuild_lock.lock().await;
        if !self.needs_rebuild().await? {
            return Ok(());
        }
        self.rebuild().await
    }

    /// Exponential backoff with ±10% jitter: 5s → 10s → 20s → … → 300s
    /// cap, up to `MAX_REACHABILITY_ATTEMPTS` tries.
    async fn wait_for_reachable(&self) -> Result<()> {
        let mut delay_secs = BACKOFF_BASE_SECS;
        for attempt in 1..=MAX_REACHABILITY_ATTEMPTS {
            if self.store.is_reachable().await {
                return Ok(());
            }
            if attempt == MAX_REACHABILITY_ATTEMPTS {
                break;
            }
            let total = delay_secs + jitter_secs(delay_secs);
            warn!(attempt, retry_after_secs = total, "backing store unreachable, retrying");
            tokio::time::sleep(Duration::from_secs(total)).await;
            delay_secs = (delay_secs * 2).min(BACKOFF_CAP_SECS);
        }
        Err(RetrievalError::StoreUnreachable("backing store did not become reachable".into()))
    }

    async fn rebuild(&self) -> Result<()> {
        self.wait_for_reachable().await?;

        let tokenizer = Arc::new(SparseTokenizer::new(
            self.config.bm25_k1,
            self.config.bm25_b,
            self.config.max_input_bytes,
            self.config.max_vocabulary_size,
        ));

        let mut all_docs: Vec<CorpusDocument> = Vec::new();
        for source in &self.sources {
            all_docs.extend(source.documents().await?);
        }

        let mut staged: Vec<(CorpusDocument, SparseVector)> = Vec::with_capacity(all_docs.len());
        for doc in all_docs {
            let sparse = tokenizer.tokenize_document(&doc.content)?;
            staged.push((doc, sparse));
        }

        write_atomically(&self.config.vocabulary_path, &serde_json::to_vec(&tokenizer.export_vocabulary())?)?;

        let probe = self.embedder.embed("concord index probe").await?;
        let dense_dim = probe.len();
        self.store.recreate_collection(dense_dim).await?;

        let mut points_upserted = 0usize;
        for chunk in staged.chunks(self.config.embed_batch_size) {
            let mut points = Vec::with_capacity(chunk.len());
            for (doc, sparse) in chunk {
                let dense = self.embedder.embed(&doc.content).await?;
                let doc_key = doc.doc_key();
                points.push(IndexPoint {
                    id: stable_point_id(&doc_key),
                    dense,
                    sparse: sparse.clone(),
                    payload: doc.to_reference(),
                });
            }
            points_upserted += points.len();
            self.store.upsert_batch(points).await?;
        }

        let fingerprints = self.current_fingerprints().await?;
        let metadata = IndexMetadata {
            last_build: chrono::Utc::now().to_rfc3339(),
            sources: fingerprints,
            qdrant: QdrantMetadata {
                collection: self.config.collection_name.clone(),
                points_upserted,
                embedding_model: self.embedder.model_name().to_string(),
                embedding_dimensions: dense_dim,
            },
        };
        write_atomically(&self.config.metadata_path, &serde_json::to_vec(&metadata)?)?;

        *self.tokenizer.lock().await = Some(tokenizer);
        info!(documents = staged.len(), dense_dim, "index rebuild complete");
        Ok(())
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::io::Write::write_all(&mut tmp, bytes)?;
    tmp.persist(path).map_err(|e| RetrievalError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct FixedEmbedder;

    #[async_trait]
    impl DenseEmbedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.1, 0.2, 0.3])
        }
        fn model_name(&self) -> &str {
            "fixed-test-embedder"
        }
    }

    struct InMemoryStore {
        reachable: bool,
        upserted: Mutex<usize>,
        recreated: AtomicU32,
    }

    #[async_trait]
    impl CollectionStore for InMemoryStore {
        async fn is_reachable(&self) -> bool {
            self.reachable
        }
        async fn collection_exists(&self) -> Result<bool> {
            Ok(self.recreated.load(Ordering::SeqCst) > 0)
        }
        async fn recreate_collection(&self, _dim: usize) -> Result<()> {
            self.recreated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn upsert_batch(&self, points: Vec<IndexPoint>) -> Result<()> {
            *self.upserted.lock().unwrap() += points.len();
            Ok(())
        }
    }

    struct StaticSource {
        fp: (i64, u64),
        docs: Vec<CorpusDocument>,
    }

    #[async_trait]
    impl CorpusSource for StaticSource {
        fn name(&self) -> &str {
            "static"
        }
        async fn fingerprint(&self) -> Result<(i64, u64)> {
            Ok(self.fp)
        }
        async fn documents(&self) -> Result<Vec<CorpusDocument>> {
            Ok(self.docs.clone())
        }
        fn source_path(&self) -> String {
            "static://fixture".into()
        }
    }

    fn sample_doc(id: &str) -> CorpusDocument {
        CorpusDocument {
            doc_type: "faq".into(),
            natural_id: Some(id.to_string()),
            title: format!("Question {id}"),
            section: None,
            protocol: "bisq".into(),
            category: "trading".into(),
            url: None,
            content: "Send funds to the escrow address once the trade starts.".into(),
        }
    }

    fn manager(dir: &tempfile::TempDir, source: Arc<dyn CorpusSource>, store: Arc<InMemoryStore>) -> IndexManager {
        IndexManager::new(
            vec![source],
            store,
            Arc::new(FixedEmbedder),
            IndexManagerConfig {
                collection_name: "concord-test".into(),
                metadata_path: dir.path().join("metadata.json"),
                vocabulary_path: dir.path().join("vocab.json"),
                embed_batch_size: 64,
                bm25_k1: 1.5,
                bm25_b: 0.75,
                max_input_bytes: 100 * 1024,
                max_vocabulary_size: 500_000,
            },
        )
    }

    #[tokio::test]
    async fn fresh_manager_needs_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(StaticSource { fp: (1, 10), docs: vec![sample_doc("1")] });
        let store = Arc::new(InMemoryStore { reachable: true, upserted: Mutex::new(0), recreated: AtomicU32::new(0) });
        let mgr = manager(&dir, source, store);
        assert!(mgr.needs_rebuild().await.unwrap());
    }

    #[tokio::test]
    async fn rebuild_writes_metadata_and_upserts_points() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(StaticSource { fp: (1, 10), docs: vec![sample_doc("1"), sample_doc("2")] });
        let store = Arc::new(InMemoryStore { reachable: true, upserted: Mutex::new(0), recreated: AtomicU32::new(0) });
        let mgr = manager(&dir, source, store.clone());

        mgr.ensure_fresh().await.unwrap();
        assert!(!mgr.needs_rebuild().await.unwrap());
        assert_eq!(*store.upserted.lock().unwrap(), 2);
        assert_eq!(store.recreated.load(Ordering::SeqCst), 1);
        assert!(mgr.tokenizer().await.is_some());
    }

    #[tokio::test]
    async fn unreachable_store_fails_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(StaticSource { fp: (1, 10), docs: vec![sample_doc("1")] });
        let store = Arc::new(InMemoryStore { reachable: false, upserted: Mutex::new(0), recreated: AtomicU32::new(0) });
        let mgr = manager(&dir, source, store);
        let err = mgr.ensure_fresh().await.unwrap_err();
        assert!(matches!(err, RetrievalError::StoreUnreachable(_)));
    }

    #[test]
    fn stable_point_id_is_deterministic_and_content_addressed() {
        let id1 = stable_point_id("faq:1:abc");
        let id2 = stable_point_id("faq:1:abc");
        let id3 = stable_point_id("faq:1:def");
        assert_eq!(id1, id2);
        assert_ne!(id1, id3);
        assert!(id1 <= i64::MAX as u64);
    }
}
