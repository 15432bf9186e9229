use super::*;
use crate::knowledge::DocumentMetadata;
use anyhow::bail;
use std::sync::atomic::AtomicUsize;
use tempfile::TempDir;

const TOPICS: [&str; 4] = ["auto", "home", "life", "pet"];

/// One axis per topic word, plus a bias so no vector is all zeros
struct TopicEmbedder;

impl Embedder for TopicEmbedder {
    fn model_name(&self) -> &str {
        "topic-test"
    }

    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let lower = text.to_lowercase();
        let mut vector: Vec<f32> = TOPICS
            .iter()
            .map(|topic| lower.matches(topic).count() as f32)
            .collect();
        vector.push(0.1);
        Ok(vector)
    }
}

/// Fails once it has embedded `budget` texts
struct FlakyEmbedder {
    budget: usize,
    used: AtomicUsize,
}

impl Embedder for FlakyEmbedder {
    fn model_name(&self) -> &str {
        "flaky-test"
    }

    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        if self.used.fetch_add(1, Ordering::SeqCst) >= self.budget {
            bail!("provider unavailable");
        }
        TopicEmbedder.embed(text)
    }
}

/// Produces vectors of a different width than `TopicEmbedder`
struct WideEmbedder;

impl Embedder for WideEmbedder {
    fn model_name(&self) -> &str {
        "wide-test"
    }

    fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        Ok(vec![0.5; 8])
    }
}

fn create_chunk(source: &str, index: usize, content: &str) -> ContentChunk {
    ContentChunk {
        content: content.to_string(),
        metadata: DocumentMetadata {
            source: PathBuf::from(source),
            category: "products".to_string(),
        },
        chunk_index: index,
        offset: index * 300,
    }
}

fn sample_chunks() -> Vec<ContentChunk> {
    vec![
        create_chunk("products/carllm.md", 0, "Carllm is our auto insurance product"),
        create_chunk("products/homellm.md", 0, "Homellm covers home insurance"),
        create_chunk("products/lifellm.md", 0, "Life insurance for life events"),
        create_chunk("products/petllm.md", 0, "Pet cover for cats and dogs, pet care"),
    ]
}

async fn open_store(temp_dir: &TempDir) -> VectorStore {
    VectorStore::open(temp_dir.path().join("vector_db"), DistanceMetric::Cosine)
        .await
        .expect("should open store")
}

#[tokio::test]
async fn new_store_is_empty() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = open_store(&temp_dir).await;

    assert_eq!(store.phase(), StorePhase::Empty);
    assert_eq!(store.dimension(), None);
    assert!(store.manifest().is_none());
    assert_eq!(store.count().await.expect("count should succeed"), 0);

    let results = store
        .query(&[1.0, 0.0, 0.0], 5)
        .await
        .expect("query on empty store should succeed");
    assert!(results.is_empty());
}

#[tokio::test]
async fn store_opens_from_config() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    };

    let store = VectorStore::new(&config).await.expect("should open store");
    assert_eq!(store.path(), config.vector_database_path());
    assert_eq!(store.distance(), DistanceMetric::Cosine);
}

#[tokio::test]
async fn rebuild_then_query() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = open_store(&temp_dir).await;

    let manifest = store
        .rebuild(&sample_chunks(), &TopicEmbedder)
        .await
        .expect("rebuild should succeed");

    assert_eq!(manifest.entries, 4);
    assert_eq!(manifest.dimension, Some(5));
    assert_eq!(manifest.embedding_model, "topic-test");
    assert_eq!(store.phase(), StorePhase::Ready);
    assert_eq!(store.count().await.expect("count should succeed"), 4);

    let query = TopicEmbedder.embed("pet").expect("embed should succeed");
    let results = store
        .query(&query, 2)
        .await
        .expect("query should succeed");

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].chunk_metadata.source, "products/petllm.md");
    assert!(results[0].distance <= results[1].distance);
    assert!(results[0].similarity_score >= results[1].similarity_score);
}

#[tokio::test]
async fn query_returns_at_most_stored_entries() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = open_store(&temp_dir).await;
    store
        .rebuild(&sample_chunks()[..2], &TopicEmbedder)
        .await
        .expect("rebuild should succeed");

    let query = TopicEmbedder.embed("home").expect("embed should succeed");
    let results = store
        .query(&query, 5)
        .await
        .expect("query should succeed");
    assert_eq!(results.len(), 2);

    let none = store
        .query(&query, 0)
        .await
        .expect("query should succeed");
    assert!(none.is_empty());
}

#[tokio::test]
async fn rebuild_replaces_previous_collection() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = open_store(&temp_dir).await;

    let first = store
        .rebuild(&sample_chunks(), &TopicEmbedder)
        .await
        .expect("first rebuild should succeed");
    let second = store
        .rebuild(&sample_chunks()[..1], &TopicEmbedder)
        .await
        .expect("second rebuild should succeed");

    assert_ne!(first.table, second.table);
    assert_eq!(store.count().await.expect("count should succeed"), 1);

    let tables = store
        .connection
        .table_names()
        .execute()
        .await
        .expect("should list tables");
    assert_eq!(tables.len(), 1, "old generation should be dropped: {tables:?}");
}

#[tokio::test]
async fn rebuild_is_idempotent() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = open_store(&temp_dir).await;
    let query = TopicEmbedder.embed("auto home").expect("embed should succeed");

    store
        .rebuild(&sample_chunks(), &TopicEmbedder)
        .await
        .expect("rebuild should succeed");
    let mut before: Vec<String> = store
        .query(&query, 4)
        .await
        .expect("query should succeed")
        .into_iter()
        .map(|r| r.id)
        .collect();

    store
        .rebuild(&sample_chunks(), &TopicEmbedder)
        .await
        .expect("rebuild should succeed");
    let mut after: Vec<String> = store
        .query(&query, 4)
        .await
        .expect("query should succeed")
        .into_iter()
        .map(|r| r.id)
        .collect();

    assert_eq!(store.count().await.expect("count should succeed"), 4);
    before.sort();
    after.sort();
    assert_eq!(before, after);
}

#[tokio::test]
async fn failed_rebuild_keeps_previous_collection() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = open_store(&temp_dir).await;
    let original = store
        .rebuild(&sample_chunks(), &TopicEmbedder)
        .await
        .expect("rebuild should succeed");

    let flaky = FlakyEmbedder {
        budget: 2,
        used: AtomicUsize::new(0),
    };
    let result = store.rebuild(&sample_chunks()[..3], &flaky).await;

    assert!(matches!(result, Err(RagError::Embedding(_))));
    assert_eq!(store.phase(), StorePhase::Ready);
    assert_eq!(store.manifest(), Some(original));
    assert_eq!(store.count().await.expect("count should succeed"), 4);
}

#[tokio::test]
async fn query_dimension_mismatch_is_an_error() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = open_store(&temp_dir).await;
    store
        .rebuild(&sample_chunks(), &TopicEmbedder)
        .await
        .expect("rebuild should succeed");

    let wide = WideEmbedder.embed("auto").expect("embed should succeed");
    let result = store.query(&wide, 5).await;

    assert!(matches!(
        result,
        Err(RagError::DimensionMismatch {
            expected: 5,
            actual: 8
        })
    ));
}

#[tokio::test]
async fn mixed_dimensions_are_rejected() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = open_store(&temp_dir).await;

    let chunks = sample_chunks();
    let records = vec![
        EmbeddingRecord::from_chunk(&chunks[0], vec![1.0, 0.0, 0.0]),
        EmbeddingRecord::from_chunk(&chunks[1], vec![1.0, 0.0]),
    ];
    let result = store.replace_collection(records, "mixed").await;

    assert!(matches!(result, Err(RagError::DimensionMismatch { .. })));
    assert_eq!(store.phase(), StorePhase::Empty);
}

#[tokio::test]
async fn empty_rebuild_is_ready_without_vectors() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = open_store(&temp_dir).await;

    let manifest = store
        .rebuild(&[], &TopicEmbedder)
        .await
        .expect("empty rebuild should succeed");

    assert_eq!(manifest.entries, 0);
    assert_eq!(manifest.table, None);
    assert_eq!(store.phase(), StorePhase::Ready);
    assert_eq!(store.dimension(), None);

    let results = store
        .query(&[0.0; 5], 5)
        .await
        .expect("query should succeed");
    assert!(results.is_empty());
}

#[tokio::test]
async fn collection_survives_reopen() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let written = {
        let store = open_store(&temp_dir).await;
        store
            .rebuild(&sample_chunks(), &TopicEmbedder)
            .await
            .expect("rebuild should succeed")
    };

    let reopened = open_store(&temp_dir).await;
    assert_eq!(reopened.phase(), StorePhase::Ready);
    assert_eq!(reopened.manifest(), Some(written));
    assert_eq!(reopened.dimension(), Some(5));

    let query = TopicEmbedder.embed("life").expect("embed should succeed");
    let results = reopened
        .query(&query, 1)
        .await
        .expect("query should succeed");
    assert_eq!(results[0].chunk_metadata.source, "products/lifellm.md");
    assert_eq!(results[0].chunk_metadata.category, "products");
}

async fn table_names(store: &VectorStore) -> Vec<String> {
    store
        .connection
        .table_names()
        .execute()
        .await
        .expect("should list tables")
}

fn unreferenced_record() -> EmbeddingRecord {
    EmbeddingRecord::from_chunk(&sample_chunks()[0], vec![1.0; 5])
}

#[tokio::test]
async fn open_leaves_tables_of_a_running_ingest_alone() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let ingesting = open_store(&temp_dir).await;
    ingesting
        .rebuild(&sample_chunks(), &TopicEmbedder)
        .await
        .expect("rebuild should succeed");
    let in_flight = ingesting
        .write_new_table(&[unreferenced_record()], 5)
        .await
        .expect("should write unreferenced table");

    let reader = open_store(&temp_dir).await;
    assert_eq!(reader.phase(), StorePhase::Ready);

    let tables = table_names(&reader).await;
    assert_eq!(tables.len(), 2, "open must not drop tables: {tables:?}");
    assert!(tables.iter().any(|name| name == in_flight.name()));
}

#[tokio::test]
async fn rebuild_purges_orphan_tables() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    {
        let store = open_store(&temp_dir).await;
        store
            .rebuild(&sample_chunks(), &TopicEmbedder)
            .await
            .expect("rebuild should succeed");
        store
            .write_new_table(&[unreferenced_record()], 5)
            .await
            .expect("should write unreferenced table");
    }

    let reopened = open_store(&temp_dir).await;
    assert_eq!(table_names(&reopened).await.len(), 2);

    let manifest = reopened
        .rebuild(&sample_chunks()[..2], &TopicEmbedder)
        .await
        .expect("rebuild should succeed");

    let tables = table_names(&reopened).await;
    assert_eq!(tables.len(), 1, "orphan should be dropped: {tables:?}");
    assert_eq!(Some(tables[0].clone()), manifest.table);
}

#[tokio::test]
async fn rebuild_is_rejected_while_another_process_holds_the_lock() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = open_store(&temp_dir).await;
    store
        .rebuild(&sample_chunks(), &TopicEmbedder)
        .await
        .expect("rebuild should succeed");
    let before = table_names(&store).await;

    let held = RebuildLock::acquire(store.path()).expect("should take lock");
    let result = store.rebuild(&sample_chunks()[..1], &TopicEmbedder).await;

    assert!(matches!(result, Err(RagError::Ingestion(_))));
    assert_eq!(store.phase(), StorePhase::Ready);
    assert_eq!(table_names(&store).await, before);
    assert_eq!(store.count().await.expect("count should succeed"), 4);

    drop(held);
    store
        .rebuild(&sample_chunks()[..1], &TopicEmbedder)
        .await
        .expect("rebuild should succeed once the lock is released");
    assert_eq!(store.count().await.expect("count should succeed"), 1);
}

#[tokio::test]
async fn manifest_naming_a_missing_table_is_an_error() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("vector_db");
    {
        let store = open_store(&temp_dir).await;
        let manifest = store
            .rebuild(&sample_chunks(), &TopicEmbedder)
            .await
            .expect("rebuild should succeed");
        let table = manifest.table.expect("non-empty rebuild names a table");
        store
            .drop_table_if_exists(&table)
            .await
            .expect("should drop table");
    }

    let result = VectorStore::open(&path, DistanceMetric::Cosine).await;
    assert!(matches!(result, Err(RagError::Database(_))));
    assert!(path.join(MANIFEST_FILE).exists(), "manifest must be left in place");
}

#[tokio::test]
async fn relative_path_is_resolved_against_current_dir() {
    let temp_dir = TempDir::new_in(".").expect("should create temp dir in current dir");
    let relative = temp_dir.path().join("vector_db");
    assert!(relative.is_relative());

    let written = {
        let store = VectorStore::open(&relative, DistanceMetric::Cosine)
            .await
            .expect("should open store");
        assert!(store.path().is_absolute());
        store
            .rebuild(&sample_chunks(), &TopicEmbedder)
            .await
            .expect("rebuild should succeed")
    };

    let reopened = VectorStore::open(&relative, DistanceMetric::Cosine)
        .await
        .expect("should reopen store");
    assert_eq!(reopened.manifest(), Some(written));
    assert_eq!(reopened.count().await.expect("count should succeed"), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn previous_collection_is_served_while_building() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = open_store(&temp_dir).await;
    let original = store
        .rebuild(&sample_chunks(), &TopicEmbedder)
        .await
        .expect("rebuild should succeed");
    let query = TopicEmbedder.embed("pet").expect("embed should succeed");

    let mut observed = None;
    store
        .rebuild_with_progress(&sample_chunks()[..1], &TopicEmbedder, |_| {
            let handle = tokio::runtime::Handle::current();
            observed = Some(tokio::task::block_in_place(|| {
                handle.block_on(async {
                    let phase = store.phase();
                    let manifest = store.manifest();
                    let rows = store.query(&query, 10).await;
                    let nested = store.rebuild(&sample_chunks(), &TopicEmbedder).await;
                    (phase, manifest, rows, nested)
                })
            }));
        })
        .await
        .expect("rebuild should succeed");

    let (phase, manifest, rows, nested) = observed.expect("progress should be reported");
    assert_eq!(phase, StorePhase::Building);
    assert_eq!(manifest, Some(original));
    let rows = rows.expect("query during rebuild should succeed");
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0].chunk_metadata.source, "products/petllm.md");
    assert!(matches!(nested, Err(RagError::Ingestion(_))));

    assert_eq!(store.phase(), StorePhase::Ready);
    assert_eq!(store.count().await.expect("count should succeed"), 1);
}

#[tokio::test]
async fn corrupt_manifest_is_reported() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("vector_db");
    std::fs::create_dir_all(&path).expect("should create dir");
    std::fs::write(path.join(MANIFEST_FILE), "{ not json").expect("should write manifest");

    let result = VectorStore::open(&path, DistanceMetric::Cosine).await;
    assert!(matches!(result, Err(RagError::Database(_))));
}

#[tokio::test]
async fn progress_reports_every_chunk() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = open_store(&temp_dir).await;

    let mut reported = 0;
    store
        .rebuild_with_progress(&sample_chunks(), &TopicEmbedder, |n| reported += n)
        .await
        .expect("rebuild should succeed");

    assert_eq!(reported, 4);
}

#[test]
fn phase_display() {
    assert_eq!(StorePhase::Empty.to_string(), "empty");
    assert_eq!(StorePhase::Building.to_string(), "building");
    assert_eq!(StorePhase::Ready.to_string(), "ready");
}
