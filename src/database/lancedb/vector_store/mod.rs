#[cfg(test)]
mod tests;

use super::{ChunkMetadata, EmbeddingRecord};
use crate::config::{Config, DistanceMetric};
use crate::embeddings::{ContentChunk, Embedder};
use crate::{RagError, Result};
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::Utc;
use fs2::FileExt;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType, Table,
    query::{ExecutableQuery, QueryBase},
};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const MANIFEST_FILE: &str = "collection.json";
const LOCK_FILE: &str = "rebuild.lock";
const TABLE_PREFIX: &str = "chunks_";
/// Texts handed to the embedder per call during a rebuild
const EMBED_BATCH_SIZE: usize = 64;

/// Vector database store using LanceDB for similarity search.
///
/// Each ingestion run writes a complete new table. A small JSON manifest in
/// the store directory names the active table, so a rebuild becomes visible
/// in one atomic rename and readers keep using the previous table until then.
pub struct VectorStore {
    connection: Connection,
    root: PathBuf,
    distance: DistanceMetric,
    active: RwLock<Option<ActiveCollection>>,
    building: AtomicBool,
}

#[derive(Clone)]
struct ActiveCollection {
    /// `None` when the last ingestion produced no chunks
    table: Option<Table>,
    manifest: CollectionManifest,
}

/// Persisted description of the active collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionManifest {
    pub table: Option<String>,
    pub dimension: Option<usize>,
    pub entries: usize,
    pub embedding_model: String,
    pub created_at: String,
}

/// Lifecycle of the store as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorePhase {
    /// Nothing has been ingested yet
    Empty,
    /// A rebuild is running; queries still see the previous collection
    Building,
    /// A collection is active
    Ready,
}

impl std::fmt::Display for StorePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty"),
            Self::Building => write!(f, "building"),
            Self::Ready => write!(f, "ready"),
        }
    }
}

/// Search result from vector similarity search
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub id: String,
    pub chunk_metadata: ChunkMetadata,
    pub similarity_score: f32,
    pub distance: f32,
}

/// Resets the building flag however a rebuild ends
struct BuildGuard<'a>(&'a AtomicBool);

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Exclusive advisory lock on the store directory, held for a whole rebuild.
///
/// Released by the OS if the holding process dies.
struct RebuildLock {
    file: File,
}

impl RebuildLock {
    fn acquire(root: &Path) -> Result<Self> {
        let path = root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(RagError::Ingestion(format!(
                "Another process is rebuilding the vector store at {}",
                root.display()
            )));
        }

        debug!("Acquired rebuild lock {:?}", path);
        Ok(Self { file })
    }
}

impl Drop for RebuildLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release rebuild lock: {}", e);
        }
    }
}

impl VectorStore {
    /// Open the store configured in `config`
    #[inline]
    pub async fn new(config: &Config) -> Result<Self> {
        Self::open(config.vector_database_path(), config.retrieval.distance).await
    }

    /// Open (or create) the store at `path`.
    ///
    /// A missing directory is created and treated as an empty store. Opening
    /// never drops tables, so it is safe while another process rebuilds.
    /// A relative `path` is resolved against the current directory.
    #[inline]
    pub async fn open(path: impl Into<PathBuf>, distance: DistanceMetric) -> Result<Self> {
        let path = path.into();
        let root = std::path::absolute(&path).map_err(|e| {
            RagError::Config(format!(
                "Vector store path {} cannot be resolved: {}",
                path.display(),
                e
            ))
        })?;
        debug!("Initializing LanceDB at path: {:?}", root);

        std::fs::create_dir_all(&root).map_err(|e| {
            RagError::Config(format!(
                "Vector store directory {} cannot be created: {}",
                root.display(),
                e
            ))
        })?;

        let uri = format!("file://{}", root.display());
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to connect to LanceDB: {}", e)))?;

        let store = Self {
            connection,
            root,
            distance,
            active: RwLock::new(None),
            building: AtomicBool::new(false),
        };

        let active = store.load_active_collection().await?;
        store.swap_active(active)?;

        info!("Vector store opened in phase {}", store.phase());
        Ok(store)
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn distance(&self) -> DistanceMetric {
        self.distance
    }

    #[inline]
    pub fn phase(&self) -> StorePhase {
        if self.building.load(Ordering::Acquire) {
            return StorePhase::Building;
        }
        match self.active.read() {
            Ok(active) if active.is_some() => StorePhase::Ready,
            _ => StorePhase::Empty,
        }
    }

    /// Manifest of the active collection, if any
    #[inline]
    pub fn manifest(&self) -> Option<CollectionManifest> {
        self.current().map(|active| active.manifest)
    }

    /// Dimension of the stored vectors, if any vectors are stored
    #[inline]
    pub fn dimension(&self) -> Option<usize> {
        self.current().and_then(|active| active.manifest.dimension)
    }

    /// Number of entries in the active collection
    #[inline]
    pub async fn count(&self) -> Result<usize> {
        let Some(table) = self.current().and_then(|active| active.table) else {
            return Ok(0);
        };

        table
            .count_rows(None)
            .await
            .map_err(|e| RagError::Database(format!("Failed to count rows: {}", e)))
    }

    /// Replace the whole collection with embeddings of `chunks`
    #[inline]
    pub async fn rebuild(
        &self,
        chunks: &[ContentChunk],
        embedder: &dyn Embedder,
    ) -> Result<CollectionManifest> {
        self.rebuild_with_progress(chunks, embedder, |_| {}).await
    }

    /// Replace the whole collection with embeddings of `chunks`.
    ///
    /// `on_batch` receives the number of chunks embedded by each embedder
    /// call. Any failure leaves the previous collection active and untouched.
    /// Only one rebuild may run per store directory, across processes.
    #[inline]
    pub async fn rebuild_with_progress(
        &self,
        chunks: &[ContentChunk],
        embedder: &dyn Embedder,
        mut on_batch: impl FnMut(usize),
    ) -> Result<CollectionManifest> {
        if self.building.swap(true, Ordering::AcqRel) {
            return Err(RagError::Ingestion(
                "Another rebuild of this vector store is already running".to_string(),
            ));
        }
        let _guard = BuildGuard(&self.building);
        let _lock = RebuildLock::acquire(&self.root)?;
        self.purge_orphan_tables().await;

        info!(
            "Rebuilding vector store from {} chunks with model {}",
            chunks.len(),
            embedder.model_name()
        );

        let mut records = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let vectors = embedder
                .embed_batch(&texts)
                .map_err(|e| RagError::Embedding(format!("{:#}", e)))?;

            if vectors.len() != batch.len() {
                return Err(RagError::Embedding(format!(
                    "Embedder returned {} vectors for {} chunks",
                    vectors.len(),
                    batch.len()
                )));
            }

            records.extend(
                batch
                    .iter()
                    .zip(vectors)
                    .map(|(chunk, vector)| EmbeddingRecord::from_chunk(chunk, vector)),
            );
            on_batch(batch.len());
        }

        self.replace_collection(records, embedder.model_name())
            .await
    }

    /// Write `records` as a fresh collection and make it the active one.
    ///
    /// Callers hold the building flag and the rebuild lock.
    async fn replace_collection(
        &self,
        records: Vec<EmbeddingRecord>,
        embedding_model: &str,
    ) -> Result<CollectionManifest> {
        let dimension = records.first().map(|r| r.vector.len());
        if let Some(expected) = dimension {
            if expected == 0 {
                return Err(RagError::Embedding("Embedder returned empty vectors".to_string()));
            }
            if let Some(odd) = records.iter().find(|r| r.vector.len() != expected) {
                return Err(RagError::DimensionMismatch {
                    expected,
                    actual: odd.vector.len(),
                });
            }
        }

        let table = match dimension {
            Some(dim) => Some(self.write_new_table(&records, dim).await?),
            None => None,
        };

        let manifest = CollectionManifest {
            table: table.as_ref().map(|t| t.name().to_string()),
            dimension,
            entries: records.len(),
            embedding_model: embedding_model.to_string(),
            created_at: Utc::now().to_rfc3339(),
        };

        if let Err(e) = self.write_manifest(&manifest).await {
            error!("Failed to persist manifest, discarding new table: {}", e);
            if let Some(name) = &manifest.table {
                self.drop_table_if_exists(name).await.ok();
            }
            return Err(e);
        }

        let previous = self.swap_active(Some(ActiveCollection {
            table,
            manifest: manifest.clone(),
        }))?;

        if let Some(old_name) = previous.and_then(|p| p.manifest.table) {
            if let Err(e) = self.drop_table_if_exists(&old_name).await {
                warn!("Failed to drop previous table {}: {}", old_name, e);
            }
        }

        info!(
            "There are {} vectors with {} dimensions in the vector store",
            manifest.entries,
            manifest.dimension.unwrap_or(0)
        );
        Ok(manifest)
    }

    /// Search for the `k` stored entries nearest to `query_vector`.
    ///
    /// Ordering among equidistant entries is whatever LanceDB returns.
    #[inline]
    pub async fn query(&self, query_vector: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        debug!("Searching for similar vectors with limit: {}", k);

        let Some(active) = self.current() else {
            debug!("Vector store is empty");
            return Ok(Vec::new());
        };
        let (Some(table), Some(dimension)) = (active.table, active.manifest.dimension) else {
            debug!("Active collection has no entries");
            return Ok(Vec::new());
        };

        if query_vector.len() != dimension {
            return Err(RagError::DimensionMismatch {
                expected: dimension,
                actual: query_vector.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let results = table
            .vector_search(query_vector)
            .map_err(|e| RagError::Database(format!("Failed to create vector search: {}", e)))?
            .column("vector")
            .distance_type(self.lance_distance())
            .limit(k)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to execute search: {}", e)))?;

        self.parse_search_results_stream(results).await
    }

    fn lance_distance(&self) -> DistanceType {
        match self.distance {
            DistanceMetric::Cosine => DistanceType::Cosine,
            DistanceMetric::L2 => DistanceType::L2,
        }
    }

    fn current(&self) -> Option<ActiveCollection> {
        match self.active.read() {
            Ok(active) => active.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn swap_active(&self, next: Option<ActiveCollection>) -> Result<Option<ActiveCollection>> {
        let mut active = self
            .active
            .write()
            .map_err(|_| RagError::Database("Vector store state lock poisoned".to_string()))?;
        Ok(std::mem::replace(&mut *active, next))
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    /// Read the manifest and open the table it names
    async fn load_active_collection(&self) -> Result<Option<ActiveCollection>> {
        let manifest_path = self.manifest_path();
        let content = match tokio::fs::read_to_string(&manifest_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No manifest at {:?}, store is empty", manifest_path);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let manifest: CollectionManifest = serde_json::from_str(&content).map_err(|e| {
            RagError::Database(format!(
                "Corrupt vector store manifest {}: {}",
                manifest_path.display(),
                e
            ))
        })?;

        let Some(table_name) = manifest.table.clone() else {
            return Ok(Some(ActiveCollection {
                table: None,
                manifest,
            }));
        };

        let table = self
            .connection
            .open_table(&table_name)
            .execute()
            .await
            .map_err(|e| {
                RagError::Database(format!(
                    "Manifest {} names table {} which cannot be opened: {}",
                    manifest_path.display(),
                    table_name,
                    e
                ))
            })?;

        let stored_dimension = Self::detect_vector_dimension(&table).await?;
        if manifest.dimension != Some(stored_dimension) {
            return Err(RagError::Database(format!(
                "Manifest dimension {:?} disagrees with table dimension {}",
                manifest.dimension, stored_dimension
            )));
        }

        info!(
            "Opened collection {} ({} entries, {} dimensions, model {})",
            table_name, manifest.entries, stored_dimension, manifest.embedding_model
        );

        Ok(Some(ActiveCollection {
            table: Some(table),
            manifest,
        }))
    }

    /// Drop tables left behind by an interrupted rebuild.
    ///
    /// Runs under the rebuild lock. Tables named by the manifest on disk or
    /// by the collection this handle serves are kept.
    async fn purge_orphan_tables(&self) {
        let on_disk = match self.read_manifest_table().await {
            Ok(table) => table,
            Err(e) => {
                warn!("Skipping orphan purge, manifest unreadable: {}", e);
                return;
            }
        };
        let in_memory = self.current().and_then(|a| a.manifest.table);
        let keep = [on_disk, in_memory];

        let table_names = match self.connection.table_names().execute().await {
            Ok(names) => names,
            Err(e) => {
                warn!("Failed to list tables while purging orphans: {}", e);
                return;
            }
        };

        for name in table_names
            .iter()
            .filter(|name| {
                name.starts_with(TABLE_PREFIX) && !keep.iter().flatten().any(|k| k == *name)
            })
        {
            info!("Dropping orphaned table {}", name);
            if let Err(e) = self.drop_table_if_exists(name).await {
                warn!("Failed to drop orphaned table {}: {}", name, e);
            }
        }
    }

    /// Table named by the manifest currently on disk
    async fn read_manifest_table(&self) -> Result<Option<String>> {
        let content = match tokio::fs::read_to_string(self.manifest_path()).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let manifest: CollectionManifest = serde_json::from_str(&content)
            .map_err(|e| RagError::Database(format!("Corrupt vector store manifest: {}", e)))?;
        Ok(manifest.table)
    }

    /// Detect vector dimension from a table schema
    async fn detect_vector_dimension(table: &Table) -> Result<usize> {
        let schema = table
            .schema()
            .await
            .map_err(|e| RagError::Database(format!("Failed to get table schema: {}", e)))?;

        for field in schema.fields() {
            if field.name() == "vector" {
                if let DataType::FixedSizeList(_, size) = field.data_type() {
                    return usize::try_from(*size)
                        .map_err(|_| RagError::Database("Negative vector dimension".to_string()));
                }
            }
        }

        Err(RagError::Database(
            "Could not find vector column or determine dimension".to_string(),
        ))
    }

    /// Create schema with the specified vector dimension
    fn create_schema(vector_dim: i32) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    vector_dim,
                ),
                false,
            ),
            Field::new("source", DataType::Utf8, false),
            Field::new("category", DataType::Utf8, false),
            Field::new("chunk_index", DataType::UInt32, false),
            Field::new("offset", DataType::UInt32, false),
            Field::new("content", DataType::Utf8, false),
        ]))
    }

    /// Create a generation-named table holding `records`
    async fn write_new_table(&self, records: &[EmbeddingRecord], vector_dim: usize) -> Result<Table> {
        let dim = i32::try_from(vector_dim).map_err(|_| {
            RagError::Database(format!("Vector dimension {} is too large", vector_dim))
        })?;
        let table_name = format!("{}{}", TABLE_PREFIX, Uuid::new_v4().simple());
        debug!("Writing {} embeddings to new table {}", records.len(), table_name);

        let schema = Self::create_schema(dim);
        let table = self
            .connection
            .create_empty_table(&table_name, Arc::clone(&schema))
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to create table: {}", e)))?;

        if let Err(e) = Self::insert_records(&table, records, dim, schema).await {
            self.drop_table_if_exists(&table_name).await.ok();
            return Err(e);
        }

        Ok(table)
    }

    async fn insert_records(
        table: &Table,
        records: &[EmbeddingRecord],
        vector_dim: i32,
        schema: Arc<Schema>,
    ) -> Result<()> {
        let record_batch = Self::create_record_batch(records, vector_dim, schema)?;
        let batch_schema = record_batch.schema();
        let reader = RecordBatchIterator::new(vec![Ok(record_batch)].into_iter(), batch_schema);

        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to insert embeddings: {}", e)))?;

        Ok(())
    }

    /// Create a RecordBatch from embedding records
    fn create_record_batch(
        records: &[EmbeddingRecord],
        vector_dim: i32,
        schema: Arc<Schema>,
    ) -> Result<RecordBatch> {
        let len = records.len();

        let mut ids = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * vector_dim as usize);
        let mut sources = Vec::with_capacity(len);
        let mut categories = Vec::with_capacity(len);
        let mut chunk_indices = Vec::with_capacity(len);
        let mut offsets = Vec::with_capacity(len);
        let mut contents = Vec::with_capacity(len);

        for record in records {
            ids.push(record.id.as_str());
            flat_values.extend_from_slice(&record.vector);
            sources.push(record.metadata.source.as_str());
            categories.push(record.metadata.category.as_str());
            chunk_indices.push(record.metadata.chunk_index);
            offsets.push(record.metadata.offset);
            contents.push(record.metadata.content.as_str());
        }

        let values_array = Float32Array::from(flat_values);
        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array =
            FixedSizeListArray::try_new(field, vector_dim, Arc::new(values_array), None).map_err(
                |e| RagError::Database(format!("Failed to create vector array: {}", e)),
            )?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(sources)),
            Arc::new(StringArray::from(categories)),
            Arc::new(UInt32Array::from(chunk_indices)),
            Arc::new(UInt32Array::from(offsets)),
            Arc::new(StringArray::from(contents)),
        ];

        RecordBatch::try_new(schema, arrays)
            .map_err(|e| RagError::Database(format!("Failed to create record batch: {}", e)))
    }

    /// Replace the manifest file in one rename
    async fn write_manifest(&self, manifest: &CollectionManifest) -> Result<()> {
        let json = serde_json::to_string_pretty(manifest)
            .map_err(|e| RagError::Database(format!("Failed to serialize manifest: {}", e)))?;

        let path = self.manifest_path();
        let temp_path = path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, json).await?;
        tokio::fs::rename(&temp_path, &path).await?;

        debug!("Manifest written to {:?}", path);
        Ok(())
    }

    /// Parse search results from LanceDB stream into SearchResult structs
    async fn parse_search_results_stream(
        &self,
        mut results: lancedb::arrow::SendableRecordBatchStream,
    ) -> Result<Vec<SearchResult>> {
        let mut search_results = Vec::new();

        while let Some(batch_result) = results
            .try_next()
            .await
            .map_err(|e| RagError::Database(format!("Failed to read result stream: {}", e)))?
        {
            let parsed_batch = self.parse_search_batch(&batch_result)?;
            search_results.extend(parsed_batch);
        }

        debug!("Parsed {} search results from stream", search_results.len());
        Ok(search_results)
    }

    /// Parse a single record batch from search results
    fn parse_search_batch(&self, batch: &RecordBatch) -> Result<Vec<SearchResult>> {
        let ids = string_column(batch, "id")?;
        let sources = string_column(batch, "source")?;
        let categories = string_column(batch, "category")?;
        let contents = string_column(batch, "content")?;
        let chunk_indices = u32_column(batch, "chunk_index")?;
        let offsets = u32_column(batch, "offset")?;

        // Extract distance scores if available
        let distances = batch
            .column_by_name("_distance")
            .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

        let mut search_results = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let chunk_metadata = ChunkMetadata {
                source: sources.value(row).to_string(),
                category: categories.value(row).to_string(),
                chunk_index: chunk_indices.value(row),
                offset: offsets.value(row),
                content: contents.value(row).to_string(),
            };

            let distance =
                distances.map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

            // Convert distance to similarity score (higher is better)
            let similarity_score = match self.distance {
                DistanceMetric::Cosine => 1.0 - distance,
                DistanceMetric::L2 => 1.0 / (1.0 + distance),
            };

            search_results.push(SearchResult {
                id: ids.value(row).to_string(),
                chunk_metadata,
                similarity_score,
                distance,
            });
        }

        Ok(search_results)
    }

    /// Drop a table if it exists
    async fn drop_table_if_exists(&self, table_name: &str) -> Result<()> {
        let table_names =
            self.connection.table_names().execute().await.map_err(|e| {
                RagError::Database(format!("Failed to list tables for drop: {}", e))
            })?;

        if table_names.iter().any(|name| name == table_name) {
            info!("Dropping table {}", table_name);
            self.connection
                .drop_table(table_name)
                .await
                .map_err(|e| RagError::Database(format!("Failed to drop table: {}", e)))?;
        }

        Ok(())
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::Database(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| RagError::Database(format!("Invalid {} column type", name)))
}

fn u32_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a UInt32Array> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::Database(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| RagError::Database(format!("Invalid {} column type", name)))
}
