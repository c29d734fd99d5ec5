
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType, Table,
    query::{ExecutableQuery, QueryBase},
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::{Distance, Point, PointPayload, SearchHit, VectorIndex};
use crate::{KnowledgeError, Result};

const DISTANCE_METADATA_KEY: &str = "knowledge.distance";

/// Embedded LanceDB index storing one table per collection
pub struct LanceIndex {
    connection: Connection,
}

fn db_error(context: &str, e: impl std::fmt::Display) -> KnowledgeError {
    KnowledgeError::VectorIndex(format!("{}: {}", context, e))
}

impl LanceIndex {
    /// Open or create the database under `path`
    #[inline]
    pub async fn open(path: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(path).await?;

        let uri = path.to_string_lossy().into_owned();
        debug!("Opening LanceDB at {}", uri);
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| db_error("Failed to connect to LanceDB", e))?;

        info!("LanceDB vector index opened at {}", uri);
        Ok(Self { connection })
    }

    fn list_width(vector_size: usize) -> Result<i32> {
        i32::try_from(vector_size).map_err(|_| {
            KnowledgeError::VectorIndex(format!(
                "Vector size {} exceeds what an Arrow list can hold",
                vector_size
            ))
        })
    }

    fn create_schema(vector_size: usize, distance: Distance) -> Result<Arc<Schema>> {
        let width = Self::list_width(vector_size)?;
        let metadata = HashMap::from([(
            DISTANCE_METADATA_KEY.to_string(),
            distance.as_str().to_string(),
        )]);

        Ok(Arc::new(Schema::new_with_metadata(
            vec![
                Field::new("id", DataType::UInt64, false),
                Field::new(
                    "vector",
                    DataType::FixedSizeList(
                        Arc::new(Field::new("item", DataType::Float32, true)),
                        width,
                    ),
                    false,
                ),
                Field::new("text", DataType::Utf8, false),
                Field::new("title", DataType::Utf8, false),
                Field::new("topic", DataType::Utf8, false),
            ],
            metadata,
        )))
    }

    async fn open_table(&self, name: &str) -> Result<Table> {
        self.connection
            .open_table(name)
            .execute()
            .await
            .map_err(|e| db_error(&format!("Failed to open table {}", name), e))
    }

    /// Vector width and distance recorded in the table schema
    async fn table_layout(table: &Table) -> Result<(usize, Distance)> {
        let schema = table
            .schema()
            .await
            .map_err(|e| db_error("Failed to read table schema", e))?;

        let size = schema
            .fields()
            .iter()
            .find(|f| f.name() == "vector")
            .and_then(|f| match f.data_type() {
                DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
                _ => None,
            })
            .ok_or_else(|| {
                KnowledgeError::VectorIndex("Table has no fixed-size vector column".to_string())
            })?;

        let distance = schema
            .metadata()
            .get(DISTANCE_METADATA_KEY)
            .and_then(|value| Distance::parse(value))
            .unwrap_or_default();

        Ok((size, distance))
    }

    fn record_batch(points: &[Point], vector_size: usize, distance: Distance) -> Result<RecordBatch> {
        let mut flat_values = Vec::with_capacity(points.len() * vector_size);
        for point in points {
            flat_values.extend_from_slice(&point.vector);
        }

        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let vector_array = FixedSizeListArray::try_new(
            field,
            Self::list_width(vector_size)?,
            Arc::new(Float32Array::from(flat_values)),
            None,
        )
        .map_err(|e| db_error("Failed to create vector array", e))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(UInt64Array::from_iter_values(points.iter().map(|p| p.id))),
            Arc::new(vector_array),
            Arc::new(StringArray::from_iter_values(
                points.iter().map(|p| p.payload.text.as_str()),
            )),
            Arc::new(StringArray::from_iter_values(
                points.iter().map(|p| p.payload.title.as_str()),
            )),
            Arc::new(StringArray::from_iter_values(
                points.iter().map(|p| p.payload.topic.as_str()),
            )),
        ];

        RecordBatch::try_new(Self::create_schema(vector_size, distance)?, arrays)
            .map_err(|e| db_error("Failed to create record batch", e))
    }

    fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
        batch
            .column_by_name(name)
            .and_then(|col| col.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| KnowledgeError::VectorIndex(format!("Missing {} column", name)))
    }

    fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<SearchHit>> {
        let ids = batch
            .column_by_name("id")
            .and_then(|col| col.as_any().downcast_ref::<UInt64Array>())
            .ok_or_else(|| KnowledgeError::VectorIndex("Missing id column".to_string()))?;
        let texts = Self::string_column(batch, "text")?;
        let titles = Self::string_column(batch, "title")?;
        let topics = Self::string_column(batch, "topic")?;
        let distances = batch
            .column_by_name("_distance")
            .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

        let hits = (0..batch.num_rows())
            .map(|row| {
                let distance = distances
                    .map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });
                SearchHit {
                    id: ids.value(row),
                    // Lance reports both metrics as 1 - similarity
                    score: 1.0 - distance,
                    payload: PointPayload {
                        text: texts.value(row).to_string(),
                        title: titles.value(row).to_string(),
                        topic: topics.value(row).to_string(),
                    },
                }
            })
            .collect();
        Ok(hits)
    }
}

fn id_predicate(ids: &[u64]) -> String {
    let list = ids
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!("id IN ({})", list)
}

#[async_trait]
impl VectorIndex for LanceIndex {
    #[inline]
    fn backend_name(&self) -> &'static str {
        "lancedb"
    }

    async fn create_collection(
        &self,
        name: &str,
        vector_size: usize,
        distance: Distance,
    ) -> Result<bool> {
        if self.list_collections().await?.iter().any(|t| t == name) {
            debug!("LanceDB table {} already exists", name);
            return Ok(false);
        }

        self.connection
            .create_empty_table(name, Self::create_schema(vector_size, distance)?)
            .execute()
            .await
            .map_err(|e| db_error(&format!("Failed to create table {}", name), e))?;

        info!("Created LanceDB table {} with {} dimensions", name, vector_size);
        Ok(true)
    }

    async fn upload_points(&self, collection: &str, points: Vec<Point>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        let table = self.open_table(collection).await?;
        let (vector_size, distance) = Self::table_layout(&table).await?;
        if let Some(bad) = points.iter().find(|p| p.vector.len() != vector_size) {
            return Err(KnowledgeError::VectorIndex(format!(
                "Point {} has {} dimensions, table '{}' expects {}",
                bad.id,
                bad.vector.len(),
                collection,
                vector_size
            )));
        }

        let ids: Vec<u64> = points.iter().map(|p| p.id).collect();
        let batch = Self::record_batch(&points, vector_size, distance)?;

        // Re-uploading an id replaces the stored point
        table
            .delete(&id_predicate(&ids))
            .await
            .map_err(|e| db_error("Failed to replace existing points", e))?;

        let schema = batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| db_error("Failed to insert points", e))?;

        debug!("Stored {} points in {}", ids.len(), collection);
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<SearchHit>> {
        let table = self.open_table(collection).await?;
        let row_count = table
            .count_rows(None)
            .await
            .map_err(|e| db_error("Failed to count rows", e))?;
        if row_count == 0 {
            return Ok(Vec::new());
        }

        let (_, distance) = Self::table_layout(&table).await?;
        let distance_type = match distance {
            Distance::Cosine => DistanceType::Cosine,
            Distance::Dot => DistanceType::Dot,
        };

        let mut results = table
            .vector_search(vector)
            .map_err(|e| db_error("Failed to create vector search", e))?
            .column("vector")
            .distance_type(distance_type)
            .limit(limit)
            .execute()
            .await
            .map_err(|e| db_error("Failed to execute search", e))?;

        let mut hits = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| db_error("Failed to read result stream", e))?
        {
            hits.extend(Self::parse_search_batch(&batch)?);
        }

        hits.retain(|hit| hit.score >= score_threshold);
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        self.connection
            .table_names()
            .execute()
            .await
            .map_err(|e| db_error("Failed to list tables", e))
    }

    async fn delete_points(&self, collection: &str, ids: &[u64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let table = self.open_table(collection).await?;
        table
            .delete(&id_predicate(ids))
            .await
            .map_err(|e| db_error("Failed to delete points", e))?;
        Ok(())
    }

    async fn count_points(&self, collection: &str) -> Result<u64> {
        let table = self.open_table(collection).await?;
        let rows = table
            .count_rows(None)
            .await
            .map_err(|e| db_error("Failed to count rows", e))?;
        Ok(rows as u64)
    }
}
