use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::Array;
use arrow_array::{
    types::Float32Type, FixedSizeListArray, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::stream::StreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};

use super::{SimilarityHit, SimilarityIndex};
use crate::apis::Paper;
use crate::embed::{embed_paper, embed_text, EMBEDDING_DIMENSION};

const TABLE_NAME: &str = "papers";

/// LanceDB-backed similarity index over paper title + abstract embeddings.
pub struct VectorStore {
    db: lancedb::Connection,
    schema: Arc<Schema>,
    has_rows: AtomicBool,
}

fn make_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("title", DataType::Utf8, false),
        Field::new("abstract_text", DataType::Utf8, true),
        Field::new("authors_json", DataType::Utf8, true),
        Field::new("published", DataType::Utf8, true),
        Field::new("categories_json", DataType::Utf8, true),
        Field::new("pdf_url", DataType::Utf8, true),
        Field::new("url", DataType::Utf8, true),
        Field::new(
            "embedding",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                EMBEDDING_DIMENSION as i32,
            ),
            true,
        ),
    ]))
}

fn quote(id: &str) -> String {
    format!("'{}'", id.replace('\'', "''"))
}

impl VectorStore {
    /// Create or open a LanceDB database at the given path.
    pub async fn create_or_open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path).context("Failed to create LanceDB directory")?;
        let uri = path
            .to_str()
            .context("LanceDB path is not valid UTF-8")?;

        let db = lancedb::connect(uri)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        let schema = make_schema();

        let tables = db
            .table_names()
            .execute()
            .await
            .context("Failed to list tables")?;
        if !tables.contains(&TABLE_NAME.to_string()) {
            db.create_empty_table(TABLE_NAME, schema.clone())
                .execute()
                .await
                .context("Failed to create papers table")?;
        }

        let store = Self {
            db,
            schema,
            has_rows: AtomicBool::new(false),
        };
        let count = store.count().await?;
        store.has_rows.store(count > 0, Ordering::Relaxed);
        tracing::info!(count, "Opened similarity index");
        Ok(store)
    }

    async fn table(&self) -> Result<lancedb::Table> {
        self.db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open papers table")
    }

    /// Insert papers, replacing any rows with the same identifier.
    /// Papers without an identifier are skipped.
    pub async fn upsert(&self, papers: &[Paper]) -> Result<usize> {
        let papers: Vec<&Paper> = papers.iter().filter(|p| p.key().is_some()).collect();
        if papers.is_empty() {
            return Ok(0);
        }
        let table = self.table().await?;

        let ids: Vec<&str> = papers.iter().filter_map(|p| p.key()).collect();
        let filter = format!(
            "id IN ({})",
            ids.iter().map(|id| quote(id)).collect::<Vec<_>>().join(", ")
        );
        table
            .delete(&filter)
            .await
            .context("Failed to remove previous rows")?;

        let authors: Vec<String> = papers
            .iter()
            .map(|p| serde_json::to_string(&p.authors).unwrap_or_default())
            .collect();
        let categories: Vec<String> = papers
            .iter()
            .map(|p| serde_json::to_string(&p.categories).unwrap_or_default())
            .collect();
        let embeddings: Vec<Vec<f32>> = papers.iter().map(|p| embed_paper(p)).collect();

        let batch = RecordBatch::try_new(
            self.schema.clone(),
            vec![
                Arc::new(StringArray::from(ids.clone())),
                Arc::new(StringArray::from(
                    papers.iter().map(|p| p.title.as_str()).collect::<Vec<_>>(),
                )),
                Arc::new(StringArray::from(
                    papers.iter().map(|p| Some(p.abstract_text.as_str())).collect::<Vec<_>>(),
                )),
                Arc::new(StringArray::from(
                    authors.iter().map(|s| Some(s.as_str())).collect::<Vec<_>>(),
                )),
                Arc::new(StringArray::from(
                    papers.iter().map(|p| Some(p.published.as_str())).collect::<Vec<_>>(),
                )),
                Arc::new(StringArray::from(
                    categories.iter().map(|s| Some(s.as_str())).collect::<Vec<_>>(),
                )),
                Arc::new(StringArray::from(
                    papers.iter().map(|p| p.pdf_url.as_deref()).collect::<Vec<_>>(),
                )),
                Arc::new(StringArray::from(
                    papers.iter().map(|p| p.url.as_deref()).collect::<Vec<_>>(),
                )),
                Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
                    embeddings
                        .iter()
                        .map(|e| Some(e.iter().map(|&v| Some(v)))),
                    EMBEDDING_DIMENSION as i32,
                )),
            ],
        )
        .context("Failed to create RecordBatch")?;

        let batches = RecordBatchIterator::new(vec![Ok(batch)], self.schema.clone());
        table
            .add(Box::new(batches))
            .execute()
            .await
            .context("Failed to add papers to vector store")?;

        self.has_rows.store(true, Ordering::Relaxed);
        Ok(ids.len())
    }

    /// Nearest papers to `embedding`, closest first.
    pub async fn search_embedding(&self, embedding: &[f32], limit: usize) -> Result<Vec<SimilarityHit>> {
        let table = self.table().await?;

        let mut results_stream = table
            .query()
            .nearest_to(embedding)
            .context("Failed to set up vector search")?
            .limit(limit)
            .execute()
            .await
            .context("Failed to execute vector search")?;

        let mut hits = Vec::new();
        while let Some(batch) = results_stream.next().await {
            let batch = batch.context("Failed to read search result batch")?;
            let dist_col = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<arrow_array::Float32Array>());

            for row in 0..batch.num_rows() {
                hits.push(SimilarityHit {
                    paper: batch_row_to_paper(&batch, row),
                    distance: dist_col.map(|d| d.value(row)).unwrap_or(0.0),
                });
            }
        }
        Ok(hits)
    }

    #[cfg(test)]
    async fn get_paper(&self, id: &str) -> Result<Option<Paper>> {
        let table = self.table().await?;

        let mut results_stream = table
            .query()
            .only_if(format!("id = {}", quote(id)))
            .limit(1)
            .execute()
            .await
            .context("Failed to query by ID")?;

        if let Some(batch) = results_stream.next().await {
            let batch = batch.context("Failed to read query result")?;
            if batch.num_rows() == 0 {
                return Ok(None);
            }
            Ok(Some(batch_row_to_paper(&batch, 0)))
        } else {
            Ok(None)
        }
    }

    pub async fn count(&self) -> Result<usize> {
        let table = self.table().await?;
        table.count_rows(None).await.context("Failed to count rows")
    }
}

#[async_trait]
impl SimilarityIndex for VectorStore {
    fn is_available(&self) -> bool {
        self.has_rows.load(Ordering::Relaxed)
    }

    async fn similarity_search(&self, query: &str, limit: usize) -> Result<Vec<SimilarityHit>> {
        self.search_embedding(&embed_text(query), limit).await
    }

    async fn add_papers(&self, papers: &[Paper]) -> Result<usize> {
        self.upsert(papers).await
    }
}

fn batch_row_to_paper(batch: &RecordBatch, row: usize) -> Paper {
    let get_str = |name: &str| -> Option<String> {
        batch
            .column_by_name(name)?
            .as_any()
            .downcast_ref::<StringArray>()
            .and_then(|a| {
                if a.is_null(row) {
                    None
                } else {
                    Some(a.value(row).to_string())
                }
            })
    };
    let get_list = |name: &str| -> Vec<String> {
        get_str(name)
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    };

    Paper {
        id: get_str("id"),
        title: get_str("title").unwrap_or_default(),
        authors: get_list("authors_json"),
        abstract_text: get_str("abstract_text").unwrap_or_default(),
        published: get_str("published").unwrap_or_default(),
        categories: get_list("categories_json"),
        pdf_url: get_str("pdf_url"),
        url: get_str("url"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_paper(id: &str, title: &str, abstract_text: &str) -> Paper {
        Paper {
            id: Some(id.to_string()),
            title: title.to_string(),
            authors: vec!["Test Author".to_string()],
            abstract_text: abstract_text.to_string(),
            published: "2024-01-01T00:00:00Z".to_string(),
            categories: vec!["hep-th".to_string()],
            pdf_url: None,
            url: Some("https://example.com".to_string()),
        }
    }

    #[tokio::test]
    async fn test_vectordb_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = VectorStore::create_or_open(tmp.path()).await.unwrap();
        assert!(!store.is_available());

        let papers = vec![
            sample_paper("test:001", "Holographic Entanglement in AdS/CFT", "Ryu-Takayanagi entanglement entropy."),
            sample_paper("test:002", "Quantum Error Correction Codes", "Surface codes for fault tolerance."),
            Paper { id: None, title: "No identifier".into(), ..Default::default() },
        ];
        assert_eq!(store.add_papers(&papers).await.unwrap(), 2);
        assert!(store.is_available());
        assert_eq!(store.count().await.unwrap(), 2);

        let hits = store
            .similarity_search("holographic entanglement entropy", 5)
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].paper.id.as_deref(), Some("test:001"));
        assert_eq!(hits[0].paper.categories, vec!["hep-th"]);

        let got = store.get_paper("test:002").await.unwrap().unwrap();
        assert_eq!(got.title, "Quantum Error Correction Codes");
        assert_eq!(got.authors, vec!["Test Author"]);
    }

    #[tokio::test]
    async fn test_readding_replaces_row() {
        let tmp = TempDir::new().unwrap();
        let store = VectorStore::create_or_open(tmp.path()).await.unwrap();

        store.upsert(&[sample_paper("x", "First title", "a")]).await.unwrap();
        store.upsert(&[sample_paper("x", "Second title", "b")]).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let got = store.get_paper("x").await.unwrap().unwrap();
        assert_eq!(got.title, "Second title");
    }

    #[tokio::test]
    async fn test_reopen_reports_availability() {
        let tmp = TempDir::new().unwrap();
        {
            let store = VectorStore::create_or_open(tmp.path()).await.unwrap();
            store.upsert(&[sample_paper("x", "Title", "abstract")]).await.unwrap();
        }
        let reopened = VectorStore::create_or_open(tmp.path()).await.unwrap();
        assert!(reopened.is_available());
    }
}
