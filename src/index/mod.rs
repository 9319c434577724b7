pub mod vectordb;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::apis::Paper;

#[derive(Debug, Clone)]
pub struct SimilarityHit {
    pub paper: Paper,
    pub distance: f32,
}

/// Optional nearest-neighbour search over previously indexed papers.
///
/// Callers skip the index entirely while `is_available` is false.
#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    fn is_available(&self) -> bool;
    async fn similarity_search(&self, query: &str, limit: usize) -> Result<Vec<SimilarityHit>>;
    async fn add_papers(&self, papers: &[Paper]) -> Result<usize>;
}

/// Open the LanceDB index under `data_dir/lance`. Failure disables the index
/// rather than the service.
pub async fn open(data_dir: &Path) -> Option<Arc<dyn SimilarityIndex>> {
    match vectordb::VectorStore::create_or_open(&data_dir.join("lance")).await {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            tracing::warn!("Similarity index disabled: {:#}", e);
            None
        }
    }
}
