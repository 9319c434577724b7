use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::apis::{ArxivQuery, Paper, PaperSource, SortBy, SortOrder};
use crate::cache::KnowledgeCache;
use crate::config::Config;
use crate::error::AppError;
use crate::index::SimilarityIndex;
use crate::search::{self, ScoredPaper, SearchFilters};
use crate::text::normalize_query;

const TRENDING_TOPICS: &[&str] = &[
    "machine learning",
    "deep learning",
    "artificial intelligence",
    "neural networks",
    "natural language processing",
];
const TRENDING_PER_TOPIC: u32 = 10;
const TRENDING_LIMIT: usize = 20;

const SUGGESTION_TOPICS: &[&str] = &[
    "machine learning",
    "deep learning",
    "natural language processing",
    "computer vision",
    "neural networks",
    "artificial intelligence",
    "data mining",
    "information retrieval",
    "reinforcement learning",
    "large language models",
    "graph neural networks",
    "diffusion models",
];
const MAX_SUGGESTIONS: usize = 10;

const UPDATE_PAPERS_PER_CATEGORY: u32 = 50;
const UPDATE_WINDOW_DAYS: i64 = 30;

const CATEGORY_NAMES: &[(&str, &str)] = &[
    ("cs.AI", "Artificial Intelligence"),
    ("cs.CV", "Computer Vision"),
    ("cs.CL", "Computation and Language"),
    ("cs.LG", "Machine Learning"),
    ("cs.IR", "Information Retrieval"),
    ("cs.NE", "Neural and Evolutionary Computing"),
    ("stat.ML", "Statistical Machine Learning"),
    ("cs.RO", "Robotics"),
    ("cs.CC", "Computational Complexity"),
    ("cs.DS", "Data Structures and Algorithms"),
    ("cs.SE", "Software Engineering"),
    ("cs.PL", "Programming Languages"),
    ("cs.DB", "Databases"),
    ("cs.CR", "Cryptography and Security"),
    ("cs.DC", "Distributed, Parallel, and Cluster Computing"),
];

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    pub limit: usize,
    pub offset: usize,
    pub filters: SearchFilters,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, limit: usize) -> Self {
        Self {
            query: query.into(),
            limit,
            offset: 0,
            filters: SearchFilters::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub papers: Vec<ScoredPaper>,
    pub total: usize,
    pub query: String,
    pub took: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeStats {
    pub last_updated: Option<DateTime<Utc>>,
    pub total_papers: u64,
    pub cached_papers: usize,
    pub categories: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub total_updated: usize,
    pub categories: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryInfo {
    pub id: String,
    pub name: String,
    pub count: u64,
}

/// Paper lookup and search over the upstream feed, with a local file cache
/// and an optional similarity index.
pub struct KnowledgeBase {
    config: Arc<Config>,
    source: Arc<dyn PaperSource>,
    index: Option<Arc<dyn SimilarityIndex>>,
    cache: Mutex<KnowledgeCache>,
}

impl KnowledgeBase {
    pub fn new(
        config: Arc<Config>,
        source: Arc<dyn PaperSource>,
        index: Option<Arc<dyn SimilarityIndex>>,
        cache: KnowledgeCache,
    ) -> Self {
        Self {
            config,
            source,
            index,
            cache: Mutex::new(cache),
        }
    }

    /// Upstream search merged with similarity hits, then filtered, ranked and paginated.
    ///
    /// With `remember`, the returned page is written to the cache.
    pub async fn search(&self, request: &SearchRequest, remember: bool) -> Result<SearchOutcome, AppError> {
        let started = Instant::now();
        let query = normalize_query(&request.query);
        tracing::info!(query = %query, offset = request.offset, limit = request.limit, "Searching papers");

        let wanted = request.offset.saturating_add(request.limit).max(1).saturating_mul(2);
        let max_results = u32::try_from(wanted)
            .unwrap_or(u32::MAX)
            .min(self.config.arxiv_max_results);
        let primary = self
            .source
            .search(&ArxivQuery::new(query.clone(), max_results))
            .await?;

        let secondary = self.similar(&query, request.limit).await;

        let page = search::aggregate(
            primary,
            secondary,
            &request.filters,
            &query,
            request.offset,
            request.limit,
        );

        if remember && !page.papers.is_empty() {
            let now = Utc::now();
            let mut cache = self.cache.lock().await;
            for scored in &page.papers {
                cache.remember(&scored.paper, now);
            }
            cache.save()?;
        }

        let took = started.elapsed().as_secs_f64();
        tracing::info!(
            total = page.total,
            returned = page.papers.len(),
            took_ms = (took * 1000.0) as u64,
            "Search finished"
        );
        Ok(SearchOutcome {
            papers: page.papers,
            total: page.total,
            query: request.query.clone(),
            took,
        })
    }

    /// Best-effort similarity lookup; any failure yields no hits.
    async fn similar(&self, query: &str, limit: usize) -> Vec<Paper> {
        let Some(index) = self.index.as_ref().filter(|i| i.is_available()) else {
            return Vec::new();
        };
        if limit == 0 {
            return Vec::new();
        }
        match index.similarity_search(query, limit).await {
            Ok(hits) => {
                let closest = hits.first().map(|h| h.distance);
                tracing::debug!(hits = hits.len(), ?closest, "Similarity search");
                hits.into_iter().map(|h| h.paper).collect()
            }
            Err(e) => {
                tracing::warn!("Similarity search failed, continuing without it: {:#}", e);
                Vec::new()
            }
        }
    }

    /// Paper detail, served from cache while fresh.
    pub async fn paper(&self, id: &str) -> Result<Paper, AppError> {
        {
            let cache = self.cache.lock().await;
            if let Some(paper) = cache.fresh(id, self.config.cache_ttl, Utc::now()) {
                tracing::debug!(id, "Serving paper from cache");
                return Ok(paper.clone());
            }
        }

        let paper = self
            .source
            .get_paper(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("paper {}", id)))?;

        // keyed by the requested id so the next lookup hits
        let mut keyed = paper.clone();
        if keyed.key() != Some(id) {
            keyed.id = Some(id.to_string());
        }
        let mut cache = self.cache.lock().await;
        cache.remember(&keyed, Utc::now());
        cache.save()?;
        Ok(paper)
    }

    /// Newest papers in a category submitted within the last `days`.
    pub async fn papers_by_category(
        &self,
        category: &str,
        max_results: u32,
        days: i64,
    ) -> Result<Vec<Paper>, AppError> {
        let now = Utc::now();
        let from = now - chrono::Duration::days(days.max(0));
        let query = format!(
            "cat:{} AND submittedDate:[{} TO {}]",
            category,
            from.format("%Y%m%d%H%M"),
            now.format("%Y%m%d%H%M"),
        );
        let papers = self
            .source
            .search(
                &ArxivQuery::new(query, max_results.min(self.config.arxiv_max_results))
                    .sorted(SortBy::SubmittedDate, SortOrder::Descending),
            )
            .await?;

        let mut cache = self.cache.lock().await;
        cache.record_category(category, papers.len() as u64);
        cache.save()?;
        tracing::info!(category, count = papers.len(), "Fetched category papers");
        Ok(papers)
    }

    /// Popular papers across a fixed set of topics. A failing topic is skipped.
    pub async fn trending(&self) -> Vec<ScoredPaper> {
        let mut all = Vec::new();
        for topic in TRENDING_TOPICS {
            match self.source.search(&ArxivQuery::new(*topic, TRENDING_PER_TOPIC)).await {
                Ok(papers) => all.extend(papers),
                Err(e) => tracing::warn!(topic, "Trending query failed: {}", e),
            }
        }
        let mut ranked = search::rank_by_popularity(all);
        ranked.truncate(TRENDING_LIMIT);
        ranked
    }

    /// Refresh the given categories (or the configured ones), feeding the
    /// similarity index and the cache.
    pub async fn update(&self, categories: Option<&[String]>) -> Result<UpdateReport, AppError> {
        let categories = categories
            .filter(|c| !c.is_empty())
            .unwrap_or(self.config.supported_categories.as_slice());
        tracing::info!(?categories, "Updating knowledge base");

        let mut report = UpdateReport {
            total_updated: 0,
            categories: BTreeMap::new(),
        };
        for category in categories {
            let papers = match self
                .papers_by_category(category, UPDATE_PAPERS_PER_CATEGORY, UPDATE_WINDOW_DAYS)
                .await
            {
                Ok(papers) => papers,
                Err(e) => {
                    tracing::warn!(category = %category, "Skipping category in update: {}", e);
                    report.categories.insert(category.clone(), 0);
                    continue;
                }
            };

            if let Some(index) = &self.index {
                if let Err(e) = index.add_papers(&papers).await {
                    tracing::warn!(category = %category, "Failed to index papers: {:#}", e);
                }
            }

            {
                let now = Utc::now();
                let mut cache = self.cache.lock().await;
                for paper in &papers {
                    cache.remember(paper, now);
                }
            }

            tracing::info!(category = %category, count = papers.len(), "Category updated");
            report.total_updated += papers.len();
            report.categories.insert(category.clone(), papers.len());
        }

        let mut cache = self.cache.lock().await;
        cache.mark_updated(Utc::now(), report.total_updated as u64);
        cache.save()?;
        tracing::info!(total = report.total_updated, "Knowledge base update finished");
        Ok(report)
    }

    pub async fn stats(&self) -> KnowledgeStats {
        let cache = self.cache.lock().await;
        let doc = cache.document();
        KnowledgeStats {
            last_updated: doc.last_updated,
            total_papers: doc.total_papers,
            cached_papers: doc.papers.len(),
            categories: doc.categories.clone(),
        }
    }

    pub async fn categories(&self) -> Vec<CategoryInfo> {
        let cache = self.cache.lock().await;
        self.config
            .supported_categories
            .iter()
            .map(|id| CategoryInfo {
                id: id.clone(),
                name: CATEGORY_NAMES
                    .iter()
                    .find(|(code, _)| code == id)
                    .map(|(_, name)| name.to_string())
                    .unwrap_or_else(|| id.clone()),
                count: cache.category_count(id),
            })
            .collect()
    }
}

/// Topic suggestions containing the (normalized) query.
pub fn search_suggestions(query: &str) -> Vec<String> {
    let needle = normalize_query(query).to_lowercase();
    SUGGESTION_TOPICS
        .iter()
        .filter(|topic| topic.contains(needle.as_str()))
        .take(MAX_SUGGESTIONS)
        .map(|t| t.to_string())
        .collect()
}

pub fn question_suggestions(query: &str) -> Vec<String> {
    let q = normalize_query(query);
    vec![
        q.clone(),
        format!("What is {}?", q),
        format!("What are the latest research advances in {}?", q),
    ]
}

/// Run `update` every `interval` in the background. The first run happens
/// one interval after start.
pub fn spawn_periodic_updates(kb: Arc<KnowledgeBase>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = kb.update(None).await {
                tracing::error!("Scheduled knowledge base update failed: {}", e);
            }
        }
    })
}


#[cfg(test)]
mod tests {
    use super::testing::{paper, StubSource};
    use super::*;
    use crate::index::SimilarityHit;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct StubIndex {
        available: bool,
        hits: Vec<Paper>,
        fail: bool,
        added: std::sync::Mutex<usize>,
    }

    impl StubIndex {
        fn new(available: bool, hits: Vec<Paper>) -> Self {
            Self {
                available,
                hits,
                fail: false,
                added: std::sync::Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl SimilarityIndex for StubIndex {
        fn is_available(&self) -> bool {
            self.available
        }

        async fn similarity_search(&self, _query: &str, limit: usize) -> anyhow::Result<Vec<SimilarityHit>> {
            if self.fail {
                anyhow::bail!("index corrupted");
            }
            Ok(self
                .hits
                .iter()
                .take(limit)
                .map(|p| SimilarityHit { paper: p.clone(), distance: 0.1 })
                .collect())
        }

        async fn add_papers(&self, papers: &[Paper]) -> anyhow::Result<usize> {
            *self.added.lock().unwrap() += papers.len();
            Ok(papers.len())
        }
    }

    fn kb_with(
        tmp: &TempDir,
        source: Arc<dyn PaperSource>,
        index: Option<Arc<dyn SimilarityIndex>>,
    ) -> KnowledgeBase {
        let config = Config {
            data_dir: tmp.path().to_path_buf(),
            supported_categories: vec!["cs.LG".into(), "cs.CL".into()],
            ..Config::default()
        };
        let cache = KnowledgeCache::load(&config.cache_file());
        KnowledgeBase::new(Arc::new(config), source, index, cache)
    }

    fn sample() -> Vec<Paper> {
        vec![
            paper("1", "Deep Learning Survey", "2023-01-01", &["cs.LG"]),
            paper("2", "Protein Folding", "2022-01-01", &["q-bio.BM"]),
            paper("3", "Deep Reinforcement Learning", "2021-06-01", &["cs.LG", "cs.AI"]),
        ]
    }

    #[tokio::test]
    async fn test_search_filters_ranks_and_paginates() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(StubSource::with(sample()));
        let kb = kb_with(&tmp, source.clone(), None);

        let mut request = SearchRequest::new("  deep   learning ", 10);
        request.filters.categories = vec!["cs.LG".into()];
        let outcome = kb.search(&request, false).await.unwrap();

        assert_eq!(outcome.total, 2);
        assert_eq!(outcome.papers[0].paper.id.as_deref(), Some("1"));
        assert_eq!(outcome.query, "  deep   learning ");

        let sent = source.recorded();
        assert_eq!(sent[0].search_query, "deep learning");
        assert_eq!(sent[0].max_results, 20);
        assert_eq!(sent[0].sort_by, SortBy::Relevance);
    }

    #[tokio::test]
    async fn test_upstream_fetch_is_capped() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(StubSource::with(sample()));
        let kb = kb_with(&tmp, source.clone(), None);

        let mut request = SearchRequest::new("x", 100);
        request.offset = 400;
        kb.search(&request, false).await.unwrap();
        assert_eq!(source.recorded()[0].max_results, 100);
    }

    #[tokio::test]
    async fn test_huge_offset_yields_empty_page() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(StubSource::with(sample()));
        let kb = kb_with(&tmp, source.clone(), None);

        let mut request = SearchRequest::new("deep", 10);
        request.offset = usize::MAX;
        let outcome = kb.search(&request, false).await.unwrap();
        assert_eq!(outcome.total, 3);
        assert!(outcome.papers.is_empty());
        assert_eq!(source.recorded()[0].max_results, 100);
    }

    #[tokio::test]
    async fn test_search_fails_when_upstream_fails() {
        let tmp = TempDir::new().unwrap();
        let index: Arc<dyn SimilarityIndex> = Arc::new(StubIndex::new(true, sample()));
        let kb = kb_with(&tmp, Arc::new(StubSource::failing()), Some(index));
        let err = kb.search(&SearchRequest::new("x", 5), false).await.unwrap_err();
        assert!(matches!(err, AppError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_similarity_hits_take_precedence() {
        let tmp = TempDir::new().unwrap();
        let mut indexed = paper("2", "Protein Folding (indexed copy)", "2022-01-01", &["q-bio.BM"]);
        indexed.abstract_text = String::new();
        let index: Arc<dyn SimilarityIndex> = Arc::new(StubIndex::new(true, vec![indexed]));
        let kb = kb_with(&tmp, Arc::new(StubSource::with(sample())), Some(index));

        let outcome = kb.search(&SearchRequest::new("unrelated", 10), false).await.unwrap();
        assert_eq!(outcome.total, 3);
        let copy = outcome
            .papers
            .iter()
            .find(|p| p.paper.id.as_deref() == Some("2"))
            .unwrap();
        assert_eq!(copy.paper.title, "Protein Folding (indexed copy)");
    }

    #[tokio::test]
    async fn test_unavailable_or_failing_index_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let extra = vec![paper("99", "Only In Index", "2020-01-01", &[])];

        let unavailable: Arc<dyn SimilarityIndex> = Arc::new(StubIndex::new(false, extra.clone()));
        let kb = kb_with(&tmp, Arc::new(StubSource::with(sample())), Some(unavailable));
        assert_eq!(kb.search(&SearchRequest::new("x", 10), false).await.unwrap().total, 3);

        let mut failing = StubIndex::new(true, extra);
        failing.fail = true;
        let failing: Arc<dyn SimilarityIndex> = Arc::new(failing);
        let kb = kb_with(&tmp, Arc::new(StubSource::with(sample())), Some(failing));
        assert_eq!(kb.search(&SearchRequest::new("x", 10), false).await.unwrap().total, 3);
    }

    #[tokio::test]
    async fn test_remembered_search_writes_cache() {
        let tmp = TempDir::new().unwrap();
        let kb = kb_with(&tmp, Arc::new(StubSource::with(sample())), None);
        kb.search(&SearchRequest::new("deep", 2), true).await.unwrap();

        assert_eq!(kb.stats().await.cached_papers, 2);
        let on_disk = KnowledgeCache::load(&tmp.path().join("knowledge_cache.json"));
        assert_eq!(on_disk.document().papers.len(), 2);
    }

    #[tokio::test]
    async fn test_paper_lookup_uses_cache_then_upstream() {
        let tmp = TempDir::new().unwrap();
        let kb = kb_with(&tmp, Arc::new(StubSource::with(sample())), None);

        let p = kb.paper("2").await.unwrap();
        assert_eq!(p.title, "Protein Folding");
        assert_eq!(kb.stats().await.cached_papers, 1);

        // served from cache even once upstream is gone
        let offline = kb_with(&tmp, Arc::new(StubSource::failing()), None);
        assert_eq!(offline.paper("2").await.unwrap().title, "Protein Folding");

        let err = kb.paper("missing").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stale_cache_entry_is_refetched() {
        let tmp = TempDir::new().unwrap();
        let mut cache = KnowledgeCache::load(&tmp.path().join("knowledge_cache.json"));
        let stale = Utc::now() - chrono::Duration::days(8);
        cache.remember(&paper("2", "Old Title", "2022-01-01", &[]), stale);
        cache.save().unwrap();

        let kb = kb_with(&tmp, Arc::new(StubSource::with(sample())), None);
        assert_eq!(kb.paper("2").await.unwrap().title, "Protein Folding");

        let offline = kb_with(&tmp, Arc::new(StubSource::failing()), None);
        assert_eq!(offline.paper("2").await.unwrap().title, "Protein Folding");
    }

    #[tokio::test]
    async fn test_category_query_and_stats() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(StubSource::with(sample()));
        let kb = kb_with(&tmp, source.clone(), None);

        let papers = kb.papers_by_category("cs.LG", 2, 30).await.unwrap();
        assert_eq!(papers.len(), 2);

        let sent = &source.recorded()[0];
        assert!(sent.search_query.starts_with("cat:cs.LG AND submittedDate:["));
        assert!(sent.search_query.contains(" TO "));
        assert_eq!(sent.sort_by, SortBy::SubmittedDate);
        assert_eq!(sent.sort_order, SortOrder::Descending);
        assert_eq!(kb.stats().await.categories["cs.LG"], 2);
    }

    #[tokio::test]
    async fn test_update_feeds_index_and_cache() {
        let tmp = TempDir::new().unwrap();
        let index = Arc::new(StubIndex::new(false, vec![]));
        let dyn_index: Arc<dyn SimilarityIndex> = index.clone();
        let kb = kb_with(&tmp, Arc::new(StubSource::with(sample())), Some(dyn_index));

        let report = kb.update(None).await.unwrap();
        assert_eq!(report.total_updated, 6);
        assert_eq!(report.categories.len(), 2);
        assert_eq!(*index.added.lock().unwrap(), 6);

        let stats = kb.stats().await;
        assert_eq!(stats.total_papers, 6);
        assert_eq!(stats.cached_papers, 3);
        assert!(stats.last_updated.is_some());
    }

    #[tokio::test]
    async fn test_update_skips_failing_category() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(StubSource {
            fail_matching: Some("cat:cs.BAD "),
            ..StubSource::with(sample())
        });
        let kb = kb_with(&tmp, source.clone(), None);

        let categories = ["cs.LG".to_string(), "cs.BAD".to_string(), "cs.CL".to_string()];
        let report = kb.update(Some(&categories)).await.unwrap();
        assert_eq!(report.total_updated, 6);
        assert_eq!(report.categories["cs.BAD"], 0);
        assert_eq!(report.categories["cs.CL"], 3);
        assert_eq!(source.recorded().len(), 3);

        let stats = kb.stats().await;
        assert!(stats.last_updated.is_some());
        assert_eq!(stats.total_papers, 6);
        assert!(!stats.categories.contains_key("cs.BAD"));
    }

    #[tokio::test]
    async fn test_update_with_explicit_categories() {
        let tmp = TempDir::new().unwrap();
        let kb = kb_with(&tmp, Arc::new(StubSource::with(sample())), None);
        let report = kb.update(Some(&["hep-th".to_string()])).await.unwrap();
        assert_eq!(report.categories.keys().collect::<Vec<_>>(), vec!["hep-th"]);
    }

    #[tokio::test]
    async fn test_trending_survives_failures() {
        let tmp = TempDir::new().unwrap();
        let kb = kb_with(&tmp, Arc::new(StubSource::failing()), None);
        assert!(kb.trending().await.is_empty());

        let source = Arc::new(StubSource::with(sample()));
        let kb = kb_with(&tmp, source.clone(), None);
        let trending = kb.trending().await;
        // same three papers come back for every topic
        assert_eq!(trending.len(), 3);
        assert_eq!(source.recorded().len(), TRENDING_TOPICS.len());
    }

    #[tokio::test]
    async fn test_categories_carry_names_and_counts() {
        let tmp = TempDir::new().unwrap();
        let kb = kb_with(&tmp, Arc::new(StubSource::with(sample())), None);
        kb.papers_by_category("cs.CL", 1, 7).await.unwrap();
        let cats = kb.categories().await;
        assert_eq!(cats[0].id, "cs.LG");
        assert_eq!(cats[0].name, "Machine Learning");
        assert_eq!(cats[1].count, 1);
    }

    #[test]
    fn test_suggestions() {
        assert_eq!(search_suggestions("Learning").len(), 3);
        assert!(search_suggestions("  neural   networks ").contains(&"graph neural networks".to_string()));
        assert!(search_suggestions("quantum").is_empty());
        assert_eq!(question_suggestions(" rag ")[1], "What is rag?");
    }
}
