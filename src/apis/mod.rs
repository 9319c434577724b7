pub mod arxiv;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A paper record as returned by the upstream feed.
///
/// `id` is the deduplication key. Records without one are kept but never
/// merged with anything else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
    /// Raw `YYYY-MM-DD...` string from the feed.
    #[serde(default)]
    pub published: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub pdf_url: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl Paper {
    /// Publication year, or `None` when `published` does not start with one.
    pub fn year(&self) -> Option<i32> {
        self.published
            .split('-')
            .next()
            .and_then(|y| y.trim().parse::<i32>().ok())
    }

    /// The identifier, treating an empty string as absent.
    pub fn key(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    /// Best link to the full text: the feed's PDF link, else one derived from the id.
    pub fn best_url(&self) -> String {
        if let Some(pdf) = self.pdf_url.as_deref().filter(|u| !u.is_empty()) {
            return pdf.to_string();
        }
        match self.key() {
            Some(id) => format!("https://arxiv.org/pdf/{}.pdf", id),
            None => self.url.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    #[default]
    Relevance,
    LastUpdatedDate,
    SubmittedDate,
}

impl SortBy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Relevance => "relevance",
            Self::LastUpdatedDate => "lastUpdatedDate",
            Self::SubmittedDate => "submittedDate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ascending => "ascending",
            Self::Descending => "descending",
        }
    }
}

/// Parameters for one upstream search call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArxivQuery {
    pub search_query: String,
    pub start: u32,
    pub max_results: u32,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
}

impl ArxivQuery {
    pub fn new(search_query: impl Into<String>, max_results: u32) -> Self {
        Self {
            search_query: search_query.into(),
            start: 0,
            max_results,
            sort_by: SortBy::default(),
            sort_order: SortOrder::default(),
        }
    }

    pub fn sorted(mut self, sort_by: SortBy, sort_order: SortOrder) -> Self {
        self.sort_by = sort_by;
        self.sort_order = sort_order;
        self
    }
}

#[async_trait]
pub trait PaperSource: Send + Sync {
    fn name(&self) -> &str;
    async fn search(&self, query: &ArxivQuery) -> Result<Vec<Paper>, SourceError>;
    async fn get_paper(&self, id: &str) -> Result<Option<Paper>, SourceError>;
}
