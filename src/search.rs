use std::collections::HashSet;

use serde::Serialize;

use crate::apis::Paper;

/// Category and publication-year restrictions applied before ranking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    /// Allow-list of category codes. Empty means no category filter.
    pub categories: Vec<String>,
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
}

impl SearchFilters {
    fn accepts(&self, paper: &Paper) -> bool {
        self.accepts_category(paper) && self.accepts_year(paper)
    }

    fn accepts_category(&self, paper: &Paper) -> bool {
        self.categories.is_empty()
            || paper.categories.iter().any(|c| self.categories.contains(c))
    }

    /// Unparseable dates pass.
    fn accepts_year(&self, paper: &Paper) -> bool {
        let Some(year) = paper.year() else {
            return true;
        };
        if self.year_from.is_some_and(|from| year < from) {
            return false;
        }
        if self.year_to.is_some_and(|to| year > to) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredPaper {
    #[serde(flatten)]
    pub paper: Paper,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedPage {
    pub papers: Vec<ScoredPaper>,
    pub total: usize,
}

/// Filter, merge, rank and paginate upstream and similarity-index candidates.
///
/// Secondary (similarity-index) records are admitted first, so they win
/// identifier collisions. Pure and synchronous.
pub fn aggregate(
    primary: Vec<Paper>,
    secondary: Vec<Paper>,
    filters: &SearchFilters,
    rank_query: &str,
    offset: usize,
    limit: usize,
) -> AggregatedPage {
    let primary = primary.into_iter().filter(|p| filters.accepts(p));
    let secondary = secondary.into_iter().filter(|p| filters.accepts(p));

    let merged = merge(secondary, primary);
    let ranked = rank_by_relevance(merged, rank_query);

    let total = ranked.len();
    let papers = ranked.into_iter().skip(offset).take(limit).collect();
    AggregatedPage { papers, total }
}

fn merge(
    first: impl Iterator<Item = Paper>,
    then: impl Iterator<Item = Paper>,
) -> Vec<Paper> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged = Vec::new();
    for paper in first.chain(then) {
        if let Some(id) = paper.key() {
            if !seen.insert(id.to_string()) {
                continue;
            }
        }
        merged.push(paper);
    }
    merged
}

/// Composite query relevance: title phrase match, abstract term hits, recency.
pub fn relevance_score(paper: &Paper, rank_query: &str) -> f64 {
    let query = rank_query.to_lowercase();
    let mut score = 0.0;

    if paper.title.to_lowercase().contains(&query) {
        score += 10.0;
    }

    let abstract_lower = paper.abstract_text.to_lowercase();
    for word in query.split_whitespace() {
        if abstract_lower.contains(word) {
            score += 1.0;
        }
    }

    if let Some(year) = paper.year() {
        score += f64::from(year - 2000) * 0.01;
    }
    score
}

/// Structural popularity proxy used for trending listings.
pub fn popularity_score(paper: &Paper) -> f64 {
    let mut score = 0.0;
    let title_len = paper.title.chars().count();
    if (20..=100).contains(&title_len) {
        score += 1.0;
    }
    if paper.abstract_text.chars().count() > 500 {
        score += 1.0;
    }
    score += paper.categories.len().min(3) as f64 * 0.5;
    score += paper.authors.len().min(5) as f64 * 0.2;
    score
}

pub fn rank_by_relevance(papers: Vec<Paper>, rank_query: &str) -> Vec<ScoredPaper> {
    rank_with(papers, |p| relevance_score(p, rank_query))
}

/// Deduplicate by identifier (first occurrence wins) and rank by popularity.
pub fn rank_by_popularity(papers: Vec<Paper>) -> Vec<ScoredPaper> {
    let unique = merge(papers.into_iter(), std::iter::empty());
    rank_with(unique, popularity_score)
}

/// Score every paper and sort descending. `sort_by` is stable, so equal
/// scores keep their input order.
fn rank_with(papers: Vec<Paper>, score: impl Fn(&Paper) -> f64) -> Vec<ScoredPaper> {
    let mut scored: Vec<ScoredPaper> = papers
        .into_iter()
        .map(|paper| ScoredPaper {
            score: score(&paper),
            paper,
        })
        .collect();
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored
}
