use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::apis::Paper;
use crate::error::AppError;
use crate::knowledge::{KnowledgeBase, SearchRequest};
use crate::llm::LanguageModel;
use crate::search::ScoredPaper;
use crate::text::truncate_chars;

const DEFAULT_CONTEXT_LIMIT: usize = 5;
const MAX_CONTEXT_LIMIT: usize = 20;
const ABSTRACT_PROMPT_CHARS: usize = 1200;
const NO_CONTEXT_ANSWER: &str =
    "No relevant papers were found, so this question cannot be answered yet.";

static CITATION_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("citation pattern is valid"));

/// A context paper referenced by the generated answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    /// 1-based position in the prompt's context list.
    pub index: usize,
    pub paper_id: Option<String>,
    pub title: String,
    pub url: String,
    pub relevance_score: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QaRequest {
    pub question: String,
    #[serde(default)]
    pub paper_id: Option<String>,
    #[serde(default)]
    pub context_limit: Option<usize>,
    #[serde(default)]
    pub include_sources: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QaResponse {
    pub answer: String,
    pub sources: Vec<Citation>,
    pub confidence: f64,
    pub question: String,
    pub took: f64,
}

/// Build the generation prompt with numbered context blocks.
pub fn build_prompt(context: &[Paper], question: &str) -> String {
    let blocks: Vec<String> = context
        .iter()
        .enumerate()
        .map(|(i, p)| {
            format!(
                "[{}] Title: {}\nAuthors: {}\nAbstract: {}\nURL: {}\n",
                i + 1,
                p.title,
                p.authors.join(", "),
                truncate_chars(&p.abstract_text, ABSTRACT_PROMPT_CHARS),
                p.best_url(),
            )
        })
        .collect();

    format!(
        "You are a rigorous academic assistant. Answer the user's question using only \
         the paper abstracts and links below, and mark every source you rely on with its \
         number from the list, for example [1]. If the papers do not contain the answer, \
         say that you do not know instead of making something up.\n\n\
         Retrieved papers:\n{}\n\n\
         Question: {}\n\
         Give a concise, accurate answer.",
        blocks.join("\n---\n"),
        question
    )
}

/// Map `[n]` markers in `answer` back to the context papers they cite.
///
/// Each cited index appears once, in ascending order; indices outside
/// `1..=context.len()` are dropped.
pub fn extract_citations(answer: &str, context: &[Paper]) -> Vec<Citation> {
    let indices: BTreeSet<usize> = CITATION_MARKER
        .captures_iter(answer)
        .filter_map(|c| c[1].parse::<usize>().ok())
        .collect();

    indices
        .into_iter()
        .filter(|&i| (1..=context.len()).contains(&i))
        .map(|i| {
            let paper = &context[i - 1];
            let title = if paper.title.is_empty() {
                "Untitled".to_string()
            } else {
                paper.title.clone()
            };
            Citation {
                index: i,
                paper_id: paper.key().map(str::to_string),
                title,
                url: paper.best_url(),
                relevance_score: 0.0,
            }
        })
        .collect()
}

/// Retrieval-augmented answering over upstream search results.
pub struct AnswerGenerator {
    knowledge: Arc<KnowledgeBase>,
    model: Box<dyn LanguageModel>,
}

impl AnswerGenerator {
    pub fn new(knowledge: Arc<KnowledgeBase>, model: Box<dyn LanguageModel>) -> Self {
        Self { knowledge, model }
    }

    pub async fn answer(&self, request: &QaRequest) -> Result<QaResponse, AppError> {
        let started = Instant::now();
        let question = request.question.trim();
        if question.is_empty() {
            return Err(AppError::bad_request("question must not be empty"));
        }

        let context = self.gather_context(question, request).await?;
        if context.is_empty() {
            return Ok(QaResponse {
                answer: NO_CONTEXT_ANSWER.to_string(),
                sources: Vec::new(),
                confidence: 0.0,
                question: request.question.clone(),
                took: started.elapsed().as_secs_f64(),
            });
        }

        let papers: Vec<Paper> = context.iter().map(|s| s.paper.clone()).collect();
        let prompt = build_prompt(&papers, question);
        tracing::debug!(model = self.model.name(), context = papers.len(), "Generating answer");
        let answer = self.model.generate(&prompt).await?;

        let mut sources = extract_citations(&answer, &papers);
        for citation in &mut sources {
            citation.relevance_score = context[citation.index - 1].score;
        }
        let confidence = sources.len() as f64 / context.len() as f64;
        if !request.include_sources.unwrap_or(true) {
            sources.clear();
        }

        let took = started.elapsed().as_secs_f64();
        tracing::info!(cited = sources.len(), took_ms = (took * 1000.0) as u64, "Answered question");
        Ok(QaResponse {
            answer: answer.trim().to_string(),
            sources,
            confidence,
            question: request.question.clone(),
            took,
        })
    }

    async fn gather_context(&self, question: &str, request: &QaRequest) -> Result<Vec<ScoredPaper>, AppError> {
        if let Some(id) = request.paper_id.as_deref().filter(|id| !id.trim().is_empty()) {
            let paper = self.knowledge.paper(id.trim()).await?;
            let score = crate::search::relevance_score(&paper, question);
            return Ok(vec![ScoredPaper { paper, score }]);
        }

        let limit = request
            .context_limit
            .unwrap_or(DEFAULT_CONTEXT_LIMIT)
            .clamp(1, MAX_CONTEXT_LIMIT);
        let outcome = self
            .knowledge
            .search(&SearchRequest::new(question, limit), false)
            .await?;
        Ok(outcome.papers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(n: usize) -> Vec<Paper> {
        (1..=n)
            .map(|i| Paper {
                id: Some(format!("id{}", i)),
                title: format!("Title {}", i),
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn test_citations_are_sorted_and_deduplicated() {
        let cites = extract_citations("see [2] and [1] and [2]", &context(3));
        let titles: Vec<_> = cites.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Title 1", "Title 2"]);
        assert_eq!(cites[0].url, "https://arxiv.org/pdf/id1.pdf");
        assert_eq!(cites[1].index, 2);
    }

    #[test]
    fn test_out_of_range_citation_is_dropped() {
        assert!(extract_citations("[5]", &context(2)).is_empty());
        assert!(extract_citations("[0] and [99999999999999999999999]", &context(2)).is_empty());
    }

    #[test]
    fn test_non_numeric_brackets_are_ignored() {
        let cites = extract_citations("[a] [ 1] [1a] [3]", &context(3));
        assert_eq!(cites.len(), 1);
        assert_eq!(cites[0].index, 3);
    }

    #[test]
    fn test_prompt_numbers_context_and_truncates_abstracts() {
        let mut papers = context(2);
        papers[0].abstract_text = "é".repeat(2000);
        papers[0].authors = vec!["A. One".into(), "B. Two".into()];
        let prompt = build_prompt(&papers, "What is attention?");
        assert!(prompt.contains("[1] Title: Title 1\nAuthors: A. One, B. Two\n"));
        assert!(prompt.contains("\n---\n[2] Title: Title 2"));
        assert!(prompt.contains(&"é".repeat(1200)));
        assert!(!prompt.contains(&"é".repeat(1201)));
        assert!(prompt.contains("Question: What is attention?"));
    }
}
