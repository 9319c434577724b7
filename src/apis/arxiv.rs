use std::time::Duration;

use super::{ArxivQuery, Paper, PaperSource, SourceError};
use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

pub struct ArxivClient {
    client: reqwest::Client,
    base_url: String,
}

impl ArxivClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("arxiv-scholar/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    async fn fetch_feed(&self, params: &[(&str, String)]) -> Result<Vec<Paper>, SourceError> {
        let resp = self.client.get(&self.base_url).query(params).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                status: status.as_u16(),
                message: message.chars().take(200).collect(),
            });
        }
        let body = resp.text().await?;
        parse_atom_feed(&body)
    }
}

#[async_trait]
impl PaperSource for ArxivClient {
    fn name(&self) -> &str {
        "arxiv"
    }

    async fn search(&self, query: &ArxivQuery) -> Result<Vec<Paper>, SourceError> {
        tracing::info!(query = %query.search_query, max_results = query.max_results, "Searching arXiv");
        let params = [
            ("search_query", query.search_query.clone()),
            ("start", query.start.to_string()),
            ("max_results", query.max_results.to_string()),
            ("sortBy", query.sort_by.as_str().to_string()),
            ("sortOrder", query.sort_order.as_str().to_string()),
        ];
        let papers = self.fetch_feed(&params).await?;
        tracing::info!(count = papers.len(), "arXiv search finished");
        Ok(papers)
    }

    async fn get_paper(&self, id: &str) -> Result<Option<Paper>, SourceError> {
        let arxiv_id = id.strip_prefix("arxiv:").unwrap_or(id);
        let params = [
            ("id_list", arxiv_id.to_string()),
            ("max_results", "1".to_string()),
        ];
        let paper = self.fetch_feed(&params).await?.into_iter().next();
        if paper.is_none() {
            tracing::warn!(id = arxiv_id, "Paper not found on arXiv");
        }
        Ok(paper)
    }
}

#[derive(Default)]
struct EntryBuilder {
    id_url: String,
    title: String,
    summary: String,
    published: String,
    authors: Vec<String>,
    categories: Vec<String>,
    link_pdf: String,
    link_abs: String,
}

impl EntryBuilder {
    fn apply_link(&mut self, e: &BytesStart<'_>) {
        let mut href = String::new();
        let mut title_attr = String::new();
        for attr in e.attributes().flatten() {
            let val = String::from_utf8_lossy(&attr.value).to_string();
            match attr.key.as_ref() {
                b"href" => href = val,
                b"title" => title_attr = val,
                _ => {}
            }
        }
        if title_attr == "pdf" {
            self.link_pdf = href;
        } else if self.link_abs.is_empty() && href.contains("/abs/") {
            self.link_abs = href;
        }
    }

    fn apply_category(&mut self, e: &BytesStart<'_>) {
        for attr in e.attributes().flatten() {
            if attr.key.as_ref() == b"term" {
                let term = String::from_utf8_lossy(&attr.value).trim().to_string();
                if !term.is_empty() && !self.categories.contains(&term) {
                    self.categories.push(term);
                }
            }
        }
    }

    fn build(self) -> Option<Paper> {
        let id_url = self.id_url.trim();
        // arXiv reports query errors as a pseudo-entry under /api/errors
        if id_url.contains("/api/errors") {
            return None;
        }
        let id = id_url.rsplit('/').next().unwrap_or(id_url).to_string();
        let title = collapse_whitespace(&self.title);
        if id.is_empty() && title.is_empty() {
            return None;
        }
        let (pdf_url, url) = if id.is_empty() {
            (non_empty(self.link_pdf), non_empty(self.link_abs))
        } else {
            (
                non_empty(self.link_pdf).or_else(|| Some(format!("https://arxiv.org/pdf/{}.pdf", id))),
                non_empty(self.link_abs).or_else(|| Some(format!("https://arxiv.org/abs/{}", id))),
            )
        };
        Some(Paper {
            id: non_empty(id),
            title,
            authors: self.authors,
            abstract_text: collapse_whitespace(&self.summary),
            published: self.published.trim().to_string(),
            categories: self.categories,
            pdf_url,
            url,
        })
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse an arXiv Atom feed into paper records, in feed order.
pub fn parse_atom_feed(xml: &str) -> Result<Vec<Paper>, SourceError> {
    let mut reader = Reader::from_str(xml);
    let mut papers = Vec::new();
    let mut entry: Option<EntryBuilder> = None;
    let mut current_tag = String::new();
    let mut in_author = false;
    let mut author_name = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag == "entry" {
                    entry = Some(EntryBuilder::default());
                } else if let Some(current) = entry.as_mut() {
                    match tag.as_str() {
                        "author" => {
                            in_author = true;
                            author_name.clear();
                        }
                        "link" => current.apply_link(&e),
                        "category" => current.apply_category(&e),
                        _ => {}
                    }
                    current_tag = tag;
                }
            }
            Ok(Event::Empty(e)) => {
                if let Some(current) = entry.as_mut() {
                    match e.name().as_ref() {
                        b"link" => current.apply_link(&e),
                        b"category" => current.apply_category(&e),
                        _ => {}
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(current) = entry.as_mut() {
                    let text = e.unescape().unwrap_or_default().to_string();
                    match current_tag.as_str() {
                        "title" => current.title.push_str(&text),
                        "summary" => current.summary.push_str(&text),
                        "id" => current.id_url.push_str(&text),
                        "published" => current.published.push_str(&text),
                        "name" if in_author => author_name.push_str(&text),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag == "entry" {
                    if let Some(paper) = entry.take().and_then(EntryBuilder::build) {
                        papers.push(paper);
                    }
                    in_author = false;
                } else if tag == "author" && in_author {
                    in_author = false;
                    let name = collapse_whitespace(&author_name);
                    if let Some(current) = entry.as_mut().filter(|_| !name.is_empty()) {
                        current.authors.push(name);
                    }
                }
                if tag == current_tag {
                    current_tag.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SourceError::Parse(format!("XML parse error: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(papers)
}
