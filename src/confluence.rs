//! Confluence connector.
//!
//! Fetches pages through the Confluence REST API and turns them into
//! [`Document`]s. The pipeline only depends on the [`PageSource`] trait, so
//! tests can substitute a recording fake.
//!
//! # Environment Variables
//!
//! - `CONFLUENCE_URL`: site base URL, e.g. `https://acme.atlassian.net/wiki`
//! - `CONFLUENCE_USERNAME`: account email / username
//! - `CONFLUENCE_API_TOKEN`: API token (basic auth password)
//!
//! # Endpoints
//!
//! | Operation | Request |
//! |-----------|---------|
//! | space | `GET /rest/api/content?spaceKey=K&type=page&expand=body.storage,version` |
//! | CQL filter | `GET /rest/api/content/search?cql=Q&expand=body.storage,version` |
//! | page | `GET /rest/api/content/{id}?expand=body.storage,version` |
//!
//! List endpoints are paged with `start` / `limit` until a short page.
//!
//! # Document Shape
//!
//! Page bodies arrive in storage format (XHTML) and are flattened to text
//! with `scraper`, one line per block element. Metadata: `title`,
//! `page_id`, and `source` = `url` = the page's web URL.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use scraper::{Html, Node};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

use crate::config::ConfluenceCredentials;
use crate::error::RagError;
use crate::models::{Document, Metadata};

const DEFAULT_PAGE_SIZE: usize = 50;
const EXPAND: &str = "body.storage,version";

/// Elements that start a new line in the flattened text.
const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "br", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "pre", "blockquote",
    "table", "ul", "ol", "hr",
];

/// A provider of remote pages.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// All pages of a space, plus the results of an optional CQL filter.
    async fn space_pages(&self, space_key: &str, cql: Option<&str>) -> Result<Vec<Document>>;

    /// Specific pages by numeric id or page URL.
    async fn pages(&self, ids_or_urls: &[String]) -> Result<Vec<Document>>;
}

// ============ REST payloads ============

#[derive(Debug, Deserialize)]
struct ContentPage {
    #[serde(default)]
    results: Vec<Content>,
    #[serde(default, rename = "_links")]
    links: Option<PageLinks>,
}

#[derive(Debug, Deserialize)]
struct PageLinks {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: Option<Body>,
    #[serde(default, rename = "_links")]
    links: Option<ContentLinks>,
}

#[derive(Debug, Deserialize)]
struct Body {
    storage: Option<Storage>,
}

#[derive(Debug, Deserialize)]
struct Storage {
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct ContentLinks {
    webui: Option<String>,
}

// ============ Client ============

pub struct ConfluenceClient {
    http: reqwest::Client,
    creds: ConfluenceCredentials,
    page_size: usize,
}

impl ConfluenceClient {
    pub fn new(creds: ConfluenceCredentials) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            creds,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{}", self.creds.url, path);
        let resp = self
            .http
            .get(&url)
            .basic_auth(&self.creds.username, Some(&self.creds.api_token))
            .query(query)
            .send()
            .await
            .with_context(|| format!("Confluence request failed: {}", url))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Confluence API error {} for {}: {}", status, path, body);
        }
        Ok(resp.json::<T>().await?)
    }

    /// Follow `start` / `limit` paging until the server returns a short page.
    async fn paginate(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<Content>> {
        let mut all = Vec::new();
        let mut start = 0usize;
        loop {
            let mut q = query.to_vec();
            q.push(("start", start.to_string()));
            q.push(("limit", self.page_size.to_string()));
            let page: ContentPage = self.get_json(path, &q).await?;
            let fetched = page.results.len();
            all.extend(page.results);

            let has_next = page.links.and_then(|l| l.next).is_some();
            if fetched == 0 || (fetched < self.page_size && !has_next) {
                break;
            }
            start += fetched;
        }
        Ok(all)
    }

    fn to_document(&self, content: Content) -> Document {
        let url = match content.links.and_then(|l| l.webui) {
            Some(webui) => format!("{}{}", self.creds.url, webui),
            None => format!("{}/pages/viewpage.action?pageId={}", self.creds.url, content.id),
        };
        let storage = content
            .body
            .and_then(|b| b.storage)
            .map(|s| s.value)
            .unwrap_or_default();
        Document::new(
            storage_to_text(&storage),
            Metadata {
                source: Some(url.clone()),
                url: Some(url),
                title: Some(content.title),
                page_id: Some(content.id),
                ..Default::default()
            },
        )
    }
}

#[async_trait]
impl PageSource for ConfluenceClient {
    async fn space_pages(&self, space_key: &str, cql: Option<&str>) -> Result<Vec<Document>> {
        let mut contents = self
            .paginate(
                "/rest/api/content",
                &[
                    ("spaceKey", space_key.to_string()),
                    ("type", "page".to_string()),
                    ("expand", EXPAND.to_string()),
                ],
            )
            .await?;
        tracing::info!(space = space_key, pages = contents.len(), "listed Confluence space");

        if let Some(cql) = cql.filter(|q| !q.trim().is_empty()) {
            let matched = self
                .paginate(
                    "/rest/api/content/search",
                    &[("cql", cql.to_string()), ("expand", EXPAND.to_string())],
                )
                .await?;
            tracing::info!(cql, pages = matched.len(), "CQL search returned pages");
            contents.extend(matched);
        }

        let mut seen = HashSet::new();
        contents.retain(|c| seen.insert(c.id.clone()));
        Ok(contents.into_iter().map(|c| self.to_document(c)).collect())
    }

    async fn pages(&self, ids_or_urls: &[String]) -> Result<Vec<Document>> {
        let ids = ids_or_urls
            .iter()
            .map(|s| {
                parse_page_id(s).ok_or_else(|| {
                    RagError::config(format!("not a Confluence page id or URL: {}", s))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut docs = Vec::with_capacity(ids.len());
        for id in ids {
            let content: Content = self
                .get_json(
                    &format!("/rest/api/content/{}", id),
                    &[("expand", EXPAND.to_string())],
                )
                .await?;
            tracing::debug!(page_id = %id, title = %content.title, "fetched Confluence page");
            docs.push(self.to_document(content));
        }
        Ok(docs)
    }
}

/// Extract a numeric page id from a bare id, a `/pages/<id>` URL, or a
/// `pageId=<id>` URL.
pub fn parse_page_id(input: &str) -> Option<String> {
    let input = input.trim();
    if !input.is_empty() && input.chars().all(|c| c.is_ascii_digit()) {
        return Some(input.to_string());
    }
    for marker in ["/pages/", "pageId="] {
        if let Some(pos) = input.find(marker) {
            let digits: String = input[pos + marker.len()..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if !digits.is_empty() {
                return Some(digits);
            }
        }
    }
    None
}

/// Flatten Confluence storage-format XHTML into plain text.
///
/// Block elements start new lines, whitespace inside a line is collapsed,
/// and macro parameters (`ac:parameter`) are dropped.
pub fn storage_to_text(storage: &str) -> String {
    let fragment = Html::parse_fragment(storage);
    let mut raw = String::new();
    for node in fragment.root_element().descendants() {
        match node.value() {
            Node::Element(el) if BLOCK_ELEMENTS.contains(&el.name()) => raw.push('\n'),
            Node::Text(text) => {
                let in_parameter = node
                    .parent()
                    .and_then(|p| p.value().as_element().map(|e| e.name() == "ac:parameter"))
                    .unwrap_or(false);
                if !in_parameter {
                    raw.push_str(text);
                }
            }
            _ => {}
        }
    }

    raw.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
