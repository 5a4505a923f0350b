use anyhow::Context as _;
use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::formats::{BookMeta, TocEntry};

/// Resolves knowledge-base metadata and its flat table of contents.
#[async_trait]
pub trait BookSource: Send + Sync {
    /// `Ok(None)` means the page was reachable but describes no book.
    async fn fetch_book(&self, book_url: &Url) -> anyhow::Result<Option<BookMeta>>;
}

#[derive(Debug, Clone)]
pub struct HttpBookSource {
    client: reqwest::Client,
}

impl HttpBookSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BookSource for HttpBookSource {
    async fn fetch_book(&self, book_url: &Url) -> anyhow::Result<Option<BookMeta>> {
        let response = self
            .client
            .get(book_url.clone())
            .send()
            .await
            .with_context(|| format!("GET {book_url}"))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("book page returned {status}: {book_url}");
        }
        let html = response.text().await.context("read book page body")?;

        parse_book_page(&html)
    }
}

#[derive(Debug, Deserialize)]
struct AppData {
    book: Option<BookPayload>,
}

#[derive(Debug, Deserialize)]
struct BookPayload {
    #[serde(default)]
    id: serde_json::Value,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    toc: Vec<TocEntry>,
}

/// Extracts the book out of the application state embedded in the page as
/// `decodeURIComponent("<percent-encoded JSON>")`.
pub fn parse_book_page(html: &str) -> anyhow::Result<Option<BookMeta>> {
    let Some(encoded) = embedded_app_state(html) else {
        tracing::debug!("book page has no embedded app state");
        return Ok(None);
    };
    let decoded = urlencoding::decode(encoded).context("percent-decode app state")?;
    let app: AppData = serde_json::from_str(&decoded).context("parse app state json")?;

    let Some(book) = app.book else {
        return Ok(None);
    };
    let book_id = match book.id {
        serde_json::Value::String(id) => id,
        serde_json::Value::Number(id) => id.to_string(),
        _ => String::new(),
    };

    Ok(Some(BookMeta {
        book_id,
        book_slug: book.slug.unwrap_or_default(),
        book_name: book.name.unwrap_or_default(),
        book_desc: book.description.unwrap_or_default(),
        toc: book.toc,
    }))
}

fn embedded_app_state(html: &str) -> Option<&str> {
    const MARKER: &str = "decodeURIComponent(\"";
    let start = html.find(MARKER)? + MARKER.len();
    let rest = &html[start..];
    let end = rest.find("\")")?;
    Some(&rest[..end])
}
