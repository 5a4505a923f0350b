use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use pulldown_cmark::{Event, Options, Parser, Tag};
use serde::Deserialize;
use sha2::Digest as _;
use tokio::fs;
use url::Url;

use crate::formats::ArticleFrontMatter;

/// Everything needed to fetch one leaf article and write it to disk.
#[derive(Debug, Clone)]
pub struct ArticleRequest {
    pub book_id: String,
    pub entry_url: String,
    pub save_dir: PathBuf,
    pub save_path: PathBuf,
    /// Entry uuid; keys per-article asset directories.
    pub correlation_id: String,
    pub title: String,
    pub source_url: String,
    pub skip_images: bool,
}

#[async_trait]
pub trait ArticleFetcher: Send + Sync {
    async fn fetch(&self, request: &ArticleRequest) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct HttpArticleFetcher {
    client: reqwest::Client,
    origin: Url,
    front_matter: bool,
}

impl HttpArticleFetcher {
    pub fn new(client: reqwest::Client, book_url: &Url, front_matter: bool) -> Self {
        let mut origin = book_url.clone();
        origin.set_path("/");
        origin.set_query(None);
        origin.set_fragment(None);
        Self {
            client,
            origin,
            front_matter,
        }
    }

    fn doc_endpoint(&self, entry_url: &str, book_id: &str) -> anyhow::Result<Url> {
        let mut endpoint = self.origin.clone();
        endpoint
            .path_segments_mut()
            .map_err(|_| anyhow::anyhow!("origin cannot be a base: {}", self.origin))?
            .clear()
            .extend(["api", "docs", entry_url]);
        endpoint
            .query_pairs_mut()
            .append_pair("book_id", book_id)
            .append_pair("merge_dynamic_data", "false")
            .append_pair("mode", "markdown");
        Ok(endpoint)
    }

    async fn fetch_markdown(&self, request: &ArticleRequest) -> anyhow::Result<String> {
        let endpoint = self.doc_endpoint(&request.entry_url, &request.book_id)?;
        let response = self
            .client
            .get(endpoint.clone())
            .send()
            .await
            .with_context(|| format!("GET {endpoint}"))?;

        let status = response.status();
        let raw = response.text().await.context("read article response body")?;
        if !status.is_success() {
            anyhow::bail!("article request returned {status}: {endpoint}");
        }

        let doc: DocResponse = serde_json::from_str(&raw).context("parse article response")?;
        let data = doc
            .data
            .ok_or_else(|| anyhow::anyhow!("article response has no `data`"))?;
        match (data.sourcecode, data.content) {
            (Some(markdown), _) => Ok(markdown),
            (None, Some(html)) => Ok(html2md::parse_html(&html)),
            (None, None) => anyhow::bail!("article response has neither markdown nor html"),
        }
    }

    async fn localize_images(
        &self,
        markdown: &str,
        save_dir: &Path,
        correlation_id: &str,
    ) -> String {
        let targets = image_destinations(markdown);
        if targets.is_empty() {
            return markdown.to_owned();
        }

        let img_dir = save_dir.join("img").join(correlation_id);
        let mut localized: HashMap<String, Option<String>> = HashMap::new();
        let mut replacements = Vec::new();

        for (range, dest) in targets {
            if !localized.contains_key(&dest) {
                let local = match self.download_image(&dest, &img_dir).await {
                    Ok(file_name) => Some(format!("./img/{correlation_id}/{file_name}")),
                    Err(err) => {
                        tracing::warn!(
                            url = %dest,
                            ?err,
                            "image download failed; keeping remote url"
                        );
                        None
                    }
                };
                localized.insert(dest.clone(), local);
            }
            if let Some(Some(local)) = localized.get(&dest) {
                replacements.push((range, local.clone()));
            }
        }

        apply_replacements(markdown, replacements)
    }

    async fn download_image(&self, url: &str, img_dir: &Path) -> anyhow::Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("image request returned {status}");
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let bytes = response.bytes().await.context("read image body")?;

        let file_name = image_file_name(url, content_type.as_deref());
        fs::create_dir_all(img_dir)
            .await
            .with_context(|| format!("create image dir: {}", img_dir.display()))?;
        let path = img_dir.join(&file_name);
        fs::write(&path, &bytes)
            .await
            .with_context(|| format!("write image: {}", path.display()))?;
        Ok(file_name)
    }
}

#[async_trait]
impl ArticleFetcher for HttpArticleFetcher {
    async fn fetch(&self, request: &ArticleRequest) -> anyhow::Result<()> {
        let markdown = self.fetch_markdown(request).await?;
        let mut markdown = normalize_markdown(&markdown);

        if !request.skip_images {
            markdown = self
                .localize_images(&markdown, &request.save_dir, &request.correlation_id)
                .await;
        }

        if self.front_matter {
            let front = ArticleFrontMatter {
                uuid: request.correlation_id.clone(),
                title: request.title.clone(),
                source_url: request.source_url.clone(),
            };
            let yaml = serde_yaml::to_string(&front).context("serialize front matter")?;
            markdown = format!("---\n{yaml}---\n\n{markdown}");
        }

        fs::create_dir_all(&request.save_dir)
            .await
            .with_context(|| format!("create save dir: {}", request.save_dir.display()))?;
        write_atomic(&request.save_path, markdown.as_bytes()).await
    }
}

#[derive(Debug, Deserialize)]
struct DocResponse {
    data: Option<DocData>,
}

#[derive(Debug, Deserialize)]
struct DocData {
    sourcecode: Option<String>,
    content: Option<String>,
}

/// Cleans up editor artifacts: empty named anchors and `<br>` tags.
pub fn normalize_markdown(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len());
    let mut rest = markdown;
    while let Some(start) = rest.find("<a name=\"") {
        let Some(open_len) = rest[start..].find('>') else {
            break;
        };
        let open_end = start + open_len + 1;
        let empty = !rest[start..open_end].contains('\n') && rest[open_end..].starts_with("</a>");
        if empty {
            out.push_str(&rest[..start]);
            rest = &rest[open_end + "</a>".len()..];
        } else {
            out.push_str(&rest[..open_end]);
            rest = &rest[open_end..];
        }
    }
    out.push_str(rest);

    let out = out
        .replace("<br />", "\n")
        .replace("<br/>", "\n")
        .replace("<br>", "\n");

    let mut normalized = out
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim_end()
        .to_owned();
    normalized.push('\n');
    normalized
}

/// Absolute http(s) image destinations with their byte ranges in `markdown`.
fn image_destinations(markdown: &str) -> Vec<(Range<usize>, String)> {
    let mut out = Vec::new();
    for (event, range) in Parser::new_ext(markdown, Options::all()).into_offset_iter() {
        let Event::Start(Tag::Image { dest_url, .. }) = event else {
            continue;
        };
        if !(dest_url.starts_with("http://") || dest_url.starts_with("https://")) {
            continue;
        }
        let source = &markdown[range.clone()];
        let Some(open) = source.find("](") else {
            continue;
        };
        let search_from = range.start + open + 2;
        let Some(pos) = markdown[search_from..range.end].find(&*dest_url) else {
            continue;
        };
        let start = search_from + pos;
        out.push((start..start + dest_url.len(), dest_url.to_string()));
    }
    out
}

fn apply_replacements(markdown: &str, mut replacements: Vec<(Range<usize>, String)>) -> String {
    replacements.sort_by_key(|(range, _)| range.start);
    let mut out = String::with_capacity(markdown.len());
    let mut cursor = 0usize;
    for (range, replacement) in replacements {
        if range.start < cursor {
            continue;
        }
        out.push_str(&markdown[cursor..range.start]);
        out.push_str(&replacement);
        cursor = range.end;
    }
    out.push_str(&markdown[cursor..]);
    out
}

fn image_file_name(url: &str, content_type: Option<&str>) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(url.as_bytes());
    let hash = hex::encode(hasher.finalize());

    let from_path = Url::parse(url).ok().and_then(|u| {
        let last = u.path_segments()?.last()?.to_owned();
        let (_, ext) = last.rsplit_once('.')?;
        let ext = ext.to_ascii_lowercase();
        (!ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .then_some(ext)
    });
    let ext = from_path.unwrap_or_else(|| {
        match content_type.map(|ct| ct.split(';').next().unwrap_or("").trim()) {
            Some("image/png") => "png",
            Some("image/jpeg") => "jpg",
            Some("image/gif") => "gif",
            Some("image/svg+xml") => "svg",
            Some("image/webp") => "webp",
            _ => "bin",
        }
        .to_owned()
    });

    format!("img_{hash}.{ext}")
}

async fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let written = match fs::write(&tmp_path, data).await {
        Ok(()) => fs::rename(&tmp_path, path)
            .await
            .with_context(|| format!("rename tmp to final: {}", path.display())),
        Err(err) => Err(err).with_context(|| format!("write tmp: {}", tmp_path.display())),
    };
    if written.is_err() {
        let _ = fs::remove_file(&tmp_path).await;
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_drops_anchors_and_breaks() {
        let md = "<a name=\"x1\"></a>\n# Title  \nline one<br />line two<br/>end\n\n\n";
        assert_eq!(normalize_markdown(md), "\n# Title\nline one\nline two\nend\n");
    }

    #[test]
    fn normalize_keeps_anchors_with_nested_markup() {
        let md = "see <a name=\"k\"><b>bold</b></a> now<a name=\"e\"></a>";
        assert_eq!(
            normalize_markdown(md),
            "see <a name=\"k\"><b>bold</b></a> now\n"
        );
    }

    #[tokio::test]
    async fn failed_atomic_write_leaves_no_tmp_file() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let target = temp.path().join("Taken.md");
        std::fs::create_dir_all(target.join("occupied"))?;

        assert!(write_atomic(&target, b"body\n").await.is_err());

        let names = std::fs::read_dir(temp.path())?
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, ["Taken.md"]);
        Ok(())
    }

    #[test]
    fn normalize_keeps_anchors_with_text() {
        let md = "see <a name=\"keep\">here</a> now";
        assert_eq!(normalize_markdown(md), "see <a name=\"keep\">here</a> now\n");
    }

    #[test]
    fn finds_remote_images_only() {
        let md = "![a](https://cdn.example.com/a.png)\n\n![b](./local.png)\n\ntext ![c](http://x.test/c \"t\")\n";
        let found = image_destinations(md);
        let urls: Vec<&str> = found.iter().map(|(_, u)| u.as_str()).collect();
        assert_eq!(urls, ["https://cdn.example.com/a.png", "http://x.test/c"]);
        for (range, url) in &found {
            assert_eq!(&md[range.clone()], url);
        }
    }

    #[test]
    fn replacements_rewrite_ranges() {
        let md = "![a](https://h/a.png) and ![b](https://h/b.png)";
        let targets = image_destinations(md);
        let replaced = apply_replacements(
            md,
            targets
                .into_iter()
                .map(|(range, url)| (range, url.replace("https://h/", "./img/u/")))
                .collect(),
        );
        assert_eq!(replaced, "![a](./img/u/a.png) and ![b](./img/u/b.png)");
    }

    #[test]
    fn image_names_are_hashed_with_extension() {
        let name = image_file_name("https://h/x/photo.JPG#hue=1", None);
        assert!(name.starts_with("img_"));
        assert!(name.ends_with(".jpg"));
        assert_eq!(
            image_file_name("https://h/raw", Some("image/png; charset=binary"))
                .rsplit('.')
                .next(),
            Some("png")
        );
        assert!(image_file_name("https://h/raw", None).ends_with(".bin"));
    }

    #[test]
    fn doc_endpoint_uses_origin_and_query() -> anyhow::Result<()> {
        let fetcher = HttpArticleFetcher::new(
            reqwest::Client::new(),
            &Url::parse("https://kb.example.com/team/demo?x=1")?,
            false,
        );
        let endpoint = fetcher.doc_endpoint("abc", "101")?;
        assert_eq!(
            endpoint.as_str(),
            "https://kb.example.com/api/docs/abc?book_id=101&merge_dynamic_data=false&mode=markdown"
        );
        Ok(())
    }
}
