//! Single pass over a flat, parent-referencing table of contents.
//!
//! Each entry is disposed of at most once across all runs: a directory is
//! created, an article is fetched, or a link is reported. Every disposition is
//! durably appended to the progress log before the next entry is looked at,
//! so a killed run resumes at entry granularity.
//!
//! Paths are rebuilt from already-disposed ancestors only. An ancestor chain
//! ends at the first parent that is not in the index, so an entry seen before
//! its parent is rooted at itself instead of failing.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Context as _;

use crate::article::{ArticleFetcher, ArticleRequest};
use crate::formats::{Outcome, ProgressItem, TocEntry, TocKind};
use crate::progress_bar::DownloadProgress;
use crate::progress_store::{ProgressStore, RunState};
use crate::sanitize::sanitize;

pub struct TraversalContext<'a> {
    pub book_id: &'a str,
    /// Base for per-article source URLs.
    pub book_url: &'a str,
    pub book_root: &'a Path,
    /// Content extension including the leading dot.
    pub extension: &'a str,
    pub skip_images: bool,
    pub fetcher: &'a dyn ArticleFetcher,
    pub progress: &'a DownloadProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    InvalidKind,
    AlreadyDisposed,
    NoContent,
}

/// What happened to one entry in this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Skipped(SkipReason),
    DirCreated,
    LinkSkipped,
    ArticleOk,
    ArticleFailed { message: String },
}

impl Disposition {
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryClass {
    Container,
    Article,
}

/// `None` for entries that never get a disposition.
pub fn classify(entry: &TocEntry) -> Option<EntryClass> {
    let kind = entry.kind.as_ref()?;
    if matches!(kind, TocKind::Title | TocKind::Link) || entry.has_children() {
        Some(EntryClass::Container)
    } else if !entry.url.is_empty() {
        Some(EntryClass::Article)
    } else {
        None
    }
}

pub fn count_disposable(toc: &[TocEntry]) -> usize {
    toc.iter().filter(|entry| classify(entry).is_some()).count()
}

pub async fn traverse(
    toc: &[TocEntry],
    state: &mut RunState,
    store: &mut ProgressStore,
    ctx: &TraversalContext<'_>,
) -> anyhow::Result<Vec<Disposition>> {
    let mut dispositions = Vec::with_capacity(toc.len());
    for (idx, entry) in toc.iter().enumerate() {
        let disposition = dispose_entry(entry, state, store, ctx)
            .await
            .with_context(|| format!("toc entry #{idx} ({})", entry.uuid))?;
        if !disposition.is_skip() {
            ctx.progress.advance(&entry.title);
        }
        dispositions.push(disposition);
    }
    Ok(dispositions)
}

pub async fn dispose_entry(
    entry: &TocEntry,
    state: &mut RunState,
    store: &mut ProgressStore,
    ctx: &TraversalContext<'_>,
) -> anyhow::Result<Disposition> {
    if entry.kind.is_none() {
        tracing::debug!(uuid = %entry.uuid, "skip entry without a type tag");
        return Ok(Disposition::Skipped(SkipReason::InvalidKind));
    }
    if state.contains(&entry.uuid) {
        return Ok(Disposition::Skipped(SkipReason::AlreadyDisposed));
    }

    match classify(entry) {
        Some(EntryClass::Container) => dispose_container(entry, state, store, ctx).await,
        Some(EntryClass::Article) => dispose_article(entry, state, store, ctx).await,
        None => {
            tracing::debug!(uuid = %entry.uuid, title = %entry.title, "skip entry without content");
            Ok(Disposition::Skipped(SkipReason::NoContent))
        }
    }
}

async fn dispose_container(
    entry: &TocEntry,
    state: &mut RunState,
    store: &mut ProgressStore,
    ctx: &TraversalContext<'_>,
) -> anyhow::Result<Disposition> {
    let (path_segments, path_uuids) = ancestor_path(entry, state);
    let is_link = entry.kind == Some(TocKind::Link);
    let item = ProgressItem {
        uuid: entry.uuid.clone(),
        path: path_segments.join("/"),
        path_segments,
        path_uuids,
        entry: entry.clone(),
        outcome: if is_link {
            Outcome::LinkSkipped
        } else {
            Outcome::DirCreated
        },
    };

    let disposition = if is_link {
        tracing::debug!(path = %item.path, url = %entry.url, "link entry has no local container");
        state.report.record_warning(&item);
        Disposition::LinkSkipped
    } else {
        let dir = join_segments(ctx.book_root, &item.path_segments);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("create directory: {}", dir.display()))?;
        tracing::debug!(path = %item.path, "directory ready");
        Disposition::DirCreated
    };

    store
        .append(state, item, !is_link)
        .context("record container progress")?;
    Ok(disposition)
}

async fn dispose_article(
    entry: &TocEntry,
    state: &mut RunState,
    store: &mut ProgressStore,
    ctx: &TraversalContext<'_>,
) -> anyhow::Result<Disposition> {
    let (parent_segments, parent_uuids) = match state.get(&entry.parent_uuid) {
        Some(parent) => (parent.path_segments.clone(), parent.path_uuids.clone()),
        None => (Vec::new(), Vec::new()),
    };

    let file_stem = path_segment(&entry.title);
    let file_name = format!("{file_stem}{}", ctx.extension);
    let save_dir = join_segments(ctx.book_root, &parent_segments);
    let save_path = save_dir.join(&file_name);

    let mut path_segments = parent_segments;
    path_segments.push(file_stem);
    let mut path_uuids = parent_uuids;
    path_uuids.push(entry.uuid.clone());

    let source_url = format!("{}/{}", ctx.book_url.trim_end_matches('/'), entry.url);
    let request = ArticleRequest {
        book_id: ctx.book_id.to_owned(),
        entry_url: entry.url.clone(),
        save_dir,
        save_path,
        correlation_id: entry.uuid.clone(),
        title: entry.title.clone(),
        source_url: source_url.clone(),
        skip_images: ctx.skip_images,
    };

    state.report.record_article_attempt();
    let fetched = ctx.fetcher.fetch(&request).await;

    let mut item = ProgressItem {
        uuid: entry.uuid.clone(),
        path: format!("{}{}", path_segments.join("/"), ctx.extension),
        path_segments,
        path_uuids,
        entry: entry.clone(),
        outcome: Outcome::ArticleOk,
    };

    let disposition = match fetched {
        Ok(()) => {
            tracing::debug!(path = %item.path, "article saved");
            Disposition::ArticleOk
        }
        Err(err) => {
            let message = format!("{err:#}");
            tracing::debug!(path = %item.path, url = %source_url, %message, "article failed");
            item.outcome = Outcome::ArticleFailed;
            state.report.record_error(&item, &source_url, &message);
            Disposition::ArticleFailed { message }
        }
    };

    let success = item.outcome.is_success();
    store
        .append(state, item, success)
        .context("record article progress")?;
    Ok(disposition)
}

/// Walks parent references through the index, stopping at the first parent
/// that has not been disposed of (or at a cycle).
fn ancestor_path(entry: &TocEntry, state: &RunState) -> (Vec<String>, Vec<String>) {
    let mut segments = vec![path_segment(&entry.title)];
    let mut uuids = vec![entry.uuid.clone()];
    let mut visited: HashSet<&str> = HashSet::from([entry.uuid.as_str()]);

    let mut parent_uuid = entry.parent_uuid.as_str();
    while !parent_uuid.is_empty() {
        let Some(parent) = state.get(parent_uuid) else {
            break;
        };
        if !visited.insert(parent.uuid.as_str()) {
            tracing::warn!(uuid = %entry.uuid, "cycle in parent references; truncating path");
            break;
        }
        segments.push(path_segment(&parent.entry.title));
        uuids.push(parent.uuid.clone());
        parent_uuid = parent.entry.parent_uuid.as_str();
    }

    segments.reverse();
    uuids.reverse();
    (segments, uuids)
}

/// Sanitized title that is safe to use as a single path component below the
/// book root.
fn path_segment(title: &str) -> String {
    contained_segment(&sanitize(title)).to_owned()
}

/// `.` and `..` would resolve outside the entry's own directory.
fn contained_segment(segment: &str) -> &str {
    match segment {
        "." => "_",
        ".." => "__",
        _ => segment,
    }
}

/// Segments recorded by older runs are re-checked so a replayed parent path
/// cannot leave the book root either.
fn join_segments(root: &Path, segments: &[String]) -> std::path::PathBuf {
    segments
        .iter()
        .fold(root.to_path_buf(), |path, segment| {
            path.join(contained_segment(segment))
        })
}
