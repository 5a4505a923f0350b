use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Serialize;
use tracing::Instrument as _;

use crate::article::{ArticleFetcher, HttpArticleFetcher};
use crate::cli::{DownloadArgs, StatusArgs};
use crate::config::{DownloadConfig, HttpConfig};
use crate::formats::{BookMeta, Outcome};
use crate::progress_bar::DownloadProgress;
use crate::progress_store::ProgressStore;
use crate::report::ReportSummary;
use crate::sanitize::sanitize;
use crate::source::{BookSource, HttpBookSource};
use crate::traverse::{TraversalContext, count_disposable, traverse};

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub book_name: String,
    pub book_root: PathBuf,
    pub total_entries: usize,
    pub completed_count: usize,
    #[serde(flatten)]
    pub summary: ReportSummary,
}

impl RunReport {
    pub fn is_complete(&self) -> bool {
        self.completed_count == self.total_entries
    }
}

pub async fn run(args: DownloadArgs) -> anyhow::Result<RunReport> {
    let config = DownloadConfig::from_args(&args).context("resolve download config")?;
    let http = HttpConfig::from_env().context("load http config")?;
    let client = http.build_client()?;

    let source = HttpBookSource::new(client.clone());
    let fetcher = HttpArticleFetcher::new(client, &config.book_url, config.front_matter);

    run_with(&config, &source, &fetcher).await
}

pub async fn run_with(
    config: &DownloadConfig,
    source: &dyn BookSource,
    fetcher: &dyn ArticleFetcher,
) -> anyhow::Result<RunReport> {
    let run_id = uuid::Uuid::new_v4().simple().to_string();
    let span = tracing::info_span!("download", %run_id);
    async move {
        let book = source
            .fetch_book(&config.book_url)
            .await
            .context("fetch book metadata")?
            .ok_or_else(|| {
                anyhow::anyhow!("could not resolve knowledge base: {}", config.book_url)
            })?;
        check_preconditions(&book)?;

        let book_root = config.out_dir.join(book_dir_name(&book));
        tokio::fs::create_dir_all(&book_root)
            .await
            .with_context(|| format!("create book dir: {}", book_root.display()))?;

        let total = count_disposable(&book.toc);
        let (mut store, mut state) =
            ProgressStore::open(&book_root, total).context("open progress log")?;
        if state.resumed && state.is_complete() {
            tracing::info!(book = %book.book_name, "book already fully mirrored");
        }

        tracing::info!(
            book = %book.book_name,
            root = %book_root.display(),
            entries = book.toc.len(),
            disposable = total,
            completed = state.completed_count,
            "mirroring knowledge base"
        );

        let progress = if config.quiet {
            DownloadProgress::hidden()
        } else {
            DownloadProgress::new(total, state.completed_count)
        };
        let book_url = config.book_url.as_str();
        let ctx = TraversalContext {
            book_id: &book.book_id,
            book_url,
            book_root: &book_root,
            extension: &config.extension,
            skip_images: config.skip_images,
            fetcher,
            progress: &progress,
        };
        let traversed = traverse(&book.toc, &mut state, &mut store, &ctx).await;
        progress.finish();
        traversed.context("traverse table of contents")?;

        if !state.is_complete() {
            tracing::warn!(
                completed = state.completed_count,
                total = state.total_entries,
                "run finished with undisposed entries"
            );
        }

        let written = crate::summary::write(
            &book_root,
            &book.book_name,
            &book.book_desc,
            state.items(),
        )
        .context("write summary")?;
        tracing::debug!(written, "summary");

        let summary = state.report.summary();
        crate::report::log_summary(&summary);

        let report = RunReport {
            run_id: run_id.clone(),
            book_name: book.book_name.clone(),
            book_root,
            total_entries: state.total_entries,
            completed_count: state.completed_count,
            summary,
        };
        if let Some(path) = config.report_path.as_deref() {
            write_report(path, &report).await?;
        }
        Ok::<_, anyhow::Error>(report)
    }
    .instrument(span)
    .await
}

fn check_preconditions(book: &BookMeta) -> anyhow::Result<()> {
    if book.book_id.is_empty() {
        anyhow::bail!("knowledge base has no id");
    }
    if book.toc.is_empty() {
        anyhow::bail!("knowledge base table of contents is empty");
    }
    Ok(())
}

fn book_dir_name(book: &BookMeta) -> String {
    [&book.book_name, &book.book_slug, &book.book_id]
        .into_iter()
        .map(|name| sanitize(name))
        .find(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "book".to_owned())
}

async fn write_report(path: &Path, report: &RunReport) -> anyhow::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create report dir: {}", parent.display()))?;
    }
    let data = serde_json::to_vec_pretty(report).context("serialize report")?;
    tokio::fs::write(path, data)
        .await
        .with_context(|| format!("write report: {}", path.display()))?;
    Ok(())
}

pub fn status(args: StatusArgs) -> anyhow::Result<()> {
    let book_dir = PathBuf::from(&args.book_dir);
    let records = crate::progress_store::read(&book_dir)?.ok_or_else(|| {
        anyhow::anyhow!("no progress log found in: {}", book_dir.display())
    })?;

    let count = |outcome: Outcome| {
        records
            .iter()
            .filter(|record| record.item.outcome == outcome)
            .count()
    };

    println!("recorded: {}", records.len());
    println!("directories: {}", count(Outcome::DirCreated));
    println!("articles ok: {}", count(Outcome::ArticleOk));
    println!("articles failed: {}", count(Outcome::ArticleFailed));
    println!("links skipped: {}", count(Outcome::LinkSkipped));
    for record in &records {
        if record.item.outcome == Outcome::ArticleFailed {
            println!("failed: {}", record.item.path);
        }
    }
    Ok(())
}
