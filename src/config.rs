use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use url::Url;

use crate::cli::DownloadArgs;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub user_agent: String,
    pub timeout: Duration,
}

impl HttpConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let user_agent = std::env::var("KBMIRROR_USER_AGENT")
            .unwrap_or_else(|_| format!("kbmirror/{}", env!("CARGO_PKG_VERSION")));
        let timeout_secs = match std::env::var("KBMIRROR_HTTP_TIMEOUT_SECS") {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("parse KBMIRROR_HTTP_TIMEOUT_SECS: {raw:?}"))?,
            Err(_) => DEFAULT_TIMEOUT_SECS,
        };
        Ok(Self {
            user_agent,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub fn build_client(&self) -> anyhow::Result<reqwest::Client> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/json;q=0.9,*/*;q=0.8"),
        );
        reqwest::Client::builder()
            .user_agent(self.user_agent.clone())
            .default_headers(headers)
            .timeout(self.timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("build http client")
    }
}

/// Settings of one `download` run, resolved from the command line.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub book_url: Url,
    pub out_dir: PathBuf,
    /// Content extension including the leading dot.
    pub extension: String,
    pub skip_images: bool,
    pub front_matter: bool,
    pub report_path: Option<PathBuf>,
    pub quiet: bool,
}

impl DownloadConfig {
    pub fn from_args(args: &DownloadArgs) -> anyhow::Result<Self> {
        let book_url = Url::parse(&args.url).context("parse --url")?;
        if book_url.scheme() != "http" && book_url.scheme() != "https" {
            anyhow::bail!("--url must be http/https: {book_url}");
        }

        Ok(Self {
            book_url,
            out_dir: PathBuf::from(&args.out),
            extension: normalize_extension(&args.extension)?,
            skip_images: args.ignore_img,
            front_matter: args.front_matter,
            report_path: args.report.as_ref().map(PathBuf::from),
            quiet: args.quiet,
        })
    }
}

fn normalize_extension(raw: &str) -> anyhow::Result<String> {
    let trimmed = raw.trim().trim_start_matches('.');
    if trimmed.is_empty() || trimmed.contains(['/', '\\']) {
        anyhow::bail!("invalid --extension: {raw:?}");
    }
    Ok(format!(".{trimmed}"))
}
