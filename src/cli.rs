use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Mirror a knowledge base into a local directory tree (resumable).
    Download(DownloadArgs),
    /// Show what the progress log of a mirrored book has recorded.
    Status(StatusArgs),
}

#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// Knowledge base URL (must be http/https).
    #[arg(long)]
    pub url: String,

    /// Output directory; the book is mirrored into `<out>/<book name>`.
    #[arg(long)]
    pub out: String,

    /// File extension for saved articles.
    #[arg(long, default_value = "md")]
    pub extension: String,

    /// Keep remote image URLs instead of downloading images.
    #[arg(long)]
    pub ignore_img: bool,

    /// Prepend YAML front matter (uuid, title, source url) to each article.
    #[arg(long)]
    pub front_matter: bool,

    /// Write the end-of-run report as JSON to this path.
    #[arg(long)]
    pub report: Option<String>,

    /// Do not draw a progress bar.
    #[arg(long)]
    pub quiet: bool,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Book directory (the one containing `progress.jsonl`).
    #[arg(long)]
    pub book_dir: String,
}
