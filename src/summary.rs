use std::io::Write as _;
use std::path::Path;

use anyhow::Context as _;

use crate::formats::{Outcome, ProgressItem};

pub const SUMMARY_FILE_NAME: &str = "index.md";

/// Writes `index.md` under the book root. Returns `false` when the file
/// already had the rendered content and was left untouched.
pub fn write(
    book_root: &Path,
    book_name: &str,
    book_desc: &str,
    items: &[ProgressItem],
) -> anyhow::Result<bool> {
    let summary_md = render_summary_md(book_name, book_desc, items);
    let path = book_root.join(SUMMARY_FILE_NAME);

    match std::fs::read_to_string(&path) {
        Ok(existing) if existing == summary_md => return Ok(false),
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("read summary: {}", path.display()));
        }
    }

    let mut tmp = tempfile::NamedTempFile::new_in(book_root)
        .with_context(|| format!("create summary temp file in {}", book_root.display()))?;
    tmp.write_all(summary_md.as_bytes())
        .context("write summary temp file")?;
    tmp.flush().context("flush summary temp file")?;
    tmp.persist(&path)
        .map_err(|err| err.error)
        .with_context(|| format!("persist summary: {}", path.display()))?;
    Ok(true)
}

pub fn render_summary_md(book_name: &str, book_desc: &str, items: &[ProgressItem]) -> String {
    let mut md = String::new();
    md.push_str(&format!("# {book_name}\n\n"));
    let desc = book_desc.trim();
    if !desc.is_empty() {
        for line in desc.lines() {
            md.push_str(&format!("> {line}\n"));
        }
        md.push('\n');
    }

    for item in items {
        let indent = "  ".repeat(item.depth());
        let title = link_text(&item.entry.title);
        let line = match item.outcome {
            Outcome::DirCreated => format!("- {title}"),
            Outcome::ArticleOk => format!("- [{title}]({})", link_target(&item.path)),
            Outcome::ArticleFailed => format!("- {title} (failed)"),
            Outcome::LinkSkipped => format!("- [{title}]({})", item.entry.url),
        };
        md.push_str(&indent);
        md.push_str(&line);
        md.push('\n');
    }
    md
}

/// Percent-encodes each path segment so `(`, `)`, `#` and `%` survive as
/// part of a Markdown link destination.
fn link_target(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn link_text(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for ch in title.chars() {
        if matches!(ch, '\\' | '[' | ']') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
