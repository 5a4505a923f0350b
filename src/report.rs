use serde::Serialize;

use crate::formats::ProgressItem;

#[derive(Debug, Clone, Serialize)]
pub struct LinkWarning {
    pub path: String,
    pub url: String,
    pub item: ProgressItem,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArticleFailure {
    pub article_url: String,
    pub message: String,
    pub item: ProgressItem,
}

/// Collects per-entry problems of one run in traversal order.
#[derive(Debug, Default)]
pub struct Report {
    warnings: Vec<LinkWarning>,
    errors: Vec<ArticleFailure>,
    article_attempts: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub warning_count: usize,
    pub error_count: usize,
    pub total_article_attempts: usize,
    pub warnings: Vec<LinkWarning>,
    pub errors: Vec<ArticleFailure>,
}

impl Report {
    pub fn record_warning(&mut self, item: &ProgressItem) {
        self.warnings.push(LinkWarning {
            path: item.path.clone(),
            url: item.entry.url.clone(),
            item: item.clone(),
        });
    }

    pub fn record_error(&mut self, item: &ProgressItem, article_url: &str, message: &str) {
        self.errors.push(ArticleFailure {
            article_url: article_url.to_owned(),
            message: message.to_owned(),
            item: item.clone(),
        });
    }

    pub fn record_article_attempt(&mut self) {
        self.article_attempts += 1;
    }

    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            warning_count: self.warnings.len(),
            error_count: self.errors.len(),
            total_article_attempts: self.article_attempts,
            warnings: self.warnings.clone(),
            errors: self.errors.clone(),
        }
    }
}

impl ReportSummary {
    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }
}

/// Emits the end-of-run report through the log sink.
pub fn log_summary(summary: &ReportSummary) {
    for warning in &summary.warnings {
        tracing::warn!(
            path = %warning.path,
            url = %warning.url,
            "external link has no local copy"
        );
    }
    for failure in &summary.errors {
        tracing::error!(
            path = %failure.item.path,
            url = %failure.article_url,
            message = %failure.message,
            "article download failed"
        );
    }
    tracing::info!(
        articles = summary.total_article_attempts,
        warnings = summary.warning_count,
        errors = summary.error_count,
        "run report"
    );
}
