use serde::{Deserialize, Deserializer, Serialize};

/// Node type tag carried by a table-of-contents entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TocKind {
    Title,
    Link,
    Doc,
    Other(String),
}

impl TocKind {
    pub fn as_tag(&self) -> &str {
        match self {
            Self::Title => "TITLE",
            Self::Link => "LINK",
            Self::Doc => "DOC",
            Self::Other(tag) => tag,
        }
    }
}

impl From<String> for TocKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "TITLE" => Self::Title,
            "LINK" => Self::Link,
            "DOC" => Self::Doc,
            _ => Self::Other(tag),
        }
    }
}

impl From<TocKind> for String {
    fn from(kind: TocKind) -> Self {
        kind.as_tag().to_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    #[serde(default, deserialize_with = "string_or_empty")]
    pub uuid: String,
    #[serde(default, deserialize_with = "string_or_empty")]
    pub parent_uuid: String,
    #[serde(default, deserialize_with = "string_or_empty")]
    pub title: String,
    /// `None` when the source sent no type or a non-string one.
    #[serde(rename = "type", default, deserialize_with = "kind_tag")]
    pub kind: Option<TocKind>,
    #[serde(default, deserialize_with = "string_or_empty")]
    pub url: String,
    #[serde(default, deserialize_with = "string_or_empty")]
    pub child_uuid: String,
}

impl TocEntry {
    pub fn has_children(&self) -> bool {
        !self.child_uuid.is_empty()
    }
}

fn string_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => String::new(),
    })
}

fn kind_tag<'de, D>(deserializer: D) -> Result<Option<TocKind>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_str().map(|tag| TocKind::from(tag.to_owned()))))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    DirCreated,
    ArticleOk,
    ArticleFailed,
    LinkSkipped,
}

impl Outcome {
    pub fn is_success(self) -> bool {
        matches!(self, Self::DirCreated | Self::ArticleOk)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressItem {
    pub uuid: String,
    /// Segments joined with `/`; article paths end with the content extension.
    pub path: String,
    pub path_segments: Vec<String>,
    pub path_uuids: Vec<String>,
    pub entry: TocEntry,
    pub outcome: Outcome,
}

impl ProgressItem {
    pub fn depth(&self) -> usize {
        self.path_segments.len().saturating_sub(1)
    }
}

/// One line of `progress.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub item: ProgressItem,
    pub success: bool,
    pub disposed_at: String,
}

#[derive(Debug, Clone)]
pub struct BookMeta {
    pub book_id: String,
    pub book_slug: String,
    pub book_name: String,
    pub book_desc: String,
    pub toc: Vec<TocEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleFrontMatter {
    pub uuid: String,
    pub title: String,
    pub source_url: String,
}
