use regex::Regex;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};
use crate::domain::{
    error::RowError,
    models::{ImportConfig, NewPost, Record, RowOutcome},
    ports::PostRepository,
};

pub const TITLE_COLUMN: &str = "post_title";
pub const CONTENT_COLUMN: &str = "post_content";
pub const IMAGE_COLUMNS: [&str; 2] = ["featured_image", "image"];
const UNTITLED: &str = "Untitled";

fn tag_pattern() -> &'static Regex {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    TAGS.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("tag pattern is valid"))
}

fn script_pattern() -> &'static Regex {
    static SCRIPTS: OnceLock<Regex> = OnceLock::new();
    SCRIPTS.get_or_init(|| {
        Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)\s*>").expect("script pattern is valid")
    })
}

fn whitespace_pattern() -> &'static Regex {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("whitespace pattern is valid"))
}

/// Plain single-line text: tags removed, whitespace collapsed, trimmed.
pub fn sanitize_text(value: &str) -> String {
    let without_scripts = script_pattern().replace_all(value, "");
    let without_tags = tag_pattern().replace_all(&without_scripts, "");
    whitespace_pattern().replace_all(&without_tags, " ").trim().to_string()
}

/// Lowercase identifier made of `[a-z0-9_-]`.
pub fn sanitize_key(key: &str) -> String {
    key.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Body markup is kept, executable blocks are not.
pub fn sanitize_content(value: &str) -> String {
    script_pattern().replace_all(value, "").trim().to_string()
}

fn is_reserved_column(column: &str) -> bool {
    column == TITLE_COLUMN || column == CONTENT_COLUMN || IMAGE_COLUMNS.contains(&column)
}

/// Converts one parsed record into a post. `row` is 1-based and only used
/// for error reporting.
pub fn map_record(config: &ImportConfig, row: usize, record: &Record) -> Result<NewPost, RowError> {
    let raw_title = record.get(TITLE_COLUMN).map(String::as_str).unwrap_or(UNTITLED);
    let title = sanitize_text(raw_title);
    if title.is_empty() {
        return Err(RowError::MissingTitle { row });
    }

    let content = record
        .get(CONTENT_COLUMN)
        .map(|c| sanitize_content(c))
        .unwrap_or_default();

    let mut meta = BTreeMap::new();
    for (column, value) in record.iter().filter(|(c, _)| !is_reserved_column(c)) {
        let key = sanitize_key(column);
        let value = sanitize_text(value);
        if key.is_empty() || value.is_empty() {
            continue;
        }
        meta.insert(key, value);
    }

    let image_url = IMAGE_COLUMNS
        .iter()
        .filter_map(|c| record.get(*c))
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
        .map(str::to_string);

    Ok(NewPost {
        post_type: config.post_type.clone(),
        status: config.post_status.clone(),
        title,
        content,
        template_id: config.template_id,
        meta,
        image_url,
    })
}

pub struct RowMapper {
    posts: Arc<dyn PostRepository>,
}

impl RowMapper {
    pub fn new(posts: Arc<dyn PostRepository>) -> Self {
        Self { posts }
    }

    /// Imports one row. Every failure is reported as a `RowError`; nothing
    /// here aborts the surrounding run.
    pub async fn import_row(
        &self,
        config: &ImportConfig,
        row: usize,
        record: &Record,
    ) -> Result<RowOutcome, RowError> {
        let post = map_record(config, row, record)?;

        if config.skip_duplicates {
            let existing = self
                .posts
                .find_by_title(&post.post_type, &post.title)
                .await
                .map_err(|e| RowError::CreateFailed { row, reason: e.to_string() })?;
            if let Some(id) = existing {
                debug!("Row {}: '{}' already exists as post {}, skipping", row, post.title, id);
                return Ok(RowOutcome::Skipped(id));
            }
        }

        let id = self
            .posts
            .create_post(&post)
            .await
            .map_err(|e| RowError::CreateFailed { row, reason: e.to_string() })?;
        debug!("Row {}: created post {} '{}' with {} meta fields", row, id, post.title, post.meta.len());

        if config.import_images {
            if let Some(url) = &post.image_url {
                if let Err(e) = self.posts.attach_image(id, url).await {
                    warn!("Row {}: image {} could not be attached to post {}: {}", row, url, id, e);
                }
            }
        }

        Ok(RowOutcome::Created(id))
    }
}
