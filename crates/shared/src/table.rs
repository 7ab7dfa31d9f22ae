use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, StringRecord, Writer};
use std::path::Path;

use crate::models::{engagement, LabeledPost, Post, Topic};
use crate::x_client::parse_x_timestamp;

pub const RAW_COLUMNS: [&str; 5] = ["id", "created_at", "text", "retweet_count", "favorite_count"];
pub const ENGAGEMENT_COLUMN: &str = "engagement";

/// Column positions of the raw fields within a header row
struct RawColumns {
    id: usize,
    created_at: usize,
    text: usize,
    retweet_count: usize,
    favorite_count: usize,
}

impl RawColumns {
    fn locate(headers: &StringRecord) -> Result<Self> {
        Ok(Self {
            id: column_index(headers, "id")?,
            created_at: column_index(headers, "created_at")?,
            text: column_index(headers, "text")?,
            retweet_count: column_index(headers, "retweet_count")?,
            favorite_count: column_index(headers, "favorite_count")?,
        })
    }

    fn post_from(&self, record: &StringRecord) -> Result<Post> {
        Ok(Post {
            id: field(record, self.id)?.to_string(),
            created_at: parse_created_at(field(record, self.created_at)?)?,
            text: field(record, self.text)?.to_string(),
            retweet_count: parse_count(field(record, self.retweet_count)?)
                .context("Invalid retweet_count")?,
            favorite_count: parse_count(field(record, self.favorite_count)?)
                .context("Invalid favorite_count")?,
        })
    }
}

fn column_index(headers: &StringRecord, name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.trim() == name)
        .with_context(|| format!("Missing column '{}'", name))
}

fn field(record: &StringRecord, index: usize) -> Result<&str> {
    record.get(index).with_context(|| {
        format!(
            "Row has {} fields, expected at least {}",
            record.len(),
            index + 1
        )
    })
}

/// Accepts RFC 3339 and the X API's own timestamp format.
fn parse_created_at(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    parse_x_timestamp(raw)
}

/// Counts may have been written as floats ("12.0") by other tools.
fn parse_count(raw: &str) -> Result<u64> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<u64>() {
        return Ok(n);
    }
    match raw.parse::<f64>() {
        Ok(f) if f >= 0.0 && f.fract() == 0.0 => Ok(f as u64),
        _ => anyhow::bail!("Not a non-negative integer: '{}'", raw),
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => anyhow::bail!("Not a boolean: '{}'", other),
    }
}

fn format_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

fn raw_fields(post: &Post) -> [String; 5] {
    [
        post.id.clone(),
        post.created_at.to_rfc3339(),
        post.text.clone(),
        post.retweet_count.to_string(),
        post.favorite_count.to_string(),
    ]
}

/// Save fetched posts, in fetch order
pub fn write_raw(path: &Path, posts: &[Post]) -> Result<()> {
    let mut writer = Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    writer.write_record(RAW_COLUMNS)?;
    for post in posts {
        writer
            .write_record(raw_fields(post))
            .with_context(|| format!("Failed to write post {}", post.id))?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(())
}

pub fn read_raw(path: &Path) -> Result<Vec<Post>> {
    let mut reader = ReaderBuilder::new()
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read header of {}", path.display()))?
        .clone();
    let columns = RawColumns::locate(&headers)
        .with_context(|| format!("{} is not a raw post table", path.display()))?;

    let mut posts = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Failed to read row {}", row + 1))?;
        let post = columns
            .post_from(&record)
            .with_context(|| format!("Invalid row {} in {}", row + 1, path.display()))?;
        posts.push(post);
    }

    Ok(posts)
}

/// Save ranked and labeled posts with the engagement and label columns appended
pub fn write_processed(path: &Path, rows: &[LabeledPost], topic: &Topic) -> Result<()> {
    let mut writer = Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let label_column = topic.label_column();
    let mut header: Vec<&str> = RAW_COLUMNS.to_vec();
    header.push(ENGAGEMENT_COLUMN);
    header.push(&label_column);
    writer.write_record(&header)?;

    for row in rows {
        let [id, created_at, text, retweets, favorites] = raw_fields(&row.post);
        writer
            .write_record([
                id,
                created_at,
                text,
                retweets,
                favorites,
                row.engagement.to_string(),
                format_bool(row.is_match).to_string(),
            ])
            .with_context(|| format!("Failed to write post {}", row.post.id))?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(())
}

/// Load a processed table. Engagement is recomputed from the counters rather
/// than trusted from the file.
pub fn read_processed(path: &Path, topic: &Topic) -> Result<Vec<LabeledPost>> {
    let mut reader = ReaderBuilder::new()
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read header of {}", path.display()))?
        .clone();
    let columns = RawColumns::locate(&headers)
        .with_context(|| format!("{} is not a processed post table", path.display()))?;
    let label_index = column_index(&headers, &topic.label_column())
        .with_context(|| format!("{} has no label for {}", path.display(), topic.keyword))?;

    let mut rows = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Failed to read row {}", row + 1))?;
        let post = columns
            .post_from(&record)
            .with_context(|| format!("Invalid row {} in {}", row + 1, path.display()))?;
        let is_match = parse_bool(field(&record, label_index)?)
            .with_context(|| format!("Invalid label in row {}", row + 1))?;

        rows.push(LabeledPost {
            engagement: engagement(&post),
            post,
            is_match,
        });
    }

    Ok(rows)
}
