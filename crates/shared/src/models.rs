use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single fetched post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub text: String,
    pub retweet_count: u64,
    pub favorite_count: u64,
}

/// Ranking key: retweets plus favorites.
pub fn engagement(post: &Post) -> u64 {
    post.retweet_count.saturating_add(post.favorite_count)
}

/// A post after ranking and classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledPost {
    pub post: Post,
    pub engagement: u64,
    pub is_match: bool,
}

/// Posts paired with their engagement, sorted highest first.
///
/// `sort_by` is stable, so ties keep fetch order.
pub fn rank_by_engagement(posts: Vec<Post>) -> Vec<(Post, u64)> {
    let mut ranked: Vec<(Post, u64)> = posts
        .into_iter()
        .map(|post| {
            let score = engagement(&post);
            (post, score)
        })
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked
}

/// The subject posts are classified against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub keyword: String,
    pub description: String,
}

impl Topic {
    pub fn new(keyword: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            description: description.into(),
        }
    }

    /// Name of the boolean column in the processed table, e.g. `is_photoai`.
    pub fn label_column(&self) -> String {
        let slug: String = self
            .keyword
            .trim()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("is_{}", slug)
    }
}
