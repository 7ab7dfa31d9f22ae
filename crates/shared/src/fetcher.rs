use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::models::Post;

/// Posts requested per page.
pub const PAGE_SIZE: usize = 100;

/// Pause between page requests so the upstream doesn't rate limit us.
pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Author not found: {0}")]
    AuthorNotFound(String),

    #[error("Transport error: {0:#}")]
    Transport(#[from] anyhow::Error),
}

/// Platform-internal author identifier resolved from a handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorId(pub String);

/// One page of an author's timeline
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub posts: Vec<Post>,
    pub next_cursor: Option<String>,
}

/// Upstream that can resolve handles and page through an author's posts.
#[async_trait]
pub trait PostSource: Send + Sync {
    async fn lookup_author(&self, handle: &str) -> Result<AuthorId, FetchError>;

    async fn fetch_page(
        &self,
        author: &AuthorId,
        cursor: Option<&str>,
        count: usize,
    ) -> Result<Page, FetchError>;
}

pub struct PostFetcher<S> {
    source: S,
    page_size: usize,
    delay: Duration,
}

impl<S: PostSource> PostFetcher<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            page_size: PAGE_SIZE,
            delay: DEFAULT_PAGE_DELAY,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch posts for `handle` until the timeline runs out or `limit` is hit.
    ///
    /// Never fails: an unknown author gives an empty vec, and an error
    /// mid-way returns whatever was collected before it.
    pub async fn fetch(&self, handle: &str, limit: Option<usize>) -> Vec<Post> {
        let author = match self.source.lookup_author(handle).await {
            Ok(author) => author,
            Err(FetchError::AuthorNotFound(_)) => {
                log::warn!("No such author: @{}", handle);
                return Vec::new();
            }
            Err(e) => {
                log::error!("Failed to look up @{}: {}", handle, e);
                return Vec::new();
            }
        };

        let mut all_posts: Vec<Post> = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = match self
                .source
                .fetch_page(&author, cursor.as_deref(), self.page_size)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    log::error!("Error occurred while fetching posts: {}", e);
                    break;
                }
            };

            if page.posts.is_empty() {
                break;
            }

            all_posts.extend(page.posts);
            println!("Fetched {} posts so far...", all_posts.len());

            if let Some(limit) = limit {
                if all_posts.len() >= limit {
                    all_posts.truncate(limit);
                    break;
                }
            }

            cursor = match page.next_cursor {
                Some(next) => Some(next),
                None => break,
            };

            tokio::time::sleep(self.delay).await;
        }

        all_posts
    }
}
