use async_trait::async_trait;
use thiserror::Error;

use crate::models::Topic;

/// Texts sent per completion request.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Output tokens budgeted per label ("Yes, " and change).
const TOKENS_PER_LABEL: u32 = 5;

const TEMPERATURE: f32 = 0.3;

#[derive(Error, Debug)]
pub enum ClassifyError {
    /// The model answered with a different number of labels than texts sent.
    #[error("Batch {batch}: expected {expected} labels, got {got}")]
    Alignment {
        batch: usize,
        expected: usize,
        got: usize,
    },

    #[error("Completion service error: {0:#}")]
    Service(#[from] anyhow::Error),
}

/// Parameters for a single text completion
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub n: u32,
}

/// A prompt-in, text-out language model.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<String>;
}

pub struct BatchClassifier<C> {
    service: C,
    topic: Topic,
    batch_size: usize,
}

impl<C: CompletionService> BatchClassifier<C> {
    pub fn new(service: C, topic: Topic) -> Self {
        Self {
            service,
            topic,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Batch sizes below 1 are bumped to 1.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn service(&self) -> &C {
        &self.service
    }

    /// Label every text, one request per batch, preserving input order.
    ///
    /// A batch whose answer doesn't have exactly one label per text fails the
    /// whole call rather than shifting labels onto the wrong posts.
    pub async fn classify(&self, texts: &[String]) -> Result<Vec<bool>, ClassifyError> {
        let mut results = Vec::with_capacity(texts.len());
        let total_batches = texts.len().div_ceil(self.batch_size);

        for (index, batch) in texts.chunks(self.batch_size).enumerate() {
            let request = CompletionRequest {
                prompt: build_prompt(&self.topic, batch),
                max_tokens: max_tokens_for(self.batch_size),
                temperature: TEMPERATURE,
                n: 1,
            };

            let response = self.service.complete(&request).await?;
            let labels = parse_labels(&response);

            if labels.len() != batch.len() {
                return Err(ClassifyError::Alignment {
                    batch: index + 1,
                    expected: batch.len(),
                    got: labels.len(),
                });
            }

            results.extend(labels);
            println!("  Classified batch {}/{}", index + 1, total_batches);
        }

        Ok(results)
    }
}

/// Output budget for a batch, saturating at `u32::MAX` for huge batch sizes.
fn max_tokens_for(batch_size: usize) -> u32 {
    u32::try_from(batch_size)
        .ok()
        .and_then(|size| size.checked_mul(TOKENS_PER_LABEL))
        .unwrap_or(u32::MAX)
}

/// Prompt for one batch; texts are numbered from 1 within the batch.
pub fn build_prompt(topic: &Topic, batch: &[String]) -> String {
    let mut prompt = format!(
        "Classify each tweet as related to {} ({}) or not. \
         Respond with only 'Yes' or 'No' for each tweet, separated by commas.\n\n",
        topic.keyword, topic.description
    );

    let numbered: Vec<String> = batch
        .iter()
        .enumerate()
        .map(|(j, text)| format!("Tweet {}: {}", j + 1, text))
        .collect();
    prompt.push_str(&numbered.join("\n"));
    prompt.push_str("\n\nClassifications:");
    prompt
}

/// Comma-separated answers to booleans; anything but "yes" is `false`.
pub fn parse_labels(response: &str) -> Vec<bool> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed
        .split(',')
        .map(|token| token.trim().eq_ignore_ascii_case("yes"))
        .collect()
}
