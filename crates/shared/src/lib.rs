// Public modules
pub mod classifier;
pub mod config;
pub mod cost;
pub mod fetcher;
pub mod models;
pub mod openai;
pub mod pipeline;
pub mod table;
pub mod x_client;

// Re-export commonly used types
pub use classifier::{BatchClassifier, ClassifyError, CompletionRequest, CompletionService};
pub use config::Config;
pub use cost::{estimate_cost, estimate_cost_default, CostModel};
pub use fetcher::{FetchError, PostFetcher, PostSource};
pub use models::{engagement, LabeledPost, Post, Topic};
pub use openai::OpenAiCompleter;
pub use pipeline::{Artifacts, Pipeline, PipelineState, RunOutcome, Summary};
pub use x_client::XClient;
