use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::classifier::{BatchClassifier, CompletionService};
use crate::cost::CostModel;
use crate::fetcher::{PostFetcher, PostSource};
use crate::models::{rank_by_engagement, LabeledPost};
use crate::table;

/// Matching posts shown in the final summary.
pub const DEFAULT_TOP_N: usize = 5;

pub const CONFIRM_PROMPT: &str = "Do you want to proceed with classification? (y/n): ";

/// Where a run stands, judged only by which artifacts exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    NoRawData,
    HasRawData,
    HasProcessedData,
}

/// Work needed to move out of a state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Fetch,
    Classify,
    Summarize,
}

impl PipelineState {
    /// A processed table wins even if the raw one has gone missing.
    pub fn from_artifacts(raw_exists: bool, processed_exists: bool) -> Self {
        match (raw_exists, processed_exists) {
            (_, true) => PipelineState::HasProcessedData,
            (true, false) => PipelineState::HasRawData,
            (false, false) => PipelineState::NoRawData,
        }
    }

    pub fn next_step(self) -> Step {
        match self {
            PipelineState::NoRawData => Step::Fetch,
            PipelineState::HasRawData => Step::Classify,
            PipelineState::HasProcessedData => Step::Summarize,
        }
    }

    /// State once `next_step` has written its artifact.
    pub fn advance(self) -> Self {
        match self {
            PipelineState::NoRawData => PipelineState::HasRawData,
            PipelineState::HasRawData | PipelineState::HasProcessedData => {
                PipelineState::HasProcessedData
            }
        }
    }
}

/// File locations for one handle/keyword run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
    pub raw: PathBuf,
    pub processed: PathBuf,
}

impl Artifacts {
    pub fn for_run(dir: &Path, handle: &str, keyword: &str) -> Self {
        Self {
            raw: dir.join(format!("{}_x.csv", handle)),
            processed: dir.join(format!("{}_{}_x.csv", handle, keyword)),
        }
    }

    pub fn state(&self) -> PipelineState {
        PipelineState::from_artifacts(self.raw.exists(), self.processed.exists())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClassifyOutcome {
    Written,
    Declined,
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed(Summary),
    /// The user didn't confirm the classification spend.
    Declined,
}

/// One ranked match for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopPost {
    pub text: String,
    pub engagement: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub keyword: String,
    pub total: usize,
    pub matching: usize,
    pub top: Vec<TopPost>,
}

impl Summary {
    pub fn from_rows(keyword: &str, rows: &[LabeledPost], top_n: usize) -> Self {
        let mut matches: Vec<&LabeledPost> = rows.iter().filter(|row| row.is_match).collect();
        matches.sort_by(|a, b| b.engagement.cmp(&a.engagement));

        let top = matches
            .iter()
            .take(top_n)
            .map(|row| TopPost {
                text: row.post.text.clone(),
                engagement: row.engagement,
                created_at: row.post.created_at,
            })
            .collect();

        Self {
            keyword: keyword.to_string(),
            total: rows.len(),
            matching: matches.len(),
            top,
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total posts: {}", self.total)?;
        writeln!(f, "{} posts: {}", self.keyword, self.matching)?;

        if self.top.is_empty() {
            return Ok(());
        }

        writeln!(f)?;
        writeln!(
            f,
            "Top {} {} posts by engagement:",
            self.top.len(),
            self.keyword
        )?;
        for (i, post) in self.top.iter().enumerate() {
            writeln!(
                f,
                "  {}. [{}] {}",
                i + 1,
                post.engagement,
                post.created_at.format("%Y-%m-%d %H:%M")
            )?;
            writeln!(f, "     {}", preview(&post.text, 100))?;
        }
        Ok(())
    }
}

/// Single-line prefix of `text`, at most `max_chars` characters.
fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}

/// Fetch → rank → confirm → classify → summarize for one author and topic
pub struct Pipeline<S, C> {
    handle: String,
    limit: Option<usize>,
    top_n: usize,
    cost_model: CostModel,
    artifacts: Artifacts,
    fetcher: PostFetcher<S>,
    classifier: BatchClassifier<C>,
}

impl<S: PostSource, C: CompletionService> Pipeline<S, C> {
    pub fn new(
        handle: impl Into<String>,
        artifacts: Artifacts,
        fetcher: PostFetcher<S>,
        classifier: BatchClassifier<C>,
    ) -> Self {
        Self {
            handle: handle.into(),
            limit: None,
            top_n: DEFAULT_TOP_N,
            cost_model: CostModel::default(),
            artifacts,
            fetcher,
            classifier,
        }
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn with_cost_model(mut self, cost_model: CostModel) -> Self {
        self.cost_model = cost_model;
        self
    }

    /// Estimated dollar cost of classifying `count` posts.
    pub fn estimate_cost(&self, count: usize) -> f64 {
        self.cost_model.estimate(count)
    }

    pub fn artifacts(&self) -> &Artifacts {
        &self.artifacts
    }

    /// Run every step still missing an artifact. `confirm` is asked once,
    /// before any money is spent on classification.
    pub async fn run<F>(&self, mut confirm: F) -> Result<RunOutcome>
    where
        F: FnMut(&str) -> Result<bool>,
    {
        let mut state = self.artifacts.state();
        log::debug!("Starting in state {:?}", state);

        match state {
            PipelineState::HasRawData => println!(
                "Raw posts file {} already exists. Skipping fetch.",
                self.artifacts.raw.display()
            ),
            PipelineState::HasProcessedData => println!(
                "Processed file {} already exists. Skipping fetch and classification.",
                self.artifacts.processed.display()
            ),
            PipelineState::NoRawData => {}
        }

        loop {
            match state.next_step() {
                Step::Fetch => self.fetch_raw().await?,
                Step::Classify => {
                    if self.sort_and_classify(&mut confirm).await? == ClassifyOutcome::Declined {
                        return Ok(RunOutcome::Declined);
                    }
                }
                Step::Summarize => return Ok(RunOutcome::Completed(self.summarize()?)),
            }
            state = state.advance();
        }
    }

    async fn fetch_raw(&self) -> Result<()> {
        println!("\n📥 Fetching @{}'s posts from X...", self.handle);
        let posts = self.fetcher.fetch(&self.handle, self.limit).await;

        table::write_raw(&self.artifacts.raw, &posts).context("Failed to save raw posts")?;
        println!(
            "✓ Saved {} posts to {}",
            posts.len(),
            self.artifacts.raw.display()
        );
        Ok(())
    }

    async fn sort_and_classify<F>(&self, confirm: &mut F) -> Result<ClassifyOutcome>
    where
        F: FnMut(&str) -> Result<bool>,
    {
        println!("\n🔢 Sorting and classifying posts...");
        let posts = table::read_raw(&self.artifacts.raw).context("Failed to load raw posts")?;
        let ranked = rank_by_engagement(posts);

        let count = ranked.len();
        let estimated_cost = self.estimate_cost(count);
        println!(
            "Estimated cost to classify {} posts: ${:.2}",
            count, estimated_cost
        );

        if !confirm(CONFIRM_PROMPT)? {
            println!("Classification cancelled.");
            return Ok(ClassifyOutcome::Declined);
        }

        println!("\n🤖 Classifying posts...");
        let texts: Vec<String> = ranked.iter().map(|(post, _)| post.text.clone()).collect();
        let labels = self
            .classifier
            .classify(&texts)
            .await
            .context("Classification failed")?;

        let rows: Vec<LabeledPost> = ranked
            .into_iter()
            .zip(labels)
            .map(|((post, engagement), is_match)| LabeledPost {
                post,
                engagement,
                is_match,
            })
            .collect();

        table::write_processed(&self.artifacts.processed, &rows, self.classifier.topic())
            .context("Failed to save processed posts")?;
        println!(
            "✓ Saved sorted and classified posts to {}",
            self.artifacts.processed.display()
        );
        Ok(ClassifyOutcome::Written)
    }

    fn summarize(&self) -> Result<Summary> {
        let topic = self.classifier.topic();
        let rows = table::read_processed(&self.artifacts.processed, topic)
            .context("Failed to load processed posts")?;
        Ok(Summary::from_rows(&topic.keyword, &rows, self.top_n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::fakes::ScriptedCompleter;
    use crate::fetcher::{AuthorId, FetchError, Page};
    use crate::models::fixtures::post;
    use crate::models::{Post, Topic};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Serves all posts in a single page.
    struct StaticSource {
        posts: Vec<Post>,
        pages_served: AtomicUsize,
    }

    impl StaticSource {
        fn new(posts: Vec<Post>) -> Self {
            Self {
                posts,
                pages_served: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PostSource for StaticSource {
        async fn lookup_author(&self, _handle: &str) -> Result<AuthorId, FetchError> {
            Ok(AuthorId("1".to_string()))
        }

        async fn fetch_page(
            &self,
            _author: &AuthorId,
            _cursor: Option<&str>,
            _count: usize,
        ) -> Result<Page, FetchError> {
            self.pages_served.fetch_add(1, Ordering::SeqCst);
            Ok(Page {
                posts: self.posts.clone(),
                next_cursor: None,
            })
        }
    }

    fn topic() -> Topic {
        Topic::new("PhotoAI", "text-to-image tools")
    }

    fn pipeline(
        dir: &TempDir,
        posts: Vec<Post>,
        replies: &[&str],
    ) -> Pipeline<StaticSource, ScriptedCompleter> {
        let artifacts = Artifacts::for_run(dir.path(), "alice", "PhotoAI");
        let fetcher = PostFetcher::new(StaticSource::new(posts)).with_delay(Duration::ZERO);
        let classifier = BatchClassifier::new(ScriptedCompleter::replying(replies), topic());
        Pipeline::new("alice", artifacts, fetcher, classifier)
    }

    #[test]
    fn test_state_from_artifacts() {
        assert_eq!(
            PipelineState::from_artifacts(false, false),
            PipelineState::NoRawData
        );
        assert_eq!(
            PipelineState::from_artifacts(true, false),
            PipelineState::HasRawData
        );
        assert_eq!(
            PipelineState::from_artifacts(true, true),
            PipelineState::HasProcessedData
        );
        assert_eq!(
            PipelineState::from_artifacts(false, true),
            PipelineState::HasProcessedData
        );
    }

    #[test]
    fn test_state_steps_and_transitions() {
        let mut state = PipelineState::NoRawData;
        let mut steps = Vec::new();
        loop {
            let step = state.next_step();
            steps.push(step);
            if step == Step::Summarize {
                break;
            }
            state = state.advance();
        }
        assert_eq!(steps, vec![Step::Fetch, Step::Classify, Step::Summarize]);
        assert_eq!(
            PipelineState::HasProcessedData.advance(),
            PipelineState::HasProcessedData
        );
    }

    #[test]
    fn test_artifact_names() {
        let artifacts = Artifacts::for_run(Path::new("/data"), "levelsio", "PhotoAI");
        assert_eq!(artifacts.raw, PathBuf::from("/data/levelsio_x.csv"));
        assert_eq!(artifacts.processed, PathBuf::from("/data/levelsio_PhotoAI_x.csv"));
    }

    #[test]
    fn test_summary_counts_and_top_n() {
        let rows: Vec<LabeledPost> = (1..=8)
            .map(|i| LabeledPost {
                post: post(i, 0, i * 10),
                engagement: i * 10,
                is_match: i % 4 != 0,
            })
            .collect();

        let summary = Summary::from_rows("PhotoAI", &rows, 5);
        assert_eq!(summary.total, 8);
        assert_eq!(summary.matching, 6);
        let engagements: Vec<u64> = summary.top.iter().map(|t| t.engagement).collect();
        assert_eq!(engagements, vec![70, 60, 50, 30, 20]);

        let rendered = summary.to_string();
        assert!(rendered.contains("Total posts: 8"));
        assert!(rendered.contains("PhotoAI posts: 6"));
        assert!(rendered.contains("Top 5 PhotoAI posts by engagement:"));
    }

    #[test]
    fn test_summary_without_matches() {
        let rows = vec![LabeledPost {
            post: post(1, 1, 1),
            engagement: 2,
            is_match: false,
        }];
        let summary = Summary::from_rows("PhotoAI", &rows, 5);
        assert_eq!(summary.matching, 0);
        assert!(summary.top.is_empty());
        assert!(!summary.to_string().contains("Top"));
    }

    #[test]
    fn test_preview_flattens_and_truncates() {
        assert_eq!(preview("a\nb   c", 100), "a b c");
        assert_eq!(preview("ééééé", 3), "ééé…");
    }

    #[test]
    fn test_cost_model_drives_estimate() {
        let dir = TempDir::new().unwrap();
        let default_pipeline = pipeline(&dir, Vec::new(), &[]);
        assert!((default_pipeline.estimate_cost(1000) - 1.0).abs() < 1e-9);

        let cheap = pipeline(&dir, Vec::new(), &[]).with_cost_model(CostModel {
            rate_per_1k_tokens: 0.001,
            tokens_per_item: 100,
        });
        assert!((cheap.estimate_cost(1000) - 0.1).abs() < 1e-9);
        assert_eq!(cheap.estimate_cost(0), 0.0);
    }

    #[tokio::test]
    async fn test_full_run_ranks_classifies_and_summarizes() {
        let dir = TempDir::new().unwrap();
        // Ranked order will be 2 (50), 3 (7), 1 (1)
        let posts = vec![post(1, 1, 0), post(2, 20, 30), post(3, 3, 4)];
        let pipeline = pipeline(&dir, posts, &["Yes, no, yes"]);

        let mut prompts = Vec::new();
        let outcome = pipeline
            .run(|prompt| {
                prompts.push(prompt.to_string());
                Ok(true)
            })
            .await
            .unwrap();

        assert_eq!(prompts, vec![CONFIRM_PROMPT.to_string()]);
        assert!(pipeline.artifacts().raw.exists());
        assert!(pipeline.artifacts().processed.exists());

        let rows = table::read_processed(&pipeline.artifacts().processed, &topic()).unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.post.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3", "1"]);
        let labels: Vec<bool> = rows.iter().map(|r| r.is_match).collect();
        assert_eq!(labels, vec![true, false, true]);

        match outcome {
            RunOutcome::Completed(summary) => {
                assert_eq!(summary.total, 3);
                assert_eq!(summary.matching, 2);
                assert_eq!(summary.top[0].engagement, 50);
                assert_eq!(summary.top[1].engagement, 1);
            }
            RunOutcome::Declined => panic!("run should have completed"),
        }
    }

    #[tokio::test]
    async fn test_declined_confirmation_writes_no_processed_file() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir, vec![post(1, 1, 1)], &[]);

        let outcome = pipeline.run(|_| Ok(false)).await.unwrap();

        assert!(matches!(outcome, RunOutcome::Declined));
        assert!(pipeline.artifacts().raw.exists());
        assert!(!pipeline.artifacts().processed.exists());
        assert!(pipeline.classifier.service_requests().is_empty());
    }

    #[tokio::test]
    async fn test_existing_raw_file_skips_fetch() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir, vec![post(9, 0, 0)], &["no"]);
        table::write_raw(&pipeline.artifacts().raw, &[post(1, 5, 5)]).unwrap();

        let outcome = pipeline.run(|_| Ok(true)).await.unwrap();

        assert_eq!(pipeline.fetcher_pages_served(), 0);
        match outcome {
            RunOutcome::Completed(summary) => {
                assert_eq!(summary.total, 1);
                assert_eq!(summary.matching, 0);
            }
            RunOutcome::Declined => panic!("run should have completed"),
        }
    }

    #[tokio::test]
    async fn test_existing_processed_file_only_summarizes() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir, vec![post(9, 0, 0)], &[]);
        let rows = vec![LabeledPost {
            post: post(1, 2, 3),
            engagement: 5,
            is_match: true,
        }];
        table::write_processed(&pipeline.artifacts().processed, &rows, &topic()).unwrap();

        let outcome = pipeline
            .run(|_| panic!("confirmation must not be requested"))
            .await
            .unwrap();

        assert_eq!(pipeline.fetcher_pages_served(), 0);
        assert!(!pipeline.artifacts().raw.exists());
        match outcome {
            RunOutcome::Completed(summary) => assert_eq!(summary.matching, 1),
            RunOutcome::Declined => panic!("run should have completed"),
        }
    }

    #[tokio::test]
    async fn test_misaligned_labels_fail_without_processed_file() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir, vec![post(1, 0, 0), post(2, 0, 0)], &["yes"]);

        let err = pipeline.run(|_| Ok(true)).await.unwrap_err();

        assert!(format!("{:#}", err).contains("expected 2 labels, got 1"));
        assert!(pipeline.artifacts().raw.exists());
        assert!(!pipeline.artifacts().processed.exists());
    }

    #[tokio::test]
    async fn test_empty_fetch_still_writes_raw_file() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir, Vec::new(), &[]);

        let outcome = pipeline.run(|_| Ok(true)).await.unwrap();

        assert!(table::read_raw(&pipeline.artifacts().raw).unwrap().is_empty());
        match outcome {
            RunOutcome::Completed(summary) => assert_eq!(summary.total, 0),
            RunOutcome::Declined => panic!("run should have completed"),
        }
    }

    impl Pipeline<StaticSource, ScriptedCompleter> {
        fn fetcher_pages_served(&self) -> usize {
            self.fetcher.source().pages_served.load(Ordering::SeqCst)
        }
    }

    impl BatchClassifier<ScriptedCompleter> {
        fn service_requests(&self) -> Vec<crate::classifier::CompletionRequest> {
            self.service().requests.lock().unwrap().clone()
        }
    }
}
