use anyhow::{Context, Result};
use clap::Parser;
use shared::{
    Artifacts, BatchClassifier, Config, CostModel, OpenAiCompleter, Pipeline, PostFetcher,
    RunOutcome, Topic, XClient,
};
use std::io::{self as stdio, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "label-posts")]
#[command(about = "Fetch a user's posts from X, rank them by engagement and label them by topic")]
struct Args {
    /// X handle to fetch posts from (without the @)
    #[arg(long, default_value = "levelsio")]
    handle: String,

    /// Topic keyword to classify posts against
    #[arg(short, long, default_value = "PhotoAI")]
    keyword: String,

    /// What counts as related to the keyword, spelled out for the model
    #[arg(
        long,
        default_value = "development, LLM models, text-to-image tools, revenue"
    )]
    description: String,

    /// Stop after this many posts (default: fetch everything)
    #[arg(short, long)]
    limit: Option<usize>,

    /// Directory for the raw and processed CSV files
    #[arg(short, long, default_value = ".")]
    dir: PathBuf,

    /// Posts per classification request
    #[arg(long, default_value_t = shared::classifier::DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Price in dollars per 1,000 tokens, for the cost estimate
    #[arg(long, default_value_t = shared::cost::DEFAULT_RATE_PER_1K_TOKENS)]
    rate_per_1k: f64,

    /// Assumed tokens per post, prompt included, for the cost estimate
    #[arg(long, default_value_t = shared::cost::DEFAULT_TOKENS_PER_ITEM)]
    tokens_per_post: u64,

    /// Number of top matches to show
    #[arg(long, default_value_t = shared::pipeline::DEFAULT_TOP_N)]
    top: usize,

    /// Classify without asking for confirmation
    #[arg(short, long)]
    yes: bool,
}

fn prompt_confirmation(prompt: &str) -> Result<bool> {
    print!("{}", prompt);
    stdio::stdout().flush()?;

    let mut input = String::new();
    stdio::stdin()
        .read_line(&mut input)
        .context("Failed to read confirmation")?;

    Ok(is_affirmative(&input))
}

fn is_affirmative(input: &str) -> bool {
    input.trim().eq_ignore_ascii_case("y")
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = Config::from_env()?;

    std::fs::create_dir_all(&args.dir)
        .with_context(|| format!("Failed to create {}", args.dir.display()))?;

    let topic = Topic::new(&args.keyword, &args.description);
    let artifacts = Artifacts::for_run(&args.dir, &args.handle, &args.keyword);

    let fetcher = PostFetcher::new(XClient::new(&config)?);
    let classifier = BatchClassifier::new(OpenAiCompleter::new(&config)?, topic)
        .with_batch_size(args.batch_size);
    let cost_model = CostModel {
        rate_per_1k_tokens: args.rate_per_1k,
        tokens_per_item: args.tokens_per_post,
    };
    log::debug!(
        "Using model {} with cost model {:?}",
        config.openai_model,
        cost_model
    );

    let pipeline = Pipeline::new(&args.handle, artifacts, fetcher, classifier)
        .with_limit(args.limit)
        .with_top_n(args.top)
        .with_cost_model(cost_model);

    let skip_prompt = args.yes;
    let outcome = pipeline
        .run(|prompt| {
            if skip_prompt {
                println!("{}y (--yes)", prompt);
                return Ok(true);
            }
            prompt_confirmation(prompt)
        })
        .await?;

    match outcome {
        RunOutcome::Completed(summary) => {
            log::info!(
                "Run complete: {} of {} posts match {}",
                summary.matching,
                summary.total,
                summary.keyword
            );
            println!("\n{}", summary);
            println!("✅ Done.");
        }
        RunOutcome::Declined => {
            log::info!("Classification declined for @{}", args.handle);
            println!("\nNo processed file written. Re-run to classify.");
        }
    }

    Ok(())
}
