use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use manipqa::{
    annotation::PromptBook,
    eval::{EvalOptions, EvalRunner},
    logging::init_tracing,
    providers::openai::OpenAI,
    OracleConfig,
};

#[derive(Parser)]
#[command(name = "eval-model")]
#[command(about = "Ask a model every benchmark question and append answers to eval_<model>.jsonl")]
struct Args {
    /// Model name to evaluate
    #[arg(long)]
    model: String,

    /// Question JSON array
    #[arg(long = "benchmark_path")]
    benchmark_path: PathBuf,

    /// Base directory the question image paths are relative to
    #[arg(long = "image_base")]
    image_base: PathBuf,

    #[arg(long = "result_dir")]
    result_dir: PathBuf,

    /// Concurrent requests
    #[arg(long, default_value_t = 32)]
    threads: usize,

    /// YAML file overriding the evaluation prompt
    #[arg(long)]
    prompts: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_tracing("info,manipqa=debug");
    let args = Args::parse();

    let oracle = OracleConfig::from_env()?.with_model(args.model.clone());
    let provider = Arc::new(OpenAI::from_config(oracle)?);
    let prompts = match &args.prompts {
        Some(path) => PromptBook::load_yaml(path)?,
        None => PromptBook::default(),
    };

    std::fs::create_dir_all(&args.result_dir)?;
    let options = EvalOptions::new(&args.image_base, &args.result_dir, args.model.clone())
        .with_threads(args.threads);
    let runner = EvalRunner::new(provider, options).with_prompts(prompts);
    runner.run(&args.benchmark_path).await?;
    Ok(())
}
