use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use manipqa::{
    annotation::PromptBook,
    filter::{move_rejected, FilterOptions, SampleFilter, FILTER_SCENES},
    logging::init_tracing,
    providers::openai::OpenAI,
    OracleConfig,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "filter-samples")]
#[command(about = "Screen start/end pairs for object visibility before annotation")]
struct Args {
    /// Root directory of the captured frames
    #[arg(long = "image_dir")]
    image_dir: PathBuf,

    /// Output directory for <scene>_filter.jsonl
    #[arg(long = "filter_dir")]
    filter_dir: PathBuf,

    /// Where rejected frames are moved; defaults to a `filtered_out` sibling of the image root
    #[arg(long = "filtered_image_dir")]
    filtered_image_dir: Option<PathBuf>,

    #[arg(long, default_value = "o3")]
    model: String,

    /// Concurrent pairs per scene
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Move rejected samples after filtering
    #[arg(long = "move_filtered")]
    move_filtered: bool,

    /// YAML file overriding built-in prompts
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

    std::fs::create_dir_all(&args.filter_dir)?;
    let filter = SampleFilter::new(
        provider,
        FilterOptions {
            image_dir: args.image_dir.clone(),
            filter_dir: args.filter_dir.clone(),
            model: args.model.clone(),
            workers_per_scene: args.workers,
        },
    )
    .with_prompts(prompts);

    filter.filter_all(&FILTER_SCENES).await;
    info!("all scenes processed");

    if args.move_filtered {
        let out_dir = args.filtered_image_dir.clone().unwrap_or_else(|| {
            args.image_dir
                .parent()
                .map(|parent| parent.join("filtered_out"))
                .unwrap_or_else(|| PathBuf::from("filtered_out"))
        });
        let moved = move_rejected(&args.filter_dir, &args.image_dir, &out_dir)?;
        info!("moved {moved} images to {}", out_dir.display());
    }
    Ok(())
}
