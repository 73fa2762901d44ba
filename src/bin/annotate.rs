use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use manipqa::{
    annotation::{Annotator, AnnotatorOptions, AnnotationParser, DiscPolicy, ParserOptions, PromptBook},
    logging::init_tracing,
    providers::openai::OpenAI,
    OracleConfig, SceneCategory,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "annotate")]
#[command(about = "Annotate captured scenes with a vision model and append to <scene>_meta.jsonl")]
struct Args {
    /// Root directory of the captured frames
    #[arg(long = "image_dir")]
    image_dir: PathBuf,

    /// Root directory of cropped completed frames
    #[arg(long = "crop_dir")]
    crop_dir: PathBuf,

    /// Output directory for annotation logs
    #[arg(long = "meta_dir")]
    meta_dir: PathBuf,

    /// Model identifier; defaults to MANIPQA_MODEL or the built-in default
    #[arg(long)]
    model: Option<String>,

    /// Restrict to these scenes (repeatable)
    #[arg(long = "scene")]
    scenes: Vec<SceneCategory>,

    /// Concurrent samples per scene
    #[arg(long, default_value_t = 64)]
    workers: usize,

    /// Concurrent scenes
    #[arg(long = "scene_workers", default_value_t = 8)]
    scene_workers: usize,

    /// YAML file overriding built-in prompts
    #[arg(long)]
    prompts: Option<PathBuf>,

    /// Drop a whole disc board when any of its records fails to decode
    #[arg(long = "reject_invalid_discs")]
    reject_invalid_discs: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_tracing("info,manipqa=debug");
    let args = Args::parse();

    let mut oracle = OracleConfig::from_env()?;
    if let Some(model) = &args.model {
        oracle = oracle.with_model(model.clone());
    }
    let model = oracle.model.clone();
    let provider = Arc::new(OpenAI::from_config(oracle)?);

    let prompts = match &args.prompts {
        Some(path) => PromptBook::load_yaml(path)?,
        None => PromptBook::default(),
    };
    let disc_policy = if args.reject_invalid_discs {
        DiscPolicy::RejectField
    } else {
        DiscPolicy::DropInvalid
    };

    std::fs::create_dir_all(&args.meta_dir)?;
    let mut options = AnnotatorOptions::new(&args.image_dir, &args.crop_dir, &args.meta_dir);
    options.model = model.clone();
    options.workers_per_scene = args.workers;
    options.max_scene_workers = args.scene_workers;

    let annotator = Annotator::new(provider, options)
        .with_prompts(prompts)
        .with_parser(AnnotationParser::new(ParserOptions { disc_policy }));

    let scenes = if args.scenes.is_empty() {
        SceneCategory::all().to_vec()
    } else {
        args.scenes.clone()
    };
    info!("annotating {} scenes with {model}", scenes.len());

    let outcomes = annotator.annotate_all(&scenes).await;
    let failed: Vec<String> = outcomes
        .iter()
        .filter(|(_, outcome)| outcome.is_err())
        .map(|(scene, _)| scene.to_string())
        .collect();
    if !failed.is_empty() {
        return Err(format!("scenes failed: {}", failed.join(", ")).into());
    }
    Ok(())
}
