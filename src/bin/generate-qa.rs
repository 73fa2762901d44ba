use std::path::PathBuf;

use clap::Parser;
use manipqa::{
    logging::init_tracing,
    qa::{load_annotations, synthesize_all, QuestionFamily},
    store, SceneCategory, SynthesisConfig,
};
use rand::{rngs::StdRng, SeedableRng};
use tracing::info;

#[derive(Parser)]
#[command(name = "generate-qa")]
#[command(about = "Synthesize benchmark questions from scene annotations")]
struct Args {
    /// Directory containing <scene>_meta.jsonl files
    #[arg(long = "meta_dir")]
    meta_dir: PathBuf,

    /// Output JSON array
    #[arg(long = "output_file")]
    output_file: PathBuf,

    /// Question families to run (repeatable); all when omitted
    #[arg(long = "family")]
    families: Vec<QuestionFamily>,

    /// YAML synthesis config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the configured seed
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_tracing("info,manipqa=debug");
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SynthesisConfig::load_yaml(path)?,
        None => SynthesisConfig::default(),
    };
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }
    let families = if args.families.is_empty() {
        QuestionFamily::ALL.to_vec()
    } else {
        args.families.clone()
    };

    let annotations = load_annotations(&args.meta_dir, SceneCategory::all())?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let items = synthesize_all(&annotations, &families, &config, &mut rng);

    store::write_json_array(&args.output_file, &items)?;
    info!("total questions generated: {}", items.len());
    info!("results saved to {}", args.output_file.display());
    Ok(())
}
