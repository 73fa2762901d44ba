use std::path::PathBuf;

use clap::Parser;
use manipqa::{eval::score_run, logging::init_tracing};

#[derive(Parser)]
#[command(name = "score")]
#[command(about = "Score eval_<model>.jsonl and update results.json")]
struct Args {
    #[arg(long)]
    model: String,

    #[arg(long = "result_dir")]
    result_dir: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_tracing("info");
    let args = Args::parse();

    score_run(&args.result_dir, &args.model)?;
    Ok(())
}
