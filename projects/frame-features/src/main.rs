mod checkpoint;
mod cli;
mod config;
mod pipeline;
mod run_artifacts;
mod run_context;
mod video;

use anyhow::Result;
use cli::{Args, Command};

fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let args = Args::parse_args();

    match args.command {
        Command::Extract(extract) => pipeline::orchestrator::run(&extract)?,
        Command::ListVideos(list) => {
            run_context::write_generated_csv(&list.vid_dir, &list.output)?;
        }
    }

    Ok(())
}
