use std::env;

use anyhow::Context;
use frontier::run::{render, RunFile};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let path = env::args()
        .nth(1)
        .or_else(|| env::var("FRONTIER_RUN_FILE").ok())
        .context("usage: frontier-bin <run.json> (or set FRONTIER_RUN_FILE)")?;

    let run = RunFile::load(&path)?;
    info!("Loaded run for assets {:?}.", run.assets);

    let result = run.execute()?;
    print!("{}", render(&result));

    Ok(())
}
