use clap::Parser;
use imcurate::cli::SubCommandExtend;
use imcurate::config::{Opts, SubCommand};
use imcurate::metrics;
use log::info;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = Opts::parse();

    match &opts.subcmd {
        SubCommand::Analyze(config) => config.run(&opts).await?,
        SubCommand::Rank(config) => config.run(&opts).await?,
        SubCommand::Manifest(config) => config.run(&opts).await?,
        SubCommand::Clusters(config) => config.run(&opts).await?,
    }

    if let Some(path) = &opts.metrics {
        metrics::write_to(path)?;
        info!("metrics written to {}", path.display());
    }

    Ok(())
}
