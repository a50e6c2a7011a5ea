use anyhow::{Context, Result};
use clap::Parser;
use env_logger::{Builder, Env};
use log::debug;

use volume_segment::{
    config::Config,
    events::LogSink,
    pipeline::{Pipeline, RunStatus},
};

fn main() -> Result<()> {
    let config = Config::parse();

    let default_level = if config.verbose { "debug" } else { "info" };
    Builder::from_env(Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();
    debug!("{config:#?}");

    let result = Pipeline::new(config.to_params()).with_sink(LogSink).run();

    if let RunStatus::Failed { stage, error } = result.status {
        return Err(error).with_context(|| format!("segmentation failed in the {stage} stage"));
    }
    Ok(())
}
