use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use log::{error, info};
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

use skygrid::{Config, NovaService, pipeline};

fn run(config: &Config) -> anyhow::Result<()> {
    let service = NovaService::new(&config.base_url, &config.api_url)
        .context("failed to set up the HTTP client")?;
    let report = pipeline::run(config, service)?;

    let views = [&report.scene.camera, &report.scene.sky];
    let written = views.iter().filter(|outcome| outcome.is_ok()).count();
    info!(
        "Done with submission {}: {written} of 2 views written to {}.",
        report.job.submission_id,
        config.output_dir().display()
    );
    Ok(())
}

fn main() -> ExitCode {
    let config = Config::parse();

    let log_config = ConfigBuilder::new()
        .set_target_level(log::LevelFilter::Off)
        .set_time_level(log::LevelFilter::Off)
        .build();
    if let Err(e) = TermLogger::init(
        config.log_level(),
        log_config,
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ) {
        eprintln!("failed to initialize logging: {e}");
    }

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
