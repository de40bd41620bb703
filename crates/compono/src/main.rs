use std::{path::PathBuf, process::ExitCode};

use anyhow::Result;
use clap::{ArgAction, Parser};
use compono::{
    compiler::{CompileResult, Compiler},
    config::Config,
    messaging::LogPublisher,
    types::Mode,
    watch::watch,
};
use log::{LevelFilter, error, info};

#[derive(Parser, Debug)]
#[command(name = "compono", version, about = "Bundle component-based JavaScript for the web")]
struct Cli {
    /// Entry module
    entry: PathBuf,

    /// Output directory
    #[arg(short, long)]
    out_dir: Option<PathBuf>,

    /// Build mode
    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// Configuration file, instead of `compono.toml` next to the entry
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit a service worker precaching every bundle
    #[arg(long)]
    service_worker: bool,

    /// Recompile whenever a file in the project changes
    #[arg(long)]
    watch: bool,

    /// Include error stacks in failure reports
    #[arg(long)]
    debug: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn into_config(self) -> Result<(Config, bool)> {
        let project_dir = self
            .entry
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), PathBuf::from);
        let mut config = Config::load(self.config.as_deref(), &project_dir)?;

        config.entry = Some(self.entry);
        if let Some(out_dir) = self.out_dir {
            config.out_dir = out_dir;
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        config.service_worker |= self.service_worker;
        config.debug |= self.debug;
        Ok((config, self.watch))
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn report(result: &CompileResult) {
    match result {
        CompileResult::Success {
            duration, stats, ..
        } => {
            for bundle in &stats.bundles {
                info!("  {} ({} bytes)", bundle.filename, bundle.size);
            }
            info!(
                "Built {} modules, {} components in {duration:?}",
                stats.modules, stats.components
            );
        }
        CompileResult::Failure { error, stack } => {
            error!("Build failed: {error}");
            if let Some(stack) = stack {
                error!("{stack}");
            }
        }
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let (config, watch_mode) = cli.into_config()?;
    if watch_mode {
        watch(config, &LogPublisher, report)?;
        return Ok(ExitCode::SUCCESS);
    }

    let result = Compiler::new(config).compile();
    report(&result);
    Ok(if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
