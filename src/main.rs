mod command;
mod config;
mod controller;
mod error;
mod harness;
mod loader;
mod output;
mod retry;
mod supervisor;
#[cfg(test)]
mod testing;
mod watch;

use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use config::{MonitorConfig, Overrides, ReloaderConfig};
use controller::{Controller, FileSessions};
use loader::DirectiveLoader;

/// Runs the unit of work declared by a file, watches the file for edits,
/// and restarts the work when it changes or fails.
#[derive(Parser, Debug)]
#[command(name = "reloader", version, about)]
pub struct Cli {
    /// File to monitor; its directives declare the entrypoint and cleanup commands
    #[arg(long, value_parser = existing_file)]
    file: PathBuf,

    /// Cause-chain entries shown per error (default: 3)
    #[arg(long)]
    tb_limit: Option<u32>,

    /// Faulted restarts allowed before exiting (default: 5)
    #[arg(long)]
    retries: Option<u32>,

    /// Seconds to wait after a faulted restart (default: 5)
    #[arg(long)]
    retry_delay: Option<u64>,

    /// Seconds between polls for completion and changes (default: 2)
    #[arg(long)]
    rate: Option<u64>,

    /// Config file path (default: reloader.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Load the file, print resolved settings and directives, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (session lifecycle, retry decisions)
    #[arg(short, long)]
    verbose: bool,

    /// Hide the unit's own output, only supervisor events
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            tb_limit: self.tb_limit,
            retries: self.retries,
            retry_delay_secs: self.retry_delay,
            rate_secs: self.rate,
        }
    }
}

fn existing_file(raw: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(raw);
    if path.is_file() {
        Ok(path)
    } else {
        Err(format!("file '{raw}' does not exist"))
    }
}

/// Default filter: supervisor events at info, the unit's output at debug.
fn default_filter(cli: &Cli) -> &'static str {
    if cli.verbose {
        "reloader=debug"
    } else if cli.quiet {
        "reloader=info"
    } else {
        "reloader=info,reloader::output=debug"
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(&cli)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let mut settings = match ReloaderConfig::load(cli.config.as_deref()) {
        Ok(config) => config.monitor,
        Err(e) => {
            tracing::error!(
                error = %error::CauseChain::new(&e, 2),
                "failed to load configuration"
            );
            return ExitCode::from(2);
        }
    };
    settings.apply(&cli.overrides());

    if cli.dry_run {
        return dry_run(&cli.file, &settings);
    }

    tracing::info!(file = %cli.file.display(), "monitoring");

    let sessions = FileSessions::new(&cli.file, DirectiveLoader, settings.rate());
    let mut controller = Controller::new(sessions, &settings);
    let exit = controller.run().await;
    tracing::debug!(%exit, code = exit.code(), "supervisor stopped");
    ExitCode::from(exit.code())
}

fn dry_run(file: &Path, settings: &MonitorConfig) -> ExitCode {
    println!("reloader v{}", env!("CARGO_PKG_VERSION"));
    println!("file:        {}", file.display());
    println!("tb_limit:    {}", settings.tb_limit);
    println!("retries:     {}", settings.retries);
    println!("retry_delay: {}s", settings.retry_delay_secs);
    println!("rate:        {}s", settings.rate_secs);

    match DirectiveLoader.read(file) {
        Ok(directives) => {
            let describe = |spec: Option<&command::CommandSpec>| {
                spec.map_or_else(|| "(none)".to_string(), ToString::to_string)
            };
            println!("entrypoint:  {}", describe(directives.entrypoint.as_ref()));
            println!("cleanup:     {}", describe(directives.cleanup.as_ref()));
            if directives.entrypoint.is_none() {
                eprintln!("no entrypoint directive found");
                return ExitCode::from(2);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", error::CauseChain::new(&e, 2));
            ExitCode::from(2)
        }
    }
}
