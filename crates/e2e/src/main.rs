//! `viewcheck` command line entry point

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use viewcheck_core::{RefUpdateMode, RunConfig};
use viewcheck_e2e::{Browser, EventReporter, PlaywrightConfig, PlaywrightLauncher, RunnerConfig, TestRunner};

#[derive(Parser, Debug)]
#[command(name = "viewcheck")]
#[command(author, version, about = "Visual-state assertions for browser tests", long_about = None)]
struct Args {
    /// Path to the run configuration (TOML)
    #[arg(short, long, default_value = "viewcheck.toml", env = "VIEWCHECK_CONFIG")]
    config: PathBuf,

    /// Path to test specs directory
    #[arg(short, long, default_value = "tests/visual/specs")]
    specs: PathBuf,

    /// Run only tests matching this tag
    #[arg(short, long)]
    tag: Option<String>,

    /// Run only a specific test by name
    #[arg(short, long)]
    name: Option<String>,

    /// Base URL relative navigation is resolved against
    #[arg(long, default_value = "http://127.0.0.1:8080", env = "VIEWCHECK_BASE_URL")]
    base_url: String,

    /// Browser to use
    #[arg(long, value_enum, default_value_t = Browser::Chromium)]
    browser: Browser,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Reference update mode (overrides the config file)
    #[arg(long, value_parser = parse_update_mode)]
    update_refs: Option<RefUpdateMode>,

    /// Default comparison tolerance (overrides the config file)
    #[arg(long)]
    tolerance: Option<f64>,

    /// Seconds to wait for one browser command
    #[arg(long, default_value = "30")]
    command_timeout: u64,

    /// Output directory for results and diff images
    #[arg(short, long, default_value = "test-results")]
    output: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn parse_update_mode(value: &str) -> Result<RefUpdateMode, String> {
    match value {
        "none" => Ok(RefUpdateMode::None),
        "missing" => Ok(RefUpdateMode::Missing),
        "all" => Ok(RefUpdateMode::All),
        other => Err(format!("expected none, missing or all, got '{}'", other)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with_target(false)
        .init();

    let mut run = RunConfig::load(&args.config)?;
    run.browser_id = args.browser.as_str().to_string();
    if let Some(mode) = args.update_refs {
        run.update_refs = mode;
    }
    if let Some(tolerance) = args.tolerance {
        run.tolerance = tolerance;
    }

    let launcher = PlaywrightLauncher::new(PlaywrightConfig {
        base_url: args.base_url,
        browser: args.browser,
        headless: !args.headed,
        command_timeout: Duration::from_secs(args.command_timeout),
        ..Default::default()
    })
    .await?;

    let runner = TestRunner::new(
        RunnerConfig {
            run,
            specs_dir: args.specs,
            output_dir: args.output,
        },
        launcher,
    )?;

    let reporter = EventReporter::spawn(runner.events().subscribe());

    let results = match (&args.name, &args.tag) {
        (Some(name), _) => runner.run_test(name).await?,
        (None, Some(tag)) => runner.run_tagged(tag).await?,
        (None, None) => runner.run_all().await?,
    };
    runner.write_results(&results)?;

    // Closing the channel ends the reporter
    drop(runner);
    reporter.finish().await;

    if !results.success() {
        std::process::exit(1);
    }
    Ok(())
}
