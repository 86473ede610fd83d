use std::process::ExitCode;

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use clap::Parser;
use pagewatch::diff::{DEFAULT_CONTEXT, DEFAULT_MAX_LINES};
use pagewatch::{
    Cli, Delivery, FsStateStore, HttpFetcher, ResendNotifier, RunOutcome, WatchConfig, WatchError,
    Watcher,
};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ERROR: {err}");
            let code = err
                .downcast_ref::<WatchError>()
                .map(WatchError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("pagewatch=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pagewatch=warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let config = WatchConfig::from_cli(cli).map_err(WatchError::from)?;
    let fetcher =
        HttpFetcher::new(config.timeout, config.user_agent.as_deref()).map_err(WatchError::from)?;
    let notifier = ResendNotifier::new(
        &config.notify.api_key,
        config.notify.endpoint.clone(),
        config.timeout,
    )
    .map_err(WatchError::NotifierSetup)?;
    let store = FsStateStore::new(&config.state_dir).with_url(config.target.url().clone());

    let watcher = Watcher::new(config, fetcher, store, notifier);
    let outcome = watcher.run()?;
    report(watcher.config(), &outcome);
    Ok(())
}

fn report(config: &WatchConfig, outcome: &RunOutcome) {
    let url = config.target.url();
    match outcome {
        RunOutcome::Unchanged { .. } => {}
        RunOutcome::Seeded {
            persisted: true, ..
        } => {
            let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
            println!("[{ts}] Initialized state for {url}");
        }
        RunOutcome::Seeded {
            persisted: false, ..
        } => {
            println!("dry run enabled; no stored state for {url}, baseline not written");
        }
        RunOutcome::Changed {
            diff,
            stats,
            delivery,
            persisted,
        } => {
            println!(
                "Change detected on {url}: {} added, {} removed",
                stats.added, stats.removed
            );
            match delivery {
                Delivery::Sent(response) => println!("Sent alert: {response}"),
                Delivery::Failed(err) => {
                    eprintln!("WARNING: failed to send alert: {err}");
                    if !persisted {
                        eprintln!("previous snapshot kept; the change will be reported again");
                    }
                }
                Delivery::Skipped => {
                    println!("dry run enabled; skipping alert and state write");
                    println!("{}", diff.unified(DEFAULT_CONTEXT, DEFAULT_MAX_LINES));
                }
            }
        }
    }
}
