use anyhow::{Context, Result, anyhow};
use clap::ArgMatches;
use colored::Colorize;
use onionbench_core::batch::{BatchOptions, BatchSummary, execute_batch};
use onionbench_core::config::{DEFAULT_GEO_INTERVAL, DEFAULT_GEO_TIMEOUT, DEFAULT_RELAY_SETTLE, DEFAULT_SETTLE};
use onionbench_core::fill::{FillOptions, execute_fill};
use onionbench_core::probe::{ProbeOptions, execute_probe};
use onionbench_core::table::{self, ComparisonWriter, DomainPair};
use onionbench_core::summary;
use onionbench_scanner::harness;
use onionbench_scanner::{FirefoxFactory, GeoFormat, GeoLocator, OnionProbe, ProxyMode, SessionFactory, TorController};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use url::Url;

// Helper functions shared by the handlers

/// Expand `~` in a user supplied path
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

fn path_arg(args: &ArgMatches, name: &str) -> Result<PathBuf> {
    args.get_one::<String>(name)
        .map(|p| expand_path(p))
        .ok_or_else(|| anyhow!("--{} is required", name))
}

fn secs_arg(args: &ArgMatches, name: &str) -> Option<Duration> {
    args.get_one::<u64>(name).map(|s| Duration::from_secs(*s))
}

/// Console and file log levels for the global flags
pub fn log_levels(quiet: bool, verbose: bool) -> (LevelFilter, LevelFilter) {
    let file = if verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let console = if quiet { LevelFilter::WARN } else { file };
    (console, file)
}

/// Install the global subscriber: coloured console output on stderr plus a
/// plain append-only log file.
pub fn init_logging(quiet: bool, verbose: bool, log_file: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("Failed to open log file {}", log_file.display()))?;
    let (console_level, file_level) = log_levels(quiet, verbose);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(console_level),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_filter(file_level),
        )
        .try_init()
        .context("Failed to initialise logging")?;
    Ok(())
}

pub fn print_banner() {
    println!(
        "{} {}",
        "onionbench".bright_magenta().bold(),
        env!("CARGO_PKG_VERSION").bright_black()
    );
    println!("{}", "onion services vs the clearnet, one page load at a time".bright_black());
    println!();
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn geo_locator(args: &ArgMatches) -> Result<GeoLocator> {
    let base = args
        .get_one::<Url>("geo-url")
        .map(Url::as_str)
        .unwrap_or(onionbench_core::config::DEFAULT_GEO_URL);
    let format = args
        .get_one::<String>("geo-format")
        .map(|f| f.parse::<GeoFormat>())
        .transpose()?
        .unwrap_or_default();

    Ok(GeoLocator::with_endpoint(base, format)?
        .with_interval(DEFAULT_GEO_INTERVAL)
        .with_timeout(DEFAULT_GEO_TIMEOUT)?)
}

fn firefox_factory(args: &ArgMatches) -> FirefoxFactory {
    let webdriver = args
        .get_one::<Url>("webdriver")
        .map(Url::as_str)
        .unwrap_or(onionbench_core::config::DEFAULT_WEBDRIVER_URL);
    let headless = !args.try_get_one::<bool>("headed").ok().flatten().copied().unwrap_or(false);

    let mut factory = FirefoxFactory::new(webdriver).with_headless(headless);
    if let Some(timeout) = secs_arg(args, "command-timeout") {
        factory = factory.with_command_timeout(timeout);
    }
    factory
}

/// Resolve the `measure` arguments into batch options
pub fn batch_options_from_args(args: &ArgMatches, pairs: Vec<DomainPair>) -> BatchOptions {
    let mut options = BatchOptions::new(pairs);
    options.annotate_relays = args.get_flag("relays");
    options.settle = secs_arg(args, "settle").unwrap_or(if options.annotate_relays {
        DEFAULT_RELAY_SETTLE
    } else {
        DEFAULT_SETTLE
    });
    if let Some(runs) = args.get_one::<usize>("runs") {
        options.runs = *runs;
    }
    if let Some(delay) = secs_arg(args, "delay") {
        options.run_delay = delay;
    }
    if let Some(port) = args.get_one::<u16>("socks-port") {
        options.socks_port = *port;
    }
    if let Some(retries) = args.get_one::<usize>("retries") {
        options.correlation_retries = *retries;
    }
    options.show_progress_bars = !args.get_flag("quiet");
    options
}

/// Connect and authenticate to the control port. Failures are logged and
/// the batch continues without relay annotation.
async fn connect_controller(port: u16, password: Option<&str>) -> Option<TorController> {
    let mut controller = match TorController::connect_port(port).await {
        Ok(controller) => controller,
        Err(e) => {
            warn!("Could not connect to Tor control port {}: {}", port, e);
            return None;
        }
    };

    match controller.authenticate(password).await {
        Ok(()) => {
            info!("Connected to Tor control port {}", port);
            Some(controller)
        }
        Err(e) => {
            warn!("Tor control port authentication failed: {}", e);
            None
        }
    }
}

fn print_batch_summary(summary: &BatchSummary, output: &Path) {
    println!();
    print_divider();
    println!("{}", "  MEASUREMENT COMPLETE".bright_white().bold());
    print_divider();
    println!(
        "{} Rows written: {}",
        "✓".green().bold(),
        summary.rows_written.to_string().bright_white()
    );
    if summary.failed_measurements > 0 {
        println!(
            "{} Failed measurements: {}",
            "⚠".yellow().bold(),
            summary.failed_measurements.to_string().yellow()
        );
    }
    println!("{} Circuits annotated: {}", "→".blue(), summary.annotated_circuits);
    println!(
        "{} Started {}, finished {}",
        "→".blue(),
        summary.started_at.format("%Y-%m-%d %H:%M:%S"),
        summary.finished_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!("{} Results: {}", "→".blue(), output.display().to_string().bright_white());
}

pub async fn handle_probe(args: &ArgMatches) -> Result<()> {
    let input = path_arg(args, "input")?;
    let output = path_arg(args, "output")?;
    let timeout = secs_arg(args, "timeout").unwrap_or(onionbench_core::config::DEFAULT_PROBE_TIMEOUT);

    let domains = table::load_ranked_domains(&input)?;
    println!(
        "{} Probing {} domains for Onion-Location headers",
        "→".blue(),
        domains.len().to_string().bright_white()
    );

    let probe = OnionProbe::with_timeout(timeout)?;
    let options = ProbeOptions {
        domains,
        show_progress_bars: !args.get_flag("quiet"),
    };
    let summary = execute_probe(options, &probe, &output)
        .await
        .with_context(|| format!("Probe failed writing {}", output.display()))?;

    println!(
        "{} {} onion addresses found among {} domains ({} errors)",
        "✓".green().bold(),
        summary.found.to_string().bright_white(),
        summary.checked,
        summary.errors
    );
    println!("{} Results: {}", "→".blue(), output.display().to_string().bright_white());
    Ok(())
}

pub async fn handle_measure(args: &ArgMatches) -> Result<()> {
    let input = path_arg(args, "input")?;
    let output = path_arg(args, "output")?;

    let pairs = table::load_domain_pairs(&input)?;
    if pairs.is_empty() {
        warn!("No domain pairs found in {}", input.display());
    }
    let options = batch_options_from_args(args, pairs);
    let annotate = options.annotate_relays;

    println!(
        "{} {} domains, {} runs, {}s between runs",
        "→".blue(),
        options.pairs.len().to_string().bright_white(),
        options.runs,
        options.run_delay.as_secs()
    );
    println!(
        "{} Relay annotation: {}",
        "→".blue(),
        if annotate { "enabled".green() } else { "disabled".bright_black() }
    );

    let factory = firefox_factory(args);
    let mut writer = ComparisonWriter::create(&output, annotate)
        .with_context(|| format!("Failed to create {}", output.display()))?;

    let mut controller = if annotate {
        let port = args
            .get_one::<u16>("control-port")
            .copied()
            .unwrap_or(onionbench_core::config::DEFAULT_CONTROL_PORT);
        let password = args.get_one::<String>("control-password").map(String::as_str);
        connect_controller(port, password).await
    } else {
        None
    };
    let mut locator = geo_locator(args)?;

    let result = execute_batch(options, &factory, controller.as_mut(), &mut locator, &mut writer).await;

    if let Some(controller) = controller
        && let Err(e) = controller.close().await
    {
        warn!("Failed to close Tor control connection: {}", e);
    }

    let summary = result.with_context(|| format!("Measurement failed writing {}", output.display()))?;
    print_batch_summary(&summary, &output);
    Ok(())
}

pub async fn handle_fill(args: &ArgMatches) -> Result<()> {
    let options = FillOptions {
        input: path_arg(args, "input")?,
        output: path_arg(args, "output")?,
    };
    let output = options.output.clone();

    let mut locator = if args.get_flag("online") {
        Some(geo_locator(args)?)
    } else {
        None
    };

    let summary = execute_fill(options, locator.as_mut()).await?;

    println!(
        "{} Relay countries filled: {} ({} still unknown, {} known addresses)",
        "✓".green().bold(),
        summary.filled.to_string().bright_white(),
        summary.still_unresolved,
        summary.known_addresses
    );
    if let Some(locator) = &locator {
        println!("{} Geolocation requests: {}", "→".blue(), locator.requests_sent());
    }
    println!("{} Saved to: {}", "→".blue(), output.display().to_string().bright_white());
    Ok(())
}

pub fn handle_summarize(args: &ArgMatches) -> Result<()> {
    let input = path_arg(args, "input")?;
    let output = path_arg(args, "output")?;

    let groups = summary::execute_summary(&input, &output)?;
    println!(
        "{} {} averages written to {}",
        "✓".green().bold(),
        groups.to_string().bright_white(),
        output.display()
    );
    Ok(())
}

async fn time_load<F: SessionFactory>(factory: &F, mode: ProxyMode, url: &str) -> Option<Duration> {
    match factory.open(mode).await {
        Ok(session) => harness::measure_load_time(session, url).await,
        Err(e) => {
            warn!("Failed to start {} browser session: {}", mode.label(), e);
            None
        }
    }
}

fn print_load_time(label: &str, url: &str, elapsed: Option<Duration>) {
    match elapsed {
        Some(elapsed) => println!(
            "{} {} {}: {} seconds",
            "✓".green().bold(),
            label,
            url,
            format!("{:.2}", elapsed.as_secs_f64()).bright_white()
        ),
        None => println!("{} {} {}: failed", "✗".red().bold(), label, url),
    }
}

pub async fn handle_check(args: &ArgMatches) -> Result<()> {
    let onion_url = args
        .get_one::<Url>("onion-url")
        .ok_or_else(|| anyhow!("--onion-url is required"))?;
    let clear_url = args
        .get_one::<Url>("clear-url")
        .ok_or_else(|| anyhow!("--clear-url is required"))?;
    let socks_port = args
        .get_one::<u16>("socks-port")
        .copied()
        .unwrap_or(onionbench_core::config::DEFAULT_SOCKS_PORT);
    let factory = firefox_factory(args);

    info!("Testing Tor connection to {}", onion_url);
    let onion = time_load(&factory, ProxyMode::Tor { socks_port }, onion_url.as_str()).await;
    print_load_time("Tor", onion_url.as_str(), onion);

    info!("Testing clearnet connection to {}", clear_url);
    let clear = time_load(&factory, ProxyMode::Direct, clear_url.as_str()).await;
    print_load_time("Clearnet", clear_url.as_str(), clear);

    if onion.is_none() && clear.is_none() {
        return Err(anyhow!("Both page loads failed"));
    }
    Ok(())
}
