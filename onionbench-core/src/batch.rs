// Onion vs clearnet measurement batch

use crate::config::{DEFAULT_RELAY_SETTLE, DEFAULT_RUN_DELAY, DEFAULT_RUNS, DEFAULT_SOCKS_PORT};
use crate::correlate::{self, CircuitSource, DEFAULT_RETRIES, DEFAULT_RETRY_DELAY};
use crate::country::CountryResolver;
use crate::error::Result;
use crate::relay::{self, RelayRecord};
use crate::table::{ComparisonRow, ComparisonWriter, DomainPair, Variant};
use chrono::{DateTime, Local};
use indicatif::{ProgressBar, ProgressStyle};
use onionbench_scanner::harness;
use onionbench_scanner::{ProxyMode, SessionFactory, TimingResult};
use std::time::Duration;
use tracing::{info, warn};

/// Options for configuring a measurement batch
pub struct BatchOptions {
    pub pairs: Vec<DomainPair>,
    pub runs: usize,
    pub run_delay: Duration,
    pub settle: Duration,
    /// Correlate onion loads with their circuit and record the relays
    pub annotate_relays: bool,
    pub socks_port: u16,
    pub correlation_retries: usize,
    pub correlation_delay: Duration,
    pub show_progress_bars: bool,
}

impl BatchOptions {
    pub fn new(pairs: Vec<DomainPair>) -> Self {
        Self {
            pairs,
            runs: DEFAULT_RUNS,
            run_delay: DEFAULT_RUN_DELAY,
            settle: DEFAULT_RELAY_SETTLE,
            annotate_relays: true,
            socks_port: DEFAULT_SOCKS_PORT,
            correlation_retries: DEFAULT_RETRIES,
            correlation_delay: DEFAULT_RETRY_DELAY,
            show_progress_bars: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub rows_written: usize,
    pub failed_measurements: usize,
    pub annotated_circuits: usize,
}

/// Run every pair through the onion and the clearnet variant, `runs` times.
///
/// Each successful measurement is written (and flushed) as soon as it is
/// taken. A failed measurement writes nothing. Without a control connection
/// the relay cell of onion rows stays empty. Only output errors abort.
pub async fn execute_batch<F, C, R>(
    options: BatchOptions,
    factory: &F,
    mut control: Option<&mut C>,
    resolver: &mut R,
    writer: &mut ComparisonWriter,
) -> Result<BatchSummary>
where
    F: SessionFactory,
    C: CircuitSource,
    R: CountryResolver,
{
    let BatchOptions {
        pairs,
        runs,
        run_delay,
        settle,
        annotate_relays,
        socks_port,
        correlation_retries,
        correlation_delay,
        show_progress_bars,
    } = options;

    let started_at = Local::now();
    let mut failed_measurements = 0;
    let mut annotated_circuits = 0;

    if annotate_relays && control.is_none() {
        warn!("Tor controller not available, relay info will not be logged");
    }

    let progress_bar = if show_progress_bars {
        let pb = ProgressBar::new((runs * pairs.len() * 2) as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("=>-"),
        );
        Some(pb)
    } else {
        None
    };

    for run in 1..=runs {
        info!("Starting measurement run {} of {}", run, runs);

        for pair in &pairs {
            let onion_url = pair.onion_url();
            let clear_url = pair.clear_url();

            if let Some(ref pb) = progress_bar {
                pb.set_message(format!("run {}/{}: {} (onion)", run, runs, pair.clear_domain));
            }
            info!("Measuring ONION for {}", pair.clear_domain);
            let session = match factory.open(ProxyMode::Tor { socks_port }).await {
                Ok(session) => Some(session),
                Err(e) => {
                    warn!("Failed to start tor browser session for {}: {}", onion_url, e);
                    None
                }
            };
            match session {
                Some(mut session) => {
                    // Tor only lists streams the browser still holds open
                    let measured = harness::measure_open(&mut session, &onion_url, settle).await;
                    let row = match measured {
                        Some(timing) => {
                            let mut row = ComparisonRow::new(&pair.clear_domain, Variant::Onion, &onion_url, timing);
                            if annotate_relays && let Some(control) = control.as_deref_mut() {
                                let relays = onion_relays(
                                    control,
                                    resolver,
                                    &onion_url,
                                    correlation_retries,
                                    correlation_delay,
                                )
                                .await;
                                if !relays.is_empty() {
                                    annotated_circuits += 1;
                                }
                                row = row.with_relays(relays);
                            } else if annotate_relays {
                                row = row.with_relays(Vec::new());
                            }
                            Some(row)
                        }
                        None => None,
                    };
                    harness::close_session(session, &onion_url).await;

                    match row {
                        Some(row) => writer.write_row(&row)?,
                        None => failed_measurements += 1,
                    }
                }
                None => failed_measurements += 1,
            }
            if let Some(ref pb) = progress_bar {
                pb.inc(1);
                pb.set_message(format!("run {}/{}: {} (clear)", run, runs, pair.clear_domain));
            }

            info!("Measuring CLEAR WEB for {}", pair.clear_domain);
            match measure_variant(factory, ProxyMode::Direct, &clear_url, settle).await {
                Some(timing) => {
                    let row = ComparisonRow::new(&pair.clear_domain, Variant::Clear, &clear_url, timing);
                    writer.write_row(&row)?;
                }
                None => failed_measurements += 1,
            }
            if let Some(ref pb) = progress_bar {
                pb.inc(1);
            }
        }

        if run < runs {
            info!("Waiting {}s before next run", run_delay.as_secs());
            tokio::time::sleep(run_delay).await;
        }
    }

    if let Some(ref pb) = progress_bar {
        pb.finish_with_message(format!("{} rows written", writer.rows_written()));
    }
    info!("All runs completed");

    Ok(BatchSummary {
        started_at,
        finished_at: Local::now(),
        rows_written: writer.rows_written(),
        failed_measurements,
        annotated_circuits,
    })
}

/// Find the circuit that carried `url` and expand it into relay records.
/// Returns an empty list when no circuit can be matched.
async fn onion_relays<C: CircuitSource, R: CountryResolver>(
    control: &mut C,
    resolver: &mut R,
    url: &str,
    retries: usize,
    retry_delay: Duration,
) -> Vec<RelayRecord> {
    match correlate::find_circuit_for_url(control, url, retries, retry_delay).await {
        Some(circuit_id) => {
            let relays = correlate::circuit_relays(control, resolver, &circuit_id).await;
            info!("Circuit used for {}: {}", url, relay::encode_list(&relays));
            relays
        }
        None => {
            warn!("Could not find circuit ID for {}", url);
            Vec::new()
        }
    }
}

/// Open a session for `mode` and measure `url` with it. Session start-up
/// failures count as a failed measurement.
async fn measure_variant<F: SessionFactory>(
    factory: &F,
    mode: ProxyMode,
    url: &str,
    settle: Duration,
) -> Option<TimingResult> {
    match factory.open(mode).await {
        Ok(session) => harness::measure(session, url, settle).await,
        Err(e) => {
            warn!("Failed to start {} browser session for {}: {}", mode.label(), url, e);
            None
        }
    }
}
