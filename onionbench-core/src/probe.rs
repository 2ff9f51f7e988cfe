use crate::error::Result;
use crate::table::{COL_CLEAR_WEB_DOMAIN, COL_ONION_ADDRESS};
use indicatif::{ProgressBar, ProgressStyle};
use onionbench_scanner::OnionProbe;
use std::path::Path;
use tracing::{info, warn};

/// Options for an Onion-Location probe batch
pub struct ProbeOptions {
    pub domains: Vec<String>,
    pub show_progress_bars: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeSummary {
    pub checked: usize,
    pub found: usize,
    pub errors: usize,
}

/// Probe every domain for an `Onion-Location` header and write the hits to
/// `output` as `Clear Web Domain,Onion Address` rows.
///
/// Rows are flushed as they are found. Per-domain failures are logged and
/// skipped; only output errors abort the batch.
pub async fn execute_probe(options: ProbeOptions, probe: &OnionProbe, output: &Path) -> Result<ProbeSummary> {
    let ProbeOptions {
        domains,
        show_progress_bars,
    } = options;

    let mut writer = csv::Writer::from_path(output)?;
    writer.write_record([COL_CLEAR_WEB_DOMAIN, COL_ONION_ADDRESS])?;
    writer.flush()?;

    let progress_bar = if show_progress_bars {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap(),
        );
        pb.set_message("Starting probe...");
        Some(pb)
    } else {
        None
    };

    let mut summary = ProbeSummary::default();
    for domain in &domains {
        summary.checked += 1;
        if let Some(ref pb) = progress_bar {
            pb.set_message(format!(
                "[{}/{}] {} ({} found)",
                summary.checked,
                domains.len(),
                domain,
                summary.found
            ));
            pb.tick();
        }

        match probe.check_domain(domain).await {
            Ok(Some(onion)) => {
                info!("{} -> {}", domain, onion);
                writer.write_record([domain.as_str(), onion.as_str()])?;
                writer.flush()?;
                summary.found += 1;
            }
            Ok(None) => info!("{} has no Onion-Location header", domain),
            Err(e) => {
                warn!("Error checking {}: {}", domain, e);
                summary.errors += 1;
            }
        }
    }

    if let Some(ref pb) = progress_bar {
        pb.finish_with_message(format!(
            "Checked {} domains, {} onion addresses found",
            summary.checked, summary.found
        ));
    }
    info!(
        "Probe finished: {} checked, {} found, {} errors",
        summary.checked, summary.found, summary.errors
    );

    Ok(summary)
}
