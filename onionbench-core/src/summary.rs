// Per-domain averages over a comparison CSV

use crate::error::Result;
use crate::table::{self, ComparisonRow, Variant};
use onionbench_scanner::TimingResult;
use std::path::Path;
use tracing::info;

/// Mean of each timing metric for one (domain, variant) group.
#[derive(Debug, Clone, PartialEq)]
pub struct AverageRow {
    pub domain: String,
    pub variant: Variant,
    pub url: String,
    pub samples: usize,
    /// Same order as the timing columns; `None` when no sample had the metric
    pub metrics: [Option<f64>; 6],
}

impl AverageRow {
    pub fn to_record(&self) -> Vec<String> {
        let mut record = vec![
            self.domain.clone(),
            self.variant.as_str().to_string(),
            self.url.clone(),
        ];
        record.extend(
            self.metrics
                .iter()
                .map(|m| m.map(|v| v.to_string()).unwrap_or_default()),
        );
        record
    }
}

fn metrics_of(timing: &TimingResult) -> [Option<i64>; 6] {
    [
        timing.dns,
        timing.tcp,
        timing.tls,
        timing.dom,
        timing.page_load,
        timing.total,
    ]
}

/// Round half away from zero to two decimals.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Group rows by (domain, variant), keeping first-seen order, and average
/// every metric over the samples that have it.
pub fn average_rows(rows: &[ComparisonRow]) -> Vec<AverageRow> {
    let mut groups: Vec<(&str, Variant, &str, Vec<&TimingResult>)> = Vec::new();
    for row in rows {
        match groups
            .iter_mut()
            .find(|(domain, variant, _, _)| *domain == row.domain && *variant == row.variant)
        {
            Some((_, _, _, timings)) => timings.push(&row.timing),
            None => groups.push((row.domain.as_str(), row.variant, row.url.as_str(), vec![&row.timing])),
        }
    }

    groups
        .into_iter()
        .map(|(domain, variant, url, timings)| {
            let mut metrics = [None; 6];
            for (i, slot) in metrics.iter_mut().enumerate() {
                let values: Vec<i64> = timings.iter().filter_map(|t| metrics_of(t)[i]).collect();
                if !values.is_empty() {
                    let sum: i64 = values.iter().sum();
                    *slot = Some(round2(sum as f64 / values.len() as f64));
                }
            }
            AverageRow {
                domain: domain.to_string(),
                variant,
                url: url.to_string(),
                samples: timings.len(),
                metrics,
            }
        })
        .collect()
}

/// Read a comparison CSV and write its averages with the plain 9-column
/// header. Returns the number of groups written.
pub fn execute_summary(input: &Path, output: &Path) -> Result<usize> {
    let rows = table::read_comparison_rows(input)?;
    let averages = average_rows(&rows);

    let mut writer = csv::Writer::from_path(output)?;
    writer.write_record(table::comparison_header(false))?;
    for average in &averages {
        writer.write_record(average.to_record())?;
    }
    writer.flush()?;

    info!(
        "Averaged {} rows into {} groups -> {}",
        rows.len(),
        averages.len(),
        output.display()
    );
    Ok(averages.len())
}
