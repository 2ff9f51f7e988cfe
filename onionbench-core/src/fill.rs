// Backfill relay countries in a comparison CSV

use crate::country::{self, CountryMap, CountryResolver};
use crate::error::{CoreError, Result};
use crate::relay::{self, RelayRecord};
use crate::table::{self, COL_RELAYS};
use csv::StringRecord;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Options for a country backfill
pub struct FillOptions {
    pub input: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FillSummary {
    pub rows: usize,
    pub known_addresses: usize,
    /// Relays that were unresolved in the input and have a country now
    pub filled: usize,
    pub still_unresolved: usize,
}

fn count_unresolved(relays: &[RelayRecord]) -> usize {
    relays.iter().filter(|r| !r.country().is_known()).count()
}

/// Rewrite the relay column of `input` into `output`, filling unresolved
/// countries from addresses whose country is known elsewhere in the file.
///
/// With `online` set, relays still unresolved after that are looked up
/// through the resolver. All other columns are copied untouched, and rows
/// without relays keep an empty cell.
pub async fn execute_fill<R: CountryResolver>(options: FillOptions, mut online: Option<&mut R>) -> Result<FillSummary> {
    let FillOptions { input, output } = options;

    let mut reader = table::open_reader(&input, true)?;
    let headers = reader.headers()?.clone();
    let relay_column = headers
        .iter()
        .position(|h| h.trim() == COL_RELAYS)
        .ok_or_else(|| CoreError::MissingColumn(COL_RELAYS.to_string()))?;

    let mut rows: Vec<(StringRecord, Vec<RelayRecord>)> = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!("Skipping unreadable row {} in {}: {}", line + 2, input.display(), e);
                continue;
            }
        };
        let relays = relay::decode_list(record.get(relay_column).unwrap_or_default());
        rows.push((record, relays));
    }

    let map = CountryMap::build(rows.iter().flat_map(|(_, relays)| relays.iter()));
    info!("Known IP -> country mappings: {}", map.len());

    let mut summary = FillSummary {
        rows: rows.len(),
        known_addresses: map.len(),
        ..Default::default()
    };

    let mut writer = csv::Writer::from_path(&output)?;
    writer.write_record(&headers)?;

    for (record, relays) in &rows {
        let before = count_unresolved(relays);
        let mut filled = map.fill(relays);
        if let Some(resolver) = online.as_deref_mut()
            && count_unresolved(&filled) > 0
        {
            filled = country::resolve_unresolved(resolver, &filled).await;
        }
        let after = count_unresolved(&filled);
        summary.filled += before.saturating_sub(after);
        summary.still_unresolved += after;

        let cell = relay::encode_list(&filled);
        debug!("Relay cell rewritten: {}", cell);
        let updated: StringRecord = record
            .iter()
            .enumerate()
            .map(|(i, field)| if i == relay_column { cell.as_str() } else { field })
            .collect();
        writer.write_record(&updated)?;
    }
    writer.flush()?;

    info!(
        "Relay countries filled: {} ({} still unknown) -> {}",
        summary.filled,
        summary.still_unresolved,
        output.display()
    );
    Ok(summary)
}
