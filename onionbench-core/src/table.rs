// CSV tables read and written by the batch jobs

use crate::error::{CoreError, Result};
use crate::relay::{self, RelayRecord};
use csv::StringRecord;
use onionbench_scanner::TimingResult;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

pub const COL_CLEAR_WEB_DOMAIN: &str = "Clear Web Domain";
pub const COL_ONION_ADDRESS: &str = "Onion Address";

pub const COL_CLEAR_DOMAIN: &str = "Clear Domain";
pub const COL_TYPE: &str = "Type";
pub const COL_URL: &str = "URL";
pub const COL_DNS: &str = "DNS Lookup (ms)";
pub const COL_TCP: &str = "TCP Connect (ms)";
pub const COL_TLS: &str = "TLS Handshake (ms)";
pub const COL_DOM: &str = "DOMContentLoaded (ms)";
pub const COL_PAGE_LOAD: &str = "Page Load (ms)";
pub const COL_TOTAL: &str = "Total Time (ms)";
pub const COL_RELAYS: &str = "Circuit Relays (Onion only)";

pub const TIMING_COLUMNS: [&str; 6] = [COL_DNS, COL_TCP, COL_TLS, COL_DOM, COL_PAGE_LOAD, COL_TOTAL];

pub fn comparison_header(include_relays: bool) -> Vec<&'static str> {
    let mut header = vec![COL_CLEAR_DOMAIN, COL_TYPE, COL_URL];
    header.extend(TIMING_COLUMNS);
    if include_relays {
        header.push(COL_RELAYS);
    }
    header
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variant {
    Onion,
    Clear,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Onion => "onion",
            Variant::Clear => "clear",
        }
    }
}

impl FromStr for Variant {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "onion" => Ok(Variant::Onion),
            "clear" => Ok(Variant::Clear),
            _ => Err(CoreError::UnknownVariant(s.to_string())),
        }
    }
}

/// One measurement observation, as one row of the comparison CSV.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonRow {
    pub domain: String,
    pub variant: Variant,
    pub url: String,
    pub timing: TimingResult,
    /// Hop list of the carrying circuit; only onion rows ever have one
    pub relays: Option<Vec<RelayRecord>>,
}

impl ComparisonRow {
    pub fn new(domain: &str, variant: Variant, url: &str, timing: TimingResult) -> Self {
        Self {
            domain: domain.to_string(),
            variant,
            url: url.to_string(),
            timing,
            relays: None,
        }
    }

    pub fn with_relays(mut self, relays: Vec<RelayRecord>) -> Self {
        self.relays = Some(relays);
        self
    }

    pub fn to_record(&self, include_relays: bool) -> Vec<String> {
        let t = &self.timing;
        let mut record = vec![
            self.domain.clone(),
            self.variant.as_str().to_string(),
            self.url.clone(),
        ];
        record.extend(
            [t.dns, t.tcp, t.tls, t.dom, t.page_load, t.total]
                .iter()
                .map(|v| v.map(|v| v.to_string()).unwrap_or_default()),
        );
        if include_relays {
            record.push(
                self.relays
                    .as_deref()
                    .map(relay::encode_list)
                    .unwrap_or_default(),
            );
        }
        record
    }
}

/// Column positions of a comparison CSV, looked up by name.
#[derive(Debug, Clone)]
pub struct ComparisonColumns {
    domain: usize,
    variant: usize,
    url: usize,
    timings: [usize; 6],
    relays: Option<usize>,
}

impl ComparisonColumns {
    pub fn from_header(header: &StringRecord) -> Result<Self> {
        let find = |name: &str| {
            header
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| CoreError::MissingColumn(name.to_string()))
        };

        let mut timings = [0; 6];
        for (slot, name) in timings.iter_mut().zip(TIMING_COLUMNS) {
            *slot = find(name)?;
        }

        Ok(Self {
            domain: find(COL_CLEAR_DOMAIN)?,
            variant: find(COL_TYPE)?,
            url: find(COL_URL)?,
            timings,
            relays: find(COL_RELAYS).ok(),
        })
    }

    /// Parse one data row; `None` when the type is unknown or a timing cell
    /// is not a number.
    pub fn parse(&self, record: &StringRecord) -> Option<ComparisonRow> {
        let field = |i: usize| record.get(i).map(str::trim);
        let metric = |i: usize| -> Option<Option<i64>> {
            match field(i)? {
                "" => Some(None),
                value => value.parse::<f64>().ok().map(|v| Some(v.round() as i64)),
            }
        };

        let t = &self.timings;
        Some(ComparisonRow {
            domain: field(self.domain)?.to_string(),
            variant: field(self.variant)?.parse().ok()?,
            url: field(self.url)?.to_string(),
            timing: TimingResult {
                dns: metric(t[0])?,
                tcp: metric(t[1])?,
                tls: metric(t[2])?,
                dom: metric(t[3])?,
                page_load: metric(t[4])?,
                total: metric(t[5])?,
            },
            relays: self
                .relays
                .and_then(field)
                .filter(|cell| !cell.is_empty())
                .map(relay::decode_list),
        })
    }
}

/// Read a comparison CSV, skipping rows that do not parse.
pub fn read_comparison_rows(path: &Path) -> Result<Vec<ComparisonRow>> {
    let mut reader = open_reader(path, true)?;
    let columns = ComparisonColumns::from_header(reader.headers()?)?;

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        match record {
            Ok(record) => match columns.parse(&record) {
                Some(row) => rows.push(row),
                None => warn!("Skipping malformed row {} in {}", line + 2, path.display()),
            },
            Err(e) => warn!("Skipping unreadable row {} in {}: {}", line + 2, path.display(), e),
        }
    }
    Ok(rows)
}

/// Appends comparison rows to a CSV file, flushing after every row so an
/// interrupted batch keeps everything already measured.
pub struct ComparisonWriter {
    writer: csv::Writer<File>,
    include_relays: bool,
    rows_written: usize,
}

impl ComparisonWriter {
    pub fn create(path: &Path, include_relays: bool) -> Result<Self> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(comparison_header(include_relays))?;
        writer.flush()?;

        Ok(Self {
            writer,
            include_relays,
            rows_written: 0,
        })
    }

    pub fn write_row(&mut self, row: &ComparisonRow) -> Result<()> {
        self.writer.write_record(row.to_record(self.include_relays))?;
        self.writer.flush()?;
        self.rows_written += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    pub fn include_relays(&self) -> bool {
        self.include_relays
    }
}

/// A clearnet domain and the onion address it advertises.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainPair {
    #[serde(rename = "Clear Web Domain")]
    pub clear_domain: String,
    #[serde(rename = "Onion Address")]
    pub onion_address: String,
}

impl DomainPair {
    pub fn onion_url(&self) -> String {
        clean_url(&self.onion_address)
    }

    pub fn clear_url(&self) -> String {
        format!("https://{}", self.clear_domain.trim())
    }
}

/// Trim and drop any `#fragment` and `?query`.
pub fn clean_url(url: &str) -> String {
    let url = url.trim();
    let url = url.split('#').next().unwrap_or(url);
    url.split('?').next().unwrap_or(url).to_string()
}

/// Load the `Clear Web Domain,Onion Address` table. Rows missing either
/// field are skipped.
pub fn load_domain_pairs(path: &Path) -> Result<Vec<DomainPair>> {
    let mut reader = open_reader(path, true)?;

    let headers = reader.headers()?.clone();
    for required in [COL_CLEAR_WEB_DOMAIN, COL_ONION_ADDRESS] {
        if !headers.iter().any(|h| h.trim() == required) {
            return Err(CoreError::MissingColumn(required.to_string()));
        }
    }

    let mut pairs = Vec::new();
    for (line, record) in reader.deserialize::<DomainPair>().enumerate() {
        match record {
            Ok(pair) if !pair.clear_domain.trim().is_empty() && !pair.onion_address.trim().is_empty() => {
                pairs.push(pair)
            }
            Ok(_) => warn!("Skipping row {} in {}: empty field", line + 2, path.display()),
            Err(e) => warn!("Skipping row {} in {}: {}", line + 2, path.display(), e),
        }
    }
    Ok(pairs)
}

/// Load a ranked domain list (`rank,domain`, no header). Single-column
/// rows are taken as bare domains.
pub fn load_ranked_domains(path: &Path) -> Result<Vec<String>> {
    let mut reader = open_reader(path, false)?;

    let mut domains = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!("Skipping row {} in {}: {}", line + 1, path.display(), e);
                continue;
            }
        };
        let domain = record
            .get(1)
            .or_else(|| record.get(0))
            .map(str::trim)
            .unwrap_or_default();
        if !domain.is_empty() {
            domains.push(domain.to_string());
        }
    }
    Ok(domains)
}

/// Open a CSV for reading. A missing or unreadable file is reported with
/// its path since it ends the whole job.
pub fn open_reader(path: &Path, has_headers: bool) -> Result<csv::Reader<File>> {
    let file = File::open(path).map_err(|source| CoreError::InputError {
        path: PathBuf::from(path),
        source,
    })?;

    Ok(csv::ReaderBuilder::new()
        .has_headers(has_headers)
        .flexible(true)
        .from_reader(file))
}
