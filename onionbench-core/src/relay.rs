// Relay descriptors as stored in the "Circuit Relays (Onion only)" column:
// `fingerprint:nickname:ip:country; fingerprint:nickname:ip:country; ...`

use crate::error::{CoreError, Result};
use std::fmt;
use tracing::debug;

pub const FIELD_DELIMITER: char = ':';
pub const LIST_DELIMITER: char = ';';
pub const LIST_SEPARATOR: &str = "; ";

/// Placeholder written for a missing address or country.
pub const UNKNOWN: &str = "Unknown";

/// Country attached to a relay.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Country {
    Known(String),
    Unresolved,
}

impl Country {
    /// Parse a stored country field. Empty text and any casing of
    /// `unknown` mean the country was never resolved.
    pub fn from_field(field: &str) -> Self {
        let field = field.trim();
        if field.is_empty() || field.eq_ignore_ascii_case(UNKNOWN) {
            Country::Unresolved
        } else {
            Country::Known(field.to_string())
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Country::Known(_))
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Country::Known(code) => Some(code),
            Country::Unresolved => None,
        }
    }
}

impl fmt::Display for Country {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Country::Known(code) => write!(f, "{}", code),
            Country::Unresolved => write!(f, "{}", UNKNOWN),
        }
    }
}

/// One hop of a Tor circuit.
///
/// Fields never contain `:` or `;`: the stored format has no escaping, so
/// [`RelayRecord::new`] refuses such values instead of writing a cell that
/// would decode differently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRecord {
    fingerprint: String,
    nickname: String,
    ip: Option<String>,
    country: Country,
}

impl RelayRecord {
    pub fn new(
        fingerprint: impl Into<String>,
        nickname: impl Into<String>,
        ip: Option<String>,
        country: Country,
    ) -> Result<Self> {
        let record = Self {
            fingerprint: fingerprint.into().trim().to_string(),
            nickname: nickname.into().trim().to_string(),
            ip: ip
                .map(|ip| ip.trim().to_string())
                .filter(|ip| !ip.is_empty() && !ip.eq_ignore_ascii_case(UNKNOWN)),
            country: match country {
                Country::Known(code) => Country::from_field(&code),
                Country::Unresolved => Country::Unresolved,
            },
        };

        if record.fingerprint.is_empty() {
            return Err(CoreError::EmptyFingerprint);
        }

        for field in [
            Some(record.fingerprint.as_str()),
            Some(record.nickname.as_str()),
            record.ip.as_deref(),
            record.country.code(),
        ]
        .into_iter()
        .flatten()
        {
            if field.contains([FIELD_DELIMITER, LIST_DELIMITER]) {
                return Err(CoreError::InvalidRelayField(field.to_string()));
            }
        }

        Ok(record)
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn ip(&self) -> Option<&str> {
        self.ip.as_deref()
    }

    pub fn country(&self) -> &Country {
        &self.country
    }

    /// Copy of this record carrying `country`.
    pub fn with_country(&self, country: Country) -> Result<Self> {
        Self::new(
            self.fingerprint.clone(),
            self.nickname.clone(),
            self.ip.clone(),
            country,
        )
    }
}

impl fmt::Display for RelayRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.fingerprint,
            self.nickname,
            self.ip.as_deref().unwrap_or(UNKNOWN),
            self.country
        )
    }
}

/// Decode one `fingerprint:nickname:ip:country` descriptor. Anything that
/// does not split into exactly four fields is rejected.
pub fn decode(text: &str) -> Option<RelayRecord> {
    let parts: Vec<&str> = text.trim().split(FIELD_DELIMITER).collect();
    let [fingerprint, nickname, ip, country] = parts.as_slice() else {
        return None;
    };

    RelayRecord::new(
        *fingerprint,
        *nickname,
        Some(ip.to_string()),
        Country::from_field(country),
    )
    .ok()
}

pub fn encode(record: &RelayRecord) -> String {
    record.to_string()
}

/// Decode a relay cell in hop order, dropping malformed descriptors.
pub fn decode_list(cell: &str) -> Vec<RelayRecord> {
    cell.split(LIST_DELIMITER)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter_map(|part| {
            let record = decode(part);
            if record.is_none() {
                debug!("Skipping malformed relay entry '{}'", part);
            }
            record
        })
        .collect()
}

pub fn encode_list(records: &[RelayRecord]) -> String {
    records
        .iter()
        .map(encode)
        .collect::<Vec<_>>()
        .join(LIST_SEPARATOR)
}
