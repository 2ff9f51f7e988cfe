use onionbench_scanner::ScanError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    ScanError(#[from] ScanError),

    #[error("Failed to open {}: {source}", path.display())]
    InputError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Column '{0}' not found in input header")]
    MissingColumn(String),

    #[error("Relay field '{0}' contains a reserved delimiter (':' or ';')")]
    InvalidRelayField(String),

    #[error("Relay fingerprint is empty")]
    EmptyFingerprint,

    #[error("Unknown measurement type '{0}'")]
    UnknownVariant(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
