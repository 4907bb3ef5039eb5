use thiserror::Error;

/// Fatal conditions. Any of these aborts the run and no report is produced.
#[derive(Error, Debug)]
pub enum PnlError {
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("No transactions found for token {token} and wallet {wallet}")]
    NoTransfers { token: String, wallet: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PnlError {
    pub fn kind(&self) -> &'static str {
        match self {
            PnlError::DataUnavailable(_) => "data_unavailable",
            PnlError::NoTransfers { .. } => "no_transfers",
            PnlError::Config(_) => "config",
            PnlError::Io(_) | PnlError::Csv(_) | PnlError::Json(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, PnlError>;

/// A single record that could not be normalized. Dropped and counted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("record {id}: missing field `{field}`")]
    MissingField { id: String, field: &'static str },

    #[error("record {id}: invalid {field} `{value}`")]
    InvalidNumber {
        id: String,
        field: &'static str,
        value: String,
    },

    #[error("record {id}: invalid decimal count `{value}`")]
    InvalidDecimals { id: String, value: String },

    #[error("record {id}: invalid {field} address `{value}`")]
    InvalidAddress {
        id: String,
        field: &'static str,
        value: String,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid address `{0}`: expected 0x followed by 40 hex digits")]
pub struct AddressError(pub String);
