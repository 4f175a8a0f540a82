use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("schema violation at line {line}, column '{column}': {message}")]
    SchemaViolation {
        line: u64,
        column: String,
        message: String,
    },

    #[error("unparsable date '{value}' (expected YYYY-MM-DD)")]
    DateParse { value: String },

    #[error("unknown currency code '{code}': not present in the rate table")]
    UnknownCurrency { code: String },

    #[error("division by zero quantity on transaction {transaction_id}")]
    DivisionByZero { transaction_id: i32 },

    #[error("failed to write table '{table}' (already written: {completed:?}): {source}")]
    WriteFailure {
        table: String,
        completed: Vec<String>,
        #[source]
        source: Box<EtlError>,
    },

    #[error("table log error for '{table}': {message}")]
    TableLog { table: String, message: String },

    #[error("blob store error for '{path}': {message}")]
    Blob { path: String, message: String },

    #[error("run cancelled before stage '{stage}'")]
    Cancelled { stage: &'static str },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, EtlError>;
