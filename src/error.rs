use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("unknown algorithm: {name}")]
    UnknownAlgorithm { name: String },
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("column '{column}' not found in header of {file}")]
    MissingColumn { column: String, file: String },
    #[error("non-numeric value {value:?} in key column '{column}'")]
    NonNumericKey { column: String, value: String },
    #[error("file {file} has no header row")]
    EmptyFile { file: String },
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LinkError>;
