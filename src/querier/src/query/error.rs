use datafusion::arrow::error::ArrowError;
use datafusion::error::DataFusionError;

#[derive(Debug, thiserror::Error)]
pub enum QuerierError {
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),
    #[error("Query failed: {0}")]
    QueryFailed(#[from] DataFusionError),
    #[error("Failed to register collection '{name}': {source}")]
    FailedToRegisterCollection {
        name: String,
        source: DataFusionError,
    },
    #[error("Failed to read data directory {path}: {source}")]
    DataDirectory {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to encode query result: {0}")]
    ResultEncoding(#[from] ArrowError),
    #[error("Failed to decode query result: {0}")]
    ResultDecoding(#[from] serde_json::Error),
}
