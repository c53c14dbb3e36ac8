use thiserror::Error;

pub type Result<T> = std::result::Result<T, JxError>;

#[derive(Debug, Error)]
pub enum JxError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("query error: {0}")]
    Query(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("cluster error: {0}")]
    Cluster(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
