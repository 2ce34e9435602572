use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("not found")]
    NotFound,

    #[error("expired")]
    Expired,

    #[error("document has no fields")]
    EmptyDocument,

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("invalid expiration: {0}")]
    InvalidExpiration(String),

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("table catalog is full ({limit} application tables)")]
    CatalogFull { limit: usize },

    #[error("cannot decode column '{column}': {kind}")]
    Decode { column: String, kind: String },

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),
}

pub type Result<T> = std::result::Result<T, Error>;
