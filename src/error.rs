use thiserror::Error;

/// Errors surfaced by the client, the server, and the library primitives.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid config: {0}")]
    ConfigInvalid(String),
    #[error("{0}")]
    KeyOrNonceSize(&'static str),
    #[error("query too short")]
    QueryTooShort,
    #[error("query too long")]
    QueryTooLong,
    #[error("file identifier out of range: {0}")]
    FileIdOutOfRange(u64),
    #[error("bad diff format")]
    DiffMalformed,
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("integrity check failed")]
    CryptoIntegrity,
    #[error("invalid modular block: {0}")]
    ModularDomain(&'static str),
    #[error("missing server chain node")]
    ProtocolInvariant,
}
