use std::{io::Error as IoError, result::Result as StdResult};

use thiserror::Error;

/// The main error type for umbra-server operations (crate-internal)
#[derive(Error, Debug)]
pub enum Error {
    /// Error from the dimming engine
    #[error("Engine error: {0}")]
    Engine(#[from] umbra_engine::Error),

    /// Error in IPC communication
    #[error("IPC error: {0}")]
    Ipc(String),

    /// IO-related errors
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Convenience type alias for Results using our Error type
pub type Result<T> = StdResult<T, Error>;

impl From<rmp_serde::encode::Error> for Error {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Stable RPC error codes surfaced via MRPC `ServiceError.name`.
///
/// Use `to_string()` (Display) to produce the canonical code string.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorCode {
    #[error("ShuttingDown")]
    ShuttingDown,
    #[error("MissingParams")]
    MissingParams,
    #[error("InvalidType")]
    InvalidType,
    #[error("MethodNotFound")]
    MethodNotFound,
    #[error("UnknownDisplay")]
    UnknownDisplay,
    #[error("InvalidOpacity")]
    InvalidOpacity,
    #[error("SendFailed")]
    SendFailed,
}
