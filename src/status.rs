//! # Status Codes and Error Types
//!
//! This module defines the closed set of result codes surfaced at the public
//! boundary, plus the typed error enum used to carry them through the crate.
//!
//! ## Two-Layer Error Model
//!
//! The engine core (pool, tree) reports failures through `eyre::Result` with
//! rich context strings, the same way the storage layer reports a bad page or
//! a failed mmap. Where the *code* of a failure matters to callers — pool
//! exhaustion, transaction-scope misuse — the root of the chain is a typed
//! [`KvError`], so the boundary can recover the code by walking the chain.
//!
//! Everything else collapses to [`Status::UnknownError`] at the boundary,
//! keeping the public surface a closed set:
//!
//! ```text
//! pool/tree (eyre::Report, KvError roots)
//!     │  status_from_report()
//!     ▼
//! engine trait (KvResult<T> = Result<T, KvError>)
//!     │  Db boundary
//!     ▼
//! Status code + thread-local errormsg
//! ```
//!
//! ## Code Stability
//!
//! The numeric values of [`Status`] are part of the external interface and
//! must not be reordered.

use thiserror::Error;

/// Uniform result codes for every public operation.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok = 0,
    UnknownError = 1,
    NotFound = 2,
    NotSupported = 3,
    InvalidArgument = 4,
    ConfigParsingError = 5,
    ConfigTypeError = 6,
    StoppedByCb = 7,
    OutOfMemory = 8,
    WrongEngineName = 9,
    TransactionScopeError = 10,
    DefragError = 11,
}

impl Status {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Ok => "OK",
            Status::UnknownError => "UNKNOWN_ERROR",
            Status::NotFound => "NOT_FOUND",
            Status::NotSupported => "NOT_SUPPORTED",
            Status::InvalidArgument => "INVALID_ARGUMENT",
            Status::ConfigParsingError => "CONFIG_PARSING_ERROR",
            Status::ConfigTypeError => "CONFIG_TYPE_ERROR",
            Status::StoppedByCb => "STOPPED_BY_CB",
            Status::OutOfMemory => "OUT_OF_MEMORY",
            Status::WrongEngineName => "WRONG_ENGINE_NAME",
            Status::TransactionScopeError => "TRANSACTION_SCOPE_ERROR",
            Status::DefragError => "DEFRAG_ERROR",
        };
        f.write_str(name)
    }
}

/// Typed failure carrying one of the non-OK [`Status`] codes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KvError {
    #[error("unknown error: {0}")]
    Unknown(String),

    #[error("key not found")]
    NotFound,

    #[error("operation not supported by this engine")]
    NotSupported,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("config parsing error: {0}")]
    ConfigParsing(String),

    #[error("config type error: {0}")]
    ConfigType(String),

    #[error("iteration stopped by callback")]
    StoppedByCallback,

    #[error("persistent pool out of memory")]
    OutOfMemory,

    #[error("unknown engine name \"{0}\"")]
    WrongEngineName(String),

    #[error("transaction scope error: {0}")]
    TransactionScope(String),

    #[error("defrag error: {0}")]
    Defrag(String),
}

/// Result type used across the public operation surface.
pub type KvResult<T> = Result<T, KvError>;

impl KvError {
    pub fn status(&self) -> Status {
        match self {
            KvError::Unknown(_) => Status::UnknownError,
            KvError::NotFound => Status::NotFound,
            KvError::NotSupported => Status::NotSupported,
            KvError::InvalidArgument(_) => Status::InvalidArgument,
            KvError::ConfigParsing(_) => Status::ConfigParsingError,
            KvError::ConfigType(_) => Status::ConfigTypeError,
            KvError::StoppedByCallback => Status::StoppedByCb,
            KvError::OutOfMemory => Status::OutOfMemory,
            KvError::WrongEngineName(_) => Status::WrongEngineName,
            KvError::TransactionScope(_) => Status::TransactionScopeError,
            KvError::Defrag(_) => Status::DefragError,
        }
    }
}

/// Collapses an internal error chain to the typed code at its root, or
/// `Unknown` when no typed root is present.
pub(crate) fn error_from_report(report: eyre::Report) -> KvError {
    if let Some(kv) = report.chain().find_map(|cause| cause.downcast_ref::<KvError>()) {
        return kv.clone();
    }
    KvError::Unknown(format!("{report:#}"))
}
