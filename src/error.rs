//! Error taxonomy for chain reads and transaction steps
//!
//! Every failure in this crate is scoped to the user action that triggered it.
//! Callers use `is_retryable()` to tell transport hiccups apart from calls the
//! chain (or the signer) refused outright.

use alloy_transport::{RpcError, TransportErrorKind};
use thiserror::Error;

/// EIP-1193 "user rejected request"
const USER_REJECTED_CODE: i64 = 4001;

/// JSON-RPC code most nodes use for `execution reverted`
const EXECUTION_REVERTED_CODE: i64 = 3;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    /// Rejected before any network call (missing account, zero token id, ...)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Network or node trouble; the same request may succeed later
    #[error("transport error: {0}")]
    Transport(String),

    /// The contract call reverted
    #[error("execution reverted: {0}")]
    Reverted(String),

    /// The signer declined to sign
    #[error("transaction rejected: {0}")]
    Rejected(String),

    /// Return data did not match the expected ABI
    #[error("failed to decode {what}: {reason}")]
    Decode { what: String, reason: String },

    /// Data the operation depends on is absent
    #[error("missing data: {0}")]
    MissingData(String),

    /// One call inside an aggregate failed
    #[error("call #{index} failed inside multicall")]
    CallFailed { index: usize },
}

impl ChainError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        ChainError::InvalidInput(msg.into())
    }

    pub fn missing(msg: impl Into<String>) -> Self {
        ChainError::MissingData(msg.into())
    }

    pub fn decode(what: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        ChainError::Decode {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// Only transport failures are worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChainError::Transport(_))
    }

    /// True for failures that end a transaction step in REJECTED
    pub fn is_semantic(&self) -> bool {
        matches!(
            self,
            ChainError::Reverted(_) | ChainError::Rejected(_) | ChainError::CallFailed { .. }
        )
    }
}

impl From<RpcError<TransportErrorKind>> for ChainError {
    fn from(err: RpcError<TransportErrorKind>) -> Self {
        if let Some(payload) = err.as_error_resp() {
            let message = payload.message.to_string();
            if payload.code == USER_REJECTED_CODE {
                return ChainError::Rejected(message);
            }
            if payload.code == EXECUTION_REVERTED_CODE
                || message.to_lowercase().contains("revert")
            {
                return ChainError::Reverted(message);
            }
        }
        ChainError::Transport(err.to_string())
    }
}

pub type ChainResult<T> = std::result::Result<T, ChainError>;
