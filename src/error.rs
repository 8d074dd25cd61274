// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Engine error type.
//!
//! Every pipeline operation returns [`EngineError`]. Building, signing and
//! verification errors go straight back to the caller; nothing is retried
//! inside the engine. Submission rejections carry the chain's reason verbatim.

use std::time::Duration;

use alloy::primitives::U256;

use crate::blockchain::CodecError;
use crate::engine::ports::{AccountStoreError, ChainError};
use crate::models::TxStatus;
use crate::storage::LedgerError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    #[error("Invalid fee rate: {0}")]
    InvalidFeeRate(String),

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: U256, available: U256 },

    #[error("Fee rate not supplied and chain fee query unavailable: {0}")]
    FeeQueryUnavailable(String),

    #[error("Keystore rejected the password")]
    AuthenticationFailed,

    #[error("Signer unavailable: {0}")]
    SignerUnavailable(String),

    #[error("Signature mismatch: {0}")]
    SignatureMismatch(String),

    #[error("Incomplete signatures: expected {expected}, got {actual}")]
    IncompleteSignatures { expected: usize, actual: usize },

    #[error("Submission rejected: {0}")]
    SubmissionRejected(String),

    /// Some legs reached the chain before the rest were rejected. The
    /// accepted legs spend their inputs, so the transaction must not be
    /// rebuilt from the same addresses until they settle.
    #[error(
        "Submission rejected after {} leg(s) were accepted ({}): {reason}; do not rebuild the accepted legs",
        .accepted.len(),
        .accepted.join(", ")
    )]
    PartiallySubmitted { accepted: Vec<String>, reason: String },

    /// Warning-level: surfaced through `AccountBalance::warning`, never
    /// returned as the error of a balance query.
    #[error("Partial balance resolution: {} address(es) unresolved", .unresolved.len())]
    PartialBalanceResolution { unresolved: Vec<String> },

    #[error("Invalid transaction status: expected {expected}, found {actual}")]
    InvalidStatus { expected: TxStatus, actual: TxStatus },

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Transaction does not belong to account {0}")]
    AccountMismatch(String),

    #[error("No adapter registered for asset {0}")]
    UnsupportedAsset(String),

    #[error("Account {0} has a transaction in flight")]
    AccountBusy(String),

    /// The transaction was not built by this engine instance, or was
    /// restored from storage, and so holds no account lease.
    #[error("Transaction {0} does not hold its account lease")]
    LeaseNotHeld(String),

    #[error("Submission timed out after {0:?}")]
    SubmissionTimedOut(Duration),

    #[error("Cancelled before broadcast")]
    Cancelled,

    #[error("Broadcast unavailable: {0}")]
    BroadcastUnavailable(String),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    AccountStore(#[from] AccountStoreError),
}

impl EngineError {
    /// Whether the same call may be repeated without rebuilding or re-signing.
    ///
    /// Permanent failures (bad input, signature problems, chain rejections)
    /// return `false`: the transaction must be rebuilt from scratch.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::FeeQueryUnavailable(_)
                | EngineError::SignerUnavailable(_)
                | EngineError::AccountBusy(_)
                | EngineError::SubmissionTimedOut(_)
                | EngineError::Cancelled
                | EngineError::BroadcastUnavailable(_)
                | EngineError::Chain(_)
                | EngineError::AccountStore(_)
        )
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
