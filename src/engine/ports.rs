// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Capabilities consumed by the engine
//!
//! The engine never persists accounts, holds keys or speaks RPC itself. The
//! host supplies these capabilities; the crate ships reference
//! implementations in [`crate::blockchain::EvmRpcClient`] and
//! [`crate::keystore::LocalKeystore`].

use std::collections::HashMap;

use alloy::primitives::{Bytes, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::blockchain::{SignedLeg, TxReceipt};
use crate::models::{Account, AssetContract, WalletAddress};

// =============================================================================
// Errors
// =============================================================================

/// Chain query failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("Invalid RPC URL: {0}")]
    InvalidRpcUrl(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid transaction id: {0}")]
    InvalidTxId(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Contract error: {0}")]
    Contract(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeystoreError {
    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("keystore unavailable: {0}")]
    Unavailable(String),

    #[error("no key for address {0}")]
    UnknownAddress(String),
}

/// Outcome of broadcasting one leg.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BroadcastError {
    /// The chain refused the leg.
    #[error("{0}")]
    Rejected(String),

    /// The leg may not have reached the chain; sending it again is safe.
    #[error("broadcast unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("account store error: {0}")]
pub struct AccountStoreError(pub String);

// =============================================================================
// Capability Traits
// =============================================================================

/// Read access to the host's wallet store.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn account(
        &self,
        wallet_id: &str,
        account_id: &str,
    ) -> Result<Option<Account>, AccountStoreError>;

    /// Addresses of the account in derivation order.
    async fn addresses(&self, account: &Account) -> Result<Vec<WalletAddress>, AccountStoreError>;
}

/// Read access to chain state.
#[async_trait]
pub trait ChainQuery: Send + Sync {
    async fn native_balance(&self, address: &str) -> Result<U256, ChainError>;

    async fn token_balance(
        &self,
        address: &str,
        contract: &AssetContract,
    ) -> Result<U256, ChainError>;

    /// Recommended fee rate in native minor units per gas.
    async fn gas_price(&self) -> Result<U256, ChainError>;

    /// Next unused nonce, counting pending transactions.
    async fn next_nonce(&self, address: &str) -> Result<u64, ChainError>;

    async fn block_height(&self) -> Result<u64, ChainError>;

    async fn transaction_receipt(&self, tx_id: &str) -> Result<Option<TxReceipt>, ChainError>;
}

/// One digest to sign with the key behind `address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningRequest {
    pub address: String,
    pub digest: B256,
}

/// Password-gated signing.
#[async_trait]
pub trait Keystore: Send + Sync {
    /// Sign every request. Returns signatures keyed by lowercase address.
    async fn sign(
        &self,
        wallet_id: &str,
        account_id: &str,
        password: &str,
        requests: &[SigningRequest],
    ) -> Result<HashMap<String, Bytes>, KeystoreError>;
}

/// Chain ids assigned to the broadcast legs, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastReceipt {
    pub tx_ids: Vec<String>,
}

/// Sends one signed leg at a time.
///
/// Re-sending a leg the chain already holds must succeed with the same id:
/// a leg whose outcome was lost to a timeout is sent again on retry.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Returns the chain id assigned to the leg.
    async fn broadcast(&self, leg: &SignedLeg) -> Result<String, BroadcastError>;
}
