// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Settlement Data Models
//!
//! Accounts and addresses are owned by the host wallet store; this crate only
//! reads them. [`RawTransaction`] is the artifact that moves through the
//! pipeline: created by the builder or summary planner, mutated by the signer
//! and verifier, and finalized by the submitter.
//!
//! ## Status Lifecycle
//!
//! ```text
//! unsigned ──sign──▶ signed ──verify──▶ verified ──submit──▶ submitted
//!     │                 │                   │
//!     └─────────────────┴───────────────────┴──────────────▶ failed
//! ```
//!
//! A status only moves forward. `failed` is terminal: the transaction must be
//! rebuilt (new inputs and nonces), never re-signed in place.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use alloy::primitives::{Bytes, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::blockchain::format_amount;
use crate::engine::locks::AccountLease;
use crate::error::EngineError;

// =============================================================================
// Accounts & Addresses
// =============================================================================

/// Key curve used by an account's addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CurveType {
    #[default]
    Secp256k1,
    Ed25519,
}

/// A collection of addresses under one wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub wallet_id: String,
    pub account_id: String,
    /// Asset symbol; selects the chain adapter used for this account.
    pub symbol: String,
    #[serde(default)]
    pub curve: CurveType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Account {
    pub fn new(
        wallet_id: impl Into<String>,
        account_id: impl Into<String>,
        symbol: impl Into<String>,
    ) -> Self {
        Self {
            wallet_id: wallet_id.into(),
            account_id: account_id.into(),
            symbol: symbol.into(),
            curve: CurveType::default(),
            alias: None,
        }
    }

    pub fn key(&self) -> AccountKey {
        AccountKey::new(&self.wallet_id, &self.account_id)
    }

    /// Whether this account is the one named by the identifiers.
    pub fn is(&self, wallet_id: &str, account_id: &str) -> bool {
        self.wallet_id == wallet_id && self.account_id == account_id
    }
}

/// `(wallet_id, account_id)` pair used to key per-account state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountKey {
    pub wallet_id: String,
    pub account_id: String,
}

impl AccountKey {
    pub fn new(wallet_id: &str, account_id: &str) -> Self {
        Self {
            wallet_id: wallet_id.to_string(),
            account_id: account_id.to_string(),
        }
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.wallet_id, self.account_id)
    }
}

/// An on-chain address owned by exactly one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAddress {
    /// Chain address (0x-prefixed hex for EVM chains).
    pub address: String,
    pub account_id: String,
    /// Derivation index; defines the account's stable address order.
    pub index: u64,
}

impl WalletAddress {
    pub fn new(address: impl Into<String>, account_id: impl Into<String>, index: u64) -> Self {
        Self {
            address: address.into(),
            account_id: account_id.into(),
            index,
        }
    }
}

// =============================================================================
// Assets
// =============================================================================

/// A token contract. Operations without one target the native coin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetContract {
    /// Contract address
    pub address: String,
    /// Chain symbol the contract lives on
    pub symbol: String,
    /// Display name
    pub name: String,
    /// Token ticker
    pub token: String,
    /// Decimal precision (18 for most tokens)
    pub decimals: u8,
}

impl AssetContract {
    /// Cache/ledger key for this asset.
    pub fn key(&self) -> String {
        normalize_address(&self.address)
    }
}

/// Lowercase an address and make sure it carries the `0x` prefix.
pub fn normalize_address(address: &str) -> String {
    let trimmed = address.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    format!("0x{}", body.to_lowercase())
}

// =============================================================================
// Balances
// =============================================================================

/// Balance of one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBalance {
    pub address: String,
    pub balance: U256,
    /// `true` when the chain could not be reached and this is the last
    /// cached value.
    pub stale: bool,
}

/// An address whose balance could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedAddress {
    pub address: String,
    pub error: String,
}

/// Aggregate balance of an account for one asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountBalance {
    pub wallet_id: String,
    pub account_id: String,
    /// Native symbol or token ticker
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    pub decimals: u8,
    /// Best-known total (includes stale cached values for unresolved addresses)
    pub total: U256,
    pub balances: Vec<AddressBalance>,
    pub unresolved: Vec<UnresolvedAddress>,
}

impl AccountBalance {
    /// Total formatted with the asset's decimals.
    pub fn formatted(&self) -> String {
        format_amount(self.total, self.decimals)
    }

    pub fn is_partial(&self) -> bool {
        !self.unresolved.is_empty()
    }

    /// The `PartialBalanceResolution` warning, if any address was unreachable.
    pub fn warning(&self) -> Option<EngineError> {
        if self.is_partial() {
            Some(EngineError::PartialBalanceResolution {
                unresolved: self.unresolved.iter().map(|u| u.address.clone()).collect(),
            })
        } else {
            None
        }
    }
}

// =============================================================================
// Requests
// =============================================================================

/// Single transfer request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub wallet_id: String,
    pub account_id: String,
    /// Destination address
    pub to: String,
    /// Decimal amount in display units (e.g. "12.5")
    pub amount: String,
    /// Explicit fee rate (native display units per gas); `None` or empty
    /// uses the chain's recommendation.
    #[serde(default)]
    pub fee_rate: Option<String>,
    /// Memo / extension data
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub contract: Option<AssetContract>,
}

/// Summary (sweep) request over a page of the account's addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRequest {
    pub wallet_id: String,
    pub account_id: String,
    pub summary_address: String,
    /// Minimum transferable amount; empty means any positive amount.
    #[serde(default)]
    pub min_transfer: String,
    /// Amount left behind on every source address; empty means zero.
    #[serde(default)]
    pub retained_balance: String,
    #[serde(default)]
    pub fee_rate: Option<String>,
    /// Number of addresses (in derivation order) to skip.
    pub start: usize,
    /// Maximum number of addresses to examine.
    pub limit: usize,
    #[serde(default)]
    pub contract: Option<AssetContract>,
}

// =============================================================================
// Raw Transaction
// =============================================================================

/// Pipeline status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Unsigned,
    Signed,
    Verified,
    Submitted,
    Failed,
}

impl TxStatus {
    /// The single status this one may advance to (besides `Failed`).
    pub fn next(self) -> Option<TxStatus> {
        match self {
            TxStatus::Unsigned => Some(TxStatus::Signed),
            TxStatus::Signed => Some(TxStatus::Verified),
            TxStatus::Verified => Some(TxStatus::Submitted),
            TxStatus::Submitted | TxStatus::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TxStatus::Submitted | TxStatus::Failed)
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxStatus::Unsigned => "unsigned",
            TxStatus::Signed => "signed",
            TxStatus::Verified => "verified",
            TxStatus::Submitted => "submitted",
            TxStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One source address spending into the transaction.
///
/// On nonce-based chains every input becomes its own signed leg with its own
/// nonce and its own fee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSelection {
    pub address: String,
    /// Balance of the selected asset observed at build time
    pub balance: U256,
    /// Native balance observed at build time (pays the leg fee)
    pub native_balance: U256,
    /// Amount of the transferred asset this input contributes
    pub spend: U256,
    /// Fee paid by this input's leg, in native minor units
    pub fee: U256,
    pub nonce: u64,
}

/// What the transaction does on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TxPayload {
    /// Native coin transfer
    NativeTransfer { to: String, amount: U256 },
    /// Token contract invocation of `transfer(to, amount)`
    ContractCall {
        contract: AssetContract,
        to: String,
        amount: U256,
        /// ABI-encoded call data for the full amount
        data: Bytes,
    },
}

impl TxPayload {
    pub fn to(&self) -> &str {
        match self {
            TxPayload::NativeTransfer { to, .. } | TxPayload::ContractCall { to, .. } => to,
        }
    }

    pub fn amount(&self) -> U256 {
        match self {
            TxPayload::NativeTransfer { amount, .. } | TxPayload::ContractCall { amount, .. } => {
                *amount
            }
        }
    }

    pub fn contract(&self) -> Option<&AssetContract> {
        match self {
            TxPayload::NativeTransfer { .. } => None,
            TxPayload::ContractCall { contract, .. } => Some(contract),
        }
    }
}

/// The central pipeline artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTransaction {
    /// Local identifier (not the chain hash)
    pub id: Uuid,
    pub account: Account,
    pub inputs: Vec<InputSelection>,
    pub payload: TxPayload,
    /// Gas price in native minor units
    pub fee_rate: U256,
    /// Gas limit of every leg
    pub gas_limit: u64,
    /// Total fee over all legs, in native minor units
    pub fee: U256,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    /// Signature per lowercase input address
    pub signatures: HashMap<String, Bytes>,
    /// Chain id of the first leg, set once that leg is accepted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
    /// Chain ids of the legs accepted so far, in input order
    #[serde(default)]
    pub leg_tx_ids: Vec<String>,
    status: TxStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) lease: Option<Arc<AccountLease>>,
}

impl RawTransaction {
    pub(crate) fn new_unsigned(
        account: Account,
        inputs: Vec<InputSelection>,
        payload: TxPayload,
        fee_rate: U256,
        gas_limit: u64,
        extension: Option<String>,
    ) -> Self {
        let fee = inputs.iter().fold(U256::ZERO, |acc, i| acc + i.fee);
        Self {
            id: Uuid::new_v4(),
            account,
            inputs,
            payload,
            fee_rate,
            gas_limit,
            fee,
            extension,
            signatures: HashMap::new(),
            tx_id: None,
            leg_tx_ids: Vec::new(),
            status: TxStatus::Unsigned,
            failure: None,
            created_at: Utc::now(),
            lease: None,
        }
    }

    pub fn status(&self) -> TxStatus {
        self.status
    }

    pub fn to(&self) -> &str {
        self.payload.to()
    }

    pub fn amount(&self) -> U256 {
        self.payload.amount()
    }

    pub fn contract(&self) -> Option<&AssetContract> {
        self.payload.contract()
    }

    /// Sum of the selected inputs' balances of the transferred asset.
    pub fn input_total(&self) -> U256 {
        self.inputs.iter().fold(U256::ZERO, |acc, i| acc + i.balance)
    }

    /// Whether this transaction still holds its account's lease.
    pub fn holds_lease(&self) -> bool {
        self.lease.is_some()
    }

    /// Transactions restored from storage come back without a lease and
    /// cannot move through the pipeline.
    pub(crate) fn require_lease(&self) -> Result<(), EngineError> {
        if self.holds_lease() {
            Ok(())
        } else {
            Err(EngineError::LeaseNotHeld(self.id.to_string()))
        }
    }

    pub(crate) fn require_status(&self, expected: TxStatus) -> Result<(), EngineError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(EngineError::InvalidStatus {
                expected,
                actual: self.status,
            })
        }
    }

    /// Move one step forward. Terminal states release the account lease.
    pub(crate) fn advance(&mut self, next: TxStatus) -> Result<(), EngineError> {
        match self.status.next() {
            Some(allowed) if allowed == next => {
                self.status = next;
                if next.is_terminal() {
                    self.lease = None;
                }
                Ok(())
            }
            _ => Err(EngineError::InvalidStatus {
                expected: next,
                actual: self.status,
            }),
        }
    }

    /// Terminate as failed and release the account lease.
    pub(crate) fn fail(&mut self, reason: impl Into<String>) {
        self.status = TxStatus::Failed;
        self.failure = Some(reason.into());
        self.lease = None;
    }
}

// =============================================================================
// Summary Batch
// =============================================================================

/// Why the planner passed over an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Balance or nonce could not be read; never assumed zero.
    Unresolved { error: String },
    /// Transferable amount below the minimum (or zero).
    BelowMinimum { transferable: U256 },
    /// Not enough native coin left to pay the fee.
    InsufficientFee { native_balance: U256, fee: U256 },
    /// The address is the summary destination itself.
    SummaryAddress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedAddress {
    pub address: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Ordered sweep transactions for one page of addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryBatch {
    pub start: usize,
    pub limit: usize,
    /// Number of addresses actually examined (≤ limit)
    pub examined: usize,
    pub transactions: Vec<RawTransaction>,
    pub skipped: Vec<SkippedAddress>,
}

impl SummaryBatch {
    /// Addresses whose balance could not be resolved.
    pub fn unresolved(&self) -> impl Iterator<Item = &SkippedAddress> {
        self.skipped
            .iter()
            .filter(|s| matches!(s.reason, SkipReason::Unresolved { .. }))
    }
}

// =============================================================================
// Submission Records
// =============================================================================

/// On-chain state of a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    Pending,
    /// Some legs were accepted before the chain rejected the rest.
    Partial,
    Confirmed,
    Reverted,
}

/// Wallet-side record of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedTransaction {
    /// Local id derived from the chain id (UUIDv5)
    pub wx_id: String,
    pub tx_id: String,
    pub leg_tx_ids: Vec<String>,
    pub wallet_id: String,
    pub account_id: String,
    pub symbol: String,
    pub from: Vec<String>,
    pub to: String,
    /// Amount in display units
    pub amount: String,
    /// Fee in native display units
    pub fee: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    pub status: LedgerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubmittedTransaction {
    /// Derive the local id for a chain transaction.
    pub fn wx_id_for(symbol: &str, tx_id: &str) -> String {
        Uuid::new_v5(
            &Uuid::NAMESPACE_OID,
            format!("{}:{}", symbol.to_uppercase(), tx_id.to_lowercase()).as_bytes(),
        )
        .to_string()
    }
}

/// Result of polling a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ConfirmationStatus {
    Pending,
    Confirmed { block_number: u64, confirmations: u64 },
    Reverted { block_number: u64 },
}
