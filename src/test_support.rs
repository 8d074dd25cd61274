// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared test fixtures: an in-memory chain, an in-memory account store and
//! a pipeline harness wired to both.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use alloy::primitives::U256;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;

use crate::blockchain::{EvmCodec, GasSchedule, NetworkConfig, SignedLeg, TxReceipt};
use crate::engine::builder::TransactionBuilder;
use crate::engine::ports::{
    AccountStore, AccountStoreError, BroadcastError, Broadcaster, ChainError, ChainQuery,
};
use crate::engine::signer::SignerAdapter;
use crate::engine::submitter::Submitter;
use crate::engine::verifier::Verifier;
use crate::error::EngineResult;
use crate::keystore::LocalKeystore;
use crate::models::{
    normalize_address, Account, AccountKey, AssetContract, RawTransaction, TransferRequest,
    WalletAddress,
};
use crate::storage::BalanceCache;

/// Deterministic key for seed `i` (must be non-zero).
pub fn signer(i: u8) -> PrivateKeySigner {
    PrivateKeySigner::from_slice(&[i; 32]).expect("valid test key")
}

/// Lowercase address of [`signer`]`(i)`.
pub fn addr(i: u8) -> String {
    normalize_address(&signer(i).address().to_string())
}

/// Zero-decimal network where every leg costs one gas.
pub fn network() -> NetworkConfig {
    NetworkConfig {
        name: "Local Testnet".to_string(),
        chain_id: 1337,
        rpc_url: "http://127.0.0.1:8545".to_string(),
        explorer_url: "http://127.0.0.1:4000".to_string(),
        native_symbol: "TEST".to_string(),
        native_decimals: 0,
        min_fee_rate: U256::from(1u64),
        max_fee_rate: U256::from(1_000_000u64),
        gas: GasSchedule {
            native_transfer: 1,
            token_transfer: 1,
            per_memo_byte: 0,
        },
        allow_self_transfer: true,
    }
}

/// Two-decimal token on the test network.
pub fn token() -> AssetContract {
    AssetContract {
        address: "0x5425890298aed601595a70ab815c96711a31bc65".to_string(),
        symbol: "TEST".to_string(),
        name: "Test Dollar".to_string(),
        token: "TUSD".to_string(),
        decimals: 2,
    }
}

// =============================================================================
// MockChain
// =============================================================================

#[derive(Clone)]
enum BroadcastMode {
    Accept,
    Reject(String),
    Unavailable(String),
}

struct ChainState {
    native: HashMap<String, U256>,
    token: HashMap<String, U256>,
    nonces: HashMap<String, u64>,
    failing: HashSet<String>,
    gas_price: Option<u64>,
    block_height: u64,
    receipts: HashMap<String, TxReceipt>,
    mode: BroadcastMode,
    /// Legs accepted before `mode` applies
    pass: Option<usize>,
    delay: Option<Duration>,
    /// Legs let through before one call stalls
    stall: Option<(usize, Duration)>,
    /// Every leg hash received, in call order
    broadcasts: Vec<String>,
    accepted: HashSet<String>,
}

/// In-memory chain implementing both [`ChainQuery`] and [`Broadcaster`].
pub struct MockChain {
    state: Mutex<ChainState>,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChainState {
                native: HashMap::new(),
                token: HashMap::new(),
                nonces: HashMap::new(),
                failing: HashSet::new(),
                gas_price: Some(1),
                block_height: 100,
                receipts: HashMap::new(),
                mode: BroadcastMode::Accept,
                pass: None,
                delay: None,
                stall: None,
                broadcasts: Vec::new(),
                accepted: HashSet::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().expect("mock chain lock")
    }

    pub fn set_native(&self, address: &str, balance: u64) {
        self.state()
            .native
            .insert(normalize_address(address), U256::from(balance));
    }

    pub fn set_token(&self, address: &str, balance: u64) {
        self.state()
            .token
            .insert(normalize_address(address), U256::from(balance));
    }

    pub fn set_nonce(&self, address: &str, nonce: u64) {
        self.state().nonces.insert(normalize_address(address), nonce);
    }

    /// Balance queries for `address` fail until [`Self::heal_address`].
    pub fn fail_address(&self, address: &str) {
        self.state().failing.insert(normalize_address(address));
    }

    pub fn heal_address(&self, address: &str) {
        self.state().failing.remove(&normalize_address(address));
    }

    /// `None` makes the gas price query fail.
    pub fn set_gas_price(&self, price: Option<u64>) {
        self.state().gas_price = price;
    }

    pub fn set_block_height(&self, height: u64) {
        self.state().block_height = height;
    }

    pub fn set_receipt(&self, receipt: TxReceipt) {
        self.state()
            .receipts
            .insert(receipt.tx_hash.to_lowercase(), receipt);
    }

    pub fn reject_with(&self, reason: &str) {
        let mut state = self.state();
        state.mode = BroadcastMode::Reject(reason.to_string());
        state.pass = None;
    }

    pub fn broadcast_unavailable(&self, reason: &str) {
        let mut state = self.state();
        state.mode = BroadcastMode::Unavailable(reason.to_string());
        state.pass = None;
    }

    /// Accept the next `legs` legs, then reject with `reason`.
    pub fn accept_then_reject(&self, legs: usize, reason: &str) {
        let mut state = self.state();
        state.mode = BroadcastMode::Reject(reason.to_string());
        state.pass = Some(legs);
    }

    /// Accept the next `legs` legs, then report the transport as down.
    pub fn unavailable_after(&self, legs: usize, reason: &str) {
        let mut state = self.state();
        state.mode = BroadcastMode::Unavailable(reason.to_string());
        state.pass = Some(legs);
    }

    pub fn broadcast_accept(&self) {
        let mut state = self.state();
        state.mode = BroadcastMode::Accept;
        state.pass = None;
        state.delay = None;
        state.stall = None;
    }

    pub fn delay_broadcast(&self, delay: Duration) {
        self.state().delay = Some(delay);
    }

    /// Let `legs` calls through, then hold the next one for `delay`, once.
    pub fn stall_after(&self, legs: usize, delay: Duration) {
        self.state().stall = Some((legs, delay));
    }

    /// Number of leg broadcasts, whatever their outcome.
    pub fn broadcast_count(&self) -> usize {
        self.state().broadcasts.len()
    }

    /// Hash of every leg broadcast so far, in call order.
    pub fn broadcasts(&self) -> Vec<String> {
        self.state().broadcasts.clone()
    }

    fn balance_of(&self, table: &str, address: &str) -> Result<U256, ChainError> {
        let address = normalize_address(address);
        let state = self.state();
        if state.failing.contains(&address) {
            return Err(ChainError::Rpc(format!("{address}: connection reset")));
        }
        let balances = if table == "token" {
            &state.token
        } else {
            &state.native
        };
        Ok(balances.get(&address).copied().unwrap_or(U256::ZERO))
    }
}

#[async_trait]
impl ChainQuery for MockChain {
    async fn native_balance(&self, address: &str) -> Result<U256, ChainError> {
        self.balance_of("native", address)
    }

    async fn token_balance(
        &self,
        address: &str,
        _contract: &AssetContract,
    ) -> Result<U256, ChainError> {
        self.balance_of("token", address)
    }

    async fn gas_price(&self) -> Result<U256, ChainError> {
        self.state()
            .gas_price
            .map(U256::from)
            .ok_or_else(|| ChainError::Rpc("eth_gasPrice: connection refused".to_string()))
    }

    async fn next_nonce(&self, address: &str) -> Result<u64, ChainError> {
        Ok(self
            .state()
            .nonces
            .get(&normalize_address(address))
            .copied()
            .unwrap_or(0))
    }

    async fn block_height(&self) -> Result<u64, ChainError> {
        Ok(self.state().block_height)
    }

    async fn transaction_receipt(&self, tx_id: &str) -> Result<Option<TxReceipt>, ChainError> {
        Ok(self.state().receipts.get(&tx_id.to_lowercase()).cloned())
    }
}

#[async_trait]
impl Broadcaster for MockChain {
    /// A leg already accepted is answered with its id, like a node that
    /// already holds it.
    async fn broadcast(&self, leg: &SignedLeg) -> Result<String, BroadcastError> {
        let (outcome, delay) = {
            let mut state = self.state();
            state.broadcasts.push(leg.tx_hash.clone());

            let delay = match state.stall.take() {
                Some((0, delay)) => Some(delay),
                Some((n, delay)) => {
                    state.stall = Some((n - 1, delay));
                    None
                }
                None => None,
            }
            .or(state.delay);

            let outcome = if state.accepted.contains(&leg.tx_hash) {
                Ok(leg.tx_hash.clone())
            } else {
                match state.pass {
                    Some(n) if n > 0 => {
                        state.pass = Some(n - 1);
                        Ok(leg.tx_hash.clone())
                    }
                    _ => match state.mode.clone() {
                        BroadcastMode::Accept => Ok(leg.tx_hash.clone()),
                        BroadcastMode::Reject(reason) => Err(BroadcastError::Rejected(reason)),
                        BroadcastMode::Unavailable(reason) => {
                            Err(BroadcastError::Unavailable(reason))
                        }
                    },
                }
            };
            (outcome, delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Ok(tx_hash) = &outcome {
            self.state().accepted.insert(tx_hash.clone());
        }
        outcome
    }
}

// =============================================================================
// MemoryAccounts
// =============================================================================

/// In-memory [`AccountStore`].
#[derive(Default)]
pub struct MemoryAccounts {
    accounts: Mutex<HashMap<AccountKey, (Account, Vec<WalletAddress>)>>,
}

impl MemoryAccounts {
    pub fn insert(&self, account: Account, addresses: Vec<WalletAddress>) {
        self.accounts
            .lock()
            .expect("accounts lock")
            .insert(account.key(), (account, addresses));
    }
}

#[async_trait]
impl AccountStore for MemoryAccounts {
    async fn account(
        &self,
        wallet_id: &str,
        account_id: &str,
    ) -> Result<Option<Account>, AccountStoreError> {
        Ok(self
            .accounts
            .lock()
            .expect("accounts lock")
            .get(&AccountKey::new(wallet_id, account_id))
            .map(|(account, _)| account.clone()))
    }

    async fn addresses(&self, account: &Account) -> Result<Vec<WalletAddress>, AccountStoreError> {
        Ok(self
            .accounts
            .lock()
            .expect("accounts lock")
            .get(&account.key())
            .map(|(_, addresses)| addresses.clone())
            .unwrap_or_default())
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Account `w1/a1` (password `pw`) whose addresses `addr(1..)` hold the given
/// native balances, with every key imported.
pub struct Harness {
    pub chain: Arc<MockChain>,
    pub codec: EvmCodec,
    pub cache: BalanceCache,
    pub keystore: LocalKeystore,
    pub account: Account,
    pub addresses: Vec<WalletAddress>,
}

impl Harness {
    pub fn funded(balances: &[u64]) -> Self {
        let chain = Arc::new(MockChain::new());
        let keystore = LocalKeystore::new();
        keystore.insert_account("w1", "a1", "pw");

        let mut addresses = Vec::with_capacity(balances.len());
        for (i, balance) in balances.iter().enumerate() {
            let seed = i as u8 + 1;
            chain.set_native(&addr(seed), *balance);
            keystore
                .import_signer("w1", "a1", signer(seed))
                .expect("import test key");
            addresses.push(WalletAddress::new(addr(seed), "a1", i as u64));
        }

        Self {
            chain,
            codec: EvmCodec::new(network()),
            cache: BalanceCache::new(64, Duration::from_secs(60)),
            keystore,
            account: Account::new("w1", "a1", "TEST"),
            addresses,
        }
    }

    /// Unsigned native transfer of `amount` to `addr(9)` at fee rate 1.
    pub async fn build(&self, amount: &str) -> RawTransaction {
        let builder = TransactionBuilder::new(self.chain.as_ref(), &self.codec, &self.cache);
        let request = TransferRequest {
            wallet_id: "w1".to_string(),
            account_id: "a1".to_string(),
            to: addr(9),
            amount: amount.to_string(),
            fee_rate: Some("1".to_string()),
            extension: None,
            contract: None,
        };
        let plan = builder.prepare(&request).await.expect("valid request");
        builder
            .build(&self.account, &self.addresses, &plan)
            .await
            .expect("funded build")
    }

    pub async fn sign(&self, tx: &mut RawTransaction) -> EngineResult<()> {
        SignerAdapter::new(&self.codec, &self.keystore)
            .sign(tx, "pw")
            .await
    }

    pub fn verifier(&self) -> Verifier<'_> {
        Verifier::new(self.chain.as_ref(), &self.codec, &self.cache)
    }

    pub fn submitter(&self, timeout: Duration) -> Submitter<'_> {
        Submitter::new(&self.codec, self.chain.as_ref(), timeout)
    }
}
