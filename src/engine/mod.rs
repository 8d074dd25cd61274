// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Settlement Engine
//!
//! [`SettlementEngine`] is the host-facing manager. It looks up the account,
//! picks the asset adapter registered for the account's symbol, and drives
//! the pipeline components:
//!
//! ```text
//! BalanceResolver ─┐
//! FeeEstimator ────┼─▶ TransactionBuilder ─┐
//!                  └─▶ SummaryPlanner ─────┴─▶ SignerAdapter ─▶ Verifier ─▶ Submitter
//! ```
//!
//! Building takes the account lease; the lease travels inside the
//! transaction and is released when it reaches `submitted` or `failed`, or
//! when the caller drops it.

pub mod balance;
pub mod builder;
pub mod fee;
pub mod locks;
pub mod ports;
pub mod selector;
pub mod signer;
pub mod submitter;
pub mod summary;
pub mod verifier;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::blockchain::{format_amount, EvmCodec, EvmRpcClient, TransactionCodec};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::models::{
    Account, AccountBalance, AssetContract, ConfirmationStatus, LedgerStatus, RawTransaction,
    SubmittedTransaction, SummaryBatch, SummaryRequest, TransferRequest, WalletAddress,
};
use crate::storage::{BalanceCache, TxLedger};

use balance::BalanceResolver;
use builder::TransactionBuilder;
use fee::{FeeEstimate, FeeEstimator};
use locks::AccountLocks;
use ports::{AccountStore, Broadcaster, ChainQuery, Keystore};
use signer::SignerAdapter;
use submitter::Submitter;
use summary::SummaryPlanner;
use verifier::Verifier;

// =============================================================================
// Adapter Registry
// =============================================================================

/// Chain strategy for one asset symbol.
#[derive(Clone)]
pub struct AssetAdapter {
    pub codec: Arc<dyn TransactionCodec>,
    pub chain: Arc<dyn ChainQuery>,
    pub broadcaster: Arc<dyn Broadcaster>,
}

impl AssetAdapter {
    pub fn new(
        codec: Arc<dyn TransactionCodec>,
        chain: Arc<dyn ChainQuery>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            codec,
            chain,
            broadcaster,
        }
    }

    /// EVM adapter backed by one JSON-RPC client.
    pub fn evm(client: Arc<EvmRpcClient>) -> Self {
        let codec = Arc::new(EvmCodec::new(client.network().clone()));
        Self {
            codec,
            chain: client.clone(),
            broadcaster: client,
        }
    }
}

/// Adapters keyed by uppercase asset symbol.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, AssetAdapter>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, symbol: &str, adapter: AssetAdapter) {
        self.adapters.insert(symbol.to_uppercase(), adapter);
    }

    pub fn get(&self, symbol: &str) -> EngineResult<&AssetAdapter> {
        self.adapters
            .get(&symbol.to_uppercase())
            .ok_or_else(|| EngineError::UnsupportedAsset(symbol.to_string()))
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<_> = self.adapters.keys().cloned().collect();
        symbols.sort();
        symbols
    }
}

// =============================================================================
// Settlement Engine
// =============================================================================

pub struct SettlementEngine {
    config: EngineConfig,
    accounts: Arc<dyn AccountStore>,
    keystore: Arc<dyn Keystore>,
    adapters: AdapterRegistry,
    cache: BalanceCache,
    locks: AccountLocks,
    ledger: Option<TxLedger>,
}

impl SettlementEngine {
    /// Create an engine. Opens the ledger when `config.ledger_path` is set.
    pub fn new(
        config: EngineConfig,
        accounts: Arc<dyn AccountStore>,
        keystore: Arc<dyn Keystore>,
    ) -> EngineResult<Self> {
        let ledger = match &config.ledger_path {
            Some(path) => Some(TxLedger::open(path)?),
            None => None,
        };
        tracing::info!(
            ledger = ?config.ledger_path,
            submit_timeout = ?config.submit_timeout,
            lock_timeout = ?config.lock_timeout,
            "Settlement engine initialized"
        );

        Ok(Self {
            cache: BalanceCache::new(config.balance_cache_capacity, config.balance_cache_ttl),
            locks: AccountLocks::new(config.lock_timeout),
            config,
            accounts,
            keystore,
            adapters: AdapterRegistry::new(),
            ledger,
        })
    }

    pub fn with_adapter(mut self, symbol: &str, adapter: AssetAdapter) -> Self {
        self.adapters.register(symbol, adapter);
        self
    }

    pub fn with_ledger(mut self, ledger: TxLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    pub fn ledger(&self) -> Option<&TxLedger> {
        self.ledger.as_ref()
    }

    async fn load_account(
        &self,
        wallet_id: &str,
        account_id: &str,
    ) -> EngineResult<(Account, Vec<WalletAddress>)> {
        let account = self
            .accounts
            .account(wallet_id, account_id)
            .await?
            .ok_or_else(|| EngineError::AccountNotFound(format!("{wallet_id}/{account_id}")))?;
        let addresses = self.accounts.addresses(&account).await?;
        Ok((account, addresses))
    }

    fn ensure_owner(tx: &RawTransaction, wallet_id: &str, account_id: &str) -> EngineResult<()> {
        if tx.account.is(wallet_id, account_id) {
            Ok(())
        } else {
            Err(EngineError::AccountMismatch(format!("{wallet_id}/{account_id}")))
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Native balance of every address of the account.
    pub async fn get_account_balance(
        &self,
        wallet_id: &str,
        account_id: &str,
    ) -> EngineResult<AccountBalance> {
        self.resolve_balance(wallet_id, account_id, None).await
    }

    /// Token balance of every address of the account.
    pub async fn get_token_balance(
        &self,
        wallet_id: &str,
        account_id: &str,
        contract: &AssetContract,
    ) -> EngineResult<AccountBalance> {
        self.resolve_balance(wallet_id, account_id, Some(contract))
            .await
    }

    async fn resolve_balance(
        &self,
        wallet_id: &str,
        account_id: &str,
        contract: Option<&AssetContract>,
    ) -> EngineResult<AccountBalance> {
        let (account, addresses) = self.load_account(wallet_id, account_id).await?;
        let adapter = self.adapters.get(&account.symbol)?;
        let resolver = BalanceResolver::new(adapter.chain.as_ref(), &self.cache);
        Ok(resolver
            .account_balance(
                &account,
                &addresses,
                contract,
                adapter.codec.network().native_decimals,
            )
            .await)
    }

    /// Per-leg fee for a transfer of the given shape.
    pub async fn estimate_fee(
        &self,
        symbol: &str,
        fee_rate: Option<&str>,
        contract: Option<&AssetContract>,
        extension: Option<&str>,
    ) -> EngineResult<FeeEstimate> {
        let adapter = self.adapters.get(symbol)?;
        FeeEstimator::new(adapter.chain.as_ref(), adapter.codec.as_ref())
            .estimate(fee_rate, contract, extension)
            .await
    }

    pub async fn block_height(&self, symbol: &str) -> EngineResult<u64> {
        let adapter = self.adapters.get(symbol)?;
        Ok(adapter.chain.block_height().await?)
    }

    // =========================================================================
    // Pipeline
    // =========================================================================

    /// Build an unsigned transfer. Holds the account lease until the
    /// transaction reaches a terminal status or is dropped.
    pub async fn create_transaction(&self, request: &TransferRequest) -> EngineResult<RawTransaction> {
        let (account, addresses) = self
            .load_account(&request.wallet_id, &request.account_id)
            .await?;
        let adapter = self.adapters.get(&account.symbol)?;
        let builder =
            TransactionBuilder::new(adapter.chain.as_ref(), adapter.codec.as_ref(), &self.cache);

        let plan = builder.prepare(request).await?;
        let lease = self.locks.acquire(&account.key()).await?;
        let mut tx = builder.build(&account, &addresses, &plan).await?;
        tx.lease = Some(Arc::new(lease));
        Ok(tx)
    }

    /// Plan sweeps for one page of the account's addresses.
    ///
    /// Every transaction of the batch shares a single account lease.
    pub async fn create_summary_transaction(
        &self,
        request: &SummaryRequest,
    ) -> EngineResult<SummaryBatch> {
        let (account, addresses) = self
            .load_account(&request.wallet_id, &request.account_id)
            .await?;
        let adapter = self.adapters.get(&account.symbol)?;
        let planner =
            SummaryPlanner::new(adapter.chain.as_ref(), adapter.codec.as_ref(), &self.cache);

        let plan = planner.prepare(request).await?;
        let lease = Arc::new(self.locks.acquire(&account.key()).await?);
        let page = planner.plan(&account, &addresses, &plan).await?;

        let transactions = page
            .transactions
            .into_iter()
            .map(|mut tx| {
                tx.lease = Some(lease.clone());
                tx
            })
            .collect();

        let batch = SummaryBatch {
            start: plan.start,
            limit: plan.limit,
            examined: page.examined,
            transactions,
            skipped: page.skipped,
        };
        let unresolved = batch.unresolved().count();
        if unresolved > 0 {
            tracing::warn!(
                account = %account.key(),
                unresolved,
                "Summary batch skipped addresses with unresolved balances"
            );
        }
        Ok(batch)
    }

    pub async fn sign_transaction(
        &self,
        wallet_id: &str,
        account_id: &str,
        password: &str,
        tx: &mut RawTransaction,
    ) -> EngineResult<()> {
        Self::ensure_owner(tx, wallet_id, account_id)?;
        tx.require_lease()?;
        let adapter = self.adapters.get(&tx.account.symbol)?;
        SignerAdapter::new(adapter.codec.as_ref(), self.keystore.as_ref())
            .sign(tx, password)
            .await
    }

    pub async fn verify_transaction(
        &self,
        wallet_id: &str,
        account_id: &str,
        tx: &mut RawTransaction,
    ) -> EngineResult<()> {
        Self::ensure_owner(tx, wallet_id, account_id)?;
        tx.require_lease()?;
        let adapter = self.adapters.get(&tx.account.symbol)?;
        Verifier::new(adapter.chain.as_ref(), adapter.codec.as_ref(), &self.cache)
            .verify(tx)
            .await
    }

    pub async fn submit_transaction(
        &self,
        wallet_id: &str,
        account_id: &str,
        tx: &mut RawTransaction,
    ) -> EngineResult<SubmittedTransaction> {
        self.submit_inner(wallet_id, account_id, tx, None).await
    }

    /// Like [`Self::submit_transaction`]; `cancel` is honoured only until the
    /// first leg of this call is sent.
    pub async fn submit_transaction_with_cancel(
        &self,
        wallet_id: &str,
        account_id: &str,
        tx: &mut RawTransaction,
        cancel: &CancellationToken,
    ) -> EngineResult<SubmittedTransaction> {
        self.submit_inner(wallet_id, account_id, tx, Some(cancel))
            .await
    }

    async fn submit_inner(
        &self,
        wallet_id: &str,
        account_id: &str,
        tx: &mut RawTransaction,
        cancel: Option<&CancellationToken>,
    ) -> EngineResult<SubmittedTransaction> {
        Self::ensure_owner(tx, wallet_id, account_id)?;
        tx.require_lease()?;
        let adapter = self.adapters.get(&tx.account.symbol)?;
        let result = Submitter::new(
            adapter.codec.as_ref(),
            adapter.broadcaster.as_ref(),
            self.config.submit_timeout,
        )
        .submit(tx, cancel)
        .await;

        // Spent or not, the observed balances are no longer trustworthy.
        if result.is_ok() || !tx.leg_tx_ids.is_empty() {
            self.invalidate_balances(tx);
        }

        match result {
            Ok(receipt) => {
                let record = self.submission_record(
                    adapter.codec.as_ref(),
                    tx,
                    receipt.tx_ids,
                    LedgerStatus::Pending,
                );
                self.record_submission(&record);
                Ok(record)
            }
            Err(EngineError::PartiallySubmitted { accepted, reason }) => {
                let record = self.submission_record(
                    adapter.codec.as_ref(),
                    tx,
                    accepted.clone(),
                    LedgerStatus::Partial,
                );
                self.record_submission(&record);
                Err(EngineError::PartiallySubmitted { accepted, reason })
            }
            Err(e) => Err(e),
        }
    }

    /// Ledger writes are best effort: the chain already holds the legs.
    fn record_submission(&self, record: &SubmittedTransaction) {
        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.record(record) {
                tracing::warn!(tx_id = %record.tx_id, error = %e, "Failed to record submission");
            }
        }
    }

    fn invalidate_balances(&self, tx: &RawTransaction) {
        let contract = tx.contract().map(|c| c.address.as_str());
        for input in &tx.inputs {
            self.cache.invalidate(&input.address, None);
            if contract.is_some() {
                self.cache.invalidate(&input.address, contract);
            }
        }
    }

    fn submission_record(
        &self,
        codec: &dyn TransactionCodec,
        tx: &RawTransaction,
        tx_ids: Vec<String>,
        status: LedgerStatus,
    ) -> SubmittedTransaction {
        let native_decimals = codec.network().native_decimals;
        let decimals = tx.contract().map(|c| c.decimals).unwrap_or(native_decimals);
        let tx_id = tx_ids.first().cloned().unwrap_or_default();
        let now = Utc::now();

        SubmittedTransaction {
            wx_id: SubmittedTransaction::wx_id_for(&tx.account.symbol, &tx_id),
            tx_id,
            leg_tx_ids: tx_ids,
            wallet_id: tx.account.wallet_id.clone(),
            account_id: tx.account.account_id.clone(),
            symbol: tx.account.symbol.clone(),
            from: tx.inputs.iter().map(|i| i.address.clone()).collect(),
            to: tx.to().to_string(),
            amount: format_amount(tx.amount(), decimals),
            fee: format_amount(tx.fee, native_decimals),
            contract_address: tx.contract().map(|c| c.key()),
            status,
            block_number: None,
            submitted_at: now,
            updated_at: now,
        }
    }

    // =========================================================================
    // Confirmation
    // =========================================================================

    /// Poll a submitted transaction and update its ledger record.
    ///
    /// `required_confirmations` of 0 or 1 both mean "included in a block".
    pub async fn confirm_transaction(
        &self,
        symbol: &str,
        tx_id: &str,
        required_confirmations: u64,
    ) -> EngineResult<ConfirmationStatus> {
        let adapter = self.adapters.get(symbol)?;
        let Some(receipt) = adapter.chain.transaction_receipt(tx_id).await? else {
            return Ok(ConfirmationStatus::Pending);
        };

        let status = if !receipt.success {
            ConfirmationStatus::Reverted {
                block_number: receipt.block_number,
            }
        } else {
            let height = adapter.chain.block_height().await?;
            let confirmations = height.saturating_sub(receipt.block_number) + 1;
            if confirmations < required_confirmations {
                ConfirmationStatus::Pending
            } else {
                ConfirmationStatus::Confirmed {
                    block_number: receipt.block_number,
                    confirmations,
                }
            }
        };

        if let Some(ledger) = &self.ledger {
            let ledger_status = match status {
                ConfirmationStatus::Pending => None,
                ConfirmationStatus::Confirmed { block_number, .. } => {
                    Some((LedgerStatus::Confirmed, block_number))
                }
                ConfirmationStatus::Reverted { block_number } => {
                    Some((LedgerStatus::Reverted, block_number))
                }
            };
            if let (Some((ledger_status, block)), Some(record)) =
                (ledger_status, ledger.find_by_tx_id(tx_id)?)
            {
                // A confirmed leg does not complete a partial submission.
                let ledger_status = match (record.status, ledger_status) {
                    (LedgerStatus::Partial, LedgerStatus::Confirmed) => LedgerStatus::Partial,
                    (_, status) => status,
                };
                ledger.update_status(&record.wx_id, ledger_status, Some(block))?;
                tracing::info!(tx_id = %tx_id, status = ?ledger_status, block, "Ledger updated");
            }
        }
        Ok(status)
    }

    /// Recorded submissions of an account, newest first.
    pub fn list_submitted(
        &self,
        wallet_id: &str,
        account_id: &str,
        limit: usize,
    ) -> EngineResult<Vec<SubmittedTransaction>> {
        match &self.ledger {
            Some(ledger) => Ok(ledger.list_by_account(wallet_id, account_id, limit)?),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;
    use crate::blockchain::TxReceipt;
    use crate::keystore::LocalKeystore;
    use crate::models::{TxPayload, TxStatus};
    use crate::test_support::{addr, network, signer, token, MemoryAccounts, MockChain};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        chain: Arc<MockChain>,
        engine: SettlementEngine,
    }

    /// `w1/a1` owns addr(1..=n), `w1/a2` owns addr(11..=12).
    fn fixture(balances: &[u64], ledger: Option<TxLedger>) -> Fixture {
        let chain = Arc::new(MockChain::new());
        let accounts = Arc::new(MemoryAccounts::default());
        let keystore = Arc::new(LocalKeystore::new());

        keystore.insert_account("w1", "a1", "pw");
        let mut addresses = Vec::new();
        for (i, balance) in balances.iter().enumerate() {
            let seed = i as u8 + 1;
            chain.set_native(&addr(seed), *balance);
            keystore.import_signer("w1", "a1", signer(seed)).unwrap();
            addresses.push(WalletAddress::new(addr(seed), "a1", i as u64));
        }
        accounts.insert(Account::new("w1", "a1", "TEST"), addresses);

        keystore.insert_account("w1", "a2", "pw2");
        let mut other = Vec::new();
        for seed in [11u8, 12] {
            chain.set_native(&addr(seed), 40);
            keystore.import_signer("w1", "a2", signer(seed)).unwrap();
            other.push(WalletAddress::new(addr(seed), "a2", seed as u64));
        }
        accounts.insert(Account::new("w1", "a2", "TEST"), other);

        let config = EngineConfig {
            lock_timeout: Duration::from_millis(50),
            submit_timeout: Duration::from_secs(5),
            ..EngineConfig::default()
        };
        let adapter = AssetAdapter::new(
            Arc::new(EvmCodec::new(network())),
            chain.clone(),
            chain.clone(),
        );
        let mut engine = SettlementEngine::new(config, accounts, keystore)
            .unwrap()
            .with_adapter("test", adapter);
        if let Some(ledger) = ledger {
            engine = engine.with_ledger(ledger);
        }
        Fixture { chain, engine }
    }

    fn transfer(account_id: &str, amount: &str) -> TransferRequest {
        TransferRequest {
            wallet_id: "w1".into(),
            account_id: account_id.into(),
            to: addr(9),
            amount: amount.into(),
            fee_rate: Some("1".into()),
            extension: None,
            contract: None,
        }
    }

    fn ledger(dir: &TempDir) -> TxLedger {
        TxLedger::open(&dir.path().join("ledger.redb")).unwrap()
    }

    #[tokio::test]
    async fn transfer_runs_through_the_whole_pipeline() {
        let dir = TempDir::new().unwrap();
        let fx = fixture(&[50, 30], Some(ledger(&dir)));
        let engine = &fx.engine;

        let mut tx = engine.create_transaction(&transfer("a1", "60")).await.unwrap();
        assert_eq!(tx.inputs.len(), 2);
        assert!(tx.holds_lease());

        engine.sign_transaction("w1", "a1", "pw", &mut tx).await.unwrap();
        engine.verify_transaction("w1", "a1", &mut tx).await.unwrap();
        let record = engine.submit_transaction("w1", "a1", &mut tx).await.unwrap();

        assert_eq!(tx.status(), TxStatus::Submitted);
        assert!(!tx.holds_lease());
        assert_eq!(record.tx_id, tx.tx_id.clone().unwrap());
        assert_eq!(record.from, vec![addr(1), addr(2)]);
        assert_eq!(record.amount, "60");
        assert_eq!(record.fee, "2");
        assert_eq!(record.status, LedgerStatus::Pending);

        let listed = engine.list_submitted("w1", "a1", 10).unwrap();
        assert_eq!(listed, vec![record]);
    }

    #[tokio::test]
    async fn wrong_password_keeps_transaction_unsigned() {
        let fx = fixture(&[50, 30], None);
        let mut tx = fx.engine.create_transaction(&transfer("a1", "60")).await.unwrap();

        assert!(matches!(
            fx.engine.sign_transaction("w1", "a1", "nope", &mut tx).await,
            Err(EngineError::AuthenticationFailed)
        ));
        assert_eq!(tx.status(), TxStatus::Unsigned);
        assert!(tx.signatures.is_empty());
        assert!(tx.holds_lease());
    }

    #[tokio::test]
    async fn tampered_transaction_fails_verification_and_frees_account() {
        let fx = fixture(&[50, 30], None);
        let mut tx = fx.engine.create_transaction(&transfer("a1", "60")).await.unwrap();
        fx.engine.sign_transaction("w1", "a1", "pw", &mut tx).await.unwrap();

        tx.payload = TxPayload::NativeTransfer {
            to: addr(10),
            amount: tx.amount(),
        };
        assert!(matches!(
            fx.engine.verify_transaction("w1", "a1", &mut tx).await,
            Err(EngineError::SignatureMismatch(_))
        ));
        assert_eq!(tx.status(), TxStatus::Failed);
        assert!(tx.failure.is_some());

        fx.engine.create_transaction(&transfer("a1", "10")).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn one_transaction_per_account_in_flight() {
        let fx = fixture(&[50, 30], None);
        let first = fx.engine.create_transaction(&transfer("a1", "10")).await.unwrap();

        assert!(matches!(
            fx.engine.create_transaction(&transfer("a1", "10")).await,
            Err(EngineError::AccountBusy(_))
        ));

        // a different account is unaffected
        let other = fx.engine.create_transaction(&transfer("a2", "10")).await.unwrap();
        assert!(other.holds_lease());

        drop(first);
        fx.engine.create_transaction(&transfer("a1", "10")).await.unwrap();
    }

    #[tokio::test]
    async fn distinct_accounts_build_concurrently() {
        let fx = fixture(&[50, 30], None);
        let req_a = transfer("a1", "20");
        let req_b = transfer("a2", "20");

        let (a, b) = tokio::join!(
            fx.engine.create_transaction(&req_a),
            fx.engine.create_transaction(&req_b)
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(a.holds_lease() && b.holds_lease());
        assert!(a.inputs.iter().all(|i| i.address != b.inputs[0].address));
    }

    #[tokio::test(start_paused = true)]
    async fn summary_batch_holds_one_shared_lease() {
        let fx = fixture(&[10, 10, 10, 10], None);
        let request = SummaryRequest {
            wallet_id: "w1".into(),
            account_id: "a1".into(),
            summary_address: addr(9),
            min_transfer: String::new(),
            retained_balance: String::new(),
            fee_rate: Some("1".into()),
            start: 1,
            limit: 2,
            contract: None,
        };

        let batch = fx.engine.create_summary_transaction(&request).await.unwrap();
        assert_eq!(batch.examined, 2);
        assert_eq!(batch.transactions.len(), 2);
        assert_eq!(batch.transactions[0].inputs[0].address, addr(2));
        assert!(batch.transactions.iter().all(|t| t.holds_lease()));

        assert!(matches!(
            fx.engine.create_transaction(&transfer("a1", "5")).await,
            Err(EngineError::AccountBusy(_))
        ));

        let mut transactions = batch.transactions;
        let first = transactions.remove(0);
        drop(first);
        // the remaining sweep still holds the account
        assert!(matches!(
            fx.engine.create_transaction(&transfer("a1", "5")).await,
            Err(EngineError::AccountBusy(_))
        ));

        drop(transactions);
        fx.engine.create_transaction(&transfer("a1", "5")).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn submit_timeout_keeps_verified_and_retry_succeeds() {
        let fx = fixture(&[50, 30], None);
        let mut tx = fx.engine.create_transaction(&transfer("a1", "60")).await.unwrap();
        fx.engine.sign_transaction("w1", "a1", "pw", &mut tx).await.unwrap();
        fx.engine.verify_transaction("w1", "a1", &mut tx).await.unwrap();

        fx.chain.delay_broadcast(Duration::from_secs(60));
        assert!(matches!(
            fx.engine.submit_transaction("w1", "a1", &mut tx).await,
            Err(EngineError::SubmissionTimedOut(_))
        ));
        assert_eq!(tx.status(), TxStatus::Verified);
        assert!(tx.holds_lease());

        fx.chain.broadcast_accept();
        fx.engine.submit_transaction("w1", "a1", &mut tx).await.unwrap();
        assert_eq!(tx.status(), TxStatus::Submitted);
    }

    #[tokio::test]
    async fn cancelled_submission_never_broadcasts() {
        let fx = fixture(&[50, 30], None);
        let mut tx = fx.engine.create_transaction(&transfer("a1", "60")).await.unwrap();
        fx.engine.sign_transaction("w1", "a1", "pw", &mut tx).await.unwrap();
        fx.engine.verify_transaction("w1", "a1", &mut tx).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            fx.engine
                .submit_transaction_with_cancel("w1", "a1", &mut tx, &cancel)
                .await,
            Err(EngineError::Cancelled)
        ));
        assert_eq!(fx.chain.broadcast_count(), 0);
        assert_eq!(tx.status(), TxStatus::Verified);
    }

    #[tokio::test]
    async fn operations_check_transaction_ownership() {
        let fx = fixture(&[50, 30], None);
        let mut tx = fx.engine.create_transaction(&transfer("a1", "10")).await.unwrap();

        assert!(matches!(
            fx.engine.sign_transaction("w1", "a2", "pw2", &mut tx).await,
            Err(EngineError::AccountMismatch(_))
        ));
        assert_eq!(tx.status(), TxStatus::Unsigned);
    }

    #[tokio::test]
    async fn unknown_account_and_asset() {
        let fx = fixture(&[50], None);
        assert!(matches!(
            fx.engine.create_transaction(&transfer("missing", "1")).await,
            Err(EngineError::AccountNotFound(_))
        ));
        assert!(matches!(
            fx.engine.estimate_fee("BTC", None, None, None).await,
            Err(EngineError::UnsupportedAsset(_))
        ));
    }

    #[tokio::test]
    async fn balance_query_reports_unresolved_addresses() {
        let fx = fixture(&[50, 30], None);
        fx.chain.fail_address(&addr(2));

        let balance = fx.engine.get_account_balance("w1", "a1").await.unwrap();
        assert_eq!(balance.total, U256::from(50u64));
        assert!(balance.is_partial());
        assert!(matches!(
            balance.warning(),
            Some(EngineError::PartialBalanceResolution { .. })
        ));
    }

    #[tokio::test]
    async fn submission_invalidates_cached_balances() {
        let fx = fixture(&[50, 30], None);
        fx.engine.get_account_balance("w1", "a1").await.unwrap();
        assert!(fx.engine.cache.get(&addr(1), None).is_some());

        let mut tx = fx.engine.create_transaction(&transfer("a1", "10")).await.unwrap();
        fx.engine.sign_transaction("w1", "a1", "pw", &mut tx).await.unwrap();
        fx.engine.verify_transaction("w1", "a1", &mut tx).await.unwrap();
        fx.engine.submit_transaction("w1", "a1", &mut tx).await.unwrap();

        assert!(fx.engine.cache.get(&tx.inputs[0].address, None).is_none());
    }

    #[tokio::test]
    async fn confirmation_updates_the_ledger() {
        let dir = TempDir::new().unwrap();
        let fx = fixture(&[50], Some(ledger(&dir)));
        let mut tx = fx.engine.create_transaction(&transfer("a1", "10")).await.unwrap();
        fx.engine.sign_transaction("w1", "a1", "pw", &mut tx).await.unwrap();
        fx.engine.verify_transaction("w1", "a1", &mut tx).await.unwrap();
        let record = fx.engine.submit_transaction("w1", "a1", &mut tx).await.unwrap();

        assert_eq!(
            fx.engine.confirm_transaction("TEST", &record.tx_id, 1).await.unwrap(),
            ConfirmationStatus::Pending
        );

        fx.chain.set_receipt(TxReceipt {
            tx_hash: record.tx_id.clone(),
            block_number: 98,
            gas_used: 1,
            success: true,
        });
        fx.chain.set_block_height(100);

        assert_eq!(
            fx.engine.confirm_transaction("TEST", &record.tx_id, 5).await.unwrap(),
            ConfirmationStatus::Pending
        );
        assert_eq!(
            fx.engine.confirm_transaction("TEST", &record.tx_id, 3).await.unwrap(),
            ConfirmationStatus::Confirmed {
                block_number: 98,
                confirmations: 3
            }
        );

        let stored = fx.engine.ledger().unwrap().get(&record.wx_id).unwrap().unwrap();
        assert_eq!(stored.status, LedgerStatus::Confirmed);
        assert_eq!(stored.block_number, Some(98));
    }

    fn sweep(contract: Option<AssetContract>) -> SummaryRequest {
        SummaryRequest {
            wallet_id: "w1".into(),
            account_id: "a1".into(),
            summary_address: addr(9),
            min_transfer: String::new(),
            retained_balance: String::new(),
            fee_rate: Some("1".into()),
            start: 0,
            limit: 10,
            contract,
        }
    }

    async fn sign_verify_submit(
        engine: &SettlementEngine,
        tx: &mut RawTransaction,
    ) -> EngineResult<SubmittedTransaction> {
        engine.sign_transaction("w1", "a1", "pw", tx).await?;
        engine.verify_transaction("w1", "a1", tx).await?;
        engine.submit_transaction("w1", "a1", tx).await
    }

    #[tokio::test]
    async fn token_transfer_runs_through_the_whole_pipeline() {
        let dir = TempDir::new().unwrap();
        let fx = fixture(&[50, 30], Some(ledger(&dir)));
        fx.chain.set_token(&addr(1), 400);
        fx.chain.set_token(&addr(2), 300);

        let mut request = transfer("a1", "6");
        request.contract = Some(token());
        let mut tx = fx.engine.create_transaction(&request).await.unwrap();
        assert_eq!(tx.inputs.len(), 2);
        assert!(matches!(tx.payload, TxPayload::ContractCall { .. }));

        let record = sign_verify_submit(&fx.engine, &mut tx).await.unwrap();
        assert_eq!(tx.status(), TxStatus::Submitted);
        assert_eq!(record.amount, "6");
        assert_eq!(record.fee, "2");
        assert_eq!(record.leg_tx_ids.len(), 2);
        assert_eq!(record.contract_address, Some(token().key()));
        assert_eq!(fx.chain.broadcast_count(), 2);
        assert_eq!(fx.engine.list_submitted("w1", "a1", 10).unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn native_sweep_runs_through_the_whole_pipeline() {
        let dir = TempDir::new().unwrap();
        let fx = fixture(&[10, 20, 1], Some(ledger(&dir)));

        let batch = fx.engine.create_summary_transaction(&sweep(None)).await.unwrap();
        assert_eq!(batch.transactions.len(), 2);
        assert_eq!(batch.skipped.len(), 1);

        let mut records = Vec::new();
        for mut tx in batch.transactions {
            records.push(sign_verify_submit(&fx.engine, &mut tx).await.unwrap());
            assert_eq!(tx.status(), TxStatus::Submitted);
        }
        let amounts: Vec<_> = records.iter().map(|r| r.amount.as_str()).collect();
        assert_eq!(amounts, vec!["9", "19"]);
        assert!(records.iter().all(|r| r.to == addr(9) && r.from.len() == 1));
        assert_eq!(fx.engine.list_submitted("w1", "a1", 10).unwrap().len(), 2);

        // every sweep reached a terminal status, so the account is free
        fx.engine.create_transaction(&transfer("a1", "1")).await.unwrap();
    }

    #[tokio::test]
    async fn token_sweep_runs_through_the_whole_pipeline() {
        let dir = TempDir::new().unwrap();
        let fx = fixture(&[5, 5], Some(ledger(&dir)));
        fx.chain.set_token(&addr(1), 700);
        fx.chain.set_token(&addr(2), 250);

        let batch = fx
            .engine
            .create_summary_transaction(&sweep(Some(token())))
            .await
            .unwrap();
        assert_eq!(batch.transactions.len(), 2);

        for mut tx in batch.transactions {
            let record = sign_verify_submit(&fx.engine, &mut tx).await.unwrap();
            assert_eq!(record.contract_address, Some(token().key()));
            assert_eq!(record.fee, "1");
        }
        let mut amounts: Vec<_> = fx
            .engine
            .list_submitted("w1", "a1", 10)
            .unwrap()
            .into_iter()
            .map(|r| r.amount)
            .collect();
        amounts.sort();
        assert_eq!(amounts, vec!["2.5".to_string(), "7".to_string()]);
    }

    #[tokio::test]
    async fn summary_batch_reports_unresolved_addresses() {
        let fx = fixture(&[10, 10, 10], None);
        fx.chain.fail_address(&addr(2));

        let batch = fx.engine.create_summary_transaction(&sweep(None)).await.unwrap();
        assert_eq!(batch.transactions.len(), 2);
        let unresolved: Vec<_> = batch.unresolved().map(|s| s.address.clone()).collect();
        assert_eq!(unresolved, vec![addr(2)]);
    }

    #[tokio::test]
    async fn partial_submission_is_recorded_and_not_confirmed_as_complete() {
        let dir = TempDir::new().unwrap();
        let fx = fixture(&[50, 30], Some(ledger(&dir)));
        let mut tx = fx.engine.create_transaction(&transfer("a1", "60")).await.unwrap();
        fx.engine.sign_transaction("w1", "a1", "pw", &mut tx).await.unwrap();
        fx.engine.verify_transaction("w1", "a1", &mut tx).await.unwrap();

        fx.chain.accept_then_reject(1, "replacement transaction underpriced");
        let err = fx.engine.submit_transaction("w1", "a1", &mut tx).await.unwrap_err();
        let accepted = match &err {
            EngineError::PartiallySubmitted { accepted, reason } => {
                assert_eq!(reason, "replacement transaction underpriced");
                accepted.clone()
            }
            other => panic!("unexpected error: {other:?}"),
        };
        assert!(err.to_string().contains("do not rebuild"));
        assert_eq!(accepted.len(), 1);
        assert_eq!(tx.status(), TxStatus::Failed);
        assert!(!tx.holds_lease());

        let listed = fx.engine.list_submitted("w1", "a1", 10).unwrap();
        assert_eq!(listed.len(), 1);
        let record = &listed[0];
        assert_eq!(record.status, LedgerStatus::Partial);
        assert_eq!(record.tx_id, accepted[0]);
        assert_eq!(record.leg_tx_ids, accepted);
        assert_eq!(record.from, vec![addr(1), addr(2)]);

        // the accepted leg settles, the record stays partial
        fx.chain.set_receipt(TxReceipt {
            tx_hash: accepted[0].clone(),
            block_number: 100,
            gas_used: 1,
            success: true,
        });
        fx.engine.confirm_transaction("TEST", &accepted[0], 1).await.unwrap();
        let stored = fx.engine.ledger().unwrap().get(&record.wx_id).unwrap().unwrap();
        assert_eq!(stored.status, LedgerStatus::Partial);
        assert_eq!(stored.block_number, Some(100));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_stalled_leg_records_every_leg_once() {
        let dir = TempDir::new().unwrap();
        let fx = fixture(&[50, 30], Some(ledger(&dir)));
        let mut tx = fx.engine.create_transaction(&transfer("a1", "60")).await.unwrap();
        fx.engine.sign_transaction("w1", "a1", "pw", &mut tx).await.unwrap();
        fx.engine.verify_transaction("w1", "a1", &mut tx).await.unwrap();

        fx.chain.stall_after(1, Duration::from_secs(60));
        assert!(matches!(
            fx.engine.submit_transaction("w1", "a1", &mut tx).await,
            Err(EngineError::SubmissionTimedOut(_))
        ));
        assert_eq!(tx.leg_tx_ids.len(), 1);
        assert!(tx.holds_lease());

        let record = fx.engine.submit_transaction("w1", "a1", &mut tx).await.unwrap();
        assert_eq!(record.leg_tx_ids.len(), 2);
        let first_leg = &record.leg_tx_ids[0];
        let sent = fx.chain.broadcasts();
        assert_eq!(sent.iter().filter(|id| *id == first_leg).count(), 1);
    }

    #[tokio::test]
    async fn restored_transaction_cannot_reenter_the_pipeline() {
        let fx = fixture(&[50, 30], None);
        let mut tx = fx.engine.create_transaction(&transfer("a1", "60")).await.unwrap();

        let json = serde_json::to_string(&tx).unwrap();
        let mut restored: RawTransaction = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.id, tx.id);
        assert_eq!(restored.status(), TxStatus::Unsigned);
        assert!(!restored.holds_lease());
        assert!(matches!(
            fx.engine.sign_transaction("w1", "a1", "pw", &mut restored).await,
            Err(EngineError::LeaseNotHeld(_))
        ));
        assert!(restored.signatures.is_empty());

        fx.engine.sign_transaction("w1", "a1", "pw", &mut tx).await.unwrap();
        let mut restored: RawTransaction =
            serde_json::from_str(&serde_json::to_string(&tx).unwrap()).unwrap();
        assert_eq!(restored.status(), TxStatus::Signed);
        assert!(matches!(
            fx.engine.verify_transaction("w1", "a1", &mut restored).await,
            Err(EngineError::LeaseNotHeld(_))
        ));

        fx.engine.verify_transaction("w1", "a1", &mut tx).await.unwrap();
        let mut restored: RawTransaction =
            serde_json::from_str(&serde_json::to_string(&tx).unwrap()).unwrap();
        assert!(matches!(
            fx.engine.submit_transaction("w1", "a1", &mut restored).await,
            Err(EngineError::LeaseNotHeld(_))
        ));
        assert_eq!(restored.status(), TxStatus::Verified);
        assert_eq!(fx.chain.broadcast_count(), 0);

        // the original still owns the account and completes normally
        fx.engine.submit_transaction("w1", "a1", &mut tx).await.unwrap();
    }

    #[test]
    fn registry_keys_are_case_insensitive() {
        let chain = Arc::new(MockChain::new());
        let mut registry = AdapterRegistry::new();
        registry.register(
            "avax",
            AssetAdapter::new(Arc::new(EvmCodec::new(network())), chain.clone(), chain),
        );
        assert!(registry.get("AVAX").is_ok());
        assert!(registry.get("Avax").is_ok());
        assert!(matches!(
            registry.get("ETH"),
            Err(EngineError::UnsupportedAsset(_))
        ));
        assert_eq!(registry.symbols(), vec!["AVAX".to_string()]);
    }
}
