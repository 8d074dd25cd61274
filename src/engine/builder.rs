// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transaction Builder.
//!
//! Building happens in two steps. [`TransactionBuilder::prepare`] validates
//! the request (destination, amount, fee rate) without touching the account
//! lock. [`TransactionBuilder::build`] runs under the account lease: it
//! re-reads balances, selects inputs, assigns nonces and assembles the
//! unsigned transaction.

use alloy::primitives::U256;

use super::balance::BalanceResolver;
use super::fee::{FeeEstimate, FeeEstimator};
use super::ports::ChainQuery;
use super::selector::{select_inputs, NonceSelector};
use crate::blockchain::{parse_amount, TransactionCodec};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    normalize_address, Account, AssetContract, InputSelection, RawTransaction, TransferRequest,
    TxPayload, WalletAddress,
};
use crate::storage::BalanceCache;

/// A validated transfer request.
#[derive(Debug, Clone)]
pub struct TransferPlan {
    /// Canonical destination
    pub to: String,
    /// Amount in minor units of the transferred asset
    pub amount: U256,
    pub fee: FeeEstimate,
    pub extension: Option<String>,
    pub contract: Option<AssetContract>,
}

/// Decimals of the asset being moved.
pub(crate) fn asset_decimals(codec: &dyn TransactionCodec, contract: Option<&AssetContract>) -> u8 {
    contract
        .map(|c| c.decimals)
        .unwrap_or(codec.network().native_decimals)
}

/// Validate a destination address through the codec.
pub(crate) fn validate_destination(codec: &dyn TransactionCodec, to: &str) -> EngineResult<String> {
    codec
        .validate_address(to)
        .map_err(|e| EngineError::InvalidDestination(format!("{to}: {e}")))
}

/// Build the payload and the unsigned transaction.
///
/// Shared by single transfers and summary sweeps so both encode identically.
#[allow(clippy::too_many_arguments)]
pub(crate) fn assemble(
    codec: &dyn TransactionCodec,
    account: &Account,
    inputs: Vec<InputSelection>,
    to: &str,
    amount: U256,
    contract: Option<&AssetContract>,
    fee: &FeeEstimate,
    extension: Option<String>,
) -> EngineResult<RawTransaction> {
    let payload = match contract {
        Some(contract) => TxPayload::ContractCall {
            contract: contract.clone(),
            to: to.to_string(),
            amount,
            data: codec.encode_contract_call(contract, to, amount)?,
        },
        None => TxPayload::NativeTransfer {
            to: to.to_string(),
            amount,
        },
    };

    Ok(RawTransaction::new_unsigned(
        account.clone(),
        inputs,
        payload,
        fee.fee_rate,
        fee.gas_limit,
        extension,
    ))
}

pub struct TransactionBuilder<'a> {
    chain: &'a dyn ChainQuery,
    codec: &'a dyn TransactionCodec,
    cache: &'a BalanceCache,
}

impl<'a> TransactionBuilder<'a> {
    pub fn new(
        chain: &'a dyn ChainQuery,
        codec: &'a dyn TransactionCodec,
        cache: &'a BalanceCache,
    ) -> Self {
        Self {
            chain,
            codec,
            cache,
        }
    }

    /// Validate the request and estimate its per-leg fee.
    pub async fn prepare(&self, request: &TransferRequest) -> EngineResult<TransferPlan> {
        let to = validate_destination(self.codec, &request.to)?;

        let contract = request.contract.as_ref();
        let decimals = asset_decimals(self.codec, contract);
        let amount = parse_amount(&request.amount, decimals)
            .map_err(|e| EngineError::InvalidAmount(format!("{}: {e}", request.amount)))?;
        if amount.is_zero() {
            return Err(EngineError::InvalidAmount("amount must be positive".to_string()));
        }

        let extension = request.extension.clone().filter(|e| !e.is_empty());
        let fee = FeeEstimator::new(self.chain, self.codec)
            .estimate(request.fee_rate.as_deref(), contract, extension.as_deref())
            .await?;

        Ok(TransferPlan {
            to,
            amount,
            fee,
            extension,
            contract: request.contract.clone(),
        })
    }

    /// Select inputs from freshly read balances and assemble the transaction.
    pub async fn build(
        &self,
        account: &Account,
        addresses: &[WalletAddress],
        plan: &TransferPlan,
    ) -> EngineResult<RawTransaction> {
        let own = addresses
            .iter()
            .any(|a| normalize_address(&a.address) == plan.to);
        if own && !self.codec.allows_self_transfer() {
            return Err(EngineError::InvalidDestination(format!(
                "{}: self-transfer not allowed on {}",
                plan.to,
                self.codec.network().name
            )));
        }

        let contract = plan.contract.as_ref();
        let fresh = BalanceResolver::new(self.chain, self.cache)
            .resolve_fresh(addresses, contract)
            .await;
        if !fresh.unresolved.is_empty() {
            tracing::warn!(
                wallet_id = %account.wallet_id,
                account_id = %account.account_id,
                unresolved = fresh.unresolved.len(),
                "Excluding unresolved addresses from selection"
            );
        }

        let mut inputs = select_inputs(&fresh.funds, plan.amount, plan.fee.fee, contract.is_some())?;
        NonceSelector::new(self.chain).assign(&mut inputs).await?;

        let tx = assemble(
            self.codec,
            account,
            inputs,
            &plan.to,
            plan.amount,
            contract,
            &plan.fee,
            plan.extension.clone(),
        )?;

        tracing::info!(
            wallet_id = %account.wallet_id,
            account_id = %account.account_id,
            tx = %tx.id,
            inputs = tx.inputs.len(),
            amount = %plan.amount,
            fee = %tx.fee,
            "Transaction built"
        );
        Ok(tx)
    }
}
