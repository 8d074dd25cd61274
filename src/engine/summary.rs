// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Summary Planner.
//!
//! Consolidates surplus funds from a page of an account's addresses onto one
//! summary address. Each sweep is a single-source transaction encoded through
//! the same path as an ordinary transfer.

use alloy::primitives::U256;

use super::balance::BalanceResolver;
use super::builder::{asset_decimals, assemble, validate_destination};
use super::fee::{FeeEstimate, FeeEstimator};
use super::ports::ChainQuery;
use crate::blockchain::{parse_threshold, TransactionCodec};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    normalize_address, Account, AssetContract, InputSelection, RawTransaction, SkipReason,
    SkippedAddress, SummaryRequest, WalletAddress,
};
use crate::storage::BalanceCache;

/// A validated summary request.
#[derive(Debug, Clone)]
pub struct SummaryPlan {
    pub summary_address: String,
    pub min_transfer: U256,
    pub retained_balance: U256,
    pub fee: FeeEstimate,
    pub start: usize,
    pub limit: usize,
    pub contract: Option<AssetContract>,
}

/// Sweeps and skips for one page.
#[derive(Debug, Default)]
pub struct PlannedPage {
    pub transactions: Vec<RawTransaction>,
    pub skipped: Vec<SkippedAddress>,
    pub examined: usize,
}

pub struct SummaryPlanner<'a> {
    chain: &'a dyn ChainQuery,
    codec: &'a dyn TransactionCodec,
    cache: &'a BalanceCache,
}

impl<'a> SummaryPlanner<'a> {
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

    pub async fn prepare(&self, request: &SummaryRequest) -> EngineResult<SummaryPlan> {
        let summary_address = validate_destination(self.codec, &request.summary_address)?;

        let contract = request.contract.as_ref();
        let decimals = asset_decimals(self.codec, contract);
        let min_transfer = parse_threshold(&request.min_transfer, decimals).map_err(|e| {
            EngineError::InvalidAmount(format!("min transfer {}: {e}", request.min_transfer))
        })?;
        let retained_balance = parse_threshold(&request.retained_balance, decimals).map_err(|e| {
            EngineError::InvalidAmount(format!(
                "retained balance {}: {e}",
                request.retained_balance
            ))
        })?;

        let fee = FeeEstimator::new(self.chain, self.codec)
            .estimate(request.fee_rate.as_deref(), contract, None)
            .await?;

        Ok(SummaryPlan {
            summary_address,
            min_transfer,
            retained_balance,
            fee,
            start: request.start,
            limit: request.limit,
            contract: request.contract.clone(),
        })
    }

    /// Examine `addresses[start..start + limit]` in derivation order.
    pub async fn plan(
        &self,
        account: &Account,
        addresses: &[WalletAddress],
        plan: &SummaryPlan,
    ) -> EngineResult<PlannedPage> {
        let resolver = BalanceResolver::new(self.chain, self.cache);
        let contract = plan.contract.as_ref();
        let fee = plan.fee.fee;
        let mut page = PlannedPage::default();

        let mut ordered: Vec<&WalletAddress> = addresses.iter().collect();
        ordered.sort_by_key(|a| a.index);

        for wallet_address in ordered.into_iter().skip(plan.start).take(plan.limit) {
            page.examined += 1;
            let address = normalize_address(&wallet_address.address);

            let mut skip = |reason: SkipReason| {
                tracing::debug!(address = %address, ?reason, "Summary skip");
                page.skipped.push(SkippedAddress {
                    address: address.clone(),
                    reason,
                });
            };

            if address == plan.summary_address {
                skip(SkipReason::SummaryAddress);
                continue;
            }

            let funds = match resolver.address_funds(&address, contract).await {
                Ok(funds) => funds,
                Err(e) => {
                    skip(SkipReason::Unresolved {
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            let transferable = funds.balance.saturating_sub(plan.retained_balance);
            if transferable.is_zero() || transferable < plan.min_transfer {
                skip(SkipReason::BelowMinimum { transferable });
                continue;
            }

            let spend = match contract {
                Some(_) if funds.native_balance < fee => None,
                Some(_) => Some(transferable),
                None if transferable <= fee => None,
                None => Some(transferable - fee),
            };
            let Some(spend) = spend else {
                skip(SkipReason::InsufficientFee {
                    native_balance: funds.native_balance,
                    fee,
                });
                continue;
            };

            let nonce = match self.chain.next_nonce(&address).await {
                Ok(nonce) => nonce,
                Err(e) => {
                    skip(SkipReason::Unresolved {
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            let input = InputSelection {
                address: address.clone(),
                balance: funds.balance,
                native_balance: funds.native_balance,
                spend,
                fee,
                nonce,
            };
            let tx = assemble(
                self.codec,
                account,
                vec![input],
                &plan.summary_address,
                spend,
                contract,
                &plan.fee,
                None,
            )?;
            page.transactions.push(tx);
        }

        tracing::info!(
            wallet_id = %account.wallet_id,
            account_id = %account.account_id,
            start = plan.start,
            examined = page.examined,
            sweeps = page.transactions.len(),
            skipped = page.skipped.len(),
            "Summary page planned"
        );
        Ok(page)
    }
}
