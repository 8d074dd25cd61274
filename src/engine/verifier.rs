// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Verifier.
//!
//! Checks run in order, cheapest first:
//!
//! 1. Payload consistency (spends, fees, gas limit, call data)
//! 2. One signature per input
//! 3. Each signature recovers to its input's address
//! 4. Live balances still cover every leg
//!
//! A failed check marks the transaction `failed`. A chain outage during the
//! balance re-check is not a verdict: the transaction stays `signed` and the
//! call may be repeated.

use alloy::primitives::U256;

use super::balance::BalanceResolver;
use super::fee::FeeEstimate;
use super::ports::ChainQuery;
use crate::blockchain::TransactionCodec;
use crate::error::{EngineError, EngineResult};
use crate::models::{normalize_address, RawTransaction, TxPayload, TxStatus};
use crate::storage::BalanceCache;

pub struct Verifier<'a> {
    chain: &'a dyn ChainQuery,
    codec: &'a dyn TransactionCodec,
    cache: &'a BalanceCache,
}

impl<'a> Verifier<'a> {
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

    pub async fn verify(&self, tx: &mut RawTransaction) -> EngineResult<()> {
        tx.require_status(TxStatus::Signed)?;

        let verdict = match self.check_structure(tx) {
            Ok(()) => self.check_balances(tx).await,
            Err(e) => Err(e),
        };

        match verdict {
            Ok(()) => {
                tx.advance(TxStatus::Verified)?;
                tracing::info!(tx = %tx.id, "Transaction verified");
                Ok(())
            }
            Err(e @ EngineError::Chain(_)) => {
                tracing::warn!(tx = %tx.id, error = %e, "Balance re-check unavailable");
                Err(e)
            }
            Err(e) => {
                tracing::warn!(tx = %tx.id, error = %e, "Verification failed");
                tx.fail(e.to_string());
                Err(e)
            }
        }
    }

    /// Everything that can be checked without the chain.
    fn check_structure(&self, tx: &RawTransaction) -> EngineResult<()> {
        if tx.inputs.is_empty() {
            return Err(EngineError::SignatureMismatch("transaction has no inputs".into()));
        }

        let to = self.codec.validate_address(tx.to())?;
        if to != normalize_address(tx.to()) {
            return Err(EngineError::SignatureMismatch(format!(
                "destination {} is not canonical",
                tx.to()
            )));
        }

        let spent = tx.inputs.iter().fold(U256::ZERO, |acc, i| acc + i.spend);
        if spent != tx.amount() {
            return Err(EngineError::SignatureMismatch(format!(
                "inputs spend {spent} but payload moves {}",
                tx.amount()
            )));
        }

        let gas_limit = self.codec.gas_limit(tx.contract(), tx.extension.as_deref());
        let expected = FeeEstimate::new(tx.fee_rate, gas_limit);
        if tx.gas_limit != gas_limit
            || tx.inputs.iter().any(|i| i.fee != expected.fee)
            || tx.fee != expected.total(tx.inputs.len())
        {
            return Err(EngineError::SignatureMismatch(
                "fee fields are inconsistent with the fee rate".into(),
            ));
        }

        match &tx.payload {
            TxPayload::NativeTransfer { .. } => {}
            TxPayload::ContractCall {
                contract,
                to,
                amount,
                data,
            } => {
                let expected = self.codec.encode_contract_call(contract, to, *amount)?;
                if &expected != data {
                    return Err(EngineError::SignatureMismatch(
                        "contract call data does not match recipient and amount".into(),
                    ));
                }
            }
        }

        let signed = tx
            .inputs
            .iter()
            .filter(|i| tx.signatures.contains_key(&normalize_address(&i.address)))
            .count();
        if signed != tx.inputs.len() {
            return Err(EngineError::IncompleteSignatures {
                expected: tx.inputs.len(),
                actual: signed,
            });
        }

        for input in &tx.inputs {
            let claimed = normalize_address(&input.address);
            let digest = self.codec.signing_digest(tx, input)?;
            let signature = tx
                .signatures
                .get(&claimed)
                .ok_or_else(|| EngineError::SignatureMismatch(format!("{claimed} unsigned")))?;
            let recovered = self
                .codec
                .recover_signer(&digest, signature)
                .map_err(|e| EngineError::SignatureMismatch(format!("{claimed}: {e}")))?;
            if recovered != claimed {
                return Err(EngineError::SignatureMismatch(format!(
                    "signature for {claimed} recovers to {recovered}"
                )));
            }
        }

        Ok(())
    }

    /// Live balances must still cover every leg.
    async fn check_balances(&self, tx: &RawTransaction) -> EngineResult<()> {
        let resolver = BalanceResolver::new(self.chain, self.cache);
        let contract = tx.contract();

        for input in &tx.inputs {
            let funds = resolver.address_funds(&input.address, contract).await?;
            let (required, available) = match contract {
                Some(_) if funds.native_balance < input.fee => (input.fee, funds.native_balance),
                Some(_) => (input.spend, funds.balance),
                None => (input.spend.saturating_add(input.fee), funds.balance),
            };
            if available < required {
                return Err(EngineError::InsufficientBalance {
                    required,
                    available,
                });
            }
        }
        Ok(())
    }
}
