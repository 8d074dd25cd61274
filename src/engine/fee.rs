// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fee Estimator.

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};

use super::ports::ChainQuery;
use crate::blockchain::{parse_amount, TransactionCodec};
use crate::error::{EngineError, EngineResult};
use crate::models::AssetContract;

/// Fee parameters of one leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimate {
    /// Native minor units per gas
    pub fee_rate: U256,
    pub gas_limit: u64,
    /// `fee_rate × gas_limit`, paid by every leg
    pub fee: U256,
}

impl FeeEstimate {
    pub fn new(fee_rate: U256, gas_limit: u64) -> Self {
        Self {
            fee_rate,
            gas_limit,
            fee: fee_rate.saturating_mul(U256::from(gas_limit)),
        }
    }

    /// Total fee for `legs` legs.
    pub fn total(&self, legs: usize) -> U256 {
        self.fee.saturating_mul(U256::from(legs))
    }
}

pub struct FeeEstimator<'a> {
    chain: &'a dyn ChainQuery,
    codec: &'a dyn TransactionCodec,
}

impl<'a> FeeEstimator<'a> {
    pub fn new(chain: &'a dyn ChainQuery, codec: &'a dyn TransactionCodec) -> Self {
        Self { chain, codec }
    }

    /// Validate an explicit rate given in native display units per gas.
    pub fn parse_rate(&self, raw: &str) -> EngineResult<U256> {
        let network = self.codec.network();
        let rate = parse_amount(raw, network.native_decimals)
            .map_err(|e| EngineError::InvalidFeeRate(format!("{raw}: {e}")))?;

        if rate.is_zero() {
            return Err(EngineError::InvalidFeeRate(format!("{raw}: must be positive")));
        }
        if rate < network.min_fee_rate || rate > network.max_fee_rate {
            return Err(EngineError::InvalidFeeRate(format!(
                "{raw}: outside [{}, {}]",
                network.min_fee_rate, network.max_fee_rate
            )));
        }
        Ok(rate)
    }

    /// Resolve the fee rate: explicit when supplied, the chain's recommendation otherwise.
    pub async fn fee_rate(&self, explicit: Option<&str>) -> EngineResult<U256> {
        match explicit.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => self.parse_rate(raw),
            None => {
                let rate = self.chain.gas_price().await.map_err(|e| {
                    tracing::warn!(error = %e, "Fee rate query failed");
                    EngineError::FeeQueryUnavailable(e.to_string())
                })?;
                if rate.is_zero() {
                    return Err(EngineError::FeeQueryUnavailable(
                        "chain reported a zero fee rate".to_string(),
                    ));
                }
                Ok(rate)
            }
        }
    }

    pub async fn estimate(
        &self,
        explicit: Option<&str>,
        contract: Option<&AssetContract>,
        extension: Option<&str>,
    ) -> EngineResult<FeeEstimate> {
        let fee_rate = self.fee_rate(explicit).await?;
        let gas_limit = self.codec.gas_limit(contract, extension);
        Ok(FeeEstimate::new(fee_rate, gas_limit))
    }
}
