// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Input and nonce selection.
//!
//! Inputs are picked greedily: largest balance first, ties broken by address,
//! so identical chain state always yields the same selection. Every selected
//! address becomes its own leg and pays its own fee in the native coin.

use alloy::primitives::U256;

use super::balance::AddressFunds;
use super::ports::ChainQuery;
use crate::error::{EngineError, EngineResult};
use crate::models::InputSelection;

/// What a single address can contribute to the transfer after paying its fee.
fn usable(funds: &AddressFunds, leg_fee: U256, is_token: bool) -> U256 {
    if is_token {
        if funds.native_balance >= leg_fee {
            funds.balance
        } else {
            U256::ZERO
        }
    } else {
        funds.balance.saturating_sub(leg_fee)
    }
}

/// Pick inputs covering `amount`, each paying `leg_fee`.
///
/// Nonces are left at zero; see [`NonceSelector`].
pub fn select_inputs(
    candidates: &[AddressFunds],
    amount: U256,
    leg_fee: U256,
    is_token: bool,
) -> EngineResult<Vec<InputSelection>> {
    let mut ordered: Vec<&AddressFunds> = candidates.iter().collect();
    ordered.sort_by(|a, b| {
        b.balance
            .cmp(&a.balance)
            .then_with(|| a.address.cmp(&b.address))
    });

    let mut remaining = amount;
    let mut inputs = Vec::new();
    for funds in ordered {
        if remaining.is_zero() {
            break;
        }
        let available = usable(funds, leg_fee, is_token);
        if available.is_zero() {
            continue;
        }
        let spend = available.min(remaining);
        remaining -= spend;
        inputs.push(InputSelection {
            address: funds.address.clone(),
            balance: funds.balance,
            native_balance: funds.native_balance,
            spend,
            fee: leg_fee,
            nonce: 0,
        });
    }

    if !remaining.is_zero() {
        let legs = U256::from(inputs.len().max(1));
        let (required, available) = if is_token {
            (
                amount,
                candidates
                    .iter()
                    .fold(U256::ZERO, |acc, f| acc + usable(f, leg_fee, true)),
            )
        } else {
            (
                amount.saturating_add(leg_fee.saturating_mul(legs)),
                candidates.iter().fold(U256::ZERO, |acc, f| acc + f.balance),
            )
        };
        return Err(EngineError::InsufficientBalance {
            required,
            available,
        });
    }

    Ok(inputs)
}

/// Assigns the next unused nonce to every input.
pub struct NonceSelector<'a> {
    chain: &'a dyn ChainQuery,
}

impl<'a> NonceSelector<'a> {
    pub fn new(chain: &'a dyn ChainQuery) -> Self {
        Self { chain }
    }

    pub async fn assign(&self, inputs: &mut [InputSelection]) -> EngineResult<()> {
        for input in inputs.iter_mut() {
            input.nonce = self.chain.next_nonce(&input.address).await?;
        }
        Ok(())
    }
}
