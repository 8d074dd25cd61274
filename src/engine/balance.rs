// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Balance Resolver.
//!
//! Reads the balance of every address of an account, one address at a time.
//! An unreachable address never aborts the aggregate: it is listed as
//! unresolved and contributes its last cached value, if any.

use alloy::primitives::U256;

use super::ports::{ChainError, ChainQuery};
use crate::models::{
    normalize_address, Account, AccountBalance, AddressBalance, AssetContract, UnresolvedAddress,
    WalletAddress,
};
use crate::storage::BalanceCache;

/// Funds of one address as needed to spend from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressFunds {
    pub address: String,
    /// Balance of the asset being moved
    pub balance: U256,
    /// Native balance (pays the fee); equals `balance` for native assets
    pub native_balance: U256,
}

/// Fresh chain reads for a set of addresses, no cached fallbacks.
#[derive(Debug, Default)]
pub struct FreshBalances {
    /// Resolved addresses, in the order given
    pub funds: Vec<AddressFunds>,
    pub unresolved: Vec<UnresolvedAddress>,
}

pub struct BalanceResolver<'a> {
    chain: &'a dyn ChainQuery,
    cache: &'a BalanceCache,
}

impl<'a> BalanceResolver<'a> {
    pub fn new(chain: &'a dyn ChainQuery, cache: &'a BalanceCache) -> Self {
        Self { chain, cache }
    }

    async fn asset_balance(
        &self,
        address: &str,
        contract: Option<&AssetContract>,
    ) -> Result<U256, ChainError> {
        let balance = match contract {
            Some(contract) => self.chain.token_balance(address, contract).await?,
            None => self.chain.native_balance(address).await?,
        };
        self.cache
            .put(address, contract.map(|c| c.address.as_str()), balance);
        Ok(balance)
    }

    /// Read the asset and (for tokens) native balance of one address.
    pub async fn address_funds(
        &self,
        address: &str,
        contract: Option<&AssetContract>,
    ) -> Result<AddressFunds, ChainError> {
        let balance = self.asset_balance(address, contract).await?;
        let native_balance = match contract {
            Some(_) => self.asset_balance(address, None).await?,
            None => balance,
        };
        Ok(AddressFunds {
            address: normalize_address(address),
            balance,
            native_balance,
        })
    }

    /// Fresh funds of every address; failures are reported, never assumed zero.
    pub async fn resolve_fresh(
        &self,
        addresses: &[WalletAddress],
        contract: Option<&AssetContract>,
    ) -> FreshBalances {
        let mut fresh = FreshBalances::default();
        for wallet_address in addresses {
            match self.address_funds(&wallet_address.address, contract).await {
                Ok(funds) => fresh.funds.push(funds),
                Err(e) => fresh.unresolved.push(UnresolvedAddress {
                    address: normalize_address(&wallet_address.address),
                    error: e.to_string(),
                }),
            }
        }
        fresh
    }

    /// Aggregate balance of an account for one asset.
    pub async fn account_balance(
        &self,
        account: &Account,
        addresses: &[WalletAddress],
        contract: Option<&AssetContract>,
        native_decimals: u8,
    ) -> AccountBalance {
        let mut total = U256::ZERO;
        let mut balances = Vec::with_capacity(addresses.len());
        let mut unresolved = Vec::new();

        for wallet_address in addresses {
            let address = normalize_address(&wallet_address.address);
            match self.asset_balance(&address, contract).await {
                Ok(balance) => {
                    total += balance;
                    balances.push(AddressBalance {
                        address,
                        balance,
                        stale: false,
                    });
                }
                Err(e) => {
                    // best-known value
                    if let Some(cached) =
                        self.cache.get(&address, contract.map(|c| c.address.as_str()))
                    {
                        total += cached;
                        balances.push(AddressBalance {
                            address: address.clone(),
                            balance: cached,
                            stale: true,
                        });
                    }
                    unresolved.push(UnresolvedAddress {
                        address,
                        error: e.to_string(),
                    });
                }
            }
        }

        let result = AccountBalance {
            wallet_id: account.wallet_id.clone(),
            account_id: account.account_id.clone(),
            symbol: contract
                .map(|c| c.token.clone())
                .unwrap_or_else(|| account.symbol.clone()),
            contract_address: contract.map(|c| normalize_address(&c.address)),
            decimals: contract.map(|c| c.decimals).unwrap_or(native_decimals),
            total,
            balances,
            unresolved,
        };

        if let Some(warning) = result.warning() {
            tracing::warn!(
                wallet_id = %account.wallet_id,
                account_id = %account.account_id,
                unresolved = ?result.unresolved.iter().map(|u| &u.address).collect::<Vec<_>>(),
                "{}",
                warning
            );
        }
        result
    }
}
