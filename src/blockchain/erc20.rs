// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! ERC-20 token contract interactions.

use std::str::FromStr;

use alloy::{
    primitives::{Address, Bytes, U256},
    providers::Provider,
    sol,
    sol_types::SolCall,
};

use crate::engine::ports::ChainError;

// Define the ERC-20 interface using alloy's sol! macro
sol! {
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function transfer(address to, uint256 amount) external returns (bool);
    }
}

/// ABI-encode `transfer(to, amount)`.
pub fn encode_transfer(to: Address, amount: U256) -> Bytes {
    IERC20::transferCall { to, amount }.abi_encode().into()
}

/// ERC-20 contract wrapper.
pub struct Erc20Contract<P> {
    contract: IERC20::IERC20Instance<P>,
}

impl<P: Provider + Clone> Erc20Contract<P> {
    /// Create a new ERC-20 contract instance.
    pub fn new(provider: &P, contract_address: &str) -> Result<Self, ChainError> {
        let address = Address::from_str(contract_address.trim())
            .map_err(|e| ChainError::InvalidAddress(e.to_string()))?;

        let contract = IERC20::new(address, provider.clone());

        Ok(Self { contract })
    }

    /// Get the raw balance of an address.
    pub async fn balance_of(&self, wallet_address: &str) -> Result<U256, ChainError> {
        let addr = Address::from_str(wallet_address.trim())
            .map_err(|e| ChainError::InvalidAddress(e.to_string()))?;

        self.contract
            .balanceOf(addr)
            .call()
            .await
            .map_err(|e| ChainError::Contract(e.to_string()))
    }
}
