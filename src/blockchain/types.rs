// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Blockchain types and constants.

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};

/// Gas units charged per payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasSchedule {
    /// Plain native transfer
    pub native_transfer: u64,
    /// ERC-20 `transfer(to, amount)` call
    pub token_transfer: u64,
    /// Extra gas per byte of memo data on a native transfer
    pub per_memo_byte: u64,
}

impl GasSchedule {
    /// Ethereum-style defaults.
    pub const STANDARD: GasSchedule = GasSchedule {
        native_transfer: 21_000,
        token_transfer: 65_000,
        per_memo_byte: 68,
    };
}

/// EVM network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network name for display
    pub name: String,
    /// EIP-155 chain ID
    pub chain_id: u64,
    /// RPC endpoint URL
    pub rpc_url: String,
    /// Block explorer URL
    pub explorer_url: String,
    /// Native coin symbol; also the adapter registry key
    pub native_symbol: String,
    pub native_decimals: u8,
    /// Lowest accepted explicit fee rate, in minor units per gas
    pub min_fee_rate: U256,
    /// Highest accepted explicit fee rate, in minor units per gas
    pub max_fee_rate: U256,
    pub gas: GasSchedule,
    /// Whether a source address may also be the destination
    pub allow_self_transfer: bool,
}

impl NetworkConfig {
    /// Avalanche C-Chain Mainnet configuration.
    pub fn avalanche_mainnet() -> Self {
        Self {
            name: "Avalanche C-Chain".to_string(),
            chain_id: 43114,
            rpc_url: "https://api.avax.network/ext/bc/C/rpc".to_string(),
            explorer_url: "https://snowtrace.io".to_string(),
            native_symbol: "AVAX".to_string(),
            native_decimals: 18,
            min_fee_rate: U256::from(1_000_000_000u64),
            max_fee_rate: U256::from(1_000_000_000_000u64),
            gas: GasSchedule::STANDARD,
            allow_self_transfer: true,
        }
    }

    /// Avalanche Fuji Testnet configuration.
    pub fn avalanche_fuji() -> Self {
        Self {
            name: "Avalanche Fuji Testnet".to_string(),
            chain_id: 43113,
            rpc_url: "https://api.avax-test.network/ext/bc/C/rpc".to_string(),
            explorer_url: "https://testnet.snowtrace.io".to_string(),
            ..Self::avalanche_mainnet()
        }
    }

    /// Parsed RPC endpoint.
    pub fn rpc_endpoint(&self) -> Result<url::Url, url::ParseError> {
        self.rpc_url.parse()
    }

    /// Explorer link for a transaction.
    pub fn explorer_tx_url(&self, tx_id: &str) -> String {
        format!("{}/tx/{}", self.explorer_url.trim_end_matches('/'), tx_id)
    }
}

/// Transaction receipt summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    /// Transaction hash
    pub tx_hash: String,
    /// Block number where the transaction was included
    pub block_number: u64,
    /// Gas used
    pub gas_used: u64,
    /// Whether the transaction succeeded
    pub success: bool,
}
