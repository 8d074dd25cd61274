// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! EVM JSON-RPC client implementing the engine's chain capabilities.

use std::str::FromStr;

use alloy::{
    network::Ethereum,
    primitives::{Address, B256, U256},
    providers::{
        fillers::{BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller},
        Identity, Provider, ProviderBuilder, RootProvider,
    },
};
use async_trait::async_trait;

use super::codec::SignedLeg;
use super::erc20::Erc20Contract;
use super::types::{NetworkConfig, TxReceipt};
use crate::engine::ports::{BroadcastError, Broadcaster, ChainError, ChainQuery};
use crate::models::AssetContract;

/// HTTP provider type (with all fillers).
type HttpProvider = FillProvider<
    JoinFill<
        Identity,
        JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
    >,
    RootProvider<Ethereum>,
>;

/// EVM chain client.
pub struct EvmRpcClient {
    /// Network configuration
    network: NetworkConfig,
    /// Alloy HTTP provider
    provider: HttpProvider,
}

impl EvmRpcClient {
    /// Create a new client for the specified network.
    pub fn new(network: NetworkConfig) -> Result<Self, ChainError> {
        let url = network
            .rpc_endpoint()
            .map_err(|e| ChainError::InvalidRpcUrl(e.to_string()))?;

        let provider = ProviderBuilder::new().connect_http(url);

        Ok(Self { network, provider })
    }

    /// Get the network configuration.
    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    fn parse_address(address: &str) -> Result<Address, ChainError> {
        Address::from_str(address.trim()).map_err(|e| ChainError::InvalidAddress(e.to_string()))
    }
}

#[async_trait]
impl ChainQuery for EvmRpcClient {
    async fn native_balance(&self, address: &str) -> Result<U256, ChainError> {
        let addr = Self::parse_address(address)?;
        self.provider
            .get_balance(addr)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))
    }

    async fn token_balance(
        &self,
        address: &str,
        contract: &AssetContract,
    ) -> Result<U256, ChainError> {
        Erc20Contract::new(&self.provider, &contract.address)?
            .balance_of(address)
            .await
    }

    async fn gas_price(&self) -> Result<U256, ChainError> {
        self.provider
            .get_gas_price()
            .await
            .map(U256::from)
            .map_err(|e| ChainError::Rpc(e.to_string()))
    }

    async fn next_nonce(&self, address: &str) -> Result<u64, ChainError> {
        let addr = Self::parse_address(address)?;
        self.provider
            .get_transaction_count(addr)
            .pending()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))
    }

    async fn block_height(&self) -> Result<u64, ChainError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))
    }

    async fn transaction_receipt(&self, tx_id: &str) -> Result<Option<TxReceipt>, ChainError> {
        let hash = B256::from_str(tx_id.trim())
            .map_err(|e| ChainError::InvalidTxId(format!("{tx_id}: {e}")))?;

        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| ChainError::Rpc(format!("Failed to get receipt: {}", e)))?;

        Ok(receipt.map(|r| TxReceipt {
            tx_hash: tx_id.to_string(),
            block_number: r.block_number.unwrap_or(0),
            gas_used: r.gas_used as u64,
            success: r.status(),
        }))
    }
}

/// Node messages for a raw transaction already in its pool or chain.
const ALREADY_KNOWN: [&str; 2] = ["already known", "known transaction"];

fn is_already_known(message: &str) -> bool {
    let message = message.to_lowercase();
    ALREADY_KNOWN.iter().any(|m| message.contains(m))
}

#[async_trait]
impl Broadcaster for EvmRpcClient {
    /// Send one raw leg.
    ///
    /// A JSON-RPC error response is a rejection carrying the node's message,
    /// except "already known", which means an earlier attempt got through.
    /// Any other failure is reported as unavailable.
    async fn broadcast(&self, leg: &SignedLeg) -> Result<String, BroadcastError> {
        match self.provider.send_raw_transaction(&leg.raw).await {
            Ok(pending) => {
                let tx_hash = format!("{:?}", pending.tx_hash());
                tracing::debug!(from = %leg.from, tx_hash = %tx_hash, "Leg accepted");
                Ok(tx_hash)
            }
            Err(e) => match e.as_error_resp().map(|resp| resp.message.to_string()) {
                Some(message) if is_already_known(&message) => {
                    tracing::info!(from = %leg.from, tx_hash = %leg.tx_hash, "Leg already known");
                    Ok(leg.tx_hash.clone())
                }
                Some(message) => Err(BroadcastError::Rejected(message)),
                None => Err(BroadcastError::Unavailable(e.to_string())),
            },
        }
    }
}
