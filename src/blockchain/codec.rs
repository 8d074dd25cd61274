// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Transaction Codecs
//!
//! A [`TransactionCodec`] is the per-chain strategy the engine uses for every
//! byte-level concern: address validation, gas schedule, contract call data,
//! the canonical signing preimage, signer recovery and the signed wire format.
//!
//! [`EvmCodec`] encodes each input of a [`RawTransaction`] as its own EIP-155
//! legacy transaction (one leg per source address, each with its own nonce).

use std::str::FromStr;

use alloy::{
    consensus::{SignableTransaction, TxEnvelope, TxLegacy},
    eips::eip2718::Encodable2718,
    primitives::{keccak256, Address, Bytes, Signature, TxKind, B256, U256},
};
use serde::{Deserialize, Serialize};

use super::erc20::encode_transfer;
use super::types::NetworkConfig;
use crate::models::{normalize_address, AssetContract, InputSelection, RawTransaction, TxPayload};

/// Errors raised while encoding or decoding chain payloads.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Invalid signature: {0}")]
    Signature(String),

    #[error("Missing signature for {0}")]
    MissingSignature(String),
}

/// One signed leg ready for broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedLeg {
    pub from: String,
    /// Hash the chain will assign to this leg
    pub tx_hash: String,
    /// Wire encoding
    pub raw: Bytes,
}

/// Wire payload of a verified transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPayload {
    pub legs: Vec<SignedLeg>,
}

/// Chain-specific encoding strategy.
pub trait TransactionCodec: Send + Sync {
    fn network(&self) -> &NetworkConfig;

    /// Validate an address and return its canonical form.
    fn validate_address(&self, address: &str) -> Result<String, CodecError>;

    fn allows_self_transfer(&self) -> bool {
        self.network().allow_self_transfer
    }

    /// Gas limit of one leg.
    fn gas_limit(&self, contract: Option<&AssetContract>, extension: Option<&str>) -> u64;

    /// Call data invoking the token's transfer for `amount`.
    fn encode_contract_call(
        &self,
        contract: &AssetContract,
        to: &str,
        amount: U256,
    ) -> Result<Bytes, CodecError>;

    /// Canonical signing preimage of one input's leg.
    fn signing_payload(
        &self,
        tx: &RawTransaction,
        input: &InputSelection,
    ) -> Result<Bytes, CodecError>;

    /// Digest the keystore signs for one input's leg.
    fn signing_digest(
        &self,
        tx: &RawTransaction,
        input: &InputSelection,
    ) -> Result<B256, CodecError> {
        Ok(keccak256(self.signing_payload(tx, input)?))
    }

    /// Recover the canonical address that produced `signature` over `digest`.
    fn recover_signer(&self, digest: &B256, signature: &[u8]) -> Result<String, CodecError>;

    /// Attach the signatures and produce the broadcastable legs, in input order.
    fn encode_signed(&self, tx: &RawTransaction) -> Result<SignedPayload, CodecError>;
}

/// EIP-155 legacy transaction codec for EVM chains.
#[derive(Debug, Clone)]
pub struct EvmCodec {
    network: NetworkConfig,
}

impl EvmCodec {
    pub fn new(network: NetworkConfig) -> Self {
        Self { network }
    }

    fn parse_address(address: &str) -> Result<Address, CodecError> {
        Address::from_str(address.trim()).map_err(|e| CodecError::InvalidAddress(e.to_string()))
    }

    /// Unsigned legacy transaction for one input.
    fn legacy_leg(&self, tx: &RawTransaction, input: &InputSelection) -> Result<TxLegacy, CodecError> {
        let gas_price = u128::try_from(tx.fee_rate)
            .map_err(|_| CodecError::Encoding(format!("fee rate {} exceeds u128", tx.fee_rate)))?;

        let (to, value, data) = match &tx.payload {
            TxPayload::NativeTransfer { to, .. } => {
                let memo = tx
                    .extension
                    .as_deref()
                    .map(|m| Bytes::copy_from_slice(m.as_bytes()))
                    .unwrap_or_default();
                (Self::parse_address(to)?, input.spend, memo)
            }
            TxPayload::ContractCall { contract, to, .. } => {
                // Each leg moves only its own share of the total.
                let data = encode_transfer(Self::parse_address(to)?, input.spend);
                (Self::parse_address(&contract.address)?, U256::ZERO, data)
            }
        };

        Ok(TxLegacy {
            chain_id: Some(self.network.chain_id),
            nonce: input.nonce,
            gas_price,
            gas_limit: tx.gas_limit,
            to: TxKind::Call(to),
            value,
            input: data,
        })
    }
}

impl TransactionCodec for EvmCodec {
    fn network(&self) -> &NetworkConfig {
        &self.network
    }

    fn validate_address(&self, address: &str) -> Result<String, CodecError> {
        let parsed = Self::parse_address(address)?;
        Ok(normalize_address(&parsed.to_string()))
    }

    fn gas_limit(&self, contract: Option<&AssetContract>, extension: Option<&str>) -> u64 {
        let gas = &self.network.gas;
        match contract {
            Some(_) => gas.token_transfer,
            None => {
                let memo_len = extension.map(str::len).unwrap_or(0) as u64;
                gas.native_transfer
                    .saturating_add(gas.per_memo_byte.saturating_mul(memo_len))
            }
        }
    }

    fn encode_contract_call(
        &self,
        _contract: &AssetContract,
        to: &str,
        amount: U256,
    ) -> Result<Bytes, CodecError> {
        Ok(encode_transfer(Self::parse_address(to)?, amount))
    }

    fn signing_payload(
        &self,
        tx: &RawTransaction,
        input: &InputSelection,
    ) -> Result<Bytes, CodecError> {
        Ok(self.legacy_leg(tx, input)?.encoded_for_signing().into())
    }

    fn recover_signer(&self, digest: &B256, signature: &[u8]) -> Result<String, CodecError> {
        let signature = Signature::try_from(signature)
            .map_err(|e| CodecError::Signature(e.to_string()))?;
        let address = signature
            .recover_address_from_prehash(digest)
            .map_err(|e| CodecError::Signature(e.to_string()))?;
        Ok(normalize_address(&address.to_string()))
    }

    fn encode_signed(&self, tx: &RawTransaction) -> Result<SignedPayload, CodecError> {
        let mut legs = Vec::with_capacity(tx.inputs.len());
        for input in &tx.inputs {
            let from = normalize_address(&input.address);
            let raw_sig = tx
                .signatures
                .get(&from)
                .ok_or_else(|| CodecError::MissingSignature(from.clone()))?;
            let signature = Signature::try_from(raw_sig.as_ref())
                .map_err(|e| CodecError::Signature(e.to_string()))?;

            let signed = self.legacy_leg(tx, input)?.into_signed(signature);
            let tx_hash = format!("{:?}", signed.hash());
            let raw: Bytes = TxEnvelope::Legacy(signed).encoded_2718().into();

            legs.push(SignedLeg { from, tx_hash, raw });
        }
        Ok(SignedPayload { legs })
    }
}
