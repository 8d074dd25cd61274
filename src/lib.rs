// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relational Settlement - Transaction Construction & Settlement Engine
//!
//! This crate builds native-coin and ERC-20 transfers for accounts made of
//! many addresses, carries them through an explicit sign → verify → submit
//! pipeline, and plans summary (sweep) batches that consolidate surplus funds
//! onto a single address.
//!
//! ## Modules
//!
//! - `blockchain` - EVM codec, ERC-20 encoding, alloy RPC client, amount units
//! - `engine` - Pipeline components and the host-facing `SettlementEngine`
//! - `keystore` - Password-gated local keystore (k256 / PEM import)
//! - `storage` - Balance cache (LRU) and submitted-transaction ledger (redb)
//! - `models` - Accounts, addresses, raw transactions, batches

pub mod blockchain;
pub mod config;
pub mod engine;
pub mod error;
pub mod keystore;
pub mod models;
pub mod storage;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::EngineConfig;
pub use engine::{AdapterRegistry, AssetAdapter, SettlementEngine};
pub use error::{EngineError, EngineResult};
pub use models::{
    Account, AccountBalance, AssetContract, RawTransaction, SummaryBatch, SummaryRequest,
    TransferRequest, TxPayload, TxStatus,
};
