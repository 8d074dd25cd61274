// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Blockchain integration for EVM chains.
//!
//! This module provides:
//! - Amount parsing and formatting in minor units
//! - ERC-20 call encoding and balance queries
//! - The EIP-155 transaction codec used for signing and broadcast
//! - An alloy JSON-RPC client implementing the engine's chain capabilities

pub mod client;
pub mod codec;
pub mod erc20;
pub mod types;
pub mod units;

pub use client::EvmRpcClient;
pub use codec::{CodecError, EvmCodec, SignedLeg, SignedPayload, TransactionCodec};
pub use types::*;
pub use units::{format_amount, parse_amount, parse_threshold, UnitsError};
