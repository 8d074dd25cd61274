// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signer Adapter.
//!
//! Signing is all-or-nothing: on any failure the transaction is left exactly
//! as it was (unsigned, no signatures attached).

use super::ports::{Keystore, KeystoreError, SigningRequest};
use crate::blockchain::TransactionCodec;
use crate::error::{EngineError, EngineResult};
use crate::models::{normalize_address, RawTransaction, TxStatus};

impl From<KeystoreError> for EngineError {
    fn from(err: KeystoreError) -> Self {
        match err {
            KeystoreError::AuthenticationFailed => EngineError::AuthenticationFailed,
            KeystoreError::Unavailable(reason) => EngineError::SignerUnavailable(reason),
            KeystoreError::UnknownAddress(address) => {
                EngineError::SignerUnavailable(format!("no key for {address}"))
            }
        }
    }
}

pub struct SignerAdapter<'a> {
    codec: &'a dyn TransactionCodec,
    keystore: &'a dyn Keystore,
}

impl<'a> SignerAdapter<'a> {
    pub fn new(codec: &'a dyn TransactionCodec, keystore: &'a dyn Keystore) -> Self {
        Self { codec, keystore }
    }

    pub async fn sign(&self, tx: &mut RawTransaction, password: &str) -> EngineResult<()> {
        tx.require_status(TxStatus::Unsigned)?;

        let requests = tx
            .inputs
            .iter()
            .map(|input| -> EngineResult<SigningRequest> {
                Ok(SigningRequest {
                    address: normalize_address(&input.address),
                    digest: self.codec.signing_digest(tx, input)?,
                })
            })
            .collect::<EngineResult<Vec<_>>>()?;

        let mut signatures = self
            .keystore
            .sign(
                &tx.account.wallet_id,
                &tx.account.account_id,
                password,
                &requests,
            )
            .await
            .map_err(|e| {
                tracing::warn!(tx = %tx.id, error = %e, "Signing failed");
                EngineError::from(e)
            })?;

        let mut attached = Vec::with_capacity(requests.len());
        for request in &requests {
            if let Some(signature) = signatures.remove(&request.address) {
                attached.push((request.address.clone(), signature));
            }
        }
        if attached.len() != requests.len() {
            return Err(EngineError::IncompleteSignatures {
                expected: requests.len(),
                actual: attached.len(),
            });
        }

        tx.signatures = attached.into_iter().collect();
        tx.advance(TxStatus::Signed)?;
        tracing::info!(tx = %tx.id, legs = requests.len(), "Transaction signed");
        Ok(())
    }
}
