// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Local Keystore
//!
//! In-memory, password-gated secp256k1 keys implementing [`Keystore`].
//!
//! Keys are imported from PEM (SEC1 or PKCS#8) or directly as signers. Each
//! account is protected by a password; only a salted SHA-256 digest of it is
//! kept. A wrong password or unknown account yields `AuthenticationFailed`,
//! so callers cannot probe which accounts exist.

use std::collections::HashMap;
use std::sync::RwLock;

use alloy::primitives::Bytes;
use alloy::signers::{local::PrivateKeySigner, SignerSync};
use async_trait::async_trait;
use k256::elliptic_curve::subtle::ConstantTimeEq;
use k256::SecretKey;
use sha2::{Digest, Sha256};

use crate::engine::ports::{Keystore, KeystoreError, SigningRequest};
use crate::models::{normalize_address, AccountKey};

struct KeyEntry {
    password_digest: [u8; 32],
    /// Signers by lowercase address
    signers: HashMap<String, PrivateKeySigner>,
}

/// Password-gated in-memory keystore.
#[derive(Default)]
pub struct LocalKeystore {
    accounts: RwLock<HashMap<AccountKey, KeyEntry>>,
}

fn password_digest(key: &AccountKey, password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(key.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}

/// Create a signer from a PEM-encoded secp256k1 private key.
///
/// Accepts SEC1 (`EC PRIVATE KEY`) and PKCS#8 (`PRIVATE KEY`) documents.
pub fn signer_from_pem(pem_str: &str) -> Result<PrivateKeySigner, KeystoreError> {
    let pem = pem::parse(pem_str)
        .map_err(|e| KeystoreError::Unavailable(format!("Invalid PEM: {}", e)))?;

    let secret_key = SecretKey::from_sec1_der(pem.contents())
        .or_else(|_| {
            use k256::pkcs8::DecodePrivateKey;
            SecretKey::from_pkcs8_der(pem.contents())
        })
        .map_err(|e| KeystoreError::Unavailable(format!("Invalid key format: {}", e)))?;

    PrivateKeySigner::from_slice(&secret_key.to_bytes())
        .map_err(|e| KeystoreError::Unavailable(format!("Invalid private key: {}", e)))
}

impl LocalKeystore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account (or reset its password). Existing keys are kept.
    pub fn insert_account(&self, wallet_id: &str, account_id: &str, password: &str) {
        let key = AccountKey::new(wallet_id, account_id);
        let digest = password_digest(&key, password);
        let mut accounts = match self.accounts.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        accounts
            .entry(key)
            .and_modify(|entry| entry.password_digest = digest)
            .or_insert_with(|| KeyEntry {
                password_digest: digest,
                signers: HashMap::new(),
            });
    }

    /// Add a key to a registered account. Returns its lowercase address.
    pub fn import_signer(
        &self,
        wallet_id: &str,
        account_id: &str,
        signer: PrivateKeySigner,
    ) -> Result<String, KeystoreError> {
        let key = AccountKey::new(wallet_id, account_id);
        let mut accounts = self
            .accounts
            .write()
            .map_err(|_| KeystoreError::Unavailable("keystore lock poisoned".to_string()))?;
        let entry = accounts
            .get_mut(&key)
            .ok_or_else(|| KeystoreError::Unavailable(format!("account {key} not registered")))?;

        let address = normalize_address(&signer.address().to_string());
        entry.signers.insert(address.clone(), signer);
        tracing::debug!(account = %key, address = %address, "Key imported");
        Ok(address)
    }

    /// Add a PEM-encoded key to a registered account.
    pub fn import_pem(
        &self,
        wallet_id: &str,
        account_id: &str,
        pem: &str,
    ) -> Result<String, KeystoreError> {
        let signer = signer_from_pem(pem)?;
        self.import_signer(wallet_id, account_id, signer)
    }
}

#[async_trait]
impl Keystore for LocalKeystore {
    async fn sign(
        &self,
        wallet_id: &str,
        account_id: &str,
        password: &str,
        requests: &[SigningRequest],
    ) -> Result<HashMap<String, Bytes>, KeystoreError> {
        let key = AccountKey::new(wallet_id, account_id);
        let accounts = self
            .accounts
            .read()
            .map_err(|_| KeystoreError::Unavailable("keystore lock poisoned".to_string()))?;
        let entry = accounts.get(&key).ok_or(KeystoreError::AuthenticationFailed)?;

        let supplied = password_digest(&key, password);
        if !bool::from(supplied.as_slice().ct_eq(entry.password_digest.as_slice())) {
            tracing::warn!(account = %key, "Keystore password rejected");
            return Err(KeystoreError::AuthenticationFailed);
        }

        let mut signatures = HashMap::with_capacity(requests.len());
        for request in requests {
            let address = normalize_address(&request.address);
            let signer = entry
                .signers
                .get(&address)
                .ok_or_else(|| KeystoreError::UnknownAddress(address.clone()))?;
            let signature = signer
                .sign_hash_sync(&request.digest)
                .map_err(|e| KeystoreError::Unavailable(e.to_string()))?;
            signatures.insert(address, Bytes::from(signature.as_bytes().to_vec()));
        }
        Ok(signatures)
    }
}
