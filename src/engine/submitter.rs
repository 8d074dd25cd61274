// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Submitter.
//!
//! Each input address is its own chain transaction ("leg"). Legs go out one
//! at a time, in input order, and every accepted leg id is written to
//! `leg_tx_ids` before the next leg is sent. A retry after a timeout or an
//! unavailable transport resumes after the last recorded leg.
//!
//! | Outcome | Status | Error |
//! |---------|--------|-------|
//! | every leg accepted | `submitted` | - |
//! | first leg rejected | `failed` | `SubmissionRejected` (reason verbatim) |
//! | later leg rejected | `failed` | `PartiallySubmitted` (accepted ids kept) |
//! | transport unavailable | `verified` | `BroadcastUnavailable` |
//! | a leg timed out | `verified` | `SubmissionTimedOut` |
//! | cancelled before the first leg | `verified` | `Cancelled` |
//!
//! A rejected transaction is never retried or fee-bumped here.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::ports::{BroadcastError, BroadcastReceipt, Broadcaster};
use crate::blockchain::TransactionCodec;
use crate::error::{EngineError, EngineResult};
use crate::models::{RawTransaction, TxStatus};

pub struct Submitter<'a> {
    codec: &'a dyn TransactionCodec,
    broadcaster: &'a dyn Broadcaster,
    timeout: Duration,
}

impl<'a> Submitter<'a> {
    /// `timeout` bounds each leg's broadcast, not the whole submission.
    pub fn new(
        codec: &'a dyn TransactionCodec,
        broadcaster: &'a dyn Broadcaster,
        timeout: Duration,
    ) -> Self {
        Self {
            codec,
            broadcaster,
            timeout,
        }
    }

    pub async fn submit(
        &self,
        tx: &mut RawTransaction,
        cancel: Option<&CancellationToken>,
    ) -> EngineResult<BroadcastReceipt> {
        tx.require_status(TxStatus::Verified)?;

        let payload = match self.codec.encode_signed(tx) {
            Ok(payload) => payload,
            Err(e) => {
                let err = EngineError::from(e);
                tracing::error!(tx = %tx.id, error = %err, "Signed encoding failed");
                tx.fail(err.to_string());
                return Err(err);
            }
        };

        if cancel.is_some_and(CancellationToken::is_cancelled) {
            tracing::info!(tx = %tx.id, "Submission cancelled before broadcast");
            return Err(EngineError::Cancelled);
        }

        let resume = tx.leg_tx_ids.len();
        if resume > 0 {
            tracing::info!(tx = %tx.id, sent = resume, legs = payload.legs.len(), "Resuming submission");
        }

        for (index, leg) in payload.legs.iter().enumerate().skip(resume) {
            let outcome = tokio::time::timeout(self.timeout, self.broadcaster.broadcast(leg)).await;
            match outcome {
                Ok(Ok(tx_hash)) => {
                    tracing::debug!(tx = %tx.id, leg = index, tx_hash = %tx_hash, "Leg accepted");
                    if tx.tx_id.is_none() {
                        tx.tx_id = Some(tx_hash.clone());
                    }
                    tx.leg_tx_ids.push(tx_hash);
                }
                Err(_) => {
                    tracing::warn!(
                        tx = %tx.id,
                        leg = index,
                        timeout = ?self.timeout,
                        "Submission timed out"
                    );
                    return Err(EngineError::SubmissionTimedOut(self.timeout));
                }
                Ok(Err(BroadcastError::Unavailable(reason))) => {
                    tracing::warn!(tx = %tx.id, leg = index, reason = %reason, "Broadcast unavailable");
                    return Err(EngineError::BroadcastUnavailable(reason));
                }
                Ok(Err(BroadcastError::Rejected(reason))) => {
                    tracing::warn!(
                        tx = %tx.id,
                        leg = index,
                        reason = %reason,
                        accepted_legs = tx.leg_tx_ids.len(),
                        "Submission rejected"
                    );
                    tx.fail(reason.clone());
                    if tx.leg_tx_ids.is_empty() {
                        return Err(EngineError::SubmissionRejected(reason));
                    }
                    return Err(EngineError::PartiallySubmitted {
                        accepted: tx.leg_tx_ids.clone(),
                        reason,
                    });
                }
            }
        }

        tx.advance(TxStatus::Submitted)?;
        tracing::info!(
            tx = %tx.id,
            tx_id = ?tx.tx_id,
            legs = tx.leg_tx_ids.len(),
            "Transaction submitted"
        );
        Ok(BroadcastReceipt {
            tx_ids: tx.leg_tx_ids.clone(),
        })
    }
}
