//! Envelope settlement via `transferWithAuthorization`.

use alloy_primitives::{Bytes, TxHash, U256};
use alloy_sol_types::SolCall;
#[cfg(feature = "telemetry")]
use tracing::instrument;
use sx402::error::PaymentErrorKind;
use sx402::proto::{PaymentEnvelope, SettlementResult};

use super::{Facilitator, rpc_failure_kind};
use crate::client::{ChainClient, ClientError, ReceiptSummary};
use crate::contract::IEIP3009;
use crate::signature::{SignatureError, parse_signature, split_vrs};

/// ABI calldata of `transferWithAuthorization` for `envelope`, with the
/// signature split into `(v, r, s)`.
///
/// # Errors
///
/// Returns [`SignatureError`] when the signature is not 65 well-formed bytes.
pub fn transfer_calldata(envelope: &PaymentEnvelope) -> Result<Bytes, SignatureError> {
    let signature = parse_signature(&envelope.signature)?;
    let (v, r, s) = split_vrs(&signature);
    let authorization = &envelope.authorization;
    let call = IEIP3009::transferWithAuthorizationCall {
        from: authorization.from,
        to: authorization.to,
        value: authorization.value.inner(),
        validAfter: U256::from(authorization.valid_after.as_secs()),
        validBefore: U256::from(authorization.valid_before.as_secs()),
        nonce: authorization.nonce,
        v,
        r,
        s,
    };
    Ok(call.abi_encode().into())
}

impl<C: ChainClient> Facilitator<C> {
    /// Settles `envelope` by submitting `transferWithAuthorization` from the
    /// client's operating key, then waiting for the receipt.
    ///
    /// The envelope is re-verified against its own payee and amount first.
    /// Transient submission failures are retried under the retry policy; the
    /// nonce is re-read before every resubmission and nothing is resent once
    /// it is consumed. A wait exceeding the confirmation timeout yields
    /// [`Pending`](sx402::proto::SettlementStatus::Pending), as does a consumed
    /// nonce after a send whose outcome was never acknowledged.
    #[cfg_attr(feature = "telemetry", instrument(skip_all, fields(network = %envelope.network, nonce = %envelope.authorization.nonce)))]
    pub async fn settle_payment(&self, envelope: &PaymentEnvelope) -> SettlementResult {
        let authorization = &envelope.authorization;
        let check = self
            .verify_inner(envelope, authorization.to, authorization.value, None)
            .await;
        if let Some(reason) = check.reason {
            #[cfg(feature = "telemetry")]
            tracing::info!(%reason, message = ?check.message, "Settlement refused, envelope no longer valid");
            return SettlementResult::failed(envelope, check.trace.chain_id, reason);
        }
        let calldata = match transfer_calldata(envelope) {
            Ok(calldata) => calldata,
            Err(_) => {
                return SettlementResult::failed(
                    envelope,
                    Some(self.chain_id()),
                    PaymentErrorKind::InvalidSignature,
                );
            }
        };

        let hash = match self.submit(envelope, calldata).await {
            Ok(hash) => hash,
            Err(result) => return *result,
        };
        #[cfg(feature = "telemetry")]
        tracing::info!(tx = %hash, "Settlement submitted");

        match self
            .client
            .wait_for_receipt(hash, self.options.confirmation_timeout)
            .await
        {
            Ok(Some(receipt)) if receipt.success => {
                #[cfg(feature = "telemetry")]
                tracing::info!(tx = %hash, block = ?receipt.block_number, "Settlement confirmed");
                SettlementResult::confirmed(envelope, self.chain_id(), hash, receipt.block_number)
            }
            Ok(Some(receipt)) => self.reverted(envelope, None, Some(receipt), false).await,
            Ok(None) => {
                #[cfg(feature = "telemetry")]
                tracing::warn!(tx = %hash, timeout = ?self.options.confirmation_timeout, "Settlement not confirmed in time");
                SettlementResult::pending(envelope, self.chain_id(), hash)
            }
            #[cfg_attr(not(feature = "telemetry"), allow(unused_variables))]
            Err(e) => {
                #[cfg(feature = "telemetry")]
                tracing::warn!(tx = %hash, error = %e, "Failed to fetch settlement receipt");
                SettlementResult::pending(envelope, self.chain_id(), hash)
            }
        }
    }

    /// Sends the settlement transaction, retrying transient failures.
    ///
    /// Once a failed send may have reached the network, outcomes that cannot
    /// rule out our own transaction settling are reported as `Pending`.
    async fn submit(
        &self,
        envelope: &PaymentEnvelope,
        calldata: Bytes,
    ) -> Result<TxHash, Box<SettlementResult>> {
        let authorization = &envelope.authorization;
        let token = self.network.usdc_address;
        let retry = self.options.retry;
        let mut broadcast = false;
        let mut attempt = 1;
        loop {
            let error = match self.client.send_transaction(token, calldata.clone()).await {
                Ok(hash) => return Ok(hash),
                Err(ClientError::Reverted { reason }) => {
                    return Err(Box::new(
                        self.reverted(envelope, Some(reason), None, broadcast).await,
                    ));
                }
                Err(e) => e,
            };
            broadcast |= error.may_have_broadcast();
            if !error.is_transient() || attempt >= retry.attempts() {
                #[cfg(feature = "telemetry")]
                tracing::warn!(attempt, error = %error, broadcast, "Settlement submission failed");
                return Err(Box::new(self.give_up(envelope, &error, broadcast)));
            }
            #[cfg(feature = "telemetry")]
            tracing::warn!(attempt, error = %error, "Settlement submission failed, retrying");
            tokio::time::sleep(retry.backoff(attempt)).await;
            attempt += 1;
            match self
                .nonce_consumed(authorization.from, authorization.nonce)
                .await
            {
                Ok(false) => {}
                Ok(true) => {
                    #[cfg(feature = "telemetry")]
                    tracing::info!(broadcast, "Nonce consumed while retrying, not resubmitting");
                    let result = if broadcast {
                        SettlementResult::unacknowledged(envelope, self.chain_id())
                    } else {
                        SettlementResult::failed(
                            envelope,
                            Some(self.chain_id()),
                            PaymentErrorKind::NonceAlreadyUsed,
                        )
                    };
                    return Err(Box::new(result));
                }
                Err(e) => return Err(Box::new(self.give_up(envelope, &e, broadcast))),
            }
        }
    }

    /// Result for a submission abandoned after `error`.
    fn give_up(
        &self,
        envelope: &PaymentEnvelope,
        error: &ClientError,
        broadcast: bool,
    ) -> SettlementResult {
        if broadcast {
            SettlementResult::unacknowledged(envelope, self.chain_id())
        } else {
            SettlementResult::failed(envelope, Some(self.chain_id()), rpc_failure_kind(error))
        }
    }

    /// Classifies a revert: `NonceAlreadyUsed` when the nonce is consumed on
    /// chain by now, `SettlementReverted` otherwise.
    ///
    /// When the nonce state cannot be read, a revert reason reporting a used
    /// authorization stands in for it. A consumed nonce after an earlier send
    /// that may have been broadcast is `Pending`, since that send may be the
    /// one that consumed it.
    async fn reverted(
        &self,
        envelope: &PaymentEnvelope,
        revert_reason: Option<String>,
        receipt: Option<ReceiptSummary>,
        broadcast: bool,
    ) -> SettlementResult {
        let authorization = &envelope.authorization;
        let consumed = match self
            .nonce_consumed(authorization.from, authorization.nonce)
            .await
        {
            Ok(consumed) => consumed,
            #[cfg_attr(not(feature = "telemetry"), allow(unused_variables))]
            Err(e) => {
                #[cfg(feature = "telemetry")]
                tracing::warn!(error = %e, "Failed to read nonce state after revert");
                revert_reason
                    .as_deref()
                    .is_some_and(reports_used_authorization)
            }
        };
        if consumed && broadcast {
            #[cfg(feature = "telemetry")]
            tracing::info!(revert_reason = ?revert_reason, "Resubmission reverted on a consumed nonce");
            return SettlementResult::unacknowledged(envelope, self.chain_id());
        }
        let kind = if consumed {
            PaymentErrorKind::NonceAlreadyUsed
        } else {
            PaymentErrorKind::SettlementReverted
        };
        #[cfg(feature = "telemetry")]
        tracing::warn!(reason = %kind, revert_reason = ?revert_reason, "Settlement reverted");
        let mut result = SettlementResult::failed(envelope, Some(self.chain_id()), kind);
        if let Some(receipt) = receipt {
            result = result
                .with_transaction(receipt.transaction_hash)
                .with_block_number(receipt.block_number);
        }
        if let Some(revert_reason) = revert_reason {
            result = result.with_revert_reason(revert_reason);
        }
        result
    }
}

/// Whether a revert string is the token's consumed-authorization error
/// (`FiatTokenV2: authorization is used or canceled`).
fn reports_used_authorization(reason: &str) -> bool {
    reason
        .to_ascii_lowercase()
        .contains("authorization is used")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use sx402::networks;
    use sx402::proto::SettlementStatus;

    use super::*;
    use crate::facilitator::{FacilitatorOptions, TimeSource};
    use crate::mock::{AUTHORIZATION_USED, MockChain, NOW, envelope, signed_envelope};

    fn facilitator(chain: &Arc<MockChain>) -> Facilitator<Arc<MockChain>> {
        Facilitator::new(
            networks::resolve("base").unwrap(),
            Arc::clone(chain),
            FacilitatorOptions::default().with_time_source(TimeSource::LatestBlock),
        )
    }

    #[test]
    fn test_transfer_calldata_layout() {
        let env = envelope("base");
        let calldata = transfer_calldata(&env).unwrap();
        assert_eq!(&calldata[..4], &[0xe3, 0xee, 0x16, 0x0e]);
        assert_eq!(calldata.len(), 4 + 9 * 32);
        let call = IEIP3009::transferWithAuthorizationCall::abi_decode(&calldata).unwrap();
        assert_eq!(call.from, env.authorization.from);
        assert_eq!(call.nonce, env.authorization.nonce);
        assert!(call.v == 27 || call.v == 28);
    }

    #[tokio::test]
    async fn test_settle_confirms() {
        let chain = MockChain::new();
        let fac = facilitator(&chain);
        let env = envelope("base");
        let result = fac.settle_payment(&env).await;
        assert_eq!(result.status, SettlementStatus::Confirmed, "{result:?}");
        assert!(result.transaction_hash.is_some());
        assert!(result.block_number.is_some());
        assert_eq!(result.reason, None);
        assert_eq!(result.trace.chain_id, Some(8453));
        assert!(chain.is_consumed(env.authorization.from, env.authorization.nonce));
        assert_eq!(chain.sends(), 1);
    }

    #[tokio::test]
    async fn test_settled_nonce_never_verifies_again() {
        let chain = MockChain::new();
        let fac = facilitator(&chain);
        let env = envelope("base");
        assert!(fac.settle_payment(&env).await.is_confirmed());

        let again = fac.settle_payment(&env).await;
        assert_eq!(again.status, SettlementStatus::Failed);
        assert_eq!(again.reason, Some(PaymentErrorKind::NonceAlreadyUsed));
        assert_eq!(again.transaction_hash, None);
        assert_eq!(chain.sends(), 1);

        let verified = fac
            .verify_payment_at(&env, env.authorization.to, env.authorization.value, NOW)
            .await;
        assert_eq!(verified.reason, Some(PaymentErrorKind::NonceAlreadyUsed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_settlements_confirm_once() {
        let chain = MockChain::new();
        // both verifications read a fresh nonce before either transaction lands
        chain.set_read_delay(Duration::from_millis(10));
        let fac = facilitator(&chain);
        let env = envelope("base");
        let (a, b) = tokio::join!(fac.settle_payment(&env), fac.settle_payment(&env));
        let mut statuses = [a, b];
        statuses.sort_by_key(|r| r.is_confirmed());
        assert_eq!(statuses[0].status, SettlementStatus::Failed);
        assert_eq!(statuses[0].reason, Some(PaymentErrorKind::NonceAlreadyUsed));
        assert_eq!(statuses[0].revert_reason.as_deref(), Some(AUTHORIZATION_USED));
        assert_eq!(statuses[1].status, SettlementStatus::Confirmed);
        assert_eq!(chain.sends(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_submission_is_retried() {
        let chain = MockChain::new();
        chain.fail_sends(2, ClientError::RateLimited("429 Too Many Requests".to_owned()));
        let fac = facilitator(&chain);
        let result = fac.settle_payment(&envelope("base")).await;
        assert!(result.is_confirmed(), "{result:?}");
        assert_eq!(chain.sends(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_ceiling() {
        let chain = MockChain::new();
        chain.fail_sends(10, ClientError::NonceTooLow("nonce too low".to_owned()));
        let fac = facilitator(&chain);
        let result = fac.settle_payment(&envelope("base")).await;
        assert_eq!(result.status, SettlementStatus::Failed);
        assert_eq!(result.reason, Some(PaymentErrorKind::RpcTransientFailure));
        assert_eq!(chain.sends(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_send_then_consumed_nonce_is_pending() {
        let chain = MockChain::new();
        chain.lose_sends(1);
        let fac = facilitator(&chain);
        let env = envelope("base");
        let result = fac.settle_payment(&env).await;
        assert_eq!(result.status, SettlementStatus::Pending, "{result:?}");
        assert_eq!(result.reason, None);
        assert_eq!(result.transaction_hash, None);
        assert!(chain.is_consumed(env.authorization.from, env.authorization.nonce));
        assert_eq!(chain.sends(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_sends_exhausting_retries_are_pending() {
        let chain = MockChain::new();
        chain.fail_sends(10, ClientError::Transient("connection reset by peer".to_owned()));
        let fac = facilitator(&chain);
        let result = fac.settle_payment(&envelope("base")).await;
        assert_eq!(result.status, SettlementStatus::Pending, "{result:?}");
        assert_eq!(result.transaction_hash, None);
        assert_eq!(chain.sends(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_send_then_consumed_nonce_fails() {
        let chain = MockChain::new();
        chain.fail_sends(1, ClientError::RateLimited("429 Too Many Requests".to_owned()));
        let fac = facilitator(&chain);
        let env = envelope("base");
        // settled elsewhere during the backoff after the rejected send
        let (result, ()) = tokio::join!(fac.settle_payment(&env), async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            chain.consume(env.authorization.from, env.authorization.nonce);
        });
        assert_eq!(result.status, SettlementStatus::Failed, "{result:?}");
        assert_eq!(result.reason, Some(PaymentErrorKind::NonceAlreadyUsed));
        assert_eq!(chain.sends(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_revert_with_unreadable_nonce_uses_revert_reason() {
        let chain = MockChain::new();
        chain.revert_with(AUTHORIZATION_USED);
        // the verification read succeeds, every later one fails
        chain.fail_reads_after(1, 10, ClientError::Transient("503 Service Unavailable".to_owned()));
        let fac = facilitator(&chain);
        let result = fac.settle_payment(&envelope("base")).await;
        assert_eq!(result.status, SettlementStatus::Failed);
        assert_eq!(result.reason, Some(PaymentErrorKind::NonceAlreadyUsed));
        assert_eq!(result.revert_reason.as_deref(), Some(AUTHORIZATION_USED));

        let chain = MockChain::new();
        chain.revert_with("FiatTokenV2: invalid signature");
        chain.fail_reads_after(1, 10, ClientError::Transient("503 Service Unavailable".to_owned()));
        let fac = facilitator(&chain);
        let result = fac.settle_payment(&envelope("base")).await;
        assert_eq!(result.reason, Some(PaymentErrorKind::SettlementReverted));
    }

    #[tokio::test]
    async fn test_terminal_submission_failure_is_not_retried() {
        let chain = MockChain::new();
        chain.fail_sends(1, ClientError::Terminal("insufficient funds for gas".to_owned()));
        let fac = facilitator(&chain);
        let result = fac.settle_payment(&envelope("base")).await;
        assert_eq!(result.reason, Some(PaymentErrorKind::RpcTerminalFailure));
        assert_eq!(chain.sends(), 1);
    }

    #[tokio::test]
    async fn test_revert_reason_is_verbatim() {
        let chain = MockChain::new();
        chain.revert_with("FiatTokenV2: invalid signature");
        let fac = facilitator(&chain);
        let env = envelope("base");
        let result = fac.settle_payment(&env).await;
        assert_eq!(result.status, SettlementStatus::Failed);
        assert_eq!(result.reason, Some(PaymentErrorKind::SettlementReverted));
        assert_eq!(
            result.revert_reason.as_deref(),
            Some("FiatTokenV2: invalid signature")
        );
        assert_eq!(chain.sends(), 1);
        assert!(!chain.is_consumed(env.authorization.from, env.authorization.nonce));
    }

    #[tokio::test]
    async fn test_mined_revert_keeps_hash_and_block() {
        let chain = MockChain::new();
        chain.revert_on_chain();
        let fac = facilitator(&chain);
        let result = fac.settle_payment(&envelope("base")).await;
        assert_eq!(result.reason, Some(PaymentErrorKind::SettlementReverted));
        assert!(result.transaction_hash.is_some());
        assert!(result.block_number.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_settlement_is_pending() {
        let chain = MockChain::new();
        chain.set_confirm(false);
        let fac = Facilitator::new(
            networks::resolve("base").unwrap(),
            Arc::clone(&chain),
            FacilitatorOptions::default()
                .with_time_source(TimeSource::LatestBlock)
                .with_confirmation_timeout(Duration::from_secs(30)),
        );
        let started = tokio::time::Instant::now();
        let result = fac.settle_payment(&envelope("base")).await;
        assert_eq!(result.status, SettlementStatus::Pending);
        assert!(result.transaction_hash.is_some());
        assert_eq!(result.reason, None);
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_invalid_envelope_is_never_submitted() {
        let chain = MockChain::new();
        let fac = facilitator(&chain);

        let expired = signed_envelope("base", |auth| auth.valid_before = NOW);
        let result = fac.settle_payment(&expired).await;
        assert_eq!(result.reason, Some(PaymentErrorKind::AuthorizationExpired));

        let result = fac.settle_payment(&envelope("arbitrum")).await;
        assert_eq!(result.reason, Some(PaymentErrorKind::NetworkMismatch));
        assert_eq!(result.trace.chain_id, Some(42161));

        assert_eq!(chain.sends(), 0);
    }
}
