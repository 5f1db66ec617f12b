//! Envelope verification.
//!
//! Checks run cheapest first and stop at the first failure:
//! network binding, payee and amount, time window, signature, and finally
//! the on-chain nonce state. Nothing here sends a transaction.

use std::fmt::Display;

use alloy_primitives::{Address, Signature};
#[cfg(feature = "telemetry")]
use tracing::instrument;
use sx402::chain::ChainId;
use sx402::error::PaymentErrorKind;
use sx402::networks::NetworkConfig;
use sx402::proto::{PaymentAuthorization, PaymentEnvelope, TokenAmount, VerificationResult};
use sx402::timestamp::UnixTimestamp;

use super::{Facilitator, rpc_failure_kind};
use crate::client::ChainClient;
use crate::signature::verify_signer;
use crate::types::authorization_digest;

/// A failed check: the error kind plus a human-readable explanation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Rejection {
    pub(super) kind: PaymentErrorKind,
    pub(super) message: String,
}

impl Rejection {
    pub(super) fn new(kind: PaymentErrorKind, message: impl Display) -> Self {
        Self {
            kind,
            message: message.to_string(),
        }
    }
}

/// `to` must be the expected payee and `value` the exact expected amount.
pub(super) fn assert_payee_and_amount(
    authorization: &PaymentAuthorization,
    expected_payee: Address,
    expected_amount: TokenAmount,
) -> Result<(), Rejection> {
    if authorization.to != expected_payee {
        return Err(Rejection::new(
            PaymentErrorKind::AmountOrPayeeMismatch,
            format_args!(
                "payee {} does not match expected {expected_payee}",
                authorization.to
            ),
        ));
    }
    if authorization.value != expected_amount {
        return Err(Rejection::new(
            PaymentErrorKind::AmountOrPayeeMismatch,
            format_args!(
                "amount {} does not match expected {expected_amount}",
                authorization.value
            ),
        ));
    }
    Ok(())
}

/// `validAfter <= now < validBefore`.
pub(super) fn assert_time_window(
    authorization: &PaymentAuthorization,
    now: UnixTimestamp,
) -> Result<(), Rejection> {
    if now < authorization.valid_after {
        return Err(Rejection::new(
            PaymentErrorKind::AuthorizationNotYetValid,
            format_args!(
                "authorization is valid after {}, now is {now}",
                authorization.valid_after
            ),
        ));
    }
    if now >= authorization.valid_before {
        return Err(Rejection::new(
            PaymentErrorKind::AuthorizationExpired,
            format_args!(
                "authorization expired at {}, now is {now}",
                authorization.valid_before
            ),
        ));
    }
    Ok(())
}

/// The signature must be low-s and recover to `authorization.from` under
/// `network`'s token domain.
pub(super) fn assert_signature(
    network: &NetworkConfig,
    envelope: &PaymentEnvelope,
) -> Result<Signature, Rejection> {
    let digest = authorization_digest(network, &envelope.authorization);
    verify_signer(&envelope.signature, &digest, envelope.authorization.from)
        .map_err(|e| Rejection::new(PaymentErrorKind::InvalidSignature, e))
}

impl<C: ChainClient> Facilitator<C> {
    /// Verifies `envelope` against the expected payee and amount, taking
    /// "now" from the configured time source.
    ///
    /// Never sends a transaction. Calling it repeatedly, sequentially or
    /// concurrently, yields the same result as long as chain state and the
    /// clock do not move.
    #[cfg_attr(feature = "telemetry", instrument(skip_all, fields(network = %envelope.network, nonce = %envelope.authorization.nonce)))]
    pub async fn verify_payment(
        &self,
        envelope: &PaymentEnvelope,
        expected_payee: Address,
        expected_amount: TokenAmount,
    ) -> VerificationResult {
        self.verify_inner(envelope, expected_payee, expected_amount, None)
            .await
    }

    /// Like [`verify_payment`](Self::verify_payment) with a caller-supplied "now".
    #[cfg_attr(feature = "telemetry", instrument(skip_all, fields(network = %envelope.network, nonce = %envelope.authorization.nonce)))]
    pub async fn verify_payment_at(
        &self,
        envelope: &PaymentEnvelope,
        expected_payee: Address,
        expected_amount: TokenAmount,
        now: UnixTimestamp,
    ) -> VerificationResult {
        self.verify_inner(envelope, expected_payee, expected_amount, Some(now))
            .await
    }

    pub(super) async fn verify_inner(
        &self,
        envelope: &PaymentEnvelope,
        expected_payee: Address,
        expected_amount: TokenAmount,
        now: Option<UnixTimestamp>,
    ) -> VerificationResult {
        let chain_id = match self.assert_network(&envelope.network) {
            Ok(chain_id) => chain_id,
            Err((chain_id, rejection)) => {
                return VerificationResult::invalid(
                    envelope,
                    chain_id,
                    rejection.kind,
                    rejection.message,
                );
            }
        };
        let result = self
            .check(envelope, expected_payee, expected_amount, now)
            .await;
        match result {
            Ok(()) => {
                #[cfg(feature = "telemetry")]
                tracing::debug!(payer = %envelope.authorization.from, "Payment verified");
                VerificationResult::valid(envelope, chain_id)
            }
            Err(rejection) => {
                #[cfg(feature = "telemetry")]
                tracing::info!(reason = %rejection.kind, message = %rejection.message, "Payment rejected");
                VerificationResult::invalid(envelope, Some(chain_id), rejection.kind, rejection.message)
            }
        }
    }

    /// Resolves the envelope's network key and checks it names the bound chain.
    ///
    /// On failure returns the resolved chain ID, if resolution got that far.
    fn assert_network(&self, key: &str) -> Result<ChainId, (Option<ChainId>, Rejection)> {
        let network = self
            .networks
            .resolve(key)
            .map_err(|e| (None, Rejection::new(PaymentErrorKind::UnknownNetwork, e)))?;
        let chain_id = network.chain_id;
        self.chains.chain_descriptor(chain_id).map_err(|e| {
            (
                Some(chain_id),
                Rejection::new(PaymentErrorKind::UnsupportedChainId, e),
            )
        })?;
        if chain_id != self.network.chain_id {
            return Err((
                Some(chain_id),
                Rejection::new(
                    PaymentErrorKind::NetworkMismatch,
                    format_args!(
                        "network {key} is chain {chain_id}, this facilitator settles on {} ({})",
                        self.network.name, self.network.chain_id
                    ),
                ),
            ));
        }
        Ok(chain_id)
    }

    async fn check(
        &self,
        envelope: &PaymentEnvelope,
        expected_payee: Address,
        expected_amount: TokenAmount,
        now: Option<UnixTimestamp>,
    ) -> Result<(), Rejection> {
        let authorization = &envelope.authorization;
        assert_payee_and_amount(authorization, expected_payee, expected_amount)?;
        let now = match now {
            Some(now) => now,
            None => self.now().await.map_err(|e| {
                Rejection::new(
                    rpc_failure_kind(&e),
                    format_args!("failed to read the current time: {e}"),
                )
            })?,
        };
        assert_time_window(authorization, now)?;
        assert_signature(&self.network, envelope)?;
        self.assert_nonce_fresh(authorization).await
    }

    async fn assert_nonce_fresh(&self, authorization: &PaymentAuthorization) -> Result<(), Rejection> {
        match self
            .nonce_consumed(authorization.from, authorization.nonce)
            .await
        {
            Ok(false) => Ok(()),
            Ok(true) => Err(Rejection::new(
                PaymentErrorKind::NonceAlreadyUsed,
                format_args!(
                    "nonce {} of {} is already used or canceled",
                    authorization.nonce, authorization.from
                ),
            )),
            Err(e) => Err(Rejection::new(
                rpc_failure_kind(&e),
                format_args!("failed to read authorization state: {e}"),
            )),
        }
    }
}
