//! Failure taxonomy for payment verification and settlement.
//!
//! Verification and settlement never return `Err` past the facilitator API;
//! failures travel inside [`VerificationResult`](crate::proto::VerificationResult)
//! and [`SettlementResult`](crate::proto::SettlementResult) as a
//! [`PaymentErrorKind`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable reason a payment did not verify or settle.
///
/// Serialized as `snake_case` (e.g. `"nonce_already_used"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentErrorKind {
    /// The envelope names a network the registry does not know.
    UnknownNetwork,
    /// The network's chain ID has no chain descriptor.
    UnsupportedChainId,
    /// The envelope resolves to a different chain than the facilitator serves.
    NetworkMismatch,
    /// `to` or `value` differ from what the caller expected.
    AmountOrPayeeMismatch,
    /// `now >= validBefore`.
    AuthorizationExpired,
    /// `now < validAfter`.
    AuthorizationNotYetValid,
    /// The signature is malformed, high-s, or recovers to someone other than `from`.
    InvalidSignature,
    /// The token contract reports the nonce as consumed.
    NonceAlreadyUsed,
    /// An RPC call failed in a way that may succeed if retried.
    RpcTransientFailure,
    /// An RPC call failed in a way that will not succeed if retried.
    RpcTerminalFailure,
    /// The settlement transaction reverted.
    SettlementReverted,
}

impl PaymentErrorKind {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownNetwork => "unknown_network",
            Self::UnsupportedChainId => "unsupported_chain_id",
            Self::NetworkMismatch => "network_mismatch",
            Self::AmountOrPayeeMismatch => "amount_or_payee_mismatch",
            Self::AuthorizationExpired => "authorization_expired",
            Self::AuthorizationNotYetValid => "authorization_not_yet_valid",
            Self::InvalidSignature => "invalid_signature",
            Self::NonceAlreadyUsed => "nonce_already_used",
            Self::RpcTransientFailure => "rpc_transient_failure",
            Self::RpcTerminalFailure => "rpc_terminal_failure",
            Self::SettlementReverted => "settlement_reverted",
        }
    }
}

impl fmt::Display for PaymentErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&PaymentErrorKind::NonceAlreadyUsed).unwrap();
        assert_eq!(json, "\"nonce_already_used\"");
        let kind: PaymentErrorKind = serde_json::from_str("\"amount_or_payee_mismatch\"").unwrap();
        assert_eq!(kind, PaymentErrorKind::AmountOrPayeeMismatch);
    }

    #[test]
    fn test_display_matches_serde() {
        for kind in [
            PaymentErrorKind::UnknownNetwork,
            PaymentErrorKind::UnsupportedChainId,
            PaymentErrorKind::RpcTerminalFailure,
            PaymentErrorKind::SettlementReverted,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
    }
}
