//! Wire types exchanged with the facilitator.
//!
//! All types serialize to JSON using camelCase field names. Token amounts are
//! decimal strings; timestamps are numbers (see [`UnixTimestamp`]).
//!
//! - [`PaymentAuthorization`] - EIP-3009 `transferWithAuthorization` parameters
//! - [`PaymentEnvelope`] - signed authorization plus the network key
//! - [`VerificationResult`] / [`SettlementResult`] - structured outcomes

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, B256, Bytes, TxHash, U256};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::chain::ChainId;
use crate::error::PaymentErrorKind;
use crate::timestamp::UnixTimestamp;

/// An amount of token base units.
///
/// Serialized as a decimal string (`"1000000"` is 1 USDC). Deserialization
/// also accepts a JSON integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TokenAmount(pub U256);

impl TokenAmount {
    /// Returns the inner value.
    #[must_use]
    pub const fn inner(&self) -> U256 {
        self.0
    }
}

impl From<U256> for TokenAmount {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        Self(U256::from(value))
    }
}

impl From<TokenAmount> for U256 {
    fn from(value: TokenAmount) -> Self {
        value.0
    }
}

/// A token amount string that is not a non-negative decimal integer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid token amount {0:?}: expected a decimal integer")]
pub struct InvalidTokenAmount(String);

impl FromStr for TokenAmount {
    type Err = InvalidTokenAmount;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvalidTokenAmount(s.to_owned()));
        }
        U256::from_str_radix(s, 10)
            .map(Self)
            .map_err(|_| InvalidTokenAmount(s.to_owned()))
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

struct TokenAmountVisitor;

impl Visitor<'_> for TokenAmountVisitor {
    type Value = TokenAmount;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a decimal integer string")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(TokenAmount::from(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        v.parse().map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(TokenAmountVisitor)
    }
}

/// EIP-3009 `transferWithAuthorization` parameters, as signed by the payer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAuthorization {
    /// Payer; the token holder who signed.
    pub from: Address,
    /// Payee.
    pub to: Address,
    /// Amount in token base units.
    pub value: TokenAmount,
    /// The authorization is valid from this second on, inclusive.
    pub valid_after: UnixTimestamp,
    /// The authorization is valid strictly before this second.
    pub valid_before: UnixTimestamp,
    /// One-time replay key, consumed per `(from, token contract)`.
    pub nonce: B256,
}

/// A signed authorization together with the network it targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEnvelope {
    /// Network registry key (canonical name or alias).
    pub network: String,
    /// The signed authorization.
    pub authorization: PaymentAuthorization,
    /// 65-byte ECDSA signature over the EIP-712 digest of `authorization`.
    pub signature: Bytes,
}

/// Correlation data carried by every verification and settlement result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTrace {
    /// Network key as given in the envelope.
    pub network: String,
    /// Resolved chain ID, when resolution succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<ChainId>,
    /// The authorization nonce.
    pub nonce: B256,
}

impl PaymentTrace {
    /// Builds a trace for `envelope`.
    #[must_use]
    pub fn for_envelope(envelope: &PaymentEnvelope, chain_id: Option<ChainId>) -> Self {
        Self {
            network: envelope.network.clone(),
            chain_id,
            nonce: envelope.authorization.nonce,
        }
    }
}

/// Outcome of verifying a payment envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    /// Whether the envelope is valid and settleable right now.
    pub valid: bool,
    /// Why the envelope is invalid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<PaymentErrorKind>,
    /// Human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// `authorization.from`.
    pub payer: Address,
    /// `authorization.to`.
    pub payee: Address,
    /// `authorization.value`.
    pub amount: TokenAmount,
    /// Correlation data.
    pub trace: PaymentTrace,
}

impl VerificationResult {
    /// A successful verification of `envelope`.
    #[must_use]
    pub fn valid(envelope: &PaymentEnvelope, chain_id: ChainId) -> Self {
        Self::new(envelope, Some(chain_id), None, None)
    }

    /// A failed verification of `envelope`.
    #[must_use]
    pub fn invalid(
        envelope: &PaymentEnvelope,
        chain_id: Option<ChainId>,
        reason: PaymentErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self::new(envelope, chain_id, Some(reason), Some(message.into()))
    }

    fn new(
        envelope: &PaymentEnvelope,
        chain_id: Option<ChainId>,
        reason: Option<PaymentErrorKind>,
        message: Option<String>,
    ) -> Self {
        let authorization = &envelope.authorization;
        Self {
            valid: reason.is_none(),
            reason,
            message,
            payer: authorization.from,
            payee: authorization.to,
            amount: authorization.value,
            trace: PaymentTrace::for_envelope(envelope, chain_id),
        }
    }
}

/// Lifecycle state of a settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    /// Possibly submitted, not yet known to be confirmed. Callers re-query
    /// the chain rather than treating this as final.
    Pending,
    /// Included in a block with a successful receipt.
    Confirmed,
    /// Not settled; see `reason`.
    Failed,
}

/// Outcome of settling a payment envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResult {
    /// Hash of the submitted transaction, once one was submitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<TxHash>,
    /// Settlement state.
    pub status: SettlementStatus,
    /// Inclusion block, when confirmed or reverted on-chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    /// Why the settlement failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<PaymentErrorKind>,
    /// Revert reason exactly as reported by the node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revert_reason: Option<String>,
    /// `authorization.from`.
    pub payer: Address,
    /// Correlation data.
    pub trace: PaymentTrace,
}

impl SettlementResult {
    /// A settlement included with a successful receipt.
    #[must_use]
    pub fn confirmed(
        envelope: &PaymentEnvelope,
        chain_id: ChainId,
        transaction_hash: TxHash,
        block_number: Option<u64>,
    ) -> Self {
        Self {
            transaction_hash: Some(transaction_hash),
            status: SettlementStatus::Confirmed,
            block_number,
            reason: None,
            revert_reason: None,
            payer: envelope.authorization.from,
            trace: PaymentTrace::for_envelope(envelope, Some(chain_id)),
        }
    }

    /// A submitted settlement whose confirmation wait timed out.
    #[must_use]
    pub fn pending(envelope: &PaymentEnvelope, chain_id: ChainId, transaction_hash: TxHash) -> Self {
        Self {
            transaction_hash: Some(transaction_hash),
            status: SettlementStatus::Pending,
            block_number: None,
            reason: None,
            revert_reason: None,
            payer: envelope.authorization.from,
            trace: PaymentTrace::for_envelope(envelope, Some(chain_id)),
        }
    }

    /// A settlement whose submission may have reached the network without
    /// the node acknowledging it, so no transaction hash is known.
    #[must_use]
    pub fn unacknowledged(envelope: &PaymentEnvelope, chain_id: ChainId) -> Self {
        Self {
            transaction_hash: None,
            status: SettlementStatus::Pending,
            block_number: None,
            reason: None,
            revert_reason: None,
            payer: envelope.authorization.from,
            trace: PaymentTrace::for_envelope(envelope, Some(chain_id)),
        }
    }

    /// A failed settlement.
    #[must_use]
    pub fn failed(
        envelope: &PaymentEnvelope,
        chain_id: Option<ChainId>,
        reason: PaymentErrorKind,
    ) -> Self {
        Self {
            transaction_hash: None,
            status: SettlementStatus::Failed,
            block_number: None,
            reason: Some(reason),
            revert_reason: None,
            payer: envelope.authorization.from,
            trace: PaymentTrace::for_envelope(envelope, chain_id),
        }
    }

    /// Attaches the submitted transaction hash.
    #[must_use]
    pub const fn with_transaction(mut self, hash: TxHash) -> Self {
        self.transaction_hash = Some(hash);
        self
    }

    /// Attaches the inclusion block.
    #[must_use]
    pub const fn with_block_number(mut self, block_number: Option<u64>) -> Self {
        self.block_number = block_number;
        self
    }

    /// Attaches a verbatim revert reason.
    #[must_use]
    pub fn with_revert_reason(mut self, revert_reason: impl Into<String>) -> Self {
        self.revert_reason = Some(revert_reason.into());
        self
    }

    /// Returns `true` when the settlement is confirmed on-chain.
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.status == SettlementStatus::Confirmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope_json() -> serde_json::Value {
        json!({
            "network": "base",
            "authorization": {
                "from": "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266",
                "to": "0x70997970C51812dc3A010C7d01b50e0d17dc79C8",
                "value": "1000000",
                "validAfter": 0,
                "validBefore": "1700000600",
                "nonce": "0x0101010101010101010101010101010101010101010101010101010101010101"
            },
            "signature": "0x00"
        })
    }

    #[test]
    fn test_envelope_deserializes_mixed_number_encodings() {
        let envelope: PaymentEnvelope = serde_json::from_value(envelope_json()).unwrap();
        assert_eq!(envelope.authorization.value, TokenAmount::from(1_000_000));
        assert_eq!(envelope.authorization.valid_before.as_secs(), 1_700_000_600);
        assert_eq!(envelope.authorization.nonce, B256::repeat_byte(1));

        let out = serde_json::to_value(&envelope).unwrap();
        assert_eq!(out["authorization"]["value"], "1000000");
        assert_eq!(out["authorization"]["validBefore"], 1_700_000_600);
    }

    #[test]
    fn test_token_amount_rejects_non_decimal() {
        assert!("0x10".parse::<TokenAmount>().is_err());
        assert!("-1".parse::<TokenAmount>().is_err());
        assert!("1.5".parse::<TokenAmount>().is_err());
        assert!("".parse::<TokenAmount>().is_err());
        let max = U256::MAX.to_string();
        assert_eq!(max.parse::<TokenAmount>().unwrap().inner(), U256::MAX);
    }

    #[test]
    fn test_verification_result_shape() {
        let envelope: PaymentEnvelope = serde_json::from_value(envelope_json()).unwrap();
        let ok = serde_json::to_value(VerificationResult::valid(&envelope, 8453)).unwrap();
        assert_eq!(ok["valid"], true);
        assert!(ok.get("reason").is_none());
        assert_eq!(ok["trace"]["chainId"], 8453);
        assert_eq!(ok["amount"], "1000000");

        let bad = VerificationResult::invalid(
            &envelope,
            None,
            PaymentErrorKind::UnknownNetwork,
            "unknown network: base",
        );
        assert!(!bad.valid);
        let bad = serde_json::to_value(bad).unwrap();
        assert_eq!(bad["reason"], "unknown_network");
        assert!(bad["trace"].get("chainId").is_none());
    }

    #[test]
    fn test_settlement_result_shape() {
        let envelope: PaymentEnvelope = serde_json::from_value(envelope_json()).unwrap();
        let hash = TxHash::repeat_byte(0xab);
        let confirmed = SettlementResult::confirmed(&envelope, 8453, hash, Some(12));
        assert!(confirmed.is_confirmed());
        let json = serde_json::to_value(&confirmed).unwrap();
        assert_eq!(json["status"], "confirmed");
        assert_eq!(json["blockNumber"], 12);

        let failed = SettlementResult::failed(&envelope, Some(8453), PaymentErrorKind::SettlementReverted)
            .with_transaction(hash)
            .with_revert_reason("FiatTokenV2: invalid signature");
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "settlement_reverted");
        assert_eq!(json["revertReason"], "FiatTokenV2: invalid signature");
        assert!(json.get("transactionHash").is_some());
    }
}
