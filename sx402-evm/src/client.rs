//! The chain capability the facilitator depends on.
//!
//! [`ChainClient`] is the seam between the verification/settlement engine and
//! the network: ABI-encoded reads, transaction submission, receipt waits and
//! the latest block timestamp. [`Eip155Client`](crate::provider::Eip155Client)
//! implements it on top of alloy; tests substitute an in-memory contract.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, TxHash};
use sx402::timestamp::UnixTimestamp;

/// Outcome of a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptSummary {
    /// Hash of the mined transaction.
    pub transaction_hash: TxHash,
    /// Inclusion block.
    pub block_number: Option<u64>,
    /// `true` when the receipt status is success.
    pub success: bool,
}

/// Failure of a single [`ChainClient`] call, classified for retry decisions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The call did not complete within its deadline.
    #[error("rpc call timed out after {0:?}")]
    Timeout(Duration),
    /// The node rejected the call for exceeding a rate limit.
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// The node reported the signer's account nonce as already used.
    #[error("nonce too low: {0}")]
    NonceTooLow(String),
    /// The node failed in a way that may succeed if retried (5xx, connection reset).
    #[error("transient rpc failure: {0}")]
    Transient(String),
    /// Execution reverted. `reason` is the decoded revert string, verbatim.
    #[error("execution reverted: {reason}")]
    Reverted {
        /// Revert reason as reported by the node.
        reason: String,
    },
    /// The node rejected the call and retrying will not help.
    #[error("rpc failure: {0}")]
    Terminal(String),
    /// The response could not be decoded.
    #[error("malformed rpc response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Whether the same call may succeed if retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::RateLimited(_) | Self::NonceTooLow(_) | Self::Transient(_)
        )
    }

    /// Whether a failed `send_transaction` may still have put the
    /// transaction on the network. Rejections (rate limit, stale account
    /// nonce) never do; a lost response or a timeout might.
    #[must_use]
    pub const fn may_have_broadcast(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transient(_))
    }

    /// Classifies a node error message.
    ///
    /// Matching is case-insensitive and substring-based, since nodes disagree
    /// on error codes but agree on wording.
    #[must_use]
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();
        if lower.contains("nonce too low") {
            Self::NonceTooLow(message)
        } else if lower.contains("rate limit")
            || lower.contains("too many requests")
            || lower.contains("429")
        {
            Self::RateLimited(message)
        } else if lower.contains("execution reverted") {
            let reason = message
                .split_once("execution reverted")
                .map(|(_, rest)| rest.trim_start_matches(':').trim())
                .filter(|rest| !rest.is_empty())
                .unwrap_or(&message)
                .to_owned();
            Self::Reverted { reason }
        } else if lower.contains("timeout")
            || lower.contains("timed out")
            || lower.contains("connection")
            || lower.contains("temporarily unavailable")
            || lower.contains("header not found")
        {
            Self::Transient(message)
        } else {
            Self::Terminal(message)
        }
    }
}

/// Capability to read from and transact against one chain with one signer.
#[async_trait::async_trait]
pub trait ChainClient: Send + Sync {
    /// Address of the operating key that pays gas for settlements.
    fn signer_address(&self) -> Address;

    /// Executes `calldata` against `to` as an `eth_call` on the latest block.
    async fn read_contract(&self, to: Address, calldata: Bytes) -> Result<Bytes, ClientError>;

    /// Signs and broadcasts a transaction calling `to` with `calldata`.
    async fn send_transaction(&self, to: Address, calldata: Bytes) -> Result<TxHash, ClientError>;

    /// Waits up to `timeout` for `hash` to be mined. `Ok(None)` means the
    /// deadline passed without a receipt.
    async fn wait_for_receipt(
        &self,
        hash: TxHash,
        timeout: Duration,
    ) -> Result<Option<ReceiptSummary>, ClientError>;

    /// Timestamp of the latest block.
    async fn latest_block_timestamp(&self) -> Result<UnixTimestamp, ClientError>;
}

#[async_trait::async_trait]
impl<T: ChainClient + ?Sized> ChainClient for Arc<T> {
    fn signer_address(&self) -> Address {
        (**self).signer_address()
    }

    async fn read_contract(&self, to: Address, calldata: Bytes) -> Result<Bytes, ClientError> {
        (**self).read_contract(to, calldata).await
    }

    async fn send_transaction(&self, to: Address, calldata: Bytes) -> Result<TxHash, ClientError> {
        (**self).send_transaction(to, calldata).await
    }

    async fn wait_for_receipt(
        &self,
        hash: TxHash,
        timeout: Duration,
    ) -> Result<Option<ReceiptSummary>, ClientError> {
        (**self).wait_for_receipt(hash, timeout).await
    }

    async fn latest_block_timestamp(&self) -> Result<UnixTimestamp, ClientError> {
        (**self).latest_block_timestamp().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_message_classification() {
        assert!(matches!(
            ClientError::from_message("nonce too low: next nonce 1210, tx nonce 1209"),
            ClientError::NonceTooLow(_)
        ));
        assert!(matches!(
            ClientError::from_message("HTTP error 429 with body: Too Many Requests"),
            ClientError::RateLimited(_)
        ));
        assert!(matches!(
            ClientError::from_message("error sending request: connection reset"),
            ClientError::Transient(_)
        ));
        assert!(matches!(
            ClientError::from_message("insufficient funds for gas * price + value"),
            ClientError::Terminal(_)
        ));
    }

    #[test]
    fn test_from_message_keeps_revert_reason_verbatim() {
        assert_eq!(
            ClientError::from_message("execution reverted: FiatTokenV2: invalid signature"),
            ClientError::Reverted {
                reason: "FiatTokenV2: invalid signature".to_owned()
            }
        );
        assert_eq!(
            ClientError::from_message("execution reverted"),
            ClientError::Reverted {
                reason: "execution reverted".to_owned()
            }
        );
    }

    #[test]
    fn test_transient_split() {
        assert!(ClientError::Timeout(Duration::from_secs(5)).is_transient());
        assert!(ClientError::NonceTooLow(String::new()).is_transient());
        assert!(!ClientError::Reverted { reason: String::new() }.is_transient());
        assert!(!ClientError::Decode(String::new()).is_transient());
    }

    #[test]
    fn test_may_have_broadcast() {
        assert!(ClientError::Transient("connection reset".to_owned()).may_have_broadcast());
        assert!(ClientError::Timeout(Duration::from_secs(5)).may_have_broadcast());
        assert!(!ClientError::RateLimited(String::new()).may_have_broadcast());
        assert!(!ClientError::NonceTooLow(String::new()).may_have_broadcast());
    }
}
