//! EIP-712 typed data for `transferWithAuthorization`.
//!
//! The digest a payer signs is `eip712_signing_hash(domain)` of a
//! [`TransferWithAuthorization`] struct, where the domain binds the token's
//! EIP-712 name and version, the chain ID and the token contract address.

use alloy_primitives::{B256, U256};
use alloy_sol_types::{Eip712Domain, SolStruct, sol};
use sx402::networks::NetworkConfig;
use sx402::proto::PaymentAuthorization;

sol! {
    /// EIP-712 struct signed by the payer for an ERC-3009 transfer.
    ///
    /// Field order and names must match `FiatTokenV2`'s
    /// `TRANSFER_WITH_AUTHORIZATION_TYPEHASH` exactly.
    #[allow(missing_docs)]
    #[derive(Debug)]
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
}

impl From<&PaymentAuthorization> for TransferWithAuthorization {
    fn from(authorization: &PaymentAuthorization) -> Self {
        Self {
            from: authorization.from,
            to: authorization.to,
            value: authorization.value.inner(),
            validAfter: U256::from(authorization.valid_after.as_secs()),
            validBefore: U256::from(authorization.valid_before.as_secs()),
            nonce: authorization.nonce,
        }
    }
}

/// Builds the EIP-712 domain of `network`'s USDC contract.
#[must_use]
pub fn token_domain(network: &NetworkConfig) -> Eip712Domain {
    Eip712Domain::new(
        Some(network.eip712.name.clone().into()),
        Some(network.eip712.version.clone().into()),
        Some(U256::from(network.chain_id)),
        Some(network.usdc_address),
        None,
    )
}

/// EIP-712 digest of `authorization` under `network`'s token domain.
#[must_use]
pub fn authorization_digest(network: &NetworkConfig, authorization: &PaymentAuthorization) -> B256 {
    TransferWithAuthorization::from(authorization).eip712_signing_hash(&token_domain(network))
}
