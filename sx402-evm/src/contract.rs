//! Solidity interface of the USDC EIP-3009 surface.
//!
//! Only the functions the facilitator calls are declared. Calls are encoded
//! to raw calldata here and shipped through a [`ChainClient`](crate::client::ChainClient),
//! so no contract-instance bindings are generated.

use alloy_primitives::{Address, B256, Bytes};
use alloy_sol_types::{SolCall, sol};

sol! {
    /// ERC-3009 subset implemented by Circle's `FiatTokenV2_2`.
    ///
    /// References:
    /// - ERC-3009: <https://eips.ethereum.org/EIPS/eip-3009>
    /// - USDC `FiatTokenV2_2`: <https://github.com/circlefin/stablecoin-evm>
    #[allow(missing_docs)]
    #[allow(clippy::too_many_arguments)]
    #[derive(Debug)]
    interface IEIP3009 {
        function authorizationState(address authorizer, bytes32 nonce) external view returns (bool);
        function transferWithAuthorization(
            address from,
            address to,
            uint256 value,
            uint256 validAfter,
            uint256 validBefore,
            bytes32 nonce,
            uint8 v,
            bytes32 r,
            bytes32 s
        ) external;
    }
}

/// Calldata for `authorizationState(authorizer, nonce)`.
#[must_use]
pub fn authorization_state_calldata(authorizer: Address, nonce: B256) -> Bytes {
    IEIP3009::authorizationStateCall { authorizer, nonce }
        .abi_encode()
        .into()
}

/// Decodes the boolean returned by `authorizationState`.
///
/// # Errors
///
/// Returns an ABI error when `data` is not a single ABI-encoded `bool`.
pub fn decode_authorization_state(data: &[u8]) -> Result<bool, alloy_sol_types::Error> {
    IEIP3009::authorizationStateCall::abi_decode_returns(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_sol_types::SolValue;

    #[test]
    fn test_authorization_state_selector() {
        // keccak256("authorizationState(address,bytes32)")[..4]
        let calldata = authorization_state_calldata(Address::ZERO, B256::ZERO);
        assert_eq!(&calldata[..4], &[0xe9, 0x4a, 0x01, 0x02]);
        assert_eq!(calldata.len(), 4 + 32 + 32);
    }

    #[test]
    fn test_transfer_with_authorization_selector() {
        // keccak256("transferWithAuthorization(address,address,uint256,uint256,uint256,bytes32,uint8,bytes32,bytes32)")[..4]
        assert_eq!(
            IEIP3009::transferWithAuthorizationCall::SELECTOR,
            [0xe3, 0xee, 0x16, 0x0e]
        );
    }

    #[test]
    fn test_decode_authorization_state() {
        assert!(decode_authorization_state(&true.abi_encode()).unwrap());
        assert!(!decode_authorization_state(&false.abi_encode()).unwrap());
        assert!(decode_authorization_state(&[]).is_err());
    }
}
