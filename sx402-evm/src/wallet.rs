//! Wallet adapter: private key plus resolved chain to a [`ChainClient`].
//!
//! RPC endpoints are taken in order of preference: an explicit override, the
//! network's configured URL, then the chain descriptor's defaults. Duplicates
//! are dropped; the remaining list feeds the fallback transport.

use std::str::FromStr;

use alloy_signer_local::PrivateKeySigner;
use sx402::chain::{ChainDescriptor, ChainResolver, UnsupportedChainId};
use sx402::networks::NetworkConfig;
use url::Url;

use crate::provider::{ClientOptions, Eip155Client, NoRpcEndpoint};

/// Failure to build a client from a key and a chain.
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    /// The private key is not a 32-byte hex secp256k1 scalar. The key itself
    /// is never included in the message.
    #[error("invalid signer private key")]
    InvalidPrivateKey,
    /// The network's chain has no descriptor.
    #[error(transparent)]
    UnsupportedChain(#[from] UnsupportedChainId),
    /// An RPC URL failed to parse.
    #[error("invalid rpc url {url}: {source}")]
    InvalidRpcUrl {
        /// The offending URL.
        url: String,
        /// Parse failure.
        source: url::ParseError,
    },
    /// No HTTP(S) endpoint is available.
    #[error(transparent)]
    NoRpcEndpoint(#[from] NoRpcEndpoint),
}

/// Parses a hex private key, with or without `0x`.
///
/// # Errors
///
/// Returns [`WalletError::InvalidPrivateKey`] when the key does not parse.
pub fn parse_private_key(private_key: &str) -> Result<PrivateKeySigner, WalletError> {
    PrivateKeySigner::from_str(private_key.trim()).map_err(|_| WalletError::InvalidPrivateKey)
}

fn endpoints<'a>(candidates: impl IntoIterator<Item = &'a str>) -> Result<Vec<Url>, WalletError> {
    let mut urls: Vec<Url> = Vec::new();
    for candidate in candidates {
        let url = Url::parse(candidate).map_err(|source| WalletError::InvalidRpcUrl {
            url: candidate.to_owned(),
            source,
        })?;
        if !urls.contains(&url) {
            urls.push(url);
        }
    }
    Ok(urls)
}

/// Connects to `chain` with `private_key`, using `rpc_override` ahead of the
/// descriptor's default endpoints.
///
/// # Errors
///
/// Returns [`WalletError`] if the key or a URL is invalid, or no HTTP(S)
/// endpoint remains.
pub fn connect(
    private_key: &str,
    chain: &ChainDescriptor,
    rpc_override: Option<&str>,
    options: ClientOptions,
) -> Result<Eip155Client, WalletError> {
    let signer = parse_private_key(private_key)?;
    let urls = endpoints(
        rpc_override
            .into_iter()
            .chain(chain.rpc_urls.iter().map(String::as_str)),
    )?;
    Ok(Eip155Client::new(chain.id, signer, &urls, options)?)
}

/// Connects to `network`'s chain, preferring the network's own RPC URL.
///
/// # Errors
///
/// Returns [`WalletError::UnsupportedChain`] when `chains` has no descriptor
/// for the network, or any error of [`connect`].
pub fn connect_network(
    private_key: &str,
    network: &NetworkConfig,
    chains: &ChainResolver,
    options: ClientOptions,
) -> Result<Eip155Client, WalletError> {
    let chain = chains.chain_descriptor(network.chain_id)?;
    connect(private_key, chain, Some(&network.rpc_url), options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ChainClient;
    use sx402::networks;

    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn test_parse_private_key() {
        assert!(parse_private_key(KEY).is_ok());
        assert!(parse_private_key(KEY.trim_start_matches("0x")).is_ok());
        assert!(matches!(
            parse_private_key("0x1234"),
            Err(WalletError::InvalidPrivateKey)
        ));
    }

    #[test]
    fn test_invalid_key_is_not_echoed() {
        let message = parse_private_key("not-a-secret-key").unwrap_err().to_string();
        assert!(!message.contains("not-a-secret-key"));
    }

    #[test]
    fn test_endpoints_dedup_and_order() {
        let urls = endpoints(["https://a.example", "https://b.example", "https://a.example"]).unwrap();
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0].host_str(), Some("a.example"));
        assert!(matches!(
            endpoints(["not a url"]),
            Err(WalletError::InvalidRpcUrl { .. })
        ));
    }

    #[tokio::test]
    async fn test_connect_network_binds_chain_and_signer() {
        let network = networks::resolve("avax").unwrap();
        let client =
            connect_network(KEY, &network, sx402::chain::builtin(), ClientOptions::default())
                .unwrap();
        assert_eq!(client.chain_id(), 43114);
        assert_eq!(
            client.signer_address().to_string(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
        );
    }

    #[test]
    fn test_connect_network_rejects_unknown_chain() {
        let mut network = NetworkConfig::clone(&networks::resolve("base").unwrap());
        network.chain_id = 137;
        let err = connect_network(KEY, &network, sx402::chain::builtin(), ClientOptions::default())
            .unwrap_err();
        assert!(matches!(err, WalletError::UnsupportedChain(_)));
    }
}
