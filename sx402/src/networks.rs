//! Registry of EIP-3009 capable networks and their USDC deployments.
//!
//! A [`NetworkRegistry`] maps a network key (a canonical name such as
//! `"arbitrum"` or an alias such as `"arbitrum-one"`) to a shared
//! [`NetworkConfig`]. Lookups are exact-match and case-sensitive; every key is
//! lowercase.
//!
//! The built-in table covers Ethereum, Base, Arbitrum, Avalanche, Celo and
//! Celo Sepolia, and is reachable through [`builtin`] and [`resolve`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, LazyLock};

use alloy_primitives::{Address, address};
use serde::{Deserialize, Serialize};

use crate::chain::ChainId;

/// Ethereum Mainnet chain ID.
pub const ETHEREUM_MAINNET: ChainId = 1;

/// Base Mainnet chain ID.
pub const BASE_MAINNET: ChainId = 8453;

/// Arbitrum One chain ID.
pub const ARBITRUM_ONE: ChainId = 42161;

/// Celo Mainnet chain ID.
pub const CELO_MAINNET: ChainId = 42220;

/// Avalanche C-Chain chain ID.
pub const AVALANCHE_MAINNET: ChainId = 43114;

/// Celo Sepolia (testnet) chain ID.
pub const CELO_SEPOLIA: ChainId = 11_142_220;

/// USDC contract address on Ethereum Mainnet.
pub const USDC_ETHEREUM: Address = address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");

/// USDC contract address on Base Mainnet.
pub const USDC_BASE: Address = address!("833589fCD6eDb6E08f4c7C32D4f71b54bdA02913");

/// USDC contract address on Arbitrum One.
pub const USDC_ARBITRUM: Address = address!("af88d065e77c8cC2239327C5EDb3A432268e5831");

/// USDC contract address on Celo.
pub const USDC_CELO: Address = address!("cebA9300f2b948710d2653dD7B07f33A8B32118C");

/// USDC contract address on Avalanche C-Chain.
pub const USDC_AVALANCHE: Address = address!("B97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E");

/// USDC contract address on Celo Sepolia.
pub const USDC_CELO_SEPOLIA: Address = address!("01C5C0122039549AD1493B8220cABEdD739BC44E");

/// EIP-712 domain name of Circle's native USDC.
pub const CIRCLE_USDC_EIP712_NAME: &str = "USD Coin";

/// EIP-712 domain name of the USDC deployments on Celo.
pub const CELO_USDC_EIP712_NAME: &str = "USDC";

/// EIP-712 domain version shared by every USDC deployment in the table.
pub const USDC_EIP712_VERSION: &str = "2";

/// EIP-712 domain parameters of a token contract.
///
/// These must match what the contract itself reports via `name()` and
/// `version()`, otherwise every signature recovers to the wrong address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDomain {
    /// EIP-712 domain name.
    pub name: String,
    /// EIP-712 domain version.
    pub version: String,
}

impl TokenDomain {
    /// Creates a new token domain.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Static description of a network with an EIP-3009 USDC deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    /// Canonical EVM chain ID. Unique across a registry.
    pub chain_id: ChainId,
    /// Canonical lowercase identifier (e.g. `"arbitrum"`).
    pub name: String,
    /// USDC token contract.
    pub usdc_address: Address,
    /// Token display name.
    pub usdc_name: String,
    /// Default JSON-RPC endpoint.
    pub rpc_url: String,
    /// Block explorer base URL.
    pub block_explorer: String,
    /// Whether this is a test network.
    pub is_testnet: bool,
    /// EIP-712 domain of the USDC contract.
    pub eip712: TokenDomain,
}

/// A registry key did not map to any network.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown network: {key}")]
pub struct UnknownNetwork {
    /// The key that failed to resolve.
    pub key: String,
}

impl UnknownNetwork {
    /// Creates a new error for `key`.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// Inconsistent input to [`NetworkRegistry::try_new`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Two networks share a chain ID.
    #[error("chain id {chain_id} is claimed by both {first} and {second}")]
    DuplicateChainId {
        /// The shared chain ID.
        chain_id: ChainId,
        /// Name of the first network claiming it.
        first: String,
        /// Name of the second network claiming it.
        second: String,
    },
    /// A name or alias is registered twice.
    #[error("network key {0} is registered more than once")]
    DuplicateKey(String),
    /// A name or alias is empty or contains uppercase characters.
    #[error("network key {0:?} must be a non-empty lowercase string")]
    InvalidKey(String),
    /// An alias targets a name that is not a canonical network.
    #[error("alias {alias} points at unknown network {target}")]
    DanglingAlias {
        /// The offending alias.
        alias: String,
        /// The missing canonical name.
        target: String,
    },
}

/// Immutable lookup table from network key to [`NetworkConfig`].
///
/// Aliases resolve to the same `Arc` instance as their canonical name, so
/// `Arc::ptr_eq` holds between `resolve("eth")` and `resolve("ethereum")`.
#[derive(Debug, Clone, Default)]
pub struct NetworkRegistry {
    by_key: HashMap<String, Arc<NetworkConfig>>,
    by_chain_id: BTreeMap<ChainId, Arc<NetworkConfig>>,
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && !key.chars().any(char::is_uppercase)
}

impl NetworkRegistry {
    /// Builds a registry from canonical networks and `(alias, canonical)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] on duplicate chain IDs, duplicate keys,
    /// non-lowercase keys, or aliases pointing at unknown networks.
    pub fn try_new<N, A, K, V>(networks: N, aliases: A) -> Result<Self, RegistryError>
    where
        N: IntoIterator<Item = NetworkConfig>,
        A: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mut registry = Self::default();
        for config in networks {
            if !is_valid_key(&config.name) {
                return Err(RegistryError::InvalidKey(config.name));
            }
            if registry.by_key.contains_key(&config.name) {
                return Err(RegistryError::DuplicateKey(config.name));
            }
            if let Some(existing) = registry.by_chain_id.get(&config.chain_id) {
                return Err(RegistryError::DuplicateChainId {
                    chain_id: config.chain_id,
                    first: existing.name.clone(),
                    second: config.name,
                });
            }
            let config = Arc::new(config);
            registry
                .by_key
                .insert(config.name.clone(), Arc::clone(&config));
            registry.by_chain_id.insert(config.chain_id, config);
        }
        for (alias, target) in aliases {
            let alias = alias.into();
            let target = target.as_ref();
            if !is_valid_key(&alias) {
                return Err(RegistryError::InvalidKey(alias));
            }
            if registry.by_key.contains_key(&alias) {
                return Err(RegistryError::DuplicateKey(alias));
            }
            let canonical = registry
                .by_key
                .get(target)
                .filter(|config| config.name == target)
                .cloned()
                .ok_or_else(|| RegistryError::DanglingAlias {
                    alias: alias.clone(),
                    target: target.to_owned(),
                })?;
            registry.by_key.insert(alias, canonical);
        }
        Ok(registry)
    }

    /// Resolves a network key (canonical name or alias).
    ///
    /// # Errors
    ///
    /// Returns [`UnknownNetwork`] when the key is not registered.
    pub fn resolve(&self, key: &str) -> Result<Arc<NetworkConfig>, UnknownNetwork> {
        self.by_key
            .get(key)
            .cloned()
            .ok_or_else(|| UnknownNetwork::new(key))
    }

    /// Looks up a network by chain ID.
    #[must_use]
    pub fn by_chain_id(&self, chain_id: ChainId) -> Option<&Arc<NetworkConfig>> {
        self.by_chain_id.get(&chain_id)
    }

    /// Canonical networks in ascending chain ID order.
    pub fn networks(&self) -> impl Iterator<Item = &Arc<NetworkConfig>> {
        self.by_chain_id.values()
    }

    /// Every registered key, aliases included, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.by_key.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Aliases (non-canonical keys) that resolve to `name`, sorted.
    #[must_use]
    pub fn aliases_of(&self, name: &str) -> Vec<&str> {
        let mut aliases: Vec<&str> = self
            .by_key
            .iter()
            .filter(|(key, config)| config.name == name && key.as_str() != name)
            .map(|(key, _)| key.as_str())
            .collect();
        aliases.sort_unstable();
        aliases
    }

    /// Returns a copy of the registry with the RPC URL of `key`'s network
    /// replaced. Aliases keep pointing at the same instance.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownNetwork`] when the key is not registered.
    pub fn with_rpc_url(
        mut self,
        key: &str,
        rpc_url: impl Into<String>,
    ) -> Result<Self, UnknownNetwork> {
        let current = self.resolve(key)?;
        let mut updated = NetworkConfig::clone(&current);
        updated.rpc_url = rpc_url.into();
        let updated = Arc::new(updated);
        for config in self.by_key.values_mut() {
            if Arc::ptr_eq(config, &current) {
                *config = Arc::clone(&updated);
            }
        }
        self.by_chain_id.insert(updated.chain_id, updated);
        Ok(self)
    }

    /// Number of canonical networks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_chain_id.len()
    }

    /// Returns `true` if no networks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_chain_id.is_empty()
    }
}

fn usdc(
    chain_id: ChainId,
    name: &str,
    usdc_address: Address,
    eip712_name: &str,
    rpc_url: &str,
    block_explorer: &str,
    is_testnet: bool,
) -> NetworkConfig {
    NetworkConfig {
        chain_id,
        name: name.to_owned(),
        usdc_address,
        usdc_name: "USDC".to_owned(),
        rpc_url: rpc_url.to_owned(),
        block_explorer: block_explorer.to_owned(),
        is_testnet,
        eip712: TokenDomain::new(eip712_name, USDC_EIP712_VERSION),
    }
}

/// Returns the built-in network configurations.
#[must_use]
pub fn known_networks() -> Vec<NetworkConfig> {
    vec![
        usdc(
            CELO_MAINNET,
            "celo",
            USDC_CELO,
            CELO_USDC_EIP712_NAME,
            "https://forno.celo.org",
            "https://celoscan.io",
            false,
        ),
        usdc(
            CELO_SEPOLIA,
            "celo-sepolia",
            USDC_CELO_SEPOLIA,
            CELO_USDC_EIP712_NAME,
            "https://celo-sepolia.g.alchemy.com/v2/demo",
            "https://celo-sepolia.blockscout.com",
            true,
        ),
        usdc(
            ARBITRUM_ONE,
            "arbitrum",
            USDC_ARBITRUM,
            CIRCLE_USDC_EIP712_NAME,
            "https://arb1.arbitrum.io/rpc",
            "https://arbiscan.io",
            false,
        ),
        usdc(
            AVALANCHE_MAINNET,
            "avalanche",
            USDC_AVALANCHE,
            CIRCLE_USDC_EIP712_NAME,
            "https://api.avax.network/ext/bc/C/rpc",
            "https://snowtrace.io",
            false,
        ),
        usdc(
            BASE_MAINNET,
            "base",
            USDC_BASE,
            CIRCLE_USDC_EIP712_NAME,
            "https://mainnet.base.org",
            "https://basescan.org",
            false,
        ),
        usdc(
            ETHEREUM_MAINNET,
            "ethereum",
            USDC_ETHEREUM,
            CIRCLE_USDC_EIP712_NAME,
            "https://eth.llamarpc.com",
            "https://etherscan.io",
            false,
        ),
    ]
}

/// Built-in `(alias, canonical)` pairs.
pub const KNOWN_ALIASES: &[(&str, &str)] = &[
    ("celo-mainnet", "celo"),
    ("celo-testnet", "celo-sepolia"),
    ("arbitrum-one", "arbitrum"),
    ("avalanche-c-chain", "avalanche"),
    ("avax", "avalanche"),
    ("base-mainnet", "base"),
    ("ethereum-mainnet", "ethereum"),
    ("eth", "ethereum"),
];

static BUILTIN: LazyLock<NetworkRegistry> = LazyLock::new(|| {
    NetworkRegistry::try_new(known_networks(), KNOWN_ALIASES.iter().copied())
        .expect("built-in network table is consistent")
});

/// The process-wide built-in registry.
#[must_use]
pub fn builtin() -> &'static NetworkRegistry {
    &BUILTIN
}

/// Resolves `key` against the built-in registry.
///
/// # Errors
///
/// Returns [`UnknownNetwork`] when the key is not registered.
pub fn resolve(key: &str) -> Result<Arc<NetworkConfig>, UnknownNetwork> {
    BUILTIN.resolve(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_ethereum_aliases() {
        let eth = resolve("eth").unwrap();
        let canonical = resolve("ethereum").unwrap();
        let long = resolve("ethereum-mainnet").unwrap();
        assert_eq!(eth.chain_id, 1);
        assert_eq!(canonical.chain_id, 1);
        assert_eq!(long.chain_id, 1);
        assert!(Arc::ptr_eq(&eth, &canonical));
        assert!(Arc::ptr_eq(&long, &canonical));
    }

    #[test]
    fn test_resolve_every_alias_points_at_canonical() {
        for (alias, canonical) in KNOWN_ALIASES {
            let a = resolve(alias).unwrap();
            let c = resolve(canonical).unwrap();
            assert!(Arc::ptr_eq(&a, &c), "{alias} -> {canonical}");
            assert_eq!(a.name, *canonical);
        }
    }

    #[test]
    fn test_resolve_is_case_sensitive() {
        assert_eq!(resolve("ETH").unwrap_err(), UnknownNetwork::new("ETH"));
        assert!(resolve("Base").is_err());
        assert!(resolve("").is_err());
        assert!(resolve("polygon").is_err());
    }

    #[test]
    fn test_builtin_table_contents() {
        let registry = builtin();
        assert_eq!(registry.len(), 6);
        let ids: Vec<ChainId> = registry.networks().map(|n| n.chain_id).collect();
        assert_eq!(ids, vec![1, 8453, 42161, 42220, 43114, 11_142_220]);
        assert_eq!(registry.keys().len(), 14);

        let celo = resolve("celo").unwrap();
        assert_eq!(celo.eip712.name, "USDC");
        assert_eq!(celo.usdc_address, USDC_CELO);
        let base = resolve("base").unwrap();
        assert_eq!(base.eip712, TokenDomain::new("USD Coin", "2"));
        assert!(resolve("celo-testnet").unwrap().is_testnet);
        assert_eq!(registry.aliases_of("avalanche"), vec!["avalanche-c-chain", "avax"]);
    }

    #[test]
    fn test_try_new_rejects_duplicate_chain_id() {
        let mut networks = known_networks();
        let mut clone = networks[0].clone();
        clone.name = "celo-copy".to_owned();
        networks.push(clone);
        let err = NetworkRegistry::try_new(networks, Vec::<(String, String)>::new()).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateChainId { chain_id: 42220, .. }));
    }

    #[test]
    fn test_try_new_rejects_bad_keys_and_dangling_aliases() {
        let err = NetworkRegistry::try_new(known_networks(), [("Eth", "ethereum")]).unwrap_err();
        assert_eq!(err, RegistryError::InvalidKey("Eth".to_owned()));

        let err = NetworkRegistry::try_new(known_networks(), [("base", "ethereum")]).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateKey("base".to_owned()));

        let err = NetworkRegistry::try_new(known_networks(), [("poly", "polygon")]).unwrap_err();
        assert!(matches!(err, RegistryError::DanglingAlias { .. }));

        // an alias of an alias is dangling: targets must be canonical
        let err = NetworkRegistry::try_new(
            known_networks(),
            [("eth", "ethereum"), ("mainnet", "eth")],
        )
        .unwrap_err();
        assert!(matches!(err, RegistryError::DanglingAlias { .. }));
    }

    #[test]
    fn test_with_rpc_url_updates_aliases() {
        let registry = builtin()
            .clone()
            .with_rpc_url("eth", "http://localhost:8545")
            .unwrap();
        let canonical = registry.resolve("ethereum").unwrap();
        assert_eq!(canonical.rpc_url, "http://localhost:8545");
        assert!(Arc::ptr_eq(&canonical, &registry.resolve("eth").unwrap()));
        assert!(Arc::ptr_eq(&canonical, registry.by_chain_id(1).unwrap()));
        // the static table is untouched
        assert_eq!(resolve("ethereum").unwrap().rpc_url, "https://eth.llamarpc.com");
    }

    #[test]
    fn test_network_config_serializes_camel_case() {
        let json = serde_json::to_value(&*resolve("base").unwrap()).unwrap();
        assert_eq!(json["chainId"], 8453);
        assert_eq!(json["usdcAddress"], "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913");
        assert_eq!(json["isTestnet"], false);
        assert_eq!(json["eip712"]["version"], "2");
    }
}
