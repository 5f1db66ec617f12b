//! Chain descriptors for the EVM chains the facilitator can settle on.
//!
//! A [`ChainDescriptor`] carries the per-chain data a wallet client needs
//! (native currency, default RPC endpoints, block explorer, multicall3
//! deployment). Chain quirks are expressed as data on the descriptor, never as
//! separate types.
//!
//! [`ChainResolver`] fails closed: an ID outside its table yields
//! [`UnsupportedChainId`] listing every supported ID.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use alloy_primitives::{Address, address};
use serde::Serialize;

use crate::networks::{
    ARBITRUM_ONE, AVALANCHE_MAINNET, BASE_MAINNET, CELO_MAINNET, CELO_SEPOLIA, ETHEREUM_MAINNET,
    NetworkRegistry,
};

/// Numeric EIP-155 chain ID.
pub type ChainId = u64;

/// Canonical multicall3 deployment address, identical on every chain that has one.
pub const MULTICALL3_ADDRESS: Address = address!("cA11bde05977b3631167028862bE2a173976CA11");

/// Native gas currency of a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NativeCurrency {
    /// Display name (e.g. `"Ether"`).
    pub name: String,
    /// Ticker symbol (e.g. `"ETH"`).
    pub symbol: String,
    /// Decimal places.
    pub decimals: u8,
}

/// A block explorer front-end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockExplorer {
    /// Display name (e.g. `"Etherscan"`).
    pub name: String,
    /// Base URL.
    pub url: String,
}

/// A contract deployed at a known address from a known block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractDeployment {
    /// Contract address.
    pub address: Address,
    /// Block in which the contract was created.
    pub block_created: u64,
}

/// Well-known contracts on a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct WellKnownContracts {
    /// Multicall3 aggregator, when deployed.
    pub multicall3: Option<ContractDeployment>,
}

/// Fully specified description of a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainDescriptor {
    /// EIP-155 chain ID.
    pub id: ChainId,
    /// Human-readable chain name.
    pub name: String,
    /// Native gas currency.
    pub native_currency: NativeCurrency,
    /// Default public JSON-RPC endpoints, preferred first.
    pub rpc_urls: Vec<String>,
    /// Default block explorer.
    pub block_explorer: Option<BlockExplorer>,
    /// Well-known contract deployments.
    pub contracts: WellKnownContracts,
    /// Whether this is a test network.
    pub testnet: bool,
}

impl ChainDescriptor {
    /// Preferred default RPC endpoint, if any.
    #[must_use]
    pub fn default_rpc_url(&self) -> Option<&str> {
        self.rpc_urls.first().map(String::as_str)
    }
}

/// A chain ID outside the resolver's table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported chain id {chain_id}, supported: {}", SupportedIds(.supported))]
pub struct UnsupportedChainId {
    /// The rejected chain ID.
    pub chain_id: ChainId,
    /// Every chain ID the resolver knows, ascending.
    pub supported: Vec<ChainId>,
}

struct SupportedIds<'a>(&'a [ChainId]);

impl fmt::Display for SupportedIds<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{id}")?;
        }
        Ok(())
    }
}

/// The network registry and the chain resolver disagree.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableMismatch {
    /// A registered network has no chain descriptor.
    #[error("network {network} uses chain id {chain_id} which has no chain descriptor")]
    MissingDescriptor {
        /// Canonical network name.
        network: String,
        /// The network's chain ID.
        chain_id: ChainId,
    },
    /// The network and its descriptor disagree on the testnet flag.
    #[error("network {network} and chain {chain_id} disagree on whether it is a testnet")]
    TestnetFlag {
        /// Canonical network name.
        network: String,
        /// The network's chain ID.
        chain_id: ChainId,
    },
}

/// Lookup table from chain ID to [`ChainDescriptor`].
#[derive(Debug, Clone, Default)]
pub struct ChainResolver {
    descriptors: BTreeMap<ChainId, ChainDescriptor>,
}

impl ChainResolver {
    /// Builds a resolver from descriptors. A later descriptor with the same ID
    /// replaces an earlier one.
    #[must_use]
    pub fn new(descriptors: impl IntoIterator<Item = ChainDescriptor>) -> Self {
        Self {
            descriptors: descriptors.into_iter().map(|d| (d.id, d)).collect(),
        }
    }

    /// Returns the descriptor for `chain_id`.
    ///
    /// # Errors
    ///
    /// Returns [`UnsupportedChainId`] when the ID is not in the table.
    pub fn chain_descriptor(&self, chain_id: ChainId) -> Result<&ChainDescriptor, UnsupportedChainId> {
        self.descriptors
            .get(&chain_id)
            .ok_or_else(|| UnsupportedChainId {
                chain_id,
                supported: self.supported(),
            })
    }

    /// Every supported chain ID, ascending.
    #[must_use]
    pub fn supported(&self) -> Vec<ChainId> {
        self.descriptors.keys().copied().collect()
    }

    /// Iterates over descriptors in ascending chain ID order.
    pub fn descriptors(&self) -> impl Iterator<Item = &ChainDescriptor> {
        self.descriptors.values()
    }
}

/// Checks that every network in `networks` has a matching descriptor in `chains`.
///
/// # Errors
///
/// Returns the first [`TableMismatch`] found, in ascending chain ID order.
pub fn validate_tables(networks: &NetworkRegistry, chains: &ChainResolver) -> Result<(), TableMismatch> {
    for network in networks.networks() {
        let descriptor = chains.chain_descriptor(network.chain_id).map_err(|_| {
            TableMismatch::MissingDescriptor {
                network: network.name.clone(),
                chain_id: network.chain_id,
            }
        })?;
        if descriptor.testnet != network.is_testnet {
            return Err(TableMismatch::TestnetFlag {
                network: network.name.clone(),
                chain_id: network.chain_id,
            });
        }
    }
    Ok(())
}

fn ether() -> NativeCurrency {
    NativeCurrency {
        name: "Ether".to_owned(),
        symbol: "ETH".to_owned(),
        decimals: 18,
    }
}

fn celo_native() -> NativeCurrency {
    NativeCurrency {
        name: "CELO".to_owned(),
        symbol: "CELO".to_owned(),
        decimals: 18,
    }
}

fn explorer(name: &str, url: &str) -> Option<BlockExplorer> {
    Some(BlockExplorer {
        name: name.to_owned(),
        url: url.to_owned(),
    })
}

const fn multicall3(block_created: u64) -> WellKnownContracts {
    WellKnownContracts {
        multicall3: Some(ContractDeployment {
            address: MULTICALL3_ADDRESS,
            block_created,
        }),
    }
}

/// Returns the built-in chain descriptors.
#[must_use]
pub fn known_chains() -> Vec<ChainDescriptor> {
    vec![
        ChainDescriptor {
            id: ETHEREUM_MAINNET,
            name: "Ethereum".to_owned(),
            native_currency: ether(),
            rpc_urls: vec!["https://eth.merkle.io".to_owned()],
            block_explorer: explorer("Etherscan", "https://etherscan.io"),
            contracts: multicall3(14_353_601),
            testnet: false,
        },
        ChainDescriptor {
            id: BASE_MAINNET,
            name: "Base".to_owned(),
            native_currency: ether(),
            rpc_urls: vec!["https://mainnet.base.org".to_owned()],
            block_explorer: explorer("Basescan", "https://basescan.org"),
            contracts: multicall3(5022),
            testnet: false,
        },
        ChainDescriptor {
            id: ARBITRUM_ONE,
            name: "Arbitrum One".to_owned(),
            native_currency: ether(),
            rpc_urls: vec!["https://arb1.arbitrum.io/rpc".to_owned()],
            block_explorer: explorer("Arbiscan", "https://arbiscan.io"),
            contracts: multicall3(7_654_707),
            testnet: false,
        },
        ChainDescriptor {
            id: CELO_MAINNET,
            name: "Celo".to_owned(),
            native_currency: celo_native(),
            rpc_urls: vec!["https://forno.celo.org".to_owned()],
            block_explorer: explorer("CeloScan", "https://celoscan.io"),
            contracts: multicall3(13_112_599),
            testnet: false,
        },
        ChainDescriptor {
            id: AVALANCHE_MAINNET,
            name: "Avalanche".to_owned(),
            native_currency: NativeCurrency {
                name: "Avalanche".to_owned(),
                symbol: "AVAX".to_owned(),
                decimals: 18,
            },
            rpc_urls: vec!["https://api.avax.network/ext/bc/C/rpc".to_owned()],
            block_explorer: explorer("SnowTrace", "https://snowtrace.io"),
            contracts: multicall3(11_907_934),
            testnet: false,
        },
        ChainDescriptor {
            id: CELO_SEPOLIA,
            name: "Celo Sepolia".to_owned(),
            native_currency: celo_native(),
            rpc_urls: vec!["https://celo-sepolia.g.alchemy.com/v2/demo".to_owned()],
            block_explorer: explorer(
                "Celo Sepolia Explorer",
                "https://celo-sepolia.blockscout.com",
            ),
            contracts: WellKnownContracts::default(),
            testnet: true,
        },
    ]
}

static BUILTIN: LazyLock<ChainResolver> = LazyLock::new(|| ChainResolver::new(known_chains()));

/// The process-wide built-in chain resolver.
#[must_use]
pub fn builtin() -> &'static ChainResolver {
    &BUILTIN
}

/// Resolves `chain_id` against the built-in resolver.
///
/// # Errors
///
/// Returns [`UnsupportedChainId`] when the ID is not in the built-in table.
pub fn chain_descriptor(chain_id: ChainId) -> Result<&'static ChainDescriptor, UnsupportedChainId> {
    BUILTIN.chain_descriptor(chain_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::networks::{self, NetworkConfig, TokenDomain};

    #[test]
    fn test_known_ids_resolve_to_stable_descriptor() {
        for id in [1, 8453, 42161, 42220, 43114, 11_142_220] {
            let first = chain_descriptor(id).unwrap();
            let second = chain_descriptor(id).unwrap();
            assert_eq!(first, second);
            assert!(std::ptr::eq(first, second));
            assert_eq!(first.id, id);
        }
    }

    #[test]
    fn test_unknown_id_lists_supported_set() {
        let err = chain_descriptor(137).unwrap_err();
        assert_eq!(err.chain_id, 137);
        assert_eq!(err.supported, vec![1, 8453, 42161, 42220, 43114, 11_142_220]);
        assert_eq!(
            err.to_string(),
            "unsupported chain id 137, supported: 1, 8453, 42161, 42220, 43114, 11142220"
        );
    }

    #[test]
    fn test_descriptor_quirks_are_data() {
        let avax = chain_descriptor(43114).unwrap();
        assert_eq!(avax.native_currency.symbol, "AVAX");
        let celo = chain_descriptor(42220).unwrap();
        assert_eq!(celo.native_currency.symbol, "CELO");
        assert_eq!(
            celo.contracts.multicall3.unwrap().address,
            MULTICALL3_ADDRESS
        );
        let sepolia = chain_descriptor(11_142_220).unwrap();
        assert!(sepolia.testnet);
        assert!(sepolia.contracts.multicall3.is_none());
        assert_eq!(
            chain_descriptor(1).unwrap().default_rpc_url(),
            Some("https://eth.merkle.io")
        );
    }

    #[test]
    fn test_builtin_tables_cross_validate() {
        validate_tables(networks::builtin(), builtin()).unwrap();
    }

    #[test]
    fn test_validate_tables_detects_missing_descriptor() {
        let polygon = NetworkConfig {
            chain_id: 137,
            name: "polygon".to_owned(),
            usdc_address: Address::ZERO,
            usdc_name: "USDC".to_owned(),
            rpc_url: "https://polygon-rpc.com".to_owned(),
            block_explorer: "https://polygonscan.com".to_owned(),
            is_testnet: false,
            eip712: TokenDomain::new("USD Coin", "2"),
        };
        let mut list = networks::known_networks();
        list.push(polygon);
        let registry = NetworkRegistry::try_new(list, Vec::<(String, String)>::new()).unwrap();
        let err = validate_tables(&registry, builtin()).unwrap_err();
        assert_eq!(
            err,
            TableMismatch::MissingDescriptor {
                network: "polygon".to_owned(),
                chain_id: 137,
            }
        );
    }

    #[test]
    fn test_validate_tables_detects_testnet_disagreement() {
        let mut list = networks::known_networks();
        for network in &mut list {
            if network.chain_id == 8453 {
                network.is_testnet = true;
            }
        }
        let registry = NetworkRegistry::try_new(list, Vec::<(String, String)>::new()).unwrap();
        assert!(matches!(
            validate_tables(&registry, builtin()),
            Err(TableMismatch::TestnetFlag { chain_id: 8453, .. })
        ));
    }
}
