//! Routing of envelopes to per-chain facilitators.

use std::collections::BTreeMap;
use std::sync::Arc;

use alloy_primitives::Address;
use serde::Serialize;
use sx402::chain::{self, ChainId, ChainResolver};
use sx402::error::PaymentErrorKind;
use sx402::networks::{self, NetworkRegistry};
use sx402::proto::{PaymentEnvelope, SettlementResult, TokenAmount, VerificationResult};

use super::Facilitator;
use crate::client::ChainClient;

/// One configured network, as listed by [`MultiChainFacilitator::supported`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedNetwork {
    /// Canonical network name.
    pub network: String,
    /// EIP-155 chain ID.
    pub chain_id: ChainId,
    /// USDC contract on this chain.
    pub usdc_address: Address,
    /// Operating key that submits settlements.
    pub signer: Address,
    /// Other keys resolving to this network.
    pub aliases: Vec<String>,
    /// Whether the chain is a testnet.
    pub is_testnet: bool,
}

/// An envelope no registered facilitator can serve.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct Unroutable {
    /// Chain the key resolved to, if it resolved.
    pub chain_id: Option<ChainId>,
    /// `UnknownNetwork` or `UnsupportedChainId`.
    pub kind: PaymentErrorKind,
    /// Human-readable detail.
    pub message: String,
}

/// Routes envelopes to the [`Facilitator`] of the chain their network key
/// resolves to.
///
/// Keys that do not resolve yield `UnknownNetwork`; keys that resolve to a
/// chain without a registered facilitator yield `UnsupportedChainId`.
pub struct MultiChainFacilitator<C> {
    networks: Arc<NetworkRegistry>,
    chains: Arc<ChainResolver>,
    facilitators: BTreeMap<ChainId, Facilitator<C>>,
}

impl<C> std::fmt::Debug for MultiChainFacilitator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiChainFacilitator")
            .field("chains", &self.facilitators.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl<C> Default for MultiChainFacilitator<C> {
    fn default() -> Self {
        Self::new(
            Arc::new(networks::builtin().clone()),
            Arc::new(chain::builtin().clone()),
        )
    }
}

impl<C> MultiChainFacilitator<C> {
    /// Creates an empty router resolving keys against `networks` and chain
    /// IDs against `chains`.
    #[must_use]
    pub const fn new(networks: Arc<NetworkRegistry>, chains: Arc<ChainResolver>) -> Self {
        Self {
            networks,
            chains,
            facilitators: BTreeMap::new(),
        }
    }

    /// The registry keys are resolved against.
    #[must_use]
    pub fn networks(&self) -> &NetworkRegistry {
        &self.networks
    }

    /// The chain descriptors this router was built with.
    #[must_use]
    pub fn chains(&self) -> &ChainResolver {
        &self.chains
    }

    /// Number of registered chains.
    #[must_use]
    pub fn len(&self) -> usize {
        self.facilitators.len()
    }

    /// Returns `true` when no facilitator is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.facilitators.is_empty()
    }
}

impl<C: ChainClient> MultiChainFacilitator<C> {
    /// Registers `facilitator` for its chain, replacing any previous one.
    pub fn register(&mut self, facilitator: Facilitator<C>) -> &mut Self {
        self.facilitators
            .insert(facilitator.chain_id(), facilitator);
        self
    }

    /// The facilitator serving `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Unroutable`] when `key` does not resolve or no facilitator
    /// serves its chain.
    pub fn facilitator_for(&self, key: &str) -> Result<&Facilitator<C>, Unroutable> {
        let network = self.networks.resolve(key).map_err(|e| Unroutable {
            chain_id: None,
            kind: PaymentErrorKind::UnknownNetwork,
            message: e.to_string(),
        })?;
        self.facilitators.get(&network.chain_id).ok_or_else(|| {
            let supported = self
                .facilitators
                .keys()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            Unroutable {
                chain_id: Some(network.chain_id),
                kind: PaymentErrorKind::UnsupportedChainId,
                message: format!(
                    "no facilitator configured for {} (chain {}), configured: {supported}",
                    network.name, network.chain_id
                ),
            }
        })
    }

    /// Verifies `envelope` on the facilitator of its network.
    pub async fn verify_payment(
        &self,
        envelope: &PaymentEnvelope,
        expected_payee: Address,
        expected_amount: TokenAmount,
    ) -> VerificationResult {
        match self.facilitator_for(&envelope.network) {
            Ok(facilitator) => {
                facilitator
                    .verify_payment(envelope, expected_payee, expected_amount)
                    .await
            }
            Err(e) => VerificationResult::invalid(envelope, e.chain_id, e.kind, e.message),
        }
    }

    /// Settles `envelope` on the facilitator of its network.
    pub async fn settle_payment(&self, envelope: &PaymentEnvelope) -> SettlementResult {
        match self.facilitator_for(&envelope.network) {
            Ok(facilitator) => facilitator.settle_payment(envelope).await,
            Err(e) => SettlementResult::failed(envelope, e.chain_id, e.kind),
        }
    }

    /// Lists the registered networks in chain ID order.
    #[must_use]
    pub fn supported(&self) -> Vec<SupportedNetwork> {
        self.facilitators
            .values()
            .map(|facilitator| {
                let network = facilitator.network();
                SupportedNetwork {
                    network: network.name.clone(),
                    chain_id: network.chain_id,
                    usdc_address: network.usdc_address,
                    signer: facilitator.client().signer_address(),
                    aliases: self
                        .networks
                        .aliases_of(&network.name)
                        .into_iter()
                        .map(str::to_owned)
                        .collect(),
                    is_testnet: network.is_testnet,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sx402::proto::SettlementStatus;

    use super::*;
    use crate::facilitator::{FacilitatorOptions, TimeSource};
    use crate::mock::{MockChain, NOW, PAYEE, envelope};

    fn router(chain: &Arc<MockChain>) -> MultiChainFacilitator<Arc<MockChain>> {
        let options = FacilitatorOptions::default().with_time_source(TimeSource::LatestBlock);
        let mut router = MultiChainFacilitator::default();
        for key in ["base", "celo"] {
            router.register(Facilitator::new(
                networks::resolve(key).unwrap(),
                Arc::clone(chain),
                options,
            ));
        }
        router
    }

    #[tokio::test]
    async fn test_routes_by_resolved_chain() {
        let chain = MockChain::new();
        let router = router(&chain);
        let mut env = envelope("celo");
        env.network = "celo-mainnet".to_owned();
        let result = router
            .verify_payment(&env, PAYEE, TokenAmount::from(1_000_000))
            .await;
        assert!(result.valid, "{result:?}");
        assert_eq!(result.trace.chain_id, Some(42220));
        assert_eq!(result.trace.network, "celo-mainnet");
    }

    #[tokio::test]
    async fn test_unknown_and_unconfigured_networks() {
        let chain = MockChain::new();
        let router = router(&chain);

        let mut env = envelope("base");
        env.network = "Base".to_owned();
        let result = router
            .verify_payment(&env, PAYEE, TokenAmount::from(1_000_000))
            .await;
        assert_eq!(result.reason, Some(PaymentErrorKind::UnknownNetwork));

        let result = router.settle_payment(&envelope("eth")).await;
        assert_eq!(result.status, SettlementStatus::Failed);
        assert_eq!(result.reason, Some(PaymentErrorKind::UnsupportedChainId));
        assert_eq!(result.trace.chain_id, Some(1));
        assert_eq!(chain.sends(), 0);
    }

    #[tokio::test]
    async fn test_settles_through_router() {
        let chain = MockChain::new();
        chain.set_block_timestamp(NOW);
        let router = router(&chain);
        let result = router.settle_payment(&envelope("base")).await;
        assert!(result.is_confirmed(), "{result:?}");
    }

    #[test]
    fn test_supported_lists_networks_in_chain_order() {
        let chain = MockChain::new();
        let router = router(&chain);
        let supported = router.supported();
        assert_eq!(supported.len(), 2);
        assert_eq!(supported[0].network, "base");
        assert_eq!(supported[0].aliases, vec!["base-mainnet"]);
        assert_eq!(supported[1].chain_id, 42220);
        assert_eq!(supported[1].signer, chain.signer_address());
        let json = serde_json::to_value(&supported[0]).unwrap();
        assert_eq!(json["chainId"], 8453);
        assert_eq!(json["isTestnet"], false);
    }
}
