//! EIP-3009 payment facilitator.
//!
//! A [`Facilitator`] is bound to one network and one [`ChainClient`]. It
//! verifies payment envelopes (stateless checks, then an on-chain nonce read)
//! and settles them by submitting `transferWithAuthorization` from the
//! client's operating key.
//!
//! Failures never surface as `Err`: both operations return structured
//! results carrying a [`PaymentErrorKind`](sx402::error::PaymentErrorKind).
//!
//! [`MultiChainFacilitator`] routes envelopes to the facilitator of the chain
//! their network key resolves to.

mod retry;
mod router;
mod settle;
mod verify;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use sx402::chain::{self, ChainId, ChainResolver};
use sx402::error::PaymentErrorKind;
use sx402::networks::{self, NetworkConfig, NetworkRegistry};
use sx402::timestamp::UnixTimestamp;

use crate::client::{ChainClient, ClientError};
use crate::contract;

pub use retry::RetryPolicy;
pub use settle::transfer_calldata;
pub use router::{MultiChainFacilitator, SupportedNetwork, Unroutable};

/// Where the facilitator takes "now" from when checking authorization windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSource {
    /// The local system clock.
    #[default]
    WallClock,
    /// The timestamp of the chain's latest block.
    LatestBlock,
}

/// Tunables for a [`Facilitator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FacilitatorOptions {
    /// Source of "now" for window checks.
    pub time_source: TimeSource,
    /// Deadline for each RPC read (default: 5 s).
    pub read_timeout: Duration,
    /// How long settlement waits for a receipt before reporting `Pending` (default: 60 s).
    pub confirmation_timeout: Duration,
    /// Retry budget for transient RPC failures.
    pub retry: RetryPolicy,
}

impl Default for FacilitatorOptions {
    fn default() -> Self {
        Self {
            time_source: TimeSource::WallClock,
            read_timeout: Duration::from_secs(5),
            confirmation_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

impl FacilitatorOptions {
    /// Sets the time source.
    #[must_use]
    pub const fn with_time_source(mut self, time_source: TimeSource) -> Self {
        self.time_source = time_source;
        self
    }

    /// Sets the read timeout.
    #[must_use]
    pub const fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Sets the confirmation timeout.
    #[must_use]
    pub const fn with_confirmation_timeout(mut self, confirmation_timeout: Duration) -> Self {
        self.confirmation_timeout = confirmation_timeout;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Verifies and settles EIP-3009 payments on one network.
///
/// Envelopes are resolved against a network registry (the built-in one by
/// default); an envelope whose key resolves to a different chain than the
/// bound network is rejected with `NetworkMismatch`.
pub struct Facilitator<C> {
    network: Arc<NetworkConfig>,
    client: C,
    options: FacilitatorOptions,
    networks: Arc<NetworkRegistry>,
    chains: Arc<ChainResolver>,
}

impl<C> std::fmt::Debug for Facilitator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Facilitator")
            .field("network", &self.network.name)
            .field("chain_id", &self.network.chain_id)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<C: ChainClient> Facilitator<C> {
    /// Creates a facilitator for `network` using `client` for chain access.
    #[must_use]
    pub fn new(network: Arc<NetworkConfig>, client: C, options: FacilitatorOptions) -> Self {
        Self {
            network,
            client,
            options,
            networks: Arc::new(networks::builtin().clone()),
            chains: Arc::new(chain::builtin().clone()),
        }
    }

    /// Resolves envelopes against `networks` and `chains` instead of the
    /// built-in tables.
    #[must_use]
    pub fn with_tables(mut self, networks: Arc<NetworkRegistry>, chains: Arc<ChainResolver>) -> Self {
        self.networks = networks;
        self.chains = chains;
        self
    }

    /// The network this facilitator settles on.
    #[must_use]
    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    /// Chain ID of the bound network.
    #[must_use]
    pub fn chain_id(&self) -> ChainId {
        self.network.chain_id
    }

    /// The chain client.
    #[must_use]
    pub const fn client(&self) -> &C {
        &self.client
    }

    /// The facilitator's options.
    #[must_use]
    pub const fn options(&self) -> &FacilitatorOptions {
        &self.options
    }

    /// Runs a read with the read timeout, retrying transient failures.
    async fn read<T, F, Fut>(&self, op: F) -> Result<T, ClientError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let read_timeout = self.options.read_timeout;
        self.options
            .retry
            .run(|| {
                let call = op();
                async move {
                    tokio::time::timeout(read_timeout, call)
                        .await
                        .map_err(|_| ClientError::Timeout(read_timeout))?
                }
            })
            .await
    }

    /// Current time according to the configured [`TimeSource`].
    async fn now(&self) -> Result<UnixTimestamp, ClientError> {
        match self.options.time_source {
            TimeSource::WallClock => Ok(UnixTimestamp::now()),
            TimeSource::LatestBlock => self.read(|| self.client.latest_block_timestamp()).await,
        }
    }

    /// Reads `authorizationState(from, nonce)` from the token contract.
    async fn nonce_consumed(&self, from: Address, nonce: B256) -> Result<bool, ClientError> {
        let token = self.network.usdc_address;
        let calldata = contract::authorization_state_calldata(from, nonce);
        let data = self
            .read(|| self.client.read_contract(token, calldata.clone()))
            .await?;
        contract::decode_authorization_state(&data).map_err(|e| ClientError::Decode(e.to_string()))
    }
}

/// Maps an RPC failure onto the payment taxonomy.
const fn rpc_failure_kind(error: &ClientError) -> PaymentErrorKind {
    if error.is_transient() {
        PaymentErrorKind::RpcTransientFailure
    } else {
        PaymentErrorKind::RpcTerminalFailure
    }
}
