//! Alloy-backed [`ChainClient`].
//!
//! [`Eip155Client`] wraps a fully composed alloy provider:
//! - gas, blob gas, nonce ([`PendingNonceManager`]) and chain ID fillers
//! - a wallet filler signing with the facilitator's operating key
//! - an HTTP transport stack with per-endpoint throttling and fallback
//!
//! Reads are bounded by a short timeout; receipts are polled until the
//! caller's confirmation deadline.

use std::num::NonZeroUsize;
use std::time::Duration;

use alloy_network::{EthereumWallet, ReceiptResponse, TransactionBuilder};
use alloy_primitives::{Address, Bytes, TxHash};
use alloy_provider::fillers::{
    BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller, WalletFiller,
};
use alloy_provider::{Identity, Provider, ProviderBuilder, RootProvider};
use alloy_rpc_client::RpcClient;
use alloy_rpc_types_eth::{BlockNumberOrTag, TransactionRequest};
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{Revert, SolError};
use alloy_transport::layers::{FallbackLayer, ThrottleLayer};
use alloy_transport::{RpcError, TransportError, TransportErrorKind};
use alloy_transport_http::Http;
use sx402::chain::ChainId;
use sx402::timestamp::UnixTimestamp;
use tower::ServiceBuilder;
use url::Url;

use crate::client::{ChainClient, ClientError, ReceiptSummary};
use crate::nonce::PendingNonceManager;

/// Combined filler type for gas, blob gas, nonce, and chain ID.
pub type InnerFiller = JoinFill<
    GasFiller,
    JoinFill<BlobGasFiller, JoinFill<NonceFiller<PendingNonceManager>, ChainIdFiller>>,
>;

/// The fully composed provider: fillers, wallet signing, JSON-RPC root.
pub type InnerProvider = FillProvider<
    JoinFill<JoinFill<Identity, InnerFiller>, WalletFiller<EthereumWallet>>,
    RootProvider,
>;

/// Tunables for [`Eip155Client`].
#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    /// Deadline for each read and for transaction submission (default: 5 s).
    pub read_timeout: Duration,
    /// Interval between receipt polls (default: 1 s).
    pub poll_interval: Duration,
    /// Whether the chain prices gas with EIP-1559 (default: `true`).
    pub eip1559: bool,
    /// Requests per second allowed against each endpoint (default: unlimited).
    pub rate_limit: Option<u32>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            eip1559: true,
            rate_limit: None,
        }
    }
}

impl ClientOptions {
    /// Sets the read timeout.
    #[must_use]
    pub const fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Sets the receipt poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// No usable HTTP(S) endpoint was supplied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no http(s) rpc endpoint configured for chain {0}")]
pub struct NoRpcEndpoint(pub ChainId);

/// [`ChainClient`] over JSON-RPC, signing with a single operating key.
#[derive(Debug)]
pub struct Eip155Client {
    chain_id: ChainId,
    inner: InnerProvider,
    signer_address: Address,
    nonce_manager: PendingNonceManager,
    options: ClientOptions,
}

impl Eip155Client {
    /// Builds an RPC client over the HTTP(S) endpoints in `endpoints`.
    ///
    /// Every endpoint is throttled to `rate_limit` requests per second and
    /// the set is wrapped in a fallback layer. Non-HTTP URLs are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`NoRpcEndpoint`] if no HTTP(S) endpoint remains.
    pub fn rpc_client(
        chain_id: ChainId,
        endpoints: &[Url],
        rate_limit: Option<u32>,
    ) -> Result<RpcClient, NoRpcEndpoint> {
        let transports = endpoints
            .iter()
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .map(|url| {
                #[cfg(feature = "telemetry")]
                tracing::info!(chain_id, rpc_url = %url, ?rate_limit, "Using HTTP transport");
                ServiceBuilder::new()
                    .layer(ThrottleLayer::new(rate_limit.unwrap_or(u32::MAX)))
                    .service(Http::new(url.clone()))
            })
            .collect::<Vec<_>>();
        let count = NonZeroUsize::new(transports.len()).ok_or(NoRpcEndpoint(chain_id))?;
        let fallback = ServiceBuilder::new()
            .layer(FallbackLayer::default().with_active_transport_count(count))
            .service(transports);
        Ok(RpcClient::new(fallback, false))
    }

    /// Creates a client for `chain_id` signing with `signer`.
    ///
    /// # Errors
    ///
    /// Returns [`NoRpcEndpoint`] if `endpoints` holds no HTTP(S) URL.
    pub fn new(
        chain_id: ChainId,
        signer: PrivateKeySigner,
        endpoints: &[Url],
        options: ClientOptions,
    ) -> Result<Self, NoRpcEndpoint> {
        let client = Self::rpc_client(chain_id, endpoints, options.rate_limit)?;
        let signer_address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let nonce_manager = PendingNonceManager::default();
        let filler = JoinFill::new(
            GasFiller,
            JoinFill::new(
                BlobGasFiller::default(),
                JoinFill::new(
                    NonceFiller::new(nonce_manager.clone()),
                    ChainIdFiller::new(Some(chain_id)),
                ),
            ),
        );
        let inner: InnerProvider = ProviderBuilder::default()
            .filler(filler)
            .wallet(wallet)
            .connect_client(client);

        #[cfg(feature = "telemetry")]
        tracing::info!(chain_id, signer = %signer_address, "Using EVM client");

        Ok(Self {
            chain_id,
            inner,
            signer_address,
            nonce_manager,
            options,
        })
    }

    /// Chain this client is bound to.
    #[must_use]
    pub const fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// The underlying alloy provider.
    #[must_use]
    pub const fn inner(&self) -> &InnerProvider {
        &self.inner
    }

    async fn with_read_timeout<T, F>(&self, call: F) -> Result<T, ClientError>
    where
        F: IntoFuture<Output = Result<T, TransportError>>,
    {
        tokio::time::timeout(self.options.read_timeout, call)
            .await
            .map_err(|_| ClientError::Timeout(self.options.read_timeout))?
            .map_err(|e| classify_transport_error(&e))
    }
}

/// Maps an alloy transport error onto the retry taxonomy.
///
/// Revert data attached to an error response is decoded as `Error(string)`
/// and the string kept verbatim.
#[must_use]
pub fn classify_transport_error(error: &TransportError) -> ClientError {
    match error {
        RpcError::ErrorResp(payload) => {
            if let Some(data) = payload.as_revert_data() {
                let reason = Revert::abi_decode(&data)
                    .map(|revert| revert.reason)
                    .unwrap_or_else(|_| payload.message.to_string());
                return ClientError::Reverted { reason };
            }
            if payload.code == 429 || payload.code == -32005 {
                return ClientError::RateLimited(payload.message.to_string());
            }
            ClientError::from_message(payload.message.to_string())
        }
        RpcError::Transport(TransportErrorKind::HttpError(http)) if http.status == 429 => {
            ClientError::RateLimited(http.body.clone())
        }
        RpcError::Transport(TransportErrorKind::HttpError(http)) if http.status >= 500 => {
            ClientError::Transient(format!("http {}: {}", http.status, http.body))
        }
        RpcError::Transport(kind) if kind.is_retry_err() => ClientError::Transient(kind.to_string()),
        RpcError::Transport(TransportErrorKind::Custom(e)) => ClientError::Transient(e.to_string()),
        RpcError::Transport(TransportErrorKind::BackendGone) => {
            ClientError::Transient("rpc backend gone".to_owned())
        }
        RpcError::NullResp | RpcError::DeserError { .. } | RpcError::SerError(_) => {
            ClientError::Decode(error.to_string())
        }
        other => ClientError::from_message(other.to_string()),
    }
}

#[async_trait::async_trait]
impl ChainClient for Eip155Client {
    fn signer_address(&self) -> Address {
        self.signer_address
    }

    async fn read_contract(&self, to: Address, calldata: Bytes) -> Result<Bytes, ClientError> {
        let tx = TransactionRequest::default().with_to(to).with_input(calldata);
        self.with_read_timeout(self.inner.call(tx)).await
    }

    async fn send_transaction(&self, to: Address, calldata: Bytes) -> Result<TxHash, ClientError> {
        let mut txr = TransactionRequest::default()
            .with_to(to)
            .with_from(self.signer_address)
            .with_input(calldata);

        // Legacy gas pricing for non-EIP-1559 chains
        if !self.options.eip1559 {
            let gas_price = self.with_read_timeout(self.inner.get_gas_price()).await?;
            txr.set_gas_price(gas_price);
        }

        let sent = self.with_read_timeout(self.inner.send_transaction(txr)).await;
        match sent {
            Ok(pending) => {
                let hash = *pending.tx_hash();
                #[cfg(feature = "telemetry")]
                tracing::info!(chain_id = self.chain_id, tx = %hash, "Transaction submitted");
                Ok(hash)
            }
            Err(e) => {
                self.nonce_manager.reset_nonce(self.signer_address).await;
                Err(e)
            }
        }
    }

    async fn wait_for_receipt(
        &self,
        hash: TxHash,
        timeout: Duration,
    ) -> Result<Option<ReceiptSummary>, ClientError> {
        let poll = async {
            loop {
                match self
                    .with_read_timeout(self.inner.get_transaction_receipt(hash))
                    .await
                {
                    Ok(Some(receipt)) => {
                        return Ok(ReceiptSummary {
                            transaction_hash: ReceiptResponse::transaction_hash(&receipt),
                            block_number: ReceiptResponse::block_number(&receipt),
                            success: ReceiptResponse::status(&receipt),
                        });
                    }
                    Ok(None) => {}
                    Err(e) if e.is_transient() => {
                        #[cfg(feature = "telemetry")]
                        tracing::debug!(tx = %hash, error = %e, "Receipt poll failed, retrying");
                    }
                    Err(e) => return Err(e),
                }
                tokio::time::sleep(self.options.poll_interval).await;
            }
        };
        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => result.map(Some),
            Err(_) => {
                // Outcome unknown; the cached account nonce may be stale.
                self.nonce_manager.reset_nonce(self.signer_address).await;
                Ok(None)
            }
        }
    }

    async fn latest_block_timestamp(&self) -> Result<UnixTimestamp, ClientError> {
        let block = self
            .with_read_timeout(self.inner.get_block_by_number(BlockNumberOrTag::Latest))
            .await?
            .ok_or_else(|| ClientError::Decode("latest block not found".to_owned()))?;
        Ok(UnixTimestamp::from_secs(block.header.timestamp))
    }
}
