//! Axum route handlers of the facilitator service.
//!
//! Envelopes are routed by network key to the per-chain facilitator; see
//! [`MultiChainFacilitator`].

use std::sync::Arc;

use alloy_primitives::Address;
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::Method;
use serde::{Deserialize, Serialize};
use sx402::chain::{ChainDescriptor, ChainId};
use sx402::proto::{PaymentEnvelope, SettlementResult, TokenAmount, VerificationResult};
use sx402_evm::client::ChainClient;
use sx402_evm::facilitator::{MultiChainFacilitator, SupportedNetwork};
use tower_http::cors;
use tower_http::trace::TraceLayer;

use crate::error::FacilitatorError;

/// Shared application state.
pub type FacilitatorState<C> = Arc<MultiChainFacilitator<C>>;

/// Body of `POST /verify`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    /// The signed payment.
    pub envelope: PaymentEnvelope,
    /// Address the payment must go to.
    pub expected_payee: Address,
    /// Exact amount the payment must carry, in token base units.
    pub expected_amount: TokenAmount,
}

/// Body of `POST /settle`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleRequest {
    /// The signed payment.
    pub envelope: PaymentEnvelope,
}

/// Body of `GET /supported`.
#[derive(Debug, Clone, Serialize)]
pub struct SupportedResponse {
    /// Networks this instance settles on, in chain ID order.
    pub networks: Vec<SupportedNetwork>,
}

/// Body of `GET /networks/{key}`.
///
/// The configured RPC URL is left out since it may embed an API key.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkResponse {
    /// Canonical network name.
    pub name: String,
    /// EIP-155 chain ID.
    pub chain_id: ChainId,
    /// USDC contract address.
    pub usdc_address: Address,
    /// USDC display name.
    pub usdc_name: String,
    /// Block explorer base URL.
    pub block_explorer: String,
    /// Whether the chain is a testnet.
    pub is_testnet: bool,
    /// Keys resolving to the same network.
    pub aliases: Vec<String>,
    /// Chain descriptor, when the chain is curated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain: Option<ChainDescriptor>,
    /// Whether this instance settles on the network.
    pub configured: bool,
}

/// `POST /verify`: verifies an envelope without touching chain state.
///
/// # Errors
///
/// Returns 400 when the body does not parse.
pub async fn post_verify<C: ChainClient + 'static>(
    State(fac): State<FacilitatorState<C>>,
    body: Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<Json<VerificationResult>, FacilitatorError> {
    let Json(body) = body?;
    let result = fac
        .verify_payment(&body.envelope, body.expected_payee, body.expected_amount)
        .await;
    Ok(Json(result))
}

/// `POST /settle`: submits the envelope's authorization on-chain.
///
/// # Errors
///
/// Returns 400 when the body does not parse.
pub async fn post_settle<C: ChainClient + 'static>(
    State(fac): State<FacilitatorState<C>>,
    body: Result<Json<SettleRequest>, JsonRejection>,
) -> Result<Json<SettlementResult>, FacilitatorError> {
    let Json(body) = body?;
    let result = fac.settle_payment(&body.envelope).await;
    tracing::info!(
        network = %body.envelope.network,
        nonce = %body.envelope.authorization.nonce,
        status = ?result.status,
        tx = ?result.transaction_hash,
        "Settle request handled"
    );
    Ok(Json(result))
}

/// `GET /supported`: lists the configured networks and their signers.
pub async fn get_supported<C: ChainClient + 'static>(
    State(fac): State<FacilitatorState<C>>,
) -> Json<SupportedResponse> {
    Json(SupportedResponse {
        networks: fac.supported(),
    })
}

/// `GET /networks/{key}`: resolves a network key.
///
/// # Errors
///
/// Returns 404 when `key` is not in the registry.
pub async fn get_network<C: ChainClient + 'static>(
    State(fac): State<FacilitatorState<C>>,
    Path(key): Path<String>,
) -> Result<Json<NetworkResponse>, FacilitatorError> {
    let network = fac.networks().resolve(&key)?;
    let aliases = fac
        .networks()
        .aliases_of(&network.name)
        .into_iter()
        .map(str::to_owned)
        .collect();
    let configured = fac.facilitator_for(&key).is_ok();
    Ok(Json(NetworkResponse {
        name: network.name.clone(),
        chain_id: network.chain_id,
        usdc_address: network.usdc_address,
        usdc_name: network.usdc_name.clone(),
        block_explorer: network.block_explorer.clone(),
        is_testnet: network.is_testnet,
        chain: fac.chains().chain_descriptor(network.chain_id).ok().cloned(),
        aliases,
        configured,
    }))
}

/// `GET /health`: liveness probe.
pub async fn get_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Creates an Axum [`axum::Router`] with all facilitator endpoints.
///
/// Endpoints:
/// - `POST /verify` - verify a payment envelope
/// - `POST /settle` - settle a payment envelope
/// - `GET /supported` - list configured networks
/// - `GET /networks/{key}` - resolve a network key
/// - `GET /health` - liveness probe
pub fn facilitator_router<C: ChainClient + 'static>(state: FacilitatorState<C>) -> axum::Router {
    axum::Router::new()
        .route("/verify", axum::routing::post(post_verify::<C>))
        .route("/settle", axum::routing::post(post_settle::<C>))
        .route("/supported", axum::routing::get(get_supported::<C>))
        .route("/networks/{key}", axum::routing::get(get_network::<C>))
        .route("/health", axum::routing::get(get_health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        )
}
