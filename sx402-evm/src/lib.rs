#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! EVM support for the selfx402 facilitator.
//!
//! Verifies EIP-3009 `transferWithAuthorization` payments against USDC
//! deployments and settles them from the facilitator's own operating key.
//!
//! # Architecture
//!
//! - [`contract`] / [`types`] - `sol!` ABI bindings and the EIP-712 typed data
//! - [`signature`] - ECDSA recovery with low-s enforcement
//! - [`client`] - the [`ChainClient`] capability the facilitator depends on
//! - [`provider`] / [`nonce`] / [`wallet`] - the alloy-backed implementation
//! - [`facilitator`] - verification, settlement, retries and multi-chain routing
//!
//! # Feature Flags
//!
//! - `telemetry` - `tracing` spans and events on verification and settlement
//! - `test-utils` - an in-memory USDC [`ChainClient`] and signing helpers
//!
//! # Example
//!
//! ```no_run
//! use sx402_evm::facilitator::{Facilitator, FacilitatorOptions};
//! use sx402_evm::provider::ClientOptions;
//!
//! # async fn run(envelope: sx402::PaymentEnvelope) -> Result<(), Box<dyn std::error::Error>> {
//! let network = sx402::resolve("base")?;
//! let client = sx402_evm::wallet::connect_network(
//!     "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
//!     &network,
//!     sx402::chain::builtin(),
//!     ClientOptions::default(),
//! )?;
//! let facilitator = Facilitator::new(network, client, FacilitatorOptions::default());
//! let result = facilitator.settle_payment(&envelope).await;
//! println!("{:?}", result.status);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod contract;
pub mod facilitator;
pub mod nonce;
pub mod provider;
pub mod signature;
pub mod types;
pub mod wallet;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use client::{ChainClient, ClientError, ReceiptSummary};
pub use facilitator::{Facilitator, FacilitatorOptions, MultiChainFacilitator, RetryPolicy, TimeSource};
pub use provider::{ClientOptions, Eip155Client};
