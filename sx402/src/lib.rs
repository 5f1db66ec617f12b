#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for the selfx402 payment facilitator.
//!
//! This crate holds the chain-agnostic half of the facilitator: the static
//! network and chain tables, the payment envelope wire format, and the
//! failure taxonomy. EVM verification and settlement live in `sx402-evm`.
//!
//! # Modules
//!
//! - [`networks`] - Network registry: network key to USDC deployment
//! - [`chain`] - Chain resolver: chain ID to chain descriptor
//! - [`proto`] - Payment envelopes and verification/settlement results
//! - [`timestamp`] - Unix timestamps for authorization windows
//! - [`error`] - Failure taxonomy
//!
//! # Example
//!
//! ```
//! let network = sx402::networks::resolve("eth").unwrap();
//! let chain = sx402::chain::chain_descriptor(network.chain_id).unwrap();
//! assert_eq!(chain.native_currency.symbol, "ETH");
//! ```

pub mod chain;
pub mod error;
pub mod networks;
pub mod proto;
pub mod timestamp;

pub use chain::{ChainDescriptor, ChainId, chain_descriptor};
pub use error::PaymentErrorKind;
pub use networks::{NetworkConfig, resolve};
pub use proto::{PaymentEnvelope, SettlementResult, SettlementStatus, VerificationResult};
