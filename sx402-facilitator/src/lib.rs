//! EIP-3009 payment facilitator HTTP server.
//!
//! Verifies and settles USDC `transferWithAuthorization` payments on every
//! configured EVM network, routing each envelope by its network key.
//!
//! # Modules
//!
//! - [`config`] - JSON configuration with environment variable expansion
//! - [`handlers`] - Axum route handlers and router builder
//! - [`error`] - HTTP error responses
//! - [`util`] - graceful shutdown

pub mod config;
pub mod error;
pub mod handlers;
pub mod util;

pub use handlers::{FacilitatorState, facilitator_router};
