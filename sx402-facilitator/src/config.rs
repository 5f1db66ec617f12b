//! Facilitator server configuration.
//!
//! Loads a JSON file whose string values may reference environment variables
//! with `$VAR` or `${VAR}`. A `.env` file in the working directory is loaded
//! first.
//!
//! # Example Configuration
//!
//! ```json
//! {
//!   "host": "0.0.0.0",
//!   "port": 4021,
//!   "time_source": "wall_clock",
//!   "read_timeout_secs": 5,
//!   "confirmation_timeout_secs": 60,
//!   "retry": { "max_attempts": 3, "initial_backoff_ms": 250, "max_backoff_ms": 4000 },
//!   "networks": {
//!     "base": { "signer_private_key": "$SIGNER_KEY_BASE" },
//!     "celo": { "signer_private_key": "${SIGNER_KEY_CELO}", "rpc_url": "https://forno.celo.org" }
//!   }
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to the configuration file (default: `config.json`)
//! - `HOST` - Override the bind address
//! - `PORT` - Override the port
//! - Signer keys referenced by `$VAR` in the file

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use serde_json::Value;
use sx402_evm::facilitator::{FacilitatorOptions, RetryPolicy, TimeSource};
use sx402_evm::provider::ClientOptions;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "sx402-facilitator")]
#[command(about = "EIP-3009 payment facilitator HTTP server")]
pub struct CliArgs {
    /// Path to the JSON configuration file.
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    pub config: PathBuf,
}

/// Top-level facilitator configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FacilitatorConfig {
    /// Server bind address (default: `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Server port (default: `4021`).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Networks to settle on, keyed by registry key (canonical name or alias).
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkEntry>,

    /// Source of "now" for authorization windows.
    #[serde(default)]
    pub time_source: TimeSource,

    /// Deadline for each RPC read.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,

    /// How long settlement waits for a receipt before answering `pending`.
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,

    /// Retry budget for transient RPC failures.
    #[serde(default)]
    pub retry: RetryPolicy,
}

/// Empty, or left with a `$VAR` reference after expansion.
fn unexpanded(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value.contains('$')
}

/// Per-network settings.
#[derive(Clone, Deserialize)]
pub struct NetworkEntry {
    /// Hex private key of the operating account that pays gas.
    pub signer_private_key: String,

    /// RPC endpoint tried before the built-in ones.
    #[serde(default)]
    pub rpc_url: Option<String>,

    /// Whether to price gas with EIP-1559 (default: `true`).
    #[serde(default = "default_eip1559")]
    pub eip1559: bool,

    /// Requests per second allowed against each endpoint.
    #[serde(default)]
    pub rate_limit: Option<u32>,
}

impl fmt::Debug for NetworkEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkEntry")
            .field("signer_private_key", &"<redacted>")
            .field("rpc_url", &self.rpc_url)
            .field("eip1559", &self.eip1559)
            .field("rate_limit", &self.rate_limit)
            .finish()
    }
}

impl NetworkEntry {
    /// Whether the signer key still holds an unexpanded `$VAR` reference or
    /// is empty.
    #[must_use]
    pub fn signer_unresolved(&self) -> bool {
        unexpanded(&self.signer_private_key)
    }

    /// The RPC URL, unless it is absent, empty or still holds an unexpanded
    /// `$VAR` reference.
    #[must_use]
    pub fn resolved_rpc_url(&self) -> Option<&str> {
        self.rpc_url
            .as_deref()
            .filter(|url| !unexpanded(url))
            .map(str::trim)
    }

    /// Client options for this network.
    #[must_use]
    pub fn client_options(&self, read_timeout: Duration) -> ClientOptions {
        ClientOptions {
            eip1559: self.eip1559,
            rate_limit: self.rate_limit,
            ..ClientOptions::default()
        }
        .with_read_timeout(read_timeout)
    }
}

const fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

const fn default_port() -> u16 {
    4021
}

const fn default_read_timeout_secs() -> u64 {
    5
}

const fn default_confirmation_timeout_secs() -> u64 {
    60
}

const fn default_eip1559() -> bool {
    true
}

impl Default for FacilitatorConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            networks: BTreeMap::new(),
            time_source: TimeSource::default(),
            read_timeout_secs: default_read_timeout_secs(),
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Configuration loading failure.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        /// Config file path.
        path: PathBuf,
        /// I/O failure.
        source: std::io::Error,
    },
    /// The file is not valid configuration JSON.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    /// `HOST` or `PORT` holds an unparsable value.
    #[error("invalid {var} override {value:?}")]
    InvalidOverride {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },
}

impl FacilitatorConfig {
    /// Loads `.env`, parses the command line and reads the file it names.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or an
    /// override is malformed.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let args = CliArgs::parse();
        Self::load_from(&args.config, |var| std::env::var(var).ok())
    }

    /// Loads configuration from `path`, resolving variables through `env`.
    ///
    /// A missing file yields the defaults, with overrides still applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or an
    /// override is malformed.
    pub fn load_from(
        path: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let content = if path.exists() {
            std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            "{}".to_owned()
        };
        Self::parse(&content, env)
    }

    /// Parses configuration JSON, expanding variables in string values and
    /// applying `HOST` / `PORT` overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the JSON is invalid or an override is
    /// malformed.
    pub fn parse(content: &str, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut raw: Value = serde_json::from_str(content)?;
        expand_strings(&mut raw, &env);
        let mut config: Self = serde_json::from_value(raw)?;

        if let Some(host) = env("HOST") {
            config.host = host.parse().map_err(|_| ConfigError::InvalidOverride {
                var: "HOST",
                value: host,
            })?;
        }
        if let Some(port) = env("PORT") {
            config.port = port.parse().map_err(|_| ConfigError::InvalidOverride {
                var: "PORT",
                value: port,
            })?;
        }
        Ok(config)
    }

    /// Options for every per-network facilitator.
    #[must_use]
    pub fn facilitator_options(&self) -> FacilitatorOptions {
        FacilitatorOptions::default()
            .with_time_source(self.time_source)
            .with_read_timeout(self.read_timeout())
            .with_confirmation_timeout(Duration::from_secs(self.confirmation_timeout_secs))
            .with_retry(self.retry)
    }

    /// RPC read deadline.
    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

fn expand_strings(value: &mut Value, env: &impl Fn(&str) -> Option<String>) {
    match value {
        Value::String(s) => *s = expand_env_vars(s, env),
        Value::Array(items) => items.iter_mut().for_each(|item| expand_strings(item, env)),
        Value::Object(map) => map.values_mut().for_each(|item| expand_strings(item, env)),
        _ => {}
    }
}

/// Expands `$VAR` and `${VAR}`. Unresolved references are left as written.
fn expand_env_vars(input: &str, env: &impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }
        let braced = chars.next_if_eq(&'{').is_some();
        let mut name = String::new();
        let mut closed = false;
        while let Some(&c) = chars.peek() {
            if braced && c == '}' {
                chars.next();
                closed = true;
                break;
            }
            if !braced && !(c.is_ascii_alphanumeric() || c == '_') {
                break;
            }
            name.push(c);
            chars.next();
        }
        match env(&name).filter(|_| !name.is_empty() && (closed || !braced)) {
            Some(resolved) => result.push_str(&resolved),
            None => {
                result.push('$');
                if braced {
                    result.push('{');
                }
                result.push_str(&name);
                if closed {
                    result.push('}');
                }
            }
        }
    }

    result
}
