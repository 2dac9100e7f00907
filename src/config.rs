//! Configuration for the gateway server.
//!
//! Loaded from a JSON file named by `--config`/`CONFIG` (default
//! `config.json`), with serde defaults that fall back to environment
//! variables, then to hardcoded defaults. A missing file yields a pure
//! env/default configuration, which is enough to run the discovery and
//! probe endpoints without any gated resources.

use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::challenge::{USDC_DECIMALS, to_atomic_units};
use crate::network::Network;
use crate::types::{MixedAddress, PaymentRequirements, Scheme, TokenAmount};

/// CLI arguments for the gateway server.
#[derive(Parser, Debug)]
#[command(name = "x402-gateway")]
#[command(about = "x402 micropayment gateway HTTP server")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid resource {route}: {reason}")]
    InvalidResource { route: String, reason: String },
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "config_defaults::port")]
    port: u16,
    #[serde(default = "config_defaults::host")]
    host: IpAddr,
    /// Base URL of the facilitator service used for proof verification.
    #[serde(default = "config_defaults::facilitator_url")]
    facilitator_url: Url,
    /// Public base URL of this gateway, used to compute resource URLs in
    /// challenges.
    #[serde(default)]
    public_base_url: Option<Url>,
    /// Networks enabled in the route planner's registry.
    #[serde(default = "config_defaults::networks")]
    networks: Vec<Network>,
    #[serde(default = "config_defaults::verification_cache_ttl_seconds")]
    verification_cache_ttl_seconds: u64,
    /// Proxy response cache TTL; 0 disables the cache.
    #[serde(default)]
    proxy_cache_ttl_seconds: u64,
    /// Upstream retry attempts (total, including the first call); 0 and 1
    /// both mean no retry.
    #[serde(default)]
    proxy_retry_attempts: u32,
    #[serde(default = "config_defaults::facilitator_timeout_seconds")]
    facilitator_timeout_seconds: u64,
    /// Gated resources served by this process.
    #[serde(default)]
    resources: Vec<GatedResourceConfig>,
}

mod config_defaults {
    use super::*;
    use std::net::Ipv4Addr;
    use std::str::FromStr;

    pub fn port() -> u16 {
        std::env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8080)
    }

    pub fn host() -> IpAddr {
        std::env::var("HOST")
            .ok()
            .and_then(|s| IpAddr::from_str(&s).ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }

    pub fn facilitator_url() -> Url {
        let from_env = std::env::var("FACILITATOR_URL")
            .ok()
            .and_then(|s| Url::parse(&s).ok());
        from_env.unwrap_or_else(|| {
            Url::parse("https://facilitator.x402.rs/").expect("valid default facilitator URL")
        })
    }

    pub fn networks() -> Vec<Network> {
        Network::variants().to_vec()
    }

    pub fn verification_cache_ttl_seconds() -> u64 {
        60
    }

    pub fn facilitator_timeout_seconds() -> u64 {
        10
    }
}

/// One gated resource: a route prefix proxied to an upstream behind a
/// payment requirement.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatedResourceConfig {
    /// Route prefix under the gateway, e.g. `/api/weather`.
    pub route: String,
    /// Upstream base URL the paid request is forwarded to.
    pub upstream: Url,
    /// Human-scale price, e.g. `"0.05"` or `"$0.05"`.
    pub price: String,
    pub pay_to: MixedAddress,
    pub network: Network,
    pub asset: MixedAddress,
    #[serde(default)]
    pub description: String,
    #[serde(default = "resource_defaults::mime_type")]
    pub mime_type: String,
    #[serde(default = "resource_defaults::max_timeout_seconds")]
    pub max_timeout_seconds: u64,
    /// Token decimals override; USDC's 6 when absent.
    #[serde(default)]
    pub decimals: Option<u32>,
}

mod resource_defaults {
    pub fn mime_type() -> String {
        "application/json".to_string()
    }

    pub fn max_timeout_seconds() -> u64 {
        300
    }
}

impl GatedResourceConfig {
    /// Materializes the payment requirements this resource advertises.
    pub fn to_requirements(&self, public_base: &Url) -> Result<PaymentRequirements, ConfigError> {
        let decimals = self.decimals.unwrap_or(USDC_DECIMALS);
        let atomic = to_atomic_units(&self.price, decimals).map_err(|e| {
            ConfigError::InvalidResource {
                route: self.route.clone(),
                reason: format!("price {:?}: {e}", self.price),
            }
        })?;
        let max_amount_required: TokenAmount =
            atomic.parse().map_err(|_| ConfigError::InvalidResource {
                route: self.route.clone(),
                reason: format!("price {:?} does not fit a token amount", self.price),
            })?;
        if self.max_timeout_seconds == 0 {
            return Err(ConfigError::InvalidResource {
                route: self.route.clone(),
                reason: "maxTimeoutSeconds must be positive".to_string(),
            });
        }
        let resource = public_base
            .join(self.route.trim_start_matches('/'))
            .map_err(|e| ConfigError::InvalidResource {
                route: self.route.clone(),
                reason: format!("route does not form a URL: {e}"),
            })?;
        let extra = self
            .decimals
            .map(|d| serde_json::json!({ "decimals": d }));
        Ok(PaymentRequirements {
            scheme: Scheme::Exact,
            network: self.network,
            max_amount_required,
            resource,
            description: self.description.clone(),
            mime_type: self.mime_type.clone(),
            output_schema: None,
            pay_to: self.pay_to.clone(),
            max_timeout_seconds: self.max_timeout_seconds,
            asset: self.asset.clone(),
            extra,
        })
    }
}

impl Config {
    /// Loads configuration from the CLI-named file, tolerating a missing
    /// file (pure env/default configuration).
    pub fn load() -> Result<Self, ConfigError> {
        let args = CliArgs::parse();
        Self::load_from(&args.config)
    }

    pub fn load_from(path: &PathBuf) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no config file, using env/default configuration");
            return serde_json::from_str("{}").map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            });
        }
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn facilitator_url(&self) -> &Url {
        &self.facilitator_url
    }

    /// Public base URL, defaulting to the bind address.
    pub fn public_base_url(&self) -> Url {
        self.public_base_url.clone().unwrap_or_else(|| {
            Url::parse(&format!("http://{}:{}/", self.host, self.port))
                .expect("bind address forms a URL")
        })
    }

    pub fn networks(&self) -> &[Network] {
        &self.networks
    }

    pub fn verification_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.verification_cache_ttl_seconds)
    }

    pub fn proxy_cache_ttl(&self) -> Option<Duration> {
        (self.proxy_cache_ttl_seconds > 0)
            .then(|| Duration::from_secs(self.proxy_cache_ttl_seconds))
    }

    pub fn proxy_retry_attempts(&self) -> u32 {
        self.proxy_retry_attempts
    }

    pub fn facilitator_timeout(&self) -> Duration {
        Duration::from_secs(self.facilitator_timeout_seconds)
    }

    pub fn resources(&self) -> &[GatedResourceConfig] {
        &self.resources
    }
}
