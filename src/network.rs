//! Network definitions for the gateway's supported-chain registry.
//!
//! This module defines the chains a payment requirement may name and the
//! cross-chain route planner may bridge between. The gateway never talks to
//! these chains directly (signature checks and transfers are delegated to
//! the facilitator and wallet-client collaborators), so a network here is a
//! label with a chain class, not an RPC endpoint.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Chain family of a [`Network`], used by the route planner to pick a bridge
/// protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainClass {
    /// EVM-compatible chain (EIP-155 chain id).
    Evm,
    /// Solana-family chain.
    Solana,
}

/// Supported networks.
///
/// Used to differentiate between testnet and mainnet environments for the
/// x402 protocol.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
    /// Base mainnet (chain ID 8453).
    #[serde(rename = "base")]
    Base,
    /// Base Sepolia testnet (chain ID 84532).
    #[serde(rename = "base-sepolia")]
    BaseSepolia,
    /// Polygon mainnet (chain ID 137).
    #[serde(rename = "polygon")]
    Polygon,
    /// Polygon Amoy testnet (chain ID 80002).
    #[serde(rename = "polygon-amoy")]
    PolygonAmoy,
    /// Avalanche mainnet (chain ID 43114).
    #[serde(rename = "avalanche")]
    Avalanche,
    /// Ethereum mainnet (chain ID 1).
    #[serde(rename = "ethereum")]
    Ethereum,
    /// Arbitrum One (chain ID 42161).
    #[serde(rename = "arbitrum")]
    Arbitrum,
    /// Solana mainnet.
    #[serde(rename = "solana")]
    Solana,
    /// Solana devnet.
    #[serde(rename = "solana-devnet")]
    SolanaDevnet,
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Base => write!(f, "base"),
            Network::BaseSepolia => write!(f, "base-sepolia"),
            Network::Polygon => write!(f, "polygon"),
            Network::PolygonAmoy => write!(f, "polygon-amoy"),
            Network::Avalanche => write!(f, "avalanche"),
            Network::Ethereum => write!(f, "ethereum"),
            Network::Arbitrum => write!(f, "arbitrum"),
            Network::Solana => write!(f, "solana"),
            Network::SolanaDevnet => write!(f, "solana-devnet"),
        }
    }
}

/// Error returned when a network name is not in the registry.
#[derive(Debug, thiserror::Error)]
#[error("unsupported network: {0}")]
pub struct UnsupportedNetwork(pub String);

impl FromStr for Network {
    type Err = UnsupportedNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Network::variants()
            .iter()
            .find(|n| n.to_string() == s)
            .copied()
            .ok_or_else(|| UnsupportedNetwork(s.to_string()))
    }
}

impl Network {
    /// Return all known [`Network`] variants.
    pub fn variants() -> &'static [Network] {
        &[
            Network::Base,
            Network::BaseSepolia,
            Network::Polygon,
            Network::PolygonAmoy,
            Network::Avalanche,
            Network::Ethereum,
            Network::Arbitrum,
            Network::Solana,
            Network::SolanaDevnet,
        ]
    }

    pub fn chain_class(&self) -> ChainClass {
        match self {
            Network::Solana | Network::SolanaDevnet => ChainClass::Solana,
            _ => ChainClass::Evm,
        }
    }

    pub fn is_evm(&self) -> bool {
        self.chain_class() == ChainClass::Evm
    }

    /// EIP-155 chain id for EVM networks, `None` for Solana-family chains.
    pub fn eip155_chain_id(&self) -> Option<u64> {
        match self {
            Network::Base => Some(8453),
            Network::BaseSepolia => Some(84532),
            Network::Polygon => Some(137),
            Network::PolygonAmoy => Some(80002),
            Network::Avalanche => Some(43114),
            Network::Ethereum => Some(1),
            Network::Arbitrum => Some(42161),
            Network::Solana | Network::SolanaDevnet => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_names() {
        for network in Network::variants() {
            let parsed: Network = network.to_string().parse().unwrap();
            assert_eq!(parsed, *network);
        }
    }

    #[test]
    fn rejects_unknown_name() {
        assert!("near".parse::<Network>().is_err());
    }

    #[test]
    fn chain_classing() {
        assert!(Network::Base.is_evm());
        assert!(Network::Polygon.is_evm());
        assert!(!Network::Solana.is_evm());
        assert_eq!(Network::Solana.eip155_chain_id(), None);
        assert_eq!(Network::Base.eip155_chain_id(), Some(8453));
    }
}
