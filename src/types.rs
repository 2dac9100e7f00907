//! Protocol types for the x402 gateway.
//!
//! The key objects are [`PaymentRequirements`] (what a gated resource
//! accepts), [`PaymentProof`] (client-submitted evidence of payment, carried
//! base64-encoded in the `x-payment` request header), [`VerificationResult`]
//! (the outcome of checking a proof against requirements), and
//! [`PaymentResponseHeader`] (the `x-payment-response` descriptor attached to
//! a paid response).
//!
//! Cryptographic material is opaque here: a proof's signature is validated by
//! the facilitator collaborator, never re-verified locally.

use alloy_primitives::U256;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::{Debug, Display};
use std::str::FromStr;
use url::Url;

use crate::network::Network;
use crate::timestamp::UnixMillis;
use crate::util::Base64Bytes;

/// Enumerates payment schemes. Only "exact" is supported in this
/// implementation, meaning the amount to be transferred must match exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Exact,
}

impl Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Exact => write!(f, "exact"),
        }
    }
}

/// Represents an EVM address.
///
/// Wrapper around `alloy_primitives::Address`, providing display and
/// serialization support.
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct EvmAddress(pub alloy_primitives::Address);

impl EvmAddress {
    /// The zero address, used as the native-asset sentinel: a requirement
    /// whose `asset` is this address is paid in the chain's native token,
    /// and the route executor skips the ERC-20 approval step for it.
    pub const NATIVE_SENTINEL: EvmAddress = EvmAddress(alloy_primitives::Address::ZERO);
}

impl Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to decode EVM address")]
pub struct EvmAddressDecodingError;

impl FromStr for EvmAddress {
    type Err = EvmAddressDecodingError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let address =
            alloy_primitives::Address::from_str(s).map_err(|_| EvmAddressDecodingError)?;
        Ok(Self(address))
    }
}

impl From<alloy_primitives::Address> for EvmAddress {
    fn from(address: alloy_primitives::Address) -> Self {
        EvmAddress(address)
    }
}

/// Represents either an EVM address (0x...) or an off-chain/Solana address.
///
/// The off-chain form is validated by regex (base58-compatible, up to 44
/// characters, covering Solana public keys) and passed through untouched.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub enum MixedAddress {
    Evm(EvmAddress),
    Offchain(String),
}

impl MixedAddress {
    pub fn is_native_sentinel(&self) -> bool {
        matches!(self, MixedAddress::Evm(a) if *a == EvmAddress::NATIVE_SENTINEL)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MixedAddressError {
    #[error("Not an EVM address")]
    NotEvmAddress,
    #[error("Invalid address format")]
    InvalidAddressFormat,
}

impl From<EvmAddress> for MixedAddress {
    fn from(address: EvmAddress) -> Self {
        MixedAddress::Evm(address)
    }
}

impl TryFrom<MixedAddress> for EvmAddress {
    type Error = MixedAddressError;

    fn try_from(value: MixedAddress) -> Result<Self, Self::Error> {
        match value {
            MixedAddress::Evm(address) => Ok(address),
            MixedAddress::Offchain(_) => Err(MixedAddressError::NotEvmAddress),
        }
    }
}

impl Display for MixedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MixedAddress::Evm(address) => write!(f, "{}", address),
            MixedAddress::Offchain(address) => write!(f, "{}", address),
        }
    }
}

static OFFCHAIN_ADDRESS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9-]{0,42}[A-Za-z0-9]$")
        .expect("Invalid regex for offchain address")
});

impl FromStr for MixedAddress {
    type Err = MixedAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match EvmAddress::from_str(s) {
            Ok(address) => Ok(MixedAddress::Evm(address)),
            Err(_) => {
                if OFFCHAIN_ADDRESS_REGEX.is_match(s) {
                    Ok(MixedAddress::Offchain(s.to_string()))
                } else {
                    Err(MixedAddressError::InvalidAddressFormat)
                }
            }
        }
    }
}

impl<'de> Deserialize<'de> for MixedAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        MixedAddress::from_str(&s).map_err(|_| serde::de::Error::custom("Invalid address format"))
    }
}

impl Serialize for MixedAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            MixedAddress::Evm(addr) => serializer.serialize_str(&addr.to_string()),
            MixedAddress::Offchain(s) => serializer.serialize_str(s),
        }
    }
}

/// A precise on-chain token amount in base units (e.g., USDC with 6
/// decimals).
///
/// Serialized as a stringified decimal integer to prevent precision loss —
/// the wire format never carries raw JSON numbers for money.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenAmount(pub U256);

impl TokenAmount {
    pub fn from_u64(value: u64) -> Self {
        TokenAmount(U256::from(value))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("token amount must be a non-negative decimal integer string")]
pub struct TokenAmountParseError;

impl FromStr for TokenAmount {
    type Err = TokenAmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TokenAmountParseError);
        }
        U256::from_str_radix(s, 10)
            .map(TokenAmount)
            .map_err(|_| TokenAmountParseError)
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TokenAmount::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// A 32-byte transaction hash, encoded as 0x-prefixed hex string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionHash(pub [u8; 32]);

static TX_HASH_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("invalid regex"));

impl<'de> Deserialize<'de> for TransactionHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;

        if !TX_HASH_REGEX.is_match(&s) {
            return Err(serde::de::Error::custom("Invalid transaction hash format"));
        }

        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|_| serde::de::Error::custom("Invalid hex in transaction hash"))?;

        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("Transaction hash must be exactly 32 bytes"))?;

        Ok(TransactionHash(array))
    }
}

impl Serialize for TransactionHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl Display for TransactionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// An opaque 0x-prefixed hex signature.
///
/// The gateway only checks the shape; binding it to
/// `(from, to, value, validAfter, validBefore, nonce)` is the facilitator's
/// responsibility.
#[derive(Clone, PartialEq, Eq)]
pub struct OpaqueSignature(pub Vec<u8>);

impl Debug for OpaqueSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpaqueSignature(0x{})", hex::encode(&self.0))
    }
}

static SIGNATURE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x([0-9a-fA-F]{2})+$").expect("invalid signature regex"));

impl<'de> Deserialize<'de> for OpaqueSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if !SIGNATURE_REGEX.is_match(&s) {
            return Err(serde::de::Error::custom(
                "Invalid signature format: must be 0x-prefixed hex of whole bytes",
            ));
        }
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|_| serde::de::Error::custom("Invalid hex in signature"))?;
        Ok(OpaqueSignature(bytes))
    }
}

impl Serialize for OpaqueSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(&self.0)))
    }
}

/// Requirements set by a payment-gated resource for an acceptable payment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: Scheme,
    pub network: Network,
    /// Maximum amount in the asset's smallest unit, as a decimal integer string.
    pub max_amount_required: TokenAmount,
    pub resource: Url,
    pub description: String,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    pub pay_to: MixedAddress,
    /// Must be > 0; doubles as the ttl advertised in challenge headers.
    pub max_timeout_seconds: u64,
    /// Token contract address, or the zero-address native sentinel.
    pub asset: MixedAddress,
    /// Optional token metadata (name/version, `decimals` override).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

impl PaymentRequirements {
    /// Token decimals for amount display: `extra.decimals` when present,
    /// else the USDC default of 6.
    pub fn asset_decimals(&self) -> u32 {
        self.extra
            .as_ref()
            .and_then(|extra| extra.get("decimals"))
            .and_then(|d| d.as_u64())
            .map(|d| d as u32)
            .unwrap_or(6)
    }
}

/// Client-submitted evidence of payment, transported base64-encoded in the
/// `x-payment` (or `x-payment-proof`) request header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProof {
    pub from: MixedAddress,
    pub to: MixedAddress,
    pub value: TokenAmount,
    pub asset: MixedAddress,
    pub network: Network,
    pub valid_after: UnixMillis,
    pub valid_before: UnixMillis,
    /// Creation instant in epoch milliseconds; the freshness anchor.
    pub nonce: UnixMillis,
    pub signature: OpaqueSignature,
}

/// Error returned when decoding a base64-encoded [`PaymentProof`] fails.
pub type ProofDecodingError = crate::util::Base64JsonError;

impl TryFrom<Base64Bytes<'_>> for PaymentProof {
    type Error = ProofDecodingError;

    fn try_from(value: Base64Bytes) -> Result<Self, Self::Error> {
        value.decode_json()
    }
}

/// Outcome of verifying a [`PaymentProof`] against [`PaymentRequirements`].
///
/// `Success` and `Failed` are terminal; a result is never mutated after
/// creation — a retry produces a new result.
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationResult {
    Success {
        amount: TokenAmount,
        reference: String,
        transaction_hash: Option<TransactionHash>,
    },
    Pending,
    Failed {
        error: String,
    },
}

impl VerificationResult {
    pub fn success(
        amount: TokenAmount,
        reference: String,
        transaction_hash: Option<TransactionHash>,
    ) -> Self {
        VerificationResult::Success {
            amount,
            reference,
            transaction_hash,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        VerificationResult::Failed {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, VerificationResult::Success { .. })
    }
}

impl Serialize for VerificationResult {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            VerificationResult::Success {
                amount,
                reference,
                transaction_hash,
            } => {
                let len = if transaction_hash.is_some() { 4 } else { 3 };
                let mut s = serializer.serialize_struct("VerificationResult", len)?;
                s.serialize_field("status", "success")?;
                s.serialize_field("amount", amount)?;
                s.serialize_field("reference", reference)?;
                if let Some(hash) = transaction_hash {
                    s.serialize_field("transactionHash", hash)?;
                }
                s.end()
            }
            VerificationResult::Pending => {
                let mut s = serializer.serialize_struct("VerificationResult", 1)?;
                s.serialize_field("status", "pending")?;
                s.end()
            }
            VerificationResult::Failed { error } => {
                let mut s = serializer.serialize_struct("VerificationResult", 2)?;
                s.serialize_field("status", "failed")?;
                s.serialize_field("error", error)?;
                s.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for VerificationResult {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Raw {
            status: String,
            #[serde(default)]
            amount: Option<TokenAmount>,
            #[serde(default)]
            reference: Option<String>,
            #[serde(default)]
            transaction_hash: Option<TransactionHash>,
            #[serde(default)]
            error: Option<String>,
        }

        let raw = Raw::deserialize(deserializer)?;
        match raw.status.as_str() {
            "success" => match (raw.amount, raw.reference) {
                (Some(amount), Some(reference)) => Ok(VerificationResult::Success {
                    amount,
                    reference,
                    transaction_hash: raw.transaction_hash,
                }),
                _ => Err(serde::de::Error::custom(
                    "success result requires amount and reference",
                )),
            },
            "pending" => Ok(VerificationResult::Pending),
            "failed" => Ok(VerificationResult::Failed {
                error: raw.error.unwrap_or_else(|| "verification failed".into()),
            }),
            other => Err(serde::de::Error::custom(format!(
                "unknown verification status: {other}"
            ))),
        }
    }
}

/// Payment status carried in the `x-payment-response` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Success,
    PaymentRequired,
}

/// The `x-payment-response` descriptor attached to a paid (or challenged)
/// response, JSON-encoded on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponseHeader {
    pub status: PaymentStatus,
    pub amount: TokenAmount,
    pub reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<TransactionHash>,
    /// ISO-8601 instant at which the response was produced.
    pub timestamp: DateTime<Utc>,
}

impl PaymentResponseHeader {
    /// Builds the descriptor for a successful verification.
    ///
    /// Returns `None` for non-success results, which never carry the header.
    pub fn from_verification(result: &VerificationResult) -> Option<Self> {
        match result {
            VerificationResult::Success {
                amount,
                reference,
                transaction_hash,
            } => Some(PaymentResponseHeader {
                status: PaymentStatus::Success,
                amount: *amount,
                reference: reference.clone(),
                transaction_hash: transaction_hash.clone(),
                timestamp: Utc::now(),
            }),
            _ => None,
        }
    }

    /// JSON encoding used as the `x-payment-response` header value.
    pub fn to_header_value(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Structured JSON error body: `{"error": ..., "details": ...}`.
///
/// Payment-domain failures always resolve to a 402 with this body, never a
/// bare 500.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}
