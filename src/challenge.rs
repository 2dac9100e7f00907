//! The 402 challenge header codec and atomic-unit money conversions.
//!
//! A challenge travels in the `x-payment` response header as a query-string
//! encoding:
//!
//! ```text
//! price=0.05&currency=USDC&facilitator=cdp&maxAmount=50000&nonce=1700000000000&ttl=300
//! ```
//!
//! The `nonce` is the encoding instant in epoch milliseconds and doubles as
//! the freshness anchor: the challenge expires at `nonce + ttl * 1000`. This
//! conflates replay prevention with expiry (a still-unexpired proof can be
//! resubmitted); replay protection is the facilitator's responsibility, via
//! nonce uniqueness on its side.
//!
//! All money math here is integer or `rust_decimal` fixed-point. Floating
//! point never touches an amount.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;
use url::form_urlencoded;

use crate::timestamp::UnixMillis;

/// Default token decimals when a requirement carries no `extra.decimals`
/// override. USDC uses 6.
pub const USDC_DECIMALS: u32 = 6;

/// Default challenge lifetime when the header omits `ttl`.
pub const DEFAULT_TTL_SECONDS: u64 = 300;

const DEFAULT_CURRENCY: &str = "USDC";
const DEFAULT_FACILITATOR: &str = "cdp";

/// A decoded (or to-be-encoded) 402 challenge.
///
/// Created fresh per challenge issuance and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentChallenge {
    /// Human-scale price as a decimal string, e.g. `"0.05"`.
    pub price: String,
    pub currency: String,
    /// Facilitator identifier, e.g. `"cdp"`.
    pub facilitator: String,
    /// Maximum charge in atomic units, as a decimal integer string.
    pub max_amount: String,
    /// Encoding instant in epoch milliseconds; `None` when decoded from a
    /// header that omitted it. A challenge without a nonce can never be
    /// proven fresh and is treated as already expired.
    pub nonce: Option<UnixMillis>,
    pub ttl_seconds: u64,
}

/// Error returned when a challenge header cannot be parsed.
#[derive(Debug, thiserror::Error)]
pub enum ChallengeParseError {
    #[error("invalid {field} value: {value:?}")]
    InvalidNumber { field: &'static str, value: String },
    #[error("invalid {field} amount: {value:?}")]
    InvalidAmount { field: &'static str, value: String },
}

static DECIMAL_STRING_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(\.\d+)?$").expect("invalid decimal string regex"));

impl PaymentChallenge {
    /// Builds a challenge stamped with the given encoding instant.
    ///
    /// Production callers pass [`UnixMillis::now`]; tests pin the instant.
    pub fn issue_at(
        price: impl Into<String>,
        max_amount: impl Into<String>,
        ttl_seconds: u64,
        now: UnixMillis,
    ) -> Self {
        PaymentChallenge {
            price: price.into(),
            currency: DEFAULT_CURRENCY.to_string(),
            facilitator: DEFAULT_FACILITATOR.to_string(),
            max_amount: max_amount.into(),
            nonce: Some(now),
            ttl_seconds,
        }
    }

    /// Builds a challenge stamped with the current instant.
    pub fn issue(price: impl Into<String>, max_amount: impl Into<String>, ttl_seconds: u64) -> Self {
        Self::issue_at(price, max_amount, ttl_seconds, UnixMillis::now())
    }

    /// Encodes the challenge into its `x-payment` header form.
    ///
    /// Field order is fixed: `price`, `currency`, `facilitator`,
    /// `maxAmount`, `nonce`, `ttl`.
    pub fn encode(&self) -> String {
        let nonce = self.nonce.map(|n| n.to_string()).unwrap_or_default();
        form_urlencoded::Serializer::new(String::new())
            .append_pair("price", &self.price)
            .append_pair("currency", &self.currency)
            .append_pair("facilitator", &self.facilitator)
            .append_pair("maxAmount", &self.max_amount)
            .append_pair("nonce", &nonce)
            .append_pair("ttl", &self.ttl_seconds.to_string())
            .finish()
    }

    /// Parses a challenge header.
    ///
    /// Missing keys fall back to documented defaults: price `"0"`, currency
    /// `"USDC"`, facilitator `"cdp"`, maxAmount `"0"`, nonce absent, ttl
    /// `300`. Keys that are present but malformed are errors, not defaults.
    pub fn decode(header: &str) -> Result<Self, ChallengeParseError> {
        let mut price: Option<String> = None;
        let mut currency: Option<String> = None;
        let mut facilitator: Option<String> = None;
        let mut max_amount: Option<String> = None;
        let mut nonce: Option<UnixMillis> = None;
        let mut ttl_seconds: Option<u64> = None;

        for (key, value) in form_urlencoded::parse(header.as_bytes()) {
            match key.as_ref() {
                "price" => {
                    if !DECIMAL_STRING_REGEX.is_match(&value) {
                        return Err(ChallengeParseError::InvalidAmount {
                            field: "price",
                            value: value.into_owned(),
                        });
                    }
                    price = Some(value.into_owned());
                }
                "currency" => currency = Some(value.into_owned()),
                "facilitator" => facilitator = Some(value.into_owned()),
                "maxAmount" => {
                    if !value.bytes().all(|b| b.is_ascii_digit()) || value.is_empty() {
                        return Err(ChallengeParseError::InvalidAmount {
                            field: "maxAmount",
                            value: value.into_owned(),
                        });
                    }
                    max_amount = Some(value.into_owned());
                }
                "nonce" => {
                    // An empty nonce is the documented "absent" encoding.
                    if !value.is_empty() {
                        let parsed = UnixMillis::from_str(&value).map_err(|_| {
                            ChallengeParseError::InvalidNumber {
                                field: "nonce",
                                value: value.clone().into_owned(),
                            }
                        })?;
                        nonce = Some(parsed);
                    }
                }
                "ttl" => {
                    let parsed =
                        value
                            .parse::<u64>()
                            .map_err(|_| ChallengeParseError::InvalidNumber {
                                field: "ttl",
                                value: value.clone().into_owned(),
                            })?;
                    ttl_seconds = Some(parsed);
                }
                _ => {}
            }
        }

        Ok(PaymentChallenge {
            price: price.unwrap_or_else(|| "0".to_string()),
            currency: currency.unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            facilitator: facilitator.unwrap_or_else(|| DEFAULT_FACILITATOR.to_string()),
            max_amount: max_amount.unwrap_or_else(|| "0".to_string()),
            nonce,
            ttl_seconds: ttl_seconds.unwrap_or(DEFAULT_TTL_SECONDS),
        })
    }

    /// Whether the challenge's freshness window has closed at `now`.
    ///
    /// The window is `[nonce, nonce + ttl * 1000)`: a challenge is live
    /// strictly before the expiry instant and expired from that instant on.
    /// A challenge without a nonce is expired by definition.
    pub fn is_expired(&self, now: UnixMillis) -> bool {
        match self.nonce {
            Some(nonce) => now >= nonce.expiry(self.ttl_seconds),
            None => true,
        }
    }
}

impl Display for PaymentChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// Errors from atomic/decimal amount conversions.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AmountConversionError {
    #[error("Invalid number format")]
    InvalidFormat,
    #[error("Negative value is not allowed")]
    Negative,
    #[error("Amount out of range")]
    OutOfRange,
    #[error("Too big of a precision: {money} vs {token} on token")]
    WrongPrecision { money: u32, token: u32 },
}

/// Formats an atomic-unit amount as a fixed-scale decimal string.
///
/// `format_atomic_to_decimal("50000", 6)` is `"0.050000"`. The output always
/// carries exactly `decimals` fraction digits (none when `decimals` is 0),
/// so equal amounts format identically.
pub fn format_atomic_to_decimal(
    atomic: &str,
    decimals: u32,
) -> Result<String, AmountConversionError> {
    if atomic.is_empty() || !atomic.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AmountConversionError::InvalidFormat);
    }
    let value = atomic
        .parse::<u128>()
        .map_err(|_| AmountConversionError::OutOfRange)?;
    if decimals == 0 {
        return Ok(value.to_string());
    }
    let scale = 10u128
        .checked_pow(decimals)
        .ok_or(AmountConversionError::OutOfRange)?;
    let whole = value / scale;
    let frac = value % scale;
    Ok(format!(
        "{whole}.{frac:0width$}",
        width = decimals as usize
    ))
}

/// Converts a human-scale decimal string to atomic units.
///
/// `to_atomic_units("0.05", 6)` is `"50000"`. Input is parsed as
/// fixed-point decimal; more fraction digits than the token carries is a
/// precision error, not a silent truncation.
pub fn to_atomic_units(decimal: &str, decimals: u32) -> Result<String, AmountConversionError> {
    let parsed = parse_money(decimal)?;
    let scale = parsed.scale();
    if scale > decimals {
        return Err(AmountConversionError::WrongPrecision {
            money: scale,
            token: decimals,
        });
    }
    let mantissa = parsed.mantissa().unsigned_abs();
    let multiplier = 10u128
        .checked_pow(decimals - scale)
        .ok_or(AmountConversionError::OutOfRange)?;
    let atomic = mantissa
        .checked_mul(multiplier)
        .ok_or(AmountConversionError::OutOfRange)?;
    Ok(atomic.to_string())
}

mod money_bounds {
    use super::*;

    pub const MAX_STR: &str = "999999999999";

    pub static MAX: Lazy<Decimal> = Lazy::new(|| Decimal::from_str(MAX_STR).expect("valid decimal"));
}

static MONEY_CLEANUP_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\d\.\-]+").expect("valid cleanup regex"));

/// Parses a price-like value in human currency format.
///
/// Accepts strings like `"$0.01"`, `"1,000"`, or raw numbers; rejects
/// negatives and out-of-range values.
pub fn parse_money(input: &str) -> Result<Decimal, AmountConversionError> {
    let cleaned = MONEY_CLEANUP_REGEX.replace_all(input, "");

    let parsed = Decimal::from_str(&cleaned).map_err(|_| AmountConversionError::InvalidFormat)?;

    if parsed.is_sign_negative() {
        return Err(AmountConversionError::Negative);
    }
    if parsed > *money_bounds::MAX {
        return Err(AmountConversionError::OutOfRange);
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: u64 = 1700000000000;

    #[test]
    fn encodes_the_documented_wire_format() {
        let challenge =
            PaymentChallenge::issue_at("0.05", "50000", 300, UnixMillis::from_millis(T0));
        assert_eq!(
            challenge.encode(),
            "price=0.05&currency=USDC&facilitator=cdp&maxAmount=50000&nonce=1700000000000&ttl=300"
        );
    }

    #[test]
    fn decode_recovers_encoded_fields() {
        let original =
            PaymentChallenge::issue_at("0.05", "50000", 300, UnixMillis::from_millis(T0));
        let decoded = PaymentChallenge::decode(&original.encode()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn decode_applies_defaults_for_missing_keys() {
        let decoded = PaymentChallenge::decode("").unwrap();
        assert_eq!(decoded.price, "0");
        assert_eq!(decoded.currency, "USDC");
        assert_eq!(decoded.facilitator, "cdp");
        assert_eq!(decoded.max_amount, "0");
        assert_eq!(decoded.nonce, None);
        assert_eq!(decoded.ttl_seconds, 300);
    }

    #[test]
    fn decode_rejects_malformed_values() {
        assert!(PaymentChallenge::decode("ttl=abc").is_err());
        assert!(PaymentChallenge::decode("nonce=later").is_err());
        assert!(PaymentChallenge::decode("price=1.2.3").is_err());
        assert!(PaymentChallenge::decode("maxAmount=0.5").is_err());
    }

    #[test]
    fn empty_nonce_is_absent_not_an_error() {
        let decoded = PaymentChallenge::decode("price=0.05&nonce=&ttl=300").unwrap();
        assert_eq!(decoded.nonce, None);
        assert!(decoded.is_expired(UnixMillis::from_millis(T0)));
    }

    #[test]
    fn freshness_is_monotonic_over_the_window() {
        let challenge =
            PaymentChallenge::issue_at("0.05", "50000", 300, UnixMillis::from_millis(T0));
        assert!(!challenge.is_expired(UnixMillis::from_millis(T0)));
        assert!(!challenge.is_expired(UnixMillis::from_millis(T0 + 299_999)));
        assert!(challenge.is_expired(UnixMillis::from_millis(T0 + 300_000)));
        assert!(challenge.is_expired(UnixMillis::from_millis(T0 + 300_001)));
    }

    #[test]
    fn atomic_to_decimal_pads_to_token_scale() {
        assert_eq!(format_atomic_to_decimal("50000", 6).unwrap(), "0.050000");
        assert_eq!(
            format_atomic_to_decimal("1500000", 6).unwrap(),
            "1.500000"
        );
        assert_eq!(format_atomic_to_decimal("42", 0).unwrap(), "42");
        assert!(format_atomic_to_decimal("1e5", 6).is_err());
        assert!(format_atomic_to_decimal("", 6).is_err());
    }

    #[test]
    fn decimal_to_atomic() {
        assert_eq!(to_atomic_units("0.05", 6).unwrap(), "50000");
        assert_eq!(to_atomic_units("1.5", 6).unwrap(), "1500000");
        assert_eq!(to_atomic_units("0", 6).unwrap(), "0");
        assert_eq!(
            to_atomic_units("0.1234567", 6),
            Err(AmountConversionError::WrongPrecision { money: 7, token: 6 })
        );
        assert_eq!(
            to_atomic_units("-1", 6),
            Err(AmountConversionError::Negative)
        );
    }

    #[test]
    fn atomic_conversion_is_idempotent() {
        for atomic in ["0", "1", "50000", "1000000", "18446744073709551615"] {
            let decimal = format_atomic_to_decimal(atomic, 6).unwrap();
            assert_eq!(to_atomic_units(&decimal, 6).unwrap(), atomic.to_string());
        }
    }

    #[test]
    fn parse_money_cleans_currency_symbols() {
        assert_eq!(parse_money("$0.01").unwrap(), Decimal::from_str("0.01").unwrap());
        assert_eq!(parse_money("1,000").unwrap(), Decimal::from_str("1000").unwrap());
        assert!(parse_money("abc").is_err());
    }
}
