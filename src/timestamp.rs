use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::ops::Add;
use std::str::FromStr;
use std::time::SystemTime;

/// A Unix timestamp in milliseconds, represented as a `u64`.
///
/// This is the time unit of the x402 challenge wire format: a challenge's
/// `nonce` field is the encoding instant in milliseconds since the Unix
/// epoch, and its expiry is `nonce + ttl * 1000`. Payment proofs carry the
/// same unit in their creation timestamp.
///
/// Serialized as a stringified integer to avoid loss of precision in JSON.
/// For example, `1700000000000` becomes `"1700000000000"` in the wire format.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Ord, Eq, Hash)]
pub struct UnixMillis(u64);

impl Serialize for UnixMillis {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for UnixMillis {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let ms = s
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom("timestamp must be a non-negative integer"))?;
        Ok(UnixMillis(ms))
    }
}

impl Display for UnixMillis {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<u64> for UnixMillis {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        UnixMillis(self.0.saturating_add(rhs))
    }
}

impl FromStr for UnixMillis {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(UnixMillis)
    }
}

impl UnixMillis {
    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    pub fn now() -> Self {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("SystemTime before UNIX epoch?!?")
            .as_millis() as u64;
        Self(now)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Wall-clock instant at which a window of `ttl_seconds` anchored here closes.
    pub fn expiry(&self, ttl_seconds: u64) -> UnixMillis {
        *self + ttl_seconds.saturating_mul(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_string() {
        let ts = UnixMillis::from_millis(1700000000000);
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"1700000000000\"");
        let back: UnixMillis = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
    }

    #[test]
    fn expiry_window() {
        let t0 = UnixMillis::from_millis(1700000000000);
        assert_eq!(t0.expiry(300), UnixMillis::from_millis(1700000300000));
    }

    #[test]
    fn rejects_negative_and_garbage() {
        assert!(serde_json::from_str::<UnixMillis>("\"-5\"").is_err());
        assert!(serde_json::from_str::<UnixMillis>("\"abc\"").is_err());
    }
}
