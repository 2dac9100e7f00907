use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::fmt::Display;

/// Contains bytes of base64 encoded some other bytes.
///
/// Payment proof headers travel as base64(JSON); this wrapper keeps the
/// encoded form distinct from raw payload bytes in function signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64Bytes<'a>(pub Cow<'a, [u8]>);

/// Error decoding base64(JSON) into a typed value.
#[derive(Debug, thiserror::Error)]
pub enum Base64JsonError {
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("json parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Base64Bytes<'_> {
    /// Decode base64 string bytes to raw binary payload.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        b64.decode(&self.0)
    }

    /// Decode base64 string bytes and parse the payload as JSON.
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T, Base64JsonError> {
        let decoded = self.decode()?;
        Ok(serde_json::from_slice(&decoded)?)
    }

    /// Encode raw binary input into base64 string bytes
    pub fn encode<T: AsRef<[u8]>>(input: T) -> Base64Bytes<'static> {
        let encoded = b64.encode(input.as_ref());
        Base64Bytes(Cow::Owned(encoded.into_bytes()))
    }
}

impl AsRef<[u8]> for Base64Bytes<'_> {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl<'a> From<&'a [u8]> for Base64Bytes<'a> {
    fn from(slice: &'a [u8]) -> Self {
        Base64Bytes(Cow::Borrowed(slice))
    }
}

impl Display for Base64Bytes<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.0.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let encoded = Base64Bytes::encode(b"hello");
        assert_eq!(encoded.as_ref(), b"aGVsbG8=");
        assert_eq!(encoded.decode().unwrap(), b"hello");
    }

    #[test]
    fn decode_json_parses_typed_payloads() {
        let encoded = Base64Bytes::encode(b"{\"x\": 1}");
        let value: serde_json::Value = encoded.decode_json().unwrap();
        assert_eq!(value["x"], 1);

        let garbage = Base64Bytes::from(&b"!!!"[..]);
        assert!(matches!(
            garbage.decode_json::<serde_json::Value>(),
            Err(Base64JsonError::Base64(_))
        ));
    }
}
