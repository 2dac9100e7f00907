//! Small shared utilities.
//!
//! - [`Base64Bytes`] — base64 transport wrapper for payment proof headers.

mod b64;

pub use b64::{Base64Bytes, Base64JsonError};
