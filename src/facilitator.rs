//! The facilitator collaborator: remote verification of payment proofs.
//!
//! Cryptographic and on-chain checks are never performed in this crate. A
//! submitted proof is posted to an external facilitator service, which owns
//! signature binding, settlement, and replay protection (nonce uniqueness).
//! This module defines the [`Facilitator`] trait and the HTTP
//! [`FacilitatorClient`] that speaks to a remote facilitator's `/verify`
//! endpoint.

use http::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::timestamp::UnixMillis;
use crate::types::{TokenAmount, TransactionHash};

/// Request body for `POST <facilitator>/verify`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitatorVerifyRequest {
    /// The raw base64 proof header as received from the client.
    pub payment_header: String,
    /// Optional additional client proof material, passed through opaquely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_proof: Option<String>,
    pub nonce: UnixMillis,
    pub amount: TokenAmount,
}

/// Successful facilitator response: a settlement reference and, when the
/// facilitator settled on-chain, a transaction hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitatorReceipt {
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub transaction_hash: Option<TransactionHash>,
}

/// Asynchronous interface to a payment facilitator.
///
/// Implemented by [`FacilitatorClient`] for remote facilitators and by test
/// doubles in unit tests.
pub trait Facilitator {
    type Error: Debug + Display;

    /// Verifies a payment proof, returning the facilitator's receipt.
    ///
    /// A facilitator that accepts the proof but has not finished settling
    /// may answer `202 Accepted`; that surfaces as
    /// [`FacilitatorError::Pending`] from the client implementation.
    fn verify(
        &self,
        request: &FacilitatorVerifyRequest,
    ) -> impl Future<Output = Result<FacilitatorReceipt, Self::Error>> + Send;
}

impl<T: Facilitator> Facilitator for Arc<T> {
    type Error = T::Error;

    fn verify(
        &self,
        request: &FacilitatorVerifyRequest,
    ) -> impl Future<Output = Result<FacilitatorReceipt, Self::Error>> + Send {
        self.as_ref().verify(request)
    }
}

/// Errors from a remote facilitator interaction.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorError {
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        context: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("HTTP error: {context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Facilitator returned {status}: {body}")]
    Rejected { status: StatusCode, body: String },
    #[error("Facilitator accepted the proof but settlement is pending")]
    Pending,
    #[error("Failed to read response body as text: {context}: {source}")]
    ResponseBodyRead {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

/// HTTP client for a remote facilitator.
///
/// Every request carries the configured timeout; a timed-out call surfaces
/// as [`FacilitatorError::Http`] and resolves the verification as failed
/// rather than hanging the gate.
#[derive(Clone, Debug)]
pub struct FacilitatorClient {
    base_url: Url,
    verify_url: Url,
    client: Client,
    headers: HeaderMap,
    timeout: Duration,
}

impl FacilitatorClient {
    /// Default timeout for facilitator calls.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Constructs a client from a base URL, pre-computing the `./verify`
    /// endpoint URL.
    pub fn try_new(base_url: Url) -> Result<Self, FacilitatorError> {
        let verify_url = base_url
            .join("./verify")
            .map_err(|e| FacilitatorError::UrlParse {
                context: "Failed to construct ./verify URL",
                source: e,
            })?;
        Ok(Self {
            base_url,
            verify_url,
            client: Client::new(),
            headers: HeaderMap::new(),
            timeout: Self::DEFAULT_TIMEOUT,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn verify_url(&self) -> &Url {
        &self.verify_url
    }

    /// Attaches custom headers to all future requests.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn post_verify(
        &self,
        request: &FacilitatorVerifyRequest,
    ) -> Result<FacilitatorReceipt, FacilitatorError> {
        let context = "POST /verify";
        let mut req = self
            .client
            .post(self.verify_url.clone())
            .json(request)
            .timeout(self.timeout);
        for (key, value) in self.headers.iter() {
            req = req.header(key, value);
        }
        let response = req
            .send()
            .await
            .map_err(|e| FacilitatorError::Http { context, source: e })?;

        let status = response.status();
        if status == StatusCode::ACCEPTED {
            return Err(FacilitatorError::Pending);
        }
        if status.is_success() {
            response
                .json::<FacilitatorReceipt>()
                .await
                .map_err(|e| FacilitatorError::JsonDeserialization { context, source: e })
        } else {
            let body = response
                .text()
                .await
                .map_err(|e| FacilitatorError::ResponseBodyRead { context, source: e })?;
            Err(FacilitatorError::Rejected { status, body })
        }
    }
}

impl Facilitator for FacilitatorClient {
    type Error = FacilitatorError;

    async fn verify(
        &self,
        request: &FacilitatorVerifyRequest,
    ) -> Result<FacilitatorReceipt, FacilitatorError> {
        let result = self.post_verify(request).await;
        if let Err(err) = &result {
            tracing::warn!(error = %err, "facilitator verification call failed");
        }
        result
    }
}

/// Converts a string URL into a [`FacilitatorClient`], normalizing the
/// trailing slash so relative joins behave.
impl TryFrom<&str> for FacilitatorClient {
    type Error = FacilitatorError;

    fn try_from(value: &str) -> Result<Self, FacilitatorError> {
        let mut normalized = value.trim_end_matches('/').to_string();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|e| FacilitatorError::UrlParse {
            context: "Failed to parse base url",
            source: e,
        })?;
        FacilitatorClient::try_new(url)
    }
}
