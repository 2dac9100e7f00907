//! The resource gate: per-request 402 decision logic.
//!
//! For every inbound request against a gated resource the gate decides one
//! of three things: challenge (no payment attached), forward (payment
//! verified), or reject (payment attached but not acceptable). The decision
//! is stateless and re-evaluated from scratch on every call — no session
//! state crosses requests, so the same headers against the same requirement
//! always produce the same decision class.
//!
//! Replay prevention is delegated to the facilitator via proof-nonce
//! uniqueness; the gate keeps no proof ledger.

use http::HeaderMap;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::challenge::{PaymentChallenge, format_atomic_to_decimal};
use crate::facilitator::{Facilitator, FacilitatorError};
use crate::timestamp::UnixMillis;
use crate::types::{
    ErrorResponse, PaymentRequirements, PaymentResponseHeader, VerificationResult,
};
use crate::verify::PaymentVerifier;

/// Request header carrying a payment proof.
pub const HEADER_PAYMENT: &str = "x-payment";
/// Alternate request header name accepted for the same proof payload.
pub const HEADER_PAYMENT_PROOF: &str = "x-payment-proof";
/// Response header carrying the challenge (on 402) and, as
/// [`HEADER_PAYMENT_RESPONSE`], the settlement descriptor (on success).
pub const HEADER_PAYMENT_RESPONSE: &str = "x-payment-response";

/// Outcome of gating one request.
#[derive(Debug, Clone)]
pub enum GateDecision {
    /// No payment header present: serve 402 with this `x-payment` challenge
    /// header value.
    Challenge { header: String },
    /// Payment verified: forward to the upstream and attach this
    /// `x-payment-response` descriptor to the eventual response.
    Forward {
        response_header: PaymentResponseHeader,
    },
    /// Payment present but not acceptable: serve 402 (never 500) with this
    /// structured error body.
    Reject { error: ErrorResponse },
}

impl GateDecision {
    pub fn is_forward(&self) -> bool {
        matches!(self, GateDecision::Forward { .. })
    }
}

/// Gates requests to a protected resource behind x402 payment.
///
/// A constructible service object: each instance owns its verifier (and
/// through it a facilitator handle), so independently configured gates can
/// coexist in one process.
pub struct ResourceGate<F> {
    verifier: PaymentVerifier<F>,
}

impl<F> ResourceGate<F>
where
    F: Facilitator<Error = FacilitatorError>,
{
    pub fn new(verifier: PaymentVerifier<F>) -> Self {
        Self { verifier }
    }

    /// Decides what to do with one inbound request.
    pub async fn handle(
        &self,
        headers: &HeaderMap,
        requirements: &PaymentRequirements,
    ) -> GateDecision {
        self.handle_at(headers, requirements, UnixMillis::now())
            .await
    }

    /// [`ResourceGate::handle`] with a pinned clock, for tests.
    pub async fn handle_at(
        &self,
        headers: &HeaderMap,
        requirements: &PaymentRequirements,
        now: UnixMillis,
    ) -> GateDecision {
        let proof_header = match extract_payment_header(headers) {
            Some(bytes) => bytes,
            None => {
                return GateDecision::Challenge {
                    header: build_challenge(requirements, now).encode(),
                };
            }
        };

        match self
            .verifier
            .verify_at(proof_header, requirements, now)
            .await
        {
            result @ VerificationResult::Success { .. } => {
                // from_verification is Some for every success value.
                match PaymentResponseHeader::from_verification(&result) {
                    Some(response_header) => GateDecision::Forward { response_header },
                    None => GateDecision::Reject {
                        error: ErrorResponse::new("verification produced no settlement descriptor"),
                    },
                }
            }
            VerificationResult::Pending => GateDecision::Reject {
                error: ErrorResponse::with_details(
                    "payment pending",
                    "settlement has not completed; retry with a fresh proof",
                ),
            },
            VerificationResult::Failed { error } => GateDecision::Reject {
                error: ErrorResponse::with_details("payment verification failed", error),
            },
        }
    }
}

/// Pulls the payment proof bytes from the request headers, trying
/// `x-payment` first and `x-payment-proof` as the documented alias.
pub fn extract_payment_header(headers: &HeaderMap) -> Option<&[u8]> {
    headers
        .get(HEADER_PAYMENT)
        .or_else(|| headers.get(HEADER_PAYMENT_PROOF))
        .map(|value| value.as_bytes())
}

/// Builds the challenge a requirement advertises: price is the
/// human-readable form of the maximum amount, ttl mirrors the requirement's
/// timeout, and the nonce is the encoding instant.
fn build_challenge(requirements: &PaymentRequirements, now: UnixMillis) -> PaymentChallenge {
    let max_amount = requirements.max_amount_required.to_string();
    let price = display_price(&max_amount, requirements.asset_decimals());
    PaymentChallenge::issue_at(price, max_amount, requirements.max_timeout_seconds, now)
}

/// Human-scale price string without trailing zeros: `"50000"` atomic at 6
/// decimals displays as `"0.05"`.
fn display_price(atomic: &str, decimals: u32) -> String {
    format_atomic_to_decimal(atomic, decimals)
        .ok()
        .and_then(|padded| Decimal::from_str(&padded).ok())
        .map(|d| d.normalize().to_string())
        .unwrap_or_else(|| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facilitator::FacilitatorClient;
    use crate::network::Network;
    use crate::types::{MixedAddress, Scheme, TokenAmount};
    use crate::util::Base64Bytes;
    use http::HeaderValue;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const T0: u64 = 1700000000000;

    fn requirements() -> PaymentRequirements {
        PaymentRequirements {
            scheme: Scheme::Exact,
            network: Network::Base,
            max_amount_required: TokenAmount::from_u64(50000),
            resource: "https://api.example.com/data".parse().unwrap(),
            description: "market data".to_string(),
            mime_type: "application/json".to_string(),
            output_schema: None,
            pay_to: MixedAddress::from_str("0x036CbD53842c5426634e7929541eC2318f3dCF7e").unwrap(),
            max_timeout_seconds: 300,
            asset: MixedAddress::from_str("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913").unwrap(),
            extra: None,
        }
    }

    fn proof_header_value() -> HeaderValue {
        let json = serde_json::json!({
            "from": "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045",
            "to": "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
            "value": "50000",
            "asset": "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
            "network": "base",
            "validAfter": T0.to_string(),
            "validBefore": (T0 + 300_000).to_string(),
            "nonce": T0.to_string(),
            "signature": "0xdeadbeef"
        });
        let encoded = Base64Bytes::encode(serde_json::to_vec(&json).unwrap());
        HeaderValue::from_bytes(encoded.as_ref()).unwrap()
    }

    async fn gate_against(server: &MockServer) -> ResourceGate<FacilitatorClient> {
        let client = FacilitatorClient::try_from(server.uri().as_str()).unwrap();
        ResourceGate::new(PaymentVerifier::new(client))
    }

    #[tokio::test]
    async fn missing_payment_header_yields_challenge() {
        let server = MockServer::start().await;
        let gate = gate_against(&server).await;

        let decision = gate
            .handle_at(
                &HeaderMap::new(),
                &requirements(),
                UnixMillis::from_millis(T0),
            )
            .await;

        match decision {
            GateDecision::Challenge { header } => {
                assert_eq!(
                    header,
                    "price=0.05&currency=USDC&facilitator=cdp&maxAmount=50000&nonce=1700000000000&ttl=300"
                );
            }
            other => panic!("expected challenge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn verified_payment_yields_forward_with_descriptor() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"reference": "fac_7"})),
            )
            .mount(&server)
            .await;

        let gate = gate_against(&server).await;
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_PAYMENT, proof_header_value());

        let decision = gate
            .handle_at(&headers, &requirements(), UnixMillis::from_millis(T0 + 1))
            .await;

        match decision {
            GateDecision::Forward { response_header } => {
                assert_eq!(response_header.reference, "fac_7");
                assert_eq!(response_header.amount, TokenAmount::from_u64(50000));
            }
            other => panic!("expected forward, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn proof_alias_header_is_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"reference": "fac_8"})),
            )
            .mount(&server)
            .await;

        let gate = gate_against(&server).await;
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_PAYMENT_PROOF, proof_header_value());

        let decision = gate
            .handle_at(&headers, &requirements(), UnixMillis::from_millis(T0 + 1))
            .await;
        assert!(decision.is_forward());
    }

    #[tokio::test]
    async fn rejected_payment_yields_reject_with_reason() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(400).set_body_string("signature mismatch"))
            .mount(&server)
            .await;

        let gate = gate_against(&server).await;
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_PAYMENT, proof_header_value());

        let decision = gate
            .handle_at(&headers, &requirements(), UnixMillis::from_millis(T0 + 1))
            .await;

        match decision {
            GateDecision::Reject { error } => {
                assert_eq!(error.error, "payment verification failed");
                assert!(error.details.unwrap().contains("signature mismatch"));
            }
            other => panic!("expected reject, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_proof_yields_reject_not_panic() {
        let server = MockServer::start().await;
        let gate = gate_against(&server).await;
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_PAYMENT, HeaderValue::from_static("%%%"));

        let decision = gate
            .handle_at(&headers, &requirements(), UnixMillis::from_millis(T0))
            .await;
        assert!(matches!(decision, GateDecision::Reject { .. }));
    }

    #[tokio::test]
    async fn decision_class_is_deterministic_for_same_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"reference": "fac_9"})),
            )
            .mount(&server)
            .await;

        let gate = gate_against(&server).await;
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_PAYMENT, proof_header_value());

        for _ in 0..3 {
            let decision = gate
                .handle_at(&headers, &requirements(), UnixMillis::from_millis(T0 + 1))
                .await;
            assert!(decision.is_forward());
        }

        for _ in 0..3 {
            let decision = gate
                .handle_at(
                    &HeaderMap::new(),
                    &requirements(),
                    UnixMillis::from_millis(T0 + 1),
                )
                .await;
            assert!(matches!(decision, GateDecision::Challenge { .. }));
        }
    }
}
