//! HTTP endpoints of the gateway.
//!
//! The gateway serves a small fixed surface plus one passthrough: any
//! request whose path matches a configured gated resource goes through the
//! resource gate and, when paid, on to the upstream.
//!
//! - `GET /healthz` — liveness.
//! - `GET /supported` — registered networks and accepted payment kinds.
//! - `GET /route` — cross-chain route plan and cost estimate.
//! - `POST /probe` — endpoint health probing, out of the payment hot path.
//! - anything else — gated passthrough for configured resources.
//!
//! Payment-domain failures always answer 402 with a structured JSON body;
//! 500 is reserved for genuinely unexpected faults.

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::config::{Config, ConfigError};
use crate::facilitator::FacilitatorClient;
use crate::gate::{GateDecision, HEADER_PAYMENT, ResourceGate};
use crate::network::Network;
use crate::probe::{EndpointProbe, ProbeOptions, ValidationResult};
use crate::proxy::{ProxyError, ProxyForwarder, RetryPolicy};
use crate::route::{RouteError, RoutePlanner};
use crate::types::{ErrorResponse, PaymentRequirements, Scheme};
use crate::verify::PaymentVerifier;

/// A configured gated resource, resolved at startup.
pub struct GatedResource {
    /// Route prefix under the gateway.
    pub route: String,
    /// Upstream base URL.
    pub upstream: Url,
    pub requirements: PaymentRequirements,
}

/// Shared state for all handlers: the gateway's service objects, each
/// explicitly constructed and injected rather than ambient.
pub struct GatewayState {
    gate: ResourceGate<FacilitatorClient>,
    proxy: ProxyForwarder,
    planner: RoutePlanner,
    probe: EndpointProbe,
    resources: Vec<GatedResource>,
    retry: Option<RetryPolicy>,
}

impl GatewayState {
    /// Assembles the gateway from configuration.
    pub fn from_config(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        let facilitator = FacilitatorClient::try_new(config.facilitator_url().clone())?
            .with_timeout(config.facilitator_timeout());
        let verifier =
            PaymentVerifier::with_cache_ttl(facilitator, config.verification_cache_ttl());
        let gate = ResourceGate::new(verifier);

        let mut proxy = ProxyForwarder::new();
        if let Some(ttl) = config.proxy_cache_ttl() {
            proxy = proxy.with_cache(ttl);
        }
        let retry = (config.proxy_retry_attempts() > 1)
            .then(|| RetryPolicy::new(config.proxy_retry_attempts()));

        let public_base = config.public_base_url();
        let resources = config
            .resources()
            .iter()
            .map(|resource| {
                Ok(GatedResource {
                    route: resource.route.clone(),
                    upstream: resource.upstream.clone(),
                    requirements: resource.to_requirements(&public_base)?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            gate,
            proxy,
            planner: RoutePlanner::new(config.networks().iter().copied()),
            probe: EndpointProbe::new(),
            resources,
            retry,
        })
    }

    /// Direct constructor for tests and embedding.
    pub fn new(
        gate: ResourceGate<FacilitatorClient>,
        proxy: ProxyForwarder,
        planner: RoutePlanner,
        resources: Vec<GatedResource>,
        retry: Option<RetryPolicy>,
    ) -> Self {
        Self {
            gate,
            proxy,
            planner,
            probe: EndpointProbe::new(),
            resources,
            retry,
        }
    }

    /// Longest-prefix match of a request path against gated resources.
    fn match_resource(&self, path: &str) -> Option<&GatedResource> {
        self.resources
            .iter()
            .filter(|resource| {
                path == resource.route
                    || path.starts_with(&format!("{}/", resource.route.trim_end_matches('/')))
            })
            .max_by_key(|resource| resource.route.len())
    }
}

/// Builds the gateway router.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/healthz", get(get_health))
        .route("/supported", get(get_supported))
        .route("/route", get(get_route))
        .route("/probe", post(post_probe))
        .fallback(gate_and_forward)
        .with_state(state)
}

/// `GET /healthz`: liveness check.
async fn get_health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SupportedPaymentKind {
    scheme: Scheme,
    network: Network,
}

/// `GET /supported`: lists the networks in the registry and the payment
/// kinds the gateway accepts on them.
async fn get_supported(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let networks: Vec<Network> = Network::variants()
        .iter()
        .copied()
        .filter(|n| state.planner.is_supported(*n))
        .collect();
    let kinds: Vec<SupportedPaymentKind> = networks
        .iter()
        .map(|network| SupportedPaymentKind {
            scheme: Scheme::Exact,
            network: *network,
        })
        .collect();
    Json(serde_json::json!({ "networks": networks, "kinds": kinds }))
}

#[derive(Debug, Deserialize)]
struct RouteQuery {
    source: Network,
    destination: Network,
    /// Amount in quote-currency units for the cost estimate.
    amount: Option<Decimal>,
}

/// `GET /route`: plans a cross-chain route and estimates its cost.
///
/// Same-chain pairs answer with `route: null` and a zero bridge fee.
async fn get_route(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<RouteQuery>,
) -> Response {
    let amount = query.amount.unwrap_or(Decimal::ZERO);
    let planned = state
        .planner
        .plan_route(query.source, query.destination)
        .and_then(|route| {
            let cost = state
                .planner
                .estimate_cost(query.source, query.destination, amount)?;
            Ok((route, cost))
        });

    match planned {
        Ok((route, cost)) => {
            Json(serde_json::json!({ "route": route, "cost": cost })).into_response()
        }
        Err(err @ RouteError::UnsupportedNetwork(_)) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(err.to_string())),
        )
            .into_response(),
        Err(err @ RouteError::RouteNotFound { .. }) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(err.to_string())),
        )
            .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "route planning failed unexpectedly");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("internal error")),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProbeRequest {
    urls: Vec<Url>,
    #[serde(default)]
    min_data_size: Option<usize>,
    #[serde(default)]
    require_json: Option<bool>,
    #[serde(default)]
    require_fields: Option<Vec<String>>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

/// `POST /probe`: probes endpoints for data health with bounded fan-out.
///
/// Runs outside the payment hot path; a broken URL yields an invalid
/// result for that URL, never an aborted batch.
async fn post_probe(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<ProbeRequest>,
) -> Json<HashMap<Url, ValidationResult>> {
    let defaults = ProbeOptions::default();
    let options = ProbeOptions {
        min_data_size: request.min_data_size.unwrap_or(defaults.min_data_size),
        require_json: request.require_json.unwrap_or(defaults.require_json),
        require_fields: request.require_fields.unwrap_or_default(),
        timeout: request
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.timeout),
    };
    Json(state.probe.probe_many(&request.urls, &options).await)
}

/// Gated passthrough: the 402 state machine applied to configured
/// resources, forwarding verified requests upstream.
async fn gate_and_forward(
    State(state): State<Arc<GatewayState>>,
    request: Request<Body>,
) -> Response {
    let path = request.uri().path().to_string();
    let Some(resource) = state.match_resource(&path) else {
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("no such resource")),
        )
            .into_response();
    };

    let method = request.method().clone();
    let headers = request.headers().clone();
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or(path);

    let body = match axum::body::to_bytes(request.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::with_details(
                    "unreadable request body",
                    err.to_string(),
                )),
            )
                .into_response();
        }
    };

    match state.gate.handle(&headers, &resource.requirements).await {
        GateDecision::Challenge { header } => challenge_response(&header, &resource.requirements),
        GateDecision::Reject { error } => {
            (StatusCode::PAYMENT_REQUIRED, Json(error)).into_response()
        }
        GateDecision::Forward { response_header } => {
            let descriptor = match response_header.to_header_value() {
                Ok(descriptor) => descriptor,
                Err(err) => {
                    tracing::error!(error = %err, "failed to encode x-payment-response");
                    return (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(ErrorResponse::new("internal error")),
                    )
                        .into_response();
                }
            };
            forward_upstream(
                &state,
                resource,
                &path_and_query,
                method,
                &headers,
                body,
                &descriptor,
            )
            .await
        }
    }
}

/// 402 challenge: the encoded challenge rides the `x-payment` header, and
/// the body carries the machine-readable `accepts` array probes look for.
fn challenge_response(header: &str, requirements: &PaymentRequirements) -> Response {
    let body = serde_json::json!({
        "error": "Payment required",
        "accepts": [requirements],
    });
    (
        StatusCode::PAYMENT_REQUIRED,
        [(
            header::HeaderName::from_static(HEADER_PAYMENT),
            header.to_string(),
        )],
        Json(body),
    )
        .into_response()
}

async fn forward_upstream(
    state: &GatewayState,
    resource: &GatedResource,
    path_and_query: &str,
    method: Method,
    headers: &HeaderMap,
    body: Bytes,
    descriptor: &str,
) -> Response {
    let remaining = path_and_query
        .strip_prefix(resource.route.trim_end_matches('/'))
        .unwrap_or(path_and_query);

    let result = state
        .proxy
        .forward(
            &resource.upstream,
            remaining,
            method,
            headers,
            body,
            Some(descriptor),
            state.retry.as_ref(),
        )
        .await;

    match result {
        Ok(upstream) => {
            let mut response = Response::builder().status(upstream.status);
            if let Some(headers) = response.headers_mut() {
                headers.extend(upstream.headers.clone());
            }
            response
                .body(Body::from(upstream.data))
                .unwrap_or_else(|err| {
                    tracing::error!(error = %err, "failed to assemble relayed response");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(ErrorResponse::new("internal error")),
                    )
                        .into_response()
                })
        }
        Err(err @ ProxyError::InvalidUrl(_)) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(err.to_string())),
        )
            .into_response(),
        Err(err) => {
            tracing::warn!(error = %err, upstream = %resource.upstream, "upstream call failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse::with_details(
                    "upstream unavailable",
                    err.to_string(),
                )),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::HEADER_PAYMENT_RESPONSE;
    use crate::types::{MixedAddress, TokenAmount};
    use crate::util::Base64Bytes;
    use http::header::HeaderValue;
    use http_body_util::BodyExt;
    use std::str::FromStr;
    use tower::ServiceExt;
    use wiremock::matchers::{method as http_method, path as http_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn requirements(resource_url: &str) -> PaymentRequirements {
        PaymentRequirements {
            scheme: Scheme::Exact,
            network: Network::Base,
            max_amount_required: TokenAmount::from_u64(50000),
            resource: resource_url.parse().unwrap(),
            description: "".to_string(),
            mime_type: "application/json".to_string(),
            output_schema: None,
            pay_to: MixedAddress::from_str("0x036CbD53842c5426634e7929541eC2318f3dCF7e").unwrap(),
            max_timeout_seconds: 300,
            asset: MixedAddress::from_str("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913").unwrap(),
            extra: None,
        }
    }

    fn state_with(facilitator: &MockServer, upstream: &MockServer) -> Arc<GatewayState> {
        let client = FacilitatorClient::try_from(facilitator.uri().as_str()).unwrap();
        let gate = ResourceGate::new(PaymentVerifier::new(client));
        let resources = vec![GatedResource {
            route: "/api/data".to_string(),
            upstream: format!("{}/", upstream.uri()).parse().unwrap(),
            requirements: requirements("https://gateway.example/api/data"),
        }];
        Arc::new(GatewayState::new(
            gate,
            ProxyForwarder::new(),
            RoutePlanner::with_all_known(),
            resources,
            None,
        ))
    }

    fn proof_header() -> HeaderValue {
        let now = crate::timestamp::UnixMillis::now().as_millis();
        let json = serde_json::json!({
            "from": "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045",
            "to": "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
            "value": "50000",
            "asset": "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
            "network": "base",
            "validAfter": now.to_string(),
            "validBefore": (now + 300_000).to_string(),
            "nonce": now.to_string(),
            "signature": "0xdeadbeef"
        });
        let encoded = Base64Bytes::encode(serde_json::to_vec(&json).unwrap());
        HeaderValue::from_bytes(encoded.as_ref()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn unpaid_request_gets_402_with_challenge_and_accepts() {
        let facilitator = MockServer::start().await;
        let upstream = MockServer::start().await;
        let app = router(state_with(&facilitator, &upstream));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/data")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let challenge = response
            .headers()
            .get(HEADER_PAYMENT)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(challenge.contains("price=0.05"));
        assert!(challenge.contains("maxAmount=50000"));

        let body = body_json(response).await;
        assert_eq!(body["error"], "Payment required");
        assert!(body["accepts"].is_array());
        assert_eq!(body["accepts"][0]["network"], "base");
    }

    #[tokio::test]
    async fn paid_request_is_forwarded_with_descriptor() {
        let facilitator = MockServer::start().await;
        Mock::given(http_method("POST"))
            .and(http_path("/verify"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"reference": "fac_1"})),
            )
            .mount(&facilitator)
            .await;

        let upstream = MockServer::start().await;
        Mock::given(http_method("GET"))
            .and(http_path("/quotes"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"price": 1})),
            )
            .mount(&upstream)
            .await;

        let app = router(state_with(&facilitator, &upstream));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/data/quotes")
                    .header(HEADER_PAYMENT, proof_header())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let descriptor = response
            .headers()
            .get(HEADER_PAYMENT_RESPONSE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(descriptor.contains("\"status\":\"success\""));
        assert!(descriptor.contains("fac_1"));
    }

    #[tokio::test]
    async fn failed_verification_is_402_never_500() {
        let facilitator = MockServer::start().await;
        Mock::given(http_method("POST"))
            .and(http_path("/verify"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad proof"))
            .mount(&facilitator)
            .await;

        let upstream = MockServer::start().await;
        let app = router(state_with(&facilitator, &upstream));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/data")
                    .header(HEADER_PAYMENT, proof_header())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let body = body_json(response).await;
        assert_eq!(body["error"], "payment verification failed");
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let facilitator = MockServer::start().await;
        let upstream = MockServer::start().await;
        let app = router(state_with(&facilitator, &upstream));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn route_endpoint_plans_and_estimates() {
        let facilitator = MockServer::start().await;
        let upstream = MockServer::start().await;
        let app = router(state_with(&facilitator, &upstream));

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/route?source=base&destination=polygon&amount=10")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["route"]["bridgeProtocol"], "LayerZero");
        assert_eq!(body["cost"]["bridgeFee"], "0.5");

        let same_chain = app
            .oneshot(
                Request::builder()
                    .uri("/route?source=base&destination=base&amount=10")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(same_chain).await;
        assert!(body["route"].is_null());
        assert_eq!(body["cost"]["bridgeFee"], "0");
    }

    #[tokio::test]
    async fn supported_lists_registry_networks() {
        let facilitator = MockServer::start().await;
        let upstream = MockServer::start().await;
        let app = router(state_with(&facilitator, &upstream));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/supported")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body["networks"].as_array().unwrap().len() >= 2);
        assert_eq!(body["kinds"][0]["scheme"], "exact");
    }

    #[tokio::test]
    async fn probe_endpoint_returns_per_url_results() {
        let facilitator = MockServer::start().await;
        let upstream = MockServer::start().await;
        Mock::given(http_method("GET"))
            .and(http_path("/gated"))
            .respond_with(ResponseTemplate::new(402).set_body_json(serde_json::json!({
                "accepts": []
            })))
            .mount(&upstream)
            .await;

        let app = router(state_with(&facilitator, &upstream));
        let probe_body = serde_json::json!({
            "urls": [format!("{}/gated", upstream.uri())]
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/probe")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(probe_body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let (_, result) = body.as_object().unwrap().iter().next().unwrap();
        assert_eq!(result["isValid"], true);
        assert_eq!(result["hasData"], false);
    }

    #[tokio::test]
    async fn upstream_status_is_relayed_not_collapsed() {
        let facilitator = MockServer::start().await;
        Mock::given(http_method("POST"))
            .and(http_path("/verify"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"reference": "fac_2"})),
            )
            .mount(&facilitator)
            .await;

        let upstream = MockServer::start().await;
        Mock::given(http_method("GET"))
            .and(http_path("/"))
            .respond_with(ResponseTemplate::new(418).set_body_string("teapot"))
            .mount(&upstream)
            .await;

        let app = router(state_with(&facilitator, &upstream));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/data")
                    .header(HEADER_PAYMENT, proof_header())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    }
}
