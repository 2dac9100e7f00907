//! Endpoint health probing.
//!
//! A marketplace listing a gated resource needs to know the resource is
//! alive and answers with meaningful data before sending payers to it. The
//! probe runs out of the payment hot path: it requests the endpoint without
//! payment and classifies the response.
//!
//! The distinguishing domain rule: a `402 Payment Required` answer is the
//! healthy, expected state for a correctly configured x402 resource probed
//! without payment — it is a *valid* outcome, not a failure.

use futures_util::future::join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// Shape of a probed response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    Json,
    Text,
    Binary,
    Empty,
}

/// Outcome of probing one endpoint. Always a value; a probe never throws.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub has_data: bool,
    pub data_type: DataKind,
    /// Body size in bytes.
    pub data_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub warnings: Vec<String>,
}

impl ValidationResult {
    fn invalid(error: impl Into<String>) -> Self {
        ValidationResult {
            is_valid: false,
            has_data: false,
            data_type: DataKind::Empty,
            data_size: 0,
            error: Some(error.into()),
            warnings: Vec::new(),
        }
    }
}

/// Probe configuration.
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    /// A 200 body smaller than this is a "silently broken" resource.
    pub min_data_size: usize,
    /// Require the body to parse as JSON.
    pub require_json: bool,
    /// Top-level JSON fields that must all be present.
    pub require_fields: Vec<String>,
    pub timeout: Duration,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            min_data_size: 1,
            require_json: false,
            require_fields: Vec::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Number of endpoints probed simultaneously in a batch.
const PROBE_FANOUT: usize = 5;
/// Pause between batches, as politeness towards probed hosts.
const INTER_BATCH_DELAY: Duration = Duration::from_millis(200);

/// Probes gated endpoints for data health.
pub struct EndpointProbe {
    client: Client,
}

impl Default for EndpointProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointProbe {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Probes one endpoint without payment and classifies the response.
    pub async fn probe(&self, url: &Url, options: &ProbeOptions) -> ValidationResult {
        let response = match self
            .client
            .get(url.clone())
            .timeout(options.timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                return ValidationResult::invalid("Request timeout");
            }
            Err(err) => {
                return ValidationResult::invalid(format!("request failed: {err}"));
            }
        };

        let status = response.status();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(err) => {
                return ValidationResult::invalid(format!("failed to read body: {err}"));
            }
        };

        if status == reqwest::StatusCode::PAYMENT_REQUIRED {
            return classify_payment_required(&body);
        }
        if status != reqwest::StatusCode::OK {
            return ValidationResult::invalid(format!("unexpected status {}", status.as_u16()));
        }

        classify_ok_body(&body, options)
    }

    /// Probes many endpoints with bounded concurrency.
    ///
    /// Runs [`PROBE_FANOUT`] probes at a time with a short pause between
    /// batches. One broken URL never aborts the batch: every input URL maps
    /// to a [`ValidationResult`].
    pub async fn probe_many(
        &self,
        urls: &[Url],
        options: &ProbeOptions,
    ) -> HashMap<Url, ValidationResult> {
        let mut results = HashMap::with_capacity(urls.len());
        let mut batches = urls.chunks(PROBE_FANOUT).peekable();
        while let Some(batch) = batches.next() {
            let probes = batch.iter().map(|url| async {
                let result = self.probe(url, options).await;
                (url.clone(), result)
            });
            results.extend(join_all(probes).await);
            if batches.peek().is_some() {
                tokio::time::sleep(INTER_BATCH_DELAY).await;
            }
        }
        results
    }
}

/// 402 is the healthy-but-unpaid state. The body is still inspected: a
/// machine-readable challenge should carry an `accepts` array.
fn classify_payment_required(body: &[u8]) -> ValidationResult {
    let mut warnings = vec!["endpoint requires payment (HTTP 402)".to_string()];
    let has_accepts = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("accepts").cloned())
        .map(|accepts| accepts.is_array())
        .unwrap_or(false);
    if !has_accepts {
        warnings.push("402 body carries no accepts array".to_string());
    }
    ValidationResult {
        is_valid: true,
        has_data: false,
        data_type: classify_kind(body),
        data_size: body.len(),
        error: None,
        warnings,
    }
}

fn classify_ok_body(body: &[u8], options: &ProbeOptions) -> ValidationResult {
    let data_type = classify_kind(body);
    let data_size = body.len();
    let has_data = data_size > 0;

    let mut result = ValidationResult {
        is_valid: true,
        has_data,
        data_type,
        data_size,
        error: None,
        warnings: Vec::new(),
    };

    if data_size < options.min_data_size {
        result.is_valid = false;
        result.error = Some(format!(
            "response body of {data_size} bytes is below the {} byte minimum",
            options.min_data_size
        ));
        return result;
    }

    let parsed = serde_json::from_slice::<serde_json::Value>(body).ok();

    if options.require_json && parsed.is_none() {
        result.is_valid = false;
        result.error = Some("response is not valid JSON".to_string());
        return result;
    }

    if let Some(value) = &parsed {
        let empty = value.as_object().is_some_and(|o| o.is_empty())
            || value.as_array().is_some_and(|a| a.is_empty());
        if empty {
            result.is_valid = false;
            result.error = Some("response JSON is an empty object or array".to_string());
            return result;
        }

        if !options.require_fields.is_empty() {
            let missing: Vec<&str> = options
                .require_fields
                .iter()
                .filter(|field| value.get(field.as_str()).is_none())
                .map(|s| s.as_str())
                .collect();
            if !missing.is_empty() {
                result.is_valid = false;
                result.error = Some(format!("missing required fields: {}", missing.join(", ")));
                return result;
            }
        }
    } else if !options.require_fields.is_empty() {
        result.is_valid = false;
        result.error = Some("required fields specified but response is not JSON".to_string());
        return result;
    }

    result
}

fn classify_kind(body: &[u8]) -> DataKind {
    if body.is_empty() {
        return DataKind::Empty;
    }
    if serde_json::from_slice::<serde_json::Value>(body).is_ok() {
        return DataKind::Json;
    }
    if std::str::from_utf8(body).is_ok() {
        DataKind::Text
    } else {
        DataKind::Binary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mock(server: &MockServer, route: &str, template: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(template)
            .mount(server)
            .await;
    }

    fn url(server: &MockServer, route: &str) -> Url {
        format!("{}{route}", server.uri()).parse().unwrap()
    }

    #[tokio::test]
    async fn payment_required_with_accepts_is_healthy_but_unpaid() {
        let server = MockServer::start().await;
        mock(
            &server,
            "/gated",
            ResponseTemplate::new(402).set_body_json(serde_json::json!({
                "error": "Payment required",
                "accepts": [{"scheme": "exact", "network": "base"}]
            })),
        )
        .await;

        let probe = EndpointProbe::new();
        let result = probe
            .probe(&url(&server, "/gated"), &ProbeOptions::default())
            .await;
        assert!(result.is_valid);
        assert!(!result.has_data);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("requires payment"));
    }

    #[tokio::test]
    async fn payment_required_without_accepts_warns_but_stays_valid() {
        let server = MockServer::start().await;
        mock(&server, "/bare", ResponseTemplate::new(402)).await;

        let probe = EndpointProbe::new();
        let result = probe
            .probe(&url(&server, "/bare"), &ProbeOptions::default())
            .await;
        assert!(result.is_valid);
        assert!(result.warnings.iter().any(|w| w.contains("accepts")));
    }

    #[tokio::test]
    async fn empty_json_object_is_silently_broken() {
        let server = MockServer::start().await;
        mock(
            &server,
            "/empty",
            ResponseTemplate::new(200).set_body_json(serde_json::json!({})),
        )
        .await;

        let probe = EndpointProbe::new();
        let result = probe
            .probe(&url(&server, "/empty"), &ProbeOptions::default())
            .await;
        assert!(!result.is_valid);
        assert_eq!(result.data_type, DataKind::Json);
    }

    #[tokio::test]
    async fn body_below_minimum_size_is_invalid() {
        let server = MockServer::start().await;
        mock(&server, "/tiny", ResponseTemplate::new(200).set_body_string("ok")).await;

        let probe = EndpointProbe::new();
        let options = ProbeOptions {
            min_data_size: 100,
            ..ProbeOptions::default()
        };
        let result = probe.probe(&url(&server, "/tiny"), &options).await;
        assert!(!result.is_valid);
        assert!(result.error.unwrap().contains("below"));
    }

    #[tokio::test]
    async fn missing_required_fields_are_listed() {
        let server = MockServer::start().await;
        mock(
            &server,
            "/partial",
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"price": 1})),
        )
        .await;

        let probe = EndpointProbe::new();
        let options = ProbeOptions {
            require_fields: vec!["price".into(), "volume".into(), "symbol".into()],
            ..ProbeOptions::default()
        };
        let result = probe.probe(&url(&server, "/partial"), &options).await;
        assert!(!result.is_valid);
        let error = result.error.unwrap();
        assert!(error.contains("volume") && error.contains("symbol"));
        assert!(!error.contains("price,"));
    }

    #[tokio::test]
    async fn healthy_json_endpoint_validates() {
        let server = MockServer::start().await;
        mock(
            &server,
            "/ok",
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"price": "0.05", "symbol": "USDC"})),
        )
        .await;

        let probe = EndpointProbe::new();
        let options = ProbeOptions {
            require_json: true,
            require_fields: vec!["price".into()],
            ..ProbeOptions::default()
        };
        let result = probe.probe(&url(&server, "/ok"), &options).await;
        assert!(result.is_valid);
        assert!(result.has_data);
        assert_eq!(result.data_type, DataKind::Json);
    }

    #[tokio::test]
    async fn server_error_is_invalid() {
        let server = MockServer::start().await;
        mock(&server, "/down", ResponseTemplate::new(503)).await;

        let probe = EndpointProbe::new();
        let result = probe
            .probe(&url(&server, "/down"), &ProbeOptions::default())
            .await;
        assert!(!result.is_valid);
        assert!(result.error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn timeout_reports_request_timeout() {
        let server = MockServer::start().await;
        mock(
            &server,
            "/slow",
            ResponseTemplate::new(200)
                .set_body_string("late")
                .set_delay(Duration::from_millis(500)),
        )
        .await;

        let probe = EndpointProbe::new();
        let options = ProbeOptions {
            timeout: Duration::from_millis(50),
            ..ProbeOptions::default()
        };
        let result = probe.probe(&url(&server, "/slow"), &options).await;
        assert!(!result.is_valid);
        assert_eq!(result.error.as_deref(), Some("Request timeout"));
    }

    #[tokio::test]
    async fn batch_probe_survives_broken_members() {
        let server = MockServer::start().await;
        mock(
            &server,
            "/good",
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})),
        )
        .await;
        mock(&server, "/bad", ResponseTemplate::new(500)).await;
        mock(&server, "/gated", ResponseTemplate::new(402)).await;

        let urls = vec![
            url(&server, "/good"),
            url(&server, "/bad"),
            url(&server, "/gated"),
        ];
        let probe = EndpointProbe::new();
        let results = probe.probe_many(&urls, &ProbeOptions::default()).await;

        assert_eq!(results.len(), 3);
        assert!(results[&urls[0]].is_valid);
        assert!(!results[&urls[1]].is_valid);
        assert!(results[&urls[2]].is_valid);
    }
}
