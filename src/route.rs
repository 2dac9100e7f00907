//! Cross-chain route planning and execution.
//!
//! A payer holding an asset on one chain can still satisfy a requirement on
//! another: the planner decides whether a direct same-chain payment
//! suffices or a bridge route is needed, estimates its cost, and drives the
//! multi-step execution saga. On-chain work itself is delegated: quoting and
//! bridge submission go through the [`RoutingProvider`] collaborator,
//! approvals and transfers through the [`WalletClient`] collaborator.
//!
//! The nominal LayerZero/Wormhole time and fee figures are planning
//! placeholders, not live quotes. Execution therefore refuses to run from a
//! stale or absent quote: [`RouteExecutor::submit`] takes a [`Quote`] by
//! value (single use) and rejects one past its expiry.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::{Debug, Display};
use std::time::Duration;
use url::Url;

use crate::network::{ChainClass, Network};
use crate::timestamp::UnixMillis;
use crate::types::{MixedAddress, TokenAmount, TransactionHash};

/// Bridge protocol used for a cross-chain leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeProtocol {
    LayerZero,
    Wormhole,
}

impl Display for BridgeProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeProtocol::LayerZero => write!(f, "LayerZero"),
            BridgeProtocol::Wormhole => write!(f, "Wormhole"),
        }
    }
}

impl BridgeProtocol {
    /// Nominal transit time, pending a live quote.
    pub fn nominal_time_seconds(&self) -> u64 {
        match self {
            BridgeProtocol::LayerZero => 300,
            BridgeProtocol::Wormhole => 900,
        }
    }

    /// Nominal fee in quote-currency units, pending a live quote.
    pub fn nominal_fee(&self) -> Decimal {
        match self {
            BridgeProtocol::LayerZero => Decimal::new(5, 1),
            BridgeProtocol::Wormhole => Decimal::new(10, 1),
        }
    }
}

/// A planned path from a payer's chain to the resource's chain.
///
/// Only constructed between two registered networks; a same-chain pair
/// yields no route at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossChainRoute {
    pub source_chain: Network,
    pub destination_chain: Network,
    pub estimated_time_seconds: u64,
    /// Decimal string on the wire; never a float.
    pub estimated_fee: Decimal,
    pub bridge_protocol: BridgeProtocol,
}

/// Cost breakdown for moving `amount` from source to destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostEstimate {
    pub total_cost: Decimal,
    pub bridge_fee: Decimal,
    pub network_fee: Decimal,
}

/// Route-planning and execution failures.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("unsupported network: {0}")]
    UnsupportedNetwork(String),
    #[error("no bridge path from {from} to {destination}")]
    RouteNotFound {
        from: Network,
        destination: Network,
    },
    #[error("quote {0} has expired; fetch a fresh quote before executing")]
    QuoteExpired(String),
    #[error("token approval failed: {0}")]
    Approval(String),
    #[error("routing provider error: {0}")]
    Provider(String),
    #[error("route stuck in {phase}: {reason}")]
    PhaseFailed { phase: RoutePhase, reason: String },
}

/// Parameters for requesting a quote from the routing provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteParams {
    pub source_chain: Network,
    pub destination_chain: Network,
    pub source_token: MixedAddress,
    pub destination_token: MixedAddress,
    pub amount: TokenAmount,
    pub payer: MixedAddress,
}

/// A priced, time-bounded execution plan from the routing provider.
///
/// Consumed at most once: [`RouteExecutor::submit`] takes it by value, and a
/// new execution must re-fetch, since on-chain prices move.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub id: String,
    pub route: CrossChainRoute,
    pub amount_in: TokenAmount,
    pub amount_out: TokenAmount,
    pub fee: Decimal,
    pub expires_at: UnixMillis,
}

impl Quote {
    pub fn is_expired(&self, now: UnixMillis) -> bool {
        now >= self.expires_at
    }
}

/// Token metadata returned by the routing provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    pub address: MixedAddress,
    pub symbol: String,
    pub decimals: u32,
}

/// The four ordered phases of a cross-chain payment.
///
/// A phase only starts once its predecessor is confirmed; any phase failing
/// halts progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoutePhase {
    SourcePayment,
    Verify,
    Relay,
    Execution,
}

impl RoutePhase {
    pub const ORDERED: [RoutePhase; 4] = [
        RoutePhase::SourcePayment,
        RoutePhase::Verify,
        RoutePhase::Relay,
        RoutePhase::Execution,
    ];
}

impl Display for RoutePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutePhase::SourcePayment => write!(f, "sourcePayment"),
            RoutePhase::Verify => write!(f, "verify"),
            RoutePhase::Relay => write!(f, "relay"),
            RoutePhase::Execution => write!(f, "execution"),
        }
    }
}

/// Confirmation state of a single phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseState {
    Pending,
    Confirmed,
    Failed(String),
}

/// Per-phase status snapshot from the routing provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStatusUpdate {
    pub source_payment: PhaseState,
    pub verify: PhaseState,
    pub relay: PhaseState,
    pub execution: PhaseState,
}

impl RouteStatusUpdate {
    fn phase(&self, phase: RoutePhase) -> &PhaseState {
        match phase {
            RoutePhase::SourcePayment => &self.source_payment,
            RoutePhase::Verify => &self.verify,
            RoutePhase::Relay => &self.relay,
            RoutePhase::Execution => &self.execution,
        }
    }
}

/// The routing provider collaborator (a DEX/bridge aggregator).
pub trait RoutingProvider {
    type Error: Debug + Display;

    fn get_chains(&self) -> impl Future<Output = Result<Vec<Network>, Self::Error>> + Send;

    fn get_tokens(
        &self,
        chain: Network,
    ) -> impl Future<Output = Result<Vec<TokenInfo>, Self::Error>> + Send;

    fn get_quote(
        &self,
        params: &QuoteParams,
    ) -> impl Future<Output = Result<Quote, Self::Error>> + Send;

    fn get_token_balance(
        &self,
        chain: Network,
        token: &MixedAddress,
        address: &MixedAddress,
    ) -> impl Future<Output = Result<TokenAmount, Self::Error>> + Send;

    /// Submits the bridge transaction for a quote, returning a transfer id
    /// used for status polling.
    fn submit_transaction(
        &self,
        quote_id: &str,
    ) -> impl Future<Output = Result<String, Self::Error>> + Send;

    /// Polls the per-phase status of an in-flight transfer.
    fn status(
        &self,
        transfer_id: &str,
    ) -> impl Future<Output = Result<RouteStatusUpdate, Self::Error>> + Send;
}

/// Errors from a remote routing provider interaction.
#[derive(Debug, thiserror::Error)]
pub enum RoutingProviderError {
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
    #[error("Provider returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// HTTP client for a remote routing provider (a DEX/bridge aggregator).
///
/// Endpoints relative to the base URL: `GET chains`, `GET tokens`,
/// `POST quote`, `GET balance`, `POST transactions`, `GET status/{id}`.
#[derive(Clone, Debug)]
pub struct HttpRoutingProvider {
    base_url: Url,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpRoutingProvider {
    /// Default timeout for provider calls.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, relative: &str, context: &'static str) -> Result<Url, RoutingProviderError> {
        self.base_url
            .join(relative)
            .map_err(|e| RoutingProviderError::UrlParse { context, source: e })
    }

    async fn get_json<R: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        context: &'static str,
    ) -> Result<R, RoutingProviderError> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| RoutingProviderError::Http { context, source: e })?;
        Self::read_json(response, context).await
    }

    async fn post_json<T: serde::Serialize + ?Sized, R: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        context: &'static str,
        payload: &T,
    ) -> Result<R, RoutingProviderError> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| RoutingProviderError::Http { context, source: e })?;
        Self::read_json(response, context).await
    }

    async fn read_json<R: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        context: &'static str,
    ) -> Result<R, RoutingProviderError> {
        let status = response.status();
        if status.is_success() {
            response
                .json::<R>()
                .await
                .map_err(|e| RoutingProviderError::JsonDeserialization { context, source: e })
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(RoutingProviderError::Status { status, body })
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BalanceQuery<'a> {
    chain: Network,
    token: &'a MixedAddress,
    address: &'a MixedAddress,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceResponse {
    balance: TokenAmount,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    transfer_id: String,
}

impl RoutingProvider for HttpRoutingProvider {
    type Error = RoutingProviderError;

    async fn get_chains(&self) -> Result<Vec<Network>, RoutingProviderError> {
        let context = "GET /chains";
        let url = self.endpoint("./chains", context)?;
        self.get_json(url, context).await
    }

    async fn get_tokens(&self, chain: Network) -> Result<Vec<TokenInfo>, RoutingProviderError> {
        let context = "GET /tokens";
        let mut url = self.endpoint("./tokens", context)?;
        url.query_pairs_mut().append_pair("chain", &chain.to_string());
        self.get_json(url, context).await
    }

    async fn get_quote(&self, params: &QuoteParams) -> Result<Quote, RoutingProviderError> {
        let context = "POST /quote";
        let url = self.endpoint("./quote", context)?;
        self.post_json(url, context, params).await
    }

    async fn get_token_balance(
        &self,
        chain: Network,
        token: &MixedAddress,
        address: &MixedAddress,
    ) -> Result<TokenAmount, RoutingProviderError> {
        let context = "POST /balance";
        let url = self.endpoint("./balance", context)?;
        let query = BalanceQuery {
            chain,
            token,
            address,
        };
        let response: BalanceResponse = self.post_json(url, context, &query).await?;
        Ok(response.balance)
    }

    async fn submit_transaction(&self, quote_id: &str) -> Result<String, RoutingProviderError> {
        let context = "POST /transactions";
        let url = self.endpoint("./transactions", context)?;
        let response: SubmitResponse = self
            .post_json(url, context, &serde_json::json!({ "quoteId": quote_id }))
            .await?;
        Ok(response.transfer_id)
    }

    async fn status(&self, transfer_id: &str) -> Result<RouteStatusUpdate, RoutingProviderError> {
        let context = "GET /status";
        let url = self.endpoint(&format!("./status/{transfer_id}"), context)?;
        self.get_json(url, context).await
    }
}

/// The wallet/chain-client collaborator: signs and sends on-chain
/// transactions on the payer's behalf. Out of scope for this crate beyond
/// the interface.
pub trait WalletClient {
    type Error: Debug + Display;

    fn allowance(
        &self,
        network: Network,
        token: &MixedAddress,
        spender: &MixedAddress,
    ) -> impl Future<Output = Result<TokenAmount, Self::Error>> + Send;

    fn approve(
        &self,
        network: Network,
        token: &MixedAddress,
        spender: &MixedAddress,
        amount: TokenAmount,
    ) -> impl Future<Output = Result<TransactionHash, Self::Error>> + Send;

    fn transfer(
        &self,
        network: Network,
        token: &MixedAddress,
        to: &MixedAddress,
        amount: TokenAmount,
    ) -> impl Future<Output = Result<TransactionHash, Self::Error>> + Send;
}

/// Plans cross-chain routes against a supported-network registry.
///
/// A constructible service object holding its own registry and flat-fee
/// configuration; no ambient globals.
#[derive(Debug, Clone)]
pub struct RoutePlanner {
    registry: HashSet<Network>,
    network_fee: Decimal,
}

impl RoutePlanner {
    /// Flat per-payment network fee used in estimates.
    pub const DEFAULT_NETWORK_FEE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

    pub fn new(registry: impl IntoIterator<Item = Network>) -> Self {
        Self {
            registry: registry.into_iter().collect(),
            network_fee: Self::DEFAULT_NETWORK_FEE,
        }
    }

    /// Registry with every known network enabled.
    pub fn with_all_known() -> Self {
        Self::new(Network::variants().iter().copied())
    }

    pub fn is_supported(&self, network: Network) -> bool {
        self.registry.contains(&network)
    }

    fn require_supported(&self, network: Network) -> Result<(), RouteError> {
        if self.is_supported(network) {
            Ok(())
        } else {
            Err(RouteError::UnsupportedNetwork(network.to_string()))
        }
    }

    /// Plans a route between two chains.
    ///
    /// `Ok(None)` means the chains are the same and a direct payment
    /// applies. Both chains must be in the registry.
    pub fn plan_route(
        &self,
        source: Network,
        destination: Network,
    ) -> Result<Option<CrossChainRoute>, RouteError> {
        self.require_supported(source)?;
        self.require_supported(destination)?;

        if source == destination {
            return Ok(None);
        }

        let protocol = bridge_protocol_for(source, destination)
            .ok_or(RouteError::RouteNotFound {
                from: source,
                destination,
            })?;

        Ok(Some(CrossChainRoute {
            source_chain: source,
            destination_chain: destination,
            estimated_time_seconds: protocol.nominal_time_seconds(),
            estimated_fee: protocol.nominal_fee(),
            bridge_protocol: protocol,
        }))
    }

    /// Estimates the cost of paying `amount` from `source` to
    /// `destination`. Same-chain payments carry no bridge fee, only the flat
    /// network fee.
    pub fn estimate_cost(
        &self,
        source: Network,
        destination: Network,
        amount: Decimal,
    ) -> Result<CostEstimate, RouteError> {
        let bridge_fee = match self.plan_route(source, destination)? {
            Some(route) => route.estimated_fee,
            None => Decimal::ZERO,
        };
        Ok(CostEstimate {
            total_cost: amount + bridge_fee + self.network_fee,
            bridge_fee,
            network_fee: self.network_fee,
        })
    }

    /// Fetches a live quote through the routing provider.
    ///
    /// The route itself must be plannable first; the provider prices it.
    pub async fn get_quote<P>(&self, provider: &P, params: &QuoteParams) -> Result<Quote, RouteError>
    where
        P: RoutingProvider,
    {
        if self.plan_route(params.source_chain, params.destination_chain)?.is_none() {
            return Err(RouteError::Provider(
                "same-chain payment needs no quote; pay directly".to_string(),
            ));
        }
        provider
            .get_quote(params)
            .await
            .map_err(|e| RouteError::Provider(e.to_string()))
    }
}

/// Picks the bridge protocol for a chain pair, or `None` when no path
/// exists. Bridges do not span environments: a testnet never routes to a
/// chain outside its own network.
fn bridge_protocol_for(source: Network, destination: Network) -> Option<BridgeProtocol> {
    if is_testnet(source) || is_testnet(destination) {
        return None;
    }
    match (source.chain_class(), destination.chain_class()) {
        (ChainClass::Evm, ChainClass::Evm) => Some(BridgeProtocol::LayerZero),
        _ => Some(BridgeProtocol::Wormhole),
    }
}

fn is_testnet(network: Network) -> bool {
    matches!(
        network,
        Network::BaseSepolia | Network::PolygonAmoy | Network::SolanaDevnet
    )
}

/// An in-flight cross-chain payment: transfer id plus the confirmation state
/// of each ordered phase.
#[derive(Debug, Clone)]
pub struct RouteExecution {
    pub transfer_id: String,
    pub route: CrossChainRoute,
    phases: [PhaseState; 4],
}

impl RouteExecution {
    fn new(transfer_id: String, route: CrossChainRoute) -> Self {
        Self {
            transfer_id,
            route,
            phases: [
                PhaseState::Pending,
                PhaseState::Pending,
                PhaseState::Pending,
                PhaseState::Pending,
            ],
        }
    }

    pub fn phase_state(&self, phase: RoutePhase) -> &PhaseState {
        let idx = RoutePhase::ORDERED
            .iter()
            .position(|p| *p == phase)
            .expect("phase is one of the four ordered variants");
        &self.phases[idx]
    }

    /// All four phases confirmed.
    pub fn is_settled(&self) -> bool {
        self.phases.iter().all(|p| *p == PhaseState::Confirmed)
    }

    /// The first failed phase, if any: names the leg where funds may be
    /// stuck so the caller can retry that phase alone or intervene.
    pub fn failed_phase(&self) -> Option<(RoutePhase, &str)> {
        RoutePhase::ORDERED.iter().find_map(|phase| {
            match self.phase_state(*phase) {
                PhaseState::Failed(reason) => Some((*phase, reason.as_str())),
                _ => None,
            }
        })
    }

    /// Folds a provider status snapshot into the execution, enforcing phase
    /// ordering: states are applied front to back, and once a phase is not
    /// confirmed every later phase stays pending regardless of what the
    /// provider claims.
    pub fn apply_update(&mut self, update: &RouteStatusUpdate) {
        let mut predecessor_confirmed = true;
        for (idx, phase) in RoutePhase::ORDERED.iter().enumerate() {
            if predecessor_confirmed {
                self.phases[idx] = update.phase(*phase).clone();
            } else {
                self.phases[idx] = PhaseState::Pending;
            }
            predecessor_confirmed = self.phases[idx] == PhaseState::Confirmed;
        }
    }
}

/// Drives a cross-chain payment from quote to settlement.
pub struct RouteExecutor<P, W> {
    provider: P,
    wallet: W,
}

impl<P, W> RouteExecutor<P, W>
where
    P: RoutingProvider,
    W: WalletClient,
{
    pub fn new(provider: P, wallet: W) -> Self {
        Self { provider, wallet }
    }

    /// Direct same-chain payment: a plain token transfer via the wallet
    /// client. No saga involved.
    pub async fn direct_transfer(
        &self,
        network: Network,
        token: &MixedAddress,
        to: &MixedAddress,
        amount: TokenAmount,
    ) -> Result<TransactionHash, RouteError> {
        self.wallet
            .transfer(network, token, to, amount)
            .await
            .map_err(|e| RouteError::Provider(e.to_string()))
    }

    /// Submits a bridge payment for a quoted route.
    ///
    /// Consumes the quote (single use). Steps, each attributable on
    /// failure: ERC-20 approval (skipped for the native-asset sentinel),
    /// then bridge submission. Phase progression is observed afterwards via
    /// [`RouteExecutor::poll`].
    pub async fn submit(
        &self,
        quote: Quote,
        params: &QuoteParams,
        bridge_spender: &MixedAddress,
    ) -> Result<RouteExecution, RouteError> {
        self.submit_at(quote, params, bridge_spender, UnixMillis::now())
            .await
    }

    /// [`RouteExecutor::submit`] with a pinned clock, for tests.
    pub async fn submit_at(
        &self,
        quote: Quote,
        params: &QuoteParams,
        bridge_spender: &MixedAddress,
        now: UnixMillis,
    ) -> Result<RouteExecution, RouteError> {
        if quote.is_expired(now) {
            return Err(RouteError::QuoteExpired(quote.id));
        }

        if !params.source_token.is_native_sentinel() {
            self.ensure_approval(params, bridge_spender).await?;
        }

        let transfer_id = self
            .provider
            .submit_transaction(&quote.id)
            .await
            .map_err(|e| RouteError::Provider(e.to_string()))?;

        tracing::info!(
            transfer_id = %transfer_id,
            bridge = %quote.route.bridge_protocol,
            "bridge payment submitted"
        );
        Ok(RouteExecution::new(transfer_id, quote.route))
    }

    async fn ensure_approval(
        &self,
        params: &QuoteParams,
        bridge_spender: &MixedAddress,
    ) -> Result<(), RouteError> {
        let allowance = self
            .wallet
            .allowance(params.source_chain, &params.source_token, bridge_spender)
            .await
            .map_err(|e| RouteError::Approval(e.to_string()))?;
        if allowance >= params.amount {
            return Ok(());
        }
        self.wallet
            .approve(
                params.source_chain,
                &params.source_token,
                bridge_spender,
                params.amount,
            )
            .await
            .map_err(|e| RouteError::Approval(e.to_string()))?;
        Ok(())
    }

    /// Fetches the latest status and folds it into the execution.
    ///
    /// Returns an error naming the failed phase when the route is stuck.
    pub async fn poll(&self, execution: &mut RouteExecution) -> Result<(), RouteError> {
        let update = self
            .provider
            .status(&execution.transfer_id)
            .await
            .map_err(|e| RouteError::Provider(e.to_string()))?;
        execution.apply_update(&update);

        if let Some((phase, reason)) = execution.failed_phase() {
            return Err(RouteError::PhaseFailed {
                phase,
                reason: reason.to_string(),
            });
        }
        Ok(())
    }

    /// Polls until the destination leg confirms, a phase fails, or the
    /// deadline passes. Phases advance only on provider signals, never on
    /// local timers.
    pub async fn poll_until_settled(
        &self,
        execution: &mut RouteExecution,
        interval: Duration,
        deadline: Duration,
    ) -> Result<(), RouteError> {
        let started = std::time::Instant::now();
        loop {
            self.poll(execution).await?;
            if execution.is_settled() {
                return Ok(());
            }
            if started.elapsed() >= deadline {
                return Err(RouteError::Provider(format!(
                    "transfer {} not settled within {:?}",
                    execution.transfer_id, deadline
                )));
            }
            tokio::time::sleep(interval).await;
        }
    }
}
