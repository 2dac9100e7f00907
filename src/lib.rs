//! x402 micropayment gateway protocol engine.
//!
//! This crate turns an ordinary HTTP API into a pay-per-call resource using
//! the `402 Payment Required` status code: it issues machine-readable
//! payment challenges, verifies client payment proofs against a remote
//! facilitator, plans cross-chain routes for payers holding assets on
//! another chain, audits gated endpoints for data health, and proxies paid
//! requests to the upstream resource.
//!
//! # Overview
//!
//! An unpaid request to a gated resource answers `402` with an `x-payment`
//! challenge header. The client pays, obtains a signed proof from its
//! wallet, and resubmits with the proof in the `x-payment` request header.
//! The gate verifies the proof through the facilitator and, on success,
//! forwards the request upstream with an `x-payment-response` settlement
//! descriptor attached to the relayed response.
//!
//! Everything cryptographic or on-chain is delegated to collaborators: the
//! facilitator (signature binding, settlement, replay protection), the
//! routing provider (quotes, bridge submission, transfer status), and the
//! wallet client (approvals and transfers).
//!
//! # Modules
//!
//! - [`challenge`] — the `x-payment` challenge header codec and atomic-unit
//!   money conversions.
//! - [`verify`] — payment proof verification against requirements.
//! - [`gate`] — the per-request 402 decision: challenge, forward, or reject.
//! - [`route`] — cross-chain route planning, quoting, and the four-phase
//!   execution saga.
//! - [`probe`] — endpoint health probing with bounded-concurrency batches.
//! - [`proxy`] — forwarding verified requests to upstream resources.
//! - [`facilitator`] — the facilitator collaborator trait and HTTP client.
//! - [`types`] — protocol data model: requirements, proofs, results.
//! - [`network`] — the supported-chain registry.
//! - [`handlers`] — axum endpoints assembling the above into a server.
//! - [`config`] — file/env configuration.
//! - [`cache`], [`timestamp`], [`util`] — shared plumbing.

pub mod cache;
pub mod challenge;
pub mod config;
pub mod facilitator;
pub mod gate;
pub mod handlers;
pub mod network;
pub mod probe;
pub mod proxy;
pub mod route;
pub mod sig_down;
pub mod telemetry;
pub mod timestamp;
pub mod types;
pub mod util;
pub mod verify;
