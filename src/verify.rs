//! The payment verifier: decides whether a submitted proof satisfies a
//! requirement.
//!
//! The verifier owns structural checks (decode, freshness, requirement
//! matching) and delegates everything cryptographic to the
//! [`Facilitator`] collaborator. Failures are always reported to the
//! caller; the verifier never retries a proof on its own — resubmission is a
//! client decision.

use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::cache::TtlCache;
use crate::facilitator::{Facilitator, FacilitatorError, FacilitatorVerifyRequest};
use crate::timestamp::UnixMillis;
use crate::types::{PaymentProof, PaymentRequirements, ProofDecodingError, VerificationResult};
use crate::util::Base64Bytes;

/// Why a proof failed before or during facilitator delegation.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("malformed payment proof: {0}")]
    InvalidProof(#[from] ProofDecodingError),
    #[error("payment proof expired")]
    Expired,
    #[error("payment proof does not match requirements: {0}")]
    RequirementMismatch(&'static str),
    #[error("facilitator verification failed: {0}")]
    Facilitator(String),
}

#[derive(Clone)]
struct CachedVerification {
    result: VerificationResult,
    nonce: UnixMillis,
    window_seconds: u64,
}

/// Verifies payment proofs against payment requirements.
///
/// Holds its own facilitator handle and an advisory verification cache
/// (proof-bytes hash → successful result) that exists purely to reduce
/// facilitator load. Cache hits re-check freshness before being honored, so
/// an expired proof is rejected even when previously verified.
pub struct PaymentVerifier<F> {
    facilitator: F,
    cache: TtlCache<[u8; 32], CachedVerification>,
}

impl<F> PaymentVerifier<F>
where
    F: Facilitator<Error = FacilitatorError>,
{
    /// Default lifetime of cached verification results.
    pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

    pub fn new(facilitator: F) -> Self {
        Self::with_cache_ttl(facilitator, Self::DEFAULT_CACHE_TTL)
    }

    pub fn with_cache_ttl(facilitator: F, cache_ttl: Duration) -> Self {
        Self {
            facilitator,
            cache: TtlCache::new(cache_ttl),
        }
    }

    /// Verifies the raw `x-payment` request header against `requirements`.
    ///
    /// Always resolves to a [`VerificationResult`]; errors become `Failed`
    /// values carrying the reason, never panics or hangs — the facilitator
    /// call is bounded by the client's timeout.
    pub async fn verify(
        &self,
        proof_header: &[u8],
        requirements: &PaymentRequirements,
    ) -> VerificationResult {
        self.verify_at(proof_header, requirements, UnixMillis::now())
            .await
    }

    /// [`PaymentVerifier::verify`] with a pinned clock, for tests.
    pub async fn verify_at(
        &self,
        proof_header: &[u8],
        requirements: &PaymentRequirements,
        now: UnixMillis,
    ) -> VerificationResult {
        match self.verify_inner(proof_header, requirements, now).await {
            Ok(result) => result,
            Err(err) => {
                tracing::debug!(error = %err, "payment verification failed");
                VerificationResult::failed(err.to_string())
            }
        }
    }

    async fn verify_inner(
        &self,
        proof_header: &[u8],
        requirements: &PaymentRequirements,
        now: UnixMillis,
    ) -> Result<VerificationResult, VerifyError> {
        let proof = PaymentProof::try_from(Base64Bytes::from(proof_header))?;

        let window_seconds = requirements.max_timeout_seconds;
        check_freshness(proof.nonce, window_seconds, now)?;
        check_requirements(&proof, requirements)?;

        let cache_key = proof_digest(proof_header);
        if let Some(cached) = self.cache.get(&cache_key) {
            // The cached signature check still stands, but freshness is
            // re-evaluated against the current clock.
            check_freshness(cached.nonce, cached.window_seconds, now)?;
            return Ok(cached.result);
        }

        let request = FacilitatorVerifyRequest {
            payment_header: String::from_utf8_lossy(proof_header).into_owned(),
            client_proof: None,
            nonce: proof.nonce,
            amount: proof.value,
        };

        let result = match self.facilitator.verify(&request).await {
            Ok(receipt) => {
                let reference = receipt
                    .reference
                    .unwrap_or_else(|| fallback_reference(now));
                VerificationResult::success(proof.value, reference, receipt.transaction_hash)
            }
            Err(FacilitatorError::Pending) => VerificationResult::Pending,
            Err(err) => return Err(VerifyError::Facilitator(err.to_string())),
        };

        if result.is_success() {
            self.cache.insert(
                cache_key,
                CachedVerification {
                    result: result.clone(),
                    nonce: proof.nonce,
                    window_seconds,
                },
            );
        }

        Ok(result)
    }
}

fn check_freshness(
    nonce: UnixMillis,
    window_seconds: u64,
    now: UnixMillis,
) -> Result<(), VerifyError> {
    if now >= nonce.expiry(window_seconds) {
        return Err(VerifyError::Expired);
    }
    Ok(())
}

/// Structural proof-vs-requirement matching. Not a cryptographic check:
/// signature binding stays with the facilitator.
fn check_requirements(
    proof: &PaymentProof,
    requirements: &PaymentRequirements,
) -> Result<(), VerifyError> {
    if proof.network != requirements.network {
        return Err(VerifyError::RequirementMismatch("network"));
    }
    if proof.to != requirements.pay_to {
        return Err(VerifyError::RequirementMismatch("recipient"));
    }
    if proof.value > requirements.max_amount_required {
        return Err(VerifyError::RequirementMismatch("amount above maximum"));
    }
    Ok(())
}

fn proof_digest(proof_header: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(proof_header);
    digest.into()
}

/// Locally generated settlement reference, used when the facilitator's
/// receipt omits one: `x402_<ms>_<rand>`.
fn fallback_reference(now: UnixMillis) -> String {
    format!("x402_{}_{:08x}", now.as_millis(), rand::random::<u32>())
}
