//! Fetch-then-match verification pipeline.
//!
//! Step one asks a [`ReferenceSource`] for the subject's stored reference
//! (this may suspend or fail). Step two parses it and runs the pure matcher.
//! Upstream failures surface as [`VerifyError::Unavailable`], never as a
//! match or non-match.

use crate::matcher::{
    validate_threshold, CosineMatcher, Embedding, MatchDecision, MatchError, Matcher,
};
use crate::reference::{parse_reference, ReferenceError};
use serde::Serialize;
use thiserror::Error;

/// Why a verification could not be attempted.
#[derive(Error, Debug)]
pub enum ReferenceUnavailable {
    #[error("no reference enrolled for subject {0:?}")]
    Missing(String),
    #[error("stored reference is malformed: {0}")]
    Malformed(#[from] ReferenceError),
    #[error("reference source failed: {0}")]
    Source(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("captured embedding is empty")]
    EmptyProbe,
    #[error("verification unavailable: {0}")]
    Unavailable(#[from] ReferenceUnavailable),
    #[error(transparent)]
    InvalidInput(#[from] MatchError),
}

impl VerifyError {
    /// Whether the caller should prompt for a new capture.
    ///
    /// Unavailable references and a bad threshold will not fix themselves on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VerifyError::EmptyProbe | VerifyError::InvalidInput(MatchError::InvalidInput { .. })
        )
    }
}

/// Source of stored reference embeddings, keyed by subject.
#[allow(async_fn_in_trait)]
pub trait ReferenceSource {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Raw stored elements for `subject`, or `None` if nothing is enrolled.
    async fn fetch_reference(&self, subject: &str) -> Result<Option<Vec<String>>, Self::Error>;
}

/// What the calling workflow should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Identity confirmed; proceed to record attendance.
    Accepted,
    /// Face did not match; prompt for another capture.
    Retry,
}

/// Result of a completed verification.
#[derive(Debug, Clone, Serialize)]
pub struct Verification {
    pub subject: String,
    #[serde(flatten)]
    pub decision: MatchDecision,
}

impl Verification {
    pub fn outcome(&self) -> Outcome {
        if self.decision.matched {
            Outcome::Accepted
        } else {
            Outcome::Retry
        }
    }
}

/// Verify `probe` against the reference stored for `subject`.
pub async fn verify<S: ReferenceSource>(
    source: &S,
    subject: &str,
    probe: &Embedding,
    threshold: f32,
) -> Result<Verification, VerifyError> {
    verify_with(source, &CosineMatcher, subject, probe, threshold).await
}

/// [`verify`] with an explicit matching strategy.
pub async fn verify_with<S: ReferenceSource, M: Matcher>(
    source: &S,
    matcher: &M,
    subject: &str,
    probe: &Embedding,
    threshold: f32,
) -> Result<Verification, VerifyError> {
    validate_threshold(threshold)?;
    if probe.is_empty() {
        return Err(VerifyError::EmptyProbe);
    }

    let raw = source
        .fetch_reference(subject)
        .await
        .map_err(|e| ReferenceUnavailable::Source(Box::new(e)))?
        .ok_or_else(|| ReferenceUnavailable::Missing(subject.to_string()))?;

    let reference = match parse_reference(&raw) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(subject, error = %e, "rejecting stored reference");
            return Err(ReferenceUnavailable::Malformed(e).into());
        }
    };

    tracing::debug!(
        subject,
        probe_dim = probe.len(),
        reference_dim = reference.len(),
        "comparing embeddings"
    );

    let decision = matcher.compare(probe, &reference, threshold)?;

    tracing::info!(
        subject,
        similarity = decision.similarity,
        threshold,
        matched = decision.matched,
        "verification complete"
    );

    Ok(Verification {
        subject: subject.to_string(),
        decision,
    })
}
