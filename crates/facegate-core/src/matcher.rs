//! Embedding matcher — cosine similarity against a single reference.
//!
//! Both vectors are L2-normalized before the dot product, so the score is
//! independent of magnitude. A match requires the score to be strictly
//! greater than the threshold.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default acceptance threshold. Raising it trades false accepts for false rejects.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.75;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("invalid input: embedding lengths differ ({left} vs {right})")]
    InvalidInput { left: usize, right: usize },
    #[error("invalid threshold {0}: must be a finite value in [-1, 1]")]
    InvalidThreshold(f32),
}

/// Face embedding vector produced by an external recognition model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values, model_version: None }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Unit-length copy of this embedding. Zero vectors are returned unchanged.
    pub fn normalized(&self) -> Embedding {
        Embedding {
            values: normalize(&self.values),
            model_version: self.model_version.clone(),
        }
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> Result<f32, MatchError> {
        cosine_similarity(&self.values, &other.values)
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// Divide every element by the Euclidean norm.
///
/// A zero-norm vector has no direction and is returned as-is, which makes
/// it score 0.0 against anything.
pub fn normalize(vector: &[f32]) -> Vec<f32> {
    normalize_wide(vector).into_iter().map(|x| x as f32).collect()
}

/// Normalize in f64. Squares of finite f32 values neither overflow nor
/// underflow there, so any non-zero finite vector keeps its direction.
fn normalize_wide(vector: &[f32]) -> Vec<f64> {
    let norm = vector
        .iter()
        .map(|&x| f64::from(x).powi(2))
        .sum::<f64>()
        .sqrt();
    if norm != 0.0 {
        vector.iter().map(|&x| f64::from(x) / norm).collect()
    } else {
        vector.iter().map(|&x| f64::from(x)).collect()
    }
}

/// Cosine similarity of two equal-length vectors.
///
/// Computed in f64, clamped to [-1, 1] and narrowed to f32.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, MatchError> {
    if a.len() != b.len() {
        return Err(MatchError::InvalidInput {
            left: a.len(),
            right: b.len(),
        });
    }

    let norm_a = normalize_wide(a);
    let norm_b = normalize_wide(b);

    let dot: f64 = norm_a.iter().zip(norm_b.iter()).map(|(x, y)| x * y).sum();

    // Rounding can push a self-comparison just past 1.0.
    Ok(dot.clamp(-1.0, 1.0) as f32)
}

/// `cosine_similarity(a, b) > threshold`.
pub fn is_match(a: &[f32], b: &[f32], threshold: f32) -> Result<bool, MatchError> {
    Ok(cosine_similarity(a, b)? > threshold)
}

/// Reject non-finite thresholds and thresholds outside [-1, 1].
pub fn validate_threshold(threshold: f32) -> Result<f32, MatchError> {
    if threshold.is_finite() && (-1.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(MatchError::InvalidThreshold(threshold))
    }
}

/// Outcome of comparing a probe embedding against a reference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchDecision {
    pub matched: bool,
    /// Cosine similarity [-1, 1].
    pub similarity: f32,
}

impl MatchDecision {
    /// Apply the strict threshold rule to an already computed score.
    pub fn from_score(similarity: f32, threshold: f32) -> Self {
        Self {
            matched: similarity > threshold,
            similarity,
        }
    }
}

/// Strategy for comparing a probe embedding against a stored reference.
pub trait Matcher {
    fn compare(
        &self,
        probe: &Embedding,
        reference: &Embedding,
        threshold: f32,
    ) -> Result<MatchDecision, MatchError>;
}

/// Cosine similarity matcher.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        reference: &Embedding,
        threshold: f32,
    ) -> Result<MatchDecision, MatchError> {
        let similarity = probe.similarity(reference)?;
        Ok(MatchDecision::from_score(similarity, threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_unit_length() {
        let v = normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        let len: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((len - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector_unchanged() {
        assert_eq!(normalize(&[0.0, 0.0, 0.0]), vec![0.0, 0.0, 0.0]);
        assert!(normalize(&[]).is_empty());
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = [0.3, -1.2, 4.5, 0.01];
        let sim = cosine_similarity(&a, &a).unwrap();
        assert!((sim - 1.0).abs() < 1e-6, "got {sim}");
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let sim = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap();
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let sim = cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]).unwrap();
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let sim = cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).unwrap();
        assert_eq!(sim, 0.0);
    }

    #[test]
    fn test_cosine_similarity_scale_invariant() {
        let a = [0.2, 0.7, -0.4, 1.1];
        let b = [0.5, 0.1, -0.9, 0.3];
        let scaled: Vec<f32> = a.iter().map(|x| x * 3.5).collect();
        let base = cosine_similarity(&a, &b).unwrap();
        let after = cosine_similarity(&scaled, &b).unwrap();
        assert!((base - after).abs() < 1e-6, "{base} vs {after}");
    }

    #[test]
    fn test_cosine_similarity_large_magnitude_self() {
        let a = [1e20, 2e20, -3e20, 1e20];
        let sim = cosine_similarity(&a, &a).unwrap();
        assert!((sim - 1.0).abs() < 1e-6, "got {sim}");
    }

    #[test]
    fn test_cosine_similarity_tiny_magnitude_self() {
        let a = [1e-25, 2e-25, -3e-25, 1e-25];
        let sim = cosine_similarity(&a, &a).unwrap();
        assert!((sim - 1.0).abs() < 1e-6, "got {sim}");
        let n = normalize(&a);
        let len: f32 = n.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((len - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_scale_invariant_huge_factor() {
        let a = [0.2, 0.7, -0.4, 1.1];
        let b = [0.5, 0.1, -0.9, 0.3];
        let scaled: Vec<f32> = a.iter().map(|x| x * 1e20).collect();
        let base = cosine_similarity(&a, &b).unwrap();
        let after = cosine_similarity(&scaled, &b).unwrap();
        assert!((base - after).abs() < 1e-6, "{base} vs {after}");
    }

    #[test]
    fn test_self_similarity_never_exceeds_one() {
        let mut seed = 0x2545_f491_u32;
        for _ in 0..500 {
            let a: Vec<f32> = (0..128)
                .map(|_| {
                    seed ^= seed << 13;
                    seed ^= seed >> 17;
                    seed ^= seed << 5;
                    (seed % 2000) as f32 / 1000.0 - 1.0
                })
                .collect();
            let sim = cosine_similarity(&a, &a).unwrap();
            assert!((-1.0..=1.0).contains(&sim), "got {sim}");
            assert!(!is_match(&a, &a, 1.0).unwrap());
        }
    }

    #[test]
    fn test_cosine_similarity_length_mismatch() {
        let err = cosine_similarity(&[1.0, 0.0, 0.0, 0.0], &[1.0, 0.0, 0.0]).unwrap_err();
        assert_eq!(err, MatchError::InvalidInput { left: 4, right: 3 });
    }

    #[test]
    fn test_is_match_length_mismatch_produces_no_decision() {
        assert!(is_match(&[1.0, 1.0, 1.0, 1.0], &[1.0, 1.0, 1.0], 0.75).is_err());
    }

    #[test]
    fn test_is_match_symmetric() {
        let a = [0.9, 0.1, 0.3, -0.2];
        let b = [0.8, 0.2, 0.25, -0.1];
        for t in [-0.5, 0.0, 0.5, 0.75, 0.95, 0.999] {
            assert_eq!(is_match(&a, &b, t).unwrap(), is_match(&b, &a, t).unwrap());
        }
        assert_eq!(cosine_similarity(&a, &b).unwrap(), cosine_similarity(&b, &a).unwrap());
    }

    #[test]
    fn test_is_match_identical_ones() {
        let a = [1.0, 1.0, 1.0, 1.0];
        let sim = cosine_similarity(&a, &a).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
        assert!(is_match(&a, &a, DEFAULT_SIMILARITY_THRESHOLD).unwrap());
    }

    #[test]
    fn test_is_match_orthogonal_basis() {
        let a = [1.0, 0.0, 0.0, 0.0];
        let b = [0.0, 1.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b).unwrap(), 0.0);
        assert!(!is_match(&a, &b, DEFAULT_SIMILARITY_THRESHOLD).unwrap());
    }

    #[test]
    fn test_score_equal_to_threshold_is_not_a_match() {
        let decision = MatchDecision::from_score(0.75, 0.75);
        assert!(!decision.matched);

        // Same rule when the threshold is exactly the computed score.
        let a = [0.6, 0.8, 0.0];
        let b = [0.8, 0.6, 0.0];
        let sim = cosine_similarity(&a, &b).unwrap();
        assert!(!is_match(&a, &b, sim).unwrap());
        assert!(is_match(&a, &b, sim - 1e-4).unwrap());
    }

    #[test]
    fn test_validate_threshold() {
        assert_eq!(validate_threshold(0.75), Ok(0.75));
        assert_eq!(validate_threshold(-1.0), Ok(-1.0));
        assert!(validate_threshold(1.5).is_err());
        assert!(validate_threshold(f32::NAN).is_err());
    }

    #[test]
    fn test_cosine_matcher_decision() {
        let probe = Embedding::new(vec![1.0, 1.0, 1.0, 1.0]);
        let reference = Embedding::new(vec![2.0, 2.0, 2.0, 2.0]);
        let decision = CosineMatcher.compare(&probe, &reference, 0.75).unwrap();
        assert!(decision.matched);
        assert!((decision.similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_matcher_no_match() {
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let reference = Embedding::new(vec![0.0, 0.0, 1.0]);
        let decision = CosineMatcher.compare(&probe, &reference, 0.75).unwrap();
        assert!(!decision.matched);
        assert!(decision.similarity.abs() < 1e-6);
    }

    #[test]
    fn test_embedding_normalized_keeps_model_version() {
        let e = Embedding {
            values: vec![0.0, 2.0],
            model_version: Some("facenet".into()),
        };
        let n = e.normalized();
        assert_eq!(n.values, vec![0.0, 1.0]);
        assert_eq!(n.model_version.as_deref(), Some("facenet"));
    }
}
