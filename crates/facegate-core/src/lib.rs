//! facegate-core — Face embedding verification.
//!
//! Cosine-similarity matching of a captured embedding against an enrolled
//! reference, the crop/orientation policy applied before embedding
//! extraction, and the codec for stored references.

pub mod matcher;
pub mod preprocess;
pub mod reference;
pub mod verify;

pub use matcher::{
    cosine_similarity, is_match, normalize, CosineMatcher, Embedding, MatchDecision, MatchError,
    Matcher, DEFAULT_SIMILARITY_THRESHOLD,
};
pub use preprocess::{BoundingBox, CaptureFacing, FACE_INPUT_SIZE};
pub use reference::{encode_reference, parse_reference, ReferenceError};
pub use verify::{verify, Outcome, ReferenceSource, ReferenceUnavailable, Verification, VerifyError};
