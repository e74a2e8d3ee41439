//! Stored reference embeddings — a list of numeric strings.
//!
//! Parsing is all-or-nothing: one bad element rejects the whole vector.

use crate::matcher::Embedding;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReferenceError {
    #[error("reference embedding is empty")]
    Empty,
    #[error("reference element {index} is not a finite number: {value:?}")]
    Malformed { index: usize, value: String },
    #[error("reference is not a JSON array: {0}")]
    Json(String),
}

/// Parse a stored reference into an embedding.
pub fn parse_reference<S: AsRef<str>>(values: &[S]) -> Result<Embedding, ReferenceError> {
    if values.is_empty() {
        return Err(ReferenceError::Empty);
    }

    let parsed = values
        .iter()
        .enumerate()
        .map(|(index, raw)| {
            let raw = raw.as_ref();
            raw.trim()
                .parse::<f32>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| ReferenceError::Malformed {
                    index,
                    value: raw.to_string(),
                })
        })
        .collect::<Result<Vec<f32>, _>>()?;

    Ok(Embedding::new(parsed))
}

/// Flatten JSON array elements to the string form [`parse_reference`] accepts.
///
/// Strings pass through, numbers are rendered. Anything else becomes its JSON
/// text, which then fails to parse.
pub fn reference_strings(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect()
}

/// Parse a JSON array of numbers or numeric strings.
pub fn reference_from_json(text: &str) -> Result<Embedding, ReferenceError> {
    let values: Vec<Value> =
        serde_json::from_str(text).map_err(|e| ReferenceError::Json(e.to_string()))?;
    parse_reference(&reference_strings(&values))
}

/// Encode an embedding for storage, one decimal string per element.
pub fn encode_reference(embedding: &Embedding) -> Vec<String> {
    embedding.values.iter().map(|v| v.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reference_numeric_strings() {
        let e = parse_reference(&["0.5", " -1.25", "3"]).unwrap();
        assert_eq!(e.values, vec![0.5, -1.25, 3.0]);
    }

    #[test]
    fn test_parse_reference_rejects_whole_vector_on_bad_element() {
        let err = parse_reference(&["0.5", "abc", "1.0"]).unwrap_err();
        assert_eq!(
            err,
            ReferenceError::Malformed { index: 1, value: "abc".into() }
        );
    }

    #[test]
    fn test_parse_reference_rejects_non_finite() {
        assert!(matches!(
            parse_reference(&["1.0", "NaN"]),
            Err(ReferenceError::Malformed { index: 1, .. })
        ));
        assert!(parse_reference(&["inf"]).is_err());
    }

    #[test]
    fn test_parse_reference_empty() {
        let empty: [&str; 0] = [];
        assert_eq!(parse_reference(&empty), Err(ReferenceError::Empty));
    }

    #[test]
    fn test_reference_from_json_mixed() {
        let e = reference_from_json(r#"["0.25", 0.5, "-1"]"#).unwrap();
        assert_eq!(e.values, vec![0.25, 0.5, -1.0]);
    }

    #[test]
    fn test_reference_from_json_rejects_non_numeric_elements() {
        assert!(matches!(
            reference_from_json(r#"[0.1, null, 0.3]"#),
            Err(ReferenceError::Malformed { index: 1, .. })
        ));
        assert!(matches!(
            reference_from_json(r#"{"values": []}"#),
            Err(ReferenceError::Json(_))
        ));
    }

    #[test]
    fn test_encode_then_parse_preserves_values() {
        let original = Embedding::new(vec![0.123_456_79, -0.000_01, 1.0]);
        let parsed = parse_reference(&encode_reference(&original)).unwrap();
        assert_eq!(parsed.values, original.values);
    }
}
