//! Client descriptors and the nearest-neighbour distance function.
//!
//! A descriptor is the self-reported identity a worker presents at join
//! time. It is immutable after registration; the vector is used solely for
//! the nearest-neighbour hint delivered in `client-list` / `client-match`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HubError;

/// Self-reported identity of a client at join time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientDescriptor {
    /// Globally unique client id.
    pub id: String,
    /// Join timestamp as reported by the client (opaque string).
    pub joined_at: String,
    /// Feature vector for the nearest-neighbour hint.
    pub vector: Vec<f64>,
}

impl ClientDescriptor {
    /// Validate a raw JSON descriptor field by field.
    ///
    /// A descriptor must carry `id` (non-empty string), `joinedAt` (string)
    /// and `vector` (array of numbers). Anything else is rejected with
    /// [`HubError::MalformedDescriptor`] naming the offending field.
    pub fn from_value(value: &Value) -> Result<Self, HubError> {
        let obj = value
            .as_object()
            .ok_or_else(|| HubError::MalformedDescriptor("descriptor must be an object".into()))?;

        let id = obj
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                HubError::MalformedDescriptor("missing or invalid field: id".into())
            })?;

        let joined_at = obj
            .get("joinedAt")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                HubError::MalformedDescriptor("missing or invalid field: joinedAt".into())
            })?;

        let vector = obj
            .get("vector")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                HubError::MalformedDescriptor("missing or invalid field: vector".into())
            })?
            .iter()
            .map(|v| {
                v.as_f64().ok_or_else(|| {
                    HubError::MalformedDescriptor("vector must contain only numbers".into())
                })
            })
            .collect::<Result<Vec<f64>, HubError>>()?;

        Ok(Self {
            id: id.to_string(),
            joined_at: joined_at.to_string(),
            vector,
        })
    }
}

/// Distance between two client vectors.
///
/// Euclidean distance over the shared prefix plus a penalty of one per
/// missing dimension. An empty shared prefix is infinitely far away, which
/// keeps vectorless clients out of every nearest-neighbour result.
pub fn distance(a: &[f64], b: &[f64]) -> f64 {
    let shared = a.len().min(b.len());
    if shared == 0 {
        return f64::INFINITY;
    }
    let sum: f64 = a
        .iter()
        .zip(b.iter())
        .take(shared)
        .map(|(x, y)| (x - y).powi(2))
        .sum();
    sum.sqrt() + a.len().abs_diff(b.len()) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_descriptor_parses() {
        let value = json!({
            "id": "worker-1",
            "joinedAt": "2026-08-01T10:00:00Z",
            "vector": [0.5, 1, -2.25],
        });
        let desc = ClientDescriptor::from_value(&value).unwrap();
        assert_eq!(desc.id, "worker-1");
        assert_eq!(desc.vector, vec![0.5, 1.0, -2.25]);
    }

    #[test]
    fn missing_id_rejected() {
        let value = json!({"joinedAt": "t", "vector": []});
        let err = ClientDescriptor::from_value(&value).unwrap_err();
        assert!(err.to_string().contains("id"));
    }

    #[test]
    fn empty_id_rejected() {
        let value = json!({"id": "", "joinedAt": "t", "vector": []});
        assert!(ClientDescriptor::from_value(&value).is_err());
    }

    #[test]
    fn non_numeric_vector_rejected() {
        let value = json!({"id": "a", "joinedAt": "t", "vector": [1, "x"]});
        let err = ClientDescriptor::from_value(&value).unwrap_err();
        assert!(err.to_string().contains("vector"));
    }

    #[test]
    fn non_object_rejected() {
        assert!(ClientDescriptor::from_value(&json!("nope")).is_err());
        assert!(ClientDescriptor::from_value(&json!(null)).is_err());
    }

    #[test]
    fn descriptor_serializes_camel_case() {
        let desc = ClientDescriptor {
            id: "a".into(),
            joined_at: "t".into(),
            vector: vec![1.0],
        };
        let value = serde_json::to_value(&desc).unwrap();
        assert_eq!(value["joinedAt"], "t");
    }

    #[test]
    fn distance_pythagorean() {
        assert_eq!(distance(&[0.0, 0.0, 0.0], &[3.0, 4.0, 0.0]), 5.0);
    }

    #[test]
    fn distance_symmetric_and_zero_on_self() {
        let a = [1.0, 2.0, 3.0];
        let b = [4.0, 5.0];
        assert_eq!(distance(&a, &b), distance(&b, &a));
        assert_eq!(distance(&a, &a), 0.0);
    }

    #[test]
    fn distance_length_penalty() {
        // Identical shared prefix, one extra dimension: penalty of 1.
        assert_eq!(distance(&[1.0, 2.0], &[1.0, 2.0, 9.0]), 1.0);
    }

    #[test]
    fn distance_empty_is_infinite() {
        assert_eq!(distance(&[], &[1.0]), f64::INFINITY);
        assert_eq!(distance(&[], &[]), f64::INFINITY);
    }
}
