// src/utils/claims.rs
//! Path-based lookup into token claims.
//!
//! Registration attributes are carried in a custom claim of the identity
//! token, possibly nested. The configured claim path selects it using a
//! small dotted syntax:
//!
//! - `fabric` selects the top-level `fabric` claim
//! - `org.fabric` descends through nested objects
//! - `groups[1].name` indexes into an array held under `groups`

use crate::error::ClaimError;
use serde_json::{Map, Value};

/// Extracts the value found at `path` inside `claims`.
///
/// # Arguments
/// * `claims` - Claim object of the authenticated token
/// * `path` - Dot separated segments, each `key` or `key[index]`
///
/// # Returns
/// The value at the path. A key missing from an object yields `Value::Null`
/// rather than an error. Only type mismatches and bad indices fail.
///
/// # Errors
/// - `PathType` when a segment is applied to something other than an object,
///   or a bracketed segment finds something other than an array
/// - `InvalidIndex` when the bracket content is not a non-negative integer
/// - `IndexOutOfRange` when the index is past the end of the array
pub fn extract(claims: &Map<String, Value>, path: &str) -> Result<Value, ClaimError> {
    let path = path.trim_start_matches('.');
    let mut current = Value::Object(claims.clone());

    for segment in path.split('.') {
        let object = match current {
            Value::Object(object) => object,
            _ => {
                return Err(ClaimError::PathType {
                    segment: segment.to_string(),
                    expected: "map",
                })
            }
        };

        current = match parse_segment(segment)? {
            Segment::Key(key) => object.get(key).cloned().unwrap_or(Value::Null),
            Segment::Indexed(key, index) => match object.get(key) {
                Some(Value::Array(items)) => {
                    items
                        .get(index)
                        .cloned()
                        .ok_or_else(|| ClaimError::IndexOutOfRange {
                            segment: segment.to_string(),
                            len: items.len(),
                        })?
                }
                _ => {
                    return Err(ClaimError::PathType {
                        segment: segment.to_string(),
                        expected: "array",
                    })
                }
            },
        };
    }

    Ok(current)
}

enum Segment<'a> {
    Key(&'a str),
    Indexed(&'a str, usize),
}

fn parse_segment(segment: &str) -> Result<Segment<'_>, ClaimError> {
    let (open, close) = match (segment.find('['), segment.find(']')) {
        (Some(open), Some(close)) => (open, close),
        _ => return Ok(Segment::Key(segment)),
    };

    let index = segment
        .get(open + 1..close)
        .and_then(|text| text.parse::<usize>().ok())
        .ok_or_else(|| ClaimError::InvalidIndex {
            segment: segment.to_string(),
        })?;

    Ok(Segment::Indexed(&segment[..open], index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test claims must be an object"),
        }
    }

    #[test]
    fn test_nested_array_lookup() {
        let m = claims(json!({
            "a": { "b": [ { "c": "first" }, { "c": "second" } ] }
        }));
        assert_eq!(extract(&m, "a.b[1].c").unwrap(), json!("second"));
        assert_eq!(extract(&m, "a.b[0]").unwrap(), json!({ "c": "first" }));
    }

    #[test]
    fn test_top_level_claim() {
        let m = claims(json!({ "fabric": { "affiliation": "org1.dept1" } }));
        assert_eq!(
            extract(&m, "fabric").unwrap(),
            json!({ "affiliation": "org1.dept1" })
        );
    }

    #[test]
    fn test_leading_separators_are_stripped() {
        let m = claims(json!({ "fabric": { "type": "client" } }));
        assert_eq!(extract(&m, ".fabric.type").unwrap(), json!("client"));
        assert_eq!(extract(&m, "..fabric.type").unwrap(), json!("client"));
    }

    #[test]
    fn test_index_out_of_range() {
        let m = claims(json!({ "a": { "b": [1, 2] } }));
        assert_eq!(
            extract(&m, "a.b[2]").unwrap_err(),
            ClaimError::IndexOutOfRange {
                segment: "b[2]".into(),
                len: 2
            }
        );
    }

    #[test]
    fn test_invalid_index() {
        let m = claims(json!({ "a": [1, 2] }));
        assert!(matches!(
            extract(&m, "a[x]").unwrap_err(),
            ClaimError::InvalidIndex { .. }
        ));
        assert!(matches!(
            extract(&m, "a[-1]").unwrap_err(),
            ClaimError::InvalidIndex { .. }
        ));
    }

    #[test]
    fn test_path_through_non_map_is_type_error() {
        let m = claims(json!({ "a": "scalar" }));
        assert!(matches!(
            extract(&m, "a.b").unwrap_err(),
            ClaimError::PathType { expected: "map", .. }
        ));
    }

    #[test]
    fn test_index_into_non_array_is_type_error() {
        let m = claims(json!({ "a": { "b": { "c": 1 } } }));
        assert!(matches!(
            extract(&m, "a.b[0]").unwrap_err(),
            ClaimError::PathType { expected: "array", .. }
        ));
    }

    #[test]
    fn test_missing_key_yields_null() {
        let m = claims(json!({ "a": { "b": 1 } }));
        assert_eq!(extract(&m, "a.missing").unwrap(), Value::Null);
        assert_eq!(extract(&m, "missing").unwrap(), Value::Null);
    }

    #[test]
    fn test_missing_intermediate_key_is_type_error() {
        let m = claims(json!({ "a": {} }));
        assert!(matches!(
            extract(&m, "a.missing.c").unwrap_err(),
            ClaimError::PathType { .. }
        ));
    }

    #[test]
    fn test_deep_nesting() {
        let m = claims(json!({ "l1": { "l2": { "l3": { "l4": [[0], { "l5": true }] } } } }));
        assert_eq!(extract(&m, "l1.l2.l3.l4[1].l5").unwrap(), json!(true));
    }
}
