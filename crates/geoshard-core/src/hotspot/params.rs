//! Analysis-parameter payload handling.
//!
//! Overlap result rows carry a serialized key/value payload with the group
//! key, grid position, and filters used by the analysis. Payloads arrive
//! from an external writer and can be malformed; parsing never fails, so a
//! single corrupt row cannot abort a run.

use serde_json::{Map, Value};

/// Payload key holding the group key.
pub const GROUP_KEY_PARAM: &str = "region";

/// Payload keys holding the grid position.
pub const GRID_X_PARAM: &str = "grid_x";
pub const GRID_Y_PARAM: &str = "grid_y";

/// Parse a serialized parameters payload.
///
/// Malformed or non-object payloads yield an empty mapping.
pub fn parse_params(payload: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Extract the group key from a parsed payload.
pub fn group_key(params: &Map<String, Value>) -> Option<&str> {
    params.get(GROUP_KEY_PARAM).and_then(Value::as_str)
}

/// Extract the grid position from a parsed payload.
pub fn grid_position(params: &Map<String, Value>) -> Option<(i64, i64)> {
    let x = params.get(GRID_X_PARAM).and_then(Value::as_i64)?;
    let y = params.get(GRID_Y_PARAM).and_then(Value::as_i64)?;
    Some((x, y))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_never_fails() {
        for payload in [
            "",
            "not json",
            "[1, 2, 3]",
            "42",
            "\"string\"",
            "null",
            "{broken",
            "{\"region\": ",
        ] {
            assert!(parse_params(payload).is_empty(), "payload {payload:?}");
        }
    }

    #[test]
    fn test_parse_extracts_fields() {
        let params = parse_params(r#"{"region":"A001","grid_x":3,"grid_y":-7,"filters":{"q":"good"}}"#);
        assert_eq!(group_key(&params), Some("A001"));
        assert_eq!(grid_position(&params), Some((3, -7)));
    }

    #[test]
    fn test_partial_payload_yields_partial_fields() {
        let params = parse_params(r#"{"region":"A001","grid_x":3}"#);
        assert_eq!(group_key(&params), Some("A001"));
        assert_eq!(grid_position(&params), None);

        let params = parse_params(r#"{"grid_x":1,"grid_y":2}"#);
        assert_eq!(group_key(&params), None);
        assert_eq!(grid_position(&params), Some((1, 2)));

        // A non-numeric coordinate is as good as a missing one.
        let params = parse_params(r#"{"region":"A001","grid_x":"3","grid_y":7}"#);
        assert_eq!(grid_position(&params), None);
    }
}
