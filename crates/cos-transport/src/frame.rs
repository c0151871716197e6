//! Frame encoding and decoding.
//!
//! One websocket text frame carries either a single JSON object or a JSON
//! array of objects. Outbound batches of one are sent unwrapped.

use serde_json::{Map, Value};

use crate::errors::{Result, TransportError};

/// Serialize a batch of outbound messages into one frame payload.
pub fn encode_batch(batch: &[Value]) -> Result<String> {
    let text = match batch {
        [single] => serde_json::to_string(single)?,
        many => serde_json::to_string(many)?,
    };
    Ok(text)
}

/// Decode one inbound text frame into its objects, in order.
///
/// Anything other than an object or an array of objects is a protocol
/// violation.
pub fn decode_frame(text: &str) -> Result<Vec<Map<String, Value>>> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| TransportError::Protocol(format!("frame is not JSON: {e}")))?;

    match value {
        Value::Object(map) => Ok(vec![map]),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Ok(map),
                other => Err(TransportError::Protocol(format!(
                    "array element is not an object: {}",
                    kind_of(&other)
                ))),
            })
            .collect(),
        other => Err(TransportError::Protocol(format!(
            "frame is neither an object nor an array: {}",
            kind_of(&other)
        ))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    // -- encode_batch --

    #[test]
    fn single_message_is_unwrapped() {
        let text = encode_batch(&[json!({"type": "a"})]).unwrap();
        assert_eq!(text, r#"{"type":"a"}"#);
    }

    #[test]
    fn several_messages_form_an_array() {
        let text = encode_batch(&[json!({"n": 1}), json!({"n": 2})]).unwrap();
        assert_eq!(text, r#"[{"n":1},{"n":2}]"#);
    }

    // -- decode_frame --

    #[test]
    fn decode_object() {
        let objects = decode_frame(r#"{"type":"x","v":1}"#).unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0]["v"], 1);
    }

    #[test]
    fn decode_array_keeps_order() {
        let objects = decode_frame(r#"[{"n":1},{"n":2},{"n":3}]"#).unwrap();
        let ns: Vec<i64> = objects.iter().filter_map(|o| o["n"].as_i64()).collect();
        assert_eq!(ns, vec![1, 2, 3]);
    }

    #[test]
    fn decode_empty_array() {
        assert!(decode_frame("[]").unwrap().is_empty());
    }

    #[test]
    fn decode_rejects_other_shapes() {
        assert_matches!(decode_frame("\"hi\""), Err(TransportError::Protocol(_)));
        assert_matches!(decode_frame("[{\"n\":1}, 2]"), Err(TransportError::Protocol(_)));
        assert_matches!(decode_frame("null"), Err(TransportError::Protocol(_)));
        assert_matches!(decode_frame("{oops"), Err(TransportError::Protocol(_)));
    }

    #[test]
    fn encoded_batch_decodes_back_in_order() {
        let batch: Vec<Value> = (0..5).map(|n| json!({"n": n})).collect();
        let objects = decode_frame(&encode_batch(&batch).unwrap()).unwrap();
        let back: Vec<Value> = objects.into_iter().map(Value::Object).collect();
        assert_eq!(back, batch);
    }
}
