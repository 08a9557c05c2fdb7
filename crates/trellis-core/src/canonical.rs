//! Canonical JSON encoding for hashed objects.
//!
//! Operation ids are hashes of encoded bytes, so the same logical operation
//! must always encode to the same bytes on every replica:
//!
//! - compact, no whitespace between tokens;
//! - object keys sorted lexicographically at every depth;
//! - arrays keep their element order;
//! - strings escaped by `serde_json`.

use serde::Serialize;
use serde_json::Value;

/// Serialize `value` to canonical JSON bytes.
///
/// # Errors
///
/// Returns `serde_json::Error` if `value` cannot be represented as JSON.
pub fn to_canonical_vec<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    Ok(canonicalize(&value)?.into_bytes())
}

/// Render a JSON value canonically.
///
/// # Errors
///
/// Propagates string escaping failures from `serde_json` (not expected for
/// values that came out of `serde_json` in the first place).
pub fn canonicalize(value: &Value) -> Result<String, serde_json::Error> {
    let mut buf = String::new();
    write_value(value, &mut buf)?;
    Ok(buf)
}

fn write_value(value: &Value, buf: &mut String) -> Result<(), serde_json::Error> {
    match value {
        Value::Null => buf.push_str("null"),
        Value::Bool(true) => buf.push_str("true"),
        Value::Bool(false) => buf.push_str("false"),
        Value::Number(n) => buf.push_str(&n.to_string()),
        Value::String(s) => buf.push_str(&serde_json::to_string(s)?),
        Value::Array(items) => {
            buf.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                write_value(item, buf)?;
            }
            buf.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            buf.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                buf.push_str(&serde_json::to_string(key)?);
                buf.push(':');
                write_value(val, buf)?;
            }
            buf.push('}');
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars() {
        assert_eq!(canonicalize(&json!(null)).unwrap(), "null");
        assert_eq!(canonicalize(&json!(true)).unwrap(), "true");
        assert_eq!(canonicalize(&json!(-7)).unwrap(), "-7");
        assert_eq!(canonicalize(&json!("a\"b")).unwrap(), r#""a\"b""#);
    }

    #[test]
    fn nested_keys_are_sorted() {
        let val = json!({"z": 1, "a": {"c": [3, {"y": 0, "x": 1}], "b": 2}});
        assert_eq!(
            canonicalize(&val).unwrap(),
            r#"{"a":{"b":2,"c":[3,{"x":1,"y":0}]},"z":1}"#
        );
    }

    #[test]
    fn newlines_in_strings_are_escaped() {
        let out = canonicalize(&json!({"message": "line one\nline two"})).unwrap();
        assert!(!out.contains('\n'));
    }

    #[test]
    fn struct_field_order_does_not_matter() {
        #[derive(Serialize)]
        struct Forward {
            alpha: u8,
            beta: u8,
        }
        #[derive(Serialize)]
        struct Backward {
            beta: u8,
            alpha: u8,
        }
        let a = to_canonical_vec(&Forward { alpha: 1, beta: 2 }).unwrap();
        let b = to_canonical_vec(&Backward { beta: 2, alpha: 1 }).unwrap();
        assert_eq!(a, b);
    }
}
