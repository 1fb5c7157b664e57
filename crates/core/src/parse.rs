//! Stored value parsing utilities
//!
//! Persisted payloads come from three schema generations and from hand-edited
//! files, so every field read is defensive: non-numeric input coerces to a
//! default instead of failing the load. Numeric strings are accepted because
//! older exports stored ids and counters both ways.

use serde_json::Value;

/// Coerce a JSON value to f64, accepting numbers and numeric strings.
pub fn coerce_f64(value: Option<&Value>, default: f64) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(default),
        Some(Value::Bool(b)) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => default,
    }
}

/// Coerce a JSON value to u64, truncating floats and clamping negatives.
pub fn coerce_u64(value: Option<&Value>, default: u64) -> u64 {
    match value {
        Some(Value::Number(n)) => {
            if let Some(v) = n.as_u64() {
                v
            } else if let Some(v) = n.as_f64() {
                if v.is_finite() && v > 0.0 {
                    v as u64
                } else {
                    0
                }
            } else {
                0
            }
        }
        Some(Value::String(s)) => match s.trim().parse::<f64>() {
            Ok(v) if v.is_finite() && v > 0.0 => v as u64,
            Ok(_) => 0,
            Err(_) => default,
        },
        None => default,
        _ => default,
    }
}

/// Coerce a JSON value to u32.
pub fn coerce_u32(value: Option<&Value>, default: u32) -> u32 {
    coerce_u64(value, default as u64).min(u32::MAX as u64) as u32
}

/// Coerce a JSON value to i64, used for signed ordinals.
pub fn coerce_i64(value: Option<&Value>, default: i64) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|v| v as i64))
            .unwrap_or(default),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(|v| v as i64)
            .unwrap_or(default),
        _ => default,
    }
}

/// Render a JSON id value as a string key; numbers lose any `.0` suffix.
pub fn coerce_id(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Some(Value::Number(n)) => {
            if let Some(v) = n.as_i64() {
                Some(v.to_string())
            } else {
                n.as_f64().map(|v| (v as i64).to_string())
            }
        }
        _ => None,
    }
}

/// Coerce a JSON value to a trimmed string, empty when absent.
pub fn coerce_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Loose boolean coercion matching the wire protocol: accepts booleans,
/// numbers, and the usual string spellings.
pub fn coerce_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        Some(Value::String(s)) => matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        _ => false,
    }
}

/// History timestamps as stored: a list of numbers with garbage skipped.
pub fn coerce_history(value: Option<&Value>) -> Vec<f64> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
                Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce_f64() {
        assert_eq!(coerce_f64(Some(&json!(1.5)), 0.0), 1.5);
        assert_eq!(coerce_f64(Some(&json!("2.5")), 0.0), 2.5);
        assert_eq!(coerce_f64(Some(&json!("junk")), 7.0), 7.0);
        assert_eq!(coerce_f64(None, 3.0), 3.0);
        assert_eq!(coerce_f64(Some(&json!(null)), 3.0), 3.0);
    }

    #[test]
    fn test_coerce_u64_clamps() {
        assert_eq!(coerce_u64(Some(&json!(-4)), 9), 0);
        assert_eq!(coerce_u64(Some(&json!(4.9)), 0), 4);
        assert_eq!(coerce_u64(Some(&json!("12")), 0), 12);
        assert_eq!(coerce_u64(Some(&json!({})), 9), 9);
    }

    #[test]
    fn test_coerce_id() {
        assert_eq!(coerce_id(Some(&json!(7))), Some("7".to_string()));
        assert_eq!(coerce_id(Some(&json!(" s1 "))), Some("s1".to_string()));
        assert_eq!(coerce_id(Some(&json!(""))), None);
        assert_eq!(coerce_id(Some(&json!(null))), None);
        assert_eq!(coerce_id(None), None);
    }

    #[test]
    fn test_coerce_bool() {
        assert!(coerce_bool(Some(&json!(true))));
        assert!(coerce_bool(Some(&json!(1))));
        assert!(coerce_bool(Some(&json!("Yes"))));
        assert!(!coerce_bool(Some(&json!("off"))));
        assert!(!coerce_bool(Some(&json!(""))));
        assert!(!coerce_bool(None));
    }

    #[test]
    fn test_coerce_history_skips_garbage() {
        let value = json!([1.0, "2.5", null, "x", [], 3]);
        assert_eq!(coerce_history(Some(&value)), vec![1.0, 2.5, 3.0]);
        assert!(coerce_history(Some(&json!("not a list"))).is_empty());
    }
}
