//! Validate the renderer's initial data before it is embedded in a page.
//!
//! The payload is written into the document as a JavaScript object literal.
//! In a literal, a `__proto__` key does not create a property: it replaces
//! the object's prototype when the browser evaluates the script. Such
//! payloads are rejected instead of embedded.

use anyhow::{anyhow, Result};
use serde_json::Value;

/// Maximum nesting depth for objects/arrays in the payload
const MAX_DEPTH: usize = 64;

/// Keys with special meaning inside a JS object literal
const DANGEROUS_KEYS: &[&str] = &["__proto__"];

/// Recursively check an initial-data payload.
///
/// # Errors
/// Returns an error if:
/// - A `__proto__` key is found at any level
/// - Nesting depth exceeds MAX_DEPTH (64)
pub fn check_initial_data(value: &Value) -> Result<()> {
    check_recursive(value, 0)
}

fn check_recursive(value: &Value, depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(anyhow!(
            "Initial data nesting too deep (max {} levels)",
            MAX_DEPTH
        ));
    }

    match value {
        Value::Object(map) => {
            for (key, val) in map {
                if DANGEROUS_KEYS.contains(&key.as_str()) {
                    return Err(anyhow!(
                        "Prototype pollution attempt: '{}' key is forbidden in initial data",
                        key
                    ));
                }
                check_recursive(val, depth + 1)?;
            }
            Ok(())
        }
        Value::Array(items) => items
            .iter()
            .try_for_each(|item| check_recursive(item, depth + 1)),
        _ => Ok(()),
    }
}
