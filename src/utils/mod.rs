//! Utility functions and helpers

pub mod duration;

pub use duration::{format_duration, parse_duration};

use serde_json::Value;

/// Plain-text form of a secret field: strings verbatim, scalars as written,
/// compound values as JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        compound => compound.to_string(),
    }
}
