//! Turning a model's answer into a [`MedicineRecord`].

use serde_json::{Map, Value};

use crate::error::ParseError;
use crate::models::{MedicineRecord, value_to_text};

/// The JSON body of a reply that may be wrapped in Markdown code fences.
pub fn strip_code_fences(text: &str) -> &str {
    if let Some((_, rest)) = text.split_once("```json") {
        rest.split("```").next().unwrap_or(rest).trim()
    } else if let Some((_, rest)) = text.split_once("```") {
        rest.split("```").next().unwrap_or(rest).trim()
    } else {
        text.trim()
    }
}

/// Parse a reply into a JSON object, retrying once after removing raw
/// newlines and non-ASCII characters.
pub fn parse_or_repair(text: &str) -> Result<Map<String, Value>, ParseError> {
    let body = strip_code_fences(text);
    let value = match serde_json::from_str::<Value>(body) {
        Ok(value) => value,
        Err(_) => {
            let repaired: String = body
                .chars()
                .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
                .filter(char::is_ascii)
                .collect();
            serde_json::from_str(&repaired).map_err(|e| ParseError::InvalidJson(e.to_string()))?
        }
    };
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ParseError::NotAnObject),
    }
}

/// Fill a record from parsed fields, defaulting anything missing.
///
/// An empty or missing `medicine_name` falls back to `fallback_name`.
pub fn into_record(mut fields: Map<String, Value>, fallback_name: &str) -> MedicineRecord {
    let mut text = |key: &str| fields.remove(key).map(|v| value_to_text(&v)).unwrap_or_default();

    let name = text("medicine_name");
    let description = text("description");
    let directions = text("directions");
    let safety_info = text("safety_info");
    let relevant_info = text("relevant_info");

    MedicineRecord {
        medicine_name: if name.trim().is_empty() {
            fallback_name.to_string()
        } else {
            name.trim().to_string()
        },
        description,
        key_benefits: benefits(fields.remove("key_benefits")),
        directions,
        safety_info,
        relevant_info,
        url: String::new(),
    }
}

fn benefits(value: Option<Value>) -> Vec<String> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(value_to_text)
            .filter(|s| !s.trim().is_empty())
            .collect(),
        Some(other) => {
            let single = value_to_text(&other);
            if single.trim().is_empty() {
                Vec::new()
            } else {
                vec![single]
            }
        }
    }
}
