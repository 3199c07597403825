use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::{Map, Value};
use tandem_models::{AdapterRole, ModelAnalysis, Recommendation};

use crate::error::AgentError;

pub type Payload = Map<String, Value>;

/// Extract the first JSON object from a string that may contain surrounding text.
///
/// Handles common model response formats:
/// - Clean JSON: `{"key": "value"}`
/// - Markdown-wrapped: ```json\n{"key": "value"}\n```
/// - Prefix text: `Here is the analysis:\n{"key": "value"}`
pub fn extract_json(text: &str) -> Result<String, AgentError> {
    let trimmed = text.trim();

    if trimmed.starts_with('{') && serde_json::from_str::<Value>(trimmed).is_ok() {
        return Ok(trimmed.to_string());
    }

    if let Some(json_str) = extract_from_markdown_block(trimmed) {
        if serde_json::from_str::<Value>(&json_str).is_ok() {
            return Ok(json_str);
        }
    }

    if let Some(json_str) = extract_first_object(trimmed) {
        if serde_json::from_str::<Value>(&json_str).is_ok() {
            return Ok(json_str);
        }
    }

    Err(AgentError::MalformedResponse(format!(
        "No valid JSON object found in response (length={})",
        text.len()
    )))
}

/// Extract JSON from a markdown code block (```json ... ``` or ``` ... ```)
fn extract_from_markdown_block(text: &str) -> Option<String> {
    let start_markers = ["```json\n", "```json\r\n", "```\n", "```\r\n"];

    for marker in &start_markers {
        if let Some(start) = text.find(marker) {
            let json_start = start + marker.len();
            if let Some(end) = text[json_start..].find("```") {
                let extracted = text[json_start..json_start + end].trim();
                return Some(extracted.to_string());
            }
        }
    }

    None
}

/// Find the first balanced { ... } in the text.
fn extract_first_object(text: &str) -> Option<String> {
    let mut depth = 0;
    let mut start = None;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match ch {
            '\\' if in_string => {
                escape_next = true;
            }
            '"' => {
                in_string = !in_string;
            }
            '{' if !in_string => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if !in_string && depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start {
                        return Some(text[s..=i].to_string());
                    }
                }
            }
            _ => {}
        }
    }

    None
}

/// Parse `key: value` lines into a payload. Keys are lowercased with
/// spaces and dashes folded to underscores; values that parse as JSON
/// (numbers, booleans, arrays) keep that type, everything else is a string.
fn parse_key_values(text: &str) -> Payload {
    let mut map = Map::new();
    for line in text.lines() {
        let line = line.trim().trim_start_matches(['-', '*']).trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().trim_matches('*').trim();
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ' ' || c == '-')
        {
            continue;
        }
        let key = key.to_ascii_lowercase().replace([' ', '-'], "_");
        let value = value.trim();
        let parsed = serde_json::from_str::<Value>(value)
            .ok()
            .filter(|v| !v.is_object())
            .unwrap_or_else(|| Value::String(value.to_string()));
        map.insert(key, parsed);
    }
    map
}

/// Locate the structured payload in model output: an embedded JSON object
/// first, `key: value` lines second. Absence of both is a parse failure.
pub fn parse_payload(text: &str) -> Result<Payload, AgentError> {
    if let Ok(json_str) = extract_json(text) {
        if let Value::Object(map) = serde_json::from_str::<Value>(&json_str)? {
            return Ok(map);
        }
    }

    let map = parse_key_values(text);
    if map.is_empty() {
        return Err(AgentError::MalformedResponse(format!(
            "No recognizable payload in response (length={})",
            text.len()
        )));
    }
    Ok(map)
}

/// Nested block `name`, or keys prefixed `name_` folded into one when the
/// model flattened it.
pub fn sub_payload(payload: &Payload, name: &str) -> Option<Payload> {
    if let Some(Value::Object(map)) = payload.get(name) {
        return Some(map.clone());
    }
    let prefix = format!("{name}_");
    let folded: Payload = payload
        .iter()
        .filter_map(|(k, v)| k.strip_prefix(&prefix).map(|rest| (rest.to_string(), v.clone())))
        .collect();
    (!folded.is_empty()).then_some(folded)
}

fn missing(field: &str) -> AgentError {
    AgentError::MalformedResponse(format!("Missing field: {field}"))
}

fn is_blank(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "none" | "null" | "n/a" | "-"
    )
}

pub fn required_str(payload: &Payload, field: &str) -> Result<String, AgentError> {
    optional_str(payload, field).ok_or_else(|| missing(field))
}

pub fn optional_str(payload: &Payload, field: &str) -> Option<String> {
    match payload.get(field)? {
        Value::String(s) if !is_blank(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn value_to_decimal(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

pub fn optional_decimal(payload: &Payload, field: &str) -> Result<Option<Decimal>, AgentError> {
    match payload.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if is_blank(s) => Ok(None),
        Some(value) => value_to_decimal(value).map(Some).ok_or_else(|| {
            AgentError::MalformedResponse(format!("Field {field} is not numeric: {value}"))
        }),
    }
}

pub fn required_decimal(payload: &Payload, field: &str) -> Result<Decimal, AgentError> {
    optional_decimal(payload, field)?.ok_or_else(|| missing(field))
}

pub fn optional_u64(payload: &Payload, field: &str) -> Result<Option<u64>, AgentError> {
    match optional_decimal(payload, field)? {
        None => Ok(None),
        Some(d) if d.is_sign_negative() => Err(AgentError::MalformedResponse(format!(
            "Field {field} is negative: {d}"
        ))),
        Some(d) => Ok(Some(d.trunc().to_string().parse().map_err(|_| {
            AgentError::MalformedResponse(format!("Field {field} out of range: {d}"))
        })?)),
    }
}

pub fn required_u64(payload: &Payload, field: &str) -> Result<u64, AgentError> {
    optional_u64(payload, field)?.ok_or_else(|| missing(field))
}

/// A list given either as a JSON array or as a `;`/`,` separated string.
pub fn string_list(payload: &Payload, field: &str) -> Vec<String> {
    match payload.get(field) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) if !is_blank(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) if !is_blank(s) => {
            let sep = if s.contains(';') { ';' } else { ',' };
            s.split(sep)
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect()
        }
        _ => Vec::new(),
    }
}

pub fn optional_recommendation(
    payload: &Payload,
    field: &str,
) -> Result<Option<Recommendation>, AgentError> {
    match optional_str(payload, field) {
        None => Ok(None),
        Some(label) => Recommendation::from_label(&label).map(Some).ok_or_else(|| {
            AgentError::MalformedResponse(format!("Unknown {field} label: {label}"))
        }),
    }
}

pub fn required_recommendation(
    payload: &Payload,
    field: &str,
) -> Result<Recommendation, AgentError> {
    optional_recommendation(payload, field)?.ok_or_else(|| missing(field))
}

/// Normalise a reported confidence onto 0-100. A fractional value strictly
/// between 0 and 1 is read as a probability and scaled.
pub fn normalize_confidence(raw: Decimal) -> Decimal {
    let hundred = Decimal::ONE_HUNDRED;
    let scaled = if raw > Decimal::ZERO && raw < Decimal::ONE && !raw.fract().is_zero() {
        raw * hundred
    } else {
        raw
    };
    scaled.clamp(Decimal::ZERO, hundred)
}

/// Clamp a unit-interval score.
pub fn clamp_unit(raw: Decimal) -> Decimal {
    raw.clamp(Decimal::ZERO, Decimal::ONE)
}

/// Validate the common analysis fields. `recommendation`, `confidence` and
/// `reasoning` are required; the rest default.
pub fn parse_model_analysis(
    payload: &Payload,
    role: AdapterRole,
) -> Result<ModelAnalysis, AgentError> {
    Ok(ModelAnalysis {
        role,
        recommendation: required_recommendation(payload, "recommendation")?,
        confidence: normalize_confidence(required_decimal(payload, "confidence")?),
        reasoning: required_str(payload, "reasoning")?,
        risk_warning: optional_str(payload, "risk_warning"),
        key_factors: string_list(payload, "key_factors"),
        contrarian_note: optional_str(payload, "contrarian_note"),
    })
}
