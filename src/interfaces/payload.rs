//! Flat string maps out of query strings, form bodies, and JSON bodies.
//!
//! Processors post callbacks and webhooks in whatever shape they like; plugins
//! only ever see a flat `key -> value` map.

use crate::error::{GatewayError, Result};
use serde_json::Value;
use std::collections::BTreeMap;

pub type FlatMap = BTreeMap<String, String>;

/// The three places an inbound request can carry fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestPayload {
    pub query: FlatMap,
    pub form: FlatMap,
    pub json: FlatMap,
}

impl RequestPayload {
    /// Builds a payload from a raw query string and a body of the given content type.
    pub fn from_parts(query: &str, content_type: Option<&str>, body: &[u8]) -> Result<Self> {
        let mut payload = Self {
            query: parse_query(query)?,
            ..Self::default()
        };
        if body.is_empty() {
            return Ok(payload);
        }
        match BodyKind::detect(content_type) {
            BodyKind::Json => payload.json = parse_json(body)?,
            BodyKind::Form => payload.form = parse_form(body)?,
            BodyKind::Unknown => match parse_json(body) {
                Ok(json) => payload.json = json,
                Err(_) => payload.form = parse_form(body)?,
            },
        }
        Ok(payload)
    }

    /// Query wins over form, form wins over JSON.
    pub fn merged(&self) -> FlatMap {
        let mut merged = self.json.clone();
        merged.extend(self.form.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged.extend(self.query.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Json,
    Form,
    Unknown,
}

impl BodyKind {
    fn detect(content_type: Option<&str>) -> Self {
        let Some(content_type) = content_type else {
            return Self::Unknown;
        };
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if mime == "application/json" || mime.ends_with("+json") {
            Self::Json
        } else if mime == "application/x-www-form-urlencoded" {
            Self::Form
        } else {
            Self::Unknown
        }
    }
}

/// Parses the body by content type: JSON, urlencoded form, or JSON-then-form.
pub fn parse_body(content_type: Option<&str>, body: &[u8]) -> Result<FlatMap> {
    let payload = RequestPayload::from_parts("", content_type, body)?;
    Ok(payload.merged())
}

pub fn parse_query(query: &str) -> Result<FlatMap> {
    let query = query.strip_prefix('?').unwrap_or(query);
    serde_urlencoded::from_str::<Vec<(String, String)>>(query)
        .map(|pairs| pairs.into_iter().collect())
        .map_err(|e| GatewayError::ValidationError(format!("Malformed query string: {}", e)))
}

pub fn parse_form(body: &[u8]) -> Result<FlatMap> {
    serde_urlencoded::from_bytes::<Vec<(String, String)>>(body)
        .map(|pairs| pairs.into_iter().collect())
        .map_err(|e| GatewayError::ValidationError(format!("Malformed form body: {}", e)))
}

/// Top-level JSON object to a flat map. Nested values are kept as compact JSON text.
pub fn parse_json(body: &[u8]) -> Result<FlatMap> {
    let value: Value = serde_json::from_slice(body)?;
    let Value::Object(object) = value else {
        return Err(GatewayError::ValidationError(
            "JSON body must be an object".to_string(),
        ));
    };
    Ok(object
        .into_iter()
        .filter_map(|(key, value)| {
            let text = match value {
                Value::Null => return None,
                Value::String(s) => s,
                other => other.to_string(),
            };
            Some((key, text))
        })
        .collect())
}
