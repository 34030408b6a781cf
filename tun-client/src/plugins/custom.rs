//! User-supplied plugins loaded from JSON definition files.
//!
//! A definition names the request shape to recognize and where to read the
//! summary label from:
//!
//! ```json
//! {
//!   "id": "stripe_webhook",
//!   "title": "Stripe Webhook",
//!   "match": { "method": "POST", "path_contains": "/webhooks/stripe", "header": "stripe-signature" },
//!   "label": { "json_pointer": "/type" },
//!   "details": { "event_id": { "json_pointer": "/id" } }
//! }
//! ```

use super::{PluginData, RequestPlugin};
use crate::logger::LoggedRequest;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tun_core::protocol::HttpMethod;

/// Why a definition file was not admitted.
#[derive(Debug, Error)]
pub enum PluginDefinitionError {
    #[error("failed to read definition: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed definition: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid definition: {0}")]
    Invalid(String),
}

/// Where a label or detail value is read from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelSource {
    /// A field of a form-encoded request body.
    FormField(String),
    /// An RFC 6901 pointer into a JSON request body.
    JsonPointer(String),
    /// A request header.
    Header(String),
    /// Fixed text.
    Static(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchCriteria {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub path_contains: Option<String>,
    #[serde(default)]
    pub path_regex: Option<String>,
    #[serde(default)]
    pub header: Option<String>,
}

/// The on-disk form of a custom plugin.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomPluginDefinition {
    pub id: String,
    pub title: String,
    #[serde(rename = "match")]
    pub criteria: MatchCriteria,
    pub label: LabelSource,
    #[serde(default)]
    pub details: BTreeMap<String, LabelSource>,
}

/// A validated custom plugin.
#[derive(Debug, Clone)]
pub struct CustomPlugin {
    id: String,
    title: String,
    method: Option<HttpMethod>,
    path_contains: Option<String>,
    path_regex: Option<Regex>,
    header: Option<String>,
    label: LabelSource,
    details: BTreeMap<String, LabelSource>,
}

impl CustomPlugin {
    /// Load and validate a definition file.
    pub fn from_file(path: &Path) -> Result<Self, PluginDefinitionError> {
        let contents = std::fs::read_to_string(path)?;
        let definition: CustomPluginDefinition = serde_json::from_str(&contents)?;
        Self::from_definition(definition)
    }

    /// Validate a parsed definition.
    pub fn from_definition(definition: CustomPluginDefinition) -> Result<Self, PluginDefinitionError> {
        let id = definition.id.trim().to_string();
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(PluginDefinitionError::Invalid(format!(
                "id {:?} must be non-empty lowercase letters, digits, '_' or '-'",
                definition.id
            )));
        }

        let title = definition.title.trim().to_string();
        if title.is_empty() {
            return Err(PluginDefinitionError::Invalid("title is empty".to_string()));
        }

        let criteria = definition.criteria;
        if criteria.method.is_none()
            && criteria.path_contains.is_none()
            && criteria.path_regex.is_none()
            && criteria.header.is_none()
        {
            return Err(PluginDefinitionError::Invalid(
                "match needs at least one of method, path_contains, path_regex, header".to_string(),
            ));
        }

        let method = criteria
            .method
            .as_deref()
            .map(str::parse::<HttpMethod>)
            .transpose()
            .map_err(PluginDefinitionError::Invalid)?;

        let path_regex = criteria
            .path_regex
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| PluginDefinitionError::Invalid(format!("path_regex: {}", e)))?;

        for source in std::iter::once(&definition.label).chain(definition.details.values()) {
            validate_source(source)?;
        }

        Ok(Self {
            id,
            title,
            method,
            path_contains: criteria.path_contains,
            path_regex,
            header: criteria.header,
            label: definition.label,
            details: definition.details,
        })
    }
}

fn validate_source(source: &LabelSource) -> Result<(), PluginDefinitionError> {
    match source {
        LabelSource::JsonPointer(pointer) if !pointer.is_empty() && !pointer.starts_with('/') => {
            Err(PluginDefinitionError::Invalid(format!(
                "json_pointer {:?} must be empty or start with '/'",
                pointer
            )))
        }
        LabelSource::FormField(name) | LabelSource::Header(name) if name.trim().is_empty() => Err(
            PluginDefinitionError::Invalid("label source names an empty field".to_string()),
        ),
        _ => Ok(()),
    }
}

/// Read a value out of the logged request.
fn extract(source: &LabelSource, logged: &LoggedRequest) -> Result<String, String> {
    match source {
        LabelSource::Static(text) => Ok(text.clone()),
        LabelSource::Header(name) => logged
            .request
            .header(name)
            .map(str::to_string)
            .ok_or_else(|| format!("header {} missing", name)),
        LabelSource::FormField(name) => logged
            .request
            .form_fields()
            .remove(name)
            .ok_or_else(|| format!("form field {} missing", name)),
        LabelSource::JsonPointer(pointer) => {
            let body: Value = serde_json::from_slice(&logged.request.body)
                .map_err(|e| format!("Invalid JSON body: {}", e))?;
            match body.pointer(pointer) {
                Some(Value::String(s)) => Ok(s.clone()),
                Some(other) => Ok(other.to_string()),
                None => Err(format!("JSON body has no value at {}", pointer)),
            }
        }
    }
}

impl RequestPlugin for CustomPlugin {
    fn id(&self) -> &str {
        &self.id
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn matches_request(&self, logged: &LoggedRequest) -> bool {
        let request = &logged.request;

        if self.method.is_some_and(|m| m != request.method) {
            return false;
        }
        if let Some(fragment) = &self.path_contains {
            if !request.uri.contains(fragment.as_str()) {
                return false;
            }
        }
        if let Some(re) = &self.path_regex {
            if !re.is_match(request.path()) {
                return false;
            }
        }
        if let Some(header) = &self.header {
            if request.header(header).is_none() {
                return false;
            }
        }
        true
    }

    fn plugin_data(&self, logged: &LoggedRequest) -> PluginData {
        let label = match extract(&self.label, logged) {
            Ok(label) => label,
            Err(message) => return PluginData::error(&self.title, message),
        };

        self.details
            .iter()
            .fold(PluginData::summary(&self.title, label), |data, (key, source)| {
                match extract(source, logged) {
                    Ok(value) => data.with_detail(key.as_str(), value),
                    Err(_) => data.with_detail(key.as_str(), Value::Null),
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tun_core::protocol::HttpRequestData;

    fn parse(json: &str) -> Result<CustomPlugin, PluginDefinitionError> {
        CustomPlugin::from_definition(serde_json::from_str(json)?)
    }

    fn stripe() -> CustomPlugin {
        parse(
            r#"{
                "id": "stripe_webhook",
                "title": "Stripe Webhook",
                "match": { "method": "post", "path_contains": "/webhooks/stripe", "header": "stripe-signature" },
                "label": { "json_pointer": "/type" },
                "details": { "event_id": { "json_pointer": "/id" }, "livemode": { "json_pointer": "/livemode" }, "missing": { "header": "x-nope" } }
            }"#,
        )
        .unwrap()
    }

    fn stripe_event(body: &str) -> LoggedRequest {
        LoggedRequest::new(
            "req",
            HttpRequestData::new(HttpMethod::Post, "/webhooks/stripe")
                .with_header("Stripe-Signature", "t=1,v1=abc")
                .with_body(body),
        )
    }

    #[test]
    fn test_matching() {
        let plugin = stripe();
        assert!(plugin.matches_request(&stripe_event("{}")));

        let get = LoggedRequest::new(
            "req",
            HttpRequestData::new(HttpMethod::Get, "/webhooks/stripe")
                .with_header("Stripe-Signature", "x"),
        );
        assert!(!plugin.matches_request(&get));

        let unsigned = LoggedRequest::new(
            "req",
            HttpRequestData::new(HttpMethod::Post, "/webhooks/stripe"),
        );
        assert!(!plugin.matches_request(&unsigned));
    }

    #[test]
    fn test_extraction() {
        let data = stripe().plugin_data(&stripe_event(
            r#"{"id":"evt_1","type":"invoice.paid","livemode":false}"#,
        ));
        assert_eq!(data.label(), Some("invoice.paid"));
        let PluginData::Summary { details, .. } = data else {
            panic!("expected summary");
        };
        assert_eq!(details["event_id"], "evt_1");
        assert_eq!(details["livemode"], "false");
        assert_eq!(details["missing"], Value::Null);
    }

    #[test]
    fn test_extraction_failure_is_error_variant() {
        let data = stripe().plugin_data(&stripe_event("not json"));
        assert!(data.is_error());
        assert_eq!(data.plugin(), "Stripe Webhook");
    }

    #[test]
    fn test_path_regex_and_form_label() {
        let plugin = parse(
            r#"{
                "id": "signup",
                "title": "Signup",
                "match": { "path_regex": "^/users/[0-9]+/signup$" },
                "label": { "form_field": "plan" }
            }"#,
        )
        .unwrap();

        let hit = LoggedRequest::new(
            "req",
            HttpRequestData::new(HttpMethod::Post, "/users/42/signup?ref=x").with_body("plan=pro"),
        );
        assert!(plugin.matches_request(&hit));
        assert_eq!(plugin.plugin_data(&hit).label(), Some("pro"));

        let miss = LoggedRequest::new("req", HttpRequestData::new(HttpMethod::Post, "/users/abc/signup"));
        assert!(!plugin.matches_request(&miss));
    }

    #[test]
    fn test_invalid_definitions() {
        let cases = [
            r#"{"id":"","title":"x","match":{"method":"GET"},"label":{"static":"x"}}"#,
            r#"{"id":"Bad Id","title":"x","match":{"method":"GET"},"label":{"static":"x"}}"#,
            r#"{"id":"ok","title":" ","match":{"method":"GET"},"label":{"static":"x"}}"#,
            r#"{"id":"ok","title":"x","match":{},"label":{"static":"x"}}"#,
            r#"{"id":"ok","title":"x","match":{"method":"BREW"},"label":{"static":"x"}}"#,
            r#"{"id":"ok","title":"x","match":{"path_regex":"("},"label":{"static":"x"}}"#,
            r#"{"id":"ok","title":"x","match":{"method":"GET"},"label":{"json_pointer":"type"}}"#,
            r#"{"id":"ok","title":"x","match":{"method":"GET"},"label":{"form_field":""}}"#,
            r#"{"id":"ok","title":"x","match":{"method":"GET"},"label":{"static":"x"},"extra":1}"#,
            r#"{"id":"ok","title":"x","match":{"method":"GET"}}"#,
        ];
        for json in cases {
            assert!(parse(json).is_err(), "accepted {}", json);
        }
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ping.json");
        std::fs::write(
            &path,
            r#"{"id":"ping","title":"Ping","match":{"path_contains":"/ping"},"label":{"static":"pong"}}"#,
        )
        .unwrap();
        let plugin = CustomPlugin::from_file(&path).unwrap();
        assert_eq!(plugin.id(), "ping");

        assert!(matches!(
            CustomPlugin::from_file(&dir.path().join("absent.json")),
            Err(PluginDefinitionError::Io(_))
        ));
    }
}
