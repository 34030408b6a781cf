use super::{PluginData, RequestPlugin};
use crate::logger::LoggedRequest;
use serde_json::Value;

/// Recognizes GitHub webhook deliveries by their `X-GitHub-Event` header.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitHubWebhookPlugin;

impl GitHubWebhookPlugin {
    /// GitHub posts JSON, or a `payload` form field when the hook is
    /// configured for form encoding.
    fn payload(logged: &LoggedRequest) -> Result<Value, String> {
        let is_form = logged
            .request
            .header("content-type")
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

        let parsed = if is_form {
            let form = logged.request.form_fields();
            let payload = form
                .get("payload")
                .ok_or_else(|| "form body has no payload field".to_string())?;
            serde_json::from_str(payload)
        } else {
            serde_json::from_slice(&logged.request.body)
        };

        parsed.map_err(|e| format!("Invalid JSON payload: {}", e))
    }
}

impl RequestPlugin for GitHubWebhookPlugin {
    fn id(&self) -> &str {
        "github_webhook"
    }

    fn title(&self) -> &str {
        "GitHub Webhook"
    }

    fn matches_request(&self, logged: &LoggedRequest) -> bool {
        logged.request.header("x-github-event").is_some()
    }

    fn plugin_data(&self, logged: &LoggedRequest) -> PluginData {
        let event = logged.request.header("x-github-event").unwrap_or("unknown");

        let payload = match Self::payload(logged) {
            Ok(payload) => payload,
            Err(message) => return PluginData::error(self.title(), message),
        };

        let action = payload.get("action").and_then(Value::as_str);
        let label = match action {
            Some(action) => format!("{}.{}", event, action),
            None => event.to_string(),
        };

        let mut data = PluginData::summary(self.title(), label).with_detail("event", event);
        if let Some(action) = action {
            data = data.with_detail("action", action);
        }
        if let Some(delivery) = logged.request.header("x-github-delivery") {
            data = data.with_detail("delivery", delivery);
        }
        if let Some(repo) = payload.pointer("/repository/full_name").and_then(Value::as_str) {
            data = data.with_detail("repository", repo);
        }
        if let Some(sender) = payload.pointer("/sender/login").and_then(Value::as_str) {
            data = data.with_detail("sender", sender);
        }
        data
    }
}
