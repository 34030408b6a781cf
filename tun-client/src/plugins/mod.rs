//! Request classification plugins.
//!
//! Every completed exchange is offered to the enabled plugins in registry
//! order; the first plugin that recognizes it produces the summary shown in
//! the request feed.

mod custom;
mod engine;
mod github_webhook;
mod magic_login;
mod registry;

pub use custom::{CustomPlugin, CustomPluginDefinition, LabelSource, PluginDefinitionError};
pub use engine::ClassificationEngine;
pub use github_webhook::GitHubWebhookPlugin;
pub use magic_login::MagicLoginPlugin;
pub use registry::{
    builtin_plugins, discover_custom_plugins, PluginConfigStore, PluginDescriptor, PluginRegistry,
};

use crate::logger::LoggedRequest;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A classifier for one recognizable kind of request.
pub trait RequestPlugin: Send + Sync {
    /// Stable identifier used in the enabled-plugin configuration.
    fn id(&self) -> &str;

    /// Human readable name shown next to the summary.
    fn title(&self) -> &str;

    /// Whether this plugin recognizes the exchange. Must not have side effects.
    fn matches_request(&self, logged: &LoggedRequest) -> bool;

    /// Summarize a matching exchange. Extraction failures are reported as
    /// [`PluginData::Error`] rather than propagated.
    fn plugin_data(&self, logged: &LoggedRequest) -> PluginData;
}

/// Where a plugin came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginOrigin {
    BuiltIn,
    Custom,
}

impl std::fmt::Display for PluginOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginOrigin::BuiltIn => write!(f, "built-in"),
            PluginOrigin::Custom => write!(f, "custom"),
        }
    }
}

/// Summary produced by a plugin for one exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PluginData {
    Summary {
        plugin: String,
        label: String,
        details: BTreeMap<String, Value>,
    },
    Error {
        plugin: String,
        message: String,
    },
}

impl PluginData {
    pub fn summary(plugin: impl Into<String>, label: impl Into<String>) -> Self {
        PluginData::Summary {
            plugin: plugin.into(),
            label: label.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn error(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        PluginData::Error {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// Add a detail entry. No-op on the error variant.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if let PluginData::Summary { details, .. } = &mut self {
            details.insert(key.into(), value.into());
        }
        self
    }

    /// Title of the plugin that produced this data.
    pub fn plugin(&self) -> &str {
        match self {
            PluginData::Summary { plugin, .. } | PluginData::Error { plugin, .. } => plugin,
        }
    }

    /// The summary label, if extraction succeeded.
    pub fn label(&self) -> Option<&str> {
        match self {
            PluginData::Summary { label, .. } => Some(label),
            PluginData::Error { .. } => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, PluginData::Error { .. })
    }
}
