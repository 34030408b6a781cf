//! Plugin discovery and the enabled-plugin set.

use super::{
    CustomPlugin, GitHubWebhookPlugin, MagicLoginPlugin, PluginOrigin, RequestPlugin,
};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tun_core::error::{MediationError, MediationResult};

/// Persists the enabled-plugin list.
pub trait PluginConfigStore: Send + Sync {
    fn save_enabled_plugins(&self, ids: &[String]) -> MediationResult<()>;
}

/// The plugins compiled into the client.
pub fn builtin_plugins() -> Vec<Arc<dyn RequestPlugin>> {
    vec![Arc::new(MagicLoginPlugin), Arc::new(GitHubWebhookPlugin)]
}

/// Load every valid `*.json` definition in `dir`, in file name order.
///
/// Files that fail to load are logged and skipped. A missing directory
/// yields no plugins.
pub fn discover_custom_plugins(dir: &Path) -> Vec<Arc<dyn RequestPlugin>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("No custom plugins loaded from {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let mut plugins: Vec<Arc<dyn RequestPlugin>> = Vec::new();
    for path in files {
        match CustomPlugin::from_file(&path) {
            Ok(plugin) => {
                debug!("Loaded custom plugin '{}' from {}", plugin.id(), path.display());
                plugins.push(Arc::new(plugin));
            }
            Err(e) => {
                let fault = MediationError::discovery("Skipping plugin file")
                    .with_context("path", path.display().to_string())
                    .with_cause(e);
                warn!("{}", fault);
            }
        }
    }
    plugins
}

/// Public view of a registered plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginDescriptor {
    pub id: String,
    pub title: String,
    pub origin: PluginOrigin,
    pub enabled: bool,
}

struct RegisteredPlugin {
    plugin: Arc<dyn RequestPlugin>,
    origin: PluginOrigin,
}

/// Ordered set of known plugins: built-ins first, then custom plugins, each
/// group sorted by id.
pub struct PluginRegistry {
    plugins: Vec<RegisteredPlugin>,
    enabled: HashSet<String>,
    store: Option<Arc<dyn PluginConfigStore>>,
}

impl PluginRegistry {
    /// Build a registry from candidate plugins.
    ///
    /// `configured` is the persisted enabled list; ids that do not resolve
    /// to an admitted plugin are dropped. `None` enables every built-in.
    pub fn new(
        builtins: Vec<Arc<dyn RequestPlugin>>,
        custom: Vec<Arc<dyn RequestPlugin>>,
        configured: Option<&[String]>,
    ) -> Self {
        let mut plugins: Vec<RegisteredPlugin> = Vec::new();
        let mut seen = HashSet::new();

        for (group, origin) in [(builtins, PluginOrigin::BuiltIn), (custom, PluginOrigin::Custom)] {
            let mut group: Vec<_> = group.into_iter().filter(|p| admissible(&**p)).collect();
            group.sort_by(|a, b| a.id().cmp(b.id()));

            for plugin in group {
                if !seen.insert(plugin.id().to_string()) {
                    warn!("Ignoring {} plugin with duplicate id '{}'", origin, plugin.id());
                    continue;
                }
                plugins.push(RegisteredPlugin { plugin, origin });
            }
        }

        let enabled = match configured {
            Some(ids) => {
                for id in ids.iter().filter(|id| !seen.contains(id.as_str())) {
                    warn!("Configured plugin '{}' is not available; dropping it", id);
                }
                ids.iter()
                    .filter(|id| seen.contains(id.as_str()))
                    .cloned()
                    .collect()
            }
            None => plugins
                .iter()
                .filter(|p| p.origin == PluginOrigin::BuiltIn)
                .map(|p| p.plugin.id().to_string())
                .collect(),
        };

        Self {
            plugins,
            enabled,
            store: None,
        }
    }

    /// Discover built-ins and the definitions in `custom_dir`.
    pub fn discover(custom_dir: Option<&Path>, configured: Option<&[String]>) -> Self {
        let custom = custom_dir.map(discover_custom_plugins).unwrap_or_default();
        let registry = Self::new(builtin_plugins(), custom, configured);
        info!(
            "Loaded {} request plugins ({} enabled)",
            registry.plugins.len(),
            registry.enabled.len()
        );
        registry
    }

    /// Persist enabled-list changes through `store`.
    pub fn with_store(mut self, store: Arc<dyn PluginConfigStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Every admitted plugin, in registry order.
    pub fn all(&self) -> Vec<PluginDescriptor> {
        self.plugins.iter().map(|p| self.describe(p)).collect()
    }

    /// The enabled plugins, in registry order.
    pub fn enabled(&self) -> Vec<PluginDescriptor> {
        self.plugins
            .iter()
            .filter(|p| self.enabled.contains(p.plugin.id()))
            .map(|p| self.describe(p))
            .collect()
    }

    /// Ids of the enabled plugins, in registry order.
    pub fn enabled_ids(&self) -> Vec<String> {
        self.enabled().into_iter().map(|d| d.id).collect()
    }

    /// The enabled plugin instances, in registry order.
    pub fn enabled_plugins(&self) -> impl Iterator<Item = &Arc<dyn RequestPlugin>> + '_ {
        self.plugins
            .iter()
            .filter(|p| self.enabled.contains(p.plugin.id()))
            .map(|p| &p.plugin)
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.enabled.contains(id)
    }

    /// Whether `id` names an admitted plugin.
    pub fn contains(&self, id: &str) -> bool {
        self.plugins.iter().any(|p| p.plugin.id() == id)
    }

    /// Replace the enabled set and persist it.
    ///
    /// Unknown ids are dropped. The in-memory set only changes once the
    /// store accepted the new list. Returns the list that was persisted.
    pub fn modify_plugin_configuration(&mut self, ids: &[String]) -> MediationResult<Vec<String>> {
        let mut accepted: Vec<String> = Vec::new();
        for id in ids {
            if !self.contains(id) {
                warn!("Cannot enable unknown plugin '{}'", id);
            } else if !accepted.contains(id) {
                accepted.push(id.clone());
            }
        }

        if let Some(store) = &self.store {
            store.save_enabled_plugins(&accepted)?;
        }

        self.enabled = accepted.iter().cloned().collect();
        info!("Enabled request plugins: {:?}", accepted);
        Ok(accepted)
    }

    fn describe(&self, registered: &RegisteredPlugin) -> PluginDescriptor {
        let id = registered.plugin.id().to_string();
        PluginDescriptor {
            enabled: self.enabled.contains(&id),
            title: registered.plugin.title().to_string(),
            origin: registered.origin,
            id,
        }
    }
}

/// Plugins must carry a usable id and title to be addressable.
fn admissible(plugin: &dyn RequestPlugin) -> bool {
    if plugin.id().trim().is_empty() || plugin.title().trim().is_empty() {
        warn!("Ignoring plugin without id or title");
        return false;
    }
    true
}
