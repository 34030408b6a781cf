use super::{PluginData, PluginRegistry, RequestPlugin};
use crate::logger::LoggedRequest;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};
use tun_core::error::MediationError;

/// Runs enabled plugins against completed exchanges.
///
/// A plugin that panics is contained: a panicking predicate is treated as
/// "no match" and a panicking extractor yields [`PluginData::Error`].
#[derive(Clone)]
pub struct ClassificationEngine {
    registry: Arc<RwLock<PluginRegistry>>,
}

impl ClassificationEngine {
    pub fn new(registry: PluginRegistry) -> Self {
        Self::from_registry(Arc::new(RwLock::new(registry)))
    }

    /// Share a registry with other holders, e.g. a settings surface.
    pub fn from_registry(registry: Arc<RwLock<PluginRegistry>>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> RwLockReadGuard<'_, PluginRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn registry_mut(&self) -> RwLockWriteGuard<'_, PluginRegistry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Summary from the first enabled plugin that recognizes the exchange.
    pub fn classify(&self, logged: &LoggedRequest) -> Option<PluginData> {
        let registry = self.registry();

        for plugin in registry.enabled_plugins() {
            let matched = catch_unwind(AssertUnwindSafe(|| plugin.matches_request(logged)));
            match matched {
                Ok(true) => {
                    debug!("Request {} classified by '{}'", logged.id, plugin.id());
                    return Some(extract(&**plugin, logged));
                }
                Ok(false) => {}
                Err(panic) => warn!("{}", plugin_fault(&**plugin, logged, "matching", &*panic)),
            }
        }
        None
    }
}

fn extract(plugin: &dyn RequestPlugin, logged: &LoggedRequest) -> PluginData {
    match catch_unwind(AssertUnwindSafe(|| plugin.plugin_data(logged))) {
        Ok(data) => data,
        Err(panic) => {
            let fault = plugin_fault(plugin, logged, "summarizing", &*panic);
            warn!("{}", fault);
            PluginData::error(plugin.title(), fault.message)
        }
    }
}

fn plugin_fault(
    plugin: &dyn RequestPlugin,
    logged: &LoggedRequest,
    stage: &str,
    panic: &(dyn Any + Send),
) -> MediationError {
    MediationError::plugin(panic_message(panic))
        .with_context("plugin", plugin.id())
        .with_context("stage", stage)
        .with_context("request", logged.id.as_str())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "plugin panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::LOGIN_PATH;
    use crate::plugins::builtin_plugins;
    use tun_core::protocol::{HttpMethod, HttpRequestData};

    struct Fixed {
        id: &'static str,
        matches: bool,
    }

    impl RequestPlugin for Fixed {
        fn id(&self) -> &str {
            self.id
        }
        fn title(&self) -> &str {
            self.id
        }
        fn matches_request(&self, _: &LoggedRequest) -> bool {
            self.matches
        }
        fn plugin_data(&self, _: &LoggedRequest) -> PluginData {
            PluginData::summary(self.id, self.id)
        }
    }

    struct PanicsOnMatch;

    impl RequestPlugin for PanicsOnMatch {
        fn id(&self) -> &str {
            "a_panics"
        }
        fn title(&self) -> &str {
            "Panics"
        }
        fn matches_request(&self, _: &LoggedRequest) -> bool {
            panic!("predicate exploded")
        }
        fn plugin_data(&self, _: &LoggedRequest) -> PluginData {
            unreachable!()
        }
    }

    struct PanicsOnExtract;

    impl RequestPlugin for PanicsOnExtract {
        fn id(&self) -> &str {
            "extract_panics"
        }
        fn title(&self) -> &str {
            "Extract Panics"
        }
        fn matches_request(&self, _: &LoggedRequest) -> bool {
            true
        }
        fn plugin_data(&self, _: &LoggedRequest) -> PluginData {
            panic!("extractor exploded")
        }
    }

    fn request() -> LoggedRequest {
        LoggedRequest::new("req-1", HttpRequestData::new(HttpMethod::Get, "/"))
    }

    fn all_enabled(builtins: Vec<Arc<dyn RequestPlugin>>) -> ClassificationEngine {
        ClassificationEngine::new(PluginRegistry::new(builtins, Vec::new(), None))
    }

    #[test]
    fn test_first_match_wins() {
        let engine = all_enabled(vec![
            Arc::new(Fixed { id: "c_second", matches: true }),
            Arc::new(Fixed { id: "a_miss", matches: false }),
            Arc::new(Fixed { id: "b_first", matches: true }),
        ]);
        let data = engine.classify(&request()).unwrap();
        assert_eq!(data.label(), Some("b_first"));
    }

    #[test]
    fn test_no_match() {
        let engine = all_enabled(vec![Arc::new(Fixed { id: "miss", matches: false })]);
        assert!(engine.classify(&request()).is_none());
    }

    #[test]
    fn test_disabled_plugins_not_consulted() {
        let enabled = vec!["b".to_string()];
        let registry = PluginRegistry::new(
            vec![
                Arc::new(Fixed { id: "a", matches: true }),
                Arc::new(Fixed { id: "b", matches: true }),
            ],
            Vec::new(),
            Some(&enabled),
        );
        let engine = ClassificationEngine::new(registry);
        assert_eq!(engine.classify(&request()).unwrap().label(), Some("b"));
    }

    #[test]
    fn test_panicking_predicate_is_skipped() {
        let engine = all_enabled(vec![
            Arc::new(PanicsOnMatch),
            Arc::new(Fixed { id: "b_next", matches: true }),
        ]);
        let data = engine.classify(&request()).unwrap();
        assert_eq!(data.label(), Some("b_next"));
    }

    #[test]
    fn test_panicking_extractor_reports_error() {
        let engine = all_enabled(vec![Arc::new(PanicsOnExtract)]);
        let data = engine.classify(&request()).unwrap();
        assert_eq!(
            data,
            PluginData::error("Extract Panics", "extractor exploded")
        );
    }

    #[test]
    fn test_plugin_fault_carries_context() {
        let panic: Box<dyn Any + Send> = Box::new("predicate exploded");
        let fault = plugin_fault(&PanicsOnMatch, &request(), "matching", &*panic);

        assert_eq!(fault.category, tun_core::error::ErrorCategory::Plugin);
        assert!(!fault.is_visitor_facing());
        assert_eq!(
            fault.to_string(),
            "[plugin] predicate exploded (plugin=a_panics, stage=matching, request=req-1)"
        );
    }

    #[test]
    fn test_magic_login_classification() {
        let engine = all_enabled(builtin_plugins());
        let logged = LoggedRequest::new(
            "req-2",
            HttpRequestData::new(HttpMethod::Post, LOGIN_PATH).with_body("email=a@b.com&redirect_url=/"),
        );
        let data = engine.classify(&logged).unwrap();
        assert_eq!(data.plugin(), "Magic Login");
        assert_eq!(data.label(), Some("a@b.com"));
    }

    #[test]
    fn test_registry_updates_are_visible() {
        let engine = all_enabled(builtin_plugins());
        let logged = LoggedRequest::new(
            "req-3",
            HttpRequestData::new(HttpMethod::Post, LOGIN_PATH).with_body("email=a@b.com"),
        );
        engine
            .registry_mut()
            .modify_plugin_configuration(&["github_webhook".to_string()])
            .unwrap();
        assert!(engine.classify(&logged).is_none());
    }
}
