use super::{PluginData, RequestPlugin};
use crate::gate::LOGIN_PATH;
use crate::logger::LoggedRequest;
use tun_core::protocol::HttpMethod;

/// Recognizes submissions of the magic auth login form.
#[derive(Debug, Clone, Copy, Default)]
pub struct MagicLoginPlugin;

impl RequestPlugin for MagicLoginPlugin {
    fn id(&self) -> &str {
        "magic_login"
    }

    fn title(&self) -> &str {
        "Magic Login"
    }

    fn matches_request(&self, logged: &LoggedRequest) -> bool {
        logged.request.method == HttpMethod::Post && logged.request.uri.contains(LOGIN_PATH)
    }

    fn plugin_data(&self, logged: &LoggedRequest) -> PluginData {
        let form = logged.request.form_fields();
        let email = form
            .get("email")
            .map(String::as_str)
            .unwrap_or("Unknown");

        PluginData::summary(self.title(), email)
            .with_detail("email", email)
            .with_detail("type", "magic_login")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tun_core::protocol::HttpRequestData;

    fn logged(method: HttpMethod, uri: &str, body: &str) -> LoggedRequest {
        LoggedRequest::new("req", HttpRequestData::new(method, uri).with_body(body))
    }

    #[test]
    fn test_matches_login_post_only() {
        let plugin = MagicLoginPlugin;
        assert!(plugin.matches_request(&logged(HttpMethod::Post, LOGIN_PATH, "")));
        assert!(plugin.matches_request(&logged(
            HttpMethod::Post,
            "/__expose_magic_login?next=1",
            ""
        )));
        assert!(!plugin.matches_request(&logged(HttpMethod::Get, LOGIN_PATH, "")));
        assert!(!plugin.matches_request(&logged(HttpMethod::Post, "/login", "")));
    }

    #[test]
    fn test_label_is_submitted_email() {
        let data = MagicLoginPlugin.plugin_data(&logged(HttpMethod::Post, LOGIN_PATH, "email=a@b.com"));
        assert_eq!(data.label(), Some("a@b.com"));
        assert_eq!(data.plugin(), "Magic Login");
        if let PluginData::Summary { details, .. } = data {
            assert_eq!(details["email"], "a@b.com");
            assert_eq!(details["type"], "magic_login");
        }
    }

    #[test]
    fn test_missing_email_is_unknown() {
        let data = MagicLoginPlugin.plugin_data(&logged(HttpMethod::Post, LOGIN_PATH, "redirect_url=/"));
        assert_eq!(data.label(), Some("Unknown"));
    }
}
