//! Magic authentication gate.
//!
//! When an allow policy is configured, every request coming through the
//! tunnel must carry a valid session cookie. Visitors without one get an
//! email form; submitting an allowed address mints the cookie and redirects
//! back to the page they asked for. The gate keeps no state between
//! requests: it can be rebuilt from [`GateConfig`] alone.

mod channel;
mod login_page;

pub use channel::{ChannelClosed, ProxyChannel, ResponseLog, ResponseSlot};
pub use login_page::{escape_html, LoginPageRenderer, MagicLoginPage};

use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};
use tun_core::allowlist;
use tun_core::auth::{generate_secret, SignedCookieCodec};
use tun_core::error::MediationError;
use tun_core::protocol::{HttpMethod, HttpRequestData, HttpResponseData};

/// Name of the session cookie.
pub const COOKIE_NAME: &str = "expose_magic_auth";
/// Reserved path the login form posts to.
pub const LOGIN_PATH: &str = "/__expose_magic_login";
/// Header carrying the correlation id assigned by the request logger.
pub const REQUEST_ID_HEADER: &str = "x-expose-request-id";

pub const INVALID_EMAIL_MESSAGE: &str = "Please enter a valid email address.";
pub const NOT_AUTHORIZED_MESSAGE: &str =
    "This email address is not authorized to access this site.";
const SIGNING_FAILED_MESSAGE: &str = "We could not sign you in. Please try again.";

const EMAIL_PATTERN: &str = r"^[A-Za-z0-9!#$%&'*+/=?^_`{}~-]+(?:\.[A-Za-z0-9!#$%&'*+/=?^_`{}~-]+)*@(?:[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?\.)+[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?$";

/// Gate settings. Immutable for the life of the process.
#[derive(Clone)]
pub struct GateConfig {
    /// Whether visitors must authenticate.
    pub required: bool,
    /// Allowed addresses or `@domain` suffixes. Empty admits any address.
    pub allowed_patterns: Vec<String>,
    secret_key: Vec<u8>,
}

impl std::fmt::Debug for GateConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateConfig")
            .field("required", &self.required)
            .field("allowed_patterns", &self.allowed_patterns)
            .finish_non_exhaustive()
    }
}

impl GateConfig {
    /// Build from the comma separated `magic_auth` policy.
    ///
    /// `None` disables the gate. `Some("")` still requires a login but
    /// admits every valid address.
    pub fn from_policy(policy: Option<&str>) -> Self {
        Self {
            required: policy.is_some(),
            allowed_patterns: policy.map(allowlist::parse_patterns).unwrap_or_default(),
            secret_key: generate_secret(),
        }
    }

    /// A gate that lets everything through.
    pub fn disabled() -> Self {
        Self::from_policy(None)
    }

    /// Use a fixed secret instead of the generated one.
    pub fn with_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.secret_key = secret.into();
        self
    }
}

/// Which branch of the gate handled a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Passthrough,
    LoginSubmit,
    Challenge,
}

/// Outcome of evaluating a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Forward the request to the local service unchanged.
    Forward,
    /// Answer the request directly; it must not be forwarded.
    Respond {
        state: GateState,
        response: HttpResponseData,
    },
}

impl GateDecision {
    pub fn state(&self) -> GateState {
        match self {
            GateDecision::Forward => GateState::Passthrough,
            GateDecision::Respond { state, .. } => *state,
        }
    }
}

/// The magic auth gate.
pub struct AuthGate {
    config: GateConfig,
    codec: SignedCookieCodec,
    renderer: Arc<dyn LoginPageRenderer>,
    response_log: Option<Arc<dyn ResponseLog>>,
}

impl AuthGate {
    /// Create a gate with the built-in login page and no response log.
    pub fn new(config: GateConfig) -> Self {
        let codec = SignedCookieCodec::new(&config.secret_key);
        Self {
            config,
            codec,
            renderer: Arc::new(MagicLoginPage),
            response_log: None,
        }
    }

    /// Replace the login page renderer.
    pub fn with_renderer(mut self, renderer: Arc<dyn LoginPageRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Record synthesized responses against their correlation id.
    pub fn with_response_log(mut self, log: Arc<dyn ResponseLog>) -> Self {
        self.response_log = Some(log);
        self
    }

    pub fn is_required(&self) -> bool {
        self.config.required
    }

    /// The codec used to mint and check session cookies.
    pub fn codec(&self) -> &SignedCookieCodec {
        &self.codec
    }

    /// Run the gate for one inbound request.
    ///
    /// Returns the request when it should be forwarded. Returns `None` when
    /// the gate answered on `channel` itself; the channel is closed by then.
    /// Without a channel there is no way to answer, so the request passes.
    pub fn handle(
        &self,
        request: HttpRequestData,
        channel: Option<&dyn ProxyChannel>,
    ) -> Option<HttpRequestData> {
        let Some(channel) = channel else {
            return Some(request);
        };

        match self.evaluate(&request) {
            GateDecision::Forward => Some(request),
            GateDecision::Respond { state, response } => {
                debug!(
                    "Magic auth {:?} answered {} {} with {}",
                    state,
                    request.method,
                    request.path(),
                    response.status
                );
                self.deliver(&request, channel, &response);
                None
            }
        }
    }

    /// Decide what to do with a request without delivering anything.
    pub fn evaluate(&self, request: &HttpRequestData) -> GateDecision {
        if !self.config.required {
            return GateDecision::Forward;
        }

        if is_login_submission(request) {
            return GateDecision::Respond {
                state: GateState::LoginSubmit,
                response: self.login_submission(request),
            };
        }

        if self.has_valid_cookie(request) {
            return GateDecision::Forward;
        }

        GateDecision::Respond {
            state: GateState::Challenge,
            response: self.challenge(request, None, None),
        }
    }

    fn login_submission(&self, request: &HttpRequestData) -> HttpResponseData {
        let form = request.form_fields();
        let email = form.get("email").map(|e| e.trim()).unwrap_or("");
        let redirect_url = safe_redirect(form.get("redirect_url").map(String::as_str));

        if !is_valid_email(email) {
            let rejection = MediationError::input(INVALID_EMAIL_MESSAGE);
            return self.reject(request, &rejection, redirect_url);
        }

        if !allowlist::is_allowed(email, &self.config.allowed_patterns) {
            let rejection = MediationError::policy(NOT_AUTHORIZED_MESSAGE).with_context("email", email);
            return self.reject(request, &rejection, redirect_url);
        }

        let token = match self.codec.encode(email) {
            Ok(token) => token,
            Err(e) => {
                let failure = MediationError::internal("Failed to sign session cookie").with_cause(e);
                return self.reject(request, &failure, redirect_url);
            }
        };

        debug!("Magic auth login accepted for {}", email);
        HttpResponseData::new(302)
            .with_header("Location", redirect_url)
            .with_header(
                "Set-Cookie",
                format!(
                    "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
                    COOKIE_NAME,
                    token,
                    self.codec.lifetime_secs()
                ),
            )
            .with_header("Content-Length", "0")
    }

    /// Re-render the form for a failed login. Only visitor-caused failures
    /// show their own message.
    fn reject(
        &self,
        request: &HttpRequestData,
        error: &MediationError,
        redirect_url: &str,
    ) -> HttpResponseData {
        if error.is_visitor_facing() {
            debug!("Rejected login: {}", error);
            self.challenge(request, Some(&error.message), Some(redirect_url))
        } else {
            warn!("Login failed: {}", error);
            self.challenge(request, Some(SIGNING_FAILED_MESSAGE), Some(redirect_url))
        }
    }

    fn has_valid_cookie(&self, request: &HttpRequestData) -> bool {
        let Some(value) = request.cookie(COOKIE_NAME).filter(|v| !v.is_empty()) else {
            return false;
        };

        match self.codec.decode(&value) {
            Ok(cookie) => {
                debug!("Session cookie accepted for {}", cookie.identity);
                true
            }
            Err(e) => {
                debug!("Session cookie rejected: {}", e);
                false
            }
        }
    }

    fn challenge(
        &self,
        request: &HttpRequestData,
        error: Option<&str>,
        redirect_url: Option<&str>,
    ) -> HttpResponseData {
        let mut target = redirect_url.unwrap_or_else(|| request.path()).to_string();
        if let Some(query) = request.query() {
            target.push('?');
            target.push_str(query);
        }

        let html = self.renderer.render(error, &target);
        HttpResponseData::new(401)
            .with_header("Content-Type", "text/html; charset=UTF-8")
            .with_header("Content-Length", html.len().to_string())
            .with_body(html)
    }

    fn deliver(
        &self,
        request: &HttpRequestData,
        channel: &dyn ProxyChannel,
        response: &HttpResponseData,
    ) {
        let raw = response.to_raw();

        if let (Some(request_id), Some(log)) =
            (request.header(REQUEST_ID_HEADER), &self.response_log)
        {
            log.log_response_by_id(request_id, &raw);
        }

        if let Err(e) = channel.send(&raw) {
            debug!("Could not deliver magic auth response: {}", e);
        }
        channel.close();
    }
}

fn is_login_submission(request: &HttpRequestData) -> bool {
    request.method == HttpMethod::Post && request.path() == LOGIN_PATH
}

/// Keep post-login redirects on the shared site.
///
/// Unlike a verbatim echo of `redirect_url`, a rejected target is replaced
/// by `/` both in the redirect and in a re-rendered form. Targets carrying
/// control characters are rejected so they cannot split the `Location`
/// header.
fn safe_redirect(target: Option<&str>) -> &str {
    match target {
        Some(t)
            if t.starts_with('/')
                && !t.starts_with("//")
                && !t.starts_with("/\\")
                && !t.chars().any(char::is_control) =>
        {
            t
        }
        _ => "/",
    }
}

/// Syntactic email check. `|` is never accepted; it delimits cookie fields.
pub fn is_valid_email(email: &str) -> bool {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();

    if email.len() > 254 {
        return false;
    }
    match email.rsplit_once('@') {
        Some((local, _)) if local.len() <= 64 => {}
        _ => return false,
    }

    EMAIL
        .get_or_init(|| Regex::new(EMAIL_PATTERN).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(email))
}
