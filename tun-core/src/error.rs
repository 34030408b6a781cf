//! Categorized errors for request mediation.
//!
//! Input and policy failures surface to the visitor as inline form errors,
//! plugin and discovery failures are isolated and logged. None of them are
//! fatal to the process; this type carries them with enough context to log.

use std::fmt;

/// Error categories for the mediation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed visitor input (email, cookie, form body).
    Input,
    /// The identity is not covered by the allow policy.
    Policy,
    /// A classifier plugin failed while matching or extracting.
    Plugin,
    /// A plugin definition could not be loaded.
    Discovery,
    /// Configuration could not be read or written.
    Configuration,
    /// The local service could not be reached.
    Upstream,
    /// Internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Input => write!(f, "input"),
            ErrorCategory::Policy => write!(f, "policy"),
            ErrorCategory::Plugin => write!(f, "plugin"),
            ErrorCategory::Discovery => write!(f, "discovery"),
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Upstream => write!(f, "upstream"),
            ErrorCategory::Internal => write!(f, "internal"),
        }
    }
}

/// A mediation error with category and context.
#[derive(Debug)]
pub struct MediationError {
    pub category: ErrorCategory,
    pub message: String,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Additional context as key-value pairs.
    pub context: Vec<(String, String)>,
}

impl MediationError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            cause: None,
            context: Vec::new(),
        }
    }

    /// Add an underlying cause.
    pub fn with_cause<E: std::error::Error + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Add context to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.push((key.into(), value.into()));
        self
    }

    /// Whether the error is caused by the visitor rather than the system.
    pub fn is_visitor_facing(&self) -> bool {
        matches!(self.category, ErrorCategory::Input | ErrorCategory::Policy)
    }

    /// HTTP status used when the error has to be answered directly.
    pub fn http_status(&self) -> u16 {
        match self.category {
            ErrorCategory::Input => 400,
            ErrorCategory::Policy => 401,
            ErrorCategory::Plugin => 500,
            ErrorCategory::Discovery => 500,
            ErrorCategory::Configuration => 500,
            ErrorCategory::Upstream => 502,
            ErrorCategory::Internal => 500,
        }
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Input, message)
    }

    pub fn policy(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Policy, message)
    }

    pub fn plugin(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Plugin, message)
    }

    pub fn discovery(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Discovery, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Configuration, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Upstream, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, message)
    }
}

impl fmt::Display for MediationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)?;

        if !self.context.is_empty() {
            write!(f, " (")?;
            for (i, (k, v)) in self.context.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}={}", k, v)?;
            }
            write!(f, ")")?;
        }

        if let Some(ref cause) = self.cause {
            write!(f, ": {}", cause)?;
        }

        Ok(())
    }
}

impl std::error::Error for MediationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

pub type MediationResult<T> = Result<T, MediationError>;

/// Helper trait for categorizing foreign errors.
pub trait ResultExt<T> {
    /// Wrap the error in `category` and attach a context pair.
    fn with_context(
        self,
        category: ErrorCategory,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> MediationResult<T>;

    /// Wrap the error in `category`.
    fn with_category(self, category: ErrorCategory) -> MediationResult<T>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for Result<T, E> {
    fn with_context(
        self,
        category: ErrorCategory,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> MediationResult<T> {
        self.map_err(|e| {
            MediationError::new(category, e.to_string())
                .with_cause(e)
                .with_context(key, value)
        })
    }

    fn with_category(self, category: ErrorCategory) -> MediationResult<T> {
        self.map_err(|e| MediationError::new(category, e.to_string()).with_cause(e))
    }
}
