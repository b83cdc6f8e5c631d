//! REST failures and their retry classification

use lb_core::config::ErrorRuleConfig;
use lb_core::{CoreError, ObjectKind};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AviError>;

#[derive(Error, Debug)]
pub enum AviError {
    #[error(transparent)]
    Rest(#[from] RestError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Invalid error classification rule: {0}")]
    InvalidRule(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = AviError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            other => Err(AviError::InvalidRule(format!("unknown method {other}"))),
        }
    }
}

/// A failed call to the remote controller. `status` is None for transport
/// failures and timeouts.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("{method} {kind} {name} failed ({}): {message}", status.map(|s| s.to_string()).unwrap_or_else(|| "transport".to_string()))]
pub struct RestError {
    pub method: Method,
    pub kind: String,
    pub name: String,
    pub status: Option<u16>,
    pub message: String,
}

impl RestError {
    pub fn new(method: Method, kind: impl fmt::Display, name: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            method,
            kind: kind.to_string(),
            name: name.into(),
            status,
            message: message.into(),
        }
    }

    pub fn transport(method: Method, kind: ObjectKind, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(method, kind, name, None, message)
    }
}

/// What to do about a failed call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RetryClass {
    Fast,
    Slow,
    /// Reject the rules behind the failing object and never retry
    Permanent,
    /// Treat as success
    Ignore,
}

impl FromStr for RetryClass {
    type Err = AviError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(RetryClass::Fast),
            "slow" => Ok(RetryClass::Slow),
            "permanent" => Ok(RetryClass::Permanent),
            "ignore" => Ok(RetryClass::Ignore),
            other => Err(AviError::InvalidRule(format!("unknown class {other}"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum StatusMatch {
    Any,
    Code(u16),
    ServerError,
    Transport,
}

impl StatusMatch {
    fn matches(&self, status: Option<u16>) -> bool {
        match (self, status) {
            (StatusMatch::Any, _) => true,
            (StatusMatch::Code(c), Some(s)) => *c == s,
            (StatusMatch::ServerError, Some(s)) => (500..600).contains(&s),
            (StatusMatch::Transport, None) => true,
            _ => false,
        }
    }
}

#[derive(Clone, Debug)]
struct ErrorRule {
    status: StatusMatch,
    method: Option<Method>,
    /// Any one of these must appear in the message; empty matches everything
    messages: Vec<String>,
    class: RetryClass,
}

impl ErrorRule {
    fn new(status: StatusMatch, class: RetryClass) -> Self {
        Self {
            status,
            method: None,
            messages: Vec::new(),
            class,
        }
    }

    fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    fn containing(mut self, messages: &[&str]) -> Self {
        self.messages = messages.iter().map(|m| m.to_string()).collect();
        self
    }

    fn matches(&self, err: &RestError) -> bool {
        self.status.matches(err.status)
            && self.method.map(|m| m == err.method).unwrap_or(true)
            && (self.messages.is_empty() || self.messages.iter().any(|m| err.message.contains(m.as_str())))
    }
}

/// Ordered classification table; the first matching rule wins
#[derive(Clone, Debug)]
pub struct ErrorClassifier {
    rules: Vec<ErrorRule>,
}

impl ErrorClassifier {
    pub fn defaults() -> Self {
        let mut rules = vec![
            ErrorRule::new(StatusMatch::Code(404), RetryClass::Ignore).method(Method::Delete),
            ErrorRule::new(StatusMatch::Code(400), RetryClass::Slow).containing(&[
                "No free IP",
                "VrfContext not found",
                "Network not found",
            ]),
            ErrorRule::new(StatusMatch::Code(403), RetryClass::Slow).containing(&["upgrade"]),
        ];
        for code in [401, 404, 408, 409] {
            rules.push(ErrorRule::new(StatusMatch::Code(code), RetryClass::Fast));
        }
        rules.push(ErrorRule::new(StatusMatch::ServerError, RetryClass::Fast));
        rules.push(ErrorRule::new(StatusMatch::Transport, RetryClass::Slow));
        Self { rules }
    }

    /// The built-in table with configured rules evaluated first
    pub fn with_overrides(overrides: &[ErrorRuleConfig]) -> Result<Self> {
        let mut rules = Vec::with_capacity(overrides.len());
        for config in overrides {
            rules.push(ErrorRule {
                status: config.status.map(StatusMatch::Code).unwrap_or(StatusMatch::Any),
                method: config.method.as_deref().map(str::parse).transpose()?,
                messages: config.message_contains.iter().cloned().collect(),
                class: config.class.parse()?,
            });
        }
        rules.extend(Self::defaults().rules);
        Ok(Self { rules })
    }

    pub fn classify(&self, err: &RestError) -> RetryClass {
        self.rules
            .iter()
            .find(|r| r.matches(err))
            .map(|r| r.class)
            .unwrap_or(RetryClass::Permanent)
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(method: Method, status: Option<u16>, message: &str) -> RestError {
        RestError::new(method, ObjectKind::Pool, "pool-a", status, message)
    }

    #[test]
    fn test_default_table() {
        let c = ErrorClassifier::defaults();
        assert_eq!(c.classify(&err(Method::Delete, Some(404), "not found")), RetryClass::Ignore);
        assert_eq!(c.classify(&err(Method::Put, Some(404), "not found")), RetryClass::Fast);
        assert_eq!(c.classify(&err(Method::Post, Some(400), "No free IP available")), RetryClass::Slow);
        assert_eq!(c.classify(&err(Method::Post, Some(400), "Cannot find object")), RetryClass::Permanent);
        assert_eq!(c.classify(&err(Method::Put, Some(403), "upgrade in progress")), RetryClass::Slow);
        assert_eq!(c.classify(&err(Method::Put, Some(403), "forbidden")), RetryClass::Permanent);
        assert_eq!(c.classify(&err(Method::Post, Some(503), "unavailable")), RetryClass::Fast);
        assert_eq!(c.classify(&err(Method::Post, Some(409), "conflict")), RetryClass::Fast);
        assert_eq!(c.classify(&err(Method::Get, None, "timed out")), RetryClass::Slow);
        assert_eq!(c.classify(&err(Method::Post, Some(412), "precondition")), RetryClass::Permanent);
    }

    #[test]
    fn test_configured_rules_run_first() {
        let overrides = vec![ErrorRuleConfig {
            status: Some(412),
            method: None,
            message_contains: None,
            class: "fast".to_string(),
        }];
        let c = ErrorClassifier::with_overrides(&overrides).unwrap();
        assert_eq!(c.classify(&err(Method::Put, Some(412), "precondition")), RetryClass::Fast);
        assert_eq!(c.classify(&err(Method::Delete, Some(404), "gone")), RetryClass::Ignore);
    }

    #[test]
    fn test_invalid_override_is_an_error() {
        let overrides = vec![ErrorRuleConfig {
            class: "sometimes".to_string(),
            ..Default::default()
        }];
        assert!(ErrorClassifier::with_overrides(&overrides).is_err());
    }

    #[test]
    fn test_display_names_the_object() {
        let e = err(Method::Post, Some(400), "bad");
        assert_eq!(e.to_string(), "POST pool pool-a failed (400): bad");
    }
}
