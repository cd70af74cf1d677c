//! Service names and call URIs
//!
//! Service names are dot-separated segments: `com.webos.audio`
//! Each segment must match: [a-zA-Z0-9_-]+
//!
//! A call URI names a service and a method path:
//! - `luna://com.webos.audio/getVolume`
//! - `luna://com.webos.settingsservice/system/getSettings`
//!
//! The legacy `palm://` scheme is accepted as an alias.

use std::fmt;
use thiserror::Error;

const SCHEMES: [&str; 2] = ["luna://", "palm://"];

/// Valid characters for a name segment
fn is_valid_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Validate a single segment
fn is_valid_segment(s: &str) -> bool {
    !s.is_empty() && s.chars().all(is_valid_segment_char)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UriError {
    #[error("uri cannot be empty")]
    Empty,

    #[error("unsupported scheme in '{0}': expected luna://")]
    Scheme(String),

    #[error("invalid service name '{0}': segments must match [a-zA-Z0-9_-]+")]
    InvalidService(String),

    #[error("missing method in '{0}'")]
    MissingMethod(String),

    #[error("invalid method path '{0}'")]
    InvalidMethod(String),
}

/// Validate a service name such as `com.example.app-1234`
pub fn validate_service_name(name: &str) -> Result<(), UriError> {
    if name.is_empty() || !name.split('.').all(is_valid_segment) {
        return Err(UriError::InvalidService(name.to_string()));
    }
    Ok(())
}

/// A validated call URI
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceUri {
    /// Target service, e.g. "com.webos.audio"
    service: String,
    /// Method path including the leading slash, e.g. "/getVolume"
    method: String,
}

impl ServiceUri {
    /// Parse and validate a call URI
    pub fn parse(uri: &str) -> Result<Self, UriError> {
        if uri.is_empty() {
            return Err(UriError::Empty);
        }

        let rest = SCHEMES
            .iter()
            .find_map(|scheme| uri.strip_prefix(scheme))
            .ok_or_else(|| UriError::Scheme(uri.to_string()))?;

        let (service, method) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => return Err(UriError::MissingMethod(uri.to_string())),
        };

        validate_service_name(service)?;

        // method starts with '/'
        let path = &method[1..];
        if path.is_empty() {
            return Err(UriError::MissingMethod(uri.to_string()));
        }
        if !path.split('/').all(is_valid_segment) {
            return Err(UriError::InvalidMethod(method.to_string()));
        }

        Ok(Self {
            service: service.to_string(),
            method: method.to_string(),
        })
    }

    /// The target service name
    pub fn service(&self) -> &str {
        &self.service
    }

    /// The method path, including the leading slash
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Category part of the method path ("/" for top-level methods)
    pub fn category(&self) -> &str {
        match self.method.rfind('/') {
            Some(0) | None => "/",
            Some(idx) => &self.method[..idx],
        }
    }
}

impl fmt::Display for ServiceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "luna://{}{}", self.service, self.method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_parse_valid() {
        let uri = ServiceUri::parse("luna://com.webos.audio/getVolume").unwrap();
        assert_eq!(uri.service(), "com.webos.audio");
        assert_eq!(uri.method(), "/getVolume");
        assert_eq!(uri.category(), "/");

        let uri = ServiceUri::parse("luna://com.webos.settingsservice/system/getSettings").unwrap();
        assert_eq!(uri.method(), "/system/getSettings");
        assert_eq!(uri.category(), "/system");

        assert!(ServiceUri::parse("palm://com.palm.systemservice/time/getSystemTime").is_ok());
        assert!(ServiceUri::parse("luna://x/method").is_ok());
    }

    #[test]
    fn test_uri_parse_invalid() {
        assert_eq!(ServiceUri::parse(""), Err(UriError::Empty));
        assert!(matches!(ServiceUri::parse("http://x/method"), Err(UriError::Scheme(_))));
        assert!(matches!(ServiceUri::parse("luna://x"), Err(UriError::MissingMethod(_))));
        assert!(matches!(ServiceUri::parse("luna://x/"), Err(UriError::MissingMethod(_))));
        assert!(matches!(ServiceUri::parse("luna:///method"), Err(UriError::InvalidService(_))));
        assert!(matches!(ServiceUri::parse("luna://a..b/method"), Err(UriError::InvalidService(_))));
        assert!(matches!(ServiceUri::parse("luna://x/a//b"), Err(UriError::InvalidMethod(_))));
        assert!(matches!(ServiceUri::parse("luna://x/get volume"), Err(UriError::InvalidMethod(_))));
    }

    #[test]
    fn test_display_normalizes_scheme() {
        let uri = ServiceUri::parse("palm://com.palm.bus/signal/addmatch").unwrap();
        assert_eq!(uri.to_string(), "luna://com.palm.bus/signal/addmatch");
    }

    #[test]
    fn test_validate_service_name() {
        assert!(validate_service_name("com.example.test").is_ok());
        assert!(validate_service_name("com.example.test-4242").is_ok());
        assert!(validate_service_name("").is_err());
        assert!(validate_service_name("com..example").is_err());
        assert!(validate_service_name("com.example/test").is_err());
    }
}
