//! HTTP methods accepted by the handler adapter.

use std::fmt;
use std::str::FromStr;

/// The closed set of HTTP verbs an endpoint may declare.
///
/// Anything outside this set is rejected at registration time, never at
/// request time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Method {
    /// Read method: handler receives the query map only.
    Get,
    /// Mutating method: handler receives the body, then the query map.
    Post,
    /// Mutating method: handler receives the body, then the query map.
    Patch,
    /// Mutating method: handler receives the body, then the query map.
    Put,
}

/// Raised when an endpoint declares a verb outside GET/POST/PATCH/PUT.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported method: {method}")]
pub struct UnsupportedMethodError {
    /// The verb exactly as it was declared.
    pub method: String,
}

impl Method {
    /// All supported methods, in declaration order.
    pub const ALL: [Method; 4] = [Method::Get, Method::Post, Method::Patch, Method::Put];

    /// Returns the wire representation (`"GET"`, `"POST"`, ...).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Put => "PUT",
        }
    }

    /// Whether requests with this method carry a body that is handed to the handler.
    #[must_use]
    pub fn is_mutating(self) -> bool {
        !matches!(self, Method::Get)
    }
}

impl FromStr for Method {
    type Err = UnsupportedMethodError;

    /// Parses a verb as it appears on the wire. Matching is case-sensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PATCH" => Ok(Method::Patch),
            "PUT" => Ok(Method::Put),
            other => Err(UnsupportedMethodError {
                method: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_verbs() {
        for method in Method::ALL {
            assert_eq!(method.as_str().parse::<Method>(), Ok(method));
        }
    }

    #[test]
    fn rejects_delete() {
        let err = "DELETE".parse::<Method>().unwrap_err();
        assert_eq!(err.method, "DELETE");
        assert_eq!(err.to_string(), "unsupported method: DELETE");
    }

    #[test]
    fn parsing_is_case_sensitive() {
        assert!("get".parse::<Method>().is_err());
        assert!("Post".parse::<Method>().is_err());
    }

    #[test]
    fn only_get_is_read_only() {
        assert!(!Method::Get.is_mutating());
        assert!(Method::Post.is_mutating());
        assert!(Method::Patch.is_mutating());
        assert!(Method::Put.is_mutating());
    }
}
