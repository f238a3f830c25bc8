//! Per-request data as seen by the adapter and by handlers.
//!
//! The transport hands the adapter a [`RawRequest`]; the adapter turns it
//! into a [`RequestContext`] immediately before invoking the handler. Handlers
//! answer with a transport-neutral [`Reply`].

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::method::Method;

/// Parsed query-string parameters. `BTreeMap` keeps iteration deterministic.
pub type QueryMap = BTreeMap<String, String>;

/// Raw request data captured by the transport before adaptation.
#[derive(Debug, Clone, Default)]
pub struct RawRequest {
    /// The query string without the leading `?`, if the URI had one.
    pub query: Option<String>,
    /// The undecoded request body. Empty for requests without one.
    pub body: Bytes,
}

impl RawRequest {
    /// Creates a raw request from an optional query string and body bytes.
    #[must_use]
    pub fn new(query: Option<String>, body: impl Into<Bytes>) -> Self {
        Self {
            query,
            body: body.into(),
        }
    }
}

/// Errors produced while turning a [`RawRequest`] into a [`RequestContext`].
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("request body is not valid UTF-8: {0}")]
    InvalidBody(#[from] std::str::Utf8Error),
}

/// Handler-ready view of a single request.
///
/// Created fresh per invocation and moved into the handler; never shared
/// between requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Parsed query parameters. Empty when the request had no query string.
    pub query: QueryMap,
    /// Decoded body text. Present only for mutating methods.
    pub body: Option<String>,
}

impl RequestContext {
    /// Builds the context for `method` from raw transport data.
    ///
    /// Read methods never look at the body. Mutating methods always get a
    /// body, which is the empty string when the request had none.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::InvalidBody`] if a mutating request's body is
    /// not valid UTF-8.
    pub fn from_raw(method: Method, raw: &RawRequest) -> Result<Self, RequestError> {
        let query = parse_query(raw.query.as_deref().unwrap_or_default());
        let body = if method.is_mutating() {
            Some(std::str::from_utf8(&raw.body)?.to_owned())
        } else {
            None
        };
        Ok(Self { query, body })
    }
}

/// Parses an `application/x-www-form-urlencoded` query string.
///
/// When a key repeats, the first value wins.
#[must_use]
pub fn parse_query(query: &str) -> QueryMap {
    let mut params = QueryMap::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        params
            .entry(key.into_owned())
            .or_insert_with(|| value.into_owned());
    }
    params
}

/// Transport-neutral handler result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// HTTP status code.
    pub status: u16,
    /// Value of the `Content-Type` header.
    pub content_type: &'static str,
    /// Response body text.
    pub body: String,
}

impl Reply {
    /// An HTML reply with the given status.
    #[must_use]
    pub fn html(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/html; charset=utf-8",
            body: body.into(),
        }
    }

    /// A plain-text reply with the given status.
    #[must_use]
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: body.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn empty_query_is_empty_map() {
        assert!(parse_query("").is_empty());
    }

    #[test]
    fn query_values_are_percent_decoded() {
        let params = parse_query("name=J%C3%BCrgen&greeting=hello+world");
        assert_eq!(params["name"], "Jürgen");
        assert_eq!(params["greeting"], "hello world");
    }

    #[test]
    fn repeated_key_keeps_first_value() {
        let params = parse_query("a=1&a=2&b=3");
        assert_eq!(params["a"], "1");
        assert_eq!(params["b"], "3");
    }

    #[test]
    fn key_without_value_maps_to_empty_string() {
        let params = parse_query("flag");
        assert_eq!(params["flag"], "");
    }

    #[test]
    fn get_context_ignores_body() {
        let raw = RawRequest::new(Some("x=1".to_string()), "ignored");
        let ctx = RequestContext::from_raw(Method::Get, &raw).unwrap();
        assert_eq!(ctx.body, None);
        assert_eq!(ctx.query["x"], "1");
    }

    #[test]
    fn mutating_context_with_empty_body_is_empty_string() {
        for method in [Method::Post, Method::Patch, Method::Put] {
            let ctx = RequestContext::from_raw(method, &RawRequest::default()).unwrap();
            assert_eq!(ctx.body.as_deref(), Some(""));
            assert!(ctx.query.is_empty());
        }
    }

    #[test]
    fn invalid_utf8_body_is_rejected_for_mutating_methods() {
        let raw = RawRequest::new(None, vec![0xff, 0xfe]);
        let err = RequestContext::from_raw(Method::Post, &raw).unwrap_err();
        assert!(matches!(err, RequestError::InvalidBody(_)));

        // GET never decodes the body, so the same bytes are fine.
        assert!(RequestContext::from_raw(Method::Get, &raw).is_ok());
    }

    #[test]
    fn html_reply_sets_content_type() {
        let reply = Reply::html(200, "<h1>hi</h1>");
        assert_eq!(reply.status, 200);
        assert!(reply.content_type.starts_with("text/html"));
    }

    proptest! {
        #[test]
        fn serialized_pairs_round_trip_through_parse(
            pairs in proptest::collection::btree_map("[a-z]{1,8}", "[ -~]{0,16}", 0..8)
        ) {
            let encoded = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(pairs.iter())
                .finish();
            prop_assert_eq!(parse_query(&encoded), pairs);
        }
    }
}
