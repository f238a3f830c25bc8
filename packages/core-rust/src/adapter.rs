//! Handler adapter: wraps a handler so it receives method-appropriate input.
//!
//! A [`Handler`] is declared with an explicit calling convention
//! ([`CallStyle::Sync`] or [`CallStyle::Async`]) and an explicit
//! [`Arity`]. [`adapt`] checks the pair against the endpoint's method once,
//! at registration time, and returns a [`WrappedHandler`] whose calling
//! contract is the same for every handler:
//!
//! - `GET` handlers get the query map.
//! - `POST`/`PATCH`/`PUT` handlers get the decoded body, then the query map.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt};
use tracing::debug;

use crate::method::{Method, UnsupportedMethodError};
use crate::request::{QueryMap, RawRequest, Reply, RequestContext, RequestError};

/// Future returned by asynchronous handlers.
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<Reply>>;

type SyncQueryFn = dyn Fn(QueryMap) -> anyhow::Result<Reply> + Send + Sync;
type SyncBodyFn = dyn Fn(String, QueryMap) -> anyhow::Result<Reply> + Send + Sync;
type AsyncQueryFn = dyn Fn(QueryMap) -> HandlerFuture + Send + Sync;
type AsyncBodyFn = dyn Fn(String, QueryMap) -> HandlerFuture + Send + Sync;

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// How a handler produces its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStyle {
    /// Returns its reply immediately.
    Sync,
    /// Returns a future that resolves to the reply.
    Async,
}

/// Which positional arguments a handler takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// `(query)`, for read methods.
    Query,
    /// `(body, query)`, for mutating methods.
    BodyQuery,
}

impl Arity {
    /// The arity a handler must have to serve `method`.
    #[must_use]
    pub fn for_method(method: Method) -> Self {
        if method.is_mutating() {
            Arity::BodyQuery
        } else {
            Arity::Query
        }
    }
}

#[derive(Clone)]
enum HandlerFn {
    SyncQuery(Arc<SyncQueryFn>),
    SyncBody(Arc<SyncBodyFn>),
    AsyncQuery(Arc<AsyncQueryFn>),
    AsyncBody(Arc<AsyncBodyFn>),
}

/// A unit of endpoint business logic, tagged with its calling convention.
///
/// The tag is fixed by the constructor used to build the handler; it is
/// never re-detected at request time.
#[derive(Clone)]
pub struct Handler {
    inner: HandlerFn,
}

impl Handler {
    /// A synchronous handler taking the query map.
    pub fn sync_query<F>(f: F) -> Self
    where
        F: Fn(QueryMap) -> anyhow::Result<Reply> + Send + Sync + 'static,
    {
        Self {
            inner: HandlerFn::SyncQuery(Arc::new(f)),
        }
    }

    /// A synchronous handler taking the body text and the query map.
    pub fn sync_body<F>(f: F) -> Self
    where
        F: Fn(String, QueryMap) -> anyhow::Result<Reply> + Send + Sync + 'static,
    {
        Self {
            inner: HandlerFn::SyncBody(Arc::new(f)),
        }
    }

    /// An asynchronous handler taking the query map.
    pub fn async_query<F, Fut>(f: F) -> Self
    where
        F: Fn(QueryMap) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Reply>> + Send + 'static,
    {
        Self {
            inner: HandlerFn::AsyncQuery(Arc::new(move |query| f(query).boxed())),
        }
    }

    /// An asynchronous handler taking the body text and the query map.
    pub fn async_body<F, Fut>(f: F) -> Self
    where
        F: Fn(String, QueryMap) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Reply>> + Send + 'static,
    {
        Self {
            inner: HandlerFn::AsyncBody(Arc::new(move |body, query| f(body, query).boxed())),
        }
    }

    /// The calling convention this handler was declared with.
    #[must_use]
    pub fn call_style(&self) -> CallStyle {
        match self.inner {
            HandlerFn::SyncQuery(_) | HandlerFn::SyncBody(_) => CallStyle::Sync,
            HandlerFn::AsyncQuery(_) | HandlerFn::AsyncBody(_) => CallStyle::Async,
        }
    }

    /// The positional arguments this handler takes.
    #[must_use]
    pub fn arity(&self) -> Arity {
        match self.inner {
            HandlerFn::SyncQuery(_) | HandlerFn::AsyncQuery(_) => Arity::Query,
            HandlerFn::SyncBody(_) | HandlerFn::AsyncBody(_) => Arity::BodyQuery,
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("call_style", &self.call_style())
            .field("arity", &self.arity())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Adaptation
// ---------------------------------------------------------------------------

/// Errors raised while wrapping a handler. Always surfaced at registration time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdaptError {
    #[error(transparent)]
    UnsupportedMethod(#[from] UnsupportedMethodError),
    #[error("{method} endpoints need a {expected:?} handler, got {actual:?}")]
    ArityMismatch {
        method: Method,
        expected: Arity,
        actual: Arity,
    },
}

/// Errors surfaced by a [`WrappedHandler`] invocation.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    /// The raw request could not be adapted; the handler was not called.
    #[error(transparent)]
    Request(#[from] RequestError),
    /// The handler itself failed. The error is passed through untouched.
    #[error(transparent)]
    Handler(anyhow::Error),
}

/// Wraps `handler` for an endpoint declared with the verb `method`.
///
/// # Errors
///
/// Returns [`AdaptError::UnsupportedMethod`] if `method` is not one of
/// GET/POST/PATCH/PUT, or [`AdaptError::ArityMismatch`] if the handler's
/// arity does not fit the method.
pub fn adapt(handler: &Handler, method: &str) -> Result<WrappedHandler, AdaptError> {
    adapt_method(handler, method.parse()?)
}

/// Wraps `handler` for an already-parsed `method`.
///
/// # Errors
///
/// Returns [`AdaptError::ArityMismatch`] if the handler's arity does not fit
/// the method.
pub fn adapt_method(handler: &Handler, method: Method) -> Result<WrappedHandler, AdaptError> {
    let expected = Arity::for_method(method);
    let actual = handler.arity();
    if expected != actual {
        return Err(AdaptError::ArityMismatch {
            method,
            expected,
            actual,
        });
    }
    Ok(WrappedHandler {
        method,
        inner: handler.inner.clone(),
    })
}

/// A handler bound to one method, callable by the transport.
///
/// Cloning is cheap and clones share no mutable state.
#[derive(Clone)]
pub struct WrappedHandler {
    method: Method,
    inner: HandlerFn,
}

impl WrappedHandler {
    /// The method this wrapper was bound to.
    #[must_use]
    pub fn method(&self) -> Method {
        self.method
    }

    /// The calling convention selected at wrap time.
    #[must_use]
    pub fn call_style(&self) -> CallStyle {
        match self.inner {
            HandlerFn::SyncQuery(_) | HandlerFn::SyncBody(_) => CallStyle::Sync,
            HandlerFn::AsyncQuery(_) | HandlerFn::AsyncBody(_) => CallStyle::Async,
        }
    }

    /// Adapts `raw` and invokes the handler.
    ///
    /// Synchronous handlers run before this returns and yield an
    /// already-completed future; asynchronous handlers are awaited by
    /// whoever polls the returned future.
    pub fn call(&self, raw: &RawRequest) -> BoxFuture<'static, Result<Reply, InvokeError>> {
        let ctx = match RequestContext::from_raw(self.method, raw) {
            Ok(ctx) => ctx,
            Err(e) => return future::ready(Err(InvokeError::Request(e))).boxed(),
        };
        debug!(
            method = %self.method,
            params = ctx.query.len(),
            style = ?self.call_style(),
            "invoking handler"
        );

        let RequestContext { query, body } = ctx;
        let body = body.unwrap_or_default();
        match &self.inner {
            HandlerFn::SyncQuery(f) => future::ready(f(query).map_err(InvokeError::Handler)).boxed(),
            HandlerFn::SyncBody(f) => {
                future::ready(f(body, query).map_err(InvokeError::Handler)).boxed()
            }
            HandlerFn::AsyncQuery(f) => f(query).map(|r| r.map_err(InvokeError::Handler)).boxed(),
            HandlerFn::AsyncBody(f) => f(body, query)
                .map(|r| r.map_err(InvokeError::Handler))
                .boxed(),
        }
    }
}

impl fmt::Debug for WrappedHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappedHandler")
            .field("method", &self.method)
            .field("call_style", &self.call_style())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Echoes the arguments it received so tests can inspect them.
    fn echo_query() -> Handler {
        Handler::sync_query(|query| Ok(Reply::text(200, format!("query={query:?}"))))
    }

    fn echo_body() -> Handler {
        Handler::sync_body(|body, query| Ok(Reply::text(200, format!("body={body};query={query:?}"))))
    }

    fn async_echo_query() -> Handler {
        Handler::async_query(|query| async move {
            tokio::task::yield_now().await;
            Ok(Reply::text(200, format!("query={query:?}")))
        })
    }

    fn async_echo_body() -> Handler {
        Handler::async_body(|body, query| async move {
            tokio::task::yield_now().await;
            Ok(Reply::text(200, format!("body={body};query={query:?}")))
        })
    }

    fn raw(query: &str, body: &str) -> RawRequest {
        RawRequest::new(Some(query.to_string()), body.to_string())
    }

    #[tokio::test]
    async fn get_handler_receives_only_query() {
        let wrapped = adapt(&echo_query(), "GET").unwrap();
        let reply = wrapped.call(&raw("a=1", "should not be seen")).await.unwrap();
        assert_eq!(reply.body, r#"query={"a": "1"}"#);
    }

    #[tokio::test]
    async fn mutating_handlers_receive_body_then_query() {
        for method in ["POST", "PATCH", "PUT"] {
            let wrapped = adapt(&echo_body(), method).unwrap();
            let reply = wrapped.call(&raw("k=v", "payload")).await.unwrap();
            assert_eq!(reply.body, r#"body=payload;query={"k": "v"}"#, "{method}");
        }
    }

    #[tokio::test]
    async fn async_handlers_have_the_same_contract() {
        let get = adapt(&async_echo_query(), "GET").unwrap();
        assert_eq!(get.call_style(), CallStyle::Async);
        let reply = get.call(&raw("a=1", "ignored")).await.unwrap();
        assert_eq!(reply.body, r#"query={"a": "1"}"#);

        let put = adapt(&async_echo_body(), "PUT").unwrap();
        let reply = put.call(&raw("", "")).await.unwrap();
        assert_eq!(reply.body, "body=;query={}");
    }

    #[tokio::test]
    async fn missing_query_and_body_become_empty_values() {
        let wrapped = adapt(&echo_body(), "POST").unwrap();
        let reply = wrapped.call(&RawRequest::default()).await.unwrap();
        assert_eq!(reply.body, "body=;query={}");
    }

    #[test]
    fn delete_is_rejected_at_wrap_time() {
        let err = adapt(&echo_query(), "DELETE").unwrap_err();
        assert_eq!(
            err,
            AdaptError::UnsupportedMethod(UnsupportedMethodError {
                method: "DELETE".to_string()
            })
        );
    }

    #[test]
    fn arity_must_match_method() {
        let err = adapt(&echo_query(), "POST").unwrap_err();
        assert!(matches!(
            err,
            AdaptError::ArityMismatch {
                method: Method::Post,
                expected: Arity::BodyQuery,
                actual: Arity::Query,
            }
        ));
        assert!(adapt(&echo_body(), "GET").is_err());
    }

    #[tokio::test]
    async fn handler_errors_pass_through_unchanged() {
        let failing = Handler::sync_query(|_| Err(anyhow::anyhow!("boom")));
        let wrapped = adapt(&failing, "GET").unwrap();
        match wrapped.call(&RawRequest::default()).await {
            Err(InvokeError::Handler(e)) => assert_eq!(e.to_string(), "boom"),
            other => panic!("expected handler error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_body_never_reaches_handler() {
        let called = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let handler = Handler::sync_body(move |_, _| {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(Reply::text(200, ""))
        });
        let wrapped = adapt(&handler, "POST").unwrap();
        let result = wrapped.call(&RawRequest::new(None, vec![0xc3, 0x28])).await;
        assert!(matches!(result, Err(InvokeError::Request(_))));
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn wrapping_twice_gives_independent_equivalent_wrappers() {
        let handler = echo_body();
        let first = adapt(&handler, "PATCH").unwrap();
        let second = adapt(&handler, "PATCH").unwrap();
        drop(handler);

        let request = raw("x=1&y=2", "data");
        let a = first.call(&request).await.unwrap();
        let b = second.call(&request).await.unwrap();
        assert_eq!(a, b);

        drop(first);
        let again = second.call(&request).await.unwrap();
        assert_eq!(again, b);
    }

    #[test]
    fn handler_debug_reports_tags() {
        let rendered = format!("{:?}", async_echo_body());
        assert!(rendered.contains("Async"));
        assert!(rendered.contains("BodyQuery"));
    }
}
