//! `apishell` core: handler adaptation, endpoint tables, registration, and scoped lifecycles.
//!
//! Transport-agnostic: the HTTP server is reached only through
//! [`registrar::EndpointRegistry`].

pub mod adapter;
pub mod endpoint;
pub mod lifecycle;
pub mod method;
pub mod registrar;
pub mod request;

pub use adapter::{adapt, adapt_method, AdaptError, Arity, CallStyle, Handler, InvokeError, WrappedHandler};
pub use endpoint::{EndpointSource, EndpointSpec, EndpointTable};
pub use lifecycle::{
    with_async_scope, with_async_scope_blocking, with_scope, AsyncScope, AsyncScopeStack,
    ExitAction, ExitReason, LifecycleError, ReleaseFailure, Scope, ScopeStack, ScopeState,
};
pub use method::{Method, UnsupportedMethodError};
pub use registrar::{register_all, EndpointRegistry, RegistrationError};
pub use request::{parse_query, QueryMap, RawRequest, Reply, RequestContext, RequestError};
