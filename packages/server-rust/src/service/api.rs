//! The normal web API service: synchronous handlers, synchronous scope.

use apishell_core::{
    with_scope, EndpointSource, EndpointSpec, EndpointTable, ExitAction, ExitReason, Handler,
    QueryMap, Reply, Scope, ScopeStack, ScopeState,
};

use super::base::ServiceBase;
use crate::network::{HttpServer, ServerConfig};

/// Banner served on `GET /`.
pub const HOMEPAGE_BANNER: &str = "<h1> Hello, welcome to the Flask API homepage! </h1>";

/// Web API with a homepage endpoint.
///
/// Lifecycle: construct, enter the scope, `run()`, exit the scope.
/// [`WebApi::run_scoped`] does all of that in one call.
#[derive(Debug)]
pub struct WebApi {
    base: ServiceBase,
    lifecycle: ScopeStack,
}

impl WebApi {
    /// Creates the service and its transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be created.
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        Ok(Self::with_server(HttpServer::new(config)?))
    }

    #[must_use]
    pub fn with_server(server: HttpServer) -> Self {
        Self {
            base: ServiceBase::new(server),
            lifecycle: ScopeStack::new("web-api"),
        }
    }

    /// Adds a synchronous sub-resource to the service scope.
    #[must_use]
    pub fn with_resource(mut self, resource: impl Scope + 'static) -> Self {
        self.lifecycle = self.lifecycle.with(resource);
        self
    }

    #[must_use]
    pub fn server(&self) -> &HttpServer {
        self.base.server()
    }

    /// Mutable access to the transport, e.g. to bind before running.
    pub fn server_mut(&mut self) -> &mut HttpServer {
        self.base.server_mut()
    }

    #[must_use]
    pub fn state(&self) -> ScopeState {
        self.lifecycle.state()
    }

    /// Registers the endpoints and blocks serving them.
    ///
    /// # Errors
    ///
    /// Fails if the service scope was not entered, if registration fails,
    /// or on a fatal transport error.
    pub fn run(&mut self) -> anyhow::Result<()> {
        self.lifecycle.mark_running()?;
        let table = self.endpoints();
        self.base.run(&table)
    }

    /// Like [`WebApi::run`], but serves until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Same as [`WebApi::run`].
    pub fn run_until<F>(&mut self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.lifecycle.mark_running()?;
        let table = self.endpoints();
        self.base.run_until(&table, shutdown)
    }

    /// Enters the scope, runs, and exits the scope on every path.
    ///
    /// # Errors
    ///
    /// Returns the enter, run, or exit error.
    pub fn run_scoped(&mut self) -> anyhow::Result<()> {
        with_scope(self, WebApi::run).map(|_| ())
    }

    /// Like [`WebApi::run_scoped`], but serves until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns the enter, run, or exit error.
    pub fn run_scoped_until<F>(&mut self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        with_scope(self, move |api| api.run_until(shutdown)).map(|_| ())
    }

    fn homepage(_params: QueryMap) -> anyhow::Result<Reply> {
        Ok(Reply::html(200, HOMEPAGE_BANNER))
    }
}

impl EndpointSource for WebApi {
    fn endpoints(&self) -> EndpointTable {
        EndpointTable::new().with(EndpointSpec::get(
            "homepage",
            "/",
            Handler::sync_query(Self::homepage),
        ))
    }
}

impl Scope for WebApi {
    fn name(&self) -> &str {
        "web-api"
    }

    fn enter(&mut self) -> anyhow::Result<()> {
        Ok(self.lifecycle.enter_all()?)
    }

    fn exit(&mut self, reason: &ExitReason) -> anyhow::Result<ExitAction> {
        Ok(self.lifecycle.exit_all(reason)?)
    }
}
