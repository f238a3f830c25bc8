//! The asynchronous web API service.
//!
//! Mixes synchronous and asynchronous handlers, and owns a
//! [`FakeAsyncClient`] whose connection spans the service's async scope.

use std::future::Future;
use std::sync::Arc;

use apishell_core::{
    with_async_scope_blocking, AsyncScope, AsyncScopeStack, EndpointSource, EndpointSpec,
    EndpointTable, ExitAction, ExitReason, Handler, QueryMap, Reply, ScopeState,
};
use async_trait::async_trait;

use super::base::ServiceBase;
use super::client::FakeAsyncClient;
use crate::network::{HttpServer, ServerConfig};

/// Banner served on `GET /`.
pub const HOMEPAGE_BANNER: &str = "<h1> Hello, welcome to the Async Flask API homepage! </h1>";

/// Body served on `GET /async_test`.
pub const ASYNC_TEST_BODY: &str = "<h1> This is an async test handler! </h1>";

/// Web API whose lifecycle is asynchronous.
///
/// The client is entered after the (empty) synchronous base and exited
/// before it.
#[derive(Debug)]
pub struct AsyncWebApi {
    base: ServiceBase,
    lifecycle: AsyncScopeStack,
    client: Arc<FakeAsyncClient>,
}

impl AsyncWebApi {
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
        let client = Arc::new(FakeAsyncClient::new());
        let lifecycle =
            AsyncScopeStack::new("async-web-api").with(Arc::clone(&client) as Arc<dyn AsyncScope>);
        Self {
            base: ServiceBase::new(server),
            lifecycle,
            client,
        }
    }

    /// Adds another asynchronous sub-resource, entered after the client.
    #[must_use]
    pub fn with_resource(mut self, resource: Arc<dyn AsyncScope>) -> Self {
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
    pub fn client(&self) -> &Arc<FakeAsyncClient> {
        &self.client
    }

    #[must_use]
    pub fn state(&self) -> ScopeState {
        self.lifecycle.state()
    }

    /// Registers the endpoints and blocks serving them. The async scope
    /// must have been entered.
    ///
    /// # Errors
    ///
    /// Fails if the scope was not entered, if registration fails, or on a
    /// fatal transport error.
    pub fn run(&mut self) -> anyhow::Result<()> {
        self.lifecycle.mark_running()?;
        let table = self.endpoints();
        self.base.run(&table)
    }

    /// Enters the async scope on the worker runtime, runs, then exits the
    /// scope on every path.
    ///
    /// # Errors
    ///
    /// Returns the enter, run, or exit error.
    pub fn run_scoped(&mut self) -> anyhow::Result<()> {
        self.scoped(|base, table| base.run(table))
    }

    /// Like [`AsyncWebApi::run_scoped`], but serves until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns the enter, run, or exit error.
    pub fn run_scoped_until<F>(&mut self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.scoped(move |base, table| base.run_until(table, shutdown))
    }

    fn scoped<F>(&mut self, serve: F) -> anyhow::Result<()>
    where
        F: FnOnce(&mut ServiceBase, &EndpointTable) -> anyhow::Result<()>,
    {
        let table = self.endpoints();
        let runtime = self.base.server().runtime().clone();
        let Self {
            base, lifecycle, ..
        } = self;
        let lifecycle = &*lifecycle;

        with_async_scope_blocking(&runtime, lifecycle, || {
            lifecycle.mark_running()?;
            serve(base, &table)
        })
        .map(|_| ())
    }

    fn homepage(_params: QueryMap) -> anyhow::Result<Reply> {
        Ok(Reply::html(200, HOMEPAGE_BANNER))
    }

    async fn async_test(_params: QueryMap) -> anyhow::Result<Reply> {
        tokio::task::yield_now().await;
        Ok(Reply::html(200, ASYNC_TEST_BODY))
    }
}

impl EndpointSource for AsyncWebApi {
    fn endpoints(&self) -> EndpointTable {
        EndpointTable::new()
            .with(EndpointSpec::get(
                "homepage",
                "/",
                Handler::sync_query(Self::homepage),
            ))
            .with(EndpointSpec::get(
                "async_test",
                "/async_test",
                Handler::async_query(Self::async_test),
            ))
    }
}

#[async_trait]
impl AsyncScope for AsyncWebApi {
    fn name(&self) -> &str {
        "async-web-api"
    }

    async fn enter(&self) -> anyhow::Result<()> {
        Ok(self.lifecycle.enter_all().await?)
    }

    async fn exit(&self, reason: &ExitReason) -> anyhow::Result<ExitAction> {
        Ok(self.lifecycle.exit_all(reason).await?)
    }
}
