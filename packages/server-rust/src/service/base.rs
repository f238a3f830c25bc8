//! Service base: registers an endpoint table on the transport, then serves.

use apishell_core::{register_all, EndpointTable, RegistrationError};

use crate::network::HttpServer;

/// Owns the transport on behalf of one concrete service.
///
/// The transport is never shared between services.
#[derive(Debug)]
pub struct ServiceBase {
    server: HttpServer,
}

impl ServiceBase {
    #[must_use]
    pub fn new(server: HttpServer) -> Self {
        Self { server }
    }

    #[must_use]
    pub fn server(&self) -> &HttpServer {
        &self.server
    }

    pub fn server_mut(&mut self) -> &mut HttpServer {
        &mut self.server
    }

    /// Registers every endpoint in `table`. Nothing is registered if any
    /// entry is invalid.
    ///
    /// # Errors
    ///
    /// Returns the first [`RegistrationError`] found.
    pub fn register(&mut self, table: &EndpointTable) -> Result<usize, RegistrationError> {
        register_all(table, &mut self.server)
    }

    /// Registers `table`, then blocks serving it until shutdown.
    ///
    /// A registration error returns before the transport starts serving.
    ///
    /// # Errors
    ///
    /// Returns the registration error, or a fatal transport error.
    pub fn run(&mut self, table: &EndpointTable) -> anyhow::Result<()> {
        self.register(table)?;
        self.server.serve()
    }

    /// Like [`ServiceBase::run`], but serves until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns the registration error, or a fatal transport error.
    pub fn run_until<F>(&mut self, table: &EndpointTable, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.register(table)?;
        self.server.serve_until(shutdown)
    }
}

#[cfg(test)]
mod tests {
    use apishell_core::{EndpointSpec, Handler, Reply};

    use super::*;
    use crate::network::ServerConfig;

    fn base() -> ServiceBase {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            threads: 1,
            ..ServerConfig::default()
        };
        ServiceBase::new(HttpServer::new(config).unwrap())
    }

    fn page() -> Handler {
        Handler::sync_query(|_| Ok(Reply::html(200, "x")))
    }

    #[test]
    fn unsupported_method_stops_before_serving() {
        let mut base = base();
        let table = EndpointTable::new()
            .with(EndpointSpec::get("homepage", "/", page()))
            .with(EndpointSpec::new("remove", ["DELETE"], "/remove", page()));

        // If registration did not fail, `run` would block in the serve loop.
        let err = base.run(&table).unwrap_err();

        let reg = err.downcast_ref::<RegistrationError>().unwrap();
        assert!(reg.is_unsupported_method());
        assert!(base.server().registered().is_empty());
        assert!(!base.server().is_serving());
    }

    #[test]
    fn run_until_registers_then_serves() {
        let mut base = base();
        let table = EndpointTable::new().with(EndpointSpec::get("homepage", "/", page()));

        base.run_until(&table, async {}).unwrap();

        assert_eq!(base.server().registered().len(), 1);
        assert!(base.server().is_serving());
    }
}
