//! HTTP transport with deferred startup.
//!
//! `HttpServer` is the server collaborator the registrar talks to. It
//! follows the deferred startup pattern:
//! 1. `new()` -- builds the worker runtime and an empty router
//! 2. `register()` -- adds routes, one wrapped handler each
//! 3. `bind()` -- optionally binds the TCP listener ahead of time
//! 4. `serve()` -- blocks the calling thread, serving until shutdown
//!
//! The runtime is owned here and exposed through [`HttpServer::runtime`] so
//! asynchronous service lifecycles run on the same workers as requests.

use std::collections::HashSet;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context as _};
use apishell_core::{EndpointRegistry, InvokeError, Method, RawRequest, Reply, WrappedHandler};
use axum::body::Bytes;
use axum::extract::RawQuery;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{on, MethodFilter};
use axum::Router;
use tokio::net::TcpListener;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use super::config::ServerConfig;
use super::middleware::{build_http_layers, limit_concurrency};
use super::shutdown::shutdown_signal;

/// An endpoint accepted by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredEndpoint {
    pub name: String,
    pub path: String,
    pub method: Method,
}

/// Owns the worker runtime, the route table, and the listener.
pub struct HttpServer {
    config: ServerConfig,
    runtime: Runtime,
    router: Option<Router>,
    registered: Vec<RegisteredEndpoint>,
    routes: HashSet<(String, Method)>,
    permits: Arc<Semaphore>,
    listener: Option<TcpListener>,
}

impl HttpServer {
    /// Creates the transport without binding any port.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the runtime
    /// cannot be built.
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.threads)
            .thread_name("apishell-worker")
            .enable_all()
            .build()
            .context("failed to build worker runtime")?;

        Ok(Self {
            permits: Arc::new(Semaphore::new(config.connection_limit)),
            config,
            runtime,
            router: Some(Router::new()),
            registered: Vec::new(),
            routes: HashSet::new(),
            listener: None,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handle to the worker runtime.
    #[must_use]
    pub fn runtime(&self) -> &Handle {
        self.runtime.handle()
    }

    /// Endpoints accepted so far, in registration order.
    #[must_use]
    pub fn registered(&self) -> &[RegisteredEndpoint] {
        &self.registered
    }

    /// Whether `serve()` has taken the route table.
    #[must_use]
    pub fn is_serving(&self) -> bool {
        self.router.is_none()
    }

    /// Returns the fully layered application without starting to serve.
    ///
    /// Useful for driving requests in-process.
    ///
    /// # Errors
    ///
    /// Returns an error once `serve()` has taken the route table.
    pub fn app(&self) -> anyhow::Result<Router> {
        let Some(router) = self.router.clone() else {
            bail!("server is already serving");
        };
        Ok(self.layer(router))
    }

    fn layer(&self, router: Router) -> Router {
        router
            .layer(axum::middleware::from_fn_with_state(
                Arc::clone(&self.permits),
                limit_concurrency,
            ))
            .layer(build_http_layers(&self.config))
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the bound address, which differs from the configured one when
    /// port 0 is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub fn bind(&mut self) -> anyhow::Result<SocketAddr> {
        let addr = self.config.bind_address();
        let listener = self
            .runtime
            .block_on(TcpListener::bind(&addr))
            .with_context(|| format!("failed to bind {addr}"))?;
        let local = listener.local_addr()?;
        info!(address = %local, "TCP listener bound");
        self.listener = Some(listener);
        Ok(local)
    }

    /// Serves until the process receives Ctrl-C or SIGTERM. Blocks.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails, if called twice, or on a fatal
    /// I/O error.
    pub fn serve(&mut self) -> anyhow::Result<()> {
        self.serve_until(shutdown_signal())
    }

    /// Serves until `shutdown` resolves. Blocks the calling thread, which
    /// must not be a runtime worker.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails, if called twice, or on a fatal
    /// I/O error.
    pub fn serve_until<F>(&mut self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Some(router) = self.router.take() else {
            bail!("server is already serving");
        };
        let app = self.layer(router);
        if self.listener.is_none() {
            self.bind()?;
        }
        let listener = self
            .listener
            .take()
            .context("listener missing after bind")?;

        info!(
            endpoints = self.registered.len(),
            threads = self.config.threads,
            connection_limit = self.config.connection_limit,
            "serving HTTP"
        );
        self.runtime.block_on(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
        })?;
        info!("HTTP server stopped");
        Ok(())
    }
}

impl std::fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpServer")
            .field("config", &self.config)
            .field("registered", &self.registered)
            .field("serving", &self.is_serving())
            .finish_non_exhaustive()
    }
}

impl EndpointRegistry for HttpServer {
    fn register(
        &mut self,
        path: &str,
        name: &str,
        handler: WrappedHandler,
        method: Method,
    ) -> anyhow::Result<()> {
        if name.trim().is_empty() {
            bail!("endpoint name must not be empty");
        }
        validate_path(path)?;
        if self.routes.contains(&(path.to_string(), method)) {
            bail!("{method} {path} is already registered");
        }
        let Some(router) = self.router.take() else {
            bail!("server is already serving; cannot register {name}");
        };

        let route = on(method_filter(method), move |RawQuery(query): RawQuery, body: Bytes| {
            let handler = handler.clone();
            async move { dispatch(&handler, RawRequest { query, body }).await }
        });
        self.router = Some(router.route(path, route));
        self.routes.insert((path.to_string(), method));
        self.registered.push(RegisteredEndpoint {
            name: name.to_string(),
            path: path.to_string(),
            method,
        });
        Ok(())
    }
}

fn validate_path(path: &str) -> anyhow::Result<()> {
    if !path.starts_with('/') {
        bail!("path {path:?} must start with '/'");
    }
    if path.chars().any(char::is_whitespace) {
        bail!("path {path:?} must not contain whitespace");
    }
    // Routes are literal; axum would panic on malformed capture syntax.
    if path.contains(['{', '}'])
        || path
            .split('/')
            .any(|segment| segment.starts_with(':') || segment.starts_with('*'))
    {
        bail!("path {path:?} uses unsupported capture syntax");
    }
    Ok(())
}

fn method_filter(method: Method) -> MethodFilter {
    match method {
        Method::Get => MethodFilter::GET,
        Method::Post => MethodFilter::POST,
        Method::Patch => MethodFilter::PATCH,
        Method::Put => MethodFilter::PUT,
    }
}

async fn dispatch(handler: &WrappedHandler, raw: RawRequest) -> Response {
    match handler.call(&raw).await {
        Ok(reply) => reply_response(reply),
        Err(InvokeError::Request(e)) => {
            warn!(error = %e, "rejecting malformed request");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        Err(InvokeError::Handler(e)) => {
            error!(error = %format!("{e:#}"), "handler failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
        }
    }
}

fn reply_response(reply: Reply) -> Response {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, [(CONTENT_TYPE, reply.content_type)], reply.body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use apishell_core::{adapt, Handler};
    use axum::body::Body;
    use axum::http;
    use tower::ServiceExt;

    fn test_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            threads: 1,
            ..ServerConfig::default()
        }
    }

    fn page(text: &'static str) -> WrappedHandler {
        adapt(&Handler::sync_query(move |_| Ok(Reply::html(200, text))), "GET").unwrap()
    }

    fn send(server: &HttpServer, request: http::Request<Body>) -> (StatusCode, String) {
        let app = server.app().unwrap();
        server.runtime().block_on(async move {
            let response = app.oneshot(request).await.unwrap();
            let status = response.status();
            let body = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            (status, String::from_utf8(body.to_vec()).unwrap())
        })
    }

    fn get(uri: &str) -> http::Request<Body> {
        http::Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[test]
    fn new_creates_server_without_binding() {
        let server = HttpServer::new(test_config()).unwrap();
        assert!(server.listener.is_none());
        assert!(server.registered().is_empty());
        assert!(!server.is_serving());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = ServerConfig {
            threads: 0,
            ..test_config()
        };
        assert!(HttpServer::new(config).is_err());
    }

    #[test]
    fn registered_route_answers() {
        let mut server = HttpServer::new(test_config()).unwrap();
        server.register("/", "homepage", page("<h1>hi</h1>"), Method::Get).unwrap();

        let (status, body) = send(&server, get("/?ignored=1"));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "<h1>hi</h1>");
        assert_eq!(
            server.registered(),
            &[RegisteredEndpoint {
                name: "homepage".to_string(),
                path: "/".to_string(),
                method: Method::Get,
            }]
        );
    }

    #[test]
    fn unknown_path_and_wrong_method() {
        let mut server = HttpServer::new(test_config()).unwrap();
        server.register("/", "homepage", page("x"), Method::Get).unwrap();

        assert_eq!(send(&server, get("/missing")).0, StatusCode::NOT_FOUND);
        let post = http::Request::builder()
            .method("POST")
            .uri("/")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&server, post).0, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn same_path_different_methods_share_a_route() {
        let mut server = HttpServer::new(test_config()).unwrap();
        let echo = adapt(
            &Handler::sync_body(|body, query| Ok(Reply::text(201, format!("{body}|{}", query.len())))),
            "PUT",
        )
        .unwrap();
        server.register("/item", "read", page("item"), Method::Get).unwrap();
        server.register("/item", "write", echo, Method::Put).unwrap();

        let put = http::Request::builder()
            .method("PUT")
            .uri("/item?a=1&b=2")
            .body(Body::from("data"))
            .unwrap();
        assert_eq!(send(&server, put), (StatusCode::CREATED, "data|2".to_string()));
        assert_eq!(send(&server, get("/item")).1, "item");
    }

    #[test]
    fn malformed_registrations_fail() {
        let mut server = HttpServer::new(test_config()).unwrap();
        assert!(server.register("no-slash", "x", page("x"), Method::Get).is_err());
        assert!(server.register("/a b", "x", page("x"), Method::Get).is_err());
        assert!(server.register("/:id", "x", page("x"), Method::Get).is_err());
        assert!(server.register("/{", "x", page("x"), Method::Get).is_err());
        assert!(server.register("/a}", "x", page("x"), Method::Get).is_err());
        assert!(server.register("/{id}", "x", page("x"), Method::Get).is_err());
        assert!(server.register("/", "  ", page("x"), Method::Get).is_err());

        server.register("/", "first", page("x"), Method::Get).unwrap();
        assert!(server.register("/", "second", page("y"), Method::Get).is_err());
        assert_eq!(server.registered().len(), 1);
    }

    #[test]
    fn handler_error_becomes_500_and_bad_body_400() {
        let mut server = HttpServer::new(test_config()).unwrap();
        let failing = adapt(&Handler::sync_query(|_| Err(anyhow::anyhow!("boom"))), "GET").unwrap();
        let echo = adapt(&Handler::sync_body(|body, _| Ok(Reply::text(200, body))), "POST").unwrap();
        server.register("/fail", "fail", failing, Method::Get).unwrap();
        server.register("/echo", "echo", echo, Method::Post).unwrap();

        assert_eq!(send(&server, get("/fail")).0, StatusCode::INTERNAL_SERVER_ERROR);
        let bad = http::Request::builder()
            .method("POST")
            .uri("/echo")
            .body(Body::from(vec![0xff, 0xfe]))
            .unwrap();
        assert_eq!(send(&server, bad).0, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn serves_over_tcp_until_shutdown() {
        let mut server = HttpServer::new(test_config()).unwrap();
        server.register("/", "homepage", page("<h1>tcp</h1>"), Method::Get).unwrap();
        let addr = server.bind().unwrap();

        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<String>();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        server.runtime().spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};

            let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
                .await
                .unwrap();
            let mut raw = String::new();
            stream.read_to_string(&mut raw).await.unwrap();
            let _ = done_tx.send(raw);
            let _ = stop_tx.send(());
        });

        server
            .serve_until(async {
                let _ = stop_rx.await;
            })
            .unwrap();

        let raw = server.runtime().block_on(done_rx).unwrap();
        assert!(raw.starts_with("HTTP/1.1 200"));
        assert!(raw.contains("<h1>tcp</h1>"));
        assert!(server.is_serving());
        assert!(server.register("/late", "late", page("x"), Method::Get).is_err());
        assert!(server.serve_until(async {}).is_err());
    }
}
