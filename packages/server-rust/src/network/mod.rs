//! HTTP transport: configuration, middleware, the server, and shutdown control.

pub mod config;
pub mod middleware;
pub mod server;
pub mod shutdown;

pub use config::*;
pub use middleware::build_http_layers;
pub use server::{HttpServer, RegisteredEndpoint};
pub use shutdown::*;
