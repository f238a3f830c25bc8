//! `apishell` server: HTTP transport and the two example services.

pub mod network;
pub mod service;

pub use network::{HttpServer, ServerConfig};
pub use service::{AsyncWebApi, FakeAsyncClient, ServiceBase, WebApi};
