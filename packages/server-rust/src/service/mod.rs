//! Concrete services built on [`base::ServiceBase`].
//!
//! 1. **Base** (`base`): registers an endpoint table, then serves it
//! 2. **Web API** (`api`): synchronous handlers and a synchronous scope
//! 3. **Async web API** (`async_api`): mixed handlers and an asynchronous scope
//! 4. **Client** (`client`): placeholder downstream client held by the async scope

pub mod api;
pub mod async_api;
pub mod base;
pub mod client;

pub use api::WebApi;
pub use async_api::AsyncWebApi;
pub use base::ServiceBase;
pub use client::{ClientError, FakeAsyncClient};
