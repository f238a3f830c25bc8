//! Placeholder downstream client composed by the asynchronous service.

use std::sync::atomic::{AtomicBool, Ordering};

use apishell_core::{AsyncScope, ExitAction, ExitReason};
use async_trait::async_trait;
use tracing::info;

/// Errors returned by [`FakeAsyncClient`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("client is not connected")]
    NotConnected,
}

/// Stand-in for a downstream client whose connection lives as long as the
/// owning service's scope.
#[derive(Debug, Default)]
pub struct FakeAsyncClient {
    connected: AtomicBool,
}

impl FakeAsyncClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Sends `value` downstream and returns the echoed answer.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] outside the client's scope.
    pub async fn invoke(&self, value: &str) -> Result<String, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        tokio::task::yield_now().await;
        Ok(format!("Fake async client invoked with value: {value}"))
    }
}

#[async_trait]
impl AsyncScope for FakeAsyncClient {
    fn name(&self) -> &str {
        "fake-async-client"
    }

    async fn enter(&self) -> anyhow::Result<()> {
        tokio::task::yield_now().await;
        self.connected.store(true, Ordering::Release);
        info!("Fake async client initialized.");
        Ok(())
    }

    async fn exit(&self, _reason: &ExitReason) -> anyhow::Result<ExitAction> {
        tokio::task::yield_now().await;
        self.connected.store(false, Ordering::Release);
        info!("Fake async client exited.");
        Ok(ExitAction::Propagate)
    }
}
