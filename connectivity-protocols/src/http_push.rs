// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Adapter layer for the `reqwest` crate (outbound-only HTTP push, spec §3 `ConnectionType`).
//!
//! There is no inbound/consumer side: HTTP push connections declare targets only (spec §1
//! Non-goals: "the HTTP API / DevOps command surface" covers the inbound direction instead).

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;

use connectivity_core::error::{ConnectivityError, ConnectivityErrorKind};
use connectivity_core::model::ExternalMessage;
use connectivity_core::publisher::{HandleFactory, PublishHandle};

fn io_error(err: impl std::fmt::Display) -> ConnectivityError {
    ConnectivityError::new(ConnectivityErrorKind::TransientIo)
        .with_property("description", err.to_string())
        .deep()
}

struct HttpPushHandle {
    client: Client,
    url: String,
}

#[async_trait]
impl PublishHandle for HttpPushHandle {
    async fn send(&self, message: &ExternalMessage) -> Result<(), ConnectivityError> {
        let mut request = self.client.post(&self.url).body(message.payload.clone());
        if let Some(content_type) = &message.content_type {
            request = request.header(reqwest::header::CONTENT_TYPE, content_type);
        }
        for (name, value) in &message.headers {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(io_error)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(io_error(format!(
                "HTTP push to '{}' returned {}",
                self.url,
                response.status()
            )))
        }
    }
}

/// Builds one [`HttpPushHandle`] per URL over a shared `reqwest::Client` (spec §1: "thin adapter
/// over a mature client library"; `reqwest::Client` is itself a connection-pooling handle, so no
/// further caching is needed beyond what [`crate::publisher`](connectivity_core::publisher)
/// already does per address).
pub struct HttpPushFactory {
    client: Client,
}

impl HttpPushFactory {
    /// Build a factory around a fresh client.
    ///
    /// # Errors
    /// Returns a [`ConnectivityErrorKind::TransientIo`] error if the client's TLS backend cannot
    /// be initialized.
    pub fn new() -> Result<Self, ConnectivityError> {
        let client = Client::builder().build().map_err(io_error)?;
        Ok(Self { client })
    }

    /// Wrap an already-built client.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HandleFactory for HttpPushFactory {
    async fn create(&self, address: &str) -> Result<Arc<dyn PublishHandle>, ConnectivityError> {
        Ok(Arc::new(HttpPushHandle {
            client: self.client.clone(),
            url: address.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn factory_builds_handle_for_url() {
        let factory = HttpPushFactory::new().unwrap();
        let handle = factory.create("https://example.invalid/ingest").await.unwrap();
        // Smoke test only: constructing the handle must not touch the network.
        drop(handle);
    }
}
