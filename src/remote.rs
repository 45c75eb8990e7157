//! Network devices that accept commands over HTTP

use async_trait::async_trait;
use serde::Serialize;

use crate::action::{ActionKind, ActionParams};
use crate::error::Result;
use crate::gift::GiftEvent;

/// JSON body posted to a network device
#[derive(Debug, Clone, Serialize)]
pub struct RemoteCommand<'a> {
    pub action: ActionKind,
    pub params: &'a ActionParams,
    pub gift: &'a GiftEvent,
}

#[async_trait]
pub trait RemoteActuator: Send + Sync {
    /// Deliver `command` to `host:port`; returns the device's reply text
    async fn actuate(&self, host: &str, port: u16, command: &RemoteCommand<'_>) -> Result<String>;
}

#[cfg(feature = "http-devices")]
pub use http::HttpActuator;

#[cfg(feature = "http-devices")]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;
    use tracing::debug;

    use super::{RemoteActuator, RemoteCommand};
    use crate::error::{GiftlinkError, Result};

    /// `POST http://<host>:<port>/api/command` with a JSON body
    #[derive(Debug, Clone)]
    pub struct HttpActuator {
        client: reqwest::Client,
    }

    impl HttpActuator {
        pub fn new(timeout: Duration) -> Result<Self> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| GiftlinkError::Config(format!("HTTP client: {e}")))?;
            Ok(Self { client })
        }
    }

    #[async_trait]
    impl RemoteActuator for HttpActuator {
        async fn actuate(
            &self,
            host: &str,
            port: u16,
            command: &RemoteCommand<'_>,
        ) -> Result<String> {
            let url = format!("http://{host}:{port}/api/command");
            debug!("POST {} ({})", url, command.action);

            let response = self
                .client
                .post(&url)
                .json(command)
                .send()
                .await
                .map_err(|e| GiftlinkError::RemoteActuationFailed(format!("{url}: {e}")))?;

            let status = response.status();
            let body = response.text().await;
            if !status.is_success() {
                let message = match body.as_deref().map(str::trim) {
                    Ok(detail) if !detail.is_empty() => {
                        format!("{url} returned {status}: {detail}")
                    }
                    _ => format!("{url} returned {status}"),
                };
                return Err(GiftlinkError::RemoteActuationFailed(message));
            }
            let body = body.map_err(|e| {
                GiftlinkError::RemoteActuationFailed(format!("{url}: reading reply: {e}"))
            })?;
            Ok(if body.trim().is_empty() {
                status.to_string()
            } else {
                body.trim().to_string()
            })
        }
    }
}

/// Stand-in used when HTTP support is compiled out
#[cfg(not(feature = "http-devices"))]
#[derive(Debug, Clone, Default)]
pub struct HttpActuator;

#[cfg(not(feature = "http-devices"))]
impl HttpActuator {
    pub fn new(_timeout: std::time::Duration) -> Result<Self> {
        Ok(Self)
    }
}

#[cfg(not(feature = "http-devices"))]
#[async_trait]
impl RemoteActuator for HttpActuator {
    async fn actuate(&self, host: &str, port: u16, _command: &RemoteCommand<'_>) -> Result<String> {
        Err(crate::error::GiftlinkError::CapabilityUnavailable(format!(
            "built without HTTP device support, cannot reach {host}:{port}"
        )))
    }
}
