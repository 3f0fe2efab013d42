//! Controller error types.

use std::net::SocketAddr;

use thiserror::Error;

use fleet_core::Component;
use fleet_provider::ProviderError;

pub type ControllerResult<T> = Result<T, ControllerError>;

/// Errors that end a controller run.
///
/// Individual command failures (launch, start, stop, terminate, metric
/// writes) are logged and absorbed; only these reach the caller.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("failed to read queue alarm {alarm} for {component}: {source}")]
    AlarmState {
        component: Component,
        alarm: String,
        #[source]
        source: ProviderError,
    },

    #[error("failed to enable {target}: {source}")]
    EnableTriggers {
        target: String,
        #[source]
        source: ProviderError,
    },

    #[error("failed to bind webhook listener on {addr}: {source}")]
    WebhookBind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("event handler fault: {0}")]
    Fault(String),
}

impl ControllerError {
    /// Whether the error happened before the controller started serving.
    pub fn is_startup(&self) -> bool {
        !matches!(self, ControllerError::Fault(_))
    }
}
