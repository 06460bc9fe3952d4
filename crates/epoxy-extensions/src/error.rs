use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, info};

/// Failure of a provisioning operation. Every variant is raised before any
/// persistent write is committed.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("command {program} failed: {detail}")]
    CommandFailure { program: String, detail: String },

    #[error("join command has {fields} fields, expected 7")]
    MalformedOutput { fields: usize },

    #[error("could not parse hostname: {0}")]
    InvalidHostname(String),

    #[error("could not resolve BMC hostname {hostname}: {detail}")]
    DnsFailure { hostname: String, detail: String },

    #[error("could not store credentials for {hostname}: {source:#}")]
    StoreFailure {
        hostname: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
}

/// Terminal outcome of an extension request that did not succeed.
#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("method {0} not allowed")]
    MethodNotAllowed(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("query parameter '{0}' missing in request, or is empty")]
    MissingParameter(&'static str),

    #[error("unknown extension {name} ({version})")]
    UnknownExtension { name: String, version: String },

    #[error("machine booted {elapsed_minutes} minutes ago")]
    Stale { elapsed_minutes: i64 },

    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),
}

impl ExtensionError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::BadRequest(_) | Self::MissingParameter(_) | Self::UnknownExtension { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::Stale { .. } => StatusCode::REQUEST_TIMEOUT,
            Self::Provisioning(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// Details stay in the server log; callers only ever see the status code.
impl IntoResponse for ExtensionError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), "extension request failed: {self:#}");
        } else {
            info!(status = status.as_u16(), "extension request rejected: {self}");
        }
        status.into_response()
    }
}
