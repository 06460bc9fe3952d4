use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path, RawQuery};
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Extension, Json, Router};
use chrono::Utc;
use epoxy_extension_protocol::{
    ApiVersion, ExtensionKind, JSON_CONTENT_TYPE, PASSWORD_PARAM, TEXT_CONTENT_TYPE, V1,
};
use tracing::error;

use crate::bmc::BmcCredentialStore;
use crate::error::ExtensionError;
use crate::gate;
use crate::metrics::ExtensionMetrics;
use crate::node::NodeLifecycleManager;
use crate::token::{self, TokenProvisioner};

/// A provisioning operation bound to one `/{version}/{extension}` route.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operation {
    AllocateToken(ApiVersion),
    StoreBmcPassword,
    DeleteNode,
}

impl Operation {
    pub fn kind(self) -> ExtensionKind {
        match self {
            Self::AllocateToken(_) => ExtensionKind::AllocateK8sToken,
            Self::StoreBmcPassword => ExtensionKind::BmcStorePassword,
            Self::DeleteNode => ExtensionKind::NodeDelete,
        }
    }

    fn content_type(self) -> Option<&'static str> {
        match self {
            Self::AllocateToken(ApiVersion::V1) => Some(TEXT_CONTENT_TYPE),
            Self::AllocateToken(_) => Some(JSON_CONTENT_TYPE),
            Self::StoreBmcPassword | Self::DeleteNode => None,
        }
    }
}

fn route_table() -> HashMap<(ExtensionKind, ApiVersion), Operation> {
    HashMap::from([
        (
            (ExtensionKind::AllocateK8sToken, ApiVersion::V1),
            Operation::AllocateToken(ApiVersion::V1),
        ),
        (
            (ExtensionKind::AllocateK8sToken, ApiVersion::V2),
            Operation::AllocateToken(ApiVersion::V2),
        ),
        (
            (ExtensionKind::BmcStorePassword, ApiVersion::V1),
            Operation::StoreBmcPassword,
        ),
        (
            (ExtensionKind::NodeDelete, ApiVersion::V1),
            Operation::DeleteNode,
        ),
    ])
}

#[derive(Debug)]
pub struct ExtensionResponse {
    content_type: Option<&'static str>,
    body: Vec<u8>,
}

impl IntoResponse for ExtensionResponse {
    fn into_response(self) -> Response {
        match self.content_type {
            Some(content_type) => {
                ([(header::CONTENT_TYPE, content_type)], self.body).into_response()
            }
            None => StatusCode::OK.into_response(),
        }
    }
}

/// Routes admitted requests to the operation configured for their
/// extension and version. Shared across requests; holds no request state.
#[derive(Clone)]
pub struct Dispatcher {
    routes: Arc<HashMap<(ExtensionKind, ApiVersion), Operation>>,
    tokens: TokenProvisioner,
    bmc: BmcCredentialStore,
    nodes: NodeLifecycleManager,
}

impl Dispatcher {
    pub fn new(
        tokens: TokenProvisioner,
        bmc: BmcCredentialStore,
        nodes: NodeLifecycleManager,
    ) -> Self {
        Self {
            routes: Arc::new(route_table()),
            tokens,
            bmc,
            nodes,
        }
    }

    pub fn operation(&self, name: &str, version: &str) -> Result<Operation, ExtensionError> {
        ExtensionKind::from_name(name)
            .zip(ApiVersion::parse(version))
            .and_then(|key| self.routes.get(&key).copied())
            .ok_or_else(|| ExtensionError::UnknownExtension {
                name: name.to_string(),
                version: version.to_string(),
            })
    }

    pub async fn route(
        &self,
        name: &str,
        version: &str,
        v1: &V1,
        uri_query: Option<&str>,
    ) -> Result<ExtensionResponse, ExtensionError> {
        let operation = self.operation(name, version)?;
        let body = match operation {
            Operation::AllocateToken(version) => {
                let credential = self.tokens.create(&v1.hostname).await?;
                token::render(version, &credential)
            }
            Operation::StoreBmcPassword => {
                let password = password(v1, uri_query)?;
                self.bmc.put(&v1.hostname, &password).await?;
                Vec::new()
            }
            Operation::DeleteNode => {
                self.nodes.delete(&v1.hostname).await?;
                Vec::new()
            }
        };
        Ok(ExtensionResponse {
            content_type: operation.content_type(),
            body,
        })
    }
}

/// The BMC password, from the envelope's query string first and the request
/// URL second.
fn password(v1: &V1, uri_query: Option<&str>) -> Result<String, ExtensionError> {
    for raw in [Some(v1.raw_query.as_str()), uri_query].into_iter().flatten() {
        if raw.contains(';') {
            return Err(ExtensionError::BadRequest(format!(
                "invalid query string: {raw:?}"
            )));
        }
        let found = url::form_urlencoded::parse(raw.as_bytes())
            .find(|(key, _)| key == PASSWORD_PARAM)
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty());
        if let Some(password) = found {
            return Ok(password);
        }
    }
    Err(ExtensionError::MissingParameter(PASSWORD_PARAM))
}

pub async fn extension(
    Extension(dispatcher): Extension<Dispatcher>,
    Extension(metrics): Extension<ExtensionMetrics>,
    Path((version, name)): Path<(String, String)>,
    method: Method,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<ExtensionResponse, ExtensionError> {
    let name = name.trim_start_matches('/');
    let started = Instant::now();
    let result = match gate::admit(&method, &body, Utc::now()) {
        Ok(v1) => {
            dispatcher
                .route(name, &version, &v1, query.as_deref())
                .await
        }
        Err(err) => Err(err),
    };

    if let Ok(operation) = dispatcher.operation(name, &version) {
        let status = match &result {
            Ok(_) => StatusCode::OK,
            Err(err) => err.status(),
        };
        metrics.observe(operation.kind(), &method, status, started.elapsed());
    }
    result
}

pub async fn scrape_metrics(
    Extension(metrics): Extension<ExtensionMetrics>,
) -> Result<([(header::HeaderName, &'static str); 1], String), StatusCode> {
    match metrics.encode_text() {
        Ok(text) => Ok(([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], text)),
        Err(err) => {
            error!("failed to encode metrics: {err:#}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn root() -> &'static str {
    "ePoxy Extensions"
}

pub async fn health_check() -> Result<Json<()>, (StatusCode, String)> {
    Ok(Json(()))
}

async fn fallback(uri: Uri) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, format!("No route for {uri}"))
}

pub fn router(dispatcher: Dispatcher, metrics: ExtensionMetrics) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health-check", get(health_check))
        .route("/metrics", get(scrape_metrics))
        .route("/:version/*extension", any(extension))
        .fallback(fallback)
        .layer(Extension(dispatcher))
        .layer(Extension(metrics))
}
