use axum::http::Method;
use chrono::{DateTime, Duration, Utc};
use epoxy_extension_protocol::{ExtensionRequest, PASSWORD_PARAM, V1};
use tracing::info;

use crate::error::ExtensionError;

const FRESHNESS_WINDOW_MINUTES: i64 = 120;

/// Oldest boot the service still acts on. Past this the orchestrator's
/// report about the machine is no longer trusted.
pub fn freshness_window() -> Duration {
    Duration::minutes(FRESHNESS_WINDOW_MINUTES)
}

/// Admit an inbound extension request: POST only, a decodable envelope with
/// a v1 payload, and a boot no older than [`freshness_window`] as of `now`.
pub fn admit(method: &Method, body: &[u8], now: DateTime<Utc>) -> Result<V1, ExtensionError> {
    if method != Method::POST {
        return Err(ExtensionError::MethodNotAllowed(method.to_string()));
    }

    let request = ExtensionRequest::decode(body)
        .map_err(|err| ExtensionError::BadRequest(format!("decode extension request: {err}")))?;
    let Some(v1) = request.v1.clone() else {
        return Err(ExtensionError::BadRequest(
            "extension request has no v1 payload".to_string(),
        ));
    };

    let elapsed = now - v1.last_boot;
    if elapsed > freshness_window() {
        return Err(ExtensionError::Stale {
            elapsed_minutes: elapsed.num_minutes(),
        });
    }

    info!(request = %audit_record(&request), "admitted extension request");
    Ok(v1)
}

/// The envelope as logged: verbatim, except for the BMC password value.
fn audit_record(request: &ExtensionRequest) -> String {
    let mut request = request.clone();
    if let Some(v1) = request.v1.as_mut() {
        let pairs: Vec<(String, String)> = url::form_urlencoded::parse(v1.raw_query.as_bytes())
            .into_owned()
            .collect();
        if pairs.iter().any(|(key, _)| key == PASSWORD_PARAM) {
            v1.raw_query = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(pairs.iter().map(|(key, value)| {
                    if key == PASSWORD_PARAM {
                        (key.as_str(), "REDACTED")
                    } else {
                        (key.as_str(), value.as_str())
                    }
                }))
                .finish();
        }
    }
    request.encode()
}
