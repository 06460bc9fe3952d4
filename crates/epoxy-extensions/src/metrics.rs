//! Prometheus request metrics, served at `/metrics`.
//!
//! Each extension gets a `<extension>_request_duration_seconds` histogram
//! labelled by lowercase HTTP `method` and status `code`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{Method, StatusCode};
use epoxy_extension_protocol::ExtensionKind;
use prometheus::{Encoder, HistogramOpts, HistogramVec, Registry, TextEncoder};

/// Buckets in periods that read naturally to an operator, up to five minutes.
pub const DURATION_BUCKETS: &[f64] = &[0.001, 0.01, 0.1, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

#[derive(Clone)]
pub struct ExtensionMetrics {
    registry: Registry,
    durations: Arc<HashMap<ExtensionKind, HistogramVec>>,
}

impl ExtensionMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let mut durations = HashMap::new();
        for kind in ExtensionKind::ALL {
            let histogram = HistogramVec::new(
                HistogramOpts::new(metric_name(kind), "Request status codes and execution times.")
                    .buckets(DURATION_BUCKETS.to_vec()),
                &["method", "code"],
            )?;
            registry.register(Box::new(histogram.clone()))?;
            durations.insert(kind, histogram);
        }
        Ok(Self {
            registry,
            durations: Arc::new(durations),
        })
    }

    pub fn observe(
        &self,
        kind: ExtensionKind,
        method: &Method,
        status: StatusCode,
        elapsed: Duration,
    ) {
        if let Some(histogram) = self.durations.get(&kind) {
            let method = method.as_str().to_ascii_lowercase();
            histogram
                .with_label_values(&[method.as_str(), status.as_str()])
                .observe(elapsed.as_secs_f64());
        }
    }

    /// Everything registered, in the Prometheus text exposition format.
    pub fn encode_text(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

fn metric_name(kind: ExtensionKind) -> String {
    format!("{}_request_duration_seconds", kind.name().replace('/', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_histogram_per_extension() {
        assert_eq!(
            metric_name(ExtensionKind::AllocateK8sToken),
            "allocate_k8s_token_request_duration_seconds"
        );
        assert_eq!(
            metric_name(ExtensionKind::BmcStorePassword),
            "bmc_store_password_request_duration_seconds"
        );
        assert_eq!(
            metric_name(ExtensionKind::NodeDelete),
            "node_delete_request_duration_seconds"
        );
    }

    #[test]
    fn observations_are_labelled_by_method_and_code() {
        let metrics = ExtensionMetrics::new().expect("register metrics");
        metrics.observe(
            ExtensionKind::BmcStorePassword,
            &Method::POST,
            StatusCode::BAD_REQUEST,
            Duration::from_millis(5),
        );

        let text = metrics.encode_text().expect("encode metrics");
        let count = text
            .lines()
            .find(|line| line.starts_with("bmc_store_password_request_duration_seconds_count"))
            .expect("count line present");
        assert!(count.contains(r#"method="post""#), "{count}");
        assert!(count.contains(r#"code="400""#), "{count}");
        assert!(count.ends_with(" 1"), "{count}");
        assert!(!text.contains("allocate_k8s_token_request_duration_seconds_count"));
    }

    #[test]
    fn registries_are_independent() {
        let first = ExtensionMetrics::new().expect("first registry");
        let second = ExtensionMetrics::new().expect("second registry");
        first.observe(
            ExtensionKind::NodeDelete,
            &Method::POST,
            StatusCode::OK,
            Duration::from_millis(1),
        );
        assert!(!second
            .encode_text()
            .expect("encode")
            .contains("node_delete_request_duration_seconds_count"));
    }
}
