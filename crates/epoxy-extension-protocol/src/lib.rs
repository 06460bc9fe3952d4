//! Wire types for the boot orchestrator's extension protocol.
//!
//! A booting machine asks the orchestrator to perform an extension; the
//! orchestrator POSTs an [`ExtensionRequest`] to the extension's HTTP
//! endpoint and relays the response body back to the machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Query parameter carrying the BMC password.
pub const PASSWORD_PARAM: &str = "p";

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ApiVersion {
    V1,
    V2,
}

impl ApiVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::V1 => "v1",
            Self::V2 => "v2",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "v1" => Some(Self::V1),
            "v2" => Some(Self::V2),
            _ => None,
        }
    }
}

impl std::fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of extensions this service knows how to perform.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ExtensionKind {
    AllocateK8sToken,
    BmcStorePassword,
    NodeDelete,
}

impl ExtensionKind {
    pub const ALL: [ExtensionKind; 3] = [
        ExtensionKind::AllocateK8sToken,
        ExtensionKind::BmcStorePassword,
        ExtensionKind::NodeDelete,
    ];

    /// Name as it appears in the request path, e.g. `/v1/node/delete`.
    pub fn name(self) -> &'static str {
        match self {
            Self::AllocateK8sToken => "allocate_k8s_token",
            Self::BmcStorePassword => "bmc_store_password",
            Self::NodeDelete => "node/delete",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl std::fmt::Display for ExtensionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Envelope sent by the orchestrator. Only the `v1` payload exists today;
/// a request without it is not actionable.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ExtensionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v1: Option<V1>,
}

impl ExtensionRequest {
    pub fn new(v1: V1) -> Self {
        Self { v1: Some(v1) }
    }

    pub fn decode(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct V1 {
    /// FQDN of the booting machine.
    pub hostname: String,
    #[serde(default)]
    pub ipv4_address: String,
    #[serde(default)]
    pub ipv6_address: String,
    /// Most recent time the machine reached its first boot stage.
    pub last_boot: DateTime<Utc>,
    /// Raw query string of the machine's original request to the orchestrator.
    #[serde(default, rename = "rawquery")]
    pub raw_query: String,
}

/// Everything a new machine needs to join the cluster.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct JoinCredential {
    pub api_address: String,
    pub token: String,
    pub ca_hash: String,
}
