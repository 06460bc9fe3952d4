use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{BmcCredential, CredentialProvider, CredentialScope};

pub const DEFAULT_DATASTORE_URL: &str = "https://datastore.googleapis.com";
pub const DEFAULT_METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

const CREDENTIALS_KIND: &str = "Credentials";

/// How the provider authorizes against the Datastore API.
#[derive(Clone, Debug)]
pub enum TokenSource {
    Static(String),
    /// Fetch a fresh access token from the instance metadata server on every write.
    Metadata { url: String },
}

/// Stores credentials as Cloud Datastore entities through the REST API.
#[derive(Debug)]
pub struct DatastoreProvider {
    client: reqwest::Client,
    base_url: String,
    token_source: TokenSource,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CommitRequest {
    mode: &'static str,
    mutations: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
}

impl DatastoreProvider {
    pub fn new(base_url: impl Into<String>, token_source: TokenSource) -> anyhow::Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            anyhow::bail!("datastore base URL cannot be empty");
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            token_source,
        })
    }

    async fn access_token(&self) -> anyhow::Result<String> {
        match &self.token_source {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::Metadata { url } => {
                let resp = self
                    .client
                    .get(url)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await
                    .context("send metadata token request")?;
                let status = resp.status();
                if !status.is_success() {
                    let text = resp.text().await.unwrap_or_default();
                    anyhow::bail!("failed to fetch access token: {status} {text}");
                }
                let token: MetadataToken =
                    resp.json().await.context("decode metadata token response")?;
                Ok(token.access_token)
            }
        }
    }
}

/// A single non-transactional upsert, so the newest write always wins.
fn commit_request(scope: &CredentialScope, key: &str, credential: &BmcCredential) -> CommitRequest {
    let entity = json!({
        "key": {
            "partitionId": {
                "projectId": scope.project,
                "namespaceId": scope.namespace,
            },
            "path": [{"kind": CREDENTIALS_KIND, "name": key}],
        },
        "properties": {
            "Address": {"stringValue": credential.address},
            "Hostname": {"stringValue": credential.hostname},
            "Model": {"stringValue": credential.model},
            "Username": {"stringValue": credential.username},
            "Password": {"stringValue": credential.password, "excludeFromIndexes": true},
        },
    });
    CommitRequest {
        mode: "NON_TRANSACTIONAL",
        mutations: vec![json!({ "upsert": entity })],
    }
}

#[async_trait]
impl CredentialProvider for DatastoreProvider {
    async fn add_credentials(
        &self,
        scope: &CredentialScope,
        key: &str,
        credential: &BmcCredential,
    ) -> anyhow::Result<()> {
        let token = self.access_token().await?;
        let url = format!("{}/v1/projects/{}:commit", self.base_url, scope.project);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&commit_request(scope, key, credential))
            .send()
            .await
            .context("send datastore commit request")?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("failed to commit credentials: {status} {text}");
        }
        Ok(())
    }
}
