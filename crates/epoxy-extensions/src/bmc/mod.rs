//! BMC password storage.
//!
//! A booting machine reports the password it configured on its baseboard
//! management controller. The password is stored against the BMC's own
//! hostname (the machine hostname with a `d` suffix on the machine name) so
//! out-of-band tooling can later find it.

pub mod datastore;

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::ProvisioningError;
use crate::host::HostIdentity;

pub use datastore::{DatastoreProvider, TokenSource};

pub const CREDENTIALS_NAMESPACE: &str = "reboot-api";
pub const BMC_MODEL: &str = "DRAC";
pub const BMC_USERNAME: &str = "admin";

#[derive(Clone, Eq, PartialEq)]
pub struct BmcCredential {
    pub address: String,
    pub hostname: String,
    pub model: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for BmcCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BmcCredential")
            .field("address", &self.address)
            .field("hostname", &self.hostname)
            .field("model", &self.model)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Where a credential lives inside the backing store.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct CredentialScope {
    pub project: String,
    pub namespace: String,
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Write `credential` under `key`, replacing any existing entry.
    async fn add_credentials(
        &self,
        scope: &CredentialScope,
        key: &str,
        credential: &BmcCredential,
    ) -> anyhow::Result<()>;
}

#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn lookup(&self, hostname: &str) -> anyhow::Result<Vec<IpAddr>>;
}

#[derive(Debug, Default)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn lookup(&self, hostname: &str) -> anyhow::Result<Vec<IpAddr>> {
        Ok(tokio::net::lookup_host((hostname, 0))
            .await?
            .map(|addr| addr.ip())
            .collect())
    }
}

/// Keeps credentials in process memory.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    entries: RwLock<HashMap<(CredentialScope, String), BmcCredential>>,
}

impl MemoryProvider {
    pub async fn get(&self, scope: &CredentialScope, key: &str) -> Option<BmcCredential> {
        self.entries
            .read()
            .await
            .get(&(scope.clone(), key.to_string()))
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl CredentialProvider for MemoryProvider {
    async fn add_credentials(
        &self,
        scope: &CredentialScope,
        key: &str,
        credential: &BmcCredential,
    ) -> anyhow::Result<()> {
        self.entries
            .write()
            .await
            .insert((scope.clone(), key.to_string()), credential.clone());
        Ok(())
    }
}

#[derive(Clone)]
pub struct BmcCredentialStore {
    resolver: Arc<dyn HostResolver>,
    provider: Arc<dyn CredentialProvider>,
    timeout: Duration,
}

impl BmcCredentialStore {
    pub fn new(
        resolver: Arc<dyn HostResolver>,
        provider: Arc<dyn CredentialProvider>,
        timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            provider,
            timeout,
        }
    }

    pub async fn put(&self, hostname: &str, password: &str) -> Result<(), ProvisioningError> {
        let identity = HostIdentity::parse(hostname)?;
        let bmc_hostname = identity.bmc_hostname();

        let address = self.resolve(&bmc_hostname).await?;
        let credential = BmcCredential {
            address: address.to_string(),
            hostname: bmc_hostname.clone(),
            model: BMC_MODEL.to_string(),
            username: BMC_USERNAME.to_string(),
            password: password.to_string(),
        };
        let scope = CredentialScope {
            project: identity.project,
            namespace: CREDENTIALS_NAMESPACE.to_string(),
        };

        let write = self
            .provider
            .add_credentials(&scope, &bmc_hostname, &credential);
        match tokio::time::timeout(self.timeout, write).await {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                return Err(ProvisioningError::StoreFailure {
                    hostname: bmc_hostname,
                    source,
                })
            }
            Err(_) => {
                return Err(ProvisioningError::Timeout {
                    operation: "credential store write",
                    timeout: self.timeout,
                })
            }
        }

        info!(
            bmc_hostname = %credential.hostname,
            address = %credential.address,
            project = %scope.project,
            "stored BMC credentials"
        );
        Ok(())
    }

    async fn resolve(&self, bmc_hostname: &str) -> Result<IpAddr, ProvisioningError> {
        let dns_failure = |detail: String| ProvisioningError::DnsFailure {
            hostname: bmc_hostname.to_string(),
            detail,
        };
        let addrs = tokio::time::timeout(self.timeout, self.resolver.lookup(bmc_hostname))
            .await
            .map_err(|_| ProvisioningError::Timeout {
                operation: "BMC hostname lookup",
                timeout: self.timeout,
            })?
            .map_err(|err| dns_failure(format!("{err:#}")))?;
        addrs
            .first()
            .copied()
            .ok_or_else(|| dns_failure("no addresses".to_string()))
    }
}
