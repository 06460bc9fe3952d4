use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

use crate::bmc::datastore::{DEFAULT_DATASTORE_URL, DEFAULT_METADATA_TOKEN_URL};

const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:8800";
const DEFAULT_BIN_DIR: &str = "/usr/bin";
const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 60;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CredentialStoreKind {
    Datastore,
    Memory,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub listen_address: SocketAddr,
    pub bin_dir: PathBuf,
    pub operation_timeout: Duration,
    pub credential_store: CredentialStoreKind,
    pub datastore_url: String,
    pub datastore_token: Option<String>,
    pub metadata_url: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        let listen_address = var("EPOXY_EXTENSIONS_LISTEN_ADDRESS")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDRESS.to_string());
        let listen_address = listen_address
            .parse()
            .with_context(|| format!("parse listen address {listen_address}"))?;

        let operation_timeout = var("EPOXY_EXTENSIONS_OPERATION_TIMEOUT_SECS")
            .map(|raw| {
                raw.parse::<u64>()
                    .with_context(|| format!("parse operation timeout {raw}"))
            })
            .transpose()?
            .unwrap_or(DEFAULT_OPERATION_TIMEOUT_SECS);
        anyhow::ensure!(operation_timeout > 0, "operation timeout must be positive");

        let credential_store = match var("EPOXY_EXTENSIONS_CREDENTIAL_STORE").as_deref() {
            None | Some("datastore") => CredentialStoreKind::Datastore,
            Some("memory") => CredentialStoreKind::Memory,
            Some(other) => anyhow::bail!("unknown credential store {other:?}"),
        };

        Ok(Self {
            listen_address,
            bin_dir: var("EPOXY_EXTENSIONS_BIN_DIR")
                .unwrap_or_else(|| DEFAULT_BIN_DIR.to_string())
                .into(),
            operation_timeout: Duration::from_secs(operation_timeout),
            credential_store,
            datastore_url: var("EPOXY_EXTENSIONS_DATASTORE_URL")
                .unwrap_or_else(|| DEFAULT_DATASTORE_URL.to_string()),
            datastore_token: var("EPOXY_EXTENSIONS_DATASTORE_TOKEN"),
            metadata_url: var("EPOXY_EXTENSIONS_METADATA_URL")
                .unwrap_or_else(|| DEFAULT_METADATA_TOKEN_URL.to_string()),
        })
    }
}
