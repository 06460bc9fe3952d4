//! Cluster join credentials for booting machines.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use epoxy_extension_protocol::{ApiVersion, JoinCredential};
use tracing::info;

use crate::command::{invoke, CommandRunner};
use crate::error::ProvisioningError;
use crate::host::HostIdentity;

const TOKEN_TTL: &str = "5m";

// kubeadm join <api address> --token <token> --discovery-token-ca-cert-hash <hash>
const JOIN_COMMAND_FIELDS: usize = 7;
const API_ADDRESS_FIELD: usize = 2;
const TOKEN_FIELD: usize = 4;
const CA_HASH_FIELD: usize = 6;

/// Allocates a fresh bootstrap token per call. Holds no per-request state,
/// so one instance is shared by every in-flight request.
#[derive(Clone)]
pub struct TokenProvisioner {
    kubeadm: PathBuf,
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl TokenProvisioner {
    pub fn new(bin_dir: &Path, runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self {
            kubeadm: bin_dir.join("kubeadm"),
            runner,
            timeout,
        }
    }

    pub async fn create(&self, hostname: &str) -> Result<JoinCredential, ProvisioningError> {
        HostIdentity::parse(hostname)?;
        let output = invoke(
            self.runner.as_ref(),
            &self.kubeadm,
            &create_args(hostname),
            self.timeout,
        )
        .await?;
        let credential = parse_join_command(&String::from_utf8_lossy(&output))?;
        info!(
            hostname,
            api_address = %credential.api_address,
            "allocated join token"
        );
        Ok(credential)
    }
}

fn create_args(hostname: &str) -> Vec<String> {
    [
        "token",
        "create",
        "--ttl",
        TOKEN_TTL,
        "--print-join-command",
        "--description",
    ]
    .into_iter()
    .map(str::to_string)
    .chain(std::iter::once(format!(
        "Allow {hostname} to join the cluster"
    )))
    .collect()
}

/// Pick the API address, token and CA hash out of a printed join command.
/// Only the field count is checked.
pub fn parse_join_command(output: &str) -> Result<JoinCredential, ProvisioningError> {
    let fields: Vec<&str> = output.split_whitespace().collect();
    if fields.len() != JOIN_COMMAND_FIELDS {
        return Err(ProvisioningError::MalformedOutput {
            fields: fields.len(),
        });
    }
    Ok(JoinCredential {
        api_address: fields[API_ADDRESS_FIELD].to_string(),
        token: fields[TOKEN_FIELD].to_string(),
        ca_hash: fields[CA_HASH_FIELD].to_string(),
    })
}

/// v1 callers get the bare token; everything newer gets the whole credential.
pub fn render(version: ApiVersion, credential: &JoinCredential) -> Vec<u8> {
    match version {
        ApiVersion::V1 => credential.token.clone().into_bytes(),
        _ => serde_json::to_vec(credential).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use epoxy_test_utils::TEST_JOIN_COMMAND;
    use serde_json::json;
    use std::sync::Mutex;

    /// Answers each call with a join command built from the `--description`
    /// argument, so every caller gets a distinct credential.
    #[derive(Default)]
    struct EchoHostRunner {
        calls: Mutex<Vec<(PathBuf, Vec<String>)>>,
    }

    #[async_trait]
    impl CommandRunner for EchoHostRunner {
        async fn run(&self, program: &Path, args: &[String]) -> anyhow::Result<Vec<u8>> {
            self.calls
                .lock()
                .unwrap()
                .push((program.to_path_buf(), args.to_vec()));
            let host = args
                .last()
                .and_then(|desc| desc.split_whitespace().nth(1))
                .unwrap_or_default()
                .to_string();
            tokio::task::yield_now().await;
            Ok(format!(
                "kubeadm join api-{host}:6443 --token tok-{host} --discovery-token-ca-cert-hash sha256:{host}\n"
            )
            .into_bytes())
        }
    }

    struct FixedRunner(&'static str);

    #[async_trait]
    impl CommandRunner for FixedRunner {
        async fn run(&self, _program: &Path, _args: &[String]) -> anyhow::Result<Vec<u8>> {
            Ok(self.0.as_bytes().to_vec())
        }
    }

    struct FailingRunner;

    #[async_trait]
    impl CommandRunner for FailingRunner {
        async fn run(&self, _program: &Path, _args: &[String]) -> anyhow::Result<Vec<u8>> {
            anyhow::bail!("exit status: 1: token create failed")
        }
    }

    fn credential() -> JoinCredential {
        JoinCredential {
            api_address: "api.example.com:6443".to_string(),
            token: "012345.abcdefghijklmnop".to_string(),
            ca_hash: "sha256:hash".to_string(),
        }
    }

    #[test]
    fn parses_canonical_join_command() {
        let parsed = parse_join_command(TEST_JOIN_COMMAND).expect("parse join command");
        assert_eq!(parsed, credential());
    }

    #[test]
    fn tolerates_surrounding_whitespace() {
        let parsed = parse_join_command(&format!("\n  {TEST_JOIN_COMMAND} \n"))
            .expect("parse padded join command");
        assert_eq!(parsed, credential());
    }

    #[test]
    fn rejects_wrong_field_count() {
        for output in [
            "",
            "kubeadm join api.example.com:6443 --token 012345.abcdefghijklmnop",
            "kubeadm join api.example.com:6443 --token t --discovery-token-ca-cert-hash h --v=5",
        ] {
            let err = parse_join_command(output).expect_err("wrong field count");
            assert!(matches!(err, ProvisioningError::MalformedOutput { .. }));
        }
    }

    #[test]
    fn field_content_is_not_validated() {
        let parsed = parse_join_command("a b c d e f g").expect("seven fields parse");
        assert_eq!(parsed.api_address, "c");
        assert_eq!(parsed.token, "e");
        assert_eq!(parsed.ca_hash, "g");
    }

    #[test]
    fn render_v1_is_bare_token() {
        assert_eq!(
            render(ApiVersion::V1, &credential()),
            b"012345.abcdefghijklmnop".to_vec()
        );
    }

    #[test]
    fn render_v2_is_full_credential() {
        let body = render(ApiVersion::V2, &credential());
        let value: serde_json::Value = serde_json::from_slice(&body).expect("v2 body is json");
        assert_eq!(
            value,
            json!({
                "api_address": "api.example.com:6443",
                "token": "012345.abcdefghijklmnop",
                "ca_hash": "sha256:hash"
            })
        );
    }

    #[tokio::test]
    async fn create_invokes_kubeadm_with_description() {
        let runner = Arc::new(EchoHostRunner::default());
        let provisioner = TokenProvisioner::new(
            Path::new("/opt/bin"),
            runner.clone(),
            Duration::from_secs(5),
        );

        let credential = provisioner
            .create("mlab1-foo01.mlab-oti.measurement-lab.org")
            .await
            .expect("create token");
        assert_eq!(credential.token, "tok-mlab1-foo01.mlab-oti.measurement-lab.org");

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (program, args) = &calls[0];
        assert_eq!(program, &PathBuf::from("/opt/bin/kubeadm"));
        assert_eq!(
            args,
            &vec![
                "token".to_string(),
                "create".to_string(),
                "--ttl".to_string(),
                "5m".to_string(),
                "--print-join-command".to_string(),
                "--description".to_string(),
                "Allow mlab1-foo01.mlab-oti.measurement-lab.org to join the cluster".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn create_surfaces_malformed_output() {
        let provisioner = TokenProvisioner::new(
            Path::new("/usr/bin"),
            Arc::new(FixedRunner("kubeadm join --token")),
            Duration::from_secs(5),
        );
        let err = provisioner
            .create("mlab1-foo01.example.org")
            .await
            .expect_err("malformed output");
        assert!(matches!(
            err,
            ProvisioningError::MalformedOutput { fields: 3 }
        ));
    }

    #[test]
    fn malformed_output_error_omits_token() {
        let output = "kubeadm join api.example.com:6443 --token 012345.abcdefghijklmnop --v=5";
        let err = parse_join_command(output).expect_err("six fields");
        let message = err.to_string();
        assert!(!message.contains("012345.abcdefghijklmnop"), "{message}");
        assert!(message.contains('6'), "{message}");
    }

    #[tokio::test]
    async fn undecomposable_hostname_never_runs_kubeadm() {
        let runner = Arc::new(EchoHostRunner::default());
        let provisioner = TokenProvisioner::new(
            Path::new("/usr/bin"),
            runner.clone(),
            Duration::from_secs(5),
        );

        for hostname in ["lol", "", "mlab1.example.org", "MLAB1-foo01.example.org"] {
            let err = provisioner
                .create(hostname)
                .await
                .expect_err("invalid hostname");
            assert!(
                matches!(err, ProvisioningError::InvalidHostname(_)),
                "{hostname}: {err}"
            );
        }
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_surfaces_command_failure() {
        let provisioner = TokenProvisioner::new(
            Path::new("/usr/bin"),
            Arc::new(FailingRunner),
            Duration::from_secs(5),
        );
        let err = provisioner
            .create("mlab1-foo01.example.org")
            .await
            .expect_err("command failure");
        assert!(matches!(err, ProvisioningError::CommandFailure { .. }));
    }

    #[tokio::test]
    async fn concurrent_creates_never_mix_credentials() {
        let provisioner = TokenProvisioner::new(
            Path::new("/usr/bin"),
            Arc::new(EchoHostRunner::default()),
            Duration::from_secs(5),
        );
        let hosts: Vec<String> = (0..64)
            .map(|i| format!("mlab1-node{i:02}.mlab-oti.measurement-lab.org"))
            .collect();

        let handles: Vec<_> = hosts
            .iter()
            .cloned()
            .map(|host| {
                let provisioner = provisioner.clone();
                tokio::spawn(async move {
                    let credential = provisioner.create(&host).await;
                    (host, credential)
                })
            })
            .collect();

        for joined in futures::future::join_all(handles).await {
            let (host, credential) = joined.expect("create task completes");
            let credential = credential.unwrap_or_else(|err| panic!("{host}: {err}"));
            assert_eq!(credential.api_address, format!("api-{host}:6443"));
            assert_eq!(credential.token, format!("tok-{host}"));
            assert_eq!(credential.ca_hash, format!("sha256:{host}"));
        }
    }
}
