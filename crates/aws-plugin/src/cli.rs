//! An [`EksApi`] backed by the `aws` command line.
use std::ffi::OsStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::eks::{AwsSession, EksApi, EksCluster, Token};

const AWS: &str = "aws";

/// Runs `aws eks ...` with the session's keys passed through the environment.
///
/// Any profile or session token in the process environment is hidden from the
/// child so the explicit keys are the only identity it can use.
#[derive(Clone, Debug)]
pub struct AwsCli {
    program: String,
}

impl AwsCli {
    /// Use the `aws` binary found on `PATH`
    pub fn new() -> Self {
        Self::with_program(AWS)
    }

    /// Use the given `aws` binary
    pub fn with_program(program: impl Into<String>) -> Self {
        AwsCli {
            program: program.into(),
        }
    }

    fn command<I, S>(&self, session: &AwsSession, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .args(&["--region", &session.region, "--output", "json"])
            .env("AWS_ACCESS_KEY_ID", &session.access_key)
            .env("AWS_SECRET_ACCESS_KEY", &session.secret_key)
            .env_remove("AWS_PROFILE")
            .env_remove("AWS_SESSION_TOKEN")
            .kill_on_drop(true);
        cmd
    }

    async fn run<T, I, S>(&self, session: &AwsSession, args: I) -> anyhow::Result<T>
    where
        T: DeserializeOwned,
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = self.command(session, args);
        debug!(command = %command_line(&cmd), "Running aws cli");
        let output = cmd.output().await?;
        if !output.status.success() {
            anyhow::bail!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

/// The program and its arguments. The environment carries the keys and is
/// left out.
fn command_line(cmd: &Command) -> String {
    let cmd = cmd.as_std();
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(OsStr::to_string_lossy)
        .collect::<Vec<_>>()
        .join(" ")
}

impl Default for AwsCli {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct DescribeClusterOutput {
    cluster: ClusterDescription,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterDescription {
    name: String,
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    certificate_authority: Option<CertificateAuthority>,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Deserialize)]
struct CertificateAuthority {
    #[serde(default)]
    data: Option<String>,
}

#[derive(Deserialize)]
struct ListClustersOutput {
    #[serde(default)]
    clusters: Vec<String>,
}

#[derive(Deserialize)]
struct ExecCredential {
    status: ExecCredentialStatus,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecCredentialStatus {
    token: String,
    #[serde(default)]
    expiration_timestamp: Option<DateTime<Utc>>,
}

impl From<DescribeClusterOutput> for EksCluster {
    fn from(output: DescribeClusterOutput) -> Self {
        let cluster = output.cluster;
        EksCluster {
            name: cluster.name,
            endpoint: cluster.endpoint.unwrap_or_default(),
            certificate_authority_data: cluster
                .certificate_authority
                .and_then(|ca| ca.data)
                .unwrap_or_default(),
            version: cluster.version,
        }
    }
}

#[async_trait]
impl EksApi for AwsCli {
    async fn describe_cluster(
        &self,
        session: &AwsSession,
        name: &str,
    ) -> anyhow::Result<EksCluster> {
        let output: DescribeClusterOutput = self
            .run(session, &["eks", "describe-cluster", "--name", name])
            .await?;
        Ok(output.into())
    }

    async fn list_clusters(&self, session: &AwsSession) -> anyhow::Result<Vec<String>> {
        let output: ListClustersOutput = self.run(session, &["eks", "list-clusters"]).await?;
        Ok(output.clusters)
    }

    async fn get_token(&self, session: &AwsSession, cluster_id: &str) -> anyhow::Result<Token> {
        let credential: ExecCredential = self
            .run(session, &["eks", "get-token", "--cluster-name", cluster_id])
            .await?;
        Ok(Token {
            token: credential.status.token,
            expiration: credential.status.expiration_timestamp,
        })
    }
}
