//! The slice of the EKS control plane the plugin talks to.
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kubeauth::credential::AwsConfig;
use kubeauth::kubeconfig::{
    AuthInfo, Cluster, Context, ExecConfig, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};

/// The exec command EKS kubeconfigs authenticate with
pub const AUTHENTICATOR_COMMAND: &str = "aws-iam-authenticator";
/// The ExecCredential version `aws-iam-authenticator` speaks
pub const EXEC_API_VERSION: &str = "client.authentication.k8s.io/v1alpha1";

const KUBECONFIG_CLUSTER: &str = "kubernetes";
const KUBECONFIG_USER: &str = "aws";

/// Credentials and region used for EKS API calls
#[derive(Clone, Default, PartialEq)]
pub struct AwsSession {
    /// Access key id
    pub access_key: String,
    /// Secret access key
    pub secret_key: String,
    /// The region the calls are made against
    pub region: String,
}

impl AwsSession {
    /// A session for `region` signed with the keys in `config`
    pub fn new(config: &AwsConfig, region: &str) -> Self {
        AwsSession {
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
            region: region.to_owned(),
        }
    }
}

impl fmt::Debug for AwsSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsSession")
            .field("access_key", &self.access_key)
            .field("secret_key", &"--- REDACTED ---")
            .field("region", &self.region)
            .finish()
    }
}

/// What DescribeCluster reports about a cluster
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EksCluster {
    /// Cluster name
    pub name: String,
    /// API server endpoint URL
    pub endpoint: String,
    /// Base64 encoded PEM bundle of the cluster CA
    pub certificate_authority_data: String,
    /// Kubernetes version
    pub version: Option<String>,
}

/// A bearer token accepted by an EKS API server
#[derive(Clone, PartialEq)]
pub struct Token {
    /// The `k8s-aws-v1.` prefixed token
    pub token: String,
    /// When the token stops being accepted
    pub expiration: Option<DateTime<Utc>>,
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("token", &"--- REDACTED ---")
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// EKS cluster discovery and IAM token generation.
///
/// **Note**: this trait is defined using [async-trait](https://crates.io/crates/async-trait).
#[async_trait]
pub trait EksApi: Send + Sync {
    /// Describe the named cluster
    async fn describe_cluster(&self, session: &AwsSession, name: &str)
        -> anyhow::Result<EksCluster>;

    /// List the names of every cluster in the session's region
    async fn list_clusters(&self, session: &AwsSession) -> anyhow::Result<Vec<String>>;

    /// Generate a bearer token for the cluster with the given id
    async fn get_token(&self, session: &AwsSession, cluster_id: &str) -> anyhow::Result<Token>;
}

/// Build the kubeconfig for an EKS cluster, authenticating through
/// `aws-iam-authenticator` the way `aws eks update-kubeconfig` would.
pub fn kubeconfig(cluster: &EksCluster) -> Kubeconfig {
    Kubeconfig::new(
        vec![NamedCluster {
            name: KUBECONFIG_CLUSTER.to_owned(),
            cluster: Cluster {
                server: cluster.endpoint.clone(),
                certificate_authority_data: Some(cluster.certificate_authority_data.clone()),
                ..Default::default()
            },
        }],
        vec![NamedContext {
            name: KUBECONFIG_USER.to_owned(),
            context: Context {
                cluster: KUBECONFIG_CLUSTER.to_owned(),
                user: KUBECONFIG_USER.to_owned(),
                namespace: None,
            },
        }],
        vec![NamedAuthInfo {
            name: KUBECONFIG_USER.to_owned(),
            auth_info: AuthInfo {
                exec: Some(ExecConfig {
                    api_version: Some(EXEC_API_VERSION.to_owned()),
                    command: AUTHENTICATOR_COMMAND.to_owned(),
                    args: vec!["token".to_owned(), "-i".to_owned(), cluster.name.clone()],
                    ..Default::default()
                }),
                ..Default::default()
            },
        }],
        Some(KUBECONFIG_USER.to_owned()),
    )
}
