//! A kubeauth plugin for EKS clusters.
//!
//! EKS kubeconfigs authenticate by running `aws-iam-authenticator` or
//! `aws eks get-token` through the exec mechanism. Refreshing such a
//! configuration means handing the exec command a fresh set of keys; no
//! kubeconfig is ever rewritten.
//!
//! The plugin can also resolve clusters directly from EKS, see
//! [`ClusterEnumerator`].
//!
//! # Example
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use aws_plugin::{AwsCli, AwsPlugin};
//! use kubeauth::credential::StaticCredentialStore;
//! use kubeauth::probe::KubeProbe;
//! use kubeauth::PluginRegistry;
//!
//! let mut registry = PluginRegistry::new(Arc::new(StaticCredentialStore::default()));
//! registry.register(
//!     aws_plugin::PLUGIN_NAME,
//!     AwsPlugin::new(Arc::new(AwsCli::new()), Arc::new(KubeProbe)),
//! );
//! ```

#![deny(missing_docs)]

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use kubeauth::credential::{
    fetch_credential, AwsConfig, CloudCredential, CloudCredentialInfo, CloudCredentialType,
    CredentialLookup,
};
use kubeauth::kubeconfig::{ExecConfig, ExecEnvVar, Kubeconfig};
use kubeauth::probe::{validate, ServerProbe};
use kubeauth::{
    ClientConfig, ClusterEnumerator, CredentialRef, Error, Plugin, RemoteCluster, Result,
    TlsClientConfig, UpdateOutcome,
};
use tracing::{debug, error, info, instrument, warn};

mod cli;
pub mod eks;

pub use cli::AwsCli;
pub use eks::{AwsSession, EksApi, EksCluster, Token};

/// The name the plugin registers under
pub const PLUGIN_NAME: &str = "aws";

/// Exec commands that mark a configuration as belonging to EKS
const OWNED_COMMANDS: &[&str] = &[eks::AUTHENTICATOR_COMMAND, "aws"];

const ACCESS_KEY_VARS: &[&str] = &["AWS_ACCESS_KEY", "AWS_ACCESS_KEY_ID"];
const SECRET_KEY_VARS: &[&str] = &["AWS_SECRET_KEY", "AWS_SECRET_ACCESS_KEY"];
const PROFILE_VAR: &str = "AWS_PROFILE";

/// Refreshes EKS client configurations with AWS access keys.
#[derive(Clone)]
pub struct AwsPlugin {
    eks: Arc<dyn EksApi>,
    probe: Arc<dyn ServerProbe>,
}

impl AwsPlugin {
    /// Create a plugin resolving clusters through `eks` and validating the
    /// resulting clients with `probe`.
    pub fn new(eks: Arc<dyn EksApi>, probe: Arc<dyn ServerProbe>) -> Self {
        AwsPlugin { eks, probe }
    }

    async fn remote_cluster(&self, session: &AwsSession, name: &str) -> Result<RemoteCluster> {
        let cluster = self
            .eks
            .describe_cluster(session, name)
            .await
            .map_err(|e| Error::provider_api(format!("describe cluster {}", name), e))?;
        let token = self
            .eks
            .get_token(session, &cluster.name)
            .await
            .map_err(|e| Error::provider_api(format!("get token for cluster {}", name), e))?;
        let ca_data = base64::decode(&cluster.certificate_authority_data)
            .map_err(|e| Error::provider_api(format!("decode CA data of cluster {}", name), e))?;

        let client = ClientConfig {
            host: cluster.endpoint.clone(),
            bearer_token: Some(token.token),
            tls: TlsClientConfig {
                ca_data: Some(ca_data),
                ..Default::default()
            },
            ..Default::default()
        };
        if let Err(e) = validate(self.probe.as_ref(), &client).await {
            error!(cluster = %cluster.name, error = %e, "Error validating client config");
            return Err(e);
        }
        let kubeconfig = eks::kubeconfig(&cluster).to_yaml()?;

        Ok(RemoteCluster {
            kubeconfig,
            client,
            // EKS clusters have no uid of their own
            uid: cluster.name,
            version: cluster.version,
            token_expiry: token.expiration,
        })
    }
}

/// Returns the AWS keys of `credential`, or a type mismatch error for any
/// other kind of credential.
fn aws_config(credential: &CloudCredential) -> Result<&AwsConfig> {
    match &credential.info {
        CloudCredentialInfo::Aws(aws) => Ok(aws),
        other => Err(Error::CredentialTypeMismatch {
            expected: CloudCredentialType::Aws,
            actual: other.kind(),
        }),
    }
}

/// Replaces any AWS identity in the exec environment with `keys`.
fn inject(keys: &AwsConfig, exec: &mut ExecConfig) {
    exec.env.retain(|var| {
        var.name != PROFILE_VAR
            && !ACCESS_KEY_VARS.contains(&var.name.as_str())
            && !SECRET_KEY_VARS.contains(&var.name.as_str())
    });
    for name in ACCESS_KEY_VARS {
        exec.env.push(ExecEnvVar::new(*name, keys.access_key.as_str()));
    }
    for name in SECRET_KEY_VARS {
        exec.env.push(ExecEnvVar::new(*name, keys.secret_key.as_str()));
    }
}

#[async_trait]
impl Plugin for AwsPlugin {
    fn credential_type(&self) -> CloudCredentialType {
        CloudCredentialType::Aws
    }

    fn owns(&self, config: &ClientConfig) -> bool {
        config
            .exec_provider
            .as_ref()
            .map(|exec| OWNED_COMMANDS.contains(&exec.command.as_str()))
            .unwrap_or(false)
    }

    #[instrument(level = "info", skip(self, lookup, credential, config, raw), fields(credential = %credential.name))]
    async fn update_client(
        &self,
        lookup: &dyn CredentialLookup,
        credential: &CredentialRef,
        org_id: &str,
        config: &mut ClientConfig,
        raw: &Kubeconfig,
    ) -> Result<UpdateOutcome> {
        if !self.owns(config) {
            return Ok(UpdateOutcome::NotClaimed);
        }
        let credential = fetch_credential(lookup, credential, org_id, PLUGIN_NAME).await?;
        self.update_client_by_cred_object(&credential, config, raw)
            .await
    }

    async fn update_client_by_cred_object(
        &self,
        credential: &CloudCredential,
        config: &mut ClientConfig,
        _raw: &Kubeconfig,
    ) -> Result<UpdateOutcome> {
        let exec = match config.exec_provider.as_mut() {
            Some(exec) if OWNED_COMMANDS.contains(&exec.command.as_str()) => exec,
            _ => return Ok(UpdateOutcome::NotClaimed),
        };
        let keys = aws_config(credential)?;
        inject(keys, exec);
        info!(host = %config.host, "Injected AWS credentials into exec environment");
        Ok(UpdateOutcome::Claimed { kubeconfig: None })
    }
}

#[async_trait]
impl ClusterEnumerator for AwsPlugin {
    #[instrument(level = "info", skip(self, credential))]
    async fn get_client(
        &self,
        credential: &CloudCredential,
        cluster: &str,
        region: &str,
    ) -> Result<RemoteCluster> {
        let session = AwsSession::new(aws_config(credential)?, region);
        self.remote_cluster(&session, cluster).await
    }

    #[instrument(level = "info", skip(self, credential))]
    async fn get_all_clients(
        &self,
        credential: &CloudCredential,
        region: &str,
    ) -> Result<BTreeMap<String, RemoteCluster>> {
        let session = AwsSession::new(aws_config(credential)?, region);
        let names = self
            .eks
            .list_clusters(&session)
            .await
            .map_err(|e| Error::provider_api(format!("list clusters in {}", region), e))?;
        debug!(count = names.len(), "Resolving EKS clusters");

        let session = &session;
        let resolved = join_all(names.into_iter().map(|name| async move {
            let result = self.remote_cluster(session, &name).await;
            (name, result)
        }))
        .await;

        Ok(resolved
            .into_iter()
            .filter_map(|(name, result)| match result {
                Ok(cluster) => Some((name, cluster)),
                // The credential may legitimately lack access to some clusters
                Err(e) => {
                    warn!(cluster = %name, error = %e, "Skipping cluster");
                    None
                }
            })
            .collect())
    }
}
