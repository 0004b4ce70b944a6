//! Liveness checks for client configurations.
//!
//! The cheapest authenticated request a client can make is asking the API
//! server for its version. Plugins use it both to skip refreshes of
//! configurations that still work and to verify a refreshed configuration
//! before handing it back.

use std::convert::TryFrom;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::version::Info;
use tracing::debug;

use crate::client::ClientConfig;
use crate::error::{Error, Result};

const PROBE_CONTEXT: &str = "kubeauth-probe";

/// A check that a client configuration can make authenticated calls.
#[async_trait]
pub trait ServerProbe: Send + Sync {
    /// Query the API server version using `config`, returning the git version string.
    async fn server_version(&self, config: &ClientConfig) -> anyhow::Result<String>;
}

/// Probe `config`, turning a failure into [`Error::ValidationFailed`].
pub async fn validate(probe: &dyn ServerProbe, config: &ClientConfig) -> Result<String> {
    let version = probe
        .server_version(config)
        .await
        .map_err(|e| Error::validation(config.host.clone(), e))?;
    debug!(host = %config.host, %version, "Client config validated");
    Ok(version)
}

/// A [`ServerProbe`] that talks to the API server through a [`kube::Client`].
#[derive(Clone, Copy, Debug, Default)]
pub struct KubeProbe;

#[async_trait]
impl ServerProbe for KubeProbe {
    async fn server_version(&self, config: &ClientConfig) -> anyhow::Result<String> {
        let client = kube_client(config).await?;
        let info: Info = client.apiserver_version().await?;
        Ok(info.git_version)
    }
}

/// Build a [`kube::Client`] from a client configuration.
pub async fn kube_client(config: &ClientConfig) -> anyhow::Result<kube::Client> {
    let yaml = config.to_kubeconfig(PROBE_CONTEXT).to_yaml()?;
    let kubeconfig: kube::config::Kubeconfig = serde_yaml::from_str(&yaml)?;
    let kube_config =
        kube::Config::from_custom_kubeconfig(kubeconfig, &kube::config::KubeConfigOptions::default())
            .await
            .map_err(|e| anyhow::anyhow!("Unable to load client config for {}: {}", config.host, e))?;
    Ok(kube::Client::try_from(kube_config)?)
}
