//! The IBM Cloud Kubernetes Service calls the plugin depends on.
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

/// An IAM identity for IBM Cloud API calls
#[derive(Clone, Default, PartialEq)]
pub struct IbmSession {
    /// The IAM API key
    pub api_key: String,
}

impl fmt::Debug for IbmSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IbmSession")
            .field("api_key", &"--- REDACTED ---")
            .finish()
    }
}

/// Where a downloaded cluster configuration was written
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterConfigDetail {
    /// Path of the kubeconfig file. Certificates it references sit next to it.
    pub file_path: PathBuf,
}

/// Downloads cluster configurations from the Kubernetes Service.
///
/// Implementations write into `dest` and are not safe to run concurrently
/// against the same cluster.
#[async_trait]
pub trait ClusterConfigApi: Send + Sync {
    /// Download the kubeconfig of `cluster` into `dest`, with admin
    /// credentials when `admin` is set.
    async fn get_cluster_config_detail(
        &self,
        session: &IbmSession,
        cluster: &str,
        dest: &Path,
        admin: bool,
        region: Option<&str>,
    ) -> anyhow::Result<ClusterConfigDetail>;
}
