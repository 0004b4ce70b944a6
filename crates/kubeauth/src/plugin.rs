//! Traits and types needed to create cloud provider plugins
use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::client::ClientConfig;
use crate::credential::{CloudCredential, CloudCredentialType, CredentialLookup, CredentialRef};
use crate::error::Result;
use crate::kubeconfig::Kubeconfig;

/// What a plugin did with a configuration it was offered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The configuration does not belong to this plugin's provider. It was
    /// left untouched.
    NotClaimed,
    /// The configuration belongs to this plugin's provider and is usable.
    Claimed {
        /// A freshly synthesized kubeconfig, for providers that produce one
        /// and only when a refresh actually happened.
        kubeconfig: Option<String>,
    },
}

impl UpdateOutcome {
    /// Returns true if a plugin claimed the configuration
    pub fn is_claimed(&self) -> bool {
        matches!(self, UpdateOutcome::Claimed { .. })
    }

    /// The synthesized kubeconfig, if any
    pub fn kubeconfig(&self) -> Option<&str> {
        match self {
            UpdateOutcome::Claimed { kubeconfig } => kubeconfig.as_deref(),
            UpdateOutcome::NotClaimed => None,
        }
    }
}

/// A credential refresh backend for one cloud provider.
///
/// The primary responsibility of a Plugin is to recognize the client
/// configurations that authenticate through its provider and to refresh their
/// credentials in place, exchanging a cloud credential for a new token or
/// kubeconfig.
///
/// **Note**: this trait is defined using [async-trait](https://crates.io/crates/async-trait) which
/// allows for the use of async methods on traits. It is recommended for
/// methods that return `Pin<Box<dyn Future<Output = Result<T>> + Send + 'async_trait>>`
/// to be implemented as async functions using `#[async_trait]`.
///
/// # Example
/// ```rust
/// use async_trait::async_trait;
/// use kubeauth::credential::{CloudCredential, CloudCredentialType, CredentialLookup};
/// use kubeauth::kubeconfig::Kubeconfig;
/// use kubeauth::{ClientConfig, CredentialRef, Plugin, UpdateOutcome};
///
/// struct MyPlugin;
///
/// #[async_trait]
/// impl Plugin for MyPlugin {
///     fn credential_type(&self) -> CloudCredentialType {
///         CloudCredentialType::Azure
///     }
///
///     fn owns(&self, config: &ClientConfig) -> bool {
///         config.exec_provider.as_ref().map(|e| e.command == "kubelogin").unwrap_or(false)
///     }
///
///     // Implement the refresh entry points ...
///     # async fn update_client(&self, lookup: &dyn CredentialLookup, credential: &CredentialRef, org_id: &str, config: &mut ClientConfig, raw: &Kubeconfig) -> kubeauth::Result<UpdateOutcome> { todo!() }
///     # async fn update_client_by_cred_object(&self, credential: &CloudCredential, config: &mut ClientConfig, raw: &Kubeconfig) -> kubeauth::Result<UpdateOutcome> { todo!() }
/// }
/// ```
#[async_trait]
pub trait Plugin: Send + Sync {
    /// The kind of cloud credential this plugin consumes
    fn credential_type(&self) -> CloudCredentialType;

    /// Given a client configuration, decide whether it authenticates through
    /// this plugin's provider.
    ///
    /// It is paramount that this function be fast and free of side effects:
    /// every registered plugin is asked on every dispatch until one claims the
    /// configuration. It must not touch the network or the filesystem.
    fn owns(&self, config: &ClientConfig) -> bool;

    /// Refresh `config` using the credential named by `credential`, fetched
    /// through `lookup`.
    ///
    /// Returns [`UpdateOutcome::NotClaimed`] without error when the
    /// configuration belongs to another provider. `raw` is the declarative
    /// form of `config` and is only read.
    async fn update_client(
        &self,
        lookup: &dyn CredentialLookup,
        credential: &CredentialRef,
        org_id: &str,
        config: &mut ClientConfig,
        raw: &Kubeconfig,
    ) -> Result<UpdateOutcome>;

    /// Refresh `config` using a credential the caller already resolved.
    async fn update_client_by_cred_object(
        &self,
        credential: &CloudCredential,
        config: &mut ClientConfig,
        raw: &Kubeconfig,
    ) -> Result<UpdateOutcome>;
}

/// A standalone client for one managed cluster, resolved directly from the
/// cloud provider.
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteCluster {
    /// A kubeconfig document equivalent to `client`
    pub kubeconfig: String,
    /// The REST client configuration
    pub client: ClientConfig,
    /// The cluster's unique id within the provider
    pub uid: String,
    /// The Kubernetes version the provider reports for the cluster
    pub version: Option<String>,
    /// When the bearer token in `client` stops being accepted
    pub token_expiry: Option<DateTime<Utc>>,
}

/// Plugins whose provider can list and describe clusters on its own.
#[async_trait]
pub trait ClusterEnumerator: Send + Sync {
    /// Resolve one named cluster in `region` visible to `credential`.
    async fn get_client(
        &self,
        credential: &CloudCredential,
        cluster: &str,
        region: &str,
    ) -> Result<RemoteCluster>;

    /// Resolve every cluster in `region` visible to `credential`, keyed by
    /// cluster name.
    ///
    /// Clusters that cannot be described or authenticated against are skipped,
    /// not reported as errors.
    async fn get_all_clients(
        &self,
        credential: &CloudCredential,
        region: &str,
    ) -> Result<BTreeMap<String, RemoteCluster>>;
}
