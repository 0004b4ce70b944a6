//! The kubeconfig document and the helpers plugins use to reshape it.
//!
//! This models the v1 `Config` document closely enough to parse what cloud
//! providers hand out, reduce it to a single context ([`Kubeconfig::minify`]),
//! inline referenced certificate files ([`Kubeconfig::flatten`]) and write it
//! back out as YAML. This is the equivalent of
//! `kubectl config view --minify --flatten --raw`.
//!
//! Rewriting a document keeps every exec setting (`installHint`,
//! `provideClusterInfo`, `interactiveMode`) and the cluster `tls-server-name`.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use dirs::home_dir;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The environment variable pointing at the active kubeconfig
pub const KUBECONFIG: &str = "KUBECONFIG";

/// Returns the kubeconfig path from the `KUBECONFIG` environment variable,
/// falling back to `$HOME/.kube/config`.
pub fn default_path() -> Option<PathBuf> {
    env::var_os(KUBECONFIG)
        .map(PathBuf::from)
        .or_else(|| home_dir().map(|h| h.join(".kube").join("config")))
}

/// Errors raised while reading or reshaping a kubeconfig
#[derive(Debug, Error)]
pub enum KubeconfigError {
    /// The kubeconfig file could not be read
    #[error("error loading kubeconfig {}: {source}", .path.display())]
    Read {
        /// The file that was read
        path: PathBuf,
        /// The I/O failure
        source: std::io::Error,
    },
    /// A file referenced from the kubeconfig could not be read
    #[error("error reading {} referenced by kubeconfig: {source}", .path.display())]
    ReadReferenced {
        /// The referenced file
        path: PathBuf,
        /// The I/O failure
        source: std::io::Error,
    },
    /// The document is not a valid kubeconfig
    #[error("error parsing kubeconfig: {0}")]
    Parse(#[source] serde_yaml::Error),
    /// The document could not be written as YAML
    #[error("error serializing kubeconfig: {0}")]
    Serialize(#[source] serde_yaml::Error),
    /// No current context is set and none was requested
    #[error("current-context must exist in order to minify")]
    MissingCurrentContext,
    /// The requested context is not in the document
    #[error("cannot locate context {0}")]
    UnknownContext(String),
    /// A context refers to a cluster that is not in the document
    #[error("cannot locate cluster {0}")]
    UnknownCluster(String),
    /// A context refers to a user that is not in the document
    #[error("cannot locate user {0}")]
    UnknownUser(String),
    /// The selected cluster has no server address
    #[error("no server found for cluster {0}")]
    MissingServer(String),
    /// An inline data field is not valid base64
    #[error("invalid base64 in {field}: {source}")]
    InvalidData {
        /// The offending field
        field: &'static str,
        /// The decoding failure
        source: base64::DecodeError,
    },
}

/// A kubeconfig document
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Kubeconfig {
    /// Always "v1" for documents written by this crate
    #[serde(rename = "apiVersion", default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    /// Always "Config" for documents written by this crate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Client preferences, carried through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<serde_yaml::Value>,
    /// Named clusters
    #[serde(default)]
    pub clusters: Vec<NamedCluster>,
    /// Named contexts
    #[serde(default)]
    pub contexts: Vec<NamedContext>,
    /// Named users
    #[serde(rename = "users", default)]
    pub auth_infos: Vec<NamedAuthInfo>,
    /// The context used when none is requested
    #[serde(rename = "current-context", default, skip_serializing_if = "Option::is_none")]
    pub current_context: Option<String>,
    /// Extensions, carried through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Vec<serde_yaml::Value>>,
    #[serde(skip)]
    origin: Option<PathBuf>,
}

/// A cluster with its name
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedCluster {
    /// The cluster's name
    pub name: String,
    /// How to reach the cluster
    pub cluster: Cluster,
}

/// How to reach a cluster's API server
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Cluster {
    /// The API server address
    #[serde(default)]
    pub server: String,
    /// Skip verification of the server's certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure_skip_tls_verify: Option<bool>,
    /// Path to a CA bundle file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authority: Option<String>,
    /// Base64 encoded CA bundle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authority_data: Option<String>,
    /// Server name used for SNI and certificate verification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_server_name: Option<String>,
    /// Proxy for requests to this cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
}

/// A context with its name
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedContext {
    /// The context's name
    pub name: String,
    /// The cluster and user the context binds together
    pub context: Context,
}

/// A cluster and user bound together
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    /// The cluster's name
    #[serde(default)]
    pub cluster: String,
    /// The user's name
    #[serde(default)]
    pub user: String,
    /// Default namespace for requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// A user with its name
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedAuthInfo {
    /// The user's name
    pub name: String,
    /// How the user authenticates
    #[serde(rename = "user")]
    pub auth_info: AuthInfo,
}

/// How a user authenticates to the cluster
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AuthInfo {
    /// Path to a client certificate file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate: Option<String>,
    /// Base64 encoded client certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate_data: Option<String>,
    /// Path to a client key file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<String>,
    /// Base64 encoded client key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key_data: Option<String>,
    /// Bearer token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Path to a file holding the bearer token
    #[serde(rename = "tokenFile", default, skip_serializing_if = "Option::is_none")]
    pub token_file: Option<String>,
    /// User to impersonate
    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub impersonate: Option<String>,
    /// Groups to impersonate
    #[serde(rename = "as-groups", default, skip_serializing_if = "Option::is_none")]
    pub impersonate_groups: Option<Vec<String>>,
    /// Basic auth user name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Basic auth password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// A named, parameterized token scheme such as OIDC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_provider: Option<AuthProviderConfig>,
    /// An external command that prints a token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecConfig>,
}

/// A named, parameterized token scheme
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthProviderConfig {
    /// The scheme, e.g. "oidc"
    pub name: String,
    /// Scheme parameters
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

/// An external command run to obtain a bearer token
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecConfig {
    /// The ExecCredential API version the command speaks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    /// The command to run
    pub command: String,
    /// Arguments for the command
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Extra environment for the command
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<ExecEnvVar>,
    /// Message printed when the command is missing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_hint: Option<String>,
    /// Whether cluster information is passed to the command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provide_cluster_info: Option<bool>,
    /// Whether the command may prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interactive_mode: Option<String>,
}

/// An environment variable set for an exec command
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecEnvVar {
    /// Variable name
    pub name: String,
    /// Variable value
    pub value: String,
}

impl ExecEnvVar {
    /// Create a variable
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        ExecEnvVar {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl Kubeconfig {
    /// A v1 `Config` document holding the given entries
    pub fn new(
        clusters: Vec<NamedCluster>,
        contexts: Vec<NamedContext>,
        auth_infos: Vec<NamedAuthInfo>,
        current_context: Option<String>,
    ) -> Self {
        Kubeconfig {
            api_version: Some("v1".to_owned()),
            kind: Some("Config".to_owned()),
            clusters,
            contexts,
            auth_infos,
            current_context,
            ..Default::default()
        }
    }

    /// Parse a kubeconfig from YAML (or JSON) text
    pub fn from_yaml(text: &str) -> Result<Self, KubeconfigError> {
        serde_yaml::from_str(text).map_err(KubeconfigError::Parse)
    }

    /// Read and parse a kubeconfig file.
    ///
    /// Relative file references inside the document resolve against the
    /// directory holding this file.
    pub async fn read_from<P: AsRef<Path>>(path: P) -> Result<Self, KubeconfigError> {
        let path = path.as_ref();
        // Serde yaml doesn't have async support so we have to read the whole file in
        let raw = tokio::fs::read(path)
            .await
            .map_err(|source| KubeconfigError::Read {
                path: path.to_owned(),
                source,
            })?;
        let mut config: Kubeconfig =
            serde_yaml::from_slice(&raw).map_err(KubeconfigError::Parse)?;
        config.origin = Some(path.to_owned());
        Ok(config)
    }

    /// Write the document as YAML
    pub fn to_yaml(&self) -> Result<String, KubeconfigError> {
        serde_yaml::to_string(self).map_err(KubeconfigError::Serialize)
    }

    /// Record the file relative references should resolve against
    pub fn set_origin(&mut self, path: impl Into<PathBuf>) {
        self.origin = Some(path.into());
    }

    /// Look up a context by name
    pub fn context(&self, name: &str) -> Option<&Context> {
        self.contexts
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.context)
    }

    /// Look up a cluster by name
    pub fn cluster(&self, name: &str) -> Option<&Cluster> {
        self.clusters
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.cluster)
    }

    /// Look up a user by name
    pub fn auth_info(&self, name: &str) -> Option<&AuthInfo> {
        self.auth_infos
            .iter()
            .find(|u| u.name == name)
            .map(|u| &u.auth_info)
    }

    /// Returns the requested context name, falling back to the current context
    pub(crate) fn select_context<'a>(
        &'a self,
        requested: Option<&'a str>,
    ) -> Result<&'a str, KubeconfigError> {
        match requested.or_else(|| self.current_context.as_deref()) {
            Some(name) if !name.is_empty() => Ok(name),
            _ => Err(KubeconfigError::MissingCurrentContext),
        }
    }

    /// Strip the document down to its current context and the cluster and
    /// user that context refers to.
    pub fn minify(&mut self) -> Result<(), KubeconfigError> {
        let current = self.select_context(None)?.to_owned();
        let context = self
            .contexts
            .iter()
            .find(|c| c.name == current)
            .cloned()
            .ok_or_else(|| KubeconfigError::UnknownContext(current.clone()))?;

        let mut clusters = Vec::new();
        if !context.context.cluster.is_empty() {
            let cluster = self
                .clusters
                .iter()
                .find(|c| c.name == context.context.cluster)
                .cloned()
                .ok_or_else(|| KubeconfigError::UnknownCluster(context.context.cluster.clone()))?;
            clusters.push(cluster);
        }

        let mut auth_infos = Vec::new();
        if !context.context.user.is_empty() {
            let user = self
                .auth_infos
                .iter()
                .find(|u| u.name == context.context.user)
                .cloned()
                .ok_or_else(|| KubeconfigError::UnknownUser(context.context.user.clone()))?;
            auth_infos.push(user);
        }

        self.clusters = clusters;
        self.auth_infos = auth_infos;
        self.contexts = vec![context];
        Ok(())
    }

    /// Replace every certificate and key file reference with the base64
    /// encoded contents of that file.
    pub async fn flatten(&mut self) -> Result<(), KubeconfigError> {
        let base = self.base_dir();
        for named in self.clusters.iter_mut() {
            let cluster = &mut named.cluster;
            if let Some(path) = cluster.certificate_authority.take() {
                let data = read_referenced(base.as_deref(), &path).await?;
                cluster.certificate_authority_data = Some(base64::encode(data));
            }
        }
        for named in self.auth_infos.iter_mut() {
            let user = &mut named.auth_info;
            if let Some(path) = user.client_certificate.take() {
                let data = read_referenced(base.as_deref(), &path).await?;
                user.client_certificate_data = Some(base64::encode(data));
            }
            if let Some(path) = user.client_key.take() {
                let data = read_referenced(base.as_deref(), &path).await?;
                user.client_key_data = Some(base64::encode(data));
            }
        }
        Ok(())
    }

    /// Resolve a path found inside the document
    pub(crate) fn resolve(&self, path: &str) -> PathBuf {
        resolve(self.base_dir().as_deref(), path)
    }

    /// Read a file referenced from the document
    pub(crate) async fn read_referenced(&self, path: &str) -> Result<Vec<u8>, KubeconfigError> {
        read_referenced(self.base_dir().as_deref(), path).await
    }

    fn base_dir(&self) -> Option<PathBuf> {
        self.origin
            .as_ref()
            .and_then(|p| p.parent())
            .map(Path::to_path_buf)
    }
}

fn resolve(base: Option<&Path>, path: &str) -> PathBuf {
    let path = Path::new(path);
    match base {
        Some(base) if path.is_relative() => base.join(path),
        _ => path.to_path_buf(),
    }
}

async fn read_referenced(base: Option<&Path>, path: &str) -> Result<Vec<u8>, KubeconfigError> {
    let path = resolve(base, path);
    tokio::fs::read(&path)
        .await
        .map_err(|source| KubeconfigError::ReadReferenced { path, source })
}

/// Decode an inline `*-data` field
pub(crate) fn decode_data(field: &'static str, data: &str) -> Result<Vec<u8>, KubeconfigError> {
    let compact: String = data.split_whitespace().collect();
    base64::decode(compact).map_err(|source| KubeconfigError::InvalidData { field, source })
}
