use std::fmt;
use std::path::PathBuf;

use crate::kubeconfig::{
    decode_data, AuthInfo, AuthProviderConfig, Cluster, Context, ExecConfig, Kubeconfig,
    KubeconfigError, NamedAuthInfo, NamedCluster, NamedContext,
};

/// The live REST client configuration for one cluster.
///
/// This is what a refresh patches in place: plugins rewrite the exec
/// environment or swap in a whole new configuration, but the caller owns the
/// value for its entire lifetime.
#[derive(Clone, Default, PartialEq)]
pub struct ClientConfig {
    /// The API server address
    pub host: String,
    /// A static bearer token
    pub bearer_token: Option<String>,
    /// A file holding the bearer token
    pub bearer_token_file: Option<PathBuf>,
    /// Basic auth user name
    pub username: Option<String>,
    /// Basic auth password
    pub password: Option<String>,
    /// User to impersonate
    pub impersonate: Option<String>,
    /// Proxy for requests to the API server
    pub proxy_url: Option<String>,
    /// TLS material
    pub tls: TlsClientConfig,
    /// An external command run to obtain a token
    pub exec_provider: Option<ExecConfig>,
    /// A named token scheme such as OIDC
    pub auth_provider: Option<AuthProviderConfig>,
}

/// TLS settings for talking to the API server
#[derive(Clone, Default, PartialEq)]
pub struct TlsClientConfig {
    /// Skip verification of the server certificate
    pub insecure: bool,
    /// Server name used for SNI and certificate verification
    pub server_name: Option<String>,
    /// PEM encoded CA bundle
    pub ca_data: Option<Vec<u8>>,
    /// PEM encoded client certificate
    pub cert_data: Option<Vec<u8>>,
    /// PEM encoded client key
    pub key_data: Option<Vec<u8>>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "--- REDACTED ---"))
            .field("bearer_token_file", &self.bearer_token_file)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "--- REDACTED ---"))
            .field("impersonate", &self.impersonate)
            .field("proxy_url", &self.proxy_url)
            .field("tls", &self.tls)
            .field("exec_provider", &self.exec_provider.as_ref().map(|e| &e.command))
            .field("auth_provider", &self.auth_provider.as_ref().map(|a| &a.name))
            .finish()
    }
}

impl fmt::Debug for TlsClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsClientConfig")
            .field("insecure", &self.insecure)
            .field("server_name", &self.server_name)
            .field("ca_data", &self.ca_data.as_ref().map(|d| d.len()))
            .field("cert_data", &self.cert_data.as_ref().map(|d| d.len()))
            .field("key_data", &self.key_data.as_ref().map(|_| "--- REDACTED ---"))
            .finish()
    }
}

impl ClientConfig {
    /// Build a client configuration from the given context of a kubeconfig,
    /// or from its current context when none is given.
    ///
    /// Certificate and token file references are resolved relative to the
    /// file the document was read from and loaded eagerly.
    pub async fn from_kubeconfig(
        kubeconfig: &Kubeconfig,
        context: Option<&str>,
    ) -> Result<Self, KubeconfigError> {
        let context_name = kubeconfig.select_context(context)?;
        let context = kubeconfig
            .context(context_name)
            .ok_or_else(|| KubeconfigError::UnknownContext(context_name.to_owned()))?;
        let cluster = kubeconfig
            .cluster(&context.cluster)
            .ok_or_else(|| KubeconfigError::UnknownCluster(context.cluster.clone()))?;
        if cluster.server.is_empty() {
            return Err(KubeconfigError::MissingServer(context.cluster.clone()));
        }
        let user = if context.user.is_empty() {
            AuthInfo::default()
        } else {
            kubeconfig
                .auth_info(&context.user)
                .cloned()
                .ok_or_else(|| KubeconfigError::UnknownUser(context.user.clone()))?
        };

        let ca_data = load(
            kubeconfig,
            "certificate-authority-data",
            cluster.certificate_authority_data.as_deref(),
            cluster.certificate_authority.as_deref(),
        )
        .await?;
        let cert_data = load(
            kubeconfig,
            "client-certificate-data",
            user.client_certificate_data.as_deref(),
            user.client_certificate.as_deref(),
        )
        .await?;
        let key_data = load(
            kubeconfig,
            "client-key-data",
            user.client_key_data.as_deref(),
            user.client_key.as_deref(),
        )
        .await?;

        Ok(ClientConfig {
            host: cluster.server.clone(),
            bearer_token: user.token,
            bearer_token_file: user.token_file.map(|f| kubeconfig.resolve(&f)),
            username: user.username,
            password: user.password,
            impersonate: user.impersonate,
            proxy_url: cluster.proxy_url.clone(),
            tls: TlsClientConfig {
                insecure: cluster.insecure_skip_tls_verify.unwrap_or(false),
                server_name: cluster.tls_server_name.clone(),
                ca_data,
                cert_data,
                key_data,
            },
            exec_provider: user.exec,
            auth_provider: user.auth_provider,
        })
    }

    /// Render this configuration as a self-contained kubeconfig whose cluster,
    /// user and context are all called `name`.
    pub fn to_kubeconfig(&self, name: &str) -> Kubeconfig {
        Kubeconfig::new(
            vec![NamedCluster {
                name: name.to_owned(),
                cluster: Cluster {
                    server: self.host.clone(),
                    insecure_skip_tls_verify: self.tls.insecure.then(|| true),
                    certificate_authority_data: self.tls.ca_data.as_ref().map(base64::encode),
                    tls_server_name: self.tls.server_name.clone(),
                    proxy_url: self.proxy_url.clone(),
                    ..Default::default()
                },
            }],
            vec![NamedContext {
                name: name.to_owned(),
                context: Context {
                    cluster: name.to_owned(),
                    user: name.to_owned(),
                    namespace: None,
                },
            }],
            vec![NamedAuthInfo {
                name: name.to_owned(),
                auth_info: AuthInfo {
                    client_certificate_data: self.tls.cert_data.as_ref().map(base64::encode),
                    client_key_data: self.tls.key_data.as_ref().map(base64::encode),
                    token: self.bearer_token.clone(),
                    token_file: self
                        .bearer_token_file
                        .as_ref()
                        .map(|p| p.to_string_lossy().into_owned()),
                    impersonate: self.impersonate.clone(),
                    username: self.username.clone(),
                    password: self.password.clone(),
                    auth_provider: self.auth_provider.clone(),
                    exec: self.exec_provider.clone(),
                    ..Default::default()
                },
            }],
            Some(name.to_owned()),
        )
    }
}

async fn load(
    kubeconfig: &Kubeconfig,
    field: &'static str,
    data: Option<&str>,
    file: Option<&str>,
) -> Result<Option<Vec<u8>>, KubeconfigError> {
    match (data, file) {
        (Some(data), _) if !data.is_empty() => decode_data(field, data).map(Some),
        (_, Some(file)) if !file.is_empty() => kubeconfig.read_referenced(file).await.map(Some),
        _ => Ok(None),
    }
}
