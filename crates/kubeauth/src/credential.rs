//! Cloud credentials and the lookup service that hands them out.
//!
//! A [`CloudCredential`] is the operator-held secret material (access keys,
//! API keys) that a plugin exchanges with a cloud provider for a fresh
//! Kubernetes token or kubeconfig. Plugins never cache credentials: every
//! refresh fetches one through a [`CredentialLookup`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::error::{Error, Result};

/// The cloud providers a credential can belong to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudCredentialType {
    /// Amazon Web Services
    Aws,
    /// IBM Cloud
    Ibm,
    /// Microsoft Azure
    Azure,
    /// Google Cloud
    Google,
}

impl fmt::Display for CloudCredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CloudCredentialType::Aws => "AWS",
            CloudCredentialType::Ibm => "IBM",
            CloudCredentialType::Azure => "Azure",
            CloudCredentialType::Google => "Google",
        };
        f.write_str(name)
    }
}

/// Identifying information for a stored credential.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// The credential's name
    pub name: String,
    /// The credential's unique id
    #[serde(default)]
    pub uid: String,
    /// The organization the credential belongs to
    #[serde(default)]
    pub org_id: String,
    /// The owner of the credential
    #[serde(default)]
    pub owner: String,
    /// Free-form labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Access key pair for AWS.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsConfig {
    /// The access key id
    pub access_key: String,
    /// The secret access key
    pub secret_key: String,
}

/// API key for IBM Cloud.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IbmConfig {
    /// The IAM API key
    pub api_key: String,
}

/// Service principal for Azure.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureConfig {
    /// The Azure AD tenant
    pub tenant_id: String,
    /// The service principal's client id
    pub client_id: String,
    /// The service principal's secret
    pub client_secret: String,
    /// The subscription the clusters live in
    pub subscription_id: String,
}

/// Service account key for Google Cloud.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleConfig {
    /// The project the clusters live in
    pub project_id: String,
    /// The service account JSON key
    pub json_key: String,
}

const REDACTED: &str = "<redacted>";

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        ""
    } else {
        REDACTED
    }
}

impl fmt::Debug for AwsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsConfig")
            .field("access_key", &self.access_key)
            .field("secret_key", &redact(&self.secret_key))
            .finish()
    }
}

impl fmt::Debug for IbmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IbmConfig")
            .field("api_key", &redact(&self.api_key))
            .finish()
    }
}

impl fmt::Debug for AzureConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureConfig")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &redact(&self.client_secret))
            .field("subscription_id", &self.subscription_id)
            .finish()
    }
}

impl fmt::Debug for GoogleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoogleConfig")
            .field("project_id", &self.project_id)
            .field("json_key", &redact(&self.json_key))
            .finish()
    }
}

/// The provider-specific secret payload, tagged by provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CloudCredentialInfo {
    /// An AWS access key pair
    Aws(AwsConfig),
    /// An IBM Cloud API key
    Ibm(IbmConfig),
    /// An Azure service principal
    Azure(AzureConfig),
    /// A Google Cloud service account key
    Google(GoogleConfig),
}

impl CloudCredentialInfo {
    /// The provider this payload belongs to
    pub fn kind(&self) -> CloudCredentialType {
        match self {
            CloudCredentialInfo::Aws(_) => CloudCredentialType::Aws,
            CloudCredentialInfo::Ibm(_) => CloudCredentialType::Ibm,
            CloudCredentialInfo::Azure(_) => CloudCredentialType::Azure,
            CloudCredentialInfo::Google(_) => CloudCredentialType::Google,
        }
    }
}

/// A provider-tagged bundle of secret material keyed by name and organization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CloudCredential {
    /// Name, uid and organization
    pub metadata: Metadata,
    /// The secret payload
    pub info: CloudCredentialInfo,
}

impl CloudCredential {
    /// Create a credential with the given name and organization
    pub fn new(name: &str, org_id: &str, info: CloudCredentialInfo) -> Self {
        CloudCredential {
            metadata: Metadata {
                name: name.to_owned(),
                org_id: org_id.to_owned(),
                ..Default::default()
            },
            info,
        }
    }

    /// The provider this credential belongs to
    pub fn kind(&self) -> CloudCredentialType {
        self.info.kind()
    }

    /// Returns a copy of this credential with every secret field blanked.
    pub fn without_secrets(&self) -> Self {
        let info = match &self.info {
            CloudCredentialInfo::Aws(aws) => CloudCredentialInfo::Aws(AwsConfig {
                access_key: aws.access_key.clone(),
                secret_key: String::new(),
            }),
            CloudCredentialInfo::Ibm(_) => CloudCredentialInfo::Ibm(IbmConfig::default()),
            CloudCredentialInfo::Azure(azure) => CloudCredentialInfo::Azure(AzureConfig {
                client_secret: String::new(),
                ..azure.clone()
            }),
            CloudCredentialInfo::Google(google) => CloudCredentialInfo::Google(GoogleConfig {
                project_id: google.project_id.clone(),
                json_key: String::new(),
            }),
        };
        CloudCredential {
            metadata: self.metadata.clone(),
            info,
        }
    }
}

/// The caller's reference to the cloud credential a refresh should use.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CredentialRef {
    /// The credential's name. Empty when the caller did not name one.
    pub name: String,
    /// The credential's uid, if known
    pub uid: String,
}

impl CredentialRef {
    /// A reference by name only
    pub fn named(name: impl Into<String>) -> Self {
        CredentialRef {
            name: name.into(),
            uid: String::new(),
        }
    }

    /// Returns true when no credential was named
    pub fn is_missing(&self) -> bool {
        self.name.is_empty()
    }
}

/// A request to the credential lookup service.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InspectRequest {
    /// The credential's name
    pub name: String,
    /// The credential's uid, matched in preference to the name when set
    pub uid: String,
    /// The organization the credential belongs to
    pub org_id: String,
    /// Whether the secret payload should be returned
    pub include_secrets: bool,
}

/// The lookup service did not find the requested credential
#[derive(Debug, Error)]
#[error("cloud credential {name} not found in organization {org_id}")]
pub struct CredentialNotFound {
    /// The requested name
    pub name: String,
    /// The requested organization
    pub org_id: String,
}

/// A source of cloud credentials.
///
/// **Note**: this trait is defined using [async-trait](https://crates.io/crates/async-trait).
/// Implementations typically call out to a remote credential service; the
/// [`StaticCredentialStore`] serves credentials from memory.
#[async_trait]
pub trait CredentialLookup: Send + Sync {
    /// Return the credential matching the request, optionally including its secrets.
    async fn inspect(&self, request: &InspectRequest) -> anyhow::Result<CloudCredential>;
}

/// Fetch the credential a plugin needs to refresh a configuration it owns.
///
/// Fails with [`Error::MissingCredentialReference`] when the reference names no
/// credential and with [`Error::CredentialLookupFailed`] when the lookup does.
pub async fn fetch_credential(
    lookup: &dyn CredentialLookup,
    credential: &CredentialRef,
    org_id: &str,
    provider: &'static str,
) -> Result<CloudCredential> {
    if credential.is_missing() {
        return Err(Error::MissingCredentialReference { provider });
    }
    debug!(name = %credential.name, org_id, "Fetching cloud credential");
    let request = InspectRequest {
        name: credential.name.clone(),
        uid: credential.uid.clone(),
        org_id: org_id.to_owned(),
        include_secrets: true,
    };
    lookup
        .inspect(&request)
        .await
        .map_err(|e| Error::CredentialLookupFailed {
            name: credential.name.clone(),
            source: e.into(),
        })
}

/// A [`CredentialLookup`] serving a fixed set of credentials.
#[derive(Clone, Debug, Default)]
pub struct StaticCredentialStore {
    credentials: Vec<CloudCredential>,
}

impl StaticCredentialStore {
    /// Create a store holding the given credentials
    pub fn new(credentials: Vec<CloudCredential>) -> Self {
        StaticCredentialStore { credentials }
    }

    /// Load a store from a YAML file containing a list of credentials
    pub async fn read_from<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let raw = tokio::fs::read(path.as_ref()).await.map_err(|e| {
            anyhow::anyhow!(
                "Error loading credentials file {}: {}",
                path.as_ref().display(),
                e
            )
        })?;
        let credentials = serde_yaml::from_slice(&raw).map_err(|e| {
            anyhow::anyhow!(
                "Error parsing credentials file {}: {}",
                path.as_ref().display(),
                e
            )
        })?;
        Ok(StaticCredentialStore { credentials })
    }

    /// Add a credential to the store
    pub fn insert(&mut self, credential: CloudCredential) {
        self.credentials.push(credential);
    }

    fn find(&self, request: &InspectRequest) -> Option<&CloudCredential> {
        self.credentials.iter().find(|c| {
            c.metadata.org_id == request.org_id
                && if request.uid.is_empty() {
                    c.metadata.name == request.name
                } else {
                    c.metadata.uid == request.uid
                }
        })
    }
}

#[async_trait]
impl CredentialLookup for StaticCredentialStore {
    async fn inspect(&self, request: &InspectRequest) -> anyhow::Result<CloudCredential> {
        let credential = self.find(request).ok_or_else(|| CredentialNotFound {
            name: request.name.clone(),
            org_id: request.org_id.clone(),
        })?;
        if request.include_secrets {
            Ok(credential.clone())
        } else {
            Ok(credential.without_secrets())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CREDENTIALS: &str = r#"
- metadata:
    name: eks-admin
    uid: 6f1c
    orgId: default
  info:
    type: aws
    accessKey: AK
    secretKey: SK
- metadata:
    name: iks-admin
    orgId: default
  info:
    type: ibm
    apiKey: secret-api-key
"#;

    fn store() -> StaticCredentialStore {
        StaticCredentialStore::new(serde_yaml::from_str(CREDENTIALS).unwrap())
    }

    fn request(name: &str, include_secrets: bool) -> InspectRequest {
        InspectRequest {
            name: name.to_owned(),
            org_id: "default".to_owned(),
            include_secrets,
            ..Default::default()
        }
    }

    #[test]
    fn credential_info_is_tagged_by_type() {
        let credentials: Vec<CloudCredential> = serde_yaml::from_str(CREDENTIALS).unwrap();
        assert_eq!(credentials[0].kind(), CloudCredentialType::Aws);
        assert_eq!(
            credentials[0].info,
            CloudCredentialInfo::Aws(AwsConfig {
                access_key: "AK".to_owned(),
                secret_key: "SK".to_owned(),
            })
        );
        assert_eq!(credentials[1].kind(), CloudCredentialType::Ibm);
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let credentials: Vec<CloudCredential> = serde_yaml::from_str(CREDENTIALS).unwrap();
        let rendered = format!("{:?}", credentials);
        assert!(rendered.contains("AK"));
        assert!(!rendered.contains("SK\""));
        assert!(!rendered.contains("secret-api-key"));
    }

    #[tokio::test]
    async fn static_store_returns_secrets_on_request() {
        let credential = store().inspect(&request("eks-admin", true)).await.unwrap();
        match credential.info {
            CloudCredentialInfo::Aws(aws) => assert_eq!(aws.secret_key, "SK"),
            other => panic!("unexpected credential {:?}", other),
        }
    }

    #[tokio::test]
    async fn static_store_strips_secrets_by_default() {
        let credential = store().inspect(&request("iks-admin", false)).await.unwrap();
        assert_eq!(credential.info, CloudCredentialInfo::Ibm(IbmConfig::default()));
    }

    #[tokio::test]
    async fn static_store_prefers_uid() {
        let mut req = request("wrong-name", true);
        req.uid = "6f1c".to_owned();
        let credential = store().inspect(&req).await.unwrap();
        assert_eq!(credential.metadata.name, "eks-admin");
    }

    #[tokio::test]
    async fn static_store_scopes_by_org() {
        let mut req = request("eks-admin", true);
        req.org_id = "other".to_owned();
        let err = store().inspect(&req).await.unwrap_err();
        assert!(err.downcast_ref::<CredentialNotFound>().is_some());
    }

    #[tokio::test]
    async fn fetch_requires_a_reference() {
        let err = fetch_credential(&store(), &CredentialRef::default(), "default", "aws")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::MissingCredentialReference { provider: "aws" }
        ));
    }

    #[tokio::test]
    async fn fetch_wraps_lookup_failures() {
        let err = fetch_credential(&store(), &CredentialRef::named("missing"), "default", "aws")
            .await
            .unwrap_err();
        match err {
            Error::CredentialLookupFailed { name, .. } => assert_eq!(name, "missing"),
            other => panic!("unexpected error {:?}", other),
        }
    }
}
