use thiserror::Error;

use crate::credential::CloudCredentialType;
use crate::kubeconfig::KubeconfigError;

/// A boxed error used as the source of failures reported by external collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A Result alias whose error is a refresh [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// The ways a credential refresh can fail.
///
/// A plugin declining ownership of a configuration is not an error; see
/// [`UpdateOutcome::NotClaimed`](crate::UpdateOutcome::NotClaimed).
#[derive(Debug, Error)]
pub enum Error {
    /// The configuration belongs to a provider but no cloud credential was named
    #[error("cloud credential not provided for {provider} cluster")]
    MissingCredentialReference {
        /// The name of the plugin that claimed the configuration
        provider: &'static str,
    },
    /// The credential lookup service could not return the credential
    #[error("failed to get cloud credential {name}: {source}")]
    CredentialLookupFailed {
        /// The requested credential name
        name: String,
        /// The underlying lookup failure
        #[source]
        source: BoxError,
    },
    /// The credential is for a different cloud provider than the plugin
    #[error("need {expected} cloud credential, provided {actual}")]
    CredentialTypeMismatch {
        /// The credential type the plugin works with
        expected: CloudCredentialType,
        /// The credential type that was supplied
        actual: CloudCredentialType,
    },
    /// A call to the cloud provider's API failed
    #[error("failed to {operation}: {source}")]
    ProviderApiFailed {
        /// A short description of the call, e.g. "describe cluster prod"
        operation: String,
        /// The underlying provider failure
        #[source]
        source: BoxError,
    },
    /// A kubeconfig could not be parsed, minified, flattened or serialized
    #[error("failed to synthesize kubeconfig: {0}")]
    ConfigSynthesisFailed(#[from] KubeconfigError),
    /// The refreshed configuration still fails the liveness probe
    #[error("refreshed config for {host} failed validation: {source}")]
    ValidationFailed {
        /// The API server the configuration points at
        host: String,
        /// The probe failure
        #[source]
        source: BoxError,
    },
    /// The raw configuration does not identify exactly one cluster
    #[error("cluster info not found in kubeconfig: {0}")]
    UnresolvableCluster(String),
}

impl Error {
    /// Wrap a provider API failure with a description of the failed call.
    pub fn provider_api(operation: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Error::ProviderApiFailed {
            operation: operation.into(),
            source: source.into(),
        }
    }

    /// Wrap a probe failure for the configuration pointing at `host`.
    pub fn validation(host: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Error::ValidationFailed {
            host: host.into(),
            source: source.into(),
        }
    }
}
