//! Configuration for a credential refresh run
//!
//! The best way to configure a refresh is by using [`Config::default_config`]
//! or by turning on the "cli" feature and using [`Config::new_from_flags`].

use std::path::PathBuf;

#[cfg(feature = "cli")]
use structopt::StructOpt;

use crate::credential::CredentialRef;

const DEFAULT_ORG_ID: &str = "default";
const SCRATCH_DIR_NAME: &str = "kube";

/// The configuration needed to refresh one kubeconfig context.
///
/// This can be configured manually in your code or if you are exposing a CLI, use the
/// [`Config::new_from_flags`] (this requires the "cli" feature to
/// be enabled).
///
/// Use [`Config::default_config`] to generate a config with all
/// of the default values set.
#[derive(Clone, Debug)]
pub struct Config {
    /// The kubeconfig holding the context to refresh
    pub kubeconfig: PathBuf,
    /// The context to refresh. The current context is used when unset
    pub context: Option<String>,
    /// The YAML file the cloud credentials are loaded from
    pub credentials_file: PathBuf,
    /// The cloud credential to refresh with
    pub credential: CredentialRef,
    /// The organization the credential belongs to
    pub org_id: String,
    /// Root of the per-cluster working directories used during a refresh
    pub scratch_dir: PathBuf,
    /// Where the refreshed kubeconfig is written. Stdout when unset
    pub output: Option<PathBuf>,
}

impl Config {
    /// Returns a Config object set with all of the defaults.
    ///
    /// The credential reference is left empty, so plugins that need a
    /// credential will refuse to refresh until one is set.
    pub fn default_config() -> anyhow::Result<Self> {
        Ok(Config {
            kubeconfig: default_kubeconfig()?,
            context: None,
            credentials_file: default_credentials_file()?,
            credential: CredentialRef::default(),
            org_id: DEFAULT_ORG_ID.to_owned(),
            scratch_dir: default_scratch_dir(),
            output: None,
        })
    }

    /// Parses all command line flags and sets the proper defaults. The version
    /// of your application should be passed to set the proper version for the CLI
    #[cfg(any(feature = "cli", feature = "docs"))]
    #[cfg_attr(feature = "docs", doc(cfg(feature = "cli")))]
    pub fn new_from_flags(version: &str) -> anyhow::Result<Self> {
        let app = Opts::clap().version(version);
        let opts = Opts::from_clap(&app.get_matches());
        Self::from_opts(opts)
    }

    #[cfg(any(feature = "cli", feature = "docs"))]
    fn from_opts(opts: Opts) -> anyhow::Result<Self> {
        let kubeconfig = match opts.kubeconfig {
            Some(path) => path,
            None => default_kubeconfig()?,
        };
        let credentials_file = match opts.credentials_file {
            Some(path) => path,
            None => default_credentials_file()?,
        };

        Ok(Config {
            kubeconfig,
            context: opts.context,
            credentials_file,
            credential: CredentialRef {
                name: opts.credential.unwrap_or_default(),
                uid: opts.credential_uid.unwrap_or_default(),
            },
            org_id: opts.org_id,
            scratch_dir: opts.scratch_dir.unwrap_or_else(default_scratch_dir),
            output: opts.output,
        })
    }
}

/// CLI options that can be configured for a refresh
///
/// These can be parsed from args using `Opts::from_args()`
#[derive(StructOpt, Clone, Debug)]
#[cfg(any(feature = "cli", feature = "docs"))]
#[cfg_attr(feature = "docs", doc(cfg(feature = "cli")))]
#[structopt(
    name = "kubeauth-refresh",
    about = "Refresh cloud-issued credentials in a kubeconfig"
)]
pub struct Opts {
    #[structopt(
        long = "kubeconfig",
        help = "The kubeconfig to refresh. Defaults to $KUBECONFIG, then $HOME/.kube/config"
    )]
    kubeconfig: Option<PathBuf>,

    #[structopt(
        long = "context",
        env = "KUBEAUTH_CONTEXT",
        help = "The kubeconfig context to refresh, defaults to the current context"
    )]
    context: Option<String>,

    #[structopt(
        long = "credentials-file",
        env = "KUBEAUTH_CREDENTIALS_FILE",
        help = "The YAML file holding cloud credentials. Defaults to $HOME/.kubeauth/credentials.yaml"
    )]
    credentials_file: Option<PathBuf>,

    #[structopt(
        short = "c",
        long = "credential",
        env = "KUBEAUTH_CREDENTIAL",
        help = "The name of the cloud credential to refresh with"
    )]
    credential: Option<String>,

    #[structopt(
        long = "credential-uid",
        env = "KUBEAUTH_CREDENTIAL_UID",
        help = "The uid of the cloud credential, preferred over the name when set"
    )]
    credential_uid: Option<String>,

    #[structopt(
        long = "org-id",
        default_value = DEFAULT_ORG_ID,
        env = "KUBEAUTH_ORG_ID",
        help = "The organization the credential belongs to"
    )]
    org_id: String,

    #[structopt(
        long = "scratch-dir",
        env = "KUBEAUTH_SCRATCH_DIR",
        help = "Root of the per-cluster working directories. Defaults to $TMPDIR/kube"
    )]
    scratch_dir: Option<PathBuf>,

    #[structopt(
        short = "o",
        long = "output",
        env = "KUBEAUTH_OUTPUT",
        help = "Where to write the refreshed kubeconfig, defaults to stdout"
    )]
    output: Option<PathBuf>,
}

fn default_kubeconfig() -> anyhow::Result<PathBuf> {
    crate::kubeconfig::default_path()
        .ok_or_else(|| anyhow::anyhow!("Unable to get home directory"))
}

fn default_credentials_file() -> anyhow::Result<PathBuf> {
    Ok(dirs::home_dir()
        .ok_or_else(|| anyhow::anyhow!("Unable to get home directory"))?
        .join(".kubeauth/credentials.yaml"))
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join(SCRATCH_DIR_NAME)
}
