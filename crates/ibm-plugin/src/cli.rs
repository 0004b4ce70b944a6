//! A [`ClusterConfigApi`] backed by the `ibmcloud` command line.
use std::ffi::OsStr;
use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::api::{ClusterConfigApi, ClusterConfigDetail, IbmSession};

const IBMCLOUD: &str = "ibmcloud";
const API_ENDPOINT: &str = "https://cloud.ibm.com";
const KUBECONFIG_FILE: &str = "config";

/// Runs `ibmcloud login` followed by `ibmcloud ks cluster config`.
///
/// The CLI's home directory and the kubeconfig it writes both live inside
/// the destination directory, so nothing outside it is touched.
#[derive(Clone, Debug)]
pub struct IbmCloudCli {
    program: String,
}

impl IbmCloudCli {
    /// Use the `ibmcloud` binary found on `PATH`
    pub fn new() -> Self {
        Self::with_program(IBMCLOUD)
    }

    /// Use the given `ibmcloud` binary
    pub fn with_program(program: impl Into<String>) -> Self {
        IbmCloudCli {
            program: program.into(),
        }
    }

    fn command(&self, session: &IbmSession, dest: &Path, kubeconfig: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.env("IBMCLOUD_API_KEY", &session.api_key)
            .env("IBMCLOUD_HOME", dest)
            .env("IBMCLOUD_VERSION_CHECK", "false")
            .env("IBMCLOUD_COLOR", "false")
            .env("KUBECONFIG", kubeconfig)
            .current_dir(dest)
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, mut cmd: Command) -> anyhow::Result<()> {
        debug!(command = %command_line(&cmd), "Running ibmcloud cli");
        let output = cmd.output().await?;
        if !output.status.success() {
            anyhow::bail!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

/// The program and its arguments. The API key travels in the environment,
/// which is left out.
fn command_line(cmd: &Command) -> String {
    let cmd = cmd.as_std();
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(OsStr::to_string_lossy)
        .collect::<Vec<_>>()
        .join(" ")
}

impl Default for IbmCloudCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterConfigApi for IbmCloudCli {
    async fn get_cluster_config_detail(
        &self,
        session: &IbmSession,
        cluster: &str,
        dest: &Path,
        admin: bool,
        region: Option<&str>,
    ) -> anyhow::Result<ClusterConfigDetail> {
        let kubeconfig = dest.join(KUBECONFIG_FILE);

        let mut login = self.command(session, dest, &kubeconfig);
        login.args(&["login", "-a", API_ENDPOINT]);
        if let Some(region) = region {
            login.args(&["-r", region]);
        }
        self.run(login).await?;

        let mut config = self.command(session, dest, &kubeconfig);
        config.args(&["ks", "cluster", "config", "--cluster", cluster]);
        if admin {
            config.arg("--admin");
        }
        self.run(config).await?;

        if tokio::fs::metadata(&kubeconfig).await.is_err() {
            anyhow::bail!(
                "{} did not write a kubeconfig for cluster {}",
                self.program,
                cluster
            );
        }
        Ok(ClusterConfigDetail {
            file_path: kubeconfig,
        })
    }
}
