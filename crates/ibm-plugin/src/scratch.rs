use std::path::{Component, Path, PathBuf};

use kubeauth::{Error, Result};
use tracing::{debug, warn};

/// Whether `name` joined onto a directory names a child of that directory.
pub(crate) fn is_directory_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains('/')
        && !name.contains('\\')
}

/// A per-cluster working directory that is removed when dropped.
///
/// Whatever a previous, interrupted refresh left behind is cleared on
/// creation.
#[derive(Debug)]
pub(crate) struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Create an empty `<root>/<cluster>` directory.
    ///
    /// Failing to create the directory is not fatal: the caller still gets a
    /// handle and the fetch that follows reports whatever goes wrong. A
    /// cluster name that would place the directory anywhere but directly
    /// under `root` is refused before anything is removed.
    pub(crate) async fn create(root: &Path, cluster: &str) -> Result<Self> {
        let path = root.join(cluster);
        if !is_directory_name(cluster) || path.parent() != Some(root) {
            return Err(Error::UnresolvableCluster(format!(
                "cluster name {:?} is not usable as a directory name",
                cluster
            )));
        }
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => debug!(path = %path.display(), "Removed stale scratch directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (),
            Err(e) => debug!(path = %path.display(), error = %e, "Failed to clean scratch directory"),
        }
        if let Err(e) = tokio::fs::create_dir_all(&path).await {
            debug!(path = %path.display(), error = %e, "Failed to create scratch directory");
        }
        Ok(ScratchDir { path })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed scratch directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to remove scratch directory")
            }
        }
    }
}
