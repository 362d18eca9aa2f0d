//! On-disk artifact locations and the artifact locator.
//!
//! Two paths matter:
//! - build output: `<build-root>/<Debug|Release>/<artifact>`, written by the build driver
//! - installed: `<install-root>/<platform-key>/<artifact>`, written by the build pipeline

use crate::platform::PlatformKey;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Default artifact file name.
pub const DEFAULT_ARTIFACT_NAME: &str = "binding.node";

/// Filesystem layout of a package's native artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    /// Working directory of the build driver and test executor.
    pub package_dir: PathBuf,
    pub build_root: PathBuf,
    pub install_root: PathBuf,
    pub artifact_name: String,
}

impl ArtifactLayout {
    /// Layout with `build/` and `bin/` under `package_dir`.
    pub fn for_package(package_dir: impl Into<PathBuf>) -> Self {
        let package_dir = package_dir.into();
        Self {
            build_root: package_dir.join("build"),
            install_root: package_dir.join("bin"),
            package_dir,
            artifact_name: DEFAULT_ARTIFACT_NAME.to_string(),
        }
    }

    pub fn with_build_root(mut self, build_root: impl Into<PathBuf>) -> Self {
        self.build_root = build_root.into();
        self
    }

    pub fn with_install_root(mut self, install_root: impl Into<PathBuf>) -> Self {
        self.install_root = install_root.into();
        self
    }

    pub fn with_artifact_name(mut self, artifact_name: impl Into<String>) -> Self {
        self.artifact_name = artifact_name.into();
        self
    }

    /// Where the build driver leaves the artifact.
    pub fn build_output_path(&self, debug: bool) -> PathBuf {
        let folder = if debug { "Debug" } else { "Release" };
        self.build_root.join(folder).join(&self.artifact_name)
    }

    /// Installation directory for a platform key.
    pub fn install_dir(&self, key: &PlatformKey) -> PathBuf {
        self.install_root.join(key.as_str())
    }

    /// Installed artifact path for a platform key.
    pub fn installed_path(&self, key: &PlatformKey) -> PathBuf {
        self.install_dir(key).join(&self.artifact_name)
    }

    /// Whether an artifact is installed for `key`.
    ///
    /// Never fails; a present but corrupt artifact still counts as existing.
    pub async fn artifact_exists(&self, key: &PlatformKey) -> bool {
        tokio::fs::metadata(self.installed_path(key)).await.is_ok()
    }
}

/// SHA-256 (hex) of an artifact on disk.
pub async fn artifact_digest(path: &Path) -> std::io::Result<String> {
    let content = tokio::fs::read(path).await?;
    let mut hasher = Sha256::new();
    hasher.update(&content);
    Ok(hex::encode(hasher.finalize()))
}
