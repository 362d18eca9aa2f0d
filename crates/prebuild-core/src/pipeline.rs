//! Compile-from-source pipeline.
//!
//! Runs the external build driver with `rebuild` plus the pass-through
//! arguments, then moves the fresh artifact into its platform-keyed
//! installation directory. Every failure is terminal; nothing is retried.

use crate::args::BuildConfig;
use crate::error::{BuildError, BuildResult, DRIVER_NOT_FOUND_EXIT_CODE};
use crate::layout::{artifact_digest, ArtifactLayout};
use crate::platform::PlatformKey;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Subcommand passed to the build driver ahead of the pass-through arguments.
pub const REBUILD_COMMAND: &str = "rebuild";

/// Default build driver base name.
pub const DEFAULT_DRIVER: &str = "node-gyp";

/// Lifecycle of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    NotStarted,
    Running,
    Succeeded,
    FailedToolMissing,
    FailedNonZeroExit,
    FailedArtifactMissing,
    FailedRelocation,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PipelineState::NotStarted | PipelineState::Running)
    }
}

impl From<&BuildError> for PipelineState {
    fn from(err: &BuildError) -> Self {
        match err {
            BuildError::DriverNotFound { .. } => PipelineState::FailedToolMissing,
            BuildError::Spawn { .. } | BuildError::BuildFailed { .. } => {
                PipelineState::FailedNonZeroExit
            }
            BuildError::ArtifactMissing { .. } => PipelineState::FailedArtifactMissing,
            BuildError::CreateInstallDir { .. } | BuildError::Relocate { .. } => {
                PipelineState::FailedRelocation
            }
        }
    }
}

/// How to launch the build driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverSpec {
    pub program: String,
    /// Arguments placed before `rebuild`.
    pub leading_args: Vec<String>,
}

impl DriverSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// Driver executable for an operating system: `<base>.cmd` on win32,
    /// `<base>` elsewhere.
    pub fn for_os(os: &str, base: &str) -> Self {
        if os == "win32" {
            Self::new(format!("{base}.cmd"))
        } else {
            Self::new(base)
        }
    }

    pub fn with_leading_args(mut self, args: Vec<String>) -> Self {
        self.leading_args = args;
        self
    }

    /// Full argument list for a rebuild with `passthrough` arguments.
    pub fn rebuild_args(&self, passthrough: &[String]) -> Vec<String> {
        let mut args = self.leading_args.clone();
        args.push(REBUILD_COMMAND.to_string());
        args.extend(passthrough.iter().cloned());
        args
    }
}

/// Result of a successful build and install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReport {
    pub platform_key: PlatformKey,
    pub installed_path: PathBuf,
    /// SHA-256 of the installed artifact, if it could be read back.
    pub sha256: Option<String>,
    pub duration_ms: u64,
}

/// Produces and installs an artifact for a build configuration.
#[async_trait]
pub trait Builder: Send + Sync {
    async fn build(&self, config: &BuildConfig) -> BuildResult<InstallReport>;
}

/// Build pipeline backed by an external build driver process.
pub struct BuildPipeline {
    driver: DriverSpec,
    layout: ArtifactLayout,
}

impl BuildPipeline {
    pub fn new(driver: DriverSpec, layout: ArtifactLayout) -> Self {
        Self { driver, layout }
    }

    /// Run the driver with inherited stdio and wait for it to exit.
    async fn run_driver(&self, config: &BuildConfig) -> BuildResult<()> {
        let args = self.driver.rebuild_args(&config.passthrough_args);
        debug!(program = %self.driver.program, ?args, "Spawning build driver");

        let status = Command::new(&self.driver.program)
            .args(&args)
            .current_dir(&self.layout.package_dir)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|source| {
                if source.kind() == ErrorKind::NotFound {
                    BuildError::DriverNotFound {
                        program: self.driver.program.clone(),
                    }
                } else {
                    BuildError::Spawn {
                        program: self.driver.program.clone(),
                        source,
                    }
                }
            })?;

        match status.code() {
            Some(0) => Ok(()),
            Some(DRIVER_NOT_FOUND_EXIT_CODE) => Err(BuildError::DriverNotFound {
                program: self.driver.program.clone(),
            }),
            code => Err(BuildError::BuildFailed { code }),
        }
    }

    /// Move the build output into the installation directory for `key`.
    async fn install(&self, config: &BuildConfig, key: &PlatformKey) -> BuildResult<PathBuf> {
        let install_dir = self.layout.install_dir(key);
        tokio::fs::create_dir_all(&install_dir)
            .await
            .map_err(|source| BuildError::CreateInstallDir {
                path: install_dir.clone(),
                source,
            })?;

        let target = self.layout.build_output_path(config.debug);
        if tokio::fs::metadata(&target).await.is_err() {
            return Err(BuildError::ArtifactMissing { path: target });
        }

        let installed = self.layout.installed_path(key);
        tokio::fs::rename(&target, &installed)
            .await
            .map_err(|source| BuildError::Relocate {
                from: target.clone(),
                to: installed.clone(),
                source,
            })?;

        Ok(installed)
    }
}

#[async_trait]
impl Builder for BuildPipeline {
    async fn build(&self, config: &BuildConfig) -> BuildResult<InstallReport> {
        let start = Instant::now();
        let key = config.platform_key();
        let mut state = PipelineState::NotStarted;
        debug!(?state, platform_key = %key, "Build pipeline created");

        state = PipelineState::Running;
        info!(?state, platform_key = %key, debug = config.debug, "Building from source");

        let installed = match self.run_driver(config).await {
            Ok(()) => self.install(config, &key).await,
            Err(err) => Err(err),
        };

        let installed_path = match installed {
            Ok(path) => path,
            Err(err) => {
                state = PipelineState::from(&err);
                warn!(?state, error = %err, "Build pipeline failed");
                return Err(err);
            }
        };

        let sha256 = match artifact_digest(&installed_path).await {
            Ok(digest) => Some(digest),
            Err(err) => {
                warn!(error = %err, "Could not digest installed artifact");
                None
            }
        };

        state = PipelineState::Succeeded;
        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            ?state,
            installed_path = %installed_path.display(),
            duration_ms,
            "Artifact installed"
        );

        Ok(InstallReport {
            platform_key: key,
            installed_path,
            sha256,
            duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_name_follows_os_convention() {
        assert_eq!(DriverSpec::for_os("win32", "node-gyp").program, "node-gyp.cmd");
        assert_eq!(DriverSpec::for_os("linux", "node-gyp").program, "node-gyp");
        assert_eq!(DriverSpec::for_os("darwin", "node-gyp").program, "node-gyp");
    }

    #[test]
    fn rebuild_precedes_passthrough() {
        let driver = DriverSpec::new("sh").with_leading_args(vec!["-c".into(), "true".into()]);
        let args = driver.rebuild_args(&["--debug".to_string(), "--jobs=2".to_string()]);
        assert_eq!(args, vec!["-c", "true", "rebuild", "--debug", "--jobs=2"]);
    }

    #[test]
    fn error_states_are_terminal() {
        let missing = BuildError::ArtifactMissing {
            path: PathBuf::from("x"),
        };
        let state = PipelineState::from(&missing);
        assert_eq!(state, PipelineState::FailedArtifactMissing);
        assert!(state.is_terminal());

        let not_found = BuildError::DriverNotFound {
            program: "node-gyp".into(),
        };
        assert_eq!(PipelineState::from(&not_found), PipelineState::FailedToolMissing);
        assert!(!PipelineState::Running.is_terminal());
        assert!(!PipelineState::NotStarted.is_terminal());
    }
}
