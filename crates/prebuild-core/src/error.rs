//! Error taxonomy for artifact resolution and fallback builds.

use std::path::PathBuf;

/// Exit code a shell reports when a command cannot be found.
pub const DRIVER_NOT_FOUND_EXIT_CODE: i32 = 127;

/// Fatal errors raised by the build pipeline.
///
/// Every variant terminates the invocation; [`BuildError::exit_code`] gives
/// the process exit status to propagate.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("build driver `{program}` not found")]
    DriverNotFound { program: String },

    #[error("failed to start build driver `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("build failed{}", exit_suffix(.code))]
    BuildFailed { code: Option<i32> },

    #[error("build succeeded but artifact not found at {}", .path.display())]
    ArtifactMissing { path: PathBuf },

    #[error("{source}")]
    CreateInstallDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{source}")]
    Relocate {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    /// Process exit status for this failure.
    ///
    /// The driver's own code is propagated verbatim; 127 is never remapped.
    pub fn exit_code(&self) -> i32 {
        match self {
            BuildError::DriverNotFound { .. } => DRIVER_NOT_FOUND_EXIT_CODE,
            BuildError::BuildFailed { code: Some(code) } => *code,
            BuildError::BuildFailed { code: None } => 1,
            BuildError::Spawn { .. }
            | BuildError::ArtifactMissing { .. }
            | BuildError::CreateInstallDir { .. }
            | BuildError::Relocate { .. } => 1,
        }
    }

    /// Whether this is an installation I/O failure (directory creation or relocation).
    pub fn is_installation_io(&self) -> bool {
        matches!(
            self,
            BuildError::CreateInstallDir { .. } | BuildError::Relocate { .. }
        )
    }
}

fn exit_suffix(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(" with exit code {code}"),
        None => " (driver terminated by signal)".to_string(),
    }
}

/// Reasons the test executor could not produce a usable report.
///
/// None of these are fatal: the orchestrator treats them as a rejected
/// artifact and falls back to a build.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("no test command configured")]
    NotConfigured,

    #[error("failed to start test command `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("test suite timed out after {secs} seconds")]
    Timeout { secs: u64 },

    #[error("test suite produced no readable report: {0}")]
    MalformedReport(String),

    #[error("test report counts {failed} failures out of {total} cases")]
    InconsistentCounts { total: u64, failed: u64 },
}

/// Result type for build pipeline operations.
pub type BuildResult<T> = std::result::Result<T, BuildError>;
