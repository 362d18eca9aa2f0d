//! Prebuild Core
//!
//! Resolves the native artifact for the current platform, validates an
//! installed one against a behavioral test suite, and falls back to building
//! from source when there is nothing usable:
//!
//! - [`platform`]: platform keys (`{os}-{arch}-abi-{abi}`)
//! - [`args`]: invocation argument interpretation
//! - [`layout`]: build-output and installed paths, artifact locator
//! - [`validator`]: test suite execution and the 90% acceptance threshold
//! - [`pipeline`]: build driver subprocess and artifact installation
//! - [`orchestrator`]: the reuse / validate / rebuild decision flow

pub mod args;
pub mod error;
pub mod layout;
pub mod orchestrator;
pub mod pipeline;
pub mod platform;
pub mod telemetry;
pub mod validator;

pub use args::{parse, BuildConfig};
pub use error::{BuildError, BuildResult, ValidationError, DRIVER_NOT_FOUND_EXIT_CODE};
pub use layout::{artifact_digest, ArtifactLayout, DEFAULT_ARTIFACT_NAME};
pub use orchestrator::{plan, BuildReason, Orchestrator, Outcome, Plan};
pub use pipeline::{
    BuildPipeline, Builder, DriverSpec, InstallReport, PipelineState, DEFAULT_DRIVER,
    REBUILD_COMMAND,
};
pub use platform::{
    abi_version_from_runtime, normalize_arch, normalize_os, resolve_key, PlatformDefaults,
    PlatformKey,
};
pub use telemetry::init_tracing;
pub use validator::{
    parse_report, CommandTestExecutor, RejectReason, TestExecutor, ValidationResult, Validator,
    Verdict, ARTIFACT_PATH_ENV, PASS_THRESHOLD_PERCENT, PLATFORM_KEY_ENV,
};
