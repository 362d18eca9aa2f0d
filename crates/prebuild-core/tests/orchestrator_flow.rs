//! Integration tests for the reuse / validate / rebuild decision flow.

use std::path::Path;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use prebuild_core::{
    parse, ArtifactLayout, BuildConfig, BuildError, BuildPipeline, BuildReason, BuildResult,
    Builder, DriverSpec, InstallReport, Orchestrator, Outcome, PlatformDefaults, PlatformKey,
    RejectReason, TestExecutor, ValidationError, ValidationResult,
};
use tempfile::TempDir;

fn defaults() -> PlatformDefaults {
    PlatformDefaults::new("linux", "x64", "7.4")
}

fn install_artifact(layout: &ArtifactLayout, config: &BuildConfig, contents: &[u8]) {
    let key = config.platform_key();
    std::fs::create_dir_all(layout.install_dir(&key)).unwrap();
    std::fs::write(layout.installed_path(&key), contents).unwrap();
}

/// Builder that records how often it was invoked.
struct CountingBuilder {
    layout: ArtifactLayout,
    calls: Arc<AtomicUsize>,
}

impl CountingBuilder {
    fn new(layout: ArtifactLayout) -> Self {
        Self {
            layout,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Builder for CountingBuilder {
    async fn build(&self, config: &BuildConfig) -> BuildResult<InstallReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = config.platform_key();
        Ok(InstallReport {
            installed_path: self.layout.installed_path(&key),
            platform_key: key,
            sha256: None,
            duration_ms: 0,
        })
    }
}

/// Test executor that returns a fixed result and records how often it ran.
struct ScriptedExecutor {
    result: fn() -> Result<ValidationResult, ValidationError>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedExecutor {
    fn new(result: fn() -> Result<ValidationResult, ValidationError>) -> Self {
        Self {
            result,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn passing() -> Self {
        Self::new(|| ValidationResult::new(100, 0))
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TestExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        _key: &PlatformKey,
        _artifact: &Path,
    ) -> Result<ValidationResult, ValidationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.result)()
    }
}

struct Harness {
    _dir: TempDir,
    layout: ArtifactLayout,
    builder: Arc<CountingBuilder>,
    executor: Arc<ScriptedExecutor>,
}

impl Harness {
    fn new(executor: ScriptedExecutor) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let layout = ArtifactLayout::for_package(dir.path());
        Self {
            builder: Arc::new(CountingBuilder::new(layout.clone())),
            executor: Arc::new(executor),
            layout,
            _dir: dir,
        }
    }

    fn orchestrator(&self, skip_validation: bool) -> Orchestrator {
        Orchestrator::new(
            self.layout.clone(),
            self.builder.clone(),
            self.executor.clone(),
            skip_validation,
        )
    }
}

#[tokio::test]
async fn missing_artifact_builds_once_without_validation() {
    let harness = Harness::new(ScriptedExecutor::passing());
    let config = parse::<&str>(&[], &defaults());

    let outcome = harness.orchestrator(false).run(&config).await.unwrap();

    assert!(matches!(
        outcome,
        Outcome::Installed {
            reason: BuildReason::ArtifactMissing,
            rejection: None,
            ..
        }
    ));
    assert_eq!(harness.builder.call_count(), 1);
    assert_eq!(harness.executor.call_count(), 0);
}

#[tokio::test]
async fn force_builds_even_when_artifact_would_pass() {
    let harness = Harness::new(ScriptedExecutor::passing());
    let config = parse(&["--force"], &defaults());
    install_artifact(&harness.layout, &config, b"prebuilt");

    let outcome = harness.orchestrator(false).run(&config).await.unwrap();

    assert!(matches!(
        outcome,
        Outcome::Installed {
            reason: BuildReason::Forced,
            ..
        }
    ));
    assert_eq!(harness.builder.call_count(), 1);
    assert_eq!(harness.executor.call_count(), 0);
}

#[tokio::test]
async fn force_builds_even_when_validation_is_disabled() {
    let harness = Harness::new(ScriptedExecutor::passing());
    let config = parse(&["-f"], &defaults());

    harness.orchestrator(true).run(&config).await.unwrap();

    assert_eq!(harness.builder.call_count(), 1);
}

#[tokio::test]
async fn accepted_artifact_is_left_alone() {
    let harness = Harness::new(ScriptedExecutor::new(|| ValidationResult::new(100, 9)));
    let config = parse::<&str>(&[], &defaults());
    install_artifact(&harness.layout, &config, b"prebuilt");

    let outcome = harness.orchestrator(false).run(&config).await.unwrap();

    assert!(matches!(outcome, Outcome::ArtifactAccepted));
    assert_eq!(harness.executor.call_count(), 1);
    assert_eq!(harness.builder.call_count(), 0);
}

#[tokio::test]
async fn rejected_artifact_falls_back_to_build() {
    let harness = Harness::new(ScriptedExecutor::new(|| ValidationResult::new(100, 11)));
    let config = parse::<&str>(&[], &defaults());
    install_artifact(&harness.layout, &config, b"prebuilt");

    let outcome = harness.orchestrator(false).run(&config).await.unwrap();

    match outcome {
        Outcome::Installed {
            reason,
            rejection: Some(RejectReason::BelowThreshold(result)),
            ..
        } => {
            assert_eq!(reason, BuildReason::ValidationRejected);
            assert_eq!(result.failed_cases, 11);
        }
        other => panic!("expected fallback build, got {other:?}"),
    }
    assert_eq!(harness.executor.call_count(), 1);
    assert_eq!(harness.builder.call_count(), 1);
}

#[tokio::test]
async fn empty_suite_falls_back_to_build() {
    let harness = Harness::new(ScriptedExecutor::new(|| ValidationResult::new(0, 0)));
    let config = parse::<&str>(&[], &defaults());
    install_artifact(&harness.layout, &config, b"prebuilt");

    let outcome = harness.orchestrator(false).run(&config).await.unwrap();

    assert!(matches!(
        outcome,
        Outcome::Installed {
            rejection: Some(RejectReason::EmptySuite),
            ..
        }
    ));
    assert_eq!(harness.builder.call_count(), 1);
}

#[tokio::test]
async fn broken_suite_falls_back_to_build() {
    let harness = Harness::new(ScriptedExecutor::new(|| {
        Err(ValidationError::MalformedReport("no output".to_string()))
    }));
    let config = parse::<&str>(&[], &defaults());
    install_artifact(&harness.layout, &config, b"prebuilt");

    harness.orchestrator(false).run(&config).await.unwrap();

    assert_eq!(harness.builder.call_count(), 1);
}

#[tokio::test]
async fn skipped_validation_neither_validates_nor_builds() {
    let harness = Harness::new(ScriptedExecutor::passing());
    let config = parse::<&str>(&[], &defaults());

    let outcome = harness.orchestrator(true).run(&config).await.unwrap();

    assert!(matches!(outcome, Outcome::ValidationSkipped));
    assert_eq!(harness.executor.call_count(), 0);
    assert_eq!(harness.builder.call_count(), 0);
}

#[tokio::test]
async fn target_arch_override_changes_lookup_key() {
    let harness = Harness::new(ScriptedExecutor::passing());
    let host = parse::<&str>(&[], &defaults());
    install_artifact(&harness.layout, &host, b"prebuilt x64");

    let cross = parse(&["--target_arch=ia32"], &defaults());
    let outcome = harness.orchestrator(false).run(&cross).await.unwrap();

    match outcome {
        Outcome::Installed { report, .. } => {
            assert_eq!(report.platform_key.as_str(), "linux-ia32-abi-7.4");
        }
        other => panic!("expected build for ia32, got {other:?}"),
    }
    assert_eq!(harness.executor.call_count(), 0);
}

// ---------------------------------------------------------------------------
// Real build pipeline, with `sh -c` standing in for the build driver
// ---------------------------------------------------------------------------

fn sh_driver(script: &str) -> DriverSpec {
    DriverSpec::new("sh").with_leading_args(vec![
        "-c".to_string(),
        script.to_string(),
        "driver".to_string(),
    ])
}

/// Writes its arguments into the Release (or Debug) artifact.
const PRODUCING_DRIVER: &str = r#"
folder=Release
for arg in "$@"; do
  if [ "$arg" = "--debug" ]; then folder=Debug; fi
done
mkdir -p "build/$folder"
printf '%s ' "$@" > "build/$folder/binding.node"
"#;

fn pipeline_orchestrator(dir: &TempDir, driver: DriverSpec) -> (Orchestrator, ArtifactLayout) {
    let layout = ArtifactLayout::for_package(dir.path());
    let pipeline = BuildPipeline::new(driver, layout.clone());
    let orchestrator = Orchestrator::new(
        layout.clone(),
        Arc::new(pipeline),
        Arc::new(ScriptedExecutor::passing()),
        false,
    );
    (orchestrator, layout)
}

#[tokio::test]
async fn end_to_end_build_installs_under_platform_key() {
    let dir = tempfile::tempdir().unwrap();
    let (orchestrator, layout) = pipeline_orchestrator(&dir, sh_driver(PRODUCING_DRIVER));
    let config = parse(&["--jobs=2"], &defaults());

    let outcome = orchestrator.run(&config).await.unwrap();

    let report = match outcome {
        Outcome::Installed { report, .. } => report,
        other => panic!("expected install, got {other:?}"),
    };
    let expected = dir
        .path()
        .join("bin")
        .join("linux-x64-abi-7.4")
        .join("binding.node");
    assert_eq!(report.installed_path, expected);
    assert_eq!(report.platform_key.as_str(), "linux-x64-abi-7.4");
    assert_eq!(report.sha256.as_ref().map(String::len), Some(64));

    let contents = std::fs::read_to_string(&expected).unwrap();
    assert_eq!(contents.trim_end(), "rebuild --jobs=2");
    assert!(!layout.build_output_path(false).exists(), "artifact was moved");
}

#[tokio::test]
async fn debug_build_is_taken_from_debug_folder() {
    let dir = tempfile::tempdir().unwrap();
    let (orchestrator, _) = pipeline_orchestrator(&dir, sh_driver(PRODUCING_DRIVER));
    let config = parse(&["--debug"], &defaults());

    let outcome = orchestrator.run(&config).await.unwrap();

    let Outcome::Installed { report, .. } = outcome else {
        panic!("expected install");
    };
    let contents = std::fs::read_to_string(&report.installed_path).unwrap();
    assert_eq!(contents.trim_end(), "rebuild --debug");
}

#[tokio::test]
async fn forced_build_overwrites_installed_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let (orchestrator, layout) = pipeline_orchestrator(&dir, sh_driver(PRODUCING_DRIVER));
    let config = parse(&["--force"], &defaults());
    install_artifact(&layout, &config, b"old prebuilt");

    orchestrator.run(&config).await.unwrap();

    let installed = layout.installed_path(&config.platform_key());
    let contents = std::fs::read_to_string(installed).unwrap();
    assert_eq!(contents.trim_end(), "rebuild");
}

#[tokio::test]
async fn driver_exit_127_is_tool_missing_and_installs_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (orchestrator, layout) = pipeline_orchestrator(&dir, sh_driver("exit 127"));
    let config = parse::<&str>(&[], &defaults());

    let err = orchestrator.run(&config).await.unwrap_err();

    assert!(matches!(err, BuildError::DriverNotFound { .. }));
    assert_eq!(err.exit_code(), 127);
    assert!(!layout.install_dir(&config.platform_key()).exists());
}

#[tokio::test]
async fn absent_driver_binary_is_tool_missing() {
    let dir = tempfile::tempdir().unwrap();
    let (orchestrator, _) =
        pipeline_orchestrator(&dir, DriverSpec::new("definitely-not-a-build-driver-xyz"));
    let config = parse::<&str>(&[], &defaults());

    let err = orchestrator.run(&config).await.unwrap_err();

    assert!(matches!(err, BuildError::DriverNotFound { .. }));
    assert_eq!(err.exit_code(), 127);
}

#[tokio::test]
async fn driver_failure_propagates_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let (orchestrator, layout) = pipeline_orchestrator(&dir, sh_driver("exit 3"));
    let config = parse::<&str>(&[], &defaults());

    let err = orchestrator.run(&config).await.unwrap_err();

    assert!(matches!(err, BuildError::BuildFailed { code: Some(3) }));
    assert_eq!(err.exit_code(), 3);
    assert!(!layout.install_dir(&config.platform_key()).exists());
}

#[tokio::test]
async fn success_without_artifact_is_a_contract_violation() {
    let dir = tempfile::tempdir().unwrap();
    let (orchestrator, layout) = pipeline_orchestrator(&dir, sh_driver("exit 0"));
    let config = parse::<&str>(&[], &defaults());

    let err = orchestrator.run(&config).await.unwrap_err();

    match &err {
        BuildError::ArtifactMissing { path } => {
            assert_eq!(path, &layout.build_output_path(false));
        }
        other => panic!("expected ArtifactMissing, got {other:?}"),
    }
    assert_eq!(err.exit_code(), 1);
    assert!(!layout.installed_path(&config.platform_key()).exists());
}

#[tokio::test]
async fn blocked_install_dir_is_an_installation_error() {
    let dir = tempfile::tempdir().unwrap();
    let (orchestrator, layout) = pipeline_orchestrator(&dir, sh_driver(PRODUCING_DRIVER));
    let config = parse::<&str>(&[], &defaults());
    // A regular file where the key directory should be.
    std::fs::create_dir_all(&layout.install_root).unwrap();
    std::fs::write(layout.install_dir(&config.platform_key()), b"").unwrap();

    let err = orchestrator.run(&config).await.unwrap_err();

    assert!(err.is_installation_io(), "unexpected error: {err:?}");
    assert_eq!(err.exit_code(), 1);
}
