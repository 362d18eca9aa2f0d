//! Behavioral validation of an installed artifact.
//!
//! The test suite is external; the validator only runs it once, reads the
//! aggregate counts and applies a fixed 90% pass-rate threshold.

use crate::error::ValidationError;
use crate::layout::ArtifactLayout;
use crate::platform::PlatformKey;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Minimum pass rate, in percent, for an artifact to be accepted.
pub const PASS_THRESHOLD_PERCENT: u64 = 90;

/// Environment variable carrying the installed artifact path to the test suite.
pub const ARTIFACT_PATH_ENV: &str = "PREBUILD_ARTIFACT_PATH";

/// Environment variable carrying the platform key to the test suite.
pub const PLATFORM_KEY_ENV: &str = "PREBUILD_PLATFORM_KEY";

/// Aggregate counts of one test suite run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub total_cases: u64,
    pub failed_cases: u64,
}

impl ValidationResult {
    /// Counts with `failed <= total` enforced.
    pub fn new(total_cases: u64, failed_cases: u64) -> Result<Self, ValidationError> {
        if failed_cases > total_cases {
            return Err(ValidationError::InconsistentCounts {
                total: total_cases,
                failed: failed_cases,
            });
        }
        Ok(Self {
            total_cases,
            failed_cases,
        })
    }

    pub fn passed_cases(&self) -> u64 {
        self.total_cases - self.failed_cases
    }

    /// `passed * 100 / total >= 90`, without the division.
    ///
    /// Widened to `u128` since counts come from an external report. An empty
    /// suite is never accepted.
    pub fn accepted(&self) -> bool {
        self.total_cases > 0
            && u128::from(self.passed_cases()) * 100
                >= u128::from(self.total_cases) * u128::from(PASS_THRESHOLD_PERCENT)
    }
}

/// Why an artifact was rejected.
#[derive(Debug)]
pub enum RejectReason {
    BelowThreshold(ValidationResult),
    EmptySuite,
    SuiteUnavailable(ValidationError),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::BelowThreshold(result) => write!(
                f,
                "{} of {} tests are failing",
                result.failed_cases, result.total_cases
            ),
            RejectReason::EmptySuite => write!(f, "test suite ran no cases"),
            RejectReason::SuiteUnavailable(err) => write!(f, "{err}"),
        }
    }
}

/// Outcome of validating an installed artifact.
#[derive(Debug)]
pub enum Verdict {
    Accepted(ValidationResult),
    Rejected(RejectReason),
}

impl Verdict {
    /// Apply the acceptance policy to a test run.
    pub fn from_run(run: Result<ValidationResult, ValidationError>) -> Self {
        match run {
            Ok(result) if result.total_cases == 0 => Verdict::Rejected(RejectReason::EmptySuite),
            Ok(result) if result.accepted() => Verdict::Accepted(result),
            Ok(result) => Verdict::Rejected(RejectReason::BelowThreshold(result)),
            Err(err) => Verdict::Rejected(RejectReason::SuiteUnavailable(err)),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted(_))
    }
}

/// External test executor run against an installed artifact.
#[async_trait]
pub trait TestExecutor: Send + Sync {
    /// Run the whole suite once and report aggregate counts.
    async fn execute(
        &self,
        key: &PlatformKey,
        artifact: &Path,
    ) -> Result<ValidationResult, ValidationError>;
}

/// Test executor backed by a configured command.
///
/// The command's stdout must carry a JSON report, either
/// `{"total": N, "failures": M}` or mocha's `{"stats": {"tests": N, "failures": M}}`.
#[derive(Debug, Clone)]
pub struct CommandTestExecutor {
    command: Vec<String>,
    work_dir: PathBuf,
    /// 0 waits indefinitely.
    timeout_secs: u64,
}

impl CommandTestExecutor {
    pub fn new(command: Vec<String>, work_dir: impl Into<PathBuf>, timeout_secs: u64) -> Self {
        Self {
            command,
            work_dir: work_dir.into(),
            timeout_secs,
        }
    }

    /// Split a whitespace-separated command line.
    pub fn from_command_line(
        command_line: &str,
        work_dir: impl Into<PathBuf>,
        timeout_secs: u64,
    ) -> Self {
        let command = command_line.split_whitespace().map(str::to_string).collect();
        Self::new(command, work_dir, timeout_secs)
    }
}

#[async_trait]
impl TestExecutor for CommandTestExecutor {
    async fn execute(
        &self,
        key: &PlatformKey,
        artifact: &Path,
    ) -> Result<ValidationResult, ValidationError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or(ValidationError::NotConfigured)?;

        debug!(program = %program, ?args, "Running test suite");

        let child = Command::new(program)
            .args(args)
            .current_dir(&self.work_dir)
            .env(ARTIFACT_PATH_ENV, artifact)
            .env(PLATFORM_KEY_ENV, key.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ValidationError::Spawn {
                program: program.clone(),
                source,
            })?;

        let waited = if self.timeout_secs > 0 {
            tokio::time::timeout(
                std::time::Duration::from_secs(self.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| ValidationError::Timeout {
                secs: self.timeout_secs,
            })?
        } else {
            child.wait_with_output().await
        };
        let output = waited.map_err(|source| ValidationError::Spawn {
            program: program.clone(),
            source,
        })?;

        debug!(exit_code = ?output.status.code(), "Test suite finished");

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_report(&stdout)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Report {
    Flat { total: u64, failures: u64 },
    Mocha { stats: MochaStats },
}

#[derive(Deserialize)]
struct MochaStats {
    tests: u64,
    failures: u64,
}

/// Read aggregate counts from test executor output.
///
/// Tries the whole output first, then the last non-empty line.
pub fn parse_report(stdout: &str) -> Result<ValidationResult, ValidationError> {
    let report = serde_json::from_str::<Report>(stdout.trim()).or_else(|whole_err| {
        stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| ValidationError::MalformedReport("empty output".to_string()))
            .and_then(|line| {
                serde_json::from_str::<Report>(line).map_err(|_| {
                    ValidationError::MalformedReport(whole_err.to_string())
                })
            })
    })?;

    match report {
        Report::Flat { total, failures } => ValidationResult::new(total, failures),
        Report::Mocha { stats } => ValidationResult::new(stats.tests, stats.failures),
    }
}

/// Runs the test suite against the installed artifact for a platform key.
pub struct Validator {
    layout: ArtifactLayout,
    executor: Arc<dyn TestExecutor>,
}

impl Validator {
    pub fn new(layout: ArtifactLayout, executor: Arc<dyn TestExecutor>) -> Self {
        Self { layout, executor }
    }

    /// Validate the artifact installed for `key`. A single run is authoritative.
    pub async fn validate(&self, key: &PlatformKey) -> Verdict {
        let artifact = self.layout.installed_path(key);
        info!(platform_key = %key, "`{}` exists; testing", key);

        let verdict = Verdict::from_run(self.executor.execute(key, &artifact).await);
        match &verdict {
            Verdict::Accepted(result) => info!(
                passed = result.passed_cases(),
                total = result.total_cases,
                "Artifact accepted"
            ),
            Verdict::Rejected(reason) => warn!(%reason, "Artifact rejected"),
        }
        verdict
    }
}
