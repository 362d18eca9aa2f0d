//! Decision flow: reuse, validate, or rebuild.
//!
//! A build happens when forced, when no artifact is installed, or when the
//! installed artifact fails validation. Validation is the only gate that
//! prevents a redundant rebuild.

use crate::args::BuildConfig;
use crate::error::BuildResult;
use crate::layout::ArtifactLayout;
use crate::pipeline::{Builder, InstallReport};
use crate::validator::{RejectReason, TestExecutor, Validator, Verdict};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Why a build was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildReason {
    Forced,
    ArtifactMissing,
    ValidationRejected,
}

/// First step of the decision flow, before any validation has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    Build(BuildReason),
    Validate,
    Skip,
}

/// Decide what to do given the configuration and what is on disk.
pub fn plan(config: &BuildConfig, skip_validation: bool, artifact_exists: bool) -> Plan {
    if config.force_rebuild {
        Plan::Build(BuildReason::Forced)
    } else if skip_validation {
        Plan::Skip
    } else if !artifact_exists {
        Plan::Build(BuildReason::ArtifactMissing)
    } else {
        Plan::Validate
    }
}

/// What an invocation ended up doing.
#[derive(Debug)]
pub enum Outcome {
    /// Validation was disabled; nothing was validated or built.
    ValidationSkipped,
    /// The installed artifact passed validation; nothing was built.
    ArtifactAccepted,
    /// A fresh artifact was built and installed.
    Installed {
        reason: BuildReason,
        /// Set when the build replaced a rejected artifact.
        rejection: Option<RejectReason>,
        report: InstallReport,
    },
}

/// Ties the locator, validator and build pipeline together.
pub struct Orchestrator {
    layout: ArtifactLayout,
    validator: Validator,
    builder: Arc<dyn Builder>,
    skip_validation: bool,
}

impl Orchestrator {
    pub fn new(
        layout: ArtifactLayout,
        builder: Arc<dyn Builder>,
        executor: Arc<dyn TestExecutor>,
        skip_validation: bool,
    ) -> Self {
        Self {
            validator: Validator::new(layout.clone(), executor),
            layout,
            builder,
            skip_validation,
        }
    }

    /// Run the decision flow for one invocation.
    ///
    /// Only build failures are errors; a rejected artifact is recovered by
    /// rebuilding.
    pub async fn run(&self, config: &BuildConfig) -> BuildResult<Outcome> {
        let key = config.platform_key();

        // Existence is only checked when the answer matters.
        let artifact_exists = if config.force_rebuild || self.skip_validation {
            false
        } else {
            self.layout.artifact_exists(&key).await
        };

        match plan(config, self.skip_validation, artifact_exists) {
            Plan::Skip => {
                info!(platform_key = %key, "Validation disabled; leaving artifact untouched");
                Ok(Outcome::ValidationSkipped)
            }
            Plan::Build(reason) => {
                info!(platform_key = %key, ?reason, "Artifact build required");
                let report = self.builder.build(config).await?;
                Ok(Outcome::Installed {
                    reason,
                    rejection: None,
                    report,
                })
            }
            Plan::Validate => match self.validator.validate(&key).await {
                Verdict::Accepted(_) => Ok(Outcome::ArtifactAccepted),
                Verdict::Rejected(rejection) => {
                    warn!(
                        platform_key = %key,
                        "Problem with the binary: {rejection}. Manual build incoming. \
                         Please consider contributing a prebuilt artifact for `{key}`."
                    );
                    let report = self.builder.build(config).await?;
                    Ok(Outcome::Installed {
                        reason: BuildReason::ValidationRejected,
                        rejection: Some(rejection),
                        report,
                    })
                }
            },
        }
    }
}
