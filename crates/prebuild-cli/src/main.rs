//! Prebuild CLI
//!
//! The `prebuild` command makes sure a working native artifact is installed
//! for the current platform:
//!
//! - forced (`-f` / `--force`): always build from source
//! - no artifact installed: build from source
//! - artifact installed: run the test suite against it and rebuild only if
//!   fewer than 90% of the cases pass
//!
//! Tokens the CLI does not own are interpreted by `prebuild_core::parse` and
//! forwarded to the build driver.

use anyhow::{Context, Result};
use clap::builder::FalseyValueParser;
use clap::Parser;
use prebuild_core::{
    abi_version_from_runtime, init_tracing, parse, ArtifactLayout, BuildConfig, BuildError,
    BuildPipeline, CommandTestExecutor, DriverSpec, Orchestrator, Outcome, PlatformDefaults,
    DEFAULT_ARTIFACT_NAME, DEFAULT_DRIVER,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, Level};

#[derive(Parser, Debug)]
#[command(name = "prebuild")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Resolve, validate, or rebuild a platform-specific native artifact", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    log_json: bool,

    /// Print the final outcome as JSON on stdout
    #[arg(long)]
    report_json: bool,

    /// Package directory the build driver and test suite run in
    #[arg(long, env = "PREBUILD_PACKAGE_DIR", default_value = ".")]
    package_dir: PathBuf,

    /// Artifact file name
    #[arg(long, env = "PREBUILD_ARTIFACT", default_value = DEFAULT_ARTIFACT_NAME)]
    artifact: String,

    /// Install root (default: <package-dir>/bin)
    #[arg(long, env = "PREBUILD_INSTALL_ROOT")]
    install_root: Option<PathBuf>,

    /// Build root written by the driver (default: <package-dir>/build)
    #[arg(long, env = "PREBUILD_BUILD_ROOT")]
    build_root: Option<PathBuf>,

    /// Build driver base name (`.cmd` is appended on win32)
    #[arg(long, env = "PREBUILD_DRIVER", default_value = DEFAULT_DRIVER)]
    driver: String,

    /// Runtime version; its leading major.minor pair is the ABI version
    #[arg(long, env = "PREBUILD_RUNTIME_VERSION")]
    runtime_version: String,

    /// Test suite command line, whitespace separated
    #[arg(long, env = "PREBUILD_TEST_COMMAND")]
    test_command: Option<String>,

    /// Test suite timeout in seconds (0 waits indefinitely)
    #[arg(long, env = "PREBUILD_TEST_TIMEOUT", default_value_t = 0)]
    test_timeout: u64,

    /// Neither validate nor build unless forced
    #[arg(long, env = "PREBUILD_SKIP_VALIDATION", value_parser = FalseyValueParser::new())]
    skip_validation: bool,

    /// Invocation arguments (-f/--force, --debug, --target_arch=<arch>, driver flags)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

impl Cli {
    fn layout(&self) -> ArtifactLayout {
        let mut layout =
            ArtifactLayout::for_package(&self.package_dir).with_artifact_name(&self.artifact);
        if let Some(build_root) = &self.build_root {
            layout = layout.with_build_root(build_root);
        }
        if let Some(install_root) = &self.install_root {
            layout = layout.with_install_root(install_root);
        }
        layout
    }

    /// An installed artifact can only be reused if a test suite can vouch
    /// for it, so validation without a test command is a configuration error.
    fn ensure_validation_possible(&self, config: &BuildConfig) -> Result<()> {
        let has_test_command = self
            .test_command
            .as_deref()
            .is_some_and(|command| !command.trim().is_empty());
        if !has_test_command && !self.skip_validation && !config.force_rebuild {
            anyhow::bail!(
                "no test command configured to validate installed artifacts; \
                 set --test-command (PREBUILD_TEST_COMMAND), or pass --skip-validation \
                 (PREBUILD_SKIP_VALIDATION=1) or --force"
            );
        }
        Ok(())
    }

    fn test_executor(&self) -> CommandTestExecutor {
        CommandTestExecutor::from_command_line(
            self.test_command.as_deref().unwrap_or_default(),
            &self.package_dir,
            self.test_timeout,
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.log_json, level);

    let abi_version = abi_version_from_runtime(&cli.runtime_version).with_context(|| {
        format!(
            "runtime version `{}` has no major.minor component",
            cli.runtime_version
        )
    })?;
    let config = parse(&cli.args, &PlatformDefaults::host(abi_version));
    cli.ensure_validation_possible(&config)?;
    let layout = cli.layout();
    let driver = DriverSpec::for_os(&config.operating_system, &cli.driver);

    let orchestrator = Orchestrator::new(
        layout.clone(),
        Arc::new(BuildPipeline::new(driver, layout)),
        Arc::new(cli.test_executor()),
        cli.skip_validation,
    );

    match orchestrator.run(&config).await {
        Ok(outcome) => {
            if cli.report_json {
                println!("{}", serde_json::to_string_pretty(&outcome_json(&outcome))?);
            } else {
                println!("{}", outcome_message(&outcome));
            }
            Ok(())
        }
        Err(err) => {
            error!(error = %err, exit_code = err.exit_code(), "prebuild failed");
            eprintln!("{}", failure_message(&err));
            std::process::exit(err.exit_code());
        }
    }
}

fn outcome_message(outcome: &Outcome) -> String {
    match outcome {
        Outcome::ValidationSkipped => "Validation disabled; nothing to do".to_string(),
        Outcome::ArtifactAccepted => "Binary is fine; exiting".to_string(),
        Outcome::Installed { report, .. } => {
            format!("Installed in `{}`", report.installed_path.display())
        }
    }
}

fn outcome_json(outcome: &Outcome) -> serde_json::Value {
    match outcome {
        Outcome::ValidationSkipped => json!({ "outcome": "validation_skipped" }),
        Outcome::ArtifactAccepted => json!({ "outcome": "artifact_accepted" }),
        Outcome::Installed {
            reason,
            rejection,
            report,
        } => json!({
            "outcome": "installed",
            "reason": reason,
            "rejection": rejection.as_ref().map(ToString::to_string),
            "platform_key": report.platform_key,
            "installed_path": report.installed_path,
            "sha256": report.sha256,
            "duration_ms": report.duration_ms,
        }),
    }
}

fn failure_message(err: &BuildError) -> String {
    match err {
        BuildError::DriverNotFound { program } => format!(
            "{err}. Install `{program}` or point PREBUILD_DRIVER at a working build driver."
        ),
        BuildError::ArtifactMissing { .. } => format!(
            "{err}. The build driver reported success without producing the artifact."
        ),
        _ => err.to_string(),
    }
}
