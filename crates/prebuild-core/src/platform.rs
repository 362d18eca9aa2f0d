//! Platform key resolution.
//!
//! A platform key names the directory an artifact is installed under. The
//! `{os}-{arch}-abi-{abi}` shape is a compatibility contract: anything that
//! later loads the artifact must derive the identical key to find it.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Deterministic identifier for an (os, arch, runtime ABI) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformKey(String);

impl PlatformKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PlatformKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derive the platform key for an (os, arch, runtime ABI) triple.
///
/// Pure and infallible; components are used verbatim.
pub fn resolve_key(os: &str, arch: &str, abi_version: &str) -> PlatformKey {
    PlatformKey(format!("{os}-{arch}-abi-{abi_version}"))
}

/// Host-derived values the argument interpreter starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformDefaults {
    pub arch: String,
    pub os: String,
    pub abi_version: String,
}

impl PlatformDefaults {
    pub fn new(
        os: impl Into<String>,
        arch: impl Into<String>,
        abi_version: impl Into<String>,
    ) -> Self {
        Self {
            arch: arch.into(),
            os: os.into(),
            abi_version: abi_version.into(),
        }
    }

    /// Defaults for the host this process runs on.
    pub fn host(abi_version: impl Into<String>) -> Self {
        Self::new(
            normalize_os(std::env::consts::OS),
            normalize_arch(std::env::consts::ARCH),
            abi_version,
        )
    }
}

/// Map Rust's OS names onto the runtime's naming.
pub fn normalize_os(os: &str) -> String {
    match os {
        "windows" => "win32",
        "macos" => "darwin",
        other => other,
    }
    .to_string()
}

/// Map Rust's architecture names onto the runtime's naming.
pub fn normalize_arch(arch: &str) -> String {
    match arch {
        "x86_64" => "x64",
        "x86" => "ia32",
        "aarch64" => "arm64",
        other => other,
    }
    .to_string()
}

fn abi_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[0-9]+\.[0-9]+").expect("ABI pattern is a valid regex"))
}

/// Extract the `major.minor` ABI version from a runtime version string.
///
/// `7.4.288.21` yields `7.4`. Returns `None` if no such pair is present.
pub fn abi_version_from_runtime(runtime_version: &str) -> Option<String> {
    abi_pattern()
        .find(runtime_version)
        .map(|m| m.as_str().to_string())
}
