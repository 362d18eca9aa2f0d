//! Invocation argument interpretation.
//!
//! Only a handful of tokens are recognised. Everything except the force flag
//! is kept, in order, as pass-through arguments for the build driver.

use crate::platform::{resolve_key, PlatformDefaults, PlatformKey};
use serde::{Deserialize, Serialize};

const FORCE_SHORT: &str = "-f";
const FORCE_LONG: &str = "--force";
const DEBUG_FLAG: &str = "--debug";
const TARGET_ARCH_PREFIX: &str = "--target_arch";

/// Per-invocation build configuration.
///
/// Constructed once from the process arguments by [`parse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    pub architecture: String,
    pub operating_system: String,
    pub runtime_abi_version: String,
    pub debug: bool,
    pub force_rebuild: bool,
    /// Raw arguments forwarded to the build driver after `rebuild`.
    pub passthrough_args: Vec<String>,
}

impl BuildConfig {
    /// Platform key for this configuration.
    pub fn platform_key(&self) -> PlatformKey {
        resolve_key(
            &self.operating_system,
            &self.architecture,
            &self.runtime_abi_version,
        )
    }
}

/// Interpret invocation arguments, left to right, on top of `defaults`.
///
/// - `-f` / `--force` sets `force_rebuild` and is dropped from pass-through.
/// - `--target_arch<sep><value>` overrides the architecture and is kept.
/// - `--debug` sets `debug` and is kept.
/// - anything else is kept verbatim.
///
/// Architecture values are not validated.
pub fn parse<S: AsRef<str>>(args: &[S], defaults: &PlatformDefaults) -> BuildConfig {
    let mut config = BuildConfig {
        architecture: defaults.arch.clone(),
        operating_system: defaults.os.clone(),
        runtime_abi_version: defaults.abi_version.clone(),
        debug: false,
        force_rebuild: false,
        passthrough_args: Vec::with_capacity(args.len()),
    };

    for arg in args.iter().map(AsRef::as_ref) {
        if arg == FORCE_SHORT || arg == FORCE_LONG {
            config.force_rebuild = true;
            continue;
        }

        if let Some(arch) = target_arch_value(arg) {
            config.architecture = arch.to_string();
        } else if arg == DEBUG_FLAG {
            config.debug = true;
        }

        config.passthrough_args.push(arg.to_string());
    }

    config
}

/// Value of a `--target_arch` token: whatever follows the single separator
/// character after the prefix (`--target_arch=ia32` gives `ia32`).
fn target_arch_value(arg: &str) -> Option<&str> {
    let rest = arg.strip_prefix(TARGET_ARCH_PREFIX)?;
    let mut chars = rest.chars();
    chars.next();
    Some(chars.as_str())
}
