//! Environment-driven configuration.

use crate::consts::FULL_BUILD_ENV;

/// Whether a truthy flag value was given (`1`, `true`, `yes`, `on`; any case).
pub fn is_truthy(value: &str) -> bool {
  matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Whether `BUILDGUARD_FULL_BUILD` requests a full build.
pub fn full_build_from_env() -> bool {
  std::env::var(FULL_BUILD_ENV).is_ok_and(|value| is_truthy(&value))
}
