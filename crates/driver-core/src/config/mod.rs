//! # Driver Configuration
//!
//! Immutable option map read by every component builder.
//!
//! ## Sources
//!
//! - `DriverConfig::default()` carries the built-in defaults
//! - `DriverConfig::from_env()` overlays `DRIVER_*` variables on top
//!
//! Configuration *file* parsing is not done here; a loader only has to produce
//! option paths and [`OptionValue`]s.
//!
//! ## Errors
//!
//! Values are validated lazily: a typed getter fails with
//! [`ContextError::Config`] naming the option, and the builder that asked for
//! it caches that failure.

pub mod options;

use std::collections::HashMap;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::ContextError;

pub use options::{DriverOption, OptionKind, OptionValue};

/// Environment switch for cycle detection.
pub const DETECT_CYCLES_ENV: &str = "DRIVER_DETECT_CYCLES";

/// Complete driver configuration.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    options: HashMap<String, OptionValue>,
    /// Track component construction and report dependency cycles.
    ///
    /// Off by default: detection costs a little on every build. With it off a
    /// cyclic dependency deadlocks instead of failing.
    pub detect_cycles: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::empty()
            .with(DriverOption::LoadBalancingPolicyClass, "default")
            .with(DriverOption::ReconnectionPolicyClass, "constant")
            .with(DriverOption::ReconnectionBaseDelay, Duration::from_secs(1))
            .with(DriverOption::AddressTranslatorClass, "pass-through")
            .with(DriverOption::ProtocolCompression, "none")
            .with(DriverOption::ProtocolMaxFrameLength, 256 * 1024 * 1024_i64)
            .with(DriverOption::ConnectionConnectTimeout, Duration::from_secs(5))
            .with(DriverOption::ConnectionTcpNoDelay, true)
    }
}

impl DriverConfig {
    /// Configuration with no options at all.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            options: HashMap::new(),
            detect_cycles: false,
        }
    }

    /// Defaults overlaid with `DRIVER_*` environment variables.
    ///
    /// A value that does not parse as the option's type is kept as a string,
    /// so the builder reading it reports the option as invalid.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        for option in DriverOption::all() {
            let env_key = option.env_key();
            if let Ok(raw) = std::env::var(&env_key) {
                let value = OptionValue::parse(option.kind(), &raw).unwrap_or_else(|| {
                    warn!("[Config] {} is not {:?}: {:?}", env_key, option.kind(), raw);
                    OptionValue::String(raw)
                });
                info!("[Config] {} overridden from environment", option);
                config.options.insert(option.path().to_string(), value);
            }
        }

        if let Ok(val) = std::env::var(DETECT_CYCLES_ENV) {
            config.detect_cycles = val == "1" || val.to_lowercase() == "true";
        }

        config
    }

    /// Set an option, builder style.
    #[must_use]
    pub fn with(mut self, option: impl AsRef<str>, value: impl Into<OptionValue>) -> Self {
        self.set(option, value);
        self
    }

    /// Enable or disable cycle detection, builder style.
    #[must_use]
    pub fn with_cycle_detection(mut self, enabled: bool) -> Self {
        self.detect_cycles = enabled;
        self
    }

    pub fn set(&mut self, option: impl AsRef<str>, value: impl Into<OptionValue>) {
        self.options
            .insert(option.as_ref().to_string(), value.into());
    }

    pub fn remove(&mut self, option: impl AsRef<str>) -> Option<OptionValue> {
        self.options.remove(option.as_ref())
    }

    #[must_use]
    pub fn contains(&self, option: impl AsRef<str>) -> bool {
        self.options.contains_key(option.as_ref())
    }

    #[must_use]
    pub fn get(&self, option: impl AsRef<str>) -> Option<&OptionValue> {
        self.options.get(option.as_ref())
    }

    pub fn get_string(&self, option: impl AsRef<str>) -> Result<&str, ContextError> {
        let option = option.as_ref();
        self.get_optional_string(option)?
            .ok_or_else(|| ContextError::missing_option(option))
    }

    pub fn get_optional_string(
        &self,
        option: impl AsRef<str>,
    ) -> Result<Option<&str>, ContextError> {
        let option = option.as_ref();
        match self.options.get(option) {
            None => Ok(None),
            Some(OptionValue::String(value)) => Ok(Some(value)),
            Some(other) => Err(mismatch(option, "a string", other)),
        }
    }

    pub fn get_int(&self, option: impl AsRef<str>) -> Result<i64, ContextError> {
        let option = option.as_ref();
        match self.options.get(option) {
            None => Err(ContextError::missing_option(option)),
            Some(OptionValue::Integer(value)) => Ok(*value),
            Some(other) => Err(mismatch(option, "an integer", other)),
        }
    }

    pub fn get_bool(&self, option: impl AsRef<str>) -> Result<bool, ContextError> {
        let option = option.as_ref();
        match self.options.get(option) {
            None => Err(ContextError::missing_option(option)),
            Some(OptionValue::Boolean(value)) => Ok(*value),
            Some(other) => Err(mismatch(option, "a boolean", other)),
        }
    }

    pub fn get_duration(&self, option: impl AsRef<str>) -> Result<Duration, ContextError> {
        let option = option.as_ref();
        match self.options.get(option) {
            None => Err(ContextError::missing_option(option)),
            Some(OptionValue::Duration(value)) => Ok(*value),
            Some(other) => Err(mismatch(option, "a duration", other)),
        }
    }

    /// A list option; absent means empty.
    pub fn get_string_list(&self, option: impl AsRef<str>) -> Result<&[String], ContextError> {
        let option = option.as_ref();
        match self.options.get(option) {
            None => Ok(&[]),
            Some(OptionValue::List(values)) => Ok(values),
            Some(other) => Err(mismatch(option, "a list", other)),
        }
    }
}

fn mismatch(option: &str, expected: &str, found: &OptionValue) -> ContextError {
    let found = match found {
        OptionValue::String(raw) => format!("the string {raw:?}"),
        other => other.type_name().to_string(),
    };
    ContextError::invalid_option(option, format!("expected {expected}, found {found}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DriverConfig::default();

        assert_eq!(
            config.get_string(DriverOption::LoadBalancingPolicyClass),
            Ok("default")
        );
        assert_eq!(
            config.get_duration(DriverOption::ReconnectionBaseDelay),
            Ok(Duration::from_secs(1))
        );
        assert_eq!(config.get_optional_string(DriverOption::AuthProviderClass), Ok(None));
        assert!(!config.detect_cycles);
    }

    #[test]
    fn test_missing_option_is_named() {
        let config = DriverConfig::empty();
        let error = config.get_string("x").unwrap_err();
        assert_eq!(error.option(), Some("x"));
    }

    #[test]
    fn test_type_mismatch_is_invalid() {
        let config = DriverConfig::empty().with(DriverOption::ReconnectionBaseDelay, "soon");
        let error = config
            .get_duration(DriverOption::ReconnectionBaseDelay)
            .unwrap_err();

        assert_eq!(
            error,
            ContextError::invalid_option(
                "connection.reconnection-policy.base-delay",
                "expected a duration, found the string \"soon\""
            )
        );
    }

    #[test]
    fn test_absent_list_is_empty() {
        let config = DriverConfig::empty();
        assert_eq!(config.get_string_list(DriverOption::ContactPoints), Ok(&[][..]));
    }
}
