//! # Context Errors
//!
//! Every failure the context can surface. Errors are `Clone` because a failed
//! component caches its error and hands the same value to every later caller.

use thiserror::Error;

/// Errors raised while building or accessing driver components.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// A component build re-entered a component that is already being built.
    #[error("Detected cycle in context initialization: {}", chain.join(" -> "))]
    Cycle {
        /// Component names in the order they were entered; the first name is
        /// repeated at the end.
        chain: Vec<String>,
    },

    /// A builder could not find or parse a required option.
    #[error("Invalid configuration for option '{option}': {reason}")]
    Config { option: String, reason: String },

    /// Any other builder failure, tagged with the component being built.
    #[error("Failed to build component '{component}': {message}")]
    Build { component: String, message: String },

    /// The context (or its coordination task) has been shut down.
    #[error("Driver context is closed")]
    Closed,
}

/// Errors from parsing version strings reported by the cluster or configured
/// by the user.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid version {0:?}")]
    InvalidVersion(String),

    #[error("empty pre-release in version {0:?}")]
    EmptyPreRelease(String),

    #[error("unknown protocol version {raw:?} (known: {known})")]
    UnknownProtocolVersion { raw: String, known: String },
}

impl ContextError {
    /// Configuration error for an option that has no value.
    pub fn missing_option(option: impl Into<String>) -> Self {
        Self::Config {
            option: option.into(),
            reason: "missing value, check your configuration".to_string(),
        }
    }

    /// Configuration error for an option whose value cannot be used.
    pub fn invalid_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            option: option.into(),
            reason: reason.into(),
        }
    }

    /// Wrap an arbitrary builder failure with the component name.
    pub fn build(component: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::Build {
            component: component.into(),
            message: cause.to_string(),
        }
    }

    /// Whether this is a dependency cycle.
    #[must_use]
    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::Cycle { .. })
    }

    /// The option a configuration error refers to.
    #[must_use]
    pub fn option(&self) -> Option<&str> {
        match self {
            Self::Config { option, .. } => Some(option),
            _ => None,
        }
    }

    /// Recover a `ContextError` raised inside a builder, or wrap the foreign
    /// error as a build failure of `component`.
    pub(crate) fn from_builder(component: &str, error: anyhow::Error) -> Self {
        match error.downcast::<ContextError>() {
            Ok(error) => error,
            Err(other) => Self::build(component, format!("{other:#}")),
        }
    }
}
