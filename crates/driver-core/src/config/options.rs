//! Option identifiers and typed option values.

use std::fmt;
use std::time::Duration;

/// Options read by the built-in component builders.
///
/// Strategies registered by a deployment may read any other path; these are
/// only the ones the core knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverOption {
    /// Identifier of the load balancing policy factory.
    LoadBalancingPolicyClass,
    /// Identifier of the reconnection policy factory.
    ReconnectionPolicyClass,
    /// Delay between two reconnection attempts.
    ReconnectionBaseDelay,
    /// Identifier of the address translator factory.
    AddressTranslatorClass,
    /// Identifier of the auth provider factory (optional).
    AuthProviderClass,
    /// Username for the plain-text auth provider.
    AuthProviderUsername,
    /// Password for the plain-text auth provider.
    AuthProviderPassword,
    /// Identifier of the SSL engine factory (optional).
    SslEngineFactoryClass,
    /// Identifier of the frame compressor.
    ProtocolCompression,
    /// Pinned native protocol version (optional, e.g. `V4`).
    ProtocolVersion,
    /// Largest frame the codec accepts, in bytes.
    ProtocolMaxFrameLength,
    /// Socket connect timeout.
    ConnectionConnectTimeout,
    /// Disable Nagle's algorithm on driver sockets.
    ConnectionTcpNoDelay,
    /// Initial `host:port` addresses.
    ContactPoints,
}

/// Value shape expected for an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    String,
    Integer,
    Boolean,
    Duration,
    List,
}

impl DriverOption {
    /// Configuration path of the option.
    #[must_use]
    pub fn path(&self) -> &'static str {
        match self {
            Self::LoadBalancingPolicyClass => "load-balancing-policy.class",
            Self::ReconnectionPolicyClass => "connection.reconnection-policy.class",
            Self::ReconnectionBaseDelay => "connection.reconnection-policy.base-delay",
            Self::AddressTranslatorClass => "address-translator.class",
            Self::AuthProviderClass => "protocol.auth-provider.class",
            Self::AuthProviderUsername => "protocol.auth-provider.username",
            Self::AuthProviderPassword => "protocol.auth-provider.password",
            Self::SslEngineFactoryClass => "ssl-engine-factory.class",
            Self::ProtocolCompression => "protocol.compression",
            Self::ProtocolVersion => "protocol.version",
            Self::ProtocolMaxFrameLength => "protocol.max-frame-length",
            Self::ConnectionConnectTimeout => "connection.connect-timeout",
            Self::ConnectionTcpNoDelay => "connection.tcp-no-delay",
            Self::ContactPoints => "contact-points",
        }
    }

    #[must_use]
    pub fn kind(&self) -> OptionKind {
        match self {
            Self::ReconnectionBaseDelay | Self::ConnectionConnectTimeout => OptionKind::Duration,
            Self::ProtocolMaxFrameLength => OptionKind::Integer,
            Self::ConnectionTcpNoDelay => OptionKind::Boolean,
            Self::ContactPoints => OptionKind::List,
            _ => OptionKind::String,
        }
    }

    /// Environment variable overriding the option, e.g.
    /// `DRIVER_PROTOCOL_COMPRESSION`.
    #[must_use]
    pub fn env_key(&self) -> String {
        format!(
            "DRIVER_{}",
            self.path().to_uppercase().replace(['.', '-'], "_")
        )
    }

    #[must_use]
    pub fn all() -> Vec<DriverOption> {
        vec![
            Self::LoadBalancingPolicyClass,
            Self::ReconnectionPolicyClass,
            Self::ReconnectionBaseDelay,
            Self::AddressTranslatorClass,
            Self::AuthProviderClass,
            Self::AuthProviderUsername,
            Self::AuthProviderPassword,
            Self::SslEngineFactoryClass,
            Self::ProtocolCompression,
            Self::ProtocolVersion,
            Self::ProtocolMaxFrameLength,
            Self::ConnectionConnectTimeout,
            Self::ConnectionTcpNoDelay,
            Self::ContactPoints,
        ]
    }
}

impl AsRef<str> for DriverOption {
    fn as_ref(&self) -> &str {
        self.path()
    }
}

impl fmt::Display for DriverOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// A typed configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    String(String),
    Integer(i64),
    Boolean(bool),
    Duration(Duration),
    List(Vec<String>),
}

impl OptionValue {
    /// Parse a raw string (from the environment) into the expected shape.
    ///
    /// Returns `None` when the text does not fit `kind`.
    ///
    /// Durations accept `250ms`, `5s`, `2m` or a bare number of milliseconds.
    /// Lists are comma separated.
    pub fn parse(kind: OptionKind, raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match kind {
            OptionKind::String => Some(Self::String(raw.to_string())),
            OptionKind::Integer => raw.parse().ok().map(Self::Integer),
            OptionKind::Boolean => match raw.to_lowercase().as_str() {
                "1" | "true" | "yes" => Some(Self::Boolean(true)),
                "0" | "false" | "no" => Some(Self::Boolean(false)),
                _ => None,
            },
            OptionKind::Duration => parse_duration(raw).map(Self::Duration),
            OptionKind::List => Some(Self::List(
                raw.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(String::from)
                    .collect(),
            )),
        }
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "a string",
            Self::Integer(_) => "an integer",
            Self::Boolean(_) => "a boolean",
            Self::Duration(_) => "a duration",
            Self::List(_) => "a list",
        }
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<Duration> for OptionValue {
    fn from(value: Duration) -> Self {
        Self::Duration(value)
    }
}

impl From<Vec<String>> for OptionValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

fn parse_duration(raw: &str) -> Option<Duration> {
    if let Some(ms) = raw.strip_suffix("ms") {
        return ms.trim().parse().ok().map(Duration::from_millis);
    }
    if let Some(secs) = raw.strip_suffix('s') {
        return secs.trim().parse().ok().map(Duration::from_secs);
    }
    if let Some(mins) = raw.strip_suffix('m') {
        return mins
            .trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs);
    }
    raw.parse().ok().map(Duration::from_millis)
}
