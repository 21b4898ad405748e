//! # Protocol Collaborators
//!
//! Frame compression, the frame codec settings and native protocol version
//! negotiation state. Encoding frame bytes is done by the I/O layer; these
//! types only carry what it needs.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use crate::config::{DriverConfig, DriverOption};
use crate::error::{ContextError, ParseError};

/// Frame body compression.
pub trait Compressor: Send + Sync {
    /// Algorithm name advertised in the STARTUP message, `None` when frames are
    /// sent uncompressed.
    fn algorithm(&self) -> Option<&str>;

    fn compress(&self, input: &[u8]) -> anyhow::Result<Vec<u8>>;

    fn decompress(&self, input: &[u8]) -> anyhow::Result<Vec<u8>>;
}

/// Identity compressor, registered as `none`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCompression;

impl Compressor for NoCompression {
    fn algorithm(&self) -> Option<&str> {
        None
    }

    fn compress(&self, input: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(input.to_vec())
    }

    fn decompress(&self, input: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(input.to_vec())
    }
}

/// Codec settings shared by every channel.
pub struct FrameCodec {
    compressor: Arc<dyn Compressor>,
    max_frame_length: usize,
}

impl FrameCodec {
    pub fn new(compressor: Arc<dyn Compressor>, max_frame_length: usize) -> Self {
        Self {
            compressor,
            max_frame_length,
        }
    }

    #[must_use]
    pub fn compressor(&self) -> &Arc<dyn Compressor> {
        &self.compressor
    }

    #[must_use]
    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    /// Reject a frame body larger than the configured limit.
    pub fn check_frame_length(&self, length: usize) -> anyhow::Result<()> {
        anyhow::ensure!(
            length <= self.max_frame_length,
            "frame of {} bytes exceeds the {} byte limit",
            length,
            self.max_frame_length
        );
        Ok(())
    }
}

impl fmt::Debug for FrameCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameCodec")
            .field("compression", &self.compressor.algorithm())
            .field("max_frame_length", &self.max_frame_length)
            .finish()
    }
}

/// Native protocol versions, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ProtocolVersion {
    V3,
    V4,
    V5,
}

impl ProtocolVersion {
    #[must_use]
    pub fn code(&self) -> u8 {
        match self {
            Self::V3 => 3,
            Self::V4 => 4,
            Self::V5 => 5,
        }
    }

    /// Beta versions are only used when pinned explicitly.
    #[must_use]
    pub fn is_beta(&self) -> bool {
        matches!(self, Self::V5)
    }

    #[must_use]
    pub fn all() -> [ProtocolVersion; 3] {
        [Self::V3, Self::V4, Self::V5]
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}", self.code())
    }
}

impl FromStr for ProtocolVersion {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|version| version.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                let known: Vec<String> = Self::all().iter().map(ToString::to_string).collect();
                ParseError::UnknownProtocolVersion {
                    raw: s.to_string(),
                    known: known.join(", "),
                }
            })
    }
}

/// Version negotiation state: an optional pin, otherwise start from the
/// highest non-beta version and downgrade on rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolVersionRegistry {
    pinned: Option<ProtocolVersion>,
}

impl ProtocolVersionRegistry {
    pub fn new(pinned: Option<ProtocolVersion>) -> Self {
        Self { pinned }
    }

    /// Reads the optional `protocol.version` pin.
    pub fn from_config(config: &DriverConfig) -> Result<Self, ContextError> {
        let option = DriverOption::ProtocolVersion;
        let pinned = match config.get_optional_string(option)? {
            None => None,
            Some(raw) => Some(
                raw.parse::<ProtocolVersion>()
                    .map_err(|e| ContextError::invalid_option(option.path(), e.to_string()))?,
            ),
        };
        Ok(Self::new(pinned))
    }

    #[must_use]
    pub fn pinned(&self) -> Option<ProtocolVersion> {
        self.pinned
    }

    #[must_use]
    pub fn highest_non_beta(&self) -> ProtocolVersion {
        ProtocolVersion::all()
            .into_iter()
            .filter(|version| !version.is_beta())
            .max()
            .unwrap_or(ProtocolVersion::V3)
    }

    /// Version used for the first connection attempt.
    #[must_use]
    pub fn initial_version(&self) -> ProtocolVersion {
        self.pinned.unwrap_or_else(|| self.highest_non_beta())
    }

    /// Next version to try after `rejected` was refused; `None` when pinned or
    /// nothing older exists.
    #[must_use]
    pub fn downgrade(&self, rejected: ProtocolVersion) -> Option<ProtocolVersion> {
        if self.pinned.is_some() {
            return None;
        }
        ProtocolVersion::all()
            .into_iter()
            .filter(|version| *version < rejected)
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_version_skips_beta() {
        let registry = ProtocolVersionRegistry::new(None);
        assert_eq!(registry.initial_version(), ProtocolVersion::V4);
        assert_eq!(registry.downgrade(ProtocolVersion::V4), Some(ProtocolVersion::V3));
        assert_eq!(registry.downgrade(ProtocolVersion::V3), None);
    }

    #[test]
    fn test_pinned_version_never_downgrades() {
        let config = DriverConfig::empty().with(DriverOption::ProtocolVersion, "v5");
        let registry = ProtocolVersionRegistry::from_config(&config).unwrap();

        assert_eq!(registry.initial_version(), ProtocolVersion::V5);
        assert_eq!(registry.downgrade(ProtocolVersion::V5), None);
    }

    #[test]
    fn test_unknown_version_names_the_option() {
        let config = DriverConfig::empty().with(DriverOption::ProtocolVersion, "V9");
        let error = ProtocolVersionRegistry::from_config(&config).unwrap_err();
        assert_eq!(error.option(), Some("protocol.version"));
        assert!(error.to_string().contains("known: V3, V4, V5"));
    }

    #[test]
    fn test_protocol_version_parsing() {
        assert_eq!(" v4 ".parse::<ProtocolVersion>(), Ok(ProtocolVersion::V4));
        assert_eq!(
            "V9".parse::<ProtocolVersion>(),
            Err(ParseError::UnknownProtocolVersion {
                raw: "V9".into(),
                known: "V3, V4, V5".into(),
            })
        );
    }

    #[test]
    fn test_frame_length_limit() {
        let codec = FrameCodec::new(Arc::new(NoCompression), 16);
        assert!(codec.check_frame_length(16).is_ok());
        assert!(codec.check_frame_length(17).is_err());
        assert_eq!(codec.compressor().algorithm(), None);
    }
}
