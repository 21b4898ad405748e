//! # Channel Collaborators
//!
//! Everything a connection needs before a socket is opened. The
//! [`ChannelFactory`] combines the codec, protocol versions, coalescer, TLS
//! and auth collaborators into the [`ChannelSettings`] for one endpoint; the
//! [`ControlConnection`] picks which node to open its channel to.
//!
//! ```text
//! TransportOptions ─┐
//! FrameCodec ───────┤
//! VersionRegistry ──┼──► ChannelFactory ──► ControlConnection
//! WriteCoalescer ───┤                         ▲
//! SslHandlerFactory ┤      ReconnectionPolicy ┘ LoadBalancingPolicyWrapper
//! AuthProvider ─────┘
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::{DriverConfig, DriverOption};
use crate::error::ContextError;
use crate::metadata::{LoadBalancingPolicyWrapper, NodeDescriptor};
use crate::policies::{AuthProvider, ReconnectionPolicy, SslEngineFactory};
use crate::protocol::{FrameCodec, ProtocolVersion, ProtocolVersionRegistry};

/// Empty flush runs before the coalescer parks its writer.
pub const DEFAULT_MAX_RUNS_WITH_NO_WORK: u32 = 5;

/// Socket-level options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    pub connect_timeout: Duration,
    pub tcp_no_delay: bool,
    pub max_frame_length: usize,
}

impl TransportOptions {
    /// Reads `connection.connect-timeout`, `connection.tcp-no-delay` and
    /// `protocol.max-frame-length`.
    pub fn from_config(config: &DriverConfig) -> Result<Self, ContextError> {
        let option = DriverOption::ProtocolMaxFrameLength;
        let max_frame_length = config.get_int(option)?;
        let max_frame_length = usize::try_from(max_frame_length)
            .ok()
            .filter(|length| *length > 0)
            .ok_or_else(|| {
                ContextError::invalid_option(
                    option.path(),
                    format!("must be a positive byte count, got {max_frame_length}"),
                )
            })?;

        Ok(Self {
            connect_timeout: config.get_duration(DriverOption::ConnectionConnectTimeout)?,
            tcp_no_delay: config.get_bool(DriverOption::ConnectionTcpNoDelay)?,
            max_frame_length,
        })
    }
}

/// Batches writes on a channel; after `max_runs_with_no_work` empty flush
/// runs the writer parks until new work arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteCoalescer {
    max_runs_with_no_work: u32,
}

impl WriteCoalescer {
    pub fn new(max_runs_with_no_work: u32) -> Self {
        Self {
            max_runs_with_no_work,
        }
    }

    #[must_use]
    pub fn max_runs_with_no_work(&self) -> u32 {
        self.max_runs_with_no_work
    }

    /// Whether a writer that found nothing to flush `empty_runs` times in a row
    /// should park.
    #[must_use]
    pub fn should_park(&self, empty_runs: u32) -> bool {
        empty_runs >= self.max_runs_with_no_work
    }
}

impl Default for WriteCoalescer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RUNS_WITH_NO_WORK)
    }
}

/// TLS parameters for one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SslTarget {
    pub peer: SocketAddr,
    pub server_name: Option<String>,
    pub hostname_validation: bool,
}

/// Turns the configured [`SslEngineFactory`] into per-peer TLS parameters.
pub struct SslHandlerFactory {
    engine_factory: Arc<dyn SslEngineFactory>,
}

impl SslHandlerFactory {
    pub fn new(engine_factory: Arc<dyn SslEngineFactory>) -> Self {
        Self { engine_factory }
    }

    #[must_use]
    pub fn target(&self, peer: SocketAddr) -> SslTarget {
        SslTarget {
            peer,
            server_name: self.engine_factory.server_name(peer),
            hostname_validation: self.engine_factory.hostname_validation(),
        }
    }
}

/// Resolved parameters for opening one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelSettings {
    pub address: SocketAddr,
    pub protocol_version: ProtocolVersion,
    pub compression: Option<String>,
    pub ssl: Option<SslTarget>,
    pub auth_mechanism: Option<String>,
    pub connect_timeout: Duration,
    pub tcp_no_delay: bool,
    pub max_frame_length: usize,
}

/// Opens channels to cluster nodes.
pub struct ChannelFactory {
    frame_codec: Arc<FrameCodec>,
    protocol_versions: Arc<ProtocolVersionRegistry>,
    write_coalescer: Arc<WriteCoalescer>,
    ssl_handler_factory: Option<Arc<SslHandlerFactory>>,
    auth_provider: Option<Arc<dyn AuthProvider>>,
    transport: Arc<TransportOptions>,
}

impl ChannelFactory {
    pub fn new(
        frame_codec: Arc<FrameCodec>,
        protocol_versions: Arc<ProtocolVersionRegistry>,
        write_coalescer: Arc<WriteCoalescer>,
        ssl_handler_factory: Option<Arc<SslHandlerFactory>>,
        auth_provider: Option<Arc<dyn AuthProvider>>,
        transport: Arc<TransportOptions>,
    ) -> Self {
        Self {
            frame_codec,
            protocol_versions,
            write_coalescer,
            ssl_handler_factory,
            auth_provider,
            transport,
        }
    }

    /// Settings for a channel to `address` at the initial protocol version.
    #[must_use]
    pub fn settings_for(&self, address: SocketAddr) -> ChannelSettings {
        self.settings_at(address, self.protocol_versions.initial_version())
    }

    /// Settings for a channel to `address` at an explicit version, used after
    /// a downgrade.
    #[must_use]
    pub fn settings_at(&self, address: SocketAddr, version: ProtocolVersion) -> ChannelSettings {
        ChannelSettings {
            address,
            protocol_version: version,
            compression: self.frame_codec.compressor().algorithm().map(String::from),
            ssl: self
                .ssl_handler_factory
                .as_ref()
                .map(|factory| factory.target(address)),
            auth_mechanism: self
                .auth_provider
                .as_ref()
                .map(|provider| provider.mechanism().to_string()),
            connect_timeout: self.transport.connect_timeout,
            tcp_no_delay: self.transport.tcp_no_delay,
            max_frame_length: self.frame_codec.max_frame_length(),
        }
    }

    #[must_use]
    pub fn protocol_versions(&self) -> &ProtocolVersionRegistry {
        &self.protocol_versions
    }

    #[must_use]
    pub fn write_coalescer(&self) -> &WriteCoalescer {
        &self.write_coalescer
    }
}

impl fmt::Debug for ChannelFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelFactory")
            .field("frame_codec", &self.frame_codec)
            .field("protocol_versions", &self.protocol_versions)
            .field("ssl", &self.ssl_handler_factory.is_some())
            .field("auth", &self.auth_provider.is_some())
            .field("transport", &self.transport)
            .finish()
    }
}

/// The dedicated channel used for cluster metadata and events.
pub struct ControlConnection {
    channel_factory: Arc<ChannelFactory>,
    reconnection_policy: Arc<dyn ReconnectionPolicy>,
    load_balancing: Arc<LoadBalancingPolicyWrapper>,
}

impl ControlConnection {
    pub fn new(
        channel_factory: Arc<ChannelFactory>,
        reconnection_policy: Arc<dyn ReconnectionPolicy>,
        load_balancing: Arc<LoadBalancingPolicyWrapper>,
    ) -> Self {
        Self {
            channel_factory,
            reconnection_policy,
            load_balancing,
        }
    }

    /// Nodes to try, in order, when (re)opening the control channel.
    #[must_use]
    pub fn candidates(&self) -> Vec<Arc<NodeDescriptor>> {
        self.load_balancing.new_query_plan()
    }

    /// Settings for the first candidate, if there is one.
    #[must_use]
    pub fn next_channel(&self) -> Option<ChannelSettings> {
        self.candidates()
            .first()
            .map(|node| self.channel_factory.settings_for(node.connect_address()))
    }

    #[must_use]
    pub fn reconnection_delay(&self, attempt: u32) -> Duration {
        self.reconnection_policy.next_delay(attempt)
    }

    #[must_use]
    pub fn channel_factory(&self) -> &Arc<ChannelFactory> {
        &self.channel_factory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::NoCompression;

    struct FixedSni;

    impl SslEngineFactory for FixedSni {
        fn server_name(&self, _peer: SocketAddr) -> Option<String> {
            Some("db.internal".to_string())
        }
    }

    fn factory(ssl: Option<Arc<SslHandlerFactory>>) -> ChannelFactory {
        let transport = Arc::new(TransportOptions::from_config(&DriverConfig::default()).unwrap());
        ChannelFactory::new(
            Arc::new(FrameCodec::new(Arc::new(NoCompression), transport.max_frame_length)),
            Arc::new(ProtocolVersionRegistry::new(None)),
            Arc::new(WriteCoalescer::default()),
            ssl,
            None,
            transport,
        )
    }

    #[test]
    fn test_transport_rejects_non_positive_frame_length() {
        let config = DriverConfig::default().with(DriverOption::ProtocolMaxFrameLength, 0_i64);
        let error = TransportOptions::from_config(&config).unwrap_err();
        assert_eq!(error.option(), Some("protocol.max-frame-length"));
    }

    #[test]
    fn test_write_coalescer_parks_after_five_empty_runs() {
        let coalescer = WriteCoalescer::default();
        assert!(!coalescer.should_park(4));
        assert!(coalescer.should_park(5));
    }

    #[test]
    fn test_settings_without_ssl_or_auth() {
        let address = "10.0.0.1:9042".parse().unwrap();
        let settings = factory(None).settings_for(address);

        assert_eq!(settings.address, address);
        assert_eq!(settings.protocol_version, ProtocolVersion::V4);
        assert_eq!(settings.compression, None);
        assert_eq!(settings.ssl, None);
        assert_eq!(settings.auth_mechanism, None);
        assert!(settings.tcp_no_delay);
    }

    #[test]
    fn test_settings_carry_ssl_target() {
        let address = "10.0.0.1:9042".parse().unwrap();
        let ssl = Arc::new(SslHandlerFactory::new(Arc::new(FixedSni)));
        let settings = factory(Some(ssl)).settings_at(address, ProtocolVersion::V3);

        let target = settings.ssl.unwrap();
        assert_eq!(target.server_name.as_deref(), Some("db.internal"));
        assert!(target.hostname_validation);
        assert_eq!(settings.protocol_version, ProtocolVersion::V3);
    }
}
