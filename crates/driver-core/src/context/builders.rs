//! Default component builders.
//!
//! One function per component, installed in the context's cells at
//! construction. A custom builder installed with `set_<component>_builder` can
//! call these to wrap or decorate the default.

use std::sync::Arc;

use crate::channel::{
    ChannelFactory, ControlConnection, SslHandlerFactory, TransportOptions, WriteCoalescer,
    DEFAULT_MAX_RUNS_WITH_NO_WORK,
};
use crate::config::DriverOption;
use crate::context::DriverContext;
use crate::error::ContextError;
use crate::events::{EventBus, DEFAULT_EVENT_CAPACITY};
use crate::metadata::{LoadBalancingPolicyWrapper, MetadataManager, TopologyMonitor};
use crate::metrics::{MetricsFactory, NoopMetricsFactory};
use crate::policies::{
    AddressTranslator, AuthProvider, LoadBalancingPolicy, ReconnectionPolicy, SslEngineFactory,
};
use crate::protocol::{Compressor, FrameCodec, NoCompression, ProtocolVersionRegistry};

pub fn load_balancing_policy(ctx: &DriverContext) -> anyhow::Result<Arc<dyn LoadBalancingPolicy>> {
    ctx.strategies()
        .load_balancing
        .build_required(ctx, DriverOption::LoadBalancingPolicyClass)
}

pub fn reconnection_policy(ctx: &DriverContext) -> anyhow::Result<Arc<dyn ReconnectionPolicy>> {
    ctx.strategies()
        .reconnection
        .build_required(ctx, DriverOption::ReconnectionPolicyClass)
}

pub fn address_translator(ctx: &DriverContext) -> anyhow::Result<Arc<dyn AddressTranslator>> {
    ctx.strategies()
        .address_translation
        .build_required(ctx, DriverOption::AddressTranslatorClass)
}

pub fn auth_provider(ctx: &DriverContext) -> anyhow::Result<Option<Arc<dyn AuthProvider>>> {
    ctx.strategies()
        .auth
        .build_optional(ctx, DriverOption::AuthProviderClass)
}

pub fn ssl_engine_factory(
    ctx: &DriverContext,
) -> anyhow::Result<Option<Arc<dyn SslEngineFactory>>> {
    ctx.strategies()
        .ssl
        .build_optional(ctx, DriverOption::SslEngineFactoryClass)
}

pub fn event_bus(_: &DriverContext) -> anyhow::Result<Arc<EventBus>> {
    Ok(Arc::new(EventBus::new(DEFAULT_EVENT_CAPACITY)))
}

/// Falls back to no compression when `protocol.compression` is unset.
pub fn compressor(ctx: &DriverContext) -> anyhow::Result<Arc<dyn Compressor>> {
    let compressor = ctx
        .strategies()
        .compression
        .build_optional(ctx, DriverOption::ProtocolCompression)?;
    match compressor {
        Some(compressor) => Ok(compressor),
        None => Ok(Arc::new(NoCompression)),
    }
}

pub fn frame_codec(ctx: &DriverContext) -> anyhow::Result<Arc<FrameCodec>> {
    let transport = ctx.transport_options()?;
    Ok(Arc::new(FrameCodec::new(
        ctx.compressor()?,
        transport.max_frame_length,
    )))
}

pub fn protocol_version_registry(
    ctx: &DriverContext,
) -> anyhow::Result<Arc<ProtocolVersionRegistry>> {
    Ok(Arc::new(ProtocolVersionRegistry::from_config(ctx.config())?))
}

pub fn transport_options(ctx: &DriverContext) -> anyhow::Result<Arc<TransportOptions>> {
    Ok(Arc::new(TransportOptions::from_config(ctx.config())?))
}

pub fn write_coalescer(_: &DriverContext) -> anyhow::Result<Arc<WriteCoalescer>> {
    Ok(Arc::new(WriteCoalescer::new(DEFAULT_MAX_RUNS_WITH_NO_WORK)))
}

/// `None` unless an SSL engine factory is configured.
pub fn ssl_handler_factory(
    ctx: &DriverContext,
) -> anyhow::Result<Option<Arc<SslHandlerFactory>>> {
    Ok(ctx
        .ssl_engine_factory()?
        .map(|engines| Arc::new(SslHandlerFactory::new(engines))))
}

pub fn channel_factory(ctx: &DriverContext) -> anyhow::Result<Arc<ChannelFactory>> {
    Ok(Arc::new(ChannelFactory::new(
        ctx.frame_codec()?,
        ctx.protocol_version_registry()?,
        ctx.write_coalescer()?,
        ctx.ssl_handler_factory()?,
        ctx.auth_provider()?,
        ctx.transport_options()?,
    )))
}

pub fn metrics_factory(_: &DriverContext) -> anyhow::Result<Arc<dyn MetricsFactory>> {
    Ok(Arc::new(NoopMetricsFactory::default()))
}

/// Starts the coordination thread. If the context was closed while the
/// manager was being built, the thread is stopped again right away.
pub fn metadata_manager(ctx: &DriverContext) -> anyhow::Result<Arc<MetadataManager>> {
    let manager = MetadataManager::new(ctx.event_bus()?, ctx.metrics_factory()?)?;
    if ctx.is_closed() {
        manager.close();
        return Err(ContextError::Closed.into());
    }
    Ok(Arc::new(manager))
}

pub fn load_balancing_policy_wrapper(
    ctx: &DriverContext,
) -> anyhow::Result<Arc<LoadBalancingPolicyWrapper>> {
    Ok(Arc::new(LoadBalancingPolicyWrapper::new(
        ctx.load_balancing_policy()?,
        ctx.metadata_manager()?,
    )))
}

pub fn control_connection(ctx: &DriverContext) -> anyhow::Result<Arc<ControlConnection>> {
    Ok(Arc::new(ControlConnection::new(
        ctx.channel_factory()?,
        ctx.reconnection_policy()?,
        ctx.load_balancing_policy_wrapper()?,
    )))
}

pub fn topology_monitor(ctx: &DriverContext) -> anyhow::Result<Arc<TopologyMonitor>> {
    Ok(Arc::new(TopologyMonitor::new(
        ctx.control_connection()?,
        ctx.address_translator()?,
        ctx.metadata_manager()?,
        ctx.load_balancing_policy_wrapper()?,
    )))
}
