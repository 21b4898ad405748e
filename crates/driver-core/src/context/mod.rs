//! # Driver Context
//!
//! The component registry: one lazily built, shared instance of every driver
//! component.
//!
//! ## Construction
//!
//! ```text
//!  ctx.topology_monitor()
//!    └─ builders::topology_monitor(ctx)
//!         ├─ ctx.control_connection()
//!         │    ├─ ctx.channel_factory()
//!         │    │    ├─ ctx.frame_codec() ─┬─ ctx.transport_options()
//!         │    │    │                     └─ ctx.compressor()
//!         │    │    └─ ...
//!         │    ├─ ctx.reconnection_policy()
//!         │    └─ ctx.load_balancing_policy_wrapper()
//!         │         ├─ ctx.load_balancing_policy()
//!         │         └─ ctx.metadata_manager() ─┬─ ctx.event_bus()
//!         │                                    └─ ctx.metrics_factory()
//!         ├─ ctx.address_translator()
//!         └─ ctx.metadata_manager()          (already built: cached)
//! ```
//!
//! Creating the context builds nothing. The first call to an accessor runs the
//! component's builder, which pulls its dependencies through the same
//! accessors. Every component is built at most once; a failure is cached and
//! returned to every later caller.
//!
//! ## Extension
//!
//! - Strategy selection: register constructors in [`StrategyFactories`] and
//!   name them in configuration.
//! - Builder substitution: `set_<component>_builder` replaces a default
//!   builder, as long as the component has not been accessed yet.
//!
//! ## Cycles
//!
//! With `detect_cycles` on, a builder that (directly or through other
//! threads) ends up waiting on itself fails with
//! [`ContextError::Cycle`](crate::ContextError::Cycle) instead of hanging.

pub mod builders;
pub mod strategies;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use tracing::{error, info, warn};

use crate::channel::{
    ChannelFactory, ControlConnection, SslHandlerFactory, TransportOptions, WriteCoalescer,
};
use crate::concurrent::{CellStatus, CycleDetector, LazyCell};
use crate::config::DriverConfig;
use crate::error::ContextError;
use crate::events::EventBus;
use crate::metadata::{LoadBalancingPolicyWrapper, MetadataManager, TopologyMonitor};
use crate::metrics::MetricsFactory;
use crate::policies::{
    AddressTranslator, AuthProvider, LoadBalancingPolicy, ReconnectionPolicy, SslEngineFactory,
};
use crate::protocol::{Compressor, FrameCodec, ProtocolVersionRegistry};

pub use strategies::{FactoryMap, StrategyFactories, StrategyFactory};

/// Declares the component cells, the accessor and the builder setter of every
/// component. The default builder of `name` is `builders::name`.
macro_rules! components {
    ($(
        $(#[$meta:meta])*
        $name:ident / $setter:ident : $ty:ty;
    )*) => {
        struct ComponentCells {
            $($name: LazyCell<$ty>,)*
        }

        impl ComponentCells {
            fn new(context: &Weak<DriverContext>, detector: &Arc<CycleDetector>) -> Self {
                Self {
                    $($name: LazyCell::new(
                        stringify!($name),
                        deferred(context, builders::$name),
                        Arc::clone(detector),
                    ),)*
                }
            }

            fn statuses(&self) -> Vec<(&'static str, CellStatus)> {
                vec![$((stringify!($name), self.$name.status()),)*]
            }
        }

        impl DriverContext {
            /// Every component name, in declaration order.
            pub const COMPONENTS: &'static [&'static str] = &[$(stringify!($name)),*];

            $(
                $(#[$meta])*
                pub fn $name(&self) -> Result<$ty, ContextError> {
                    self.ensure_open()?;
                    self.cells.$name.get()
                }

                #[doc = concat!(
                    "Replace the builder of [`", stringify!($name), "`](Self::",
                    stringify!($name), "). Only effective before its first access; ",
                    "returns whether the builder was installed."
                )]
                pub fn $setter<F>(&self, builder: F) -> bool
                where
                    F: FnOnce(&DriverContext) -> anyhow::Result<$ty> + Send + 'static,
                {
                    self.substitute(&self.cells.$name, builder)
                }
            )*

            fn build_all(&self) -> Result<(), ContextError> {
                $(self.$name()?;)*
                Ok(())
            }
        }
    };
}

components! {
    /// Policy deciding node distances and query plans
    /// (`load-balancing-policy.class`).
    load_balancing_policy / set_load_balancing_policy_builder: Arc<dyn LoadBalancingPolicy>;

    /// `connection.reconnection-policy.class`.
    reconnection_policy / set_reconnection_policy_builder: Arc<dyn ReconnectionPolicy>;

    /// `address-translator.class`.
    address_translator / set_address_translator_builder: Arc<dyn AddressTranslator>;

    /// `None` unless `protocol.auth-provider.class` is set.
    auth_provider / set_auth_provider_builder: Option<Arc<dyn AuthProvider>>;

    /// `None` unless `ssl-engine-factory.class` is set.
    ssl_engine_factory / set_ssl_engine_factory_builder: Option<Arc<dyn SslEngineFactory>>;

    event_bus / set_event_bus_builder: Arc<EventBus>;

    compressor / set_compressor_builder: Arc<dyn Compressor>;

    frame_codec / set_frame_codec_builder: Arc<FrameCodec>;

    protocol_version_registry / set_protocol_version_registry_builder: Arc<ProtocolVersionRegistry>;

    transport_options / set_transport_options_builder: Arc<TransportOptions>;

    write_coalescer / set_write_coalescer_builder: Arc<WriteCoalescer>;

    ssl_handler_factory / set_ssl_handler_factory_builder: Option<Arc<SslHandlerFactory>>;

    channel_factory / set_channel_factory_builder: Arc<ChannelFactory>;

    metrics_factory / set_metrics_factory_builder: Arc<dyn MetricsFactory>;

    /// Node membership. Building it starts the `driver-admin` thread.
    metadata_manager / set_metadata_manager_builder: Arc<MetadataManager>;

    load_balancing_policy_wrapper / set_load_balancing_policy_wrapper_builder: Arc<LoadBalancingPolicyWrapper>;

    control_connection / set_control_connection_builder: Arc<ControlConnection>;

    topology_monitor / set_topology_monitor_builder: Arc<TopologyMonitor>;
}

/// Registry of every driver component for one driver instance.
pub struct DriverContext {
    config: DriverConfig,
    strategies: StrategyFactories,
    cycle_detector: Arc<CycleDetector>,
    cells: ComponentCells,
    closed: AtomicBool,
    self_ref: Weak<DriverContext>,
}

impl DriverContext {
    /// Context with the built-in strategies. Builds nothing yet.
    pub fn new(config: DriverConfig) -> Arc<Self> {
        Self::with_strategies(config, StrategyFactories::default())
    }

    /// Context resolving `*.class` options against `strategies`.
    pub fn with_strategies(config: DriverConfig, strategies: StrategyFactories) -> Arc<Self> {
        let cycle_detector = Arc::new(CycleDetector::new(config.detect_cycles));
        info!(
            "[Context] Created ({} components, cycle detection {})",
            Self::COMPONENTS.len(),
            if cycle_detector.is_enabled() { "on" } else { "off" }
        );

        Arc::new_cyclic(|self_ref| Self {
            cells: ComponentCells::new(self_ref, &cycle_detector),
            cycle_detector,
            config,
            strategies,
            closed: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    #[must_use]
    pub fn strategies(&self) -> &StrategyFactories {
        &self.strategies
    }

    #[must_use]
    pub fn cycle_detector(&self) -> &CycleDetector {
        &self.cycle_detector
    }

    /// Build every component now, stopping at the first failure.
    pub fn init_all(&self) -> Result<(), ContextError> {
        let started = Instant::now();
        info!("[Context] Initializing all components");

        if let Err(e) = self.build_all() {
            error!("[Context] Initialization failed: {}", e);
            return Err(e);
        }

        info!("[Context] All components ready in {:?}", started.elapsed());
        Ok(())
    }

    /// Every component with the state of its cell.
    #[must_use]
    pub fn component_statuses(&self) -> Vec<(&'static str, CellStatus)> {
        self.cells.statuses()
    }

    pub fn print_status(&self) {
        info!("===========================================");
        info!("  DRIVER CONTEXT STATUS");
        info!("===========================================");

        for (name, status) in self.component_statuses() {
            let icon = match status {
                CellStatus::Built => "✅",
                CellStatus::Failed => "❌",
                CellStatus::Building => "⏳",
                CellStatus::Empty => "⏸️ ",
            };
            info!("  {} {:32} {:?}", icon, name, status);
        }

        info!("===========================================");
    }

    /// Tear the context down. Accessors fail with [`ContextError::Closed`]
    /// afterwards. Idempotent.
    ///
    /// Blocks until an in-flight metadata manager build finishes, so it must
    /// not be called from inside a component builder.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("[Context] Closing");

        // A manager still being built is waited for; cells never go back to
        // Empty, so this never starts a build.
        let cell = &self.cells.metadata_manager;
        if cell.status() != CellStatus::Empty {
            if let Ok(manager) = cell.get() {
                manager.close();
            }
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), ContextError> {
        if self.is_closed() {
            Err(ContextError::Closed)
        } else {
            Ok(())
        }
    }

    fn substitute<T, F>(&self, cell: &LazyCell<T>, builder: F) -> bool
    where
        T: Clone + 'static,
        F: FnOnce(&DriverContext) -> anyhow::Result<T> + Send + 'static,
    {
        let installed = cell.replace_builder(deferred(&self.self_ref, builder));
        if installed {
            info!("[Context] Custom builder installed for {}", cell.name());
        } else {
            warn!(
                "[Context] Ignoring custom builder for {}: already {:?}",
                cell.name(),
                cell.status()
            );
        }
        installed
    }
}

impl fmt::Debug for DriverContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverContext")
            .field("closed", &self.is_closed())
            .field("detect_cycles", &self.cycle_detector.is_enabled())
            .field("components", &self.component_statuses())
            .finish()
    }
}

/// Adapt a context builder to the zero-argument form a cell stores.
///
/// The closure holds a `Weak` so the context does not own itself.
fn deferred<T, F>(
    context: &Weak<DriverContext>,
    build: F,
) -> impl FnOnce() -> anyhow::Result<T> + Send + 'static
where
    T: 'static,
    F: FnOnce(&DriverContext) -> anyhow::Result<T> + Send + 'static,
{
    let context = context.clone();
    move || {
        let context = context.upgrade().ok_or(ContextError::Closed)?;
        build(&context)
    }
}
