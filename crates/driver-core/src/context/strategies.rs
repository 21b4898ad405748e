//! # Strategy Factories
//!
//! Maps configuration identifiers (the value of a `*.class` option) to
//! constructors. Deployments register their own strategies before creating the
//! context:
//!
//! ```ignore
//! let mut strategies = StrategyFactories::default();
//! strategies.load_balancing.register("dc-aware", |ctx| {
//!     let policy: Arc<dyn LoadBalancingPolicy> = Arc::new(DcAware::from_config(ctx.config())?);
//!     Ok(policy)
//! });
//! let context = DriverContext::with_strategies(config, strategies);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::config::DriverOption;
use crate::context::DriverContext;
use crate::error::ContextError;
use crate::policies::{
    AddressTranslator, AuthProvider, ConstantReconnectionPolicy, DefaultLoadBalancingPolicy,
    LoadBalancingPolicy, PassThroughAddressTranslator, PlainTextAuthProvider, ReconnectionPolicy,
    SslEngineFactory,
};
use crate::protocol::{Compressor, NoCompression};

/// Constructor registered under an identifier.
pub type StrategyFactory<T> = Arc<dyn Fn(&DriverContext) -> anyhow::Result<Arc<T>> + Send + Sync>;

/// Identifier -> constructor table for one strategy kind.
pub struct FactoryMap<T: ?Sized> {
    kind: &'static str,
    entries: BTreeMap<String, StrategyFactory<T>>,
}

impl<T: ?Sized> FactoryMap<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
        }
    }

    /// Register (or replace) the constructor for `id`.
    pub fn register<F>(&mut self, id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&DriverContext) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        self.entries.insert(id.into(), Arc::new(factory));
        self
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Registered identifiers, sorted.
    #[must_use]
    pub fn identifiers(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Build the strategy named by `option`, or `None` if the option is unset.
    pub fn build_optional(
        &self,
        context: &DriverContext,
        option: DriverOption,
    ) -> anyhow::Result<Option<Arc<T>>> {
        let Some(id) = context.config().get_optional_string(option)? else {
            return Ok(None);
        };

        let factory = self.entries.get(id).ok_or_else(|| {
            ContextError::invalid_option(
                option.path(),
                format!(
                    "unknown {} '{}' (registered: {})",
                    self.kind,
                    id,
                    self.identifiers().join(", ")
                ),
            )
        })?;

        factory(context).map(Some)
    }

    /// Build the strategy named by `option`, which must be set.
    pub fn build_required(
        &self,
        context: &DriverContext,
        option: DriverOption,
    ) -> anyhow::Result<Arc<T>> {
        match self.build_optional(context, option)? {
            Some(strategy) => Ok(strategy),
            None => Err(ContextError::missing_option(option.path()).into()),
        }
    }
}

impl<T: ?Sized> fmt::Debug for FactoryMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryMap")
            .field("kind", &self.kind)
            .field("identifiers", &self.identifiers())
            .finish()
    }
}

/// Every strategy table the built-in builders consult.
#[derive(Debug)]
pub struct StrategyFactories {
    pub load_balancing: FactoryMap<dyn LoadBalancingPolicy>,
    pub reconnection: FactoryMap<dyn ReconnectionPolicy>,
    pub address_translation: FactoryMap<dyn AddressTranslator>,
    pub auth: FactoryMap<dyn AuthProvider>,
    pub ssl: FactoryMap<dyn SslEngineFactory>,
    pub compression: FactoryMap<dyn Compressor>,
}

impl StrategyFactories {
    /// Tables with nothing registered.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            load_balancing: FactoryMap::new("load balancing policy"),
            reconnection: FactoryMap::new("reconnection policy"),
            address_translation: FactoryMap::new("address translator"),
            auth: FactoryMap::new("auth provider"),
            ssl: FactoryMap::new("SSL engine factory"),
            compression: FactoryMap::new("compressor"),
        }
    }
}

impl Default for StrategyFactories {
    /// Tables holding the built-in strategies.
    fn default() -> Self {
        let mut strategies = Self::empty();
        strategies
            .load_balancing
            .register("default", default_load_balancing);
        strategies
            .reconnection
            .register("constant", constant_reconnection);
        strategies
            .address_translation
            .register("pass-through", pass_through_translator);
        strategies.auth.register("plain-text", plain_text_auth);
        strategies.compression.register("none", no_compression);
        strategies
    }
}

fn default_load_balancing(_: &DriverContext) -> anyhow::Result<Arc<dyn LoadBalancingPolicy>> {
    Ok(Arc::new(DefaultLoadBalancingPolicy))
}

fn constant_reconnection(context: &DriverContext) -> anyhow::Result<Arc<dyn ReconnectionPolicy>> {
    Ok(Arc::new(ConstantReconnectionPolicy::from_config(
        context.config(),
    )?))
}

fn pass_through_translator(_: &DriverContext) -> anyhow::Result<Arc<dyn AddressTranslator>> {
    Ok(Arc::new(PassThroughAddressTranslator))
}

fn plain_text_auth(context: &DriverContext) -> anyhow::Result<Arc<dyn AuthProvider>> {
    Ok(Arc::new(PlainTextAuthProvider::from_config(context.config())?))
}

fn no_compression(_: &DriverContext) -> anyhow::Result<Arc<dyn Compressor>> {
    Ok(Arc::new(NoCompression))
}
