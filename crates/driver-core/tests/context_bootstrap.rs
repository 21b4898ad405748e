//! # Context Bootstrap Tests
//!
//! Lazy construction, sharing, failure caching, builder substitution, strategy
//! resolution and teardown, exercised through the public `DriverContext` API.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use driver_core::metadata::{MetadataManager, NodeDescriptor, NodeDistance};
use driver_core::policies::{ConstantReconnectionPolicy, LoadBalancingPolicy, ReconnectionPolicy};
use driver_core::{CellStatus, ContextError, DriverConfig, DriverContext, DriverOption, StrategyFactories};

fn expect_err<T>(result: Result<T, ContextError>) -> ContextError {
    match result {
        Ok(_) => panic!("expected an error"),
        Err(error) => error,
    }
}

fn status_of(context: &DriverContext, component: &str) -> CellStatus {
    context
        .component_statuses()
        .into_iter()
        .find(|(name, _)| *name == component)
        .map(|(_, status)| status)
        .expect("unknown component")
}

/// Reverses whatever order it is given.
struct ReversePolicy;

impl LoadBalancingPolicy for ReversePolicy {
    fn distance(&self, _node: &NodeDescriptor) -> NodeDistance {
        NodeDistance::Remote
    }

    fn new_query_plan(&self, nodes: &[Arc<NodeDescriptor>]) -> Vec<Arc<NodeDescriptor>> {
        nodes.iter().rev().cloned().collect()
    }
}

#[test]
fn test_init_all_builds_every_component() {
    // Arrange
    let context = DriverContext::new(DriverConfig::default());

    // Act
    context.init_all().unwrap();

    // Assert
    for (name, status) in context.component_statuses() {
        assert_eq!(status, CellStatus::Built, "{name} not built");
    }
    context.close();
}

#[test]
fn test_accessing_one_component_builds_only_its_dependencies() {
    let context = DriverContext::new(DriverConfig::default());

    context.frame_codec().unwrap();

    assert_eq!(status_of(&context, "frame_codec"), CellStatus::Built);
    assert_eq!(status_of(&context, "compressor"), CellStatus::Built);
    assert_eq!(status_of(&context, "transport_options"), CellStatus::Built);
    assert_eq!(status_of(&context, "channel_factory"), CellStatus::Empty);
    assert_eq!(status_of(&context, "metadata_manager"), CellStatus::Empty);
}

#[test]
fn test_dependency_is_built_from_the_shared_instance() {
    let context = DriverContext::new(DriverConfig::default());

    // A -> B: the control connection is built from the registry's channel factory
    let control = context.control_connection().unwrap();
    let factory = context.channel_factory().unwrap();

    assert!(Arc::ptr_eq(control.channel_factory(), &factory));
    context.close();
}

#[test]
fn test_concurrent_first_access_builds_once() {
    // Arrange
    let context = DriverContext::new(DriverConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    assert!(context.set_reconnection_policy_builder(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(25));
        let policy: Arc<dyn ReconnectionPolicy> =
            Arc::new(ConstantReconnectionPolicy::new(Duration::from_millis(10)));
        Ok(policy)
    }));

    // Act
    let barrier = Arc::new(Barrier::new(16));
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let context = Arc::clone(&context);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                context.reconnection_policy().ok().expect("build failed")
            })
        })
        .collect();
    let policies: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    // Assert
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(policies.iter().all(|p| Arc::ptr_eq(p, &policies[0])));
}

#[test]
fn test_missing_option_failure_is_cached() {
    // Arrange
    let context = DriverContext::new(DriverConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    context.set_reconnection_policy_builder(move |ctx| {
        counter.fetch_add(1, Ordering::SeqCst);
        let delay = ctx.config().get_duration("x")?;
        let policy: Arc<dyn ReconnectionPolicy> = Arc::new(ConstantReconnectionPolicy::new(delay));
        Ok(policy)
    });

    // Act
    let first = expect_err(context.reconnection_policy());
    let remote = Arc::clone(&context);
    let from_thread = thread::spawn(move || expect_err(remote.reconnection_policy()))
        .join()
        .unwrap();
    let again = expect_err(context.reconnection_policy());

    // Assert
    assert_eq!(first.option(), Some("x"));
    assert_eq!(from_thread, first);
    assert_eq!(again, first);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(status_of(&context, "reconnection_policy"), CellStatus::Failed);
}

#[test]
fn test_failure_propagates_unchanged_to_dependents() {
    let config = {
        let mut config = DriverConfig::default();
        config.remove(DriverOption::ReconnectionPolicyClass);
        config
    };
    let context = DriverContext::new(config);

    let error = expect_err(context.control_connection());

    assert_eq!(
        error,
        ContextError::missing_option("connection.reconnection-policy.class")
    );
    assert_eq!(expect_err(context.topology_monitor()), error);
    context.close();
}

#[test]
fn test_invalid_option_value_is_reported() {
    let config = DriverConfig::default().with(DriverOption::ConnectionTcpNoDelay, "sometimes");
    let context = DriverContext::new(config);

    let error = expect_err(context.transport_options());

    assert_eq!(error.option(), Some("connection.tcp-no-delay"));
    assert!(error.to_string().contains("expected a boolean"));
}

#[test]
fn test_builder_substitution_before_first_access() {
    let context = DriverContext::new(DriverConfig::default());

    let installed = context.set_load_balancing_policy_builder(|_| {
        let policy: Arc<dyn LoadBalancingPolicy> = Arc::new(ReversePolicy);
        Ok(policy)
    });

    assert!(installed);
    let policy = context.load_balancing_policy().ok().unwrap();
    let nodes: Vec<Arc<NodeDescriptor>> = Vec::new();
    assert!(policy.new_query_plan(&nodes).is_empty());
    let wrapper = context.load_balancing_policy_wrapper().unwrap();
    assert!(Arc::ptr_eq(wrapper.policy(), &policy));
    context.close();
}

#[test]
fn test_builder_substitution_after_first_access_has_no_effect() {
    let context = DriverContext::new(DriverConfig::default());
    let original = context.load_balancing_policy().ok().unwrap();

    let installed = context.set_load_balancing_policy_builder(|_| {
        let policy: Arc<dyn LoadBalancingPolicy> = Arc::new(ReversePolicy);
        Ok(policy)
    });

    assert!(!installed);
    let current = context.load_balancing_policy().ok().unwrap();
    assert!(Arc::ptr_eq(&original, &current));
}

#[test]
fn test_substituted_builder_can_wrap_the_default() {
    let context = DriverContext::new(DriverConfig::default());
    context.set_write_coalescer_builder(|ctx| {
        let default = driver_core::context::builders::write_coalescer(ctx)?;
        assert_eq!(default.max_runs_with_no_work(), 5);
        Ok(Arc::new(driver_core::channel::WriteCoalescer::new(1)))
    });

    assert_eq!(context.write_coalescer().unwrap().max_runs_with_no_work(), 1);
}

#[test]
fn test_unknown_strategy_lists_registered_identifiers() {
    let config = DriverConfig::default().with(DriverOption::LoadBalancingPolicyClass, "dc-aware");
    let context = DriverContext::new(config);

    let error = expect_err(context.load_balancing_policy());

    match &error {
        ContextError::Config { option, reason } => {
            assert_eq!(option, "load-balancing-policy.class");
            assert!(reason.contains("dc-aware"));
            assert!(reason.contains("registered: default"));
        }
        other => panic!("expected a configuration error, got {other:?}"),
    }
}

#[test]
fn test_registered_strategy_is_selected_by_configuration() {
    let mut strategies = StrategyFactories::default();
    strategies.load_balancing.register("reverse", |_| {
        let policy: Arc<dyn LoadBalancingPolicy> = Arc::new(ReversePolicy);
        Ok(policy)
    });
    let config = DriverConfig::default().with(DriverOption::LoadBalancingPolicyClass, "reverse");
    let context = DriverContext::with_strategies(config, strategies);

    let manager = context.metadata_manager().unwrap();
    let a: SocketAddr = "10.0.0.1:9042".parse().unwrap();
    let b: SocketAddr = "10.0.0.2:9042".parse().unwrap();
    manager.add_contact_points(vec![a, b]).unwrap();
    let wrapper = context.load_balancing_policy_wrapper().unwrap();
    wrapper.init().unwrap();

    let plan: Vec<_> = wrapper
        .new_query_plan()
        .iter()
        .map(|node| node.connect_address())
        .collect();
    assert_eq!(plan, vec![b, a]);
    assert_eq!(manager.node(a).unwrap().distance(), NodeDistance::Remote);
    context.close();
}

#[test]
fn test_plain_text_auth_requires_credentials() {
    let config = DriverConfig::default().with(DriverOption::AuthProviderClass, "plain-text");
    let context = DriverContext::new(config);

    let error = expect_err(context.channel_factory());

    assert_eq!(error.option(), Some("protocol.auth-provider.username"));
}

#[test]
fn test_close_rejects_further_access() {
    // Arrange
    let context = DriverContext::new(DriverConfig::default());
    let manager = context.metadata_manager().unwrap();
    assert!(manager.coordinator().is_running());

    // Act
    context.close();

    // Assert
    assert!(!manager.coordinator().is_running());
    assert_eq!(expect_err(context.metadata_manager()), ContextError::Closed);
    assert_eq!(expect_err(context.event_bus()), ContextError::Closed);
    assert_eq!(
        manager.add_contact_points(vec!["10.0.0.1:9042".parse().unwrap()]).err(),
        Some(ContextError::Closed)
    );
}

#[test]
fn test_close_stops_a_manager_that_was_still_building() {
    // Arrange: the manager build is paused inside its builder
    let context = DriverContext::new(DriverConfig::default());
    let building = Arc::new(Barrier::new(2));
    let barrier = Arc::clone(&building);
    assert!(context.set_metadata_manager_builder(move |ctx| {
        let event_bus = ctx.event_bus()?;
        let metrics_factory = ctx.metrics_factory()?;
        barrier.wait();
        thread::sleep(Duration::from_millis(50));
        Ok(Arc::new(MetadataManager::new(event_bus, metrics_factory)?))
    }));

    let remote = Arc::clone(&context);
    let builder_thread = thread::spawn(move || remote.metadata_manager().ok());
    building.wait();

    // Act
    context.close();

    // Assert
    let manager = builder_thread
        .join()
        .unwrap()
        .expect("build started before close");
    assert!(!manager.coordinator().is_running());
    assert_eq!(expect_err(context.metadata_manager()), ContextError::Closed);
}
