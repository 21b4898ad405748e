//! # Cycle Detection Tests
//!
//! Builders that end up requesting themselves must fail with a cycle error
//! naming the chain, in bounded time, on one thread or across two.

use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use driver_core::channel::ChannelFactory;
use driver_core::protocol::{Compressor, FrameCodec, NoCompression};
use driver_core::{CellStatus, ContextError, DriverConfig, DriverContext};

const DEADLINE: Duration = Duration::from_secs(10);

fn detecting_context() -> Arc<DriverContext> {
    // Builder and cycle logs show up with `cargo test -- --nocapture`
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("driver_core=debug"))
        .with_test_writer()
        .try_init();
    DriverContext::new(DriverConfig::default().with_cycle_detection(true))
}

fn chain_of(error: &ContextError) -> Vec<String> {
    match error {
        ContextError::Cycle { chain } => chain.clone(),
        other => panic!("expected a cycle, got {other:?}"),
    }
}

/// Run `f` on its own thread and fail the test if it does not return in time.
fn within_deadline<T, F>(f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx.recv_timeout(DEADLINE)
        .expect("construction did not finish: deadlock")
}

#[test]
fn test_two_component_cycle_fails_both_accessors() {
    // Arrange: frame_codec -> channel_factory -> frame_codec
    let context = detecting_context();
    context.set_frame_codec_builder(|ctx| {
        ctx.channel_factory()?;
        Ok(Arc::new(FrameCodec::new(Arc::new(NoCompression), 1024)))
    });

    // Act
    let errors = within_deadline({
        let context = Arc::clone(&context);
        move || {
            (
                context.frame_codec().err(),
                context.channel_factory().err(),
            )
        }
    });

    // Assert
    let (codec_error, factory_error) = errors;
    let codec_error = codec_error.expect("frame_codec should fail");
    let factory_error = factory_error.expect("channel_factory should fail");

    assert_eq!(
        chain_of(&codec_error),
        vec!["frame_codec", "channel_factory", "frame_codec"]
    );
    assert_eq!(factory_error, codec_error);
    assert!(codec_error
        .to_string()
        .starts_with("Detected cycle in context initialization"));
    assert!(context.cycle_detector().active_stack().is_empty());
}

#[test]
fn test_self_dependency_is_a_cycle() {
    let context = detecting_context();
    context.set_compressor_builder(|ctx| Ok(ctx.compressor()?));

    let error = within_deadline({
        let context = Arc::clone(&context);
        move || context.compressor().err()
    })
    .expect("compressor should fail");

    assert_eq!(chain_of(&error), vec!["compressor", "compressor"]);
}

#[test]
fn test_cycle_leaves_unrelated_components_usable() {
    let context = detecting_context();
    context.set_frame_codec_builder(|ctx| {
        ctx.channel_factory()?;
        Ok(Arc::new(FrameCodec::new(Arc::new(NoCompression), 1024)))
    });

    let _ = within_deadline({
        let context = Arc::clone(&context);
        move || context.channel_factory().err()
    });

    assert!(context.reconnection_policy().is_ok());
    assert!(context.transport_options().is_ok());
    let statuses = context.component_statuses();
    assert!(statuses.contains(&("frame_codec", CellStatus::Failed)));
    assert!(statuses.contains(&("channel_factory", CellStatus::Failed)));
}

#[test]
fn test_cross_thread_cycle_is_reported_instead_of_deadlocking() {
    // Arrange: thread 1 builds frame_codec and then wants channel_factory;
    // thread 2 builds channel_factory and then wants frame_codec. Both are
    // inside their builders before either asks for the other.
    let context = detecting_context();
    let both_building = Arc::new(Barrier::new(2));

    let barrier = Arc::clone(&both_building);
    context.set_frame_codec_builder(move |ctx| {
        barrier.wait();
        ctx.channel_factory()?;
        Ok(Arc::new(FrameCodec::new(Arc::new(NoCompression), 1024)))
    });

    let barrier = Arc::clone(&both_building);
    context.set_channel_factory_builder(move |ctx| {
        barrier.wait();
        let codec = ctx.frame_codec()?;
        Ok(Arc::new(ChannelFactory::new(
            codec,
            ctx.protocol_version_registry()?,
            ctx.write_coalescer()?,
            None,
            None,
            ctx.transport_options()?,
        )))
    });

    // Act
    let (codec_result, factory_result) = within_deadline({
        let context = Arc::clone(&context);
        move || {
            let first = Arc::clone(&context);
            let codec = thread::spawn(move || first.frame_codec().err());
            let second = Arc::clone(&context);
            let factory = thread::spawn(move || second.channel_factory().err());
            (codec.join().unwrap(), factory.join().unwrap())
        }
    });

    // Assert: both fail with the same cycle, whichever thread detected it
    let codec_error = codec_result.expect("frame_codec should fail");
    let factory_error = factory_result.expect("channel_factory should fail");
    assert_eq!(codec_error, factory_error);

    let chain = chain_of(&codec_error);
    assert!(chain.contains(&"frame_codec".to_string()));
    assert!(chain.contains(&"channel_factory".to_string()));
    assert_eq!(chain.first(), chain.last());
}

#[test]
fn test_waiting_on_another_threads_build_is_not_a_cycle() {
    // Arrange: thread 1 is inside the compressor builder when thread 2 asks
    // for the frame codec, which needs the compressor.
    let context = detecting_context();
    let compressor_building = Arc::new(Barrier::new(2));
    let barrier = Arc::clone(&compressor_building);
    context.set_compressor_builder(move |_| {
        barrier.wait();
        thread::sleep(Duration::from_millis(50));
        let compressor: Arc<dyn Compressor> = Arc::new(NoCompression);
        Ok(compressor)
    });

    // Act
    let (compressor, codec) = within_deadline({
        let context = Arc::clone(&context);
        move || {
            let first = Arc::clone(&context);
            let builder = thread::spawn(move || first.compressor().ok());
            compressor_building.wait();
            let codec = context.frame_codec().ok();
            (builder.join().unwrap(), codec)
        }
    });

    // Assert
    let compressor = compressor.expect("compressor should build");
    let codec = codec.expect("frame_codec should block, then build");
    assert!(Arc::ptr_eq(codec.compressor(), &compressor));
    assert!(context
        .component_statuses()
        .contains(&("frame_codec", CellStatus::Built)));
}

#[test]
fn test_acyclic_graph_builds_with_detection_enabled() {
    let context = detecting_context();

    within_deadline({
        let context = Arc::clone(&context);
        move || context.init_all()
    })
    .unwrap();

    context.close();
}
