//! Lifecycle and fan-in tests for monitors, multiplexers and the registry,
//! driven through a scripted chain client.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chainwatch_core::{ChainClient, ChainError, SourceTag};
use chainwatch_decode::{LAUNCHLAB_PROGRAM_ID, PUMPFUN_PROGRAM_ID};
use chainwatch_monitor::{
    ConsumerHandle, MonitorRegistry, MonitorState, MultiplexerError, SubscriptionMultiplexer,
    WatchConfig,
};
use tokio::sync::broadcast::error::TryRecvError;

use common::*;

async fn setup() -> (Arc<MockChainClient>, MonitorRegistry, Arc<SubscriptionMultiplexer>) {
    let client = MockChainClient::new();
    let registry = MonitorRegistry::with_client(WatchConfig::default(), client.clone()).unwrap();
    let mux = registry.multiplexer("Trenches", &SourceTag::ALL).await.unwrap();
    (client, registry, mux)
}

// ─── Reference counting ───────────────────────────────────────────────────────

#[tokio::test]
async fn n_attaches_then_n_detaches_return_to_idle() {
    let (client, _registry, mux) = setup().await;
    let handles: Vec<_> = (0..4).map(|_| ConsumerHandle::next()).collect();

    for h in &handles {
        mux.attach(*h).await.unwrap();
    }
    assert_eq!(mux.consumer_count(), 4);
    assert!(mux.status_snapshot().all_active());

    for h in &handles {
        mux.detach(*h).await.unwrap();
    }
    assert_eq!(mux.consumer_count(), 0);
    assert!(mux.monitors().iter().all(|m| !m.is_active()));
    assert_eq!(client.total_opens(), 2);
    assert_eq!(client.total_closes(), 2);
}

#[tokio::test]
async fn first_attach_starts_each_monitor_once() {
    let (client, _registry, mux) = setup().await;

    mux.attach(ConsumerHandle::next()).await.unwrap();
    assert_eq!(client.opens(PUMPFUN_PROGRAM_ID), 1);
    assert_eq!(client.opens(LAUNCHLAB_PROGRAM_ID), 1);

    mux.attach(ConsumerHandle::next()).await.unwrap();
    assert_eq!(client.opens(PUMPFUN_PROGRAM_ID), 1);
    assert_eq!(client.opens(LAUNCHLAB_PROGRAM_ID), 1);
    assert_eq!(mux.consumer_count(), 2);
}

#[tokio::test]
async fn last_detach_stops_every_monitor_once() {
    let (client, _registry, mux) = setup().await;
    let h = ConsumerHandle::next();
    mux.attach(h).await.unwrap();
    mux.detach(h).await.unwrap();

    assert_eq!(client.closes(PUMPFUN_PROGRAM_ID), 1);
    assert_eq!(client.closes(LAUNCHLAB_PROGRAM_ID), 1);
    let status = mux.status_snapshot();
    assert_eq!(status.consumer_count, 0);
    assert!(status.monitors.iter().all(|m| !m.is_active && m.state == MonitorState::Idle));
    assert_eq!(status.message(), "Trenches monitoring is not active - no subscriptions");
}

#[tokio::test]
async fn reverse_order_detach_stops_once() {
    let (client, _registry, mux) = setup().await;
    let first = ConsumerHandle::next();
    let second = ConsumerHandle::next();
    mux.attach(first).await.unwrap();
    mux.attach(second).await.unwrap();

    mux.detach(second).await.unwrap();
    assert!(mux.status_snapshot().all_active());
    assert_eq!(client.total_closes(), 0);

    mux.detach(first).await.unwrap();
    assert_eq!(mux.consumer_count(), 0);
    assert_eq!(client.closes(PUMPFUN_PROGRAM_ID), 1);
    assert_eq!(client.closes(LAUNCHLAB_PROGRAM_ID), 1);
}

#[tokio::test]
async fn mismatched_attach_and_detach_are_rejected() {
    let (_client, _registry, mux) = setup().await;
    let h = ConsumerHandle::next();

    let err = mux.detach(h).await.unwrap_err();
    assert!(matches!(err, MultiplexerError::UnknownConsumer(x) if x == h));
    assert_eq!(mux.consumer_count(), 0);

    mux.attach(h).await.unwrap();
    let err = mux.attach(h).await.unwrap_err();
    assert!(matches!(err, MultiplexerError::AlreadyAttached(_)));
    assert_eq!(mux.consumer_count(), 1);

    mux.detach(h).await.unwrap();
    assert!(mux.detach(h).await.is_err());
    assert_eq!(mux.consumer_count(), 0);
}

#[tokio::test]
async fn restart_after_full_cycle_reuses_monitors() {
    let (client, registry, mux) = setup().await;
    for _ in 0..3 {
        let h = ConsumerHandle::next();
        mux.attach(h).await.unwrap();
        mux.detach(h).await.unwrap();
    }
    assert_eq!(client.opens(PUMPFUN_PROGRAM_ID), 3);
    assert_eq!(client.closes(PUMPFUN_PROGRAM_ID), 3);

    let again = registry.monitor(SourceTag::PumpFun).await.unwrap();
    assert!(Arc::ptr_eq(&again, &mux.monitors()[0]));
}

// ─── Start failures ───────────────────────────────────────────────────────────

#[tokio::test]
async fn one_failed_start_does_not_block_the_others() {
    let client = MockChainClient::new();
    client.fail_open_for(PUMPFUN_PROGRAM_ID);
    let registry = MonitorRegistry::with_client(WatchConfig::default(), client.clone()).unwrap();
    let mux = registry.multiplexer("Trenches", &SourceTag::ALL).await.unwrap();

    let h = ConsumerHandle::next();
    mux.attach(h).await.unwrap();

    let status = mux.status_snapshot();
    let pump = &status.monitors[0];
    let launch = &status.monitors[1];
    assert_eq!(pump.source_tag, SourceTag::PumpFun);
    assert!(!pump.is_active);
    assert_eq!(pump.message, "PumpFun monitoring is not active - no subscriptions");
    assert!(launch.is_active);
    assert_eq!(launch.message, "Raydium Launchlab monitoring is active (1 active subscriptions)");
    assert_eq!(status.message(), "Trenches monitoring is active (1 active subscriptions)");

    mux.detach(h).await.unwrap();
    assert_eq!(client.closes(PUMPFUN_PROGRAM_ID), 0);
    assert_eq!(client.closes(LAUNCHLAB_PROGRAM_ID), 1);
}

// ─── Fan-in ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn union_stream_delivers_tagged_events_from_both_sources() {
    let (client, _registry, mux) = setup().await;
    client.script_tx(
        "launch-sig",
        launch_tx("launch-sig", LAUNCH_MINT, 8, initialize_data("Lab Coin", "LABC")),
        Duration::ZERO,
    );
    let mut sub = mux.subscribe().await.unwrap();

    assert!(client.push(PUMPFUN_PROGRAM_ID, pump_batch("pump-sig", "Test Token", "TEST")));
    let event = within(sub.recv()).await.unwrap();
    assert_eq!(event.source_tag, SourceTag::PumpFun);
    assert_eq!(event.name, "Test Token");
    assert_eq!(event.symbol, "TEST");
    assert_eq!(event.mint, PUMP_MINT);
    assert_eq!(event.tx_signature.as_deref(), Some("pump-sig"));

    assert!(client.push(LAUNCHLAB_PROGRAM_ID, launch_batch("launch-sig")));
    let event = within(sub.recv()).await.unwrap();
    assert_eq!(event.source_tag, SourceTag::RaydiumLaunchlab);
    assert_eq!(event.name, "Lab Coin");
    assert_eq!(event.mint, LAUNCH_MINT);
    assert_eq!(event.creator, "Creator1");
    assert_eq!(event.pool_or_curve_key.as_deref(), Some("PoolState1"));

    sub.close().await;
    assert_eq!(mux.consumer_count(), 0);
}

#[tokio::test]
async fn every_attached_consumer_receives_each_event() {
    let (client, _registry, mux) = setup().await;
    let mut a = mux.subscribe().await.unwrap();
    let mut b = mux.subscribe().await.unwrap();

    client.push(PUMPFUN_PROGRAM_ID, pump_batch("sig", "Shared", "SHR"));
    assert_eq!(within(a.recv()).await.unwrap().symbol, "SHR");
    assert_eq!(within(b.recv()).await.unwrap().symbol, "SHR");
}

#[tokio::test]
async fn late_joiners_see_no_earlier_events() {
    let (client, _registry, mux) = setup().await;
    let mut early = mux.attach(ConsumerHandle::next()).await.unwrap();

    client.push(PUMPFUN_PROGRAM_ID, pump_batch("sig-1", "First", "ONE"));
    assert_eq!(within(early.recv()).await.unwrap().name, "First");

    let mut late = mux.attach(ConsumerHandle::next()).await.unwrap();
    assert!(matches!(late.try_recv(), Err(TryRecvError::Empty)));

    client.push(PUMPFUN_PROGRAM_ID, pump_batch("sig-2", "Second", "TWO"));
    assert_eq!(within(late.recv()).await.unwrap().name, "Second");
}

#[tokio::test]
async fn non_creation_batches_emit_nothing() {
    let (client, _registry, mux) = setup().await;
    let mut rx = mux.attach(ConsumerHandle::next()).await.unwrap();

    client.push(
        PUMPFUN_PROGRAM_ID,
        chainwatch_core::LogBatch::new("buy", vec!["Program log: Instruction: Buy".into()]),
    );
    client.push(LAUNCHLAB_PROGRAM_ID, launch_batch("unknown-sig"));
    client.push(PUMPFUN_PROGRAM_ID, pump_batch("marker", "After", "AFT"));

    // Batches are handled in order, so the marker arriving first proves the
    // earlier pump batch produced nothing.
    assert_eq!(within(rx.recv()).await.unwrap().name, "After");
    let launch = mux.monitors()[1].clone();
    eventually(|| launch.in_flight() == 0 && client.fetches() == 1).await;
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn failed_transactions_are_skipped() {
    let (client, _registry, mux) = setup().await;
    let mut rx = mux.attach(ConsumerHandle::next()).await.unwrap();

    let mut failed = pump_batch("failed", "Failed", "FAIL");
    failed.err = Some(serde_json::json!({ "InstructionError": [0, { "Custom": 6001 }] }));
    client.push(PUMPFUN_PROGRAM_ID, failed);
    client.push(PUMPFUN_PROGRAM_ID, pump_batch("ok", "Kept", "KEPT"));

    assert_eq!(within(rx.recv()).await.unwrap().name, "Kept");
    assert_eq!(mux.monitors()[0].stats().failed_tx_skipped, 1);
}

// ─── Instruction-derived concurrency ─────────────────────────────────────────

#[tokio::test]
async fn instruction_completions_may_be_reordered() {
    let (client, _registry, mux) = setup().await;
    let slow_mint = "SlowMint11111111111111111111111111111111111";
    let fast_mint = "FastMint11111111111111111111111111111111111";
    client.script_tx(
        "slow",
        launch_tx("slow", slow_mint, 8, initialize_data("Slow", "SLOW")),
        Duration::from_millis(300),
    );
    client.script_tx(
        "fast",
        launch_tx("fast", fast_mint, 8, initialize_data("Fast", "FAST")),
        Duration::from_millis(10),
    );
    let mut rx = mux.attach(ConsumerHandle::next()).await.unwrap();

    client.push(LAUNCHLAB_PROGRAM_ID, launch_batch("slow"));
    client.push(LAUNCHLAB_PROGRAM_ID, launch_batch("fast"));

    let first = within(rx.recv()).await.unwrap();
    let second = within(rx.recv()).await.unwrap();
    assert_eq!(first.mint, fast_mint);
    assert_eq!(second.mint, slow_mint);
}

#[tokio::test]
async fn completions_after_stop_are_suppressed() {
    let (client, _registry, mux) = setup().await;
    client.script_tx(
        "late",
        launch_tx("late", LAUNCH_MINT, 8, initialize_data("Late", "LATE")),
        Duration::from_millis(200),
    );
    let h = ConsumerHandle::next();
    mux.attach(h).await.unwrap();
    let launch = mux.monitors()[1].clone();

    client.push(LAUNCHLAB_PROGRAM_ID, launch_batch("late"));
    eventually(|| launch.in_flight() == 1).await;

    mux.detach(h).await.unwrap();
    assert!(!launch.is_active());
    eventually(|| launch.in_flight() == 0).await;

    let stats = launch.stats();
    assert_eq!(stats.events_emitted, 0);
    assert_eq!(stats.events_suppressed, 1);
}

#[tokio::test]
async fn too_few_accounts_yields_no_event() {
    let (client, _registry, mux) = setup().await;
    client.script_tx(
        "short",
        launch_tx("short", LAUNCH_MINT, 7, initialize_data("Short", "SHRT")),
        Duration::ZERO,
    );
    mux.attach(ConsumerHandle::next()).await.unwrap();
    let launch = mux.monitors()[1].clone();

    client.push(LAUNCHLAB_PROGRAM_ID, launch_batch("short"));
    eventually(|| client.fetches() == 1 && launch.in_flight() == 0).await;
    let stats = launch.stats();
    assert_eq!(stats.extractions_started, 1);
    assert_eq!(stats.events_emitted, 0);
    assert_eq!(stats.decode_failures, 0);
}

// ─── Shared monitors ─────────────────────────────────────────────────────────

#[tokio::test]
async fn shared_monitor_keeps_running_for_other_multiplexer() {
    let (client, registry, trenches) = setup().await;
    let pump_only = registry.multiplexer("PumpFun", &[SourceTag::PumpFun]).await.unwrap();
    assert!(Arc::ptr_eq(&trenches.monitors()[0], &pump_only.monitors()[0]));

    let a = ConsumerHandle::next();
    let b = ConsumerHandle::next();
    trenches.attach(a).await.unwrap();
    pump_only.attach(b).await.unwrap();
    assert_eq!(client.opens(PUMPFUN_PROGRAM_ID), 1);

    trenches.detach(a).await.unwrap();
    assert!(trenches.monitors()[0].is_active());
    assert!(!trenches.monitors()[1].is_active());
    assert_eq!(client.closes(PUMPFUN_PROGRAM_ID), 0);

    let mut rx = pump_only.attach(ConsumerHandle::next()).await.unwrap();
    client.push(PUMPFUN_PROGRAM_ID, pump_batch("sig", "Still Here", "HERE"));
    assert_eq!(within(rx.recv()).await.unwrap().name, "Still Here");

    pump_only.detach(b).await.unwrap();
    assert!(trenches.monitors()[0].is_active());
}

// ─── Registry ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn registry_builds_client_and_monitors_once() {
    let built = Arc::new(AtomicUsize::new(0));
    let client = MockChainClient::new();
    let counter = built.clone();
    let factory = move |_: &WatchConfig| -> Result<Arc<dyn ChainClient>, ChainError> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(client.clone())
    };
    let registry = MonitorRegistry::with_factory(WatchConfig::default(), Box::new(factory)).unwrap();

    let a = registry.monitor(SourceTag::PumpFun).await.unwrap();
    let b = registry.monitor(SourceTag::PumpFun).await.unwrap();
    let c = registry.monitor(SourceTag::RaydiumLaunchlab).await.unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(built.load(Ordering::SeqCst), 1);
    assert!(a.strategy().decoding_enabled());
    assert!(c.strategy().decoding_enabled());
}

#[tokio::test]
async fn client_factory_failure_is_reported() {
    let factory = |_: &WatchConfig| -> Result<Arc<dyn ChainClient>, ChainError> {
        Err(ChainError::Transport("no route".into()))
    };
    let registry = MonitorRegistry::with_factory(WatchConfig::default(), Box::new(factory)).unwrap();
    assert!(registry.monitor(SourceTag::PumpFun).await.is_err());
}

#[tokio::test]
async fn unloadable_schema_disables_decoding_without_failing() {
    let mut config = WatchConfig::default();
    config.pumpfun.idl_path = Some("/nonexistent/pump.json".into());
    config.launchlab.idl_path = Some("/nonexistent/launchlab.json".into());
    let client = MockChainClient::new();
    client.script_tx(
        "launch",
        launch_tx("launch", LAUNCH_MINT, 8, initialize_data("Lab Coin", "LABC")),
        Duration::ZERO,
    );
    let registry = MonitorRegistry::with_client(config, client.clone()).unwrap();
    let mux = registry.multiplexer("Trenches", &SourceTag::ALL).await.unwrap();
    assert!(mux.monitors().iter().all(|m| !m.strategy().decoding_enabled()));

    let mut rx = mux.attach(ConsumerHandle::next()).await.unwrap();
    assert!(mux.status_snapshot().all_active());

    client.push(PUMPFUN_PROGRAM_ID, pump_batch("pump", "Test Token", "TEST"));
    client.push(LAUNCHLAB_PROGRAM_ID, launch_batch("launch"));

    let event = within(rx.recv()).await.unwrap();
    assert_eq!(event.source_tag, SourceTag::RaydiumLaunchlab);
    assert!(event.name.starts_with("Launchlab Token "));
    assert_eq!(event.symbol, format!("LL{}", &LAUNCH_MINT[LAUNCH_MINT.len() - 4..]));

    let pump = mux.monitors()[0].clone();
    eventually(|| pump.stats().batches_seen == 1).await;
    assert_eq!(pump.stats().events_emitted, 0);
}

// ─── Subscription handles ─────────────────────────────────────────────────────

#[tokio::test]
async fn dropping_a_subscription_detaches_it() {
    let (client, _registry, mux) = setup().await;
    let sub = mux.subscribe().await.unwrap();
    assert_eq!(mux.consumer_count(), 1);

    drop(sub);
    eventually(|| mux.consumer_count() == 0).await;
    eventually(|| client.total_closes() == 2).await;
}

#[tokio::test]
async fn subscription_stream_yields_events() {
    use futures::StreamExt;

    let (client, _registry, mux) = setup().await;
    let stream = mux.subscribe().await.unwrap().into_stream();
    futures::pin_mut!(stream);

    client.push(PUMPFUN_PROGRAM_ID, pump_batch("sig", "Streamed", "STRM"));
    let event = within(stream.next()).await.unwrap();
    assert_eq!(event.symbol, "STRM");
}
