//! Integration tests for the monitor facade: seeding, view projection,
//! selection, manual refresh and teardown.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use common::*;
use vitalwatch_core::reading::PartialReading;
use vitalwatch_core::view::SortCriterion;
use vitalwatch_monitor::config::MonitorConfig;
use vitalwatch_monitor::events::MonitorEvent;
use vitalwatch_monitor::feed::{FeedError, LiveFetch, SessionListener, TelemetryFeed};
use vitalwatch_monitor::{Monitor, MonitorError};

fn ward() -> Vec<vitalwatch_core::record::EntityRecord> {
    vec![
        live(1, "Kim").with_readings(PartialReading::vitals(72.0, 36.6)),
        live(2, "Park").with_readings(PartialReading::vitals(120.0, 38.4)),
    ]
}

// ---------------------------------------------------------------------------
// Test: loading
// ---------------------------------------------------------------------------

#[tokio::test]
async fn load_seeds_registry_and_classifies() {
    let feed = ScriptedFeed::new(ward());
    let listener = Arc::new(CountingListener::default());
    let monitor = loaded_monitor(&feed, &listener, MonitorConfig::default()).await;

    let snapshot = monitor.snapshot().await;
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[1].risk.as_str(), "high");
    assert!(!monitor.is_loading());
    assert_eq!(feed.load_calls(), 1);
}

#[tokio::test]
async fn unauthorized_load_invalidates_session() {
    let feed = ScriptedFeed::new(ward());
    let listener = Arc::new(CountingListener::default());
    let monitor = Monitor::new(
        MonitorConfig::default(),
        ORG_ID,
        "expired-token",
        Arc::clone(&feed) as Arc<dyn TelemetryFeed>,
        Arc::clone(&listener) as Arc<dyn SessionListener>,
    );
    let mut events = monitor.subscribe();

    let result = monitor.load().await;

    assert_matches!(result, Err(MonitorError::SessionInvalid));
    assert_eq!(listener.calls(), 1);
    assert!(monitor.snapshot().await.is_empty());
    assert_eq!(events.try_recv().ok(), Some(MonitorEvent::SessionInvalidated));
}

#[tokio::test]
async fn failed_reload_keeps_current_registry() {
    let feed = ScriptedFeed::new(ward());
    let listener = Arc::new(CountingListener::default());
    let monitor = loaded_monitor(&feed, &listener, MonitorConfig::default()).await;

    feed.fail_loads_with(Some(FeedError::Transport("connection refused".into())));
    let result = monitor.refresh().await;

    assert_matches!(result, Err(MonitorError::Load(FeedError::Transport(_))));
    assert_eq!(monitor.snapshot().await.len(), 2);
    assert_eq!(listener.calls(), 0);
}

#[tokio::test]
async fn start_fails_when_session_is_invalid() {
    let feed = ScriptedFeed::new(ward());
    let listener = Arc::new(CountingListener::default());

    let result = Monitor::start(
        MonitorConfig::default(),
        ORG_ID,
        "expired-token",
        feed as Arc<dyn TelemetryFeed>,
        Arc::clone(&listener) as Arc<dyn SessionListener>,
    )
    .await;

    assert!(result.is_err());
    assert_eq!(listener.calls(), 1);
}

// ---------------------------------------------------------------------------
// Test: view projection and selection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn view_sorts_by_risk_and_name() {
    let feed = ScriptedFeed::new(ward());
    let listener = Arc::new(CountingListener::default());
    let monitor = loaded_monitor(&feed, &listener, MonitorConfig::default()).await;

    let names = |view: Vec<vitalwatch_core::record::EntityRecord>| {
        view.into_iter().map(|r| r.name).collect::<Vec<_>>()
    };

    monitor.set_sort_criterion(SortCriterion::Risk).await;
    assert_eq!(names(monitor.projected_view().await), vec!["Park", "Kim"]);

    monitor.set_sort_criterion(SortCriterion::Name).await;
    assert_eq!(names(monitor.projected_view().await), vec!["Kim", "Park"]);
}

#[tokio::test]
async fn selection_follows_search_filter() {
    let feed = ScriptedFeed::new(ward());
    let listener = Arc::new(CountingListener::default());
    let monitor = loaded_monitor(&feed, &listener, MonitorConfig::default()).await;
    monitor.set_sort_criterion(SortCriterion::Name).await;

    // Nothing selected yet: first visible entry is picked.
    assert_eq!(monitor.selection().await, Some(1));

    monitor.set_selection(2).await;
    assert_eq!(monitor.selection().await, Some(2));

    // Selected patient filtered out: move to the first remaining one.
    monitor.set_search_term("ki").await;
    assert_eq!(monitor.selection().await, Some(1));

    // Nothing matches: no selection.
    monitor.set_search_term("choi").await;
    assert!(monitor.projected_view().await.is_empty());
    assert_eq!(monitor.selection().await, None);
}

#[tokio::test]
async fn view_reflects_live_merges() {
    let feed = ScriptedFeed::new(ward());
    feed.push(1, Ok(LiveFetch::Reading(PartialReading {
        heart_rate: Some(130.0),
        ..PartialReading::default()
    })));
    let listener = Arc::new(CountingListener::default());
    let monitor = loaded_monitor(&feed, &listener, MonitorConfig::default()).await;
    monitor.set_sort_criterion(SortCriterion::Heart).await;

    monitor.poll_now().await;
    let view = monitor.projected_view().await;

    assert_eq!(view[0].id, 1);
    assert_eq!(view[0].current.heart_rate, Some(130.0));
    assert_eq!(view[0].current.temperature, Some(36.6));
}

// ---------------------------------------------------------------------------
// Test: simulation and refresh
// ---------------------------------------------------------------------------

#[tokio::test]
async fn simulation_tick_updates_simulated_entities() {
    let feed = ScriptedFeed::new(vec![simulated(1, "Kim"), live(2, "Park")]);
    let listener = Arc::new(CountingListener::default());
    let monitor = loaded_monitor(&feed, &listener, MonitorConfig::default()).await;

    assert_eq!(monitor.tick_simulation().await, Some((1, 1)));
    assert_eq!(monitor.tick_simulation().await, Some((2, 1)));

    let snapshot = monitor.snapshot().await;
    assert!(snapshot[0].current.heart_rate.is_some());
    assert!(snapshot[0].last_updated.is_some());
    assert_eq!(snapshot[1].current.heart_rate, None);
    assert_eq!(monitor.tick().await, 2);
}

#[tokio::test(start_paused = true)]
async fn refresh_resets_backoff_and_tick() {
    let feed = ScriptedFeed::new(vec![live(1, "Kim"), simulated(2, "Park")]);
    feed.always(1, Ok(LiveFetch::NotFound));
    let listener = Arc::new(CountingListener::default());
    let monitor = loaded_monitor(&feed, &listener, sequential_config()).await;

    for _ in 0..5 {
        monitor.poll_now().await;
    }
    monitor.tick_simulation().await;
    assert!(monitor.backoff_status(1).await.suspended);

    monitor.refresh().await.unwrap();

    let state = monitor.backoff_status(1).await;
    assert!(!state.suspended);
    assert_eq!(state.retry_count, 0);
    assert_eq!(monitor.tick().await, 0);
    assert_eq!(feed.load_calls(), 2);

    // Eligible immediately, without waiting out the old suspension.
    monitor.poll_now().await;
    assert_eq!(feed.fetch_calls(1), 6);
}

#[tokio::test]
async fn refresh_picks_up_new_entities() {
    let feed = ScriptedFeed::new(ward());
    let listener = Arc::new(CountingListener::default());
    let monitor = loaded_monitor(&feed, &listener, MonitorConfig::default()).await;
    let mut events = monitor.subscribe();

    feed.set_entities(vec![live(3, "Lee")]);
    assert_eq!(monitor.refresh().await.unwrap(), 1);

    let snapshot = monitor.snapshot().await;
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].id, 3);
    assert_eq!(
        events.try_recv().ok(),
        Some(MonitorEvent::Seeded {
            count: 1,
            generation: 2
        })
    );
}

#[tokio::test(start_paused = true)]
async fn refresh_during_poll_cycle_discards_stale_readings() {
    let feed = ScriptedFeed::new(vec![live(1, "Kim"), live(2, "Park"), live(3, "Lee")]);
    for id in 1..=3 {
        feed.always(id, reading(130.0, 39.0));
    }
    feed.slow_fetches(Duration::from_millis(100));
    let listener = Arc::new(CountingListener::default());
    let monitor = loaded_monitor(&feed, &listener, MonitorConfig::default()).await;
    let mut events = monitor.subscribe();

    let cycle = tokio::spawn({
        let monitor = Arc::clone(&monitor);
        async move { monitor.poll_now().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(feed.in_flight(), 3);

    monitor.refresh().await.unwrap();
    let outcome = cycle.await.unwrap();

    assert_matches!(
        outcome,
        vitalwatch_monitor::poller::CycleOutcome::Completed(report)
            if report.attempted == 3 && report.merged == 0 && report.discarded == 3
    );
    for record in monitor.snapshot().await {
        assert_eq!(record.current.heart_rate, None);
        assert_eq!(record.last_updated, None);
    }
    for id in 1..=3 {
        assert_eq!(monitor.backoff_status(id).await.retry_count, 0);
    }
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, MonitorEvent::EntityUpdated { .. }), "{event:?}");
    }
}

// ---------------------------------------------------------------------------
// Test: background loops and teardown
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn loops_run_on_their_intervals() {
    let feed = ScriptedFeed::new(vec![simulated(1, "Kim"), live(2, "Park")]);
    feed.always(2, reading(75.0, 36.7));
    let listener = Arc::new(CountingListener::default());

    let monitor = Monitor::start(
        MonitorConfig::default(),
        ORG_ID,
        TOKEN,
        Arc::clone(&feed) as Arc<dyn TelemetryFeed>,
        Arc::clone(&listener) as Arc<dyn SessionListener>,
    )
    .await
    .unwrap();

    // Simulation every 2s (first at 2s), polling every 5s (first at 5s).
    tokio::time::sleep(Duration::from_millis(5_500)).await;

    assert_eq!(monitor.tick().await, 2);
    assert_eq!(feed.fetch_calls(2), 1);

    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn teardown_stops_all_mutation() {
    let feed = ScriptedFeed::new(vec![simulated(1, "Kim"), live(2, "Park")]);
    feed.always(2, reading(75.0, 36.7));
    let listener = Arc::new(CountingListener::default());

    let monitor = Monitor::start(
        MonitorConfig::default(),
        ORG_ID,
        TOKEN,
        Arc::clone(&feed) as Arc<dyn TelemetryFeed>,
        Arc::clone(&listener) as Arc<dyn SessionListener>,
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    monitor.shutdown().await;

    let frozen = monitor.snapshot().await;
    let tick = monitor.tick().await;
    let calls = feed.total_fetch_calls();

    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(monitor.snapshot().await, frozen);
    assert_eq!(monitor.tick().await, tick);
    assert_eq!(feed.total_fetch_calls(), calls);
    assert_eq!(monitor.tick_simulation().await, None);
    assert_matches!(
        monitor.poll_now().await,
        vitalwatch_monitor::poller::CycleOutcome::Completed(report) if report.attempted == 0
    );
}

#[tokio::test(start_paused = true)]
async fn teardown_drops_pending_fetches_unapplied() {
    let feed = ScriptedFeed::new(vec![live(1, "Kim")]);
    feed.always(1, reading(130.0, 39.0));
    feed.slow_fetches(Duration::from_millis(1_000));
    let listener = Arc::new(CountingListener::default());

    let monitor = Monitor::start(
        MonitorConfig::default(),
        ORG_ID,
        TOKEN,
        Arc::clone(&feed) as Arc<dyn TelemetryFeed>,
        Arc::clone(&listener) as Arc<dyn SessionListener>,
    )
    .await
    .unwrap();
    let mut events = monitor.subscribe();

    // First poll cycle starts at 5s; its fetch answers at 6s.
    tokio::time::sleep(Duration::from_millis(5_100)).await;
    assert_eq!(feed.fetch_calls(1), 1);
    assert_eq!(feed.in_flight(), 1);

    monitor.shutdown().await;
    assert_eq!(feed.in_flight(), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;

    let record = monitor.snapshot().await.remove(0);
    assert_eq!(record.current.heart_rate, None);
    assert!(record.heart_rate_history.is_empty());
    assert_eq!(monitor.backoff_status(1).await.retry_count, 0);
    assert_eq!(feed.fetch_calls(1), 1);
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, MonitorEvent::EntityUpdated { .. }), "{event:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn zero_intervals_are_clamped_instead_of_stalling() {
    let feed = ScriptedFeed::new(vec![simulated(1, "Kim"), live(2, "Park")]);
    feed.always(2, reading(75.0, 36.7));
    let listener = Arc::new(CountingListener::default());
    let config = MonitorConfig {
        sim_interval: Duration::ZERO,
        poll_interval: Duration::ZERO,
        ..MonitorConfig::default()
    };

    let monitor = Monitor::start(
        config,
        ORG_ID,
        TOKEN,
        Arc::clone(&feed) as Arc<dyn TelemetryFeed>,
        Arc::clone(&listener) as Arc<dyn SessionListener>,
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(monitor.tick().await > 0);
    assert!(feed.fetch_calls(2) > 0);
    assert_eq!(
        monitor.snapshot().await[1].current.heart_rate,
        Some(75.0)
    );

    monitor.shutdown().await;
}
