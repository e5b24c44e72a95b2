use super::*;
use crate::clock::Clock;
use crate::cluster::MockClusterController;
use crate::demand::DemandSignal;
use crate::error::{ControllerError, StoreError};
use crate::events::{EventFilter, EventReceiver, LifecycleEvent, LifecycleEventKind};
use crate::notify::{NotificationDispatcher, RecordingChannel};
use crate::probe::MockActivityProbe;
use crate::state::{ActivityRecord, DesiredState, StateRecord, TransitionLock};
use crate::store::{MemoryStateStore, StateCoordinator, StateStore};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const MINUTE: Duration = Duration::from_secs(60);

fn timings(grace_min: u64, idle_min: u64) -> LifecycleTimings {
    LifecycleTimings {
        startup_grace: MINUTE * grace_min as u32,
        idle_timeout: MINUTE * idle_min as u32,
        poll_interval: MINUTE,
        max_consecutive_probe_failures: 5,
        cluster_poll_interval: Duration::from_secs(10),
        shutdown_deadline: Duration::from_secs(300),
        recovery_margin: Duration::from_secs(120),
    }
}

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 18, 0, 0).unwrap()
}

fn running_since(at: DateTime<Utc>) -> StateRecord {
    StateRecord {
        desired: DesiredState::Running,
        changed_at: at,
        launched_at: Some(at),
        activity: ActivityRecord::fresh(at),
        lock: None,
        revision: 1,
    }
}

fn in_state(desired: DesiredState, since: DateTime<Utc>) -> StateRecord {
    StateRecord {
        desired,
        changed_at: since,
        revision: 1,
        ..StateRecord::initial()
    }
}

fn signal(source: &str) -> DemandSignal {
    DemandSignal::new(source, epoch())
}

/// Store wrapper that yields at every call and keeps the history of desired states
struct HistoryStore {
    inner: MemoryStateStore,
    history: Mutex<Vec<(DesiredState, DesiredState)>>,
}

impl HistoryStore {
    fn new(record: StateRecord) -> Self {
        Self {
            inner: MemoryStateStore::with_record(record),
            history: Mutex::new(Vec::new()),
        }
    }

    fn transitions(&self) -> Vec<(DesiredState, DesiredState)> {
        self.history.lock().clone()
    }
}

#[async_trait]
impl StateStore for HistoryStore {
    async fn read(&self) -> Result<StateRecord, StoreError> {
        tokio::task::yield_now().await;
        self.inner.read().await
    }

    async fn compare_and_swap(
        &self,
        expected: &StateRecord,
        next: StateRecord,
    ) -> Result<bool, StoreError> {
        tokio::task::yield_now().await;
        let before = self.inner.snapshot().desired;
        let to = next.desired;
        let swapped = self.inner.compare_and_swap(expected, next).await?;
        if swapped && before != to {
            self.history.lock().push((before, to));
        }
        Ok(swapped)
    }

    fn describe(&self) -> String {
        "history".to_string()
    }
}

struct Harness {
    store: Arc<dyn StateStore>,
    cluster: Arc<MockClusterController>,
    probe: Arc<MockActivityProbe>,
    channel: Arc<RecordingChannel>,
    dispatcher: Arc<NotificationDispatcher>,
    clock: Clock,
    timings: LifecycleTimings,
}

impl Harness {
    fn new(
        store: Arc<dyn StateStore>,
        cluster: MockClusterController,
        probe: MockActivityProbe,
        timings: LifecycleTimings,
    ) -> Self {
        let channel = Arc::new(RecordingChannel::new("recording"));
        let dispatcher =
            Arc::new(NotificationDispatcher::local_only().with_channel(channel.clone()));
        Self {
            store,
            cluster: Arc::new(cluster),
            probe: Arc::new(probe),
            channel,
            dispatcher,
            clock: Clock::starting_at(epoch()),
            timings,
        }
    }

    fn stopped(
        cluster: MockClusterController,
        probe: MockActivityProbe,
        timings: LifecycleTimings,
    ) -> Self {
        Self::new(Arc::new(MemoryStateStore::new()), cluster, probe, timings)
    }

    fn with_record(
        record: StateRecord,
        cluster: MockClusterController,
        probe: MockActivityProbe,
        timings: LifecycleTimings,
    ) -> Self {
        Self::new(Arc::new(MemoryStateStore::with_record(record)), cluster, probe, timings)
    }

    fn launcher(&self) -> Arc<Launcher> {
        Arc::new(Launcher::new(
            self.store.clone(),
            self.cluster.clone(),
            self.dispatcher.clone(),
            self.timings,
            self.clock,
        ))
    }

    fn watchdog(&self) -> Arc<Watchdog> {
        Arc::new(Watchdog::new(
            self.store.clone(),
            self.cluster.clone(),
            self.probe.clone(),
            self.dispatcher.clone(),
            self.timings,
            self.clock,
        ))
    }

    fn coordinator(&self) -> StateCoordinator {
        StateCoordinator::new(
            self.store.clone(),
            self.clock,
            "recovery-test".to_string(),
            self.timings.lock_ttl(),
        )
    }

    fn events(&self) -> EventReceiver {
        self.dispatcher.subscribe(EventFilter::All, "test")
    }

    async fn desired(&self) -> DesiredState {
        self.store.read().await.unwrap().desired
    }
}

fn kinds(events: &[LifecycleEvent]) -> Vec<LifecycleEventKind> {
    events.iter().map(|e| e.kind).collect()
}

/// Offset of each event from the harness epoch
fn offsets(events: &[LifecycleEvent]) -> Vec<(LifecycleEventKind, Duration)> {
    events
        .iter()
        .map(|e| (e.kind, (e.timestamp - epoch()).to_std().unwrap()))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_demand_scales_up_once() {
    let store = Arc::new(HistoryStore::new(StateRecord::initial()));
    let harness = Harness::new(
        store.clone(),
        MockClusterController::new().with_start_delay(MINUTE),
        MockActivityProbe::constant(0),
        timings(10, 20),
    );
    let mut events = harness.events();
    let launcher = harness.launcher();

    let mut tasks = JoinSet::new();
    for i in 0..16 {
        let launcher = launcher.clone();
        tasks.spawn(async move { launcher.ensure_running(signal(&format!("client-{}", i))).await });
    }

    let mut launched = 0;
    while let Some(result) = tasks.join_next().await {
        match result.unwrap().unwrap() {
            LaunchOutcome::Launched => launched += 1,
            LaunchOutcome::AlreadyStarting
            | LaunchOutcome::AlreadyRunning
            | LaunchOutcome::TransitionInProgress => {}
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    assert_eq!(launched, 1);
    assert_eq!(harness.cluster.scale_up_count(), 1);
    assert_eq!(harness.desired().await, DesiredState::Running);
    assert_eq!(
        store.transitions(),
        vec![
            (DesiredState::Stopped, DesiredState::Starting),
            (DesiredState::Starting, DesiredState::Running),
        ]
    );
    assert_eq!(
        kinds(&events.drain()),
        vec![LifecycleEventKind::Launching, LifecycleEventKind::Launched]
    );
}

#[tokio::test(start_paused = true)]
async fn test_signals_100ms_apart_emit_one_launching() {
    let harness = Harness::stopped(
        MockClusterController::new().with_start_delay(MINUTE),
        MockActivityProbe::constant(0),
        timings(2, 20),
    );
    let mut events = harness.events();
    let launcher = harness.launcher();

    let first = tokio::spawn({
        let launcher = launcher.clone();
        async move { launcher.ensure_running(signal("dns")).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = launcher.ensure_running(signal("dns")).await.unwrap();

    assert_eq!(second, LaunchOutcome::AlreadyStarting);
    assert_eq!(first.await.unwrap().unwrap(), LaunchOutcome::Launched);

    let launching = events
        .drain()
        .into_iter()
        .filter(|e| e.kind == LifecycleEventKind::Launching)
        .count();
    assert_eq!(launching, 1);
}

#[tokio::test(start_paused = true)]
async fn test_full_cycle_timeline() {
    // grace 2m, idle 20m, poll 1m, nobody ever joins
    let harness = Harness::stopped(
        MockClusterController::new()
            .with_start_delay(MINUTE)
            .with_stop_delay(MINUTE),
        MockActivityProbe::constant(0),
        timings(2, 20),
    );
    let mut events = harness.events();

    let outcome = harness.launcher().ensure_running(signal("http")).await.unwrap();
    assert_eq!(outcome, LaunchOutcome::Launched);

    let outcome = harness.watchdog().run(CancellationToken::new()).await.unwrap();
    assert!(matches!(outcome, WatchOutcome::ShutDown(ShutdownReport { confirmed: true, .. })));
    assert_eq!(harness.desired().await, DesiredState::Stopped);

    assert_eq!(
        offsets(&events.drain()),
        vec![
            (LifecycleEventKind::Launching, Duration::ZERO),
            (LifecycleEventKind::Launched, MINUTE),
            (LifecycleEventKind::ShuttingDown, MINUTE * 21),
            (LifecycleEventKind::Shutdown, MINUTE * 22),
        ]
    );

    harness.dispatcher.flush().await;
    assert_eq!(harness.channel.kinds().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_one_interval_after_third_zero_sample() {
    let harness = Harness::with_record(
        running_since(epoch()),
        MockClusterController::new().already_running(),
        MockActivityProbe::sequence(&[2, 0, 0, 0]),
        timings(0, 3),
    );
    let mut events = harness.events();

    let outcome = harness.watchdog().run(CancellationToken::new()).await.unwrap();
    assert!(matches!(outcome, WatchOutcome::ShutDown(_)));

    // Samples at 0 (2 players), 1, 2, 3 (zeros); the idle timer started at 1m
    let events = offsets(&events.drain());
    assert_eq!(events[0], (LifecycleEventKind::ShuttingDown, MINUTE * 4));
    assert_eq!(harness.probe.query_count(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_no_shutdown_during_startup_grace() {
    let harness = Harness::with_record(
        running_since(epoch()),
        MockClusterController::new().already_running(),
        MockActivityProbe::constant(0),
        timings(30, 3),
    );
    let mut events = harness.events();
    let watchdog = harness.watchdog();
    let handle = tokio::spawn(async move { watchdog.run(CancellationToken::new()).await });

    tokio::time::sleep(MINUTE * 30 - Duration::from_secs(1)).await;
    assert_eq!(harness.desired().await, DesiredState::Running);
    assert!(events.drain().is_empty());

    let outcome = handle.await.unwrap().unwrap();
    assert!(matches!(outcome, WatchOutcome::ShutDown(_)));
    assert_eq!(
        offsets(&events.drain())[0],
        (LifecycleEventKind::ShuttingDown, MINUTE * 30)
    );
}

#[tokio::test(start_paused = true)]
async fn test_probe_failures_count_as_idle_from_first_failure() {
    let harness = Harness::with_record(
        running_since(epoch()),
        MockClusterController::new().already_running(),
        MockActivityProbe::unreachable(),
        timings(0, 10),
    );
    let mut events = harness.events();
    let watchdog = harness.watchdog();
    let handle = tokio::spawn(async move { watchdog.run(CancellationToken::new()).await });

    tokio::time::sleep(MINUTE * 10 - Duration::from_secs(1)).await;
    assert_eq!(harness.desired().await, DesiredState::Running);
    let activity = harness.store.read().await.unwrap().activity;
    assert_eq!(activity.consecutive_probe_failures, 10);
    assert_eq!(activity.idle_since, Some(epoch()));

    handle.await.unwrap().unwrap();
    assert_eq!(
        offsets(&events.drain())[0],
        (LifecycleEventKind::ShuttingDown, MINUTE * 10)
    );
}

#[tokio::test(start_paused = true)]
async fn test_activity_resets_idle_timer() {
    // 0,0 then a player shows up at 2m and leaves at 3m
    let harness = Harness::with_record(
        running_since(epoch()),
        MockClusterController::new().already_running(),
        MockActivityProbe::sequence(&[0, 0, 1, 0]),
        timings(0, 3),
    );
    let mut events = harness.events();

    harness.watchdog().run(CancellationToken::new()).await.unwrap();

    assert_eq!(
        offsets(&events.drain())[0],
        (LifecycleEventKind::ShuttingDown, MINUTE * 6)
    );
}

#[tokio::test(start_paused = true)]
async fn test_launch_timeout_rolls_back() {
    let harness = Harness::stopped(
        MockClusterController::new().never_starts(),
        MockActivityProbe::constant(0),
        timings(2, 20),
    );
    let mut events = harness.events();

    let outcome = harness.launcher().ensure_running(signal("http")).await.unwrap();

    assert!(matches!(outcome, LaunchOutcome::Failed { .. }));
    assert_eq!(harness.desired().await, DesiredState::Stopped);
    assert_eq!(harness.cluster.desired(), 0);
    assert_eq!(
        offsets(&events.drain()),
        vec![
            (LifecycleEventKind::Launching, Duration::ZERO),
            (LifecycleEventKind::LaunchFailed, MINUTE * 2),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_rejected_scale_up_rolls_back() {
    let harness = Harness::stopped(
        MockClusterController::new(),
        MockActivityProbe::constant(0),
        timings(2, 20),
    );
    harness.cluster.reject_scale_requests(true);
    let mut events = harness.events();

    let outcome = harness.launcher().ensure_running(signal("http")).await.unwrap();

    assert!(matches!(outcome, LaunchOutcome::Failed { .. }));
    assert_eq!(harness.desired().await, DesiredState::Stopped);
    assert_eq!(kinds(&events.drain()), vec![LifecycleEventKind::LaunchFailed]);

    // A later signal can launch again
    harness.cluster.reject_scale_requests(false);
    let outcome = harness.launcher().ensure_running(signal("http")).await.unwrap();
    assert_eq!(outcome, LaunchOutcome::Launched);
}

#[tokio::test(start_paused = true)]
async fn test_demand_while_stopping_is_busy() {
    let harness = Harness::with_record(
        in_state(DesiredState::Stopping, epoch()),
        MockClusterController::new().already_running(),
        MockActivityProbe::constant(0),
        timings(2, 20),
    );

    let outcome = harness.launcher().ensure_running(signal("http")).await.unwrap();

    assert_eq!(outcome, LaunchOutcome::Busy);
    assert!(!outcome.is_success());
    assert_eq!(harness.desired().await, DesiredState::Stopping);
    assert!(harness.cluster.scale_calls().is_empty());
    assert!(harness.store.read().await.unwrap().lock.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_demand_during_slow_shutdown_is_busy() {
    let harness = Harness::with_record(
        running_since(epoch()),
        MockClusterController::new()
            .already_running()
            .with_stop_delay(MINUTE * 2),
        MockActivityProbe::constant(0),
        timings(2, 20),
    );
    let watchdog = harness.watchdog();
    let stopping = tokio::spawn(async move { watchdog.force_stop("operator request").await });

    tokio::time::sleep(Duration::from_secs(30)).await;
    let record = harness.store.read().await.unwrap();
    assert_eq!(record.desired, DesiredState::Stopping);
    assert!(record.lock.is_some());

    let outcome = harness.launcher().ensure_running(signal("http")).await.unwrap();
    assert_eq!(outcome, LaunchOutcome::Busy);
    assert!(!outcome.is_success());

    let report = stopping.await.unwrap().unwrap();
    assert!(report.confirmed);
    assert_eq!(harness.desired().await, DesiredState::Stopped);
    assert_eq!(harness.cluster.scale_up_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_demand_while_lock_held_is_noop() {
    let mut record = StateRecord::initial();
    record.lock = Some(TransitionLock::new("someone-else", epoch(), MINUTE));
    let harness = Harness::with_record(
        record,
        MockClusterController::new(),
        MockActivityProbe::constant(0),
        timings(2, 20),
    );

    let outcome = harness.launcher().ensure_running(signal("http")).await.unwrap();

    assert_eq!(outcome, LaunchOutcome::TransitionInProgress);
    assert!(outcome.is_success());
    assert!(harness.cluster.scale_calls().is_empty());
    assert_eq!(harness.desired().await, DesiredState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_running_is_noop() {
    let harness = Harness::with_record(
        running_since(epoch()),
        MockClusterController::new().already_running(),
        MockActivityProbe::constant(0),
        timings(2, 20),
    );

    let outcome = harness.launcher().ensure_running(signal("http")).await.unwrap();
    assert_eq!(outcome, LaunchOutcome::AlreadyRunning);
    assert!(harness.cluster.scale_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_incomplete_shutdown_still_ends_stopped() {
    let harness = Harness::with_record(
        running_since(epoch()),
        MockClusterController::new().already_running().never_stops(),
        MockActivityProbe::constant(3),
        timings(2, 20),
    );
    let mut events = harness.events();

    let report = harness.watchdog().force_stop("operator request").await.unwrap();

    assert!(!report.confirmed);
    assert_eq!(report.last_seen, Some(1));
    let record = harness.store.read().await.unwrap();
    assert_eq!(record.desired, DesiredState::Stopped);
    assert!(record.lock.is_none());

    let events = events.drain();
    assert_eq!(
        offsets(&events),
        vec![
            (LifecycleEventKind::ShuttingDown, Duration::ZERO),
            (LifecycleEventKind::Shutdown, Duration::from_secs(300)),
        ]
    );
    assert!(events[1].degraded);
    assert!(events[1].detail.contains("still running"));
}

#[tokio::test(start_paused = true)]
async fn test_force_stop_requires_running() {
    let harness = Harness::stopped(
        MockClusterController::new(),
        MockActivityProbe::constant(0),
        timings(2, 20),
    );

    let err = harness.watchdog().force_stop("operator").await.unwrap_err();
    assert!(matches!(
        err,
        ControllerError::InvalidTransition {
            from: DesiredState::Stopped,
            to: DesiredState::Stopping
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_exits_when_not_running() {
    let harness = Harness::stopped(
        MockClusterController::new(),
        MockActivityProbe::constant(0),
        timings(2, 20),
    );

    let outcome = harness.watchdog().run(CancellationToken::new()).await.unwrap();
    assert_eq!(outcome, WatchOutcome::NotRunning(DesiredState::Stopped));
    assert_eq!(harness.probe.query_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_cancellation_leaves_state_running() {
    let harness = Harness::with_record(
        running_since(epoch()),
        MockClusterController::new().already_running(),
        MockActivityProbe::constant(1),
        timings(2, 20),
    );
    let cancel = CancellationToken::new();
    let watchdog = harness.watchdog();
    let handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { watchdog.run(cancel).await }
    });

    tokio::time::sleep(MINUTE * 5).await;
    cancel.cancel();

    assert_eq!(handle.await.unwrap().unwrap(), WatchOutcome::Cancelled);
    let record = harness.store.read().await.unwrap();
    assert_eq!(record.desired, DesiredState::Running);
    assert_eq!(record.activity.active_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_relaunch_after_shutdown() {
    let harness = Harness::stopped(
        MockClusterController::new(),
        MockActivityProbe::constant(0),
        timings(0, 2),
    );
    let launcher = harness.launcher();

    assert_eq!(launcher.ensure_running(signal("a")).await.unwrap(), LaunchOutcome::Launched);
    harness.watchdog().run(CancellationToken::new()).await.unwrap();
    assert_eq!(launcher.ensure_running(signal("b")).await.unwrap(), LaunchOutcome::Launched);

    assert_eq!(harness.cluster.scale_up_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_interleavings_stay_on_declared_edges() {
    let store = Arc::new(HistoryStore::new(StateRecord::initial()));
    let harness = Harness::new(
        store.clone(),
        MockClusterController::new()
            .with_start_delay(Duration::from_secs(20))
            .with_stop_delay(Duration::from_secs(20)),
        MockActivityProbe::constant(0),
        timings(0, 2),
    );
    let launcher = harness.launcher();

    let mut tasks = JoinSet::new();
    for round in 0..4u32 {
        for i in 0..4u32 {
            let launcher = launcher.clone();
            tasks.spawn(async move {
                tokio::time::sleep(Duration::from_secs(u64::from(round * 150 + i * 7))).await;
                let _ = launcher.ensure_running(signal("burst")).await;
            });
        }
        let watchdog = harness.watchdog();
        tasks.spawn(async move {
            tokio::time::sleep(Duration::from_secs(u64::from(round * 150 + 30))).await;
            let _ = watchdog.run(CancellationToken::new()).await;
        });
        let stopper = harness.watchdog();
        tasks.spawn(async move {
            tokio::time::sleep(Duration::from_secs(u64::from(round * 150 + 45))).await;
            let _ = stopper.force_stop("operator").await;
        });
    }
    while tasks.join_next().await.is_some() {}

    let transitions = store.transitions();
    assert!(!transitions.is_empty());
    for (from, to) in transitions {
        assert!(from.can_transition_to(to), "illegal edge {} -> {}", from, to);
    }
}

#[tokio::test(start_paused = true)]
async fn test_recovery_normalizes_stale_starting() {
    let harness = Harness::with_record(
        in_state(DesiredState::Starting, epoch() - chrono::Duration::minutes(30)),
        MockClusterController::new().already_running(),
        MockActivityProbe::constant(0),
        timings(10, 20),
    );
    let mut events = harness.events();

    let outcome = recover(
        &harness.coordinator(),
        harness.cluster.as_ref(),
        &harness.dispatcher,
        &harness.timings,
    )
    .await
    .unwrap();

    assert_eq!(outcome, RecoveryOutcome::RecoveredStaleStart);
    let record = harness.store.read().await.unwrap();
    assert_eq!(record.desired, DesiredState::Stopped);
    assert!(record.lock.is_none());
    assert_eq!(harness.cluster.desired(), 0);
    assert_eq!(kinds(&events.drain()), vec![LifecycleEventKind::LaunchFailed]);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_normalizes_stale_stopping() {
    let harness = Harness::with_record(
        in_state(DesiredState::Stopping, epoch() - chrono::Duration::minutes(30)),
        MockClusterController::new().already_running(),
        MockActivityProbe::constant(0),
        timings(10, 20),
    );
    let mut events = harness.events();

    let outcome = recover(
        &harness.coordinator(),
        harness.cluster.as_ref(),
        &harness.dispatcher,
        &harness.timings,
    )
    .await
    .unwrap();

    assert_eq!(outcome, RecoveryOutcome::RecoveredStaleStop);
    assert_eq!(harness.desired().await, DesiredState::Stopped);
    let events = events.drain();
    assert_eq!(kinds(&events), vec![LifecycleEventKind::Shutdown]);
    assert!(events[0].degraded);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_leaves_fresh_and_stable_states_alone() {
    for (record, expected) in [
        (
            in_state(DesiredState::Starting, epoch() - chrono::Duration::minutes(1)),
            RecoveryOutcome::InProgress(DesiredState::Starting),
        ),
        (
            in_state(DesiredState::Stopping, epoch() - chrono::Duration::minutes(1)),
            RecoveryOutcome::InProgress(DesiredState::Stopping),
        ),
        (running_since(epoch()), RecoveryOutcome::Clean(DesiredState::Running)),
        (StateRecord::initial(), RecoveryOutcome::Clean(DesiredState::Stopped)),
    ] {
        let before = record.desired;
        let harness = Harness::with_record(
            record,
            MockClusterController::new(),
            MockActivityProbe::constant(0),
            timings(10, 20),
        );

        let outcome = recover(
            &harness.coordinator(),
            harness.cluster.as_ref(),
            &harness.dispatcher,
            &harness.timings,
        )
        .await
        .unwrap();

        assert_eq!(outcome, expected);
        assert_eq!(harness.desired().await, before);
        assert!(harness.cluster.scale_calls().is_empty());
    }
}

#[test]
fn test_observe_failures_below_threshold_keep_phase() {
    let t0 = epoch();
    let active = ActivityRecord {
        active_count: 2,
        ..ActivityRecord::fresh(t0)
    };

    let mut record = active.clone();
    for i in 1..=4 {
        record = observe(&record, None, t0 + chrono::Duration::minutes(i), 5);
    }
    assert_eq!(record.consecutive_probe_failures, 4);
    assert_eq!(record.idle_since, None);
    assert_eq!(record.failing_since, Some(t0 + chrono::Duration::minutes(1)));

    let record = observe(&record, None, t0 + chrono::Duration::minutes(5), 5);
    assert_eq!(record.idle_since, Some(t0 + chrono::Duration::minutes(1)));

    let recovered = observe(&record, Some(1), t0 + chrono::Duration::minutes(6), 5);
    assert_eq!(recovered.consecutive_probe_failures, 0);
    assert_eq!(recovered.failing_since, None);
    assert_eq!(recovered.idle_since, None);
    assert_eq!(recovered.last_active_at, t0 + chrono::Duration::minutes(6));
}

#[test]
fn test_observe_failure_keeps_earlier_idle_start() {
    let t0 = epoch();
    let idle = observe(&ActivityRecord::fresh(t0), Some(0), t0, 1);
    let failed = observe(&idle, None, t0 + chrono::Duration::minutes(3), 1);
    assert_eq!(failed.idle_since, Some(t0));
}

#[test]
fn test_evaluate_phases() {
    let t0 = epoch();
    let timings = timings(2, 20);
    let mut record = running_since(t0);

    assert_eq!(evaluate(&record, t0 + chrono::Duration::minutes(1), &timings), WatchPhase::Grace);
    assert_eq!(evaluate(&record, t0 + chrono::Duration::minutes(2), &timings), WatchPhase::Active);

    record.activity.idle_since = Some(t0);
    assert_eq!(evaluate(&record, t0 + chrono::Duration::minutes(1), &timings), WatchPhase::Grace);
    assert_eq!(
        evaluate(&record, t0 + chrono::Duration::minutes(19), &timings),
        WatchPhase::IdleCounting
    );
    assert_eq!(
        evaluate(&record, t0 + chrono::Duration::minutes(20), &timings),
        WatchPhase::ShuttingDown
    );
}

#[test]
fn test_duration_formatting() {
    assert_eq!(format_duration(Duration::from_secs(45)), "45s");
    assert_eq!(format_duration(Duration::from_secs(20 * 60)), "20m");
    assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
    assert_eq!(format_duration(Duration::from_secs(3 * 3600 + 120)), "3h2m");
}

#[test]
fn test_lock_outlives_shutdown() {
    let timings = LifecycleTimings::default();
    assert!(timings.lock_ttl() > timings.shutdown_deadline);
    assert!(timings.lock_ttl() > timings.startup_grace);
}
