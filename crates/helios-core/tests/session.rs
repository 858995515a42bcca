//! Session behaviour against the in-memory panel.
//!
//! These run without Bluetooth hardware. The tokio clock is paused so
//! scripted latencies and backoff delays elapse instantly and in order.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use helios_core::helios_types::uuid::{
    POWER_COMMAND, POWER_LEVEL, READING_A, READING_B, READING_C, READING_D, SEARCH_COMMAND,
};
use helios_core::{
    CommandQueue, ConnectionState, EventReceiver, FieldTag, FieldUpdate, MockOp, MockPanel,
    PanelEvent, PanelSession, PollingScheduler, ReconnectOptions, SchedulerAction,
    SchedulerEvent, SchedulerState, SessionEnd, SessionOptions, UpdateOrigin,
};
use uuid::Uuid;

const HELIOS_ORDER: [Uuid; 7] = [
    READING_A,
    READING_B,
    READING_C,
    READING_D,
    POWER_LEVEL,
    POWER_COMMAND,
    SEARCH_COMMAND,
];

fn options() -> SessionOptions {
    SessionOptions::default().heartbeat_interval(None)
}

fn slow_panel() -> Arc<MockPanel> {
    let panel = Arc::new(MockPanel::helios());
    panel.set_op_latency(Duration::from_millis(10));
    panel
}

async fn next_update(rx: &mut EventReceiver) -> FieldUpdate {
    loop {
        if let PanelEvent::FieldUpdate(update) = rx.recv().await.unwrap() {
            return update;
        }
    }
}

async fn wait_for_state(rx: &mut EventReceiver, wanted: ConnectionState, generation: u64) {
    loop {
        if let PanelEvent::ConnectionStateChanged { state, generation: g } = rx.recv().await.unwrap()
            && state == wanted
            && g == generation
        {
            return;
        }
    }
}

/// The single GATT operation among `actions`.
fn operation(actions: &[SchedulerAction]) -> &SchedulerAction {
    let ops: Vec<&SchedulerAction> = actions
        .iter()
        .filter(|a| !matches!(a, SchedulerAction::Emit(_)))
        .collect();
    assert_eq!(ops.len(), 1, "expected one operation in {:?}", actions);
    ops[0]
}

fn read_target(actions: &[SchedulerAction]) -> Uuid {
    match operation(actions) {
        SchedulerAction::Read { characteristic, .. } => *characteristic,
        other => panic!("expected a read, got {:?}", other),
    }
}

fn complete_read(scheduler: &mut PollingScheduler, generation: u64, uuid: Uuid, value: i8) -> Vec<SchedulerAction> {
    scheduler.handle(SchedulerEvent::ReadCompleted {
        generation,
        characteristic: uuid,
        result: Ok(value.to_le_bytes().to_vec()),
    })
}

// =============================================================================
// Rotation
// =============================================================================

#[test]
fn test_queue_length_is_constant() {
    let mut scheduler = PollingScheduler::new(CommandQueue::new());
    let mut actions = scheduler.start(1, HELIOS_ORDER);
    let discovered: BTreeSet<Uuid> = HELIOS_ORDER.into_iter().collect();

    for _ in 0..100 {
        let uuid = read_target(&actions);
        actions = complete_read(&mut scheduler, 1, uuid, 1);

        assert_eq!(scheduler.queue().len(), HELIOS_ORDER.len());
        let current: BTreeSet<Uuid> = scheduler.queue().iter().map(|c| c.uuid).collect();
        assert_eq!(current, discovered);
    }
}

#[test]
fn test_round_robin_fairness() {
    let mut scheduler = PollingScheduler::new(CommandQueue::new());
    let mut actions = scheduler.start(1, HELIOS_ORDER);

    // Two full passes: each pass services every slot once, in discovery order.
    for _ in 0..2 {
        let mut serviced = Vec::new();
        for _ in 0..HELIOS_ORDER.len() {
            let uuid = read_target(&actions);
            serviced.push(uuid);
            actions = complete_read(&mut scheduler, 1, uuid, 1);
        }
        assert_eq!(serviced, HELIOS_ORDER);
    }
    assert_eq!(scheduler.stats().rotations, 2);
}

#[test]
fn test_duplicate_characteristics_are_dropped() {
    let mut scheduler = PollingScheduler::new(CommandQueue::new());
    scheduler.start(1, [READING_A, READING_B, READING_A]);
    assert_eq!(scheduler.queue().len(), 2);
}

// =============================================================================
// Decoding
// =============================================================================

#[test]
fn test_identifier_convention() {
    assert_eq!(
        FieldTag::from_identifier("6E400005-B5A3-F393-E0A9-E50E24DCCA9E"),
        FieldTag::ReadingD
    );
    assert_eq!(
        FieldTag::from_identifier("6e400007-b5a3-f393-e0a9-e50e24dcca9e"),
        FieldTag::PowerCommand
    );
    assert_eq!(
        FieldTag::from_identifier("6e40000f-b5a3-f393-e0a9-e50e24dcca9e"),
        FieldTag::Unknown
    );
}

#[test]
fn test_unknown_field_occupies_slot_without_update() {
    let unknown: Uuid = "6e40000f-b5a3-f393-e0a9-e50e24dcca9e".parse().unwrap();
    let mut scheduler = PollingScheduler::new(CommandQueue::new());
    let actions = scheduler.start(1, [unknown, READING_A]);
    assert_eq!(read_target(&actions), unknown);

    let actions = complete_read(&mut scheduler, 1, unknown, 9);
    assert!(!actions.iter().any(|a| matches!(a, SchedulerAction::Emit(_))));
    assert_eq!(read_target(&actions), READING_A);
    assert_eq!(scheduler.queue().len(), 2);
}

// =============================================================================
// Commands
// =============================================================================

#[test]
fn test_command_write_replaces_read() {
    let commands = CommandQueue::new();
    commands.request_command(FieldTag::PowerCommand).unwrap();
    let mut scheduler = PollingScheduler::new(commands.clone());

    let actions = scheduler.start(1, [POWER_COMMAND, READING_A]);
    assert_eq!(
        actions,
        vec![SchedulerAction::Write {
            generation: 1,
            characteristic: POWER_COMMAND,
            value: vec![0x01],
        }]
    );

    let actions = scheduler.handle(SchedulerEvent::WriteCompleted {
        generation: 1,
        characteristic: POWER_COMMAND,
        result: Ok(()),
    });
    // No update and no read for the written slot.
    assert_eq!(
        actions,
        vec![SchedulerAction::Read {
            generation: 1,
            characteristic: READING_A,
        }]
    );
    assert!(!commands.is_pending(FieldTag::PowerCommand));
}

#[test]
fn test_command_during_read_waits_for_next_turn() {
    let commands = CommandQueue::new();
    let mut scheduler = PollingScheduler::new(commands.clone());
    let actions = scheduler.start(1, [POWER_COMMAND, READING_A]);
    assert_eq!(read_target(&actions), POWER_COMMAND);

    commands.request_command(FieldTag::PowerCommand).unwrap();
    let actions = complete_read(&mut scheduler, 1, POWER_COMMAND, 0);
    assert_eq!(read_target(&actions), READING_A);

    let actions = complete_read(&mut scheduler, 1, READING_A, 5);
    assert!(matches!(
        operation(&actions),
        SchedulerAction::Write { characteristic, .. } if *characteristic == POWER_COMMAND
    ));
}

#[tokio::test(start_paused = true)]
async fn test_latest_command_wins() {
    let panel = slow_panel();
    let session = Arc::new(PanelSession::new(Arc::clone(&panel), options()));
    session.request_command(FieldTag::PowerCommand).unwrap();
    session.request_command(FieldTag::PowerCommand).unwrap();
    let mut rx = session.subscribe();

    let runner = Arc::clone(&session);
    let task = tokio::spawn(async move { runner.run_once().await });
    for _ in 0..(HELIOS_ORDER.len() * 2) {
        next_update(&mut rx).await;
    }
    session.shutdown().await.unwrap();
    task.await.unwrap().unwrap();

    assert_eq!(panel.writes(), vec![(POWER_COMMAND, vec![0x01])]);
}

#[tokio::test(start_paused = true)]
async fn test_command_before_session_is_consumed() {
    let commands = CommandQueue::new();
    commands.request_command(FieldTag::SearchCommand).unwrap();

    let panel = slow_panel();
    let session = Arc::new(PanelSession::with_commands(
        Arc::clone(&panel),
        options(),
        commands.clone(),
    ));
    let mut rx = session.subscribe();

    let runner = Arc::clone(&session);
    let task = tokio::spawn(async move { runner.run_once().await });
    // SearchCommand is last; the pass is complete once ReadingA comes round again.
    for _ in 0..HELIOS_ORDER.len() {
        next_update(&mut rx).await;
    }
    session.shutdown().await.unwrap();
    task.await.unwrap().unwrap();

    assert_eq!(panel.writes(), vec![(SEARCH_COMMAND, vec![0x01])]);
    assert!(!panel.ops().contains(&MockOp::Read(SEARCH_COMMAND)));
    assert!(!commands.is_pending(FieldTag::SearchCommand));
}

#[tokio::test(start_paused = true)]
async fn test_failed_write_is_retried_next_rotation() {
    let panel = slow_panel();
    panel.fail_writes(POWER_COMMAND, 1);
    let session = Arc::new(PanelSession::new(Arc::clone(&panel), options()));
    session.request_command(FieldTag::PowerCommand).unwrap();
    let mut rx = session.subscribe();

    let runner = Arc::clone(&session);
    let task = tokio::spawn(async move { runner.run_once().await });
    for _ in 0..(HELIOS_ORDER.len() * 2) {
        next_update(&mut rx).await;
    }
    session.shutdown().await.unwrap();
    task.await.unwrap().unwrap();

    assert_eq!(panel.writes().len(), 2);
    assert_eq!(session.stats().write_failures, 1);
    assert_eq!(session.stats().writes, 1);
}

// =============================================================================
// Failures and link loss
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_read_failure_skips_slot() {
    let panel = slow_panel();
    panel.fail_reads(READING_B, 1);
    let session = Arc::new(PanelSession::new(Arc::clone(&panel), options()));
    let mut rx = session.subscribe();

    let runner = Arc::clone(&session);
    let task = tokio::spawn(async move { runner.run_once().await });

    assert_eq!(next_update(&mut rx).await.field, FieldTag::ReadingA);
    assert_eq!(next_update(&mut rx).await.field, FieldTag::ReadingC);

    session.shutdown().await.unwrap();
    task.await.unwrap().unwrap();
    assert_eq!(session.stats().read_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_operation_timeout_counts_as_failure() {
    let panel = Arc::new(MockPanel::helios());
    panel.set_op_latency(Duration::from_secs(5));
    let session = Arc::new(PanelSession::new(
        Arc::clone(&panel),
        options().operation_timeout(Duration::from_secs(1)),
    ));

    let runner = Arc::clone(&session);
    let task = tokio::spawn(async move { runner.run_once().await });
    tokio::time::sleep(Duration::from_millis(3500)).await;
    session.shutdown().await.unwrap();
    task.await.unwrap().unwrap();

    let stats = session.stats();
    assert_eq!(stats.reads, 0);
    assert_eq!(stats.read_failures, 3);
}

#[test]
fn test_late_completion_after_link_loss_is_discarded() {
    let mut scheduler = PollingScheduler::new(CommandQueue::new());
    let actions = scheduler.start(1, HELIOS_ORDER);
    assert_eq!(read_target(&actions), READING_A);

    scheduler.handle(SchedulerEvent::LinkLost { generation: 1 });
    assert_eq!(
        scheduler.state(),
        SchedulerState::DisconnectedPendingCleanup { generation: 1 }
    );

    let actions = complete_read(&mut scheduler, 1, READING_A, 42);
    assert!(actions.is_empty());
    assert_eq!(scheduler.stats().reads, 0);
    assert_eq!(scheduler.stats().stale_discarded, 1);

    scheduler.teardown();
    assert_eq!(scheduler.state(), SchedulerState::Idle);

    // A new generation starts from the head, not where the old one stopped.
    let actions = scheduler.start(2, HELIOS_ORDER);
    assert_eq!(read_target(&actions), READING_A);
    let actions = complete_read(&mut scheduler, 1, READING_A, 42);
    assert!(actions.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_mid_read_rebuilds_on_reconnect() {
    let panel = slow_panel();
    // The third read (ReadingC) loses the link and completes late.
    panel.disconnect_during_op(3, Duration::from_millis(500));
    let session = Arc::new(PanelSession::new(Arc::clone(&panel), options()));
    let mut rx = session.subscribe();

    let end = {
        let runner = Arc::clone(&session);
        let task = tokio::spawn(async move { runner.run_once().await });
        assert_eq!(next_update(&mut rx).await.field, FieldTag::ReadingA);
        assert_eq!(next_update(&mut rx).await.field, FieldTag::ReadingB);
        task.await.unwrap().unwrap()
    };
    assert_eq!(end, SessionEnd::LinkLost);
    assert_eq!(session.state(), ConnectionState::Disconnected);

    // Nothing from the stale read reaches the UI.
    tokio::time::sleep(Duration::from_secs(1)).await;
    while let Ok(event) = rx.try_recv() {
        assert!(!matches!(event, PanelEvent::FieldUpdate(_)), "stale update {:?}", event);
    }

    let runner = Arc::clone(&session);
    let task = tokio::spawn(async move { runner.run_once().await });
    assert_eq!(next_update(&mut rx).await.field, FieldTag::ReadingA);
    session.shutdown().await.unwrap();
    task.await.unwrap().unwrap();

    assert_eq!(panel.discover_count(), 2);
    assert_eq!(session.generation(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_run_reconnects_after_link_loss() {
    let panel = slow_panel();
    let session = Arc::new(PanelSession::new(Arc::clone(&panel), options()));
    let mut rx = session.subscribe();

    let runner = Arc::clone(&session);
    let task = tokio::spawn(async move {
        runner
            .run(&ReconnectOptions::fixed_delay(Duration::from_millis(200)))
            .await
    });

    next_update(&mut rx).await;
    panel.trigger_disconnect();
    wait_for_state(&mut rx, ConnectionState::Disconnected, 1).await;
    wait_for_state(&mut rx, ConnectionState::Connected, 2).await;

    session.shutdown().await.unwrap();
    task.await.unwrap().unwrap();
    assert_eq!(panel.connect_count(), 2);
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_report_for_earlier_link_is_ignored() {
    let panel = slow_panel();
    let session = Arc::new(PanelSession::new(Arc::clone(&panel), options()));
    let mut rx = session.subscribe();

    let runner = Arc::clone(&session);
    let task = tokio::spawn(async move { runner.run_once().await });

    assert_eq!(next_update(&mut rx).await.field, FieldTag::ReadingA);
    panel.report_stale_disconnect();
    assert_eq!(next_update(&mut rx).await.field, FieldTag::ReadingB);
    assert_eq!(next_update(&mut rx).await.field, FieldTag::ReadingC);

    session.shutdown().await.unwrap();
    assert_eq!(task.await.unwrap().unwrap(), SessionEnd::Cancelled);
    assert_eq!(session.generation(), 1);
    assert_eq!(panel.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_report_during_connect_is_dropped() {
    let panel = slow_panel();
    panel.set_connect_latency(Duration::from_millis(100));
    let session = Arc::new(PanelSession::new(Arc::clone(&panel), options()));
    let mut rx = session.subscribe();

    let runner = Arc::clone(&session);
    let task = tokio::spawn(async move { runner.run_once().await });

    tokio::time::sleep(Duration::from_millis(10)).await;
    panel.report_stale_disconnect();
    assert_eq!(next_update(&mut rx).await.field, FieldTag::ReadingA);
    assert_eq!(next_update(&mut rx).await.field, FieldTag::ReadingB);

    session.shutdown().await.unwrap();
    assert_eq!(task.await.unwrap().unwrap(), SessionEnd::Cancelled);
    assert_eq!(session.generation(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_recovers_from_transient_connect_failures() {
    let panel = slow_panel();
    panel.set_transient_connect_failures(2);
    let session = Arc::new(PanelSession::new(Arc::clone(&panel), options()));
    let mut rx = session.subscribe();

    let runner = Arc::clone(&session);
    let task = tokio::spawn(async move {
        runner
            .run(&ReconnectOptions::default().initial_delay(Duration::from_millis(100)))
            .await
    });

    assert_eq!(next_update(&mut rx).await.field, FieldTag::ReadingA);
    session.shutdown().await.unwrap();
    task.await.unwrap().unwrap();
    assert_eq!(panel.connect_count(), 3);
}

// =============================================================================
// Notifications and concurrency
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_notifications_forwarded_when_enabled() {
    let panel = slow_panel();
    let session = Arc::new(PanelSession::new(
        Arc::clone(&panel),
        options().forward_notifications(true),
    ));
    let mut rx = session.subscribe();

    let runner = Arc::clone(&session);
    let task = tokio::spawn(async move { runner.run_once().await });
    next_update(&mut rx).await;

    panel.notify(READING_D, &[77]);
    let update = loop {
        let update = next_update(&mut rx).await;
        if update.origin == UpdateOrigin::Notification {
            break update;
        }
    };
    assert_eq!(update.field, FieldTag::ReadingD);
    assert_eq!(update.value, 77);

    session.shutdown().await.unwrap();
    task.await.unwrap().unwrap();
    assert_eq!(panel.subscribe_count(), HELIOS_ORDER.len());
}

#[tokio::test(start_paused = true)]
async fn test_single_outstanding_operation() {
    let panel = slow_panel();
    let session = Arc::new(PanelSession::new(
        Arc::clone(&panel),
        options().forward_notifications(true),
    ));
    session.request_command(FieldTag::PowerCommand).unwrap();
    let mut rx = session.subscribe();

    let runner = Arc::clone(&session);
    let task = tokio::spawn(async move { runner.run_once().await });
    for i in 0..30u8 {
        next_update(&mut rx).await;
        if i % 5 == 0 {
            panel.notify(READING_A, &[i]);
            session.request_command(FieldTag::SearchCommand).unwrap();
        }
    }
    session.shutdown().await.unwrap();
    task.await.unwrap().unwrap();

    assert_eq!(panel.max_in_flight(), 1);
}

// =============================================================================
// End to end
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_six_characteristic_panel() {
    let characteristics = [
        READING_A,
        READING_B,
        READING_C,
        READING_D,
        POWER_COMMAND,
        SEARCH_COMMAND,
    ];
    let panel = Arc::new(
        MockPanel::builder()
            .helios_characteristics(&characteristics)
            .build(),
    );
    panel.set_op_latency(Duration::from_millis(10));
    let session = Arc::new(PanelSession::new(Arc::clone(&panel), options()));
    let mut rx = session.subscribe();

    let runner = Arc::clone(&session);
    let task = tokio::spawn(async move { runner.run_once().await });
    // The search status read is silent, so ReadingA of the second pass is
    // the update after PowerCommand.
    let mut updates = Vec::new();
    for _ in 0..=5 {
        updates.push(next_update(&mut rx).await);
    }
    session.shutdown().await.unwrap();
    task.await.unwrap().unwrap();
    let next_pass = updates.pop().unwrap();
    assert_eq!(next_pass.field, FieldTag::ReadingA);

    let fields: Vec<FieldTag> = updates.iter().map(|u| u.field).collect();
    assert_eq!(
        fields,
        vec![
            FieldTag::ReadingA,
            FieldTag::ReadingB,
            FieldTag::ReadingC,
            FieldTag::ReadingD,
            FieldTag::PowerCommand,
        ]
    );
    assert!(updates.iter().all(|u| u.origin == UpdateOrigin::Poll));

    let reads: Vec<Uuid> = panel
        .ops()
        .into_iter()
        .filter_map(|op| match op {
            MockOp::Read(uuid) => Some(uuid),
            _ => None,
        })
        .take(characteristics.len())
        .collect();
    assert_eq!(reads, characteristics);
    assert!(panel.writes().is_empty());
}
