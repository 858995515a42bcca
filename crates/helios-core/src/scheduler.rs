//! Round-robin polling of the panel's characteristics.
//!
//! [`PollingScheduler`] is a pure state machine: the session driver feeds it
//! [`SchedulerEvent`]s (operation completions, notifications, link loss) and
//! executes the [`SchedulerAction`]s it returns. It never touches the radio
//! itself, which keeps the single-outstanding-operation rule in one place and
//! lets every transition be tested without a link.
//!
//! # Rotation
//!
//! The queue holds every characteristic of the target service exactly once,
//! in discovery order. Each completed operation moves the head to the tail
//! and issues the next operation for the new head. When a writable field is
//! at the head and has a pending command, the command is written instead of
//! reading the field for that turn.
//!
//! # Generations
//!
//! Every started session carries the generation the connection manager
//! assigned to it. Events from any other generation, or completions that do
//! not match the operation in flight, are counted and dropped.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use helios_types::{FieldTag, FieldUpdate, decode_value, encode_command};

use crate::commands::CommandQueue;
use crate::error::Error;

/// One slot in the polling rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Field derived from the UUID at discovery time.
    pub field: FieldTag,
    /// Last value decoded for this slot in the current session.
    pub last_value: Option<i8>,
}

impl Characteristic {
    /// Describe a discovered characteristic.
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            field: FieldTag::from_uuid(&uuid),
            last_value: None,
        }
    }
}

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No session.
    Idle,
    /// A read of the head characteristic is outstanding.
    AwaitingRead {
        /// Session generation.
        generation: u64,
        /// Characteristic being read.
        characteristic: Uuid,
    },
    /// A command write to the head characteristic is outstanding.
    AwaitingWrite {
        /// Session generation.
        generation: u64,
        /// Characteristic being written.
        characteristic: Uuid,
        /// Value taken from the command queue.
        value: u8,
    },
    /// The link was lost; waiting for [`PollingScheduler::teardown`].
    DisconnectedPendingCleanup {
        /// Generation of the session that was lost.
        generation: u64,
    },
}

impl SchedulerState {
    /// Generation of the session this state belongs to.
    pub fn generation(&self) -> Option<u64> {
        match self {
            Self::Idle => None,
            Self::AwaitingRead { generation, .. }
            | Self::AwaitingWrite { generation, .. }
            | Self::DisconnectedPendingCleanup { generation } => Some(*generation),
        }
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::AwaitingRead { .. } => write!(f, "AwaitingRead"),
            Self::AwaitingWrite { .. } => write!(f, "AwaitingWrite"),
            Self::DisconnectedPendingCleanup { .. } => write!(f, "DisconnectedPendingCleanup"),
        }
    }
}

/// Input to the scheduler.
#[derive(Debug)]
pub enum SchedulerEvent {
    /// A read issued by [`SchedulerAction::Read`] finished.
    ReadCompleted {
        /// Generation the read was issued under.
        generation: u64,
        /// Characteristic that was read.
        characteristic: Uuid,
        /// Raw value or failure.
        result: Result<Vec<u8>, Error>,
    },
    /// A write issued by [`SchedulerAction::Write`] finished.
    WriteCompleted {
        /// Generation the write was issued under.
        generation: u64,
        /// Characteristic that was written.
        characteristic: Uuid,
        /// Success or failure.
        result: Result<(), Error>,
    },
    /// An unsolicited notification arrived.
    Notification {
        /// Generation the notification was received under.
        generation: u64,
        /// Characteristic that changed.
        characteristic: Uuid,
        /// Raw value.
        value: Vec<u8>,
    },
    /// The link dropped.
    LinkLost {
        /// Generation that was lost.
        generation: u64,
    },
}

/// Work the session driver must carry out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerAction {
    /// Read one characteristic.
    Read {
        /// Generation to tag the completion with.
        generation: u64,
        /// Characteristic to read.
        characteristic: Uuid,
    },
    /// Write one characteristic.
    Write {
        /// Generation to tag the completion with.
        generation: u64,
        /// Characteristic to write.
        characteristic: Uuid,
        /// Encoded value.
        value: Vec<u8>,
    },
    /// Deliver a decoded value to the UI.
    Emit(FieldUpdate),
}

/// Snapshot of session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Completed successful reads.
    pub reads: u64,
    /// Completed successful writes.
    pub writes: u64,
    /// Failed reads absorbed by the rotation.
    pub read_failures: u64,
    /// Failed writes absorbed by the rotation.
    pub write_failures: u64,
    /// Full passes over the queue.
    pub rotations: u64,
    /// Notifications forwarded as field updates.
    pub notifications: u64,
    /// Completions or notifications dropped as stale.
    pub stale_discarded: u64,
}

impl SessionStats {
    /// Operation-level failures absorbed so far.
    pub fn failures(&self) -> u64 {
        self.read_failures + self.write_failures
    }
}

/// Thread-safe counters behind [`SessionStats`].
#[derive(Debug, Default)]
pub struct StatsCounters {
    reads: AtomicU64,
    writes: AtomicU64,
    read_failures: AtomicU64,
    write_failures: AtomicU64,
    rotations: AtomicU64,
    notifications: AtomicU64,
    stale_discarded: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of the current counters.
    pub fn snapshot(&self) -> SessionStats {
        SessionStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            notifications: self.notifications.load(Ordering::Relaxed),
            stale_discarded: self.stale_discarded.load(Ordering::Relaxed),
        }
    }
}

/// The polling state machine.
#[derive(Debug)]
pub struct PollingScheduler {
    state: SchedulerState,
    queue: VecDeque<Characteristic>,
    commands: CommandQueue,
    forward_notifications: bool,
    steps: usize,
    stats: Arc<StatsCounters>,
}

impl PollingScheduler {
    /// Create an idle scheduler that consumes commands from `commands`.
    pub fn new(commands: CommandQueue) -> Self {
        Self {
            state: SchedulerState::Idle,
            queue: VecDeque::new(),
            commands,
            forward_notifications: false,
            steps: 0,
            stats: Arc::new(StatsCounters::default()),
        }
    }

    /// Report unsolicited notifications as field updates.
    pub fn with_notifications(mut self, forward: bool) -> Self {
        self.forward_notifications = forward;
        self
    }

    /// Current state.
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// The rotation, head first.
    pub fn queue(&self) -> &VecDeque<Characteristic> {
        &self.queue
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> SessionStats {
        self.stats.snapshot()
    }

    /// Shared handle to the counters.
    pub fn stats_handle(&self) -> Arc<StatsCounters> {
        Arc::clone(&self.stats)
    }

    /// Begin polling a freshly resolved service.
    ///
    /// Any previous session is discarded. The queue is built in one step from
    /// `characteristics`, dropping repeated UUIDs, and the first operation for
    /// the head is returned. An empty service leaves the scheduler idle.
    pub fn start(
        &mut self,
        generation: u64,
        characteristics: impl IntoIterator<Item = Uuid>,
    ) -> Vec<SchedulerAction> {
        let mut queue: VecDeque<Characteristic> = VecDeque::new();
        for uuid in characteristics {
            if queue.iter().any(|c| c.uuid == uuid) {
                warn!(%uuid, "Characteristic reported twice, keeping first");
                continue;
            }
            queue.push_back(Characteristic::new(uuid));
        }

        self.queue = queue;
        self.steps = 0;
        self.state = SchedulerState::Idle;

        if self.queue.is_empty() {
            warn!(generation, "Target service has no characteristics, nothing to poll");
            return Vec::new();
        }

        debug!(
            generation,
            slots = self.queue.len(),
            "Polling started"
        );
        self.issue_head(generation).into_iter().collect()
    }

    /// Discard the session and return to [`SchedulerState::Idle`].
    pub fn teardown(&mut self) {
        if self.state != SchedulerState::Idle {
            debug!(state = %self.state, "Scheduler torn down");
        }
        self.state = SchedulerState::Idle;
        self.queue.clear();
        self.steps = 0;
    }

    /// Feed one event and collect the resulting actions.
    pub fn handle(&mut self, event: SchedulerEvent) -> Vec<SchedulerAction> {
        match event {
            SchedulerEvent::ReadCompleted {
                generation,
                characteristic,
                result,
            } => self.on_read(generation, characteristic, result),
            SchedulerEvent::WriteCompleted {
                generation,
                characteristic,
                result,
            } => self.on_write(generation, characteristic, result),
            SchedulerEvent::Notification {
                generation,
                characteristic,
                value,
            } => self.on_notification(generation, characteristic, &value),
            SchedulerEvent::LinkLost { generation } => {
                self.on_link_lost(generation);
                Vec::new()
            }
        }
    }

    fn discard(&self, what: &str, generation: u64, characteristic: Option<Uuid>) {
        StatsCounters::bump(&self.stats.stale_discarded);
        trace!(
            what,
            generation,
            ?characteristic,
            state = %self.state,
            "Discarding stale event"
        );
    }

    fn on_read(
        &mut self,
        generation: u64,
        characteristic: Uuid,
        result: Result<Vec<u8>, Error>,
    ) -> Vec<SchedulerAction> {
        let expected = SchedulerState::AwaitingRead {
            generation,
            characteristic,
        };
        if self.state != expected {
            self.discard("read", generation, Some(characteristic));
            return Vec::new();
        }

        let mut actions = Vec::with_capacity(2);
        let decoded = result.and_then(|bytes| decode_value(&bytes).map_err(Error::from));
        if let Some(head) = self.queue.front_mut() {
            match decoded {
                Ok(value) => {
                    StatsCounters::bump(&self.stats.reads);
                    head.last_value = Some(value);
                    if head.field.is_reported() {
                        actions.push(SchedulerAction::Emit(FieldUpdate::polled(head.field, value)));
                    } else {
                        trace!(field = %head.field, uuid = %head.uuid, value, "Read kept, not reported");
                    }
                    if head.field.is_writable() && self.commands.is_pending(head.field) {
                        debug!(
                            field = %head.field,
                            "Command arrived during read, writing on next turn"
                        );
                    }
                }
                Err(e) => {
                    StatsCounters::bump(&self.stats.read_failures);
                    warn!(field = %head.field, uuid = %head.uuid, error = %e, "Read failed, skipping slot");
                }
            }
        }

        actions.extend(self.advance(generation));
        actions
    }

    fn on_write(
        &mut self,
        generation: u64,
        characteristic: Uuid,
        result: Result<(), Error>,
    ) -> Vec<SchedulerAction> {
        let value = match self.state {
            SchedulerState::AwaitingWrite {
                generation: g,
                characteristic: c,
                value,
            } if g == generation && c == characteristic => value,
            _ => {
                self.discard("write", generation, Some(characteristic));
                return Vec::new();
            }
        };

        if let Some(head) = self.queue.front() {
            match result {
                Ok(()) => {
                    StatsCounters::bump(&self.stats.writes);
                    debug!(field = %head.field, value, "Command written");
                }
                Err(e) => {
                    StatsCounters::bump(&self.stats.write_failures);
                    let restored = self.commands.restore(head.field, value);
                    warn!(
                        field = %head.field,
                        error = %e,
                        restored,
                        "Write failed, skipping slot"
                    );
                }
            }
        }

        self.advance(generation).into_iter().collect()
    }

    fn on_notification(
        &mut self,
        generation: u64,
        characteristic: Uuid,
        value: &[u8],
    ) -> Vec<SchedulerAction> {
        if !self.is_live(generation) {
            self.discard("notification", generation, Some(characteristic));
            return Vec::new();
        }
        if !self.forward_notifications {
            trace!(%characteristic, "Notification ignored");
            return Vec::new();
        }

        let Some(slot) = self.queue.iter_mut().find(|c| c.uuid == characteristic) else {
            debug!(%characteristic, "Notification for characteristic outside the service");
            return Vec::new();
        };
        match decode_value(value) {
            Ok(decoded) => {
                slot.last_value = Some(decoded);
                if !slot.field.is_reported() {
                    return Vec::new();
                }
                StatsCounters::bump(&self.stats.notifications);
                vec![SchedulerAction::Emit(FieldUpdate::notified(slot.field, decoded))]
            }
            Err(e) => {
                debug!(field = %slot.field, error = %e, "Undecodable notification");
                Vec::new()
            }
        }
    }

    fn on_link_lost(&mut self, generation: u64) {
        match self.state {
            SchedulerState::AwaitingRead { generation: g, .. }
            | SchedulerState::AwaitingWrite { generation: g, .. }
                if g == generation =>
            {
                if let SchedulerState::AwaitingWrite { value, .. } = self.state
                    && let Some(head) = self.queue.front()
                {
                    // The write may not have reached the panel.
                    self.commands.restore(head.field, value);
                }
                debug!(generation, state = %self.state, "Link lost mid-operation");
                self.state = SchedulerState::DisconnectedPendingCleanup { generation };
            }
            _ => self.discard("link lost", generation, None),
        }
    }

    fn is_live(&self, generation: u64) -> bool {
        matches!(
            self.state,
            SchedulerState::AwaitingRead { generation: g, .. }
                | SchedulerState::AwaitingWrite { generation: g, .. }
                if g == generation
        )
    }

    /// Rotate the head to the tail and issue the next operation.
    fn advance(&mut self, generation: u64) -> Option<SchedulerAction> {
        self.queue.rotate_left(1);
        self.steps += 1;
        if self.steps == self.queue.len() {
            self.steps = 0;
            StatsCounters::bump(&self.stats.rotations);
        }
        self.issue_head(generation)
    }

    fn issue_head(&mut self, generation: u64) -> Option<SchedulerAction> {
        let Some(head) = self.queue.front() else {
            self.state = SchedulerState::Idle;
            return None;
        };
        let characteristic = head.uuid;

        if head.field.is_writable()
            && let Some(value) = self.commands.take_if_pending(head.field)
        {
            trace!(field = %head.field, value, "Issuing command write");
            self.state = SchedulerState::AwaitingWrite {
                generation,
                characteristic,
                value,
            };
            return Some(SchedulerAction::Write {
                generation,
                characteristic,
                value: encode_command(value).to_vec(),
            });
        }

        trace!(field = %head.field, "Issuing read");
        self.state = SchedulerState::AwaitingRead {
            generation,
            characteristic,
        };
        Some(SchedulerAction::Read {
            generation,
            characteristic,
        })
    }
}
