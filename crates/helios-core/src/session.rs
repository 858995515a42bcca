//! The session driver.
//!
//! [`PanelSession`] runs the whole lifecycle for one panel: connect through
//! the [`ConnectionManager`], resolve the target service, enable
//! notifications, then feed the [`PollingScheduler`] and execute the single
//! GATT operation it asks for. Decoded values and connection changes are
//! published on an [`EventDispatcher`].
//!
//! A session ends when the link drops, when a fatal error occurs, or when
//! [`PanelSession::shutdown`] is called. [`PanelSession::run`] supervises
//! sessions and starts a fresh one after each loss, with backoff.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use helios_core::{MockPanel, PanelSession, ReconnectOptions, SessionOptions};
//! use helios_types::FieldTag;
//!
//! # async fn example() -> helios_core::Result<()> {
//! let session = Arc::new(PanelSession::new(
//!     Arc::new(MockPanel::helios()),
//!     SessionOptions::default(),
//! ));
//! let mut events = session.subscribe();
//!
//! let runner = Arc::clone(&session);
//! tokio::spawn(async move { runner.run(&ReconnectOptions::default()).await });
//!
//! session.request_command(FieldTag::PowerCommand)?;
//! while let Ok(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use helios_types::{ConnectionState, FieldTag};

use crate::commands::CommandQueue;
use crate::connection::{ConnectionEvents, ConnectionManager, DisconnectReason};
use crate::error::{Error, Result};
use crate::events::{EventDispatcher, EventReceiver, PanelEvent};
use crate::heartbeat::Heartbeat;
use crate::reconnect::ReconnectOptions;
use crate::resolver::{ServiceResolver, ServiceSelector};
use crate::scheduler::{
    PollingScheduler, SchedulerAction, SchedulerEvent, SessionStats, StatsCounters,
};
use crate::subscriber::NotificationSubscriber;
use crate::traits::{LinkEvent, PanelLink};

/// Options for a [`PanelSession`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// How the target service is picked after discovery.
    pub service: ServiceSelector,
    /// Bound on each read or write. A timeout counts as a failed operation.
    pub operation_timeout: Option<Duration>,
    /// Publish notification values as field updates.
    pub forward_notifications: bool,
    /// Period of the liveness heartbeat; `None` disables it.
    pub heartbeat_interval: Option<Duration>,
    /// Capacity of the event channel.
    pub event_buffer: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            service: ServiceSelector::default(),
            operation_timeout: None,
            forward_notifications: false,
            heartbeat_interval: Some(Duration::from_secs(1)),
            event_buffer: 64,
        }
    }
}

impl SessionOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the service selector.
    pub fn service(mut self, service: ServiceSelector) -> Self {
        self.service = service;
        self
    }

    /// Bound every read and write.
    pub fn operation_timeout(mut self, limit: Duration) -> Self {
        self.operation_timeout = Some(limit);
        self
    }

    /// Enable or disable forwarding of notification values.
    pub fn forward_notifications(mut self, forward: bool) -> Self {
        self.forward_notifications = forward;
        self
    }

    /// Set the heartbeat period, or disable it with `None`.
    pub fn heartbeat_interval(mut self, period: Option<Duration>) -> Self {
        self.heartbeat_interval = period;
        self
    }

    /// Set the event channel capacity.
    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }
}

/// How a session that reached `Connected` ended without a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// [`PanelSession::shutdown`] was called.
    Cancelled,
    /// The platform dropped the link.
    LinkLost,
}

/// A GATT operation the scheduler asked for.
#[derive(Debug)]
enum Operation {
    Read {
        generation: u64,
        characteristic: Uuid,
    },
    Write {
        generation: u64,
        characteristic: Uuid,
        value: Vec<u8>,
    },
}

async fn bounded<T, F>(limit: Option<Duration>, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(duration) => timeout(duration, fut)
            .await
            .map_err(|_| Error::timeout(operation, duration))?,
        None => fut.await,
    }
}

async fn perform<L: PanelLink + ?Sized>(
    link: &L,
    operation: Option<Operation>,
    limit: Option<Duration>,
) -> SchedulerEvent {
    match operation {
        Some(Operation::Read {
            generation,
            characteristic,
        }) => SchedulerEvent::ReadCompleted {
            generation,
            characteristic,
            result: bounded(limit, "read", link.read(characteristic)).await,
        },
        Some(Operation::Write {
            generation,
            characteristic,
            value,
        }) => SchedulerEvent::WriteCompleted {
            generation,
            characteristic,
            result: bounded(limit, "write", link.write(characteristic, &value)).await,
        },
        // Nothing to poll; only link events or cancellation end the wait.
        None => std::future::pending().await,
    }
}

/// Whether a completed operation shows the link is already gone.
fn reveals_link_loss(event: &SchedulerEvent) -> bool {
    let failed = match event {
        SchedulerEvent::ReadCompleted { result, .. } => result.as_ref().err(),
        SchedulerEvent::WriteCompleted { result, .. } => result.as_ref().err(),
        _ => None,
    };
    matches!(failed, Some(Error::NotConnected | Error::LinkLost))
}

/// Drop link events queued before the current link came up.
fn drain_stale(events: &mut broadcast::Receiver<LinkEvent>) {
    let mut dropped = 0usize;
    loop {
        match events.try_recv() {
            Ok(_) | Err(TryRecvError::Lagged(_)) => dropped += 1,
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
    if dropped > 0 {
        debug!(dropped, "Dropped link events from before connect");
    }
}

/// A `Disconnected` report only counts while the link agrees it is down.
///
/// The platform can report the loss of an earlier link after the next one
/// is already up.
async fn confirms_link_loss<L: PanelLink>(link: &L) -> bool {
    if link.is_connected().await {
        debug!("Ignoring disconnect report for an earlier link");
        false
    } else {
        true
    }
}

async fn wait_for_link_loss<L: PanelLink>(
    link: &L,
    events: &mut broadcast::Receiver<LinkEvent>,
) -> Error {
    loop {
        match events.recv().await {
            Ok(LinkEvent::Disconnected) => {
                if confirms_link_loss(link).await {
                    return Error::LinkLost;
                }
            }
            Err(RecvError::Closed) => return Error::LinkLost,
            Ok(LinkEvent::Notification { .. }) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!("Link event stream lagged, skipped {} events", skipped);
            }
        }
    }
}

/// Drives polling sessions against one panel.
pub struct PanelSession<L: PanelLink + 'static> {
    connection: Arc<ConnectionManager<L>>,
    resolver: ServiceResolver,
    subscriber: NotificationSubscriber,
    commands: CommandQueue,
    events: EventDispatcher,
    scheduler: Mutex<PollingScheduler>,
    stats: Arc<StatsCounters>,
    options: SessionOptions,
    cancel_token: CancellationToken,
}

impl<L: PanelLink + 'static> PanelSession<L> {
    /// Create a session driver for `link`. Nothing happens until
    /// [`run`](Self::run) or [`run_once`](Self::run_once) is called.
    pub fn new(link: Arc<L>, options: SessionOptions) -> Self {
        Self::with_commands(link, options, CommandQueue::new())
    }

    /// Like [`new`](Self::new), sharing an existing command queue.
    pub fn with_commands(link: Arc<L>, options: SessionOptions, commands: CommandQueue) -> Self {
        let events = EventDispatcher::new(options.event_buffer);
        let connection = Arc::new(ConnectionManager::new(link).with_events(events.clone()));
        let scheduler = PollingScheduler::new(commands.clone())
            .with_notifications(options.forward_notifications);
        let stats = scheduler.stats_handle();

        Self {
            connection,
            resolver: ServiceResolver::new(options.service),
            subscriber: NotificationSubscriber::new(),
            commands,
            events,
            scheduler: Mutex::new(scheduler),
            stats,
            options,
            cancel_token: CancellationToken::new(),
        }
    }

    /// The panel link.
    pub fn link(&self) -> &Arc<L> {
        self.connection.link()
    }

    /// The connection manager.
    pub fn connection(&self) -> &Arc<ConnectionManager<L>> {
        &self.connection
    }

    /// The options in use.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Handle for posting commands from any task.
    pub fn commands(&self) -> CommandQueue {
        self.commands.clone()
    }

    /// Ask for a command to be sent to a writable field.
    pub fn request_command(&self, field: FieldTag) -> Result<()> {
        self.commands.request_command(field)
    }

    /// Subscribe to UI events.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// The event dispatcher.
    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Subscribe to raw connection state transitions.
    pub fn connection_events(&self) -> ConnectionEvents {
        self.connection.subscribe()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Current session generation.
    pub fn generation(&self) -> u64 {
        self.connection.generation()
    }

    /// Counters accumulated over every session so far.
    pub fn stats(&self) -> SessionStats {
        self.stats.snapshot()
    }

    /// Token cancelled by [`shutdown`](Self::shutdown).
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Run one session: connect, discover, subscribe, then poll until the
    /// link drops or the session is shut down.
    ///
    /// Connect failures and fatal session errors are returned as errors; in
    /// every case the connection ends `Disconnected`.
    #[tracing::instrument(level = "info", skip(self), fields(address = %self.link().address()))]
    pub async fn run_once(&self) -> Result<SessionEnd> {
        // Held for the whole session so at most one runs at a time.
        let mut scheduler = self.scheduler.lock().await;
        if self.cancel_token.is_cancelled() {
            return Ok(SessionEnd::Cancelled);
        }

        let mut link_events = self.link().link_events();
        let connected = tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => None,
            result = self.connection.connect() => Some(result),
        };
        match connected {
            None => {
                self.release(DisconnectReason::Requested).await;
                return Ok(SessionEnd::Cancelled);
            }
            Some(Err(e)) => {
                self.events.send(PanelEvent::Error {
                    message: e.to_string(),
                });
                return Err(e);
            }
            Some(Ok(_)) => {}
        }
        drain_stale(&mut link_events);

        let generation = self.connection.generation();
        info!(generation, "Session started");

        let end = self.drive(&mut scheduler, generation, &mut link_events).await;
        scheduler.teardown();
        self.subscriber.reset();

        let stats = self.stats.snapshot();
        info!(
            generation,
            reads = stats.reads,
            writes = stats.writes,
            failures = stats.failures(),
            rotations = stats.rotations,
            stale = stats.stale_discarded,
            "Session ended: {}",
            end
        );

        match end {
            Error::Cancelled => {
                self.release(DisconnectReason::Requested).await;
                Ok(SessionEnd::Cancelled)
            }
            Error::LinkLost => {
                self.connection.mark_link_lost(generation);
                Ok(SessionEnd::LinkLost)
            }
            e => {
                self.events.send(PanelEvent::Error {
                    message: e.to_string(),
                });
                self.release(DisconnectReason::SessionFailed(e.to_string()))
                    .await;
                Err(e)
            }
        }
    }

    /// Run sessions until shut down, reconnecting per `reconnect`.
    ///
    /// Returns `Ok(())` after [`shutdown`](Self::shutdown), or the last error
    /// once `reconnect` gives up.
    pub async fn run(&self, reconnect: &ReconnectOptions) -> Result<()> {
        reconnect.validate()?;

        let _heartbeat = self.options.heartbeat_interval.map(|period| {
            Heartbeat::spawn(
                Arc::clone(&self.connection),
                self.events.clone(),
                period,
                &self.cancel_token,
            )
        });

        let mut failures: u32 = 0;
        loop {
            let error = match self.run_once().await {
                Ok(SessionEnd::Cancelled) => return Ok(()),
                Ok(SessionEnd::LinkLost) => {
                    // A session that got going resets the failure streak.
                    failures = 0;
                    Error::LinkLost
                }
                Err(e) => e,
            };

            if reconnect.is_terminal(&error) {
                warn!(error = %error, "Session failed, not reconnecting");
                return Err(error);
            }

            failures = failures.saturating_add(1);
            if !reconnect.allows_attempt(failures) {
                warn!(failures, error = %error, "Giving up reconnecting");
                return Err(error);
            }

            let delay = reconnect.delay_for_attempt(failures - 1);
            info!(attempt = failures, ?delay, error = %error, "Reconnecting");

            tokio::select! {
                _ = self.cancel_token.cancelled() => return Ok(()),
                _ = sleep(delay) => {}
            }
        }
    }

    /// Stop the running session and disconnect.
    ///
    /// Idempotent. Returns once the session has torn down; the connection is
    /// `Disconnected` afterwards. The session cannot be started again.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.cancel_token.is_cancelled() {
            info!("Shutting down session");
            self.cancel_token.cancel();
        }
        // Wait for a running session to finish tearing down.
        let _scheduler = self.scheduler.lock().await;
        self.connection
            .disconnect_with(DisconnectReason::Requested)
            .await
    }

    async fn release(&self, reason: DisconnectReason) {
        if let Err(e) = self.connection.disconnect_with(reason).await {
            warn!(error = %e, "Disconnect after session failed");
        }
    }

    /// Publish emitted values and return the operation to run next, if any.
    fn publish(&self, actions: Vec<SchedulerAction>) -> Option<Operation> {
        let mut next = None;
        for action in actions {
            match action {
                SchedulerAction::Emit(update) => self.events.send(PanelEvent::FieldUpdate(update)),
                SchedulerAction::Read {
                    generation,
                    characteristic,
                } => {
                    next = Some(Operation::Read {
                        generation,
                        characteristic,
                    })
                }
                SchedulerAction::Write {
                    generation,
                    characteristic,
                    value,
                } => {
                    next = Some(Operation::Write {
                        generation,
                        characteristic,
                        value,
                    })
                }
            }
        }
        next
    }

    /// Run one connected session to its end and return why it ended.
    async fn drive(
        &self,
        scheduler: &mut PollingScheduler,
        generation: u64,
        link_events: &mut broadcast::Receiver<LinkEvent>,
    ) -> Error {
        let link = Arc::clone(self.link());

        let resolved = tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => return Error::Cancelled,
            lost = wait_for_link_loss(link.as_ref(), link_events) => return lost,
            result = self.resolver.discover(link.as_ref()) => match result {
                Ok(resolved) => resolved,
                Err(Error::NotConnected) => return Error::LinkLost,
                Err(e) => return e,
            },
        };

        let report = tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => return Error::Cancelled,
            lost = wait_for_link_loss(link.as_ref(), link_events) => return lost,
            result = self.subscriber.subscribe(link.as_ref(), generation, &resolved.characteristics) => {
                match result {
                    Ok(report) => report,
                    Err(Error::NotConnected) => return Error::LinkLost,
                    Err(e) => return e,
                }
            }
        };
        debug!(
            enabled = report.enabled.len(),
            refused = report.refused.len(),
            "Subscriptions in place"
        );

        let mut actions = scheduler.start(generation, resolved.characteristics);
        loop {
            let operation = self.publish(actions);
            let completion = perform(link.as_ref(), operation, self.options.operation_timeout);
            tokio::pin!(completion);

            actions = loop {
                tokio::select! {
                    biased;
                    _ = self.cancel_token.cancelled() => return Error::Cancelled,
                    event = link_events.recv() => match event {
                        Ok(LinkEvent::Disconnected) => {
                            if confirms_link_loss(link.as_ref()).await {
                                scheduler.handle(SchedulerEvent::LinkLost { generation });
                                return Error::LinkLost;
                            }
                        }
                        Err(RecvError::Closed) => {
                            scheduler.handle(SchedulerEvent::LinkLost { generation });
                            return Error::LinkLost;
                        }
                        Ok(LinkEvent::Notification { characteristic, value }) => {
                            let emitted = scheduler.handle(SchedulerEvent::Notification {
                                generation,
                                characteristic,
                                value,
                            });
                            let extra = self.publish(emitted);
                            debug_assert!(extra.is_none(), "notification must not issue an operation");
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Link event stream lagged, skipped {} events", skipped);
                        }
                    },
                    event = &mut completion => {
                        if reveals_link_loss(&event) {
                            scheduler.handle(SchedulerEvent::LinkLost { generation });
                            return Error::LinkLost;
                        }
                        break scheduler.handle(event);
                    }
                }
            };
        }
    }
}

impl<L: PanelLink + 'static> std::fmt::Debug for PanelSession<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanelSession")
            .field("connection", &self.connection)
            .field("options", &self.options)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}
