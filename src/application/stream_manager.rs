// Stream connection manager - keeps one live feed in step with viewing params
use crate::application::connection_pool::{ConnectionId, ConnectionPool};
use crate::application::debouncer::{ReconnectDebouncer, Ticket};
use crate::application::feed_key::{FeedKey, FeedRequest, build_key};
use crate::application::live_transport::{
    ConnectionHandle, LiveTransport, TransportEvent, TransportSession,
};
use crate::application::live_view::{LiveSnapshot, LiveView};
use crate::domain::error::StreamError;
use crate::domain::params::{AddressingParams, ControlParams};
use crate::domain::reading::Reading;
use crate::infrastructure::config::StreamSettings;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

/// What consumers see on the data channel.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Emitted right after a new connection opens; drop buffered data.
    Reset,
    Reading(Reading),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerState {
    Idle,
    /// Not connected yet, waiting on either a scheduled reconnect or the
    /// caller: params still incomplete, or the last attempt failed. Only
    /// `ManagerStatus::reconnect_pending` says whether a timer is running.
    Pending,
    Connected,
    Paused,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerStatus {
    pub state: ManagerState,
    pub key: Option<String>,
    pub connected_since: Option<DateTime<Utc>>,
    pub open_connections: usize,
    pub reconnect_pending: bool,
}

impl ManagerStatus {
    fn closed() -> Self {
        Self {
            state: ManagerState::Closed,
            key: None,
            connected_since: None,
            open_connections: 0,
            reconnect_pending: false,
        }
    }
}

/// Receiving end of the data channel.
///
/// A subscriber that falls further behind than the channel capacity may have
/// missed a `Reset`, so the gap is reported as a `Reset` of its own. Readings
/// after it are never older than the ones skipped.
pub struct LiveSubscription {
    events: broadcast::Receiver<StreamEvent>,
}

impl LiveSubscription {
    /// `None` once the manager is gone. Cancel safe.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        match self.events.recv().await {
            Ok(event) => Some(event),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Live subscriber lagged, {} events skipped, resetting", skipped);
                Some(StreamEvent::Reset)
            }
            Err(RecvError::Closed) => None,
        }
    }
}

enum Command {
    UpdateParams(AddressingParams),
    UpdateControls(ControlParams),
    Fire(Ticket),
    Inbound {
        id: ConnectionId,
        event: TransportEvent,
    },
    Pause(oneshot::Sender<()>),
    Resume(oneshot::Sender<()>),
    Teardown(oneshot::Sender<()>),
    Status(oneshot::Sender<ManagerStatus>),
    Snapshot(oneshot::Sender<LiveSnapshot>),
}

/// Handle to a running manager task. Cheap to clone; every clone drives the
/// same feed and observes the same data and error channels.
///
/// All state lives in one task that processes commands in arrival order, so
/// no two operations ever interleave. Methods that return after a reply
/// (`pause`, `resume`, `teardown`) have fully taken effect when they return.
#[derive(Clone)]
pub struct StreamConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    data: broadcast::Sender<StreamEvent>,
    errors: broadcast::Sender<StreamError>,
}

impl StreamConnectionManager {
    /// Starts the manager task. Must be called from within a tokio runtime.
    pub fn spawn(transport: Arc<dyn LiveTransport>, settings: &StreamSettings) -> Self {
        let (commands, inbox) = mpsc::unbounded_channel();
        let capacity = settings.channel_capacity.max(1);
        let (data, _) = broadcast::channel(capacity);
        let (errors, _) = broadcast::channel(capacity);

        let actor = ManagerActor {
            transport,
            base_url: settings.base_url.clone(),
            addressing: AddressingParams::default(),
            controls: ControlParams::default(),
            state: ManagerState::Idle,
            active: None,
            pool: ConnectionPool::new(settings.max_connections),
            debouncer: ReconnectDebouncer::new(Duration::from_millis(settings.debounce_ms)),
            view: LiveView::new(settings.series_window),
            data: data.clone(),
            errors: errors.clone(),
            commands: commands.downgrade(),
        };
        tokio::spawn(actor.run(inbox));

        Self {
            commands,
            data,
            errors,
        }
    }

    /// Replaces the addressing params wholesale and schedules a reconnect.
    pub fn update_params(&self, addressing: AddressingParams) {
        self.send(Command::UpdateParams(addressing));
    }

    /// Merges control params field by field and schedules a reconnect.
    pub fn update_controls(&self, controls: ControlParams) {
        self.send(Command::UpdateControls(controls));
    }

    pub async fn pause(&self) -> Result<(), StreamError> {
        self.request(Command::Pause).await
    }

    pub async fn resume(&self) -> Result<(), StreamError> {
        self.request(Command::Resume).await
    }

    /// Releases every connection. Later calls on any clone are no-ops.
    pub async fn teardown(&self) {
        let _ = self.request(Command::Teardown).await;
    }

    pub async fn status(&self) -> ManagerStatus {
        self.request(Command::Status)
            .await
            .unwrap_or_else(|_| ManagerStatus::closed())
    }

    pub async fn snapshot(&self) -> Result<LiveSnapshot, StreamError> {
        self.request(Command::Snapshot).await
    }

    pub fn subscribe(&self) -> LiveSubscription {
        LiveSubscription {
            events: self.data.subscribe(),
        }
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<StreamError> {
        self.errors.subscribe()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("Stream manager is closed, ignoring command");
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, StreamError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| StreamError::Closed)?;
        response.await.map_err(|_| StreamError::Closed)
    }
}

struct ManagerActor {
    transport: Arc<dyn LiveTransport>,
    base_url: String,
    addressing: AddressingParams,
    controls: ControlParams,
    state: ManagerState,
    active: Option<(FeedKey, ConnectionId)>,
    pool: ConnectionPool,
    debouncer: ReconnectDebouncer,
    view: LiveView,
    data: broadcast::Sender<StreamEvent>,
    errors: broadcast::Sender<StreamError>,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl ManagerActor {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = inbox.recv().await {
            match command {
                Command::UpdateParams(addressing) => self.update_params(addressing),
                Command::UpdateControls(controls) => self.update_controls(controls),
                Command::Fire(ticket) => {
                    if self.debouncer.claim(ticket) {
                        self.connect();
                    }
                }
                Command::Inbound { id, event } => self.handle_inbound(id, event),
                Command::Pause(reply) => {
                    self.pause();
                    let _ = reply.send(());
                }
                Command::Resume(reply) => {
                    self.resume();
                    let _ = reply.send(());
                }
                Command::Status(reply) => {
                    let _ = reply.send(self.status());
                }
                Command::Snapshot(reply) => {
                    let _ = reply.send(self.view.snapshot());
                }
                Command::Teardown(reply) => {
                    self.teardown();
                    let _ = reply.send(());
                    break;
                }
            }
        }

        // every handle dropped without an explicit teardown
        self.teardown();
    }

    fn update_params(&mut self, addressing: AddressingParams) {
        tracing::debug!(old = ?self.addressing, new = ?addressing, "updateParams");
        self.addressing = addressing;
        self.schedule_connect();
    }

    fn update_controls(&mut self, controls: ControlParams) {
        tracing::debug!(old = ?self.controls, incoming = ?controls, "updateControls");
        self.controls.merge(controls);
        self.schedule_connect();
    }

    fn schedule_connect(&mut self) {
        match build_key(&self.addressing, &self.controls) {
            Some(key) => tracing::debug!("Reconnect scheduled for {}", key),
            None => tracing::debug!("Reconnect scheduled, params incomplete"),
        }
        let commands = self.commands.clone();
        self.debouncer.schedule(move |ticket| {
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(Command::Fire(ticket));
            }
        });
        self.state = ManagerState::Pending;
    }

    fn connect(&mut self) {
        let request = match FeedRequest::resolve(&self.addressing, &self.controls) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!("Cannot build feed key yet ({}): {:?}", e, self.addressing);
                self.state = if self.active.is_some() {
                    ManagerState::Connected
                } else if self.addressing == AddressingParams::default() {
                    ManagerState::Idle
                } else {
                    ManagerState::Pending
                };
                return;
            }
        };

        let key = request.key();
        if let Some((active_key, _)) = &self.active {
            if *active_key == key && self.pool.contains(&key) {
                tracing::debug!("Feed key unchanged, skipping reconnect: {}", key);
                self.state = ManagerState::Connected;
                return;
            }
        }

        if let Some((previous, _)) = self.active.take() {
            self.pool.close(&previous);
        }

        let url = request.url(&self.base_url, Some(Utc::now().timestamp_millis()));
        tracing::info!("Opening live feed {}", url);

        let transport = self.transport.clone();
        let commands = self.commands.clone();
        let opened = self.pool.open(
            key.clone(),
            |id| -> anyhow::Result<Box<dyn ConnectionHandle>> {
                let session = transport.open(&url)?;
                Ok(Box::new(ForwardingHandle::spawn(id, session, commands)))
            },
        );

        match opened {
            Ok(id) => {
                self.active = Some((key, id));
                self.state = ManagerState::Connected;
                self.view.clear();
                let _ = self.data.send(StreamEvent::Reset);
            }
            Err(e) => {
                tracing::warn!("Failed to open live feed {}: {:#}", key, e);
                self.state = ManagerState::Pending;
                self.emit_error(StreamError::ConnectFailure {
                    key: key.to_string(),
                    reason: format!("{:#}", e),
                });
            }
        }
    }

    fn handle_inbound(&mut self, id: ConnectionId, event: TransportEvent) {
        let Some((key, active_id)) = &self.active else {
            tracing::debug!("Dropping event from {}, no active feed", id);
            return;
        };
        if *active_id != id {
            tracing::debug!("Dropping late event from {}", id);
            return;
        }

        match event {
            TransportEvent::Opened => tracing::debug!("Live feed {} is open", key),
            TransportEvent::Message(payload) => match Reading::from_json(&payload) {
                Ok(reading) => {
                    if !self.view.apply(&reading) {
                        tracing::debug!(
                            "Dropping {} reading with unparseable time {:?}",
                            reading.kind(),
                            reading.time()
                        );
                        return;
                    }
                    let _ = self.data.send(StreamEvent::Reading(reading));
                }
                Err(e) => tracing::debug!("Dropping payload from {}: {}", key, e),
            },
            TransportEvent::Error(reason) => {
                let key = key.clone();
                tracing::warn!("Live feed {} failed: {}", key, reason);
                self.pool.close(&key);
                self.active = None;
                self.state = ManagerState::Pending;
                self.emit_error(StreamError::TransportError {
                    key: key.to_string(),
                    reason,
                });
            }
        }
    }

    fn pause(&mut self) {
        if matches!(self.state, ManagerState::Paused | ManagerState::Closed) {
            return;
        }
        self.debouncer.cancel();
        if let Some((key, _)) = self.active.take() {
            self.pool.close(&key);
        }
        self.state = ManagerState::Paused;
        tracing::info!("Live feed paused");
    }

    fn resume(&mut self) {
        if self.state == ManagerState::Connected {
            tracing::debug!("Live feed already connected, nothing to resume");
            return;
        }
        tracing::info!("Resuming live feed");
        self.schedule_connect();
    }

    fn teardown(&mut self) {
        if self.state == ManagerState::Closed {
            return;
        }
        self.debouncer.cancel();
        if !self.pool.is_empty() {
            self.pool.close_all();
        }
        self.active = None;
        self.view.clear();
        self.state = ManagerState::Closed;
        tracing::info!("Stream manager torn down");
    }

    fn status(&self) -> ManagerStatus {
        let active_key = self.active.as_ref().map(|(key, _)| key);
        ManagerStatus {
            state: self.state,
            key: active_key.map(|key| key.as_str().to_string()),
            connected_since: active_key
                .and_then(|key| self.pool.get(key))
                .map(|connection| connection.opened_at),
            open_connections: self.pool.len(),
            reconnect_pending: self.debouncer.is_pending(),
        }
    }

    fn emit_error(&self, error: StreamError) {
        // no subscribers is fine; the error is already logged
        let _ = self.errors.send(error);
    }
}

/// Wraps a transport handle with the task that relays its events to the
/// manager, tagged with the connection id they belong to.
struct ForwardingHandle {
    inner: Box<dyn ConnectionHandle>,
    relay: JoinHandle<()>,
}

impl ForwardingHandle {
    fn spawn(
        id: ConnectionId,
        session: TransportSession,
        commands: mpsc::WeakUnboundedSender<Command>,
    ) -> Self {
        let TransportSession { handle, mut events } = session;
        let relay = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if !deliver(&commands, id, event) {
                    return;
                }
            }
            deliver(
                &commands,
                id,
                TransportEvent::Error("live feed ended".to_string()),
            );
        });
        Self {
            inner: handle,
            relay,
        }
    }
}

impl ConnectionHandle for ForwardingHandle {
    fn close(&mut self) {
        self.relay.abort();
        self.inner.close();
    }
}

fn deliver(
    commands: &mpsc::WeakUnboundedSender<Command>,
    id: ConnectionId,
    event: TransportEvent,
) -> bool {
    commands
        .upgrade()
        .is_some_and(|commands| commands.send(Command::Inbound { id, event }).is_ok())
}
