//! The single push channel shared by the chat view.
//!
//! A driver task owns the socket, the per-connection room membership and the
//! queue of joins requested while offline. Handles talk to it over a command
//! channel, so every membership decision is made on one task.

use std::{
    collections::HashSet,
    mem,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures::{SinkExt, StreamExt};
use shared::{
    domain::Room,
    protocol::{ClientEvent, HandshakeAck, ServerEvent},
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tracing::{debug, error, info, warn};

use crate::{
    error::ConnectionError,
    event_bus::{EventBus, EventFilter, EventHandler, Subscription},
    settings::ConnectionSettings,
    transport::{Connector, Credential, FrameSink, TransportPair},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// What the conversation store needs from the push channel.
pub trait RealtimeChannel: Send + Sync {
    fn join_room(&self, room: Room);
    fn leave_room(&self, room: Room);
    fn send(&self, event: ClientEvent) -> Result<(), ConnectionError>;
    fn is_connected(&self) -> bool;
    fn watch_state(&self) -> watch::Receiver<ConnectionState>;
    fn subscribe(&self, filter: EventFilter, handler: EventHandler) -> Subscription;
}

#[derive(Debug)]
enum Command {
    Join(Room),
    Leave(Room),
    Emit(ClientEvent),
    Shutdown,
}

/// Driver state that outlives a single driver task.
struct Parked {
    commands: mpsc::UnboundedReceiver<Command>,
    pending: Vec<Room>,
}

struct Shared {
    state: watch::Sender<ConnectionState>,
    bus: EventBus,
    parked: Mutex<Option<Parked>>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(?previous, ?state, "socket: state changed");
        }
    }

    fn parked(&self) -> MutexGuard<'_, Option<Parked>> {
        self.parked.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct ConnectionManager {
    settings: ConnectionSettings,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(settings: ConnectionSettings, connector: Arc<dyn Connector>) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            settings,
            connector,
            shared: Arc::new(Shared {
                state,
                bus: EventBus::new(),
                parked: Mutex::new(Some(Parked {
                    commands: receiver,
                    pending: Vec::new(),
                })),
            }),
            commands,
            driver: Mutex::new(None),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.shared.bus
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Resolves once the backend acknowledges the handshake. Calling it while
    /// connected returns immediately; calling it while a driver is already
    /// retrying waits on that driver instead of opening a second socket.
    pub async fn connect(&self, credential: Credential) -> Result<(), ConnectionError> {
        if self.is_connected() {
            debug!("socket: connect ignored, already connected");
            return Ok(());
        }
        let mut state = self.shared.state.subscribe();
        self.ensure_driver(credential)?;

        let window = self.settings.handshake_timeout;
        let outcome = timeout(window, state.wait_for(|s| *s == ConnectionState::Connected))
            .await
            .map(|waited| waited.map(|_| ()));
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ConnectionError::DriverClosed),
            Err(_) => {
                warn!(timeout = ?window, "socket: no handshake confirmation");
                Err(ConnectionError::HandshakeTimeout(window))
            }
        }
    }

    /// Stops the driver, closing the socket and forgetting queued joins.
    pub async fn disconnect(&self) {
        let driver = self.lock_driver().take();
        match driver {
            Some(task) if !task.is_finished() => {
                let _ = self.commands.send(Command::Shutdown);
                if let Err(err) = task.await {
                    warn!("socket: driver task ended abnormally: {err}");
                }
            }
            _ => {}
        }
        if let Some(parked) = self.shared.parked().as_mut() {
            while parked.commands.try_recv().is_ok() {}
            parked.pending.clear();
        }
        self.shared.set_state(ConnectionState::Disconnected);
        info!("socket: disconnected");
    }

    fn lock_driver(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.driver.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_driver(&self, credential: Credential) -> Result<(), ConnectionError> {
        let mut driver = self.lock_driver();
        if driver.as_ref().is_some_and(|task| !task.is_finished()) {
            return Ok(());
        }
        let parked = self
            .shared
            .parked()
            .take()
            .ok_or(ConnectionError::DriverClosed)?;
        info!(url = %self.settings.socket_url, "socket: starting driver");
        let task = Driver {
            shared: Arc::clone(&self.shared),
            settings: self.settings.clone(),
            connector: Arc::clone(&self.connector),
            credential,
            commands: parked.commands,
            pending: parked.pending,
            joined: HashSet::new(),
        };
        *driver = Some(tokio::spawn(task.run()));
        Ok(())
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("socket: command dropped, driver state lost");
        }
    }
}

impl RealtimeChannel for ConnectionManager {
    fn join_room(&self, room: Room) {
        self.command(Command::Join(room));
    }

    fn leave_room(&self, room: Room) {
        self.command(Command::Leave(room));
    }

    fn send(&self, event: ClientEvent) -> Result<(), ConnectionError> {
        if !self.is_connected() {
            debug!(event = event.name(), "socket: send refused while offline");
            return Err(ConnectionError::NotConnected);
        }
        self.command(Command::Emit(event));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    fn subscribe(&self, filter: EventFilter, handler: EventHandler) -> Subscription {
        self.shared
            .bus
            .subscribe(filter, move |event: &ServerEvent| handler(event))
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = self.lock_driver().take() {
            task.abort();
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Exit {
    Shutdown,
    Lost,
}

struct Driver {
    shared: Arc<Shared>,
    settings: ConnectionSettings,
    connector: Arc<dyn Connector>,
    credential: Credential,
    commands: mpsc::UnboundedReceiver<Command>,
    pending: Vec<Room>,
    joined: HashSet<Room>,
}

impl Driver {
    async fn run(mut self) {
        let mut attempt: u32 = 0;
        loop {
            self.shared.set_state(ConnectionState::Connecting);
            match self.establish().await {
                Ok(Some((transport, ack))) => {
                    attempt = 0;
                    let exit = self.serve(transport, ack).await;
                    self.joined.clear();
                    self.shared.set_state(ConnectionState::Disconnected);
                    if exit == Exit::Shutdown {
                        self.pending.clear();
                        break;
                    }
                    warn!("socket: connection lost, memberships cleared");
                }
                Ok(None) => {
                    self.pending.clear();
                    break;
                }
                Err(err) => {
                    self.shared.set_state(ConnectionState::Disconnected);
                    warn!(attempt, "socket: connection attempt failed: {err}");
                }
            }

            attempt += 1;
            if self.settings.attempts_exhausted(attempt) {
                error!(attempt, "socket: giving up after repeated failures");
                break;
            }
            if !self.idle(attempt).await {
                self.pending.clear();
                break;
            }
        }
        self.shared.set_state(ConnectionState::Disconnected);
        *self.shared.parked() = Some(Parked {
            commands: self.commands,
            pending: self.pending,
        });
    }

    /// Opens a socket and waits for `connected`. `Ok(None)` means shutdown was
    /// requested while the handshake was in flight.
    async fn establish(
        &mut self,
    ) -> Result<Option<(TransportPair, HandshakeAck)>, ConnectionError> {
        let mut transport = self
            .connector
            .open(&self.settings.socket_url, &self.credential)
            .await?;
        let handshake = sleep(self.settings.handshake_timeout);
        tokio::pin!(handshake);

        loop {
            tokio::select! {
                frame = transport.stream.next() => match frame {
                    Some(Ok(text)) => match decode_frame(&text) {
                        Some(ServerEvent::Connected(ack)) => return Ok(Some((transport, ack))),
                        Some(ServerEvent::ConnectError(notice)) => {
                            return Err(ConnectionError::Rejected(notice.message));
                        }
                        Some(event) => {
                            self.shared.bus.dispatch(&event);
                        }
                        None => {}
                    },
                    Some(Err(err)) => return Err(err.into()),
                    None => {
                        return Err(anyhow::anyhow!("socket closed before handshake").into());
                    }
                },
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => return Ok(None),
                    Some(command) => self.handle_offline(command),
                },
                _ = &mut handshake => {
                    return Err(ConnectionError::HandshakeTimeout(self.settings.handshake_timeout));
                }
            }
        }
    }

    async fn serve(&mut self, transport: TransportPair, ack: HandshakeAck) -> Exit {
        let TransportPair {
            mut sink,
            mut stream,
        } = transport;
        self.shared.set_state(ConnectionState::Connected);
        info!(socket_id = ?ack.socket_id, "socket: handshake confirmed");

        for room in mem::take(&mut self.pending) {
            if self.joined.insert(room.clone()) {
                debug!(%room, "socket: flushing queued join");
                if let Err(err) = emit(&mut sink, &ClientEvent::join(&room)).await {
                    warn!(%room, "socket: queued join failed: {err}");
                    return Exit::Lost;
                }
            }
        }
        self.shared.bus.dispatch(&ServerEvent::Connected(ack));

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let event = match command {
                        Some(Command::Join(room)) => {
                            if !self.joined.insert(room.clone()) {
                                debug!(%room, "socket: already joined");
                                continue;
                            }
                            ClientEvent::join(&room)
                        }
                        Some(Command::Leave(room)) => {
                            if !self.joined.remove(&room) {
                                debug!(%room, "socket: leave for room never joined");
                                continue;
                            }
                            ClientEvent::leave(&room)
                        }
                        Some(Command::Emit(event)) => event,
                        Some(Command::Shutdown) | None => {
                            if let Err(err) = sink.close().await {
                                debug!("socket: close failed: {err}");
                            }
                            return Exit::Shutdown;
                        }
                    };
                    if let Err(err) = emit(&mut sink, &event).await {
                        warn!(event = event.name(), "socket: emit failed: {err}");
                        return Exit::Lost;
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(text)) => {
                        if let Some(event) = decode_frame(&text) {
                            self.shared.bus.dispatch(&event);
                        }
                    }
                    Some(Err(err)) => {
                        warn!("socket: receive failed: {err}");
                        return Exit::Lost;
                    }
                    None => {
                        info!("socket: stream ended");
                        return Exit::Lost;
                    }
                },
            }
        }
    }

    /// Waits out the reconnection delay while still accepting commands.
    /// Returns false when shutdown was requested.
    async fn idle(&mut self, attempt: u32) -> bool {
        let delay = self.settings.backoff(attempt);
        debug!(attempt, ?delay, "socket: reconnecting after delay");
        let pause = sleep(delay);
        tokio::pin!(pause);
        loop {
            tokio::select! {
                _ = &mut pause => return true,
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => return false,
                    Some(command) => self.handle_offline(command),
                },
            }
        }
    }

    fn handle_offline(&mut self, command: Command) {
        match command {
            Command::Join(room) => {
                if !self.pending.contains(&room) {
                    debug!(%room, "socket: join queued until connected");
                    self.pending.push(room);
                }
            }
            Command::Leave(room) => {
                let before = self.pending.len();
                self.pending.retain(|queued| *queued != room);
                if self.pending.len() != before {
                    debug!(%room, "socket: leave cancelled queued join");
                }
            }
            Command::Emit(event) => {
                warn!(event = event.name(), "socket: dropping emit while offline");
            }
            Command::Shutdown => {}
        }
    }
}

async fn emit(sink: &mut FrameSink, event: &ClientEvent) -> anyhow::Result<()> {
    let frame = serde_json::to_string(event)?;
    sink.send(frame).await
}

fn decode_frame(text: &str) -> Option<ServerEvent> {
    match serde_json::from_str(text) {
        Ok(event) => Some(event),
        Err(err) => {
            debug!("socket: ignoring unrecognized frame: {err}");
            None
        }
    }
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
