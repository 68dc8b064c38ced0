//! # Streaming Module
//!
//! Keeps one logical connection to the note-mapping service, sends accepted
//! pitch estimates and collects the enriched events coming back.
//!
//! Estimates are a live stream: anything sent while the link is down is
//! dropped and counted, never queued for replay. When the link closes, a
//! single reconnection attempt is scheduled after [`RECONNECT_DELAY`]; an
//! explicit [`StreamingClient::close`] cancels it.

pub mod messages;
pub mod ws;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{debug, info, trace, warn};

use crate::config::RECONNECT_DELAY;
use crate::error::TunerError;
use crate::pitch::PitchEstimate;
use crate::scheduler::PitchSink;

pub use messages::{InboundMessage, InboundPitchEvent, OutboundMessage};

/// Inbound events buffered for a slow consumer before new ones are dropped.
const EVENT_QUEUE: usize = 256;

/// An open connection able to carry text frames.
pub trait Transport: Send {
    fn send_text(&mut self, text: String) -> Result<(), TunerError>;
    fn close(&mut self);
}

/// Opens connections without blocking the caller.
///
/// The outcome is reported through the [`LinkEvents`] handle: `opened` once
/// the handshake completes, `message` for each text frame, and exactly one
/// `closed` when the connection ends or fails to open.
pub trait Connector: Send + Sync {
    fn connect(&self, url: &str, events: LinkEvents) -> Result<(), TunerError>;
}

/// Runs a task once after a delay.
pub trait ReconnectTimer: Send + Sync {
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce() + Send>);
}

/// Sleeps on a short-lived thread, then runs the task.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadTimer;

impl ReconnectTimer for ThreadTimer {
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce() + Send>) {
        let spawned = thread::Builder::new()
            .name("tuner-reconnect".to_string())
            .spawn(move || {
                thread::sleep(delay);
                task();
            });
        if let Err(e) = spawned {
            warn!(error = %e, "could not start reconnect timer");
        }
    }
}

/// Observable state of the link.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionSnapshot {
    pub connected: bool,
    pub last_error: Option<String>,
    pub reconnect_pending: bool,
    pub sent: u64,
    pub dropped: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkPhase {
    Disconnected,
    Connecting,
    Open,
}

struct LinkState {
    /// Bumped for every connection attempt and on teardown. Callbacks from
    /// older connections carry a stale generation and are ignored.
    generation: u64,
    phase: LinkPhase,
    transport: Option<Box<dyn Transport>>,
    last_error: Option<String>,
    reconnect_pending: bool,
    /// Bumped on teardown so timers armed before it are disarmed.
    teardowns: u64,
    shut_down: bool,
    sent: u64,
    dropped: u64,
    latest: Option<InboundPitchEvent>,
}

struct Shared {
    url: String,
    connector: Box<dyn Connector>,
    timer: Box<dyn ReconnectTimer>,
    state: Mutex<LinkState>,
    events_tx: Sender<InboundPitchEvent>,
    events_rx: Receiver<InboundPitchEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Callback handle given to a [`Connector`] for one connection attempt.
#[derive(Clone)]
pub struct LinkEvents {
    shared: Weak<Shared>,
    generation: u64,
}

impl LinkEvents {
    pub fn opened(&self, transport: Box<dyn Transport>) {
        if let Some(shared) = self.shared.upgrade() {
            StreamingClient { shared }.handle_opened(self.generation, transport);
        }
    }

    pub fn message(&self, text: &str) {
        if let Some(shared) = self.shared.upgrade() {
            StreamingClient { shared }.handle_message(self.generation, text);
        }
    }

    pub fn closed(&self, reason: impl Into<String>) {
        if let Some(shared) = self.shared.upgrade() {
            StreamingClient { shared }.handle_closed(self.generation, reason.into());
        }
    }
}

/// Client side of the link to the note-mapping service.
///
/// Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct StreamingClient {
    shared: Arc<Shared>,
}

impl StreamingClient {
    pub fn new(
        url: impl Into<String>,
        connector: impl Connector + 'static,
        timer: impl ReconnectTimer + 'static,
    ) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::bounded(EVENT_QUEUE);
        let state = LinkState {
            generation: 0,
            phase: LinkPhase::Disconnected,
            transport: None,
            last_error: None,
            reconnect_pending: false,
            teardowns: 0,
            shut_down: false,
            sent: 0,
            dropped: 0,
            latest: None,
        };
        Self {
            shared: Arc::new(Shared {
                url: url.into(),
                connector: Box::new(connector),
                timer: Box::new(timer),
                state: Mutex::new(state),
                events_tx,
                events_rx,
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Opens a new connection, replacing any existing one.
    pub fn connect(&self) {
        let (generation, old) = {
            let mut state = self.shared.lock();
            state.shut_down = false;
            state.generation += 1;
            state.phase = LinkPhase::Connecting;
            (state.generation, state.transport.take())
        };
        // Closed outside the lock: a transport may report its close inline
        if let Some(mut old) = old {
            old.close();
        }

        info!(url = %self.shared.url, "connecting to note service");
        let events = LinkEvents { shared: Arc::downgrade(&self.shared), generation };
        if let Err(e) = self.shared.connector.connect(&self.shared.url, events) {
            self.handle_closed(generation, e.to_string());
        }
    }

    /// Tears the link down for good; no reconnection follows.
    pub fn close(&self) {
        let transport = {
            let mut state = self.shared.lock();
            state.shut_down = true;
            state.reconnect_pending = false;
            state.teardowns += 1;
            state.generation += 1;
            state.phase = LinkPhase::Disconnected;
            state.transport.take()
        };
        if let Some(mut transport) = transport {
            transport.close();
        }
        info!("note service link closed");
    }

    /// Sends one estimate, or drops it when the link is not open.
    pub fn send(&self, estimate: &PitchEstimate) {
        self.transmit(&OutboundMessage::from(estimate));
    }

    /// Sends a keepalive ping. Returns whether it went out.
    pub fn ping(&self) -> bool {
        self.transmit(&OutboundMessage::Ping)
    }

    fn transmit(&self, message: &OutboundMessage) -> bool {
        let text = match message.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "could not encode outbound message");
                return false;
            }
        };

        let mut guard = self.shared.lock();
        let state = &mut *guard;
        let result = match (state.phase, state.transport.as_mut()) {
            (LinkPhase::Open, Some(transport)) => transport.send_text(text),
            _ => {
                state.dropped += 1;
                trace!(dropped = state.dropped, "link not open, message dropped");
                return false;
            }
        };

        match result {
            Ok(()) => {
                state.sent += 1;
                true
            }
            Err(e) => {
                state.dropped += 1;
                debug!(error = %e, "send failed, message dropped");
                false
            }
        }
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        let state = self.shared.lock();
        ConnectionSnapshot {
            connected: state.phase == LinkPhase::Open,
            last_error: state.last_error.clone(),
            reconnect_pending: state.reconnect_pending,
            sent: state.sent,
            dropped: state.dropped,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().phase == LinkPhase::Open
    }

    /// Receiver of enriched pitch events. All receivers share one queue.
    pub fn events(&self) -> Receiver<InboundPitchEvent> {
        self.shared.events_rx.clone()
    }

    /// The most recent enriched pitch event.
    pub fn latest_event(&self) -> Option<InboundPitchEvent> {
        self.shared.lock().latest.clone()
    }

    fn handle_opened(&self, generation: u64, mut transport: Box<dyn Transport>) {
        {
            let mut state = self.shared.lock();
            if !state.shut_down && state.generation == generation {
                state.phase = LinkPhase::Open;
                state.transport = Some(transport);
                state.last_error = None;
                info!("connected to note service");
                return;
            }
        }
        debug!(generation, "stale connection opened, closing it");
        transport.close();
    }

    fn handle_message(&self, generation: u64, text: &str) {
        let event = match InboundMessage::decode(text) {
            Ok(InboundMessage::PitchData(event)) => event,
            Ok(InboundMessage::Pong) => {
                debug!("pong received");
                return;
            }
            Ok(InboundMessage::Other) => {
                trace!("ignoring message of unknown type");
                return;
            }
            Err(e) => {
                warn!(error = %e, "discarding malformed message");
                return;
            }
        };

        {
            let mut state = self.shared.lock();
            if state.generation != generation {
                return;
            }
            state.latest = Some(event.clone());
        }

        if let Err(TrySendError::Full(_)) = self.shared.events_tx.try_send(event) {
            debug!("event queue full, pitch event dropped");
        }
    }

    fn handle_closed(&self, generation: u64, reason: String) {
        let teardowns = {
            let mut state = self.shared.lock();
            if state.generation != generation {
                debug!(generation, "ignoring close of a replaced connection");
                return;
            }
            state.phase = LinkPhase::Disconnected;
            state.transport = None;
            warn!(reason = %reason, "note service link lost");
            state.last_error = Some(reason);

            if state.shut_down || state.reconnect_pending {
                return;
            }
            state.reconnect_pending = true;
            state.teardowns
        };

        let shared = Arc::downgrade(&self.shared);
        self.shared.timer.schedule(
            RECONNECT_DELAY,
            Box::new(move || {
                if let Some(shared) = shared.upgrade() {
                    StreamingClient { shared }.reconnect_due(teardowns);
                }
            }),
        );
    }

    fn reconnect_due(&self, teardowns: u64) {
        {
            let mut state = self.shared.lock();
            if state.teardowns != teardowns {
                return;
            }
            state.reconnect_pending = false;
            if state.shut_down || state.phase != LinkPhase::Disconnected {
                return;
            }
        }
        info!("reconnecting to note service");
        self.connect();
    }
}

impl PitchSink for StreamingClient {
    fn publish(&self, estimate: &PitchEstimate) {
        self.send(estimate);
    }
}
