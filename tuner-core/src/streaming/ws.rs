//! WebSocket transport built on the `ws` crate.
//!
//! Every connection attempt gets its own event-loop thread. The thread ends
//! when the socket closes, after reporting the close exactly once.
//! `wss://` URLs are served through the crate's OpenSSL support.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use tracing::{debug, warn};
use ws::{CloseCode, Handler, Handshake, Message};

use super::{Connector, LinkEvents, Transport};
use crate::error::TunerError;

/// Opens WebSocket client connections on background threads.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, url: &str, events: LinkEvents) -> Result<(), TunerError> {
        let url = url.to_string();
        thread::Builder::new()
            .name("tuner-ws".to_string())
            .spawn(move || run_connection(&url, events))
            .map(|_| ())
            .map_err(|e| TunerError::Transport(e.to_string()))
    }
}

/// What the handler saw before the event loop ended.
#[derive(Default)]
struct Outcome {
    opened: bool,
    reason: Option<String>,
}

fn run_connection(url: &str, events: LinkEvents) {
    let outcome = Arc::new(Mutex::new(Outcome::default()));
    let result = ws::connect(url, |out| LinkHandler {
        out,
        events: events.clone(),
        outcome: Arc::clone(&outcome),
    });

    let outcome = std::mem::take(&mut *outcome.lock().unwrap_or_else(PoisonError::into_inner));
    let reason = match (result, outcome) {
        (Err(e), _) => describe(&e),
        (Ok(()), Outcome { reason: Some(reason), .. }) => reason,
        (Ok(()), Outcome { opened: true, .. }) => "connection closed".to_string(),
        (Ok(()), Outcome { opened: false, .. }) => format!("could not connect to {url}"),
    };
    events.closed(reason);
}

/// Readable reason for a `ws` error. Its `Display` hides I/O causes.
fn describe(err: &ws::Error) -> String {
    match &err.kind {
        ws::ErrorKind::Io(e) if err.details.is_empty() => e.to_string(),
        ws::ErrorKind::Io(e) => format!("{}: {e}", err.details),
        kind if err.details.is_empty() => format!("{kind:?}"),
        kind => format!("{kind:?}: {}", err.details),
    }
}

struct LinkHandler {
    out: ws::Sender,
    events: LinkEvents,
    outcome: Arc<Mutex<Outcome>>,
}

impl LinkHandler {
    fn record(&self, reason: String) {
        let mut outcome = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        // The first reason wins; errors are usually followed by a close.
        outcome.reason.get_or_insert(reason);
    }
}

impl Handler for LinkHandler {
    fn on_open(&mut self, _shake: Handshake) -> ws::Result<()> {
        self.outcome.lock().unwrap_or_else(PoisonError::into_inner).opened = true;
        self.events.opened(Box::new(WsTransport { out: self.out.clone() }));
        Ok(())
    }

    fn on_message(&mut self, msg: Message) -> ws::Result<()> {
        match msg {
            Message::Text(text) => self.events.message(&text),
            Message::Binary(data) => debug!(bytes = data.len(), "ignoring binary frame"),
        }
        Ok(())
    }

    fn on_close(&mut self, code: CloseCode, reason: &str) {
        debug!(?code, reason, "websocket closing");
        self.record(format!("closed by server ({code:?}) {reason}").trim_end().to_string());
    }

    fn on_error(&mut self, err: ws::Error) {
        let reason = describe(&err);
        warn!(error = %reason, "websocket error");
        self.record(reason);
    }
}

/// Sending half of an open WebSocket.
pub struct WsTransport {
    out: ws::Sender,
}

impl Transport for WsTransport {
    fn send_text(&mut self, text: String) -> Result<(), TunerError> {
        self.out
            .send(text)
            .map_err(|e| TunerError::Transport(describe(&e)))
    }

    fn close(&mut self) {
        if let Err(e) = self.out.close(CloseCode::Normal) {
            debug!(error = %describe(&e), "error closing websocket");
        }
    }
}
