//! In-memory transport for exercising the channel manager.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use url::Url;

use crate::error::{Error, Result};

use super::{Connector, EventSender, Transport, TransportEvent};

/// One transport handed out by [`MockConnector`].
#[derive(Clone)]
pub(crate) struct MockLink {
    pub endpoint: Url,
    pub auth: Option<Value>,
    events: EventSender,
    emitted: Arc<Mutex<Vec<(String, Option<Value>)>>>,
    disconnected: Arc<Mutex<bool>>,
}

impl MockLink {
    /// Plays an event as if the socket produced it.
    pub fn push(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    /// Plays a server `message` payload.
    pub fn message(&self, payload: Value) {
        self.push(TransportEvent::Message(payload));
    }

    /// Returns everything emitted through this link.
    pub fn emitted(&self) -> Vec<(String, Option<Value>)> {
        self.emitted.lock().clone()
    }

    /// Returns how many times `event` was emitted.
    pub fn emitted_count(&self, event: &str) -> usize {
        self.emitted.lock().iter().filter(|(name, _)| name == event).count()
    }

    /// Returns `true` once the owner closed the link.
    pub fn is_disconnected(&self) -> bool {
        *self.disconnected.lock()
    }
}

struct MockTransport {
    emitted: Arc<Mutex<Vec<(String, Option<Value>)>>>,
    disconnected: Arc<Mutex<bool>>,
}

impl Transport for MockTransport {
    fn emit(&self, event: &str, payload: Option<Value>) -> Result<()> {
        if *self.disconnected.lock() {
            return Err(Error::ConnectionClosed);
        }
        self.emitted.lock().push((event.to_owned(), payload));
        Ok(())
    }

    fn disconnect(&self) {
        *self.disconnected.lock() = true;
    }
}

/// Connector that records every open and never touches the network.
#[derive(Clone, Default)]
pub(crate) struct MockConnector {
    links: Arc<Mutex<Vec<MockLink>>>,
}

impl MockConnector {
    /// Number of transports opened so far.
    pub fn open_count(&self) -> usize {
        self.links.lock().len()
    }

    /// Returns the `index`-th opened link.
    pub fn link(&self, index: usize) -> MockLink {
        self.links.lock()[index].clone()
    }

    /// Returns the most recently opened link.
    pub fn last(&self) -> MockLink {
        self.links
            .lock()
            .last()
            .cloned()
            .expect("no transport opened yet")
    }
}

impl Connector for MockConnector {
    fn open(&self, endpoint: &Url, auth: Option<Value>, events: EventSender) -> Box<dyn Transport> {
        let emitted = Arc::new(Mutex::new(Vec::new()));
        let disconnected = Arc::new(Mutex::new(false));

        self.links.lock().push(MockLink {
            endpoint: endpoint.clone(),
            auth,
            events,
            emitted: Arc::clone(&emitted),
            disconnected: Arc::clone(&disconnected),
        });

        Box::new(MockTransport {
            emitted,
            disconnected,
        })
    }
}
