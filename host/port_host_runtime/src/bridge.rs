//! Maps outbound application ports onto host side effects.

use crate::clipboard::{Clipboard, ClipboardError};
use crate::session::{KeyValueStore, SessionStore, StoreError};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Port {
    StoreSession,
    ClearSession,
    ClearSessionAndRestart,
    CopyToClipboard,
}

impl Port {
    pub const ALL: [Port; 4] = [
        Port::StoreSession,
        Port::ClearSession,
        Port::ClearSessionAndRestart,
        Port::CopyToClipboard,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Port::StoreSession => "storeSession",
            Port::ClearSession => "clearSession",
            Port::ClearSessionAndRestart => "clearSessionAndRestart",
            Port::CopyToClipboard => "copyToClipboard",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|port| port.name() == name)
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the run loop should do after a message has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Reload,
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("port '{port}' failed to update storage: {source}")]
    Store {
        port: Port,
        #[source]
        source: StoreError,
    },
    #[error("port '{port}' failed to write clipboard: {source}")]
    Clipboard {
        port: Port,
        #[source]
        source: ClipboardError,
    },
    #[error("port '{port}' expected {expected}, got {actual}")]
    InvalidPayload {
        port: Port,
        expected: &'static str,
        actual: String,
    },
}

pub struct PortBridge<S, C> {
    subscriptions: BTreeMap<String, Port>,
    sessions: SessionStore<S>,
    clipboard: C,
}

impl<S: KeyValueStore, C: Clipboard> PortBridge<S, C> {
    /// Subscribes to every advertised port the host knows how to serve.
    /// Unknown names are skipped.
    pub fn attach<'a>(
        advertised: impl IntoIterator<Item = &'a str>,
        sessions: SessionStore<S>,
        clipboard: C,
    ) -> Self {
        let mut subscriptions = BTreeMap::new();

        for name in advertised {
            match Port::from_name(name) {
                Some(port) => {
                    subscriptions.insert(name.to_string(), port);
                }
                None => debug!(port = name, "application port has no host handler; skipping"),
            }
        }

        info!(
            ports = ?subscriptions.keys().collect::<Vec<_>>(),
            "attached port subscriptions"
        );

        Self {
            subscriptions,
            sessions,
            clipboard,
        }
    }

    pub fn is_subscribed(&self, port: Port) -> bool {
        self.subscriptions.contains_key(port.name())
    }

    pub fn sessions(&self) -> &SessionStore<S> {
        &self.sessions
    }

    /// Runs the side effect for one message. Messages on ports that were not
    /// subscribed are ignored.
    pub fn dispatch(&self, name: &str, value: Value) -> Result<Flow, BridgeError> {
        let Some(&port) = self.subscriptions.get(name) else {
            debug!(port = name, "message on unsubscribed port ignored");
            return Ok(Flow::Continue);
        };

        let store_err = |source: StoreError| BridgeError::Store { port, source };

        match port {
            Port::StoreSession => {
                self.sessions.store(&value).map_err(store_err)?;
                Ok(Flow::Continue)
            }
            Port::ClearSession => {
                self.sessions.clear().map_err(store_err)?;
                Ok(Flow::Continue)
            }
            Port::ClearSessionAndRestart => {
                // Reload is only signalled once the clear has gone through.
                self.sessions.clear().map_err(store_err)?;
                info!("session cleared; reloading host");
                Ok(Flow::Reload)
            }
            Port::CopyToClipboard => {
                let text = match value {
                    Value::String(text) => text,
                    other => {
                        return Err(BridgeError::InvalidPayload {
                            port,
                            expected: "string",
                            actual: json_kind(&other).to_string(),
                        });
                    }
                };
                self.clipboard
                    .set_text(&text)
                    .map_err(|source| BridgeError::Clipboard { port, source })?;
                Ok(Flow::Continue)
            }
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
