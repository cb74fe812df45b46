pub mod app;
pub mod bridge;
pub mod clipboard;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;

use crate::app::{AppHost, Application, ApplicationInstance};
use crate::bridge::{Flow, PortBridge};
use serde_json::Value;
use tracing::{error, info, warn};

pub use crate::app::{PortMessage, ProcessApplication, StreamInstance};
pub use crate::bridge::{BridgeError, Port};
pub use crate::clipboard::{Clipboard, ClipboardError, SystemClipboard};
pub use crate::config::{InitPayload, Profile, Registry, resolve};
pub use crate::error::{HostError, Result};
pub use crate::protocol::{
    APP_TO_HOST_CAP, AppEnvelope, HOST_TO_APP_CAP, HostEnvelope, MAX_SESSION_BYTES,
};
pub use crate::session::{FileStore, KeyValueStore, MemoryStore, SessionStore, StoreError};
pub use serde_json;

/// How a host run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostExit {
    /// The application closed its output.
    Closed,
    /// The application asked for the session to be cleared and the host
    /// restarted. The caller must replace the process.
    Reload,
}

/// Resolves the init flags, starts the application and services its ports
/// until it goes away or asks for a reload.
pub fn run<A, S, C>(
    application: A,
    profile: &Profile,
    registry: &Registry,
    store: S,
    clipboard: C,
) -> Result<HostExit>
where
    A: Application,
    S: KeyValueStore,
    C: Clipboard,
{
    let sessions = SessionStore::new(store);
    let payload = fit_init_frame(resolve(profile, registry, &sessions));
    info!(
        profile = %profile.name,
        endpoints = ?payload.endpoints,
        has_session = !payload.session.is_null(),
        seeded = payload.seed.is_some(),
        "resolved init payload"
    );

    let mut host = AppHost::start(application, &payload)?;
    let bridge = PortBridge::attach(
        host.instance().ports().iter().map(String::as_str),
        sessions,
        clipboard,
    );

    pump(host.instance_mut(), &bridge)
}

/// Drops the session when the init envelope would not fit in one frame, so an
/// oversized stored session can never block startup.
fn fit_init_frame(mut payload: InitPayload) -> InitPayload {
    match protocol::init_fits(&payload) {
        Ok(true) => return payload,
        Ok(false) => warn!("stored session does not fit in the init frame; starting without it"),
        Err(err) => warn!("failed to encode init payload, starting without session: {err}"),
    }
    payload.session = Value::Null;
    payload
}

fn pump<I, S, C>(instance: &mut I, bridge: &PortBridge<S, C>) -> Result<HostExit>
where
    I: ApplicationInstance,
    S: KeyValueStore,
    C: Clipboard,
{
    while let Some(message) = instance.next_message()? {
        match bridge.dispatch(&message.port, message.value) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Reload) => return Ok(HostExit::Reload),
            Err(err) => error!("{err}"),
        }
    }

    info!("application closed its port stream");
    Ok(HostExit::Closed)
}

/// Reads `PORT_HOST_MAX_FRAME`, falling back to [`APP_TO_HOST_CAP`].
pub fn max_frame_from_env() -> usize {
    std::env::var("PORT_HOST_MAX_FRAME")
        .ok()
        .and_then(|raw| raw.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(APP_TO_HOST_CAP)
}
