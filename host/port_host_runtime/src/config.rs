//! Startup configuration: registry overrides, endpoint profiles and the
//! init payload handed to the application.

use crate::session::{KeyValueStore, SessionStore};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub const DEFAULT_ENDPOINT: &str = "http://localhost:3000";

/// Read-only snapshot of host-provided configuration overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    entries: BTreeMap<String, String>,
}

impl Registry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a registry from a JSON object, keeping only string properties.
    /// Anything else yields an empty registry.
    pub fn from_json(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map
                .into_iter()
                .filter_map(|(name, value)| match value {
                    Value::String(text) => Some((name, text)),
                    _ => None,
                })
                .collect(),
            Ok(_) => {
                warn!("registry document is not a JSON object; using defaults");
                Self::empty()
            }
            Err(err) => {
                warn!("registry document is not valid JSON; using defaults: {err}");
                Self::empty()
            }
        }
    }

    /// Later entries win over earlier ones.
    pub fn merged(mut self, other: Registry) -> Self {
        self.entries.extend(other.entries);
        self
    }

    /// Non-empty value for `name`, if any.
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.entries
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Registry {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSpec {
    pub name: String,
    pub default: String,
}

impl EndpointSpec {
    pub fn new(name: impl Into<String>, default: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: default.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    pub endpoints: Vec<EndpointSpec>,
    pub seed: bool,
}

impl Profile {
    /// Single `apiUrl` endpoint, no seed.
    pub fn template_editor() -> Self {
        Self {
            name: "template-editor".to_string(),
            endpoints: vec![EndpointSpec::new("apiUrl", DEFAULT_ENDPOINT)],
            seed: false,
        }
    }

    /// Backend and editor endpoints plus a per-start seed.
    pub fn integrated() -> Self {
        Self {
            name: "integrated".to_string(),
            endpoints: vec![
                EndpointSpec::new("dswApiUrl", DEFAULT_ENDPOINT),
                EndpointSpec::new("teApiUrl", DEFAULT_ENDPOINT),
            ],
            seed: true,
        }
    }
}

/// Flags passed to the application exactly once, at start.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitPayload {
    #[serde(flatten)]
    pub endpoints: BTreeMap<String, String>,
    pub session: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u32>,
}

pub fn resolve<S: KeyValueStore>(
    profile: &Profile,
    registry: &Registry,
    sessions: &SessionStore<S>,
) -> InitPayload {
    resolve_with_seed(profile, registry, sessions, rand::random::<u32>)
}

/// Like [`resolve`], drawing the seed (when the profile wants one) from
/// `draw_seed`.
pub fn resolve_with_seed<S, F>(
    profile: &Profile,
    registry: &Registry,
    sessions: &SessionStore<S>,
    draw_seed: F,
) -> InitPayload
where
    S: KeyValueStore,
    F: FnOnce() -> u32,
{
    let endpoints = profile
        .endpoints
        .iter()
        .map(|endpoint| {
            let url = match registry.lookup(&endpoint.name) {
                Some(url) => url.to_string(),
                None => {
                    debug!(name = %endpoint.name, "no registry override; using default endpoint");
                    endpoint.default.clone()
                }
            };
            (endpoint.name.clone(), url)
        })
        .collect();

    InitPayload {
        endpoints,
        session: sessions.load_session(),
        seed: profile.seed.then(draw_seed),
    }
}
