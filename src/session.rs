//
// meli - jmap sync engine
//
// Copyright 2025 Emmanouil Pitsidianakis <manos@pitsidianak.is>
//
// This file is part of meli.
//
// meli is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// meli is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with meli. If not, see <http://www.gnu.org/licenses/>.
//
// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later

//! The session resource and its resolver.
//!
//! [`SessionResolver::get`] serves the cached [`Session`] until a response
//! reports a different session state, then refetches it once. Concurrent
//! callers share the fetch in flight.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use futures::future::{FutureExt, Shared};
use indexmap::IndexMap;
use isahc::{AsyncReadResponseExt, HttpClient};
use serde_json::Value;
use url::Url;

use crate::{
    capabilities::{
        JmapCoreCapability, JmapMailCapability, JmapWebSocketCapability, REQUIRED_CAPABILITIES,
    },
    conf::JmapServerConf,
    deserialize_from_str,
    error::{Error, ErrorKind, NetworkErrorKind, Result},
    methods::RequestUrlTemplate,
    objects::{Account, Id, Object, State},
    utils::futures::ResultFuture,
};

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub capabilities: IndexMap<String, CapabilitiesObject>,
    pub accounts: IndexMap<Id<Account>, Account>,
    pub primary_accounts: IndexMap<String, Id<Account>>,
    pub username: String,
    pub api_url: Arc<Url>,
    pub download_url: RequestUrlTemplate,
    pub upload_url: RequestUrlTemplate,
    pub event_source_url: RequestUrlTemplate,
    pub state: State<Session>,
    #[serde(flatten)]
    pub extra_properties: IndexMap<String, Value>,
}

impl Object for Session {
    const NAME: &'static str = "Session";
}

impl Session {
    /// Return the account ID corresponding to the [`JmapMailCapability`]
    /// capability.
    pub fn mail_account_id(&self) -> Result<Id<Account>> {
        self.primary_accounts
            .get(JmapMailCapability::uri())
            .cloned()
            .ok_or_else(|| {
                Error::new(format!(
                    "Session of {} has no primary account for {}",
                    self.username,
                    JmapMailCapability::uri()
                ))
                .set_kind(ErrorKind::ProtocolError)
            })
    }

    pub fn core_capabilities(&self) -> CapabilitiesObject {
        self.capabilities
            .get(JmapCoreCapability::uri())
            .cloned()
            .unwrap_or_default()
    }

    /// `maxObjectsInGet`, with a floor in case the server reports `0`.
    pub fn max_objects_in_get(&self) -> u64 {
        self.core_capabilities().max_objects_in_get.max(1)
    }

    pub fn websocket(&self) -> Option<WebSocketCapabilityObject> {
        let obj = self.capabilities.get(JmapWebSocketCapability::uri())?;
        serde_json::from_value(Value::Object(
            obj.extra_properties
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ))
        .ok()
    }

    /// Fail unless the server advertises every capability the engine needs
    /// and a primary mail account.
    pub fn check_capabilities(&self) -> Result<()> {
        for uri in REQUIRED_CAPABILITIES {
            if !self.capabilities.contains_key(*uri) {
                return Err(Error::new(format!(
                    "Server session for {} does not advertise capability {}. Returned \
                     capabilities were: {}",
                    self.username,
                    uri,
                    self.capabilities
                        .keys()
                        .map(String::as_str)
                        .collect::<Vec<&str>>()
                        .join(", "),
                ))
                .set_kind(ErrorKind::ProtocolError));
            }
        }
        self.mail_account_id()?;
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitiesObject {
    #[serde(default)]
    pub max_size_upload: u64,
    #[serde(default)]
    pub max_concurrent_upload: u64,
    #[serde(default)]
    pub max_size_request: u64,
    #[serde(default)]
    pub max_concurrent_requests: u64,
    #[serde(default)]
    pub max_calls_in_request: u64,
    #[serde(default)]
    pub max_objects_in_get: u64,
    #[serde(default)]
    pub max_objects_in_set: u64,
    #[serde(default)]
    pub collation_algorithms: Vec<String>,
    #[serde(flatten)]
    pub extra_properties: IndexMap<String, Value>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketCapabilityObject {
    pub url: Url,
    #[serde(default)]
    pub supports_push: bool,
}

/// Where sessions are fetched from.
pub trait SessionSource: Send + Sync + std::fmt::Debug {
    fn fetch(&self) -> ResultFuture<Session>;

    /// Identifies the session in a [`SessionCache`].
    fn cache_key(&self) -> String;
}

/// A persistent layer in front of the [`SessionSource`].
pub trait SessionCache: Send + Sync + std::fmt::Debug {
    fn load(&self, key: &str) -> Option<Session>;
    fn store(&self, key: &str, session: &Session);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoSessionCache;

impl SessionCache for NoSessionCache {
    fn load(&self, _: &str) -> Option<Session> {
        None
    }

    fn store(&self, _: &str, _: &Session) {}
}

#[derive(Debug, Default)]
pub struct RamSessionCache {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionCache for RamSessionCache {
    fn load(&self, key: &str) -> Option<Session> {
        self.sessions.lock().unwrap().get(key).cloned()
    }

    fn store(&self, key: &str, session: &Session) {
        self.sessions
            .lock()
            .unwrap()
            .insert(key.to_string(), session.clone());
    }
}

/// Fetches the session resource over HTTP, from the configured session URL
/// or from `/.well-known/jmap` on the server.
#[derive(Debug)]
pub struct HttpSessionSource {
    pub server_conf: Arc<JmapServerConf>,
    pub client: Arc<HttpClient>,
}

impl HttpSessionSource {
    pub fn new(server_conf: Arc<JmapServerConf>, client: Arc<HttpClient>) -> Self {
        Self {
            server_conf,
            client,
        }
    }

    async fn discover(server_conf: Arc<JmapServerConf>, client: Arc<HttpClient>) -> Result<Session> {
        let mut session_url = server_conf.session_endpoint()?;

        let mut res = match client.get_async(session_url.as_str()).await {
            Err(err) => 'block: {
                if matches!(NetworkErrorKind::from(err.kind()), NetworkErrorKind::ProtocolViolation if session_url.scheme() == "http")
                {
                    // attempt recovery by trying https://
                    if session_url.set_scheme("https").is_ok() {
                        if let Ok(s) = client.get_async(session_url.as_str()).await {
                            log::error!(
                                "Server URL {} should start with `https`. Please correct your \
                                 configuration value.",
                                server_conf.server_url
                            );
                            break 'block s;
                        }
                    }
                }

                let kind: NetworkErrorKind = err.kind().into();
                return Err(Error::new(format!(
                    "Could not connect to JMAP server endpoint for {}. Is your server url setting \
                     correct? (i.e. \"jmap.mailserver.org\")\n\nError connecting to server: {}",
                    &server_conf.server_url, &err
                ))
                .set_source(Some(Arc::new(err)))
                .set_kind(kind.into()));
            }
            Ok(s) => s,
        };

        if !res.status().is_success() {
            let kind: NetworkErrorKind = res.status().into();
            let res_text = res.text().await.unwrap_or_default();
            return Err(Error::new(format!(
                "Could not fetch JMAP session from {}. Reply from server: {}",
                session_url, res_text
            ))
            .set_kind(kind.into()));
        }

        let res_text = res.text().await?;
        if cfg!(feature = "jmap-trace") {
            log::trace!("session resource: {}", res_text);
        }
        deserialize_from_str::<Session>(&res_text).map_err(|err| {
            err.set_summary(format!(
                "Could not parse JMAP session from {}",
                session_url
            ))
        })
    }
}

impl SessionSource for HttpSessionSource {
    fn fetch(&self) -> ResultFuture<Session> {
        Ok(Box::pin(Self::discover(
            self.server_conf.clone(),
            self.client.clone(),
        )))
    }

    fn cache_key(&self) -> String {
        format!(
            "{}@{}",
            self.server_conf.server_username,
            self.server_conf
                .session_url
                .as_deref()
                .unwrap_or(&self.server_conf.server_url)
        )
    }
}

type SharedFetch =
    Shared<std::pin::Pin<Box<dyn futures::Future<Output = Result<Arc<Session>>> + Send>>>;

#[derive(Default)]
struct ResolverState {
    session: Option<Arc<Session>>,
    /// The last response `sessionState` that caused a refetch.
    signalled: Option<State<Session>>,
    stale: bool,
    generation: u64,
    in_flight: Option<(u64, SharedFetch)>,
}

pub struct SessionResolver {
    source: Arc<dyn SessionSource>,
    cache: Arc<dyn SessionCache>,
    state: Mutex<ResolverState>,
}

impl std::fmt::Debug for SessionResolver {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct(stringify!(SessionResolver))
            .field("source", &self.source)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl SessionResolver {
    pub fn new(source: Arc<dyn SessionSource>, cache: Arc<dyn SessionCache>) -> Self {
        Self {
            source,
            cache,
            state: Mutex::new(ResolverState::default()),
        }
    }

    /// The last fetched session, without fetching.
    pub fn current(&self) -> Option<Arc<Session>> {
        self.state.lock().unwrap().session.clone()
    }

    pub fn is_stale(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.stale || state.session.is_none()
    }

    pub async fn get(&self) -> Result<Arc<Session>> {
        let (generation, fetch) = {
            let mut state = self.state.lock().unwrap();
            match state.session {
                Some(ref session) if !state.stale => return Ok(session.clone()),
                _ => {}
            }
            if let Some((generation, ref fetch)) = state.in_flight {
                (generation, fetch.clone())
            } else {
                // After a session state change the cache layer may hold the
                // very session we know to be stale.
                let skip_cache = state.stale;
                let fetch: SharedFetch = Self::fetch(
                    self.source.clone(),
                    self.cache.clone(),
                    skip_cache,
                )
                .boxed()
                .shared();
                let generation = state.generation;
                state.in_flight = Some((generation, fetch.clone()));
                (generation, fetch)
            }
        };
        let result = fetch.await;
        let mut state = self.state.lock().unwrap();
        if matches!(state.in_flight, Some((g, _)) if g == generation) {
            state.in_flight = None;
        }
        if state.generation == generation {
            if let Ok(ref session) = result {
                state.session = Some(session.clone());
                state.stale = false;
            }
        }
        result
    }

    async fn fetch(
        source: Arc<dyn SessionSource>,
        cache: Arc<dyn SessionCache>,
        skip_cache: bool,
    ) -> Result<Arc<Session>> {
        let key = source.cache_key();
        if !skip_cache {
            if let Some(session) = cache.load(&key) {
                log::debug!("Using cached JMAP session for {}", key);
                return Ok(Arc::new(session));
            }
        }
        let session = source.fetch()?.await?;
        session.check_capabilities()?;
        cache.store(&key, &session);
        Ok(Arc::new(session))
    }

    /// Force the next [`SessionResolver::get`] to refetch, bypassing the
    /// session cache.
    pub fn invalidate(&self) {
        let mut state = self.state.lock().unwrap();
        state.stale = true;
        state.generation += 1;
        state.in_flight = None;
    }

    /// Signal the `sessionState` of a response. Returns `true` if it differs
    /// from the cached session, which is then marked stale.
    ///
    /// A value that already caused a refetch does not cause another one,
    /// even if the refetched session reports a different `state`.
    pub fn on_session_state(&self, session_state: &State<Session>) -> bool {
        if session_state.is_empty() {
            return false;
        }
        let changed = {
            let mut state = self.state.lock().unwrap();
            let changed = matches!(state.session, Some(ref s) if s.state != *session_state)
                && state.signalled.as_ref() != Some(session_state);
            if changed {
                state.signalled = Some(session_state.clone());
            }
            changed
        };
        if changed {
            log::debug!(
                "Session state changed to {}, session will be refetched",
                session_state
            );
            self.invalidate();
        }
        changed
    }
}

#[cfg(test)]
mod tests;
