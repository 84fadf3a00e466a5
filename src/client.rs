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

//! One account on one JMAP server.

use std::sync::{Arc, Mutex, Weak};

use futures::lock::Mutex as FutureMutex;
use indexmap::IndexMap;
use isahc::HttpClient;

use crate::{
    blob::BlobTransfer,
    cache::{Cache, CacheHandle, QueryItem},
    conf::{AccountSettings, JmapServerConf, PushChannel},
    error::{Error, ErrorKind, Result},
    mail::{email::EmailSet, EmailObject},
    methods::{Set, SetResponse, UploadResponse},
    objects::{BlobObject, Id, PatchObject},
    protocol::{PendingResult, Request},
    push::{ListenerId, PushListener, StateChange},
    query::{EmailQuerySpec, QueryCache},
    session::{HttpSessionSource, RamSessionCache, Session, SessionResolver},
    sync::{EventConsumer, Status, SyncEngine},
    transport::{
        http_client, ConnectionState, EventSourceTransport, HttpTransport, StateObserver,
        Transport, WebSocketTransport,
    },
};

/// Composes session discovery, the configured transport, the sync engine
/// and the query cache over one shared [`Cache`].
///
/// Persistent transports spawn their connection task on the global `smol`
/// executor.
#[derive(Debug)]
pub struct JmapClient {
    pub server_conf: Arc<JmapServerConf>,
    resolver: Arc<SessionResolver>,
    transport: Arc<dyn Transport>,
    engine: Arc<SyncEngine>,
    queries: QueryCache,
    blobs: BlobTransfer,
    cache: CacheHandle,
    request_no: Arc<FutureMutex<usize>>,
}

impl JmapClient {
    pub fn new(
        settings: &AccountSettings,
        cache: impl Cache + 'static,
        event_consumer: Option<EventConsumer>,
    ) -> Result<Self> {
        let server_conf = Arc::new(JmapServerConf::new(settings)?);
        let client = Arc::new(http_client(&server_conf)?);
        let resolver = Arc::new(SessionResolver::new(
            Arc::new(HttpSessionSource::new(server_conf.clone(), client.clone())),
            Arc::new(RamSessionCache::default()),
        ));

        // Connection transitions reach the engine once it exists.
        let engine_slot: Arc<Mutex<Weak<SyncEngine>>> = Arc::new(Mutex::new(Weak::new()));
        let observer: StateObserver = {
            let engine_slot = engine_slot.clone();
            Arc::new(move |state: ConnectionState| {
                let engine = engine_slot.lock().unwrap().upgrade();
                if let Some(engine) = engine {
                    engine.on_connection_state(state);
                }
            })
        };
        let transport: Arc<dyn Transport> = match server_conf.push {
            PushChannel::None => Arc::new(HttpTransport::new(
                server_conf.clone(),
                client.clone(),
                resolver.clone(),
            )),
            PushChannel::WebSocket => Arc::new(WebSocketTransport::new(
                server_conf.clone(),
                resolver.clone(),
                Some(observer),
            )),
            PushChannel::EventSource => Arc::new(EventSourceTransport::new(
                server_conf.clone(),
                client.clone(),
                resolver.clone(),
                Some(observer),
            )),
        };

        let ret = Self::with_transport(
            server_conf,
            client,
            resolver,
            transport,
            cache,
            event_consumer,
        );
        *engine_slot.lock().unwrap() = Arc::downgrade(&ret.engine);
        Ok(ret)
    }

    /// Compose a client over an already built transport and resolver.
    pub fn with_transport(
        server_conf: Arc<JmapServerConf>,
        client: Arc<HttpClient>,
        resolver: Arc<SessionResolver>,
        transport: Arc<dyn Transport>,
        cache: impl Cache + 'static,
        event_consumer: Option<EventConsumer>,
    ) -> Self {
        let cache = CacheHandle::new(cache);
        let request_no = Arc::new(FutureMutex::new(0));
        let engine = Arc::new(SyncEngine::new(
            transport.clone(),
            resolver.clone(),
            cache.clone(),
            request_no.clone(),
            event_consumer,
        ));
        let queries = QueryCache::new(
            transport.clone(),
            resolver.clone(),
            cache.clone(),
            request_no.clone(),
        );
        let blobs = BlobTransfer::new(server_conf.clone(), client, resolver.clone());
        Self {
            server_conf,
            resolver,
            transport,
            engine,
            queries,
            blobs,
            cache,
            request_no,
        }
    }

    pub fn cache(&self) -> &CacheHandle {
        &self.cache
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.connection_state()
    }

    pub async fn session(&self) -> Result<Arc<Session>> {
        self.resolver.get().await
    }

    /// Synchronize every collection, then bring the cached query windows up
    /// to date if anything changed.
    ///
    /// A query window that could not be brought up to date is dropped and
    /// the error is returned; the collections themselves are already synced
    /// at that point.
    pub async fn refresh(&self) -> Result<Status> {
        let status = self.engine.refresh().await?;
        if status != Status::Unchanged {
            self.queries.refresh_all().await?;
        }
        Ok(status)
    }

    /// See [`QueryCache::query`].
    pub async fn query(
        &self,
        spec: &EmailQuerySpec,
        page_size: u64,
        after_id: Option<&Id<EmailObject>>,
    ) -> Result<Status> {
        self.queries.query(spec, page_size, after_id).await
    }

    pub fn query_rows(&self, spec: &EmailQuerySpec) -> Result<Vec<QueryItem>> {
        self.queries.rows(spec)
    }

    /// Subscribe to push state changes. Every change is also checked
    /// against the cache before `listener` sees it.
    pub fn add_push_listener(
        &self,
        listener: impl Fn(&StateChange) + Send + Sync + 'static,
    ) -> ListenerId {
        let engine = Arc::downgrade(&self.engine);
        self.transport
            .add_push_listener(PushListener::new(move |change: &StateChange| {
                if let Some(engine) = engine.upgrade() {
                    engine.on_push(change);
                }
                listener(change);
            }))
    }

    pub fn remove_push_listener(&self, id: ListenerId) {
        self.transport.remove_push_listener(id);
    }

    /// Update and destroy emails, on the condition that the server's email
    /// state is still the cached one.
    ///
    /// A `stateMismatch` failure is returned as is: `refresh`, then retry.
    /// The cache is not touched; the next `refresh` picks up the changes.
    pub async fn set_emails(
        &self,
        update: IndexMap<Id<EmailObject>, PatchObject>,
        destroy: Vec<Id<EmailObject>>,
    ) -> Result<SetResponse<EmailObject>> {
        let Some(if_in_state) = self.cache.objects_state().email else {
            return Err(Error::new(
                "Cannot write emails before they have been synchronized once.",
            )
            .set_kind(ErrorKind::Invalidated));
        };
        let session = self.resolver.get().await?;
        let mut req = Request::new(self.request_no.clone());
        let set_call = Set::new(Some(if_in_state))
            .account_id(session.mail_account_id()?)
            .update(if update.is_empty() {
                None
            } else {
                Some(update.into_iter().map(|(id, p)| (id.into(), p)).collect())
            })
            .destroy(if destroy.is_empty() {
                None
            } else {
                Some(destroy.into_iter().map(Into::into).collect())
            });
        let set: PendingResult<EmailSet, EmailObject> =
            req.add_call(&EmailSet::new(set_call)).await?;
        self.transport.submit(req.build())?.await?;
        let res = set.response().await?;
        for (id, err) in res.errors() {
            log::warn!("Email/set: {} failed: {}", id, err);
        }
        Ok(res)
    }

    pub async fn download(
        &self,
        blob_id: &Id<BlobObject>,
        name: Option<&str>,
        range_start: u64,
    ) -> Result<Vec<u8>> {
        self.blobs.download(blob_id, name, range_start).await
    }

    pub async fn upload(&self, bytes: Vec<u8>, mime_type: &str) -> Result<UploadResponse> {
        self.blobs.upload(bytes, mime_type).await
    }
}
