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

use std::sync::{Arc, Mutex};

use futures::future::{self, Either};
use isahc::{AsyncReadResponseExt, HttpClient};

use super::{ConnectionState, Transport};
use crate::{
    conf::JmapServerConf,
    error::{Error, NetworkErrorKind, Result},
    methods::RequestError,
    protocol::{Batch, Response},
    push::{ListenerId, PushListener, PushListeners},
    session::SessionResolver,
    utils::futures::{timeout, ResultFuture},
};

/// Every batch is a `POST` to the `apiUrl` of the current session.
///
/// There is no push channel over plain HTTP: listeners are kept but never
/// called.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    inner: Arc<HttpTransportInner>,
}

#[derive(Debug)]
struct HttpTransportInner {
    server_conf: Arc<JmapServerConf>,
    client: Arc<HttpClient>,
    resolver: Arc<SessionResolver>,
    listeners: PushListeners,
    state: Mutex<ConnectionState>,
}

impl HttpTransport {
    pub fn new(
        server_conf: Arc<JmapServerConf>,
        client: Arc<HttpClient>,
        resolver: Arc<SessionResolver>,
    ) -> Self {
        Self {
            inner: Arc::new(HttpTransportInner {
                server_conf,
                client,
                resolver,
                listeners: PushListeners::default(),
                state: Mutex::new(ConnectionState::Closed),
            }),
        }
    }

    pub fn client(&self) -> &Arc<HttpClient> {
        &self.inner.client
    }
}

impl HttpTransportInner {
    async fn post(&self, api_url: &str, body: String) -> Result<String> {
        let mut res = match self.client.post_async(api_url, body).await {
            Ok(res) => res,
            Err(err) => {
                *self.state.lock().unwrap() = ConnectionState::Failed;
                return Err(err.into());
            }
        };
        *self.state.lock().unwrap() = ConnectionState::Connected;
        let status = res.status();
        let text = res.text().await?;
        if !status.is_success() {
            if let Ok(request_error) = serde_json::from_str::<RequestError>(&text) {
                return Err(request_error.into());
            }
            let kind = NetworkErrorKind::from(status);
            return Err(Error::new(format!(
                "API request to {} failed: {}",
                api_url, status
            ))
            .set_details(text)
            .set_kind(kind.into()));
        }
        Ok(text)
    }

    async fn send_batch(self: Arc<Self>, mut batch: Batch) -> Result<()> {
        if batch.is_cancelled() {
            return Ok(());
        }
        let prepared = match self.resolver.get().await {
            Ok(session) => batch
                .to_json()
                .map(|body| (session.api_url.to_string(), body)),
            Err(err) => Err(err),
        };
        let (api_url, body) = match prepared {
            Ok(v) => v,
            Err(err) => {
                batch.fail(err.clone());
                return Err(err);
            }
        };
        if cfg!(feature = "jmap-trace") {
            log::trace!("send_batch(): request {}", body);
        }
        let outcome = {
            let post = Box::pin(timeout(self.server_conf.timeout, self.post(&api_url, body)));
            let cancelled = Box::pin(batch.cancelled());
            match future::select(post, cancelled).await {
                Either::Left((res, _)) => Some(res),
                Either::Right(_) => None,
            }
        };
        let text = match outcome {
            None => {
                crate::debug!("batch {:?} cancelled before a response arrived", batch);
                return Ok(());
            }
            Some(res) => match res.and_then(|r| r) {
                Ok(text) => text,
                Err(err) => {
                    batch.fail(err.clone());
                    return Err(err);
                }
            },
        };
        let response = match Response::parse(&text) {
            Ok(r) => r,
            Err(err) => {
                batch.fail(err.clone());
                return Err(err);
            }
        };
        let info = batch.resolve(response);
        self.resolver.on_session_state(&info.session_state);
        Ok(())
    }
}

impl Transport for HttpTransport {
    fn submit(&self, batch: Batch) -> ResultFuture<()> {
        Ok(Box::pin(self.inner.clone().send_batch(batch)))
    }

    fn add_push_listener(&self, listener: PushListener) -> ListenerId {
        log::warn!("Push listener registered on an HTTP transport; it will never be called.");
        self.inner.listeners.add(listener).0
    }

    fn remove_push_listener(&self, id: ListenerId) {
        self.inner.listeners.remove(id);
    }

    fn connection_state(&self) -> ConnectionState {
        *self.inner.state.lock().unwrap()
    }
}
