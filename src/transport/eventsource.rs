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

//! Push over Server-Sent Events, calls over [`HttpTransport`].

use std::sync::{Arc, Mutex};

use futures::{io::AsyncBufReadExt, StreamExt};
use isahc::HttpClient;

use super::{
    http::HttpTransport,
    reconnect::{Backoff, ConnectionState, ReconnectMachine},
    StateObserver, Transport,
};
use crate::{
    conf::JmapServerConf,
    deserialize_from_str,
    error::{Error, ErrorKind, NetworkErrorKind, Result},
    methods::event_source_request_format,
    protocol::Batch,
    push::{ListenerId, PushListener, PushListeners, StateChange},
    session::SessionResolver,
    utils::futures::{sleep, timeout, ResultFuture},
};

/// One dispatched `text/event-stream` event.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` line parser.
#[derive(Debug, Default)]
pub struct SseParser {
    event: String,
    data: Vec<String>,
}

impl SseParser {
    /// Feed one line without its terminator. Returns an event when `line`
    /// is the blank line ending it.
    pub fn feed_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            if self.data.is_empty() {
                self.event.clear();
                return None;
            }
            let event = std::mem::take(&mut self.event);
            let data = std::mem::take(&mut self.data).join("\n");
            return Some(SseEvent {
                event: if event.is_empty() {
                    "message".to_string()
                } else {
                    event
                },
                data,
            });
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = value.to_string(),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }
}

struct Shared {
    server_conf: Arc<JmapServerConf>,
    client: Arc<HttpClient>,
    resolver: Arc<SessionResolver>,
    listeners: PushListeners,
    state: Mutex<ConnectionState>,
    observer: Option<StateObserver>,
}

impl Shared {
    fn set_state(&self, new_state: ConnectionState) {
        let old_state = std::mem::replace(&mut *self.state.lock().unwrap(), new_state);
        if old_state != new_state {
            log::debug!("Event source connection: {} -> {}", old_state, new_state);
            if let Some(observer) = self.observer.as_ref() {
                observer(new_state);
            }
        }
    }
}

pub struct EventSourceTransport {
    http: HttpTransport,
    shared: Arc<Shared>,
    /// Alive only while there are listeners; dropping it closes the stream.
    task: Mutex<Option<smol::Task<()>>>,
}

impl std::fmt::Debug for EventSourceTransport {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct(stringify!(EventSourceTransport))
            .field("http", &self.http)
            .field("state", &*self.shared.state.lock().unwrap())
            .finish_non_exhaustive()
    }
}

impl EventSourceTransport {
    pub fn new(
        server_conf: Arc<JmapServerConf>,
        client: Arc<HttpClient>,
        resolver: Arc<SessionResolver>,
        observer: Option<StateObserver>,
    ) -> Self {
        Self {
            http: HttpTransport::new(server_conf.clone(), client.clone(), resolver.clone()),
            shared: Arc::new(Shared {
                server_conf,
                client,
                resolver,
                listeners: PushListeners::default(),
                state: Mutex::new(ConnectionState::Closed),
                observer,
            }),
            task: Mutex::new(None),
        }
    }
}

impl Transport for EventSourceTransport {
    fn submit(&self, batch: Batch) -> ResultFuture<()> {
        self.http.submit(batch)
    }

    fn add_push_listener(&self, listener: PushListener) -> ListenerId {
        let (id, first) = self.shared.listeners.add(listener);
        if first {
            *self.task.lock().unwrap() = Some(smol::spawn(run(self.shared.clone())));
        }
        id
    }

    fn remove_push_listener(&self, id: ListenerId) {
        if self.shared.listeners.remove(id) {
            let task = self.task.lock().unwrap().take();
            drop(task);
            self.shared.set_state(ConnectionState::Closed);
        }
    }

    fn connection_state(&self) -> ConnectionState {
        *self.shared.state.lock().unwrap()
    }
}

async fn run(shared: Arc<Shared>) {
    let mut machine: ReconnectMachine<()> = ReconnectMachine::new(Backoff::new(
        shared.server_conf.reconnect_base_delay,
        shared.server_conf.max_reconnect_exponent,
    ));
    loop {
        machine.begin_connect();
        shared.set_state(ConnectionState::Connecting);
        let delay = match listen(&shared, &mut machine).await {
            Ok(()) => machine.closed(true),
            Err(err) => {
                log::warn!("Event source connection failed: {}", err);
                machine.failed(true)
            }
        };
        shared.set_state(machine.state());
        if let Some(delay) = delay {
            log::debug!("Event source reconnect in {:?}", delay);
            sleep(delay).await;
        }
    }
}

async fn listen(shared: &Shared, machine: &mut ReconnectMachine<()>) -> Result<()> {
    let server_conf = &shared.server_conf;
    let session = shared.resolver.get().await?;
    let url = event_source_request_format(
        &session.event_source_url,
        "*",
        server_conf.ping_interval.as_secs(),
    )?;
    let request = isahc::Request::get(url.as_str())
        .header("Accept", "text/event-stream")
        .body(())?;
    let res = timeout(server_conf.timeout, shared.client.send_async(request)).await??;
    if !res.status().is_success() {
        let kind = NetworkErrorKind::from(res.status());
        return Err(Error::new(format!(
            "Could not open event source {}: {}",
            url,
            res.status()
        ))
        .set_kind(kind.into()));
    }
    machine.connected();
    shared.set_state(ConnectionState::Connected);

    let lines = futures::io::BufReader::new(res.into_body()).lines();
    futures::pin_mut!(lines);
    let mut parser = SseParser::default();
    let silence = server_conf.ping_interval * 2;
    loop {
        let line = match timeout(Some(silence), lines.next()).await {
            Err(_) => {
                return Err(Error::new(format!(
                    "No data received from event source for {:?}",
                    silence
                ))
                .set_kind(ErrorKind::Timeout))
            }
            Ok(None) => return Ok(()),
            Ok(Some(line)) => line?,
        };
        let Some(event) = parser.feed_line(line.trim_end_matches('\r')) else {
            continue;
        };
        match event.event.as_str() {
            "state" | "message" => match deserialize_from_str::<StateChange>(&event.data) {
                Ok(change) => shared.listeners.dispatch(&change),
                Err(err) => log::warn!("Discarding unparseable state event: {}", err),
            },
            "ping" => {}
            other => crate::debug!("ignoring event source event `{}`", other),
        }
    }
}
