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

//! JMAP over WebSocket (RFC 8887).
//!
//! One actor task owns the physical connection. [`WebSocketTransport`]
//! talks to it through a command channel, so there is never more than one
//! connection and batches submitted while disconnected are sent in order
//! once it is up.

use std::{
    collections::HashMap,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
    time::Instant,
};

use async_tungstenite::{
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
    WebSocketStream,
};
use futures::{
    channel::{mpsc, oneshot},
    future::{self, Either},
    io::{AsyncRead, AsyncWrite},
    stream, SinkExt, StreamExt,
};
use smol::net::TcpStream;

use super::{
    authorization_header,
    reconnect::{Backoff, ConnectionState, ReconnectMachine},
    StateObserver, Transport,
};
use crate::{
    conf::JmapServerConf,
    error::{Error, ErrorKind, NetworkErrorKind, Result},
    protocol::Batch,
    push::{
        request_message, ListenerId, PushListener, PushListeners, PushMessage,
        WebSocketPushDisable, WebSocketPushEnable,
    },
    session::SessionResolver,
    utils::futures::{timeout, ResultFuture},
};

type Responder = oneshot::Sender<Result<()>>;

enum Command {
    Submit(Batch, Responder),
    /// The set of push listeners went from empty to non-empty or back.
    PushChanged,
}

pub enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(async_native_tls::TlsStream<TcpStream>),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_close(cx),
            Self::Tls(s) => Pin::new(s).poll_close(cx),
        }
    }
}

struct Shared {
    server_conf: Arc<JmapServerConf>,
    resolver: Arc<SessionResolver>,
    listeners: PushListeners,
    state: Mutex<ConnectionState>,
    observer: Option<StateObserver>,
}

impl Shared {
    fn set_state(&self, new_state: ConnectionState) {
        let old_state = std::mem::replace(&mut *self.state.lock().unwrap(), new_state);
        if old_state != new_state {
            log::debug!("WebSocket connection: {} -> {}", old_state, new_state);
            if let Some(observer) = self.observer.as_ref() {
                observer(new_state);
            }
        }
    }

    fn fail_all(&self, batches: impl IntoIterator<Item = (Batch, Responder)>, err: &Error) {
        for (batch, tx) in batches {
            batch.fail(err.clone());
            _ = tx.send(Err(err.clone()));
        }
    }
}

pub struct WebSocketTransport {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    _actor: smol::Task<()>,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct(stringify!(WebSocketTransport))
            .field("state", &*self.shared.state.lock().unwrap())
            .field("listeners", &self.shared.listeners.len())
            .finish_non_exhaustive()
    }
}

impl WebSocketTransport {
    /// Spawns the connection actor. No connection is opened until a batch is
    /// submitted or a push listener is added.
    pub fn new(
        server_conf: Arc<JmapServerConf>,
        resolver: Arc<SessionResolver>,
        observer: Option<StateObserver>,
    ) -> Self {
        let (commands, rx) = mpsc::unbounded();
        let shared = Arc::new(Shared {
            server_conf,
            resolver,
            listeners: PushListeners::default(),
            state: Mutex::new(ConnectionState::Closed),
            observer,
        });
        let _actor = smol::spawn(run(shared.clone(), rx));
        Self {
            shared,
            commands,
            _actor,
        }
    }
}

impl Transport for WebSocketTransport {
    fn submit(&self, batch: Batch) -> ResultFuture<()> {
        let (tx, rx) = oneshot::channel();
        if let Err(err) = self.commands.unbounded_send(Command::Submit(batch, tx)) {
            if let Command::Submit(batch, _) = err.into_inner() {
                batch.fail(connection_gone());
            }
            return Err(connection_gone());
        }
        Ok(Box::pin(async move { rx.await.map_err(|_| connection_gone())? }))
    }

    fn add_push_listener(&self, listener: PushListener) -> ListenerId {
        let (id, first) = self.shared.listeners.add(listener);
        if first {
            _ = self.commands.unbounded_send(Command::PushChanged);
        }
        id
    }

    fn remove_push_listener(&self, id: ListenerId) {
        if self.shared.listeners.remove(id) {
            _ = self.commands.unbounded_send(Command::PushChanged);
        }
    }

    fn connection_state(&self) -> ConnectionState {
        *self.shared.state.lock().unwrap()
    }
}

fn connection_gone() -> Error {
    Error::new("WebSocket connection task is gone")
        .set_kind(ErrorKind::Network(NetworkErrorKind::ConnectionFailed))
}

async fn run(shared: Arc<Shared>, mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut machine: ReconnectMachine<(Batch, Responder)> = ReconnectMachine::new(Backoff::new(
        shared.server_conf.reconnect_base_delay,
        shared.server_conf.max_reconnect_exponent,
    ));
    let mut retry_at: Option<Instant> = None;
    loop {
        if machine.has_queued() || (!shared.listeners.is_empty() && retry_at.is_none()) {
            retry_at = None;
            machine.begin_connect();
            shared.set_state(ConnectionState::Connecting);
            let delay = match connect(&shared).await {
                Ok(ws) => {
                    let queued = machine.connected();
                    shared.set_state(ConnectionState::Connected);
                    match serve(&shared, ws, queued, &mut commands).await {
                        Exit::Shutdown => return,
                        Exit::Closed => machine.closed(!shared.listeners.is_empty()),
                        Exit::Failed(err) => {
                            log::warn!("WebSocket connection failed: {}", err);
                            machine.failed(!shared.listeners.is_empty())
                        }
                    }
                }
                Err(err) => {
                    log::warn!("Could not open WebSocket connection: {}", err);
                    shared.fail_all(machine.take_queued(), &err);
                    machine.failed(!shared.listeners.is_empty())
                }
            };
            shared.set_state(machine.state());
            if let Some(delay) = delay {
                log::debug!("WebSocket reconnect in {:?}", delay);
                retry_at = Some(Instant::now() + delay);
            }
            continue;
        }

        let command = match retry_at {
            Some(at) => match future::select(commands.next(), smol::Timer::at(at)).await {
                Either::Left((command, _)) => command,
                Either::Right(_) => {
                    retry_at = None;
                    continue;
                }
            },
            None => commands.next().await,
        };
        match command {
            None => return,
            Some(Command::Submit(batch, tx)) => {
                if batch.is_cancelled() {
                    _ = tx.send(Ok(()));
                } else {
                    // Queued while disconnected; a submission triggers an
                    // immediate connect attempt.
                    _ = machine.submit((batch, tx));
                }
            }
            Some(Command::PushChanged) => {}
        }
    }
}

async fn connect(shared: &Shared) -> Result<WebSocketStream<MaybeTlsStream>> {
    let server_conf = &shared.server_conf;
    let session = shared.resolver.get().await?;
    let url = session
        .websocket()
        .ok_or_else(|| {
            Error::new(
                "Server does not advertise the urn:ietf:params:jmap:websocket capability",
            )
            .set_kind(ErrorKind::NotFound)
        })?
        .url;
    let host = url
        .host_str()
        .ok_or_else(|| {
            Error::new(format!("WebSocket URL {} has no host", url))
                .set_kind(ErrorKind::ProtocolError)
        })?
        .to_string();
    let tls = matches!(url.scheme(), "wss" | "https");
    let port = url.port_or_known_default().unwrap_or(if tls { 443 } else { 80 });

    let tcp = timeout(server_conf.timeout, TcpStream::connect((host.as_str(), port))).await??;
    let stream = if tls {
        let connector = async_native_tls::TlsConnector::new()
            .danger_accept_invalid_certs(server_conf.danger_accept_invalid_certs)
            .danger_accept_invalid_hostnames(server_conf.danger_accept_invalid_certs);
        MaybeTlsStream::Tls(timeout(server_conf.timeout, connector.connect(host.as_str(), tcp)).await??)
    } else {
        MaybeTlsStream::Plain(tcp)
    };

    let mut request = url.as_str().into_client_request()?;
    let invalid_header = |err: async_tungstenite::tungstenite::http::header::InvalidHeaderValue| {
        Error::new("Invalid credentials for Authorization header")
            .set_source(Some(Arc::new(err)))
            .set_kind(ErrorKind::Configuration)
    };
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("jmap"));
    request.headers_mut().insert(
        "Authorization",
        HeaderValue::from_str(&authorization_header(server_conf)).map_err(invalid_header)?,
    );
    let (ws, _) = timeout(
        server_conf.timeout,
        async_tungstenite::client_async(request, stream),
    )
    .await??;
    Ok(ws)
}

enum Exit {
    Shutdown,
    Closed,
    Failed(Error),
}

enum Event {
    Incoming(std::result::Result<Message, async_tungstenite::tungstenite::Error>),
    IncomingEnd,
    Command(Command),
    CommandsEnd,
    Tick,
}

/// Drive an open connection until it closes, fails, or the transport is
/// dropped. In-flight batches are failed on exit: they are never resent.
async fn serve(
    shared: &Shared,
    ws: WebSocketStream<MaybeTlsStream>,
    queued: Vec<(Batch, Responder)>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> Exit {
    let ping_interval = shared.server_conf.ping_interval;
    let (mut sink, incoming) = ws.split();
    let mut in_flight: HashMap<String, (Batch, Responder)> = HashMap::new();
    let mut push_enabled = false;

    let exit = 'serve: {
        for (batch, tx) in queued {
            if let Err(err) = send_batch(&mut sink, &mut in_flight, batch, tx).await {
                break 'serve Exit::Failed(err);
            }
        }

        let events = stream::select(
            incoming
                .map(Event::Incoming)
                .chain(stream::once(future::ready(Event::IncomingEnd))),
            stream::select(
                commands
                    .by_ref()
                    .map(Event::Command)
                    .chain(stream::once(future::ready(Event::CommandsEnd))),
                smol::Timer::interval(ping_interval).map(|_| Event::Tick),
            ),
        );
        futures::pin_mut!(events);
        let mut last_seen = Instant::now();
        loop {
            if push_enabled == shared.listeners.is_empty() {
                let message = if push_enabled {
                    serde_json::to_string(&WebSocketPushDisable::default())
                } else {
                    serde_json::to_string(&WebSocketPushEnable::new(
                        None,
                        shared.listeners.push_state(),
                    ))
                };
                let sent = match message {
                    Ok(text) => sink.send(Message::text(text)).await.map_err(Error::from),
                    Err(err) => Err(err.into()),
                };
                if let Err(err) = sent {
                    break 'serve Exit::Failed(err);
                }
                push_enabled = !push_enabled;
                crate::debug!("WebSocket push enabled: {}", push_enabled);
            }

            let Some(event) = events.next().await else {
                break 'serve Exit::Closed;
            };
            match event {
                Event::Incoming(Ok(Message::Text(text))) => {
                    last_seen = Instant::now();
                    on_text(shared, &mut in_flight, text.as_str());
                }
                Event::Incoming(Ok(Message::Close(frame))) => {
                    log::debug!("WebSocket closed by server: {:?}", frame);
                    break 'serve Exit::Closed;
                }
                Event::Incoming(Ok(_)) => {
                    last_seen = Instant::now();
                }
                Event::Incoming(Err(err)) => break 'serve Exit::Failed(err.into()),
                Event::IncomingEnd => break 'serve Exit::Closed,
                Event::Command(Command::Submit(batch, tx)) => {
                    if let Err(err) = send_batch(&mut sink, &mut in_flight, batch, tx).await {
                        break 'serve Exit::Failed(err);
                    }
                }
                Event::Command(Command::PushChanged) => {}
                Event::CommandsEnd => {
                    _ = sink.send(Message::Close(None)).await;
                    break 'serve Exit::Shutdown;
                }
                Event::Tick => {
                    if last_seen.elapsed() > ping_interval * 2 {
                        break 'serve Exit::Failed(
                            Error::new(format!(
                                "No data received on WebSocket for {:?}",
                                last_seen.elapsed()
                            ))
                            .set_kind(ErrorKind::Timeout),
                        );
                    }
                    if let Err(err) = sink.send(Message::Ping(Default::default())).await {
                        break 'serve Exit::Failed(err.into());
                    }
                }
            }
        }
    };

    let err = match exit {
        Exit::Failed(ref err) => err.clone(),
        _ => Error::new("WebSocket connection closed before the response arrived")
            .set_kind(ErrorKind::Network(NetworkErrorKind::ConnectionFailed)),
    };
    shared.fail_all(in_flight.into_values(), &err);
    exit
}

async fn send_batch<S>(
    sink: &mut S,
    in_flight: &mut HashMap<String, (Batch, Responder)>,
    batch: Batch,
    tx: Responder,
) -> Result<()>
where
    S: futures::Sink<Message, Error = async_tungstenite::tungstenite::Error> + Unpin,
{
    if batch.is_cancelled() {
        _ = tx.send(Ok(()));
        return Ok(());
    }
    let id = uuid::Uuid::new_v4().to_string();
    let text = match request_message(&id, &batch) {
        Ok(text) => text,
        Err(err) => {
            batch.fail(err.clone());
            _ = tx.send(Err(err));
            return Ok(());
        }
    };
    if cfg!(feature = "jmap-trace") {
        log::trace!("send_batch(): request {}", text);
    }
    if let Err(err) = sink.send(Message::text(text)).await {
        let err = Error::from(err);
        batch.fail(err.clone());
        _ = tx.send(Err(err.clone()));
        return Err(err);
    }
    in_flight.insert(id, (batch, tx));
    Ok(())
}

fn on_text(shared: &Shared, in_flight: &mut HashMap<String, (Batch, Responder)>, text: &str) {
    let message = match PushMessage::parse(text) {
        Ok(message) => message,
        Err(err) => {
            log::warn!("Discarding unparseable WebSocket message: {}", err);
            return;
        }
    };
    match message {
        PushMessage::Response {
            request_id,
            response,
        } => match request_id.and_then(|id| in_flight.remove(&id)) {
            Some((batch, tx)) => {
                let info = batch.resolve(response);
                shared.resolver.on_session_state(&info.session_state);
                _ = tx.send(Ok(()));
            }
            None => log::warn!("WebSocket response for an unknown request"),
        },
        PushMessage::RequestError { request_id, error } => {
            match request_id.and_then(|id| in_flight.remove(&id)) {
                Some((batch, tx)) => {
                    batch.fail(error.clone());
                    _ = tx.send(Err(error));
                }
                None => log::warn!("WebSocket request error for an unknown request: {}", error),
            }
        }
        PushMessage::StateChange(change) => shared.listeners.dispatch(&change),
    }
}
