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

//! Delivery of request batches to the server, and of push notifications
//! back to listeners.
//!
//! Three transports implement [`Transport`]:
//!
//! - [`HttpTransport`]: one `POST` to the session's `apiUrl` per batch, no
//!   push.
//! - [`WebSocketTransport`]: JMAP over WebSocket (RFC 8887), calls and push
//!   multiplexed over one long lived connection.
//! - [`EventSourceTransport`]: calls over HTTP, push over the session's
//!   `eventSourceUrl`.

use std::sync::Arc;

use isahc::{
    config::{Configurable, RedirectPolicy},
    HttpClient,
};

use crate::{
    conf::JmapServerConf,
    error::Result,
    protocol::Batch,
    push::{ListenerId, PushListener},
    utils::futures::ResultFuture,
};

pub mod eventsource;
pub mod http;
pub mod reconnect;
pub mod websocket;

pub use eventsource::EventSourceTransport;
pub use http::HttpTransport;
pub use reconnect::{Backoff, ConnectionState, ReconnectMachine};
pub use websocket::WebSocketTransport;

/// Called on every connection state transition of a persistent transport.
pub type StateObserver = Arc<dyn Fn(ConnectionState) + Send + Sync>;

pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Send `batch` and demultiplex the server's answer into the pending
    /// results of its calls.
    ///
    /// The returned future resolves once every pending result has been
    /// written. A transport failure is written to every pending result and
    /// returned; it is never retried.
    fn submit(&self, batch: Batch) -> ResultFuture<()>;

    fn add_push_listener(&self, listener: PushListener) -> ListenerId;

    fn remove_push_listener(&self, id: ListenerId);

    fn connection_state(&self) -> ConnectionState;
}

/// The HTTP client used for API calls, blob transfers and session discovery.
///
/// No overall timeout is configured on the client: event source streams are
/// long lived. Callers bound individual requests with
/// [`timeout`](crate::utils::futures::timeout).
pub fn http_client(server_conf: &JmapServerConf) -> Result<HttpClient> {
    let client = HttpClient::builder()
        .connect_timeout(
            server_conf
                .timeout
                .unwrap_or_else(|| std::time::Duration::from_secs(300)),
        )
        .connection_cache_size(8)
        .connection_cache_ttl(std::time::Duration::from_secs(30 * 60))
        .default_header("Content-Type", "application/json")
        .ssl_options(if server_conf.danger_accept_invalid_certs {
            isahc::config::SslOption::DANGER_ACCEPT_INVALID_CERTS
                | isahc::config::SslOption::DANGER_ACCEPT_INVALID_HOSTS
                | isahc::config::SslOption::DANGER_ACCEPT_REVOKED_CERTS
        } else {
            isahc::config::SslOption::NONE
        })
        .redirect_policy(RedirectPolicy::Limit(10));
    let client = if server_conf.use_token {
        client
            .authentication(isahc::auth::Authentication::none())
            .default_header(
                "Authorization",
                format!("Bearer {}", &server_conf.server_password),
            )
    } else {
        client
            .authentication(isahc::auth::Authentication::basic())
            .credentials(isahc::auth::Credentials::new(
                &server_conf.server_username,
                &server_conf.server_password,
            ))
    };
    Ok(client.build()?)
}

/// Value of the `Authorization` header for transports that do not go through
/// [`HttpClient`].
pub fn authorization_header(server_conf: &JmapServerConf) -> String {
    use base64::Engine;

    if server_conf.use_token {
        format!("Bearer {}", server_conf.server_password)
    } else {
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(format!(
                "{}:{}",
                server_conf.server_username, server_conf.server_password
            ))
        )
    }
}
