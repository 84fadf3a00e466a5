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

//! Push notifications: the `@type`-tagged messages exchanged over a push
//! channel and the registry of push listeners.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use indexmap::IndexMap;

use crate::{
    deserialize_from_str,
    error::{Error, ErrorKind, Result},
    methods::RequestError,
    objects::{Account, Id},
    protocol::{Batch, Response},
};

/// Map of account id to data type name to new state token.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    pub changed: IndexMap<Id<Account>, IndexMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_state: Option<String>,
}

impl StateChange {
    /// New state tokens of `account_id`, by data type name.
    pub fn for_account(&self, account_id: &Id<Account>) -> Option<&IndexMap<String, String>> {
        self.changed.get(account_id)
    }
}

/// A message received on a push channel.
#[derive(Debug)]
pub enum PushMessage {
    Response {
        request_id: Option<String>,
        response: Response,
    },
    RequestError {
        request_id: Option<String>,
        error: Error,
    },
    StateChange(StateChange),
}

impl PushMessage {
    pub fn parse(text: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct Envelope {
            #[serde(rename = "@type")]
            _type: String,
            #[serde(default, rename = "requestId")]
            request_id: Option<String>,
        }

        if cfg!(feature = "jmap-trace") {
            log::trace!("push message: {}", text);
        }
        let Envelope { _type, request_id } = deserialize_from_str(text)?;
        match _type.as_str() {
            "Response" => Ok(Self::Response {
                request_id,
                response: Response::parse(text)?,
            }),
            "RequestError" => Ok(Self::RequestError {
                request_id,
                error: deserialize_from_str::<RequestError>(text)?.into(),
            }),
            "StateChange" => Ok(Self::StateChange(deserialize_from_str(text)?)),
            other => Err(Error::new(format!(
                "Unexpected push message type `{}`",
                other
            ))
            .set_kind(ErrorKind::ProtocolError)),
        }
    }
}

/// Encode a batch as a WebSocket `Request` message.
pub fn request_message(id: &str, batch: &Batch) -> Result<String> {
    let mut value = serde_json::to_value(batch)?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert("@type".to_string(), "Request".into());
        obj.insert("id".to_string(), id.into());
    }
    Ok(serde_json::to_string(&value)?)
}

#[derive(Clone, Debug, Serialize)]
pub struct WebSocketPushEnable {
    #[serde(rename = "@type")]
    _type: &'static str,
    /// `null` subscribes to every data type.
    #[serde(rename = "dataTypes")]
    pub data_types: Option<Vec<String>>,
    #[serde(rename = "pushState", skip_serializing_if = "Option::is_none")]
    pub push_state: Option<String>,
}

impl WebSocketPushEnable {
    pub fn new(data_types: Option<Vec<String>>, push_state: Option<String>) -> Self {
        Self {
            _type: "WebSocketPushEnable",
            data_types,
            push_state,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct WebSocketPushDisable {
    #[serde(rename = "@type")]
    _type: &'static str,
}

impl Default for WebSocketPushDisable {
    fn default() -> Self {
        Self {
            _type: "WebSocketPushDisable",
        }
    }
}

#[derive(Clone)]
pub struct PushListener(Arc<dyn Fn(&StateChange) + Send + Sync>);

impl std::fmt::Debug for PushListener {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "PushListener")
    }
}

impl PushListener {
    pub fn new(f: impl Fn(&StateChange) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }
}

impl std::ops::Deref for PushListener {
    type Target = dyn Fn(&StateChange) + Send + Sync;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ListenerId(u64);

/// The set of parties interested in push notifications.
#[derive(Debug, Default)]
pub struct PushListeners {
    listeners: Mutex<IndexMap<ListenerId, PushListener>>,
    next_id: AtomicU64,
    push_state: Mutex<Option<String>>,
}

impl PushListeners {
    /// Register `listener`. The flag is `true` if it is the first one.
    pub fn add(&self, listener: PushListener) -> (ListenerId, bool) {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut lck = self.listeners.lock().unwrap();
        lck.insert(id, listener);
        (id, lck.len() == 1)
    }

    /// Unregister a listener. Returns `true` if it was the last one.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut lck = self.listeners.lock().unwrap();
        lck.shift_remove(&id).is_some() && lck.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    /// The last `pushState` seen, to resume a push subscription.
    pub fn push_state(&self) -> Option<String> {
        self.push_state.lock().unwrap().clone()
    }

    pub fn dispatch(&self, change: &StateChange) {
        if let Some(push_state) = change.push_state.as_ref() {
            *self.push_state.lock().unwrap() = Some(push_state.clone());
        }
        let listeners = self
            .listeners
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect::<Vec<PushListener>>();
        for listener in listeners {
            listener(change);
        }
    }
}
