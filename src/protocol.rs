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

//! Batching and correlation of method calls.
//!
//! A [`Request`] accumulates method calls. Each call gets a batch-local id
//! (`m{n}`) and a [`PendingResult`] through which the caller later receives
//! the server's answer for that call, and from which later calls in the same
//! batch can reference its result. [`Request::build`] consumes the request
//! into a [`Batch`], so no call can be added once a batch has been built.
//!
//! A transport sends the [`Batch`] and hands the server's [`Response`] to
//! [`Batch::resolve`], which delivers exactly one [`InvocationResult`] to
//! every pending result.

use std::{hash::Hash, marker::PhantomData, sync::Arc};

use futures::{channel::oneshot, lock::Mutex as FutureMutex};
use indexmap::{IndexMap, IndexSet};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{value::RawValue, Value};

use crate::{
    argument::Argument,
    capabilities::{Capability, JmapCoreCapability},
    error::{Error, ErrorKind, NetworkErrorKind, Result},
    methods::{MethodError, RequestError, ResultField},
    objects::{Object, State},
    session::Session,
};

pub type UtcDate = String;

pub trait Method<OBJ: Object>: Serialize + Send + Sync {
    const NAME: &'static str;
    /// Capabilities required besides [`Object::CAPABILITY`].
    const EXTRA_CAPABILITIES: &'static [&'static str] = &[];
    type Response: DeserializeOwned + Send + 'static;
}

/// Declare a concrete method call type wrapping a generic method shape.
#[macro_export]
macro_rules! _impl_jmap_method {
    ($(#[$outer:meta])*$ident:ident : $call:ty, $obj:ty => $name:literal, response: $resp:ty) => {
        $(#[$outer])*
        #[derive(Clone, Debug, Serialize)]
        #[serde(transparent)]
        pub struct $ident(pub $call);

        impl $crate::protocol::Method<$obj> for $ident {
            const NAME: &'static str = $name;
            type Response = $resp;
        }

        impl $ident {
            pub const fn new(call: $call) -> Self {
                Self(call)
            }
        }
    };
}

macro_rules! get_request_no {
    ($lock:expr) => {{
        let mut lck = $lock.lock().await;
        let ret = *lck;
        *lck += 1;
        drop(lck);
        ret
    }};
}

struct Responder {
    id: String,
    tx: oneshot::Sender<InvocationResult>,
}

/// A batch under construction.
pub struct Request {
    using: IndexSet<&'static str>,
    method_calls: Vec<Value>,
    responders: Vec<Responder>,
    request_no: Arc<FutureMutex<usize>>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct(stringify!(Request))
            .field("using", &self.using)
            .field("method_calls", &self.method_calls)
            .finish_non_exhaustive()
    }
}

impl Request {
    pub fn new(request_no: Arc<FutureMutex<usize>>) -> Self {
        let mut using = IndexSet::new();
        using.insert(JmapCoreCapability::URI);
        Self {
            using,
            method_calls: Vec::new(),
            responders: Vec::new(),
            request_no,
        }
    }

    /// Append a call. Its capabilities join `using`, and the returned
    /// [`PendingResult`] resolves once the batch has been answered.
    pub async fn add_call<M: Method<O>, O: Object>(
        &mut self,
        call: &M,
    ) -> Result<PendingResult<M, O>> {
        let seq = get_request_no!(self.request_no);
        let id = format!("m{}", seq);
        self.method_calls
            .push(serde_json::to_value((M::NAME, call, &id))?);
        self.using.insert(O::CAPABILITY);
        self.using.extend(M::EXTRA_CAPABILITIES.iter().copied());
        let (tx, rx) = oneshot::channel();
        self.responders.push(Responder { id: id.clone(), tx });
        Ok(PendingResult {
            id,
            rx,
            _ph: PhantomData,
        })
    }

    pub fn len(&self) -> usize {
        self.method_calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.method_calls.is_empty()
    }

    pub fn request_no(&self) -> Arc<FutureMutex<usize>> {
        self.request_no.clone()
    }

    /// Freeze the request into a [`Batch`] ready to submit.
    pub fn build(self) -> Batch {
        Batch {
            using: self.using.into_iter().collect(),
            method_calls: self.method_calls,
            responders: self.responders,
        }
    }
}

/// A built batch: the wire request plus one responder per call.
///
/// Consumed by [`Batch::resolve`] or [`Batch::fail`], so every pending
/// result is written at most once.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    using: Vec<&'static str>,
    method_calls: Vec<Value>,
    #[serde(skip)]
    responders: Vec<Responder>,
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct(stringify!(Batch))
            .field("using", &self.using)
            .field("call_ids", &self.call_ids().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Batch {
    pub fn using(&self) -> &[&'static str] {
        &self.using
    }

    pub fn method_calls(&self) -> &[Value] {
        &self.method_calls
    }

    pub fn call_ids(&self) -> impl Iterator<Item = &str> {
        self.responders.iter().map(|r| r.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.method_calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.method_calls.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// `true` if every caller dropped its [`PendingResult`].
    pub fn is_cancelled(&self) -> bool {
        !self.responders.is_empty() && self.responders.iter().all(|r| r.tx.is_canceled())
    }

    /// Completes when every caller has dropped its [`PendingResult`]. A
    /// batch with a single remaining interested caller is never cancelled.
    pub async fn cancelled(&mut self) {
        if self.responders.is_empty() {
            futures::future::pending::<()>().await;
        }
        futures::future::join_all(self.responders.iter_mut().map(|r| r.tx.cancellation())).await;
    }

    /// Deliver a failure to every pending result.
    pub fn fail(self, err: Error) {
        for Responder { tx, .. } in self.responders {
            _ = tx.send(InvocationResult::TransportError(err.clone()));
        }
    }

    /// Demultiplex `response` to the pending results of this batch.
    ///
    /// Responses sharing a call id are grouped: the first is the primary
    /// response, the rest are additional responses of implicit calls. A call
    /// the server did not answer is failed with a protocol error.
    pub fn resolve(self, response: Response) -> ResponseInfo {
        let Response {
            method_responses,
            created_ids,
            session_state,
        } = response;
        let mut by_id: IndexMap<String, Vec<Invocation>> = IndexMap::new();
        for (name, arguments, id) in method_responses {
            by_id.entry(id.clone()).or_default().push(Invocation {
                name,
                arguments,
                id,
            });
        }
        for Responder { id, tx } in self.responders {
            let result = match by_id.shift_remove(&id) {
                None => InvocationResult::TransportError(
                    Error::new(format!("response not found for id {}", id))
                        .set_kind(ErrorKind::ProtocolError),
                ),
                Some(mut list) => {
                    let primary = list.remove(0);
                    if primary.name == "error" {
                        match crate::deserialize_from_str::<MethodError>(primary.arguments.get()) {
                            Ok(error) => InvocationResult::MethodError { id, error },
                            Err(err) => InvocationResult::TransportError(err),
                        }
                    } else {
                        InvocationResult::Success {
                            primary,
                            additional: list,
                        }
                    }
                }
            };
            // The receiver is gone if the caller lost interest.
            _ = tx.send(result);
        }
        for id in by_id.keys() {
            log::warn!("Server returned a response for unknown call id {}", id);
        }
        ResponseInfo {
            created_ids,
            session_state,
        }
    }
}

/// One `[name, arguments, id]` entry of `methodResponses`.
#[derive(Clone, Debug)]
pub struct Invocation {
    pub name: String,
    pub arguments: Box<RawValue>,
    pub id: String,
}

impl Invocation {
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        crate::deserialize_from_str(self.arguments.get())
    }
}

/// The outcome of one call of a batch.
#[derive(Debug)]
pub enum InvocationResult {
    /// The primary response plus any additional responses the server sent
    /// under the same call id.
    Success {
        primary: Invocation,
        additional: Vec<Invocation>,
    },
    /// The call was answered with an `error` response.
    MethodError { id: String, error: MethodError },
    /// No answer for this call could be obtained.
    TransportError(Error),
}

impl InvocationResult {
    pub fn into_result(self, method: &str) -> Result<(Invocation, Vec<Invocation>)> {
        match self {
            Self::Success {
                primary,
                additional,
            } => Ok((primary, additional)),
            Self::MethodError { id, error } => Err(error.into_error(method, &id)),
            Self::TransportError(err) => Err(err),
        }
    }
}

/// The caller's handle on one call of a batch.
///
/// It also produces result references to that call for later calls of the
/// same batch. Dropping it before resolution tells the transport this
/// caller is no longer interested.
pub struct PendingResult<M: Method<OBJ>, OBJ: Object> {
    id: String,
    rx: oneshot::Receiver<InvocationResult>,
    _ph: PhantomData<fn() -> (M, OBJ)>,
}

impl<M: Method<OBJ>, OBJ: Object> std::fmt::Debug for PendingResult<M, OBJ> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct(stringify!(PendingResult))
            .field("method", &M::NAME)
            .field("id", &self.id)
            .finish()
    }
}

impl<M: Method<OBJ>, OBJ: Object> PendingResult<M, OBJ> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// A reference to `field` of this call's result, to use as an argument
    /// of a later call.
    pub fn reference<T: Clone + PartialEq + Eq + Hash>(
        &self,
        field: ResultField<M, OBJ>,
    ) -> Argument<T> {
        Argument::reference::<M, OBJ>(&self.id, field)
    }

    pub async fn raw(self) -> InvocationResult {
        match self.rx.await {
            Ok(res) => res,
            Err(oneshot::Canceled) => InvocationResult::TransportError(
                Error::new(format!(
                    "{} ({}): batch was dropped before a response was received",
                    M::NAME,
                    self.id
                ))
                .set_kind(ErrorKind::Network(NetworkErrorKind::ConnectionFailed)),
            ),
        }
    }

    /// The primary response and any additional responses.
    pub async fn responses(self) -> Result<(M::Response, Vec<Invocation>)> {
        let (primary, additional) = self.raw().await.into_result(M::NAME)?;
        if primary.name != M::NAME {
            return Err(Error::new(format!(
                "Expected a {} response for call {}, got {}",
                M::NAME,
                primary.id,
                primary.name
            ))
            .set_kind(ErrorKind::ProtocolError));
        }
        Ok((primary.parse()?, additional))
    }

    pub async fn response(self) -> Result<M::Response> {
        Ok(self.responses().await?.0)
    }
}

/// A request-level response.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub method_responses: Vec<(String, Box<RawValue>, String)>,
    #[serde(default)]
    pub created_ids: IndexMap<String, String>,
    #[serde(default)]
    pub session_state: State<Session>,
}

impl Response {
    /// Parse a response body. A problem details object in place of a
    /// response is returned as an [`ErrorKind::Request`] error.
    pub fn parse(text: &str) -> Result<Self> {
        if cfg!(feature = "jmap-trace") {
            log::trace!("response: {}", text);
        }
        match crate::deserialize_from_str::<Self>(text) {
            Ok(v) => Ok(v),
            Err(err) => match serde_json::from_str::<RequestError>(text) {
                Ok(request_error) => Err(request_error.into()),
                Err(_) => Err(err),
            },
        }
    }
}

/// What a transport learns from a response besides the call results.
#[derive(Clone, Debug, Default)]
pub struct ResponseInfo {
    pub created_ids: IndexMap<String, String>,
    pub session_state: State<Session>,
}
