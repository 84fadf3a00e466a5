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

//! An in-process JMAP server behind the `Transport` trait.
//!
//! State tokens are `s{n}`, `n` being the number of changes recorded in a
//! collection. Changes can be expired to force `cannotCalculateChanges`.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use indexmap::{IndexMap, IndexSet};
use melib_jmap::{
    cache::{ram_cache::RamCache, CacheHandle},
    error::{Error, ErrorKind, NetworkErrorKind, Result},
    futures::lock::Mutex as FutureMutex,
    protocol::{Batch, Response},
    push::{ListenerId, PushListener, PushListeners, StateChange},
    query::QueryCache,
    session::{NoSessionCache, Session, SessionResolver, SessionSource},
    sync::{EventConsumer, SyncEngine, SyncEvent},
    transport::{ConnectionState, Transport},
    utils::futures::ResultFuture,
};
use serde_json::{json, Map, Value};

pub const ACCOUNT_ID: &str = "u1";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Change {
    Created,
    Updated,
    Destroyed,
}

#[derive(Debug, Default)]
pub struct Collection {
    pub objects: IndexMap<String, Value>,
    history: Vec<(String, Change)>,
    /// Changes since a state older than this cannot be calculated.
    oldest_state: usize,
}

fn parse_state(state: &str) -> Option<usize> {
    state.strip_prefix('s')?.parse().ok()
}

fn method_error(kind: &str) -> Value {
    json!({ "type": kind })
}

impl Collection {
    pub fn state(&self) -> String {
        format!("s{}", self.history.len())
    }

    pub fn create(&mut self, id: &str, mut object: Value) {
        object["id"] = json!(id);
        self.objects.insert(id.to_string(), object);
        self.history.push((id.to_string(), Change::Created));
    }

    pub fn update(&mut self, id: &str, f: impl FnOnce(&mut Value)) {
        if let Some(object) = self.objects.get_mut(id) {
            f(object);
            self.history.push((id.to_string(), Change::Updated));
        }
    }

    pub fn destroy(&mut self, id: &str) {
        if self.objects.shift_remove(id).is_some() {
            self.history.push((id.to_string(), Change::Destroyed));
        }
    }

    /// Forget the history: only the current state can be synced from.
    pub fn expire_changes(&mut self) {
        self.oldest_state = self.history.len();
    }

    fn changes(&self, args: &Value) -> std::result::Result<Value, Value> {
        let since = args["sinceState"]
            .as_str()
            .and_then(parse_state)
            .filter(|s| *s >= self.oldest_state && *s <= self.history.len())
            .ok_or_else(|| method_error("cannotCalculateChanges"))?;
        let max_changes = args["maxChanges"]
            .as_u64()
            .map_or(usize::MAX, |m| m as usize);
        let new_state = since + (self.history.len() - since).min(max_changes);
        let mut seen: IndexMap<&str, (Change, Change)> = IndexMap::new();
        for (id, change) in &self.history[since..new_state] {
            seen.entry(id.as_str())
                .and_modify(|(_, last)| *last = *change)
                .or_insert((*change, *change));
        }
        let (mut created, mut updated, mut destroyed) = (vec![], vec![], vec![]);
        for (id, (first, last)) in seen {
            match (first, last) {
                (Change::Created, Change::Destroyed) => {}
                (Change::Created, _) => created.push(id),
                (_, Change::Destroyed) => destroyed.push(id),
                _ => updated.push(id),
            }
        }
        Ok(json!({
            "accountId": ACCOUNT_ID,
            "oldState": format!("s{}", since),
            "newState": format!("s{}", new_state),
            "hasMoreChanges": new_state < self.history.len(),
            "created": created,
            "updated": updated,
            "destroyed": destroyed,
        }))
    }

    fn get(&self, args: &Value) -> Value {
        let ids: Vec<String> = match args.get("ids") {
            Some(Value::Array(ids)) => ids
                .iter()
                .filter_map(|id| id.as_str().map(str::to_string))
                .collect(),
            _ => self.objects.keys().cloned().collect(),
        };
        let properties: Option<Vec<&str>> = args["properties"]
            .as_array()
            .map(|p| p.iter().filter_map(Value::as_str).collect());
        let mut list = vec![];
        let mut not_found = vec![];
        for id in ids {
            match self.objects.get(&id) {
                Some(object) => list.push(match properties {
                    None => object.clone(),
                    Some(ref properties) => Value::Object(
                        object
                            .as_object()
                            .into_iter()
                            .flatten()
                            .filter(|(k, _)| {
                                k.as_str() == "id" || properties.contains(&k.as_str())
                            })
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect(),
                    ),
                }),
                None => not_found.push(id),
            }
        }
        json!({
            "accountId": ACCOUNT_ID,
            "state": self.state(),
            "list": list,
            "notFound": not_found,
        })
    }
}

#[derive(Debug)]
pub struct MockServer {
    pub max_objects_in_get: u64,
    pub session_state: String,
    pub mailboxes: Collection,
    pub identities: Collection,
    pub emails: Collection,
    pub threads: Collection,
    /// `false` to answer every `Email/queryChanges` with
    /// `cannotCalculateChanges`.
    pub query_changes: bool,
    /// Email ids with their mailboxes, newest first, after every email
    /// change.
    email_snapshots: IndexMap<String, Vec<(String, Value)>>,
    /// Method names of every batch received.
    pub batches: Vec<Vec<String>>,
}

impl MockServer {
    pub fn new(max_objects_in_get: u64) -> Self {
        let mut ret = Self {
            max_objects_in_get,
            session_state: "cafe".to_string(),
            mailboxes: Collection::default(),
            identities: Collection::default(),
            emails: Collection::default(),
            threads: Collection::default(),
            query_changes: true,
            email_snapshots: IndexMap::new(),
            batches: vec![],
        };
        ret.snapshot_emails();
        ret
    }

    pub fn session(&self) -> Value {
        let mut capabilities = Map::new();
        capabilities.insert(
            "urn:ietf:params:jmap:core".into(),
            json!({ "maxObjectsInGet": self.max_objects_in_get, "maxCallsInRequest": 32 }),
        );
        capabilities.insert("urn:ietf:params:jmap:mail".into(), json!({}));
        capabilities.insert("urn:ietf:params:jmap:submission".into(), json!({}));
        json!({
            "capabilities": capabilities,
            "accounts": {
                ACCOUNT_ID: {
                    "name": "user@example.com",
                    "isPersonal": true,
                    "isReadOnly": false,
                    "accountCapabilities": {},
                },
            },
            "primaryAccounts": {
                "urn:ietf:params:jmap:mail": ACCOUNT_ID,
                "urn:ietf:params:jmap:submission": ACCOUNT_ID,
            },
            "username": "user@example.com",
            "apiUrl": "https://jmap.example.com/api/",
            "downloadUrl": "https://jmap.example.com/download/{accountId}/{blobId}/{name}?accept={type}",
            "uploadUrl": "https://jmap.example.com/upload/{accountId}/",
            "eventSourceUrl": "https://jmap.example.com/eventsource/?types={types}&closeafter={closeafter}&ping={ping}",
            "state": self.session_state,
        })
    }

    pub fn add_mailbox(&mut self, id: &str, name: &str) {
        self.mailboxes.create(id, json!({ "name": name }));
    }

    pub fn add_identity(&mut self, id: &str, email: &str) {
        self.identities
            .create(id, json!({ "name": "User", "email": email }));
    }

    /// Add an email received at second `received` of the day, creating or
    /// updating its thread.
    pub fn add_email(&mut self, id: &str, thread_id: &str, mailbox_id: &str, received: u32) {
        self.emails.create(
            id,
            json!({
                "threadId": thread_id,
                "mailboxIds": { mailbox_id: true },
                "keywords": {},
                "receivedAt": format!(
                    "2024-03-01T{:02}:{:02}:{:02}Z",
                    received / 3600,
                    received / 60 % 60,
                    received % 60
                ),
                "subject": format!("Message {}", id),
            }),
        );
        if self.threads.objects.contains_key(thread_id) {
            self.threads.update(thread_id, |thread| {
                if let Some(ids) = thread["emailIds"].as_array_mut() {
                    ids.push(json!(id));
                }
            });
        } else {
            self.threads.create(thread_id, json!({ "emailIds": [id] }));
        }
        self.snapshot_emails();
    }

    pub fn set_keyword(&mut self, id: &str, keyword: &str) {
        self.emails.update(id, |email| {
            email["keywords"][keyword] = json!(true);
        });
        self.snapshot_emails();
    }

    pub fn destroy_email(&mut self, id: &str) {
        let Some(thread_id) = self
            .emails
            .objects
            .get(id)
            .and_then(|e| e["threadId"].as_str().map(str::to_string))
        else {
            return;
        };
        self.emails.destroy(id);
        let mut now_empty = false;
        self.threads.update(&thread_id, |thread| {
            if let Some(ids) = thread["emailIds"].as_array_mut() {
                ids.retain(|e| e != id);
                now_empty = ids.is_empty();
            }
        });
        if now_empty {
            self.threads.destroy(&thread_id);
        }
        self.snapshot_emails();
    }

    /// A push notification with the current state of every collection.
    pub fn state_change(&self) -> StateChange {
        serde_json::from_value(json!({
            "@type": "StateChange",
            "changed": {
                ACCOUNT_ID: {
                    "Mailbox": self.mailboxes.state(),
                    "Identity": self.identities.state(),
                    "Email": self.emails.state(),
                    "Thread": self.threads.state(),
                },
            },
        }))
        .unwrap()
    }

    fn sorted_emails(&self) -> Vec<(String, Value)> {
        let mut emails = self
            .emails
            .objects
            .iter()
            .map(|(id, e)| {
                (
                    id.clone(),
                    e["receivedAt"].as_str().unwrap_or_default().to_string(),
                    e["mailboxIds"].clone(),
                )
            })
            .collect::<Vec<_>>();
        emails.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        emails.into_iter().map(|(id, _, m)| (id, m)).collect()
    }

    fn snapshot_emails(&mut self) {
        let sorted = self.sorted_emails();
        self.email_snapshots.insert(self.emails.state(), sorted);
    }

    fn query_ids(emails: &[(String, Value)], filter: &Value) -> Vec<String> {
        let in_mailbox = filter["inMailbox"].as_str();
        emails
            .iter()
            .filter(|(_, mailboxes)| in_mailbox.map_or(true, |m| mailboxes.get(m).is_some()))
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn query(&self, args: &Value) -> std::result::Result<Value, Value> {
        let ids = Self::query_ids(&self.sorted_emails(), &args["filter"]);
        let mut position = args["position"].as_u64().unwrap_or(0) as usize;
        if let Some(anchor) = args["anchor"].as_str() {
            let index = ids
                .iter()
                .position(|id| id == anchor)
                .ok_or_else(|| method_error("anchorNotFound"))?;
            position = (index as i64 + args["anchorOffset"].as_i64().unwrap_or(0)).max(0) as usize;
        }
        let position = position.min(ids.len());
        let limit = args["limit"].as_u64().map_or(ids.len(), |l| l as usize);
        let page = ids
            .iter()
            .skip(position)
            .take(limit)
            .cloned()
            .collect::<Vec<_>>();
        let mut ret = json!({
            "accountId": ACCOUNT_ID,
            "queryState": self.emails.state(),
            "canCalculateChanges": self.query_changes,
            "position": position,
            "ids": page,
        });
        if args["calculateTotal"].as_bool().unwrap_or(false) {
            ret["total"] = json!(ids.len());
        }
        Ok(ret)
    }

    fn query_changes(&self, args: &Value) -> std::result::Result<Value, Value> {
        if !self.query_changes {
            return Err(method_error("cannotCalculateChanges"));
        }
        let since = args["sinceQueryState"].as_str().unwrap_or_default();
        let old = self
            .email_snapshots
            .get(since)
            .map(|emails| Self::query_ids(emails, &args["filter"]))
            .ok_or_else(|| method_error("cannotCalculateChanges"))?;
        let new = Self::query_ids(&self.sorted_emails(), &args["filter"]);
        let removed = old
            .iter()
            .filter(|id| !new.contains(id))
            .collect::<Vec<_>>();
        let added = new
            .iter()
            .enumerate()
            .filter(|(_, id)| !old.contains(id))
            .map(|(index, id)| json!({ "id": id, "index": index }))
            .collect::<Vec<_>>();
        Ok(json!({
            "accountId": ACCOUNT_ID,
            "oldQueryState": since,
            "newQueryState": self.emails.state(),
            "total": new.len(),
            "removed": removed,
            "added": added,
        }))
    }

    fn email_set(&mut self, args: &Value) -> std::result::Result<Value, Value> {
        let old_state = self.emails.state();
        if let Some(if_in_state) = args["ifInState"].as_str() {
            if if_in_state != old_state {
                return Err(method_error("stateMismatch"));
            }
        }
        let mut updated = Map::new();
        let mut not_updated = Map::new();
        for (id, patch) in args["update"].as_object().into_iter().flatten() {
            if !self.emails.objects.contains_key(id) {
                not_updated.insert(id.clone(), json!({ "type": "notFound" }));
                continue;
            }
            self.emails.update(id, |email| {
                for (path, value) in patch.as_object().into_iter().flatten() {
                    set_path(email, &path.split('/').collect::<Vec<_>>(), value.clone());
                }
            });
            updated.insert(id.clone(), Value::Null);
        }
        let mut destroyed = vec![];
        for id in args["destroy"].as_array().into_iter().flatten() {
            if let Some(id) = id.as_str() {
                self.destroy_email(id);
                destroyed.push(id.to_string());
            }
        }
        self.snapshot_emails();
        Ok(json!({
            "accountId": ACCOUNT_ID,
            "oldState": old_state,
            "newState": self.emails.state(),
            "updated": updated,
            "notUpdated": not_updated,
            "destroyed": destroyed,
        }))
    }

    fn call(&mut self, name: &str, args: &Value) -> std::result::Result<Value, Value> {
        match name {
            "Mailbox/get" => Ok(self.mailboxes.get(args)),
            "Identity/get" => Ok(self.identities.get(args)),
            "Email/get" => Ok(self.emails.get(args)),
            "Thread/get" => Ok(self.threads.get(args)),
            "Mailbox/changes" => self.mailboxes.changes(args),
            "Identity/changes" => self.identities.changes(args),
            "Email/changes" => self.emails.changes(args),
            "Thread/changes" => self.threads.changes(args),
            "Email/query" => self.query(args),
            "Email/queryChanges" => self.query_changes(args),
            "Email/set" => self.email_set(args),
            _ => Err(method_error("unknownMethod")),
        }
    }

    /// Answer a request object with a response object.
    pub fn handle(&mut self, request: &Value) -> Value {
        let mut responses: Vec<Value> = vec![];
        let mut names = vec![];
        for call in request["methodCalls"].as_array().into_iter().flatten() {
            let name = call[0].as_str().unwrap_or_default().to_string();
            let id = call[2].clone();
            names.push(name.clone());
            let response = match resolve_references(&call[1], &responses) {
                Some(args) => self.call(&name, &args),
                None => Err(method_error("invalidResultReference")),
            };
            responses.push(match response {
                Ok(args) => json!([name, args, id]),
                Err(error) => json!(["error", error, id]),
            });
        }
        self.batches.push(names);
        json!({
            "methodResponses": responses,
            "sessionState": self.session_state,
        })
    }
}

/// Apply one `PatchObject` entry.
fn set_path(target: &mut Value, path: &[&str], value: Value) {
    match path {
        [] => *target = value,
        [first, rest @ ..] => set_path(&mut target[*first], rest, value),
    }
}

/// Replace every `#key` result reference of `args` by the value it points
/// to.
fn resolve_references(args: &Value, responses: &[Value]) -> Option<Value> {
    let mut ret = Map::new();
    for (key, value) in args.as_object()? {
        let Some(key) = key.strip_prefix('#') else {
            ret.insert(key.clone(), value.clone());
            continue;
        };
        let result_of = value["resultOf"].as_str()?;
        let name = value["name"].as_str()?;
        let path = value["path"].as_str()?;
        let response = responses
            .iter()
            .find(|r| r[2].as_str() == Some(result_of) && r[0].as_str() == Some(name))?;
        let segments = path.split('/').skip(1).collect::<Vec<_>>();
        ret.insert(key.to_string(), evaluate(&response[1], &segments)?);
    }
    Some(Value::Object(ret))
}

fn evaluate(value: &Value, path: &[&str]) -> Option<Value> {
    let Some((first, rest)) = path.split_first() else {
        return Some(value.clone());
    };
    if *first == "*" {
        let mut ret = vec![];
        for item in value.as_array()? {
            match evaluate(item, rest)? {
                Value::Array(items) => ret.extend(items),
                other => ret.push(other),
            }
        }
        return Some(Value::Array(ret));
    }
    match value {
        Value::Array(items) => evaluate(items.get(first.parse::<usize>().ok()?)?, rest),
        Value::Object(map) => evaluate(map.get(*first)?, rest),
        _ => None,
    }
}

#[derive(Debug)]
pub struct MockTransport {
    pub server: Arc<Mutex<MockServer>>,
    listeners: PushListeners,
    /// The next batch calling this method is lost on the way.
    fail_once: Mutex<Option<String>>,
}

impl MockTransport {
    pub fn new(server: Arc<Mutex<MockServer>>) -> Self {
        Self {
            server,
            listeners: PushListeners::default(),
            fail_once: Mutex::new(None),
        }
    }

    /// Fail the next batch that contains a `method` call with a network
    /// error, without it reaching the server.
    pub fn fail_once(&self, method: &str) {
        *self.fail_once.lock().unwrap() = Some(method.to_string());
    }

    /// Deliver the server's current states to the push listeners.
    pub fn push(&self) {
        let change = self.server.lock().unwrap().state_change();
        self.listeners.dispatch(&change);
    }
}

impl Transport for MockTransport {
    fn submit(&self, batch: Batch) -> ResultFuture<()> {
        let request: Value = serde_json::from_str(&batch.to_json()?)?;
        let mut fail_once = self.fail_once.lock().unwrap();
        let lost = fail_once.as_ref().map_or(false, |method| {
            request["methodCalls"]
                .as_array()
                .into_iter()
                .flatten()
                .any(|call| call[0].as_str() == Some(method.as_str()))
        });
        if lost {
            *fail_once = None;
            let err = Error::new("Connection reset by peer")
                .set_kind(ErrorKind::Network(NetworkErrorKind::ConnectionFailed));
            batch.fail(err.clone());
            return Ok(Box::pin(async move { Err(err) }));
        }
        drop(fail_once);
        let response = self.server.lock().unwrap().handle(&request);
        let response = Response::parse(&response.to_string())?;
        Ok(Box::pin(async move {
            batch.resolve(response);
            Ok(())
        }))
    }

    fn add_push_listener(&self, listener: PushListener) -> ListenerId {
        self.listeners.add(listener).0
    }

    fn remove_push_listener(&self, id: ListenerId) {
        self.listeners.remove(id);
    }

    fn connection_state(&self) -> ConnectionState {
        ConnectionState::Connected
    }
}

#[derive(Debug)]
pub struct MockSessionSource {
    pub server: Arc<Mutex<MockServer>>,
}

impl SessionSource for MockSessionSource {
    fn fetch(&self) -> ResultFuture<Session> {
        let session = self.server.lock().unwrap().session();
        Ok(Box::pin(async move {
            serde_json::from_value::<Session>(session).map_err(Error::from)
        }))
    }

    fn cache_key(&self) -> String {
        "user@example.com@https://jmap.example.com".to_string()
    }
}

/// A sync engine and a query cache sharing one in-memory cache, talking to
/// a [`MockServer`].
pub struct Harness {
    pub server: Arc<Mutex<MockServer>>,
    pub transport: Arc<MockTransport>,
    pub resolver: Arc<SessionResolver>,
    pub engine: SyncEngine,
    pub queries: QueryCache,
    pub cache: CacheHandle,
    pub events: Arc<Mutex<Vec<SyncEvent>>>,
}

impl Harness {
    pub fn new(server: MockServer) -> Self {
        let server = Arc::new(Mutex::new(server));
        let transport = Arc::new(MockTransport::new(server.clone()));
        let resolver = Arc::new(SessionResolver::new(
            Arc::new(MockSessionSource {
                server: server.clone(),
            }),
            Arc::new(NoSessionCache),
        ));
        let cache = CacheHandle::new(RamCache::new());
        let request_no = Arc::new(FutureMutex::new(0));
        let events = Arc::new(Mutex::new(vec![]));
        let engine = SyncEngine::new(
            transport.clone(),
            resolver.clone(),
            cache.clone(),
            request_no.clone(),
            Some(EventConsumer::new({
                let events = events.clone();
                Arc::new(move |event: SyncEvent| events.lock().unwrap().push(event))
            })),
        );
        let queries = QueryCache::new(
            transport.clone(),
            resolver.clone(),
            cache.clone(),
            request_no,
        );
        Self {
            server,
            transport,
            resolver,
            engine,
            queries,
            cache,
            events,
        }
    }

    pub fn server(&self) -> std::sync::MutexGuard<'_, MockServer> {
        self.server.lock().unwrap()
    }

    /// Method names of the last batch the server received.
    pub fn last_batch(&self) -> Vec<String> {
        self.server().batches.last().cloned().unwrap_or_default()
    }

    pub fn batch_count(&self) -> usize {
        self.server().batches.len()
    }

    pub fn take_events(&self) -> Vec<SyncEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    pub fn block_on<T>(&self, f: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        melib_jmap::futures::executor::block_on(f)
    }
}

/// Ids of a collection snapshot, sorted.
pub fn ids<T>(objects: impl IntoIterator<Item = T>, id: impl Fn(&T) -> String) -> IndexSet<String> {
    let mut ret = objects.into_iter().map(|o| id(&o)).collect::<Vec<_>>();
    ret.sort();
    ret.into_iter().collect()
}
