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

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use futures::executor::block_on;
use serde_json::{json, Value};

use super::*;

fn session_json(state: &str, capabilities: &[&str]) -> Value {
    json!({
        "capabilities": capabilities
            .iter()
            .map(|uri| (uri.to_string(), json!({"maxObjectsInGet": 256})))
            .collect::<serde_json::Map<String, Value>>(),
        "accounts": {
            "u1": {
                "name": "user@example.com",
                "isPersonal": true,
                "isReadOnly": false,
                "accountCapabilities": {},
            },
        },
        "primaryAccounts": {
            "urn:ietf:params:jmap:mail": "u1",
        },
        "username": "user@example.com",
        "apiUrl": "https://jmap.example.com/api/",
        "downloadUrl": "https://jmap.example.com/download/{accountId}/{blobId}/{name}?accept={type}",
        "uploadUrl": "https://jmap.example.com/upload/{accountId}/",
        "eventSourceUrl": "https://jmap.example.com/eventsource/?types={types}&closeafter={closeafter}&ping={ping}",
        "state": state,
    })
}

const CAPABILITIES: &[&str] = &["urn:ietf:params:jmap:core", "urn:ietf:params:jmap:mail"];

#[derive(Debug)]
struct MockSource {
    session: Mutex<Value>,
    fetches: AtomicUsize,
}

impl MockSource {
    fn new(session: Value) -> Arc<Self> {
        Arc::new(Self {
            session: Mutex::new(session),
            fetches: AtomicUsize::new(0),
        })
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl SessionSource for MockSource {
    fn fetch(&self) -> ResultFuture<Session> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let session = self.session.lock().unwrap().clone();
        Ok(Box::pin(async move {
            // Give concurrent callers a chance to find the fetch in flight.
            smol::future::yield_now().await;
            serde_json::from_value::<Session>(session).map_err(Error::from)
        }))
    }

    fn cache_key(&self) -> String {
        "user@example.com@https://jmap.example.com".to_string()
    }
}

#[test]
fn test_jmap_session_shared_fetch() {
    let source = MockSource::new(session_json("s1", CAPABILITIES));
    let resolver = SessionResolver::new(source.clone(), Arc::new(NoSessionCache));
    let (a, b) = block_on(futures::future::join(resolver.get(), resolver.get()));
    assert_eq!(a.unwrap().state.as_str(), "s1");
    assert_eq!(b.unwrap().state.as_str(), "s1");
    assert_eq!(source.fetches(), 1);

    block_on(resolver.get()).unwrap();
    assert_eq!(source.fetches(), 1);
    assert_eq!(
        block_on(resolver.get()).unwrap().mail_account_id().unwrap(),
        Id::from("u1")
    );
}

#[test]
fn test_jmap_session_state_change() {
    let source = MockSource::new(session_json("s1", CAPABILITIES));
    let cache = Arc::new(RamSessionCache::default());
    let resolver = SessionResolver::new(source.clone(), cache.clone());
    block_on(resolver.get()).unwrap();
    assert_eq!(source.fetches(), 1);

    assert!(!resolver.on_session_state(&State::from("s1")));
    assert!(!resolver.on_session_state(&State::default()));
    assert!(!resolver.is_stale());

    *source.session.lock().unwrap() = session_json("s2", CAPABILITIES);
    assert!(resolver.on_session_state(&State::from("s2")));
    assert!(resolver.is_stale());
    // The session cache still holds `s1`; it must not be served.
    assert_eq!(block_on(resolver.get()).unwrap().state.as_str(), "s2");
    assert_eq!(source.fetches(), 2);

    // A fresh resolver is served from the session cache.
    let resolver = SessionResolver::new(source.clone(), cache);
    assert_eq!(block_on(resolver.get()).unwrap().state.as_str(), "s2");
    assert_eq!(source.fetches(), 2);
}

#[test]
fn test_jmap_session_state_mismatch_refetches_once() {
    let source = MockSource::new(session_json("s1", CAPABILITIES));
    let resolver = SessionResolver::new(source.clone(), Arc::new(NoSessionCache));
    block_on(resolver.get()).unwrap();

    // The session resource and the API responses disagree on the state.
    *source.session.lock().unwrap() = session_json("s2", CAPABILITIES);
    assert!(resolver.on_session_state(&State::from("api-s2")));
    assert_eq!(block_on(resolver.get()).unwrap().state.as_str(), "s2");
    assert_eq!(source.fetches(), 2);
    for _ in 0..3 {
        assert!(!resolver.on_session_state(&State::from("api-s2")));
        block_on(resolver.get()).unwrap();
    }
    assert!(!resolver.is_stale());
    assert_eq!(source.fetches(), 2);

    // A later change is still noticed.
    assert!(resolver.on_session_state(&State::from("api-s3")));
    block_on(resolver.get()).unwrap();
    assert_eq!(source.fetches(), 3);
}

#[test]
fn test_jmap_session_capabilities() {
    let source = MockSource::new(session_json("s1", &["urn:ietf:params:jmap:core"]));
    let resolver = SessionResolver::new(source, Arc::new(NoSessionCache));
    let err = block_on(resolver.get()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ProtocolError);
    assert!(err.summary.contains("urn:ietf:params:jmap:mail"), "{}", err);
    assert!(resolver.current().is_none());

    let mut session: Session =
        serde_json::from_value(session_json("s1", CAPABILITIES)).unwrap();
    session.primary_accounts.clear();
    assert_eq!(
        session.check_capabilities().unwrap_err().kind,
        ErrorKind::ProtocolError
    );
    assert_eq!(session.max_objects_in_get(), 256);
    assert!(session.websocket().is_none());
}
