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

mod mock;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use futures::executor::block_on;
use indexmap::IndexMap;
use melib_jmap::{
    cache::RamCache,
    error::NetworkErrorKind,
    mail::EmailObject,
    session::{NoSessionCache, SessionResolver},
    sync::Status,
    transport::http_client,
    AccountSettings, ErrorKind, JmapClient, JmapServerConf,
};
use mock::{MockServer, MockSessionSource, MockTransport};
use serde_json::json;

fn client() -> (Arc<Mutex<MockServer>>, Arc<MockTransport>, JmapClient) {
    let mut server = MockServer::new(10);
    server.add_mailbox("inbox", "Inbox");
    server.add_email("e1", "t1", "inbox", 10);
    server.add_email("e2", "t2", "inbox", 20);
    let server = Arc::new(Mutex::new(server));
    let transport = Arc::new(MockTransport::new(server.clone()));

    let settings = AccountSettings::new("test")
        .with("server_url", "https://jmap.example.com")
        .with("server_username", "user@example.com")
        .with("server_password", "hunter2");
    let server_conf = Arc::new(JmapServerConf::new(&settings).unwrap());
    let http = Arc::new(http_client(&server_conf).unwrap());
    let resolver = Arc::new(SessionResolver::new(
        Arc::new(MockSessionSource {
            server: server.clone(),
        }),
        Arc::new(NoSessionCache),
    ));
    let client = JmapClient::with_transport(
        server_conf,
        http,
        resolver,
        transport.clone(),
        RamCache::new(),
        None,
    );
    (server, transport, client)
}

fn seen(id: &str) -> IndexMap<melib_jmap::Id<EmailObject>, serde_json::Value> {
    [(id.into(), json!({ "keywords/$seen": true }))]
        .into_iter()
        .collect()
}

#[test]
fn test_jmap_client_set_emails() {
    let (server, _, client) = client();
    let err = block_on(client.set_emails(seen("e1"), vec![])).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Invalidated);
    assert!(server.lock().unwrap().batches.is_empty());

    assert_eq!(block_on(client.refresh()).unwrap(), Status::Updated);
    let res = block_on(client.set_emails(seen("e1"), vec![])).unwrap();
    assert!(res
        .updated
        .unwrap()
        .contains_key(&melib_jmap::Id::<EmailObject>::from("e1")));
    // The cache catches up on the next refresh.
    assert!(!client
        .cache()
        .get::<EmailObject>(&"e1".into())
        .unwrap()
        .is_seen());
    assert_eq!(block_on(client.refresh()).unwrap(), Status::Updated);
    assert!(client
        .cache()
        .get::<EmailObject>(&"e1".into())
        .unwrap()
        .is_seen());

    let res = block_on(client.set_emails(IndexMap::new(), vec!["e2".into()]));
    assert_eq!(
        res.unwrap().destroyed.unwrap(),
        vec![melib_jmap::Id::<EmailObject>::from("e2")]
    );
}

#[test]
fn test_jmap_client_set_emails_state_mismatch() {
    let (server, _, client) = client();
    block_on(client.refresh()).unwrap();
    server.lock().unwrap().set_keyword("e2", "$flagged");

    let err = block_on(client.set_emails(seen("e1"), vec![])).unwrap_err();
    assert!(err.is_state_mismatch(), "{:?}", err);
    assert!(server.lock().unwrap().emails.objects["e1"]["keywords"]
        .get("$seen")
        .is_none());

    block_on(client.refresh()).unwrap();
    block_on(client.set_emails(seen("e1"), vec![])).unwrap();
    assert_eq!(
        server.lock().unwrap().emails.objects["e1"]["keywords"]["$seen"],
        json!(true)
    );
}

#[test]
fn test_jmap_client_push_listener() {
    let (server, transport, client) = client();
    block_on(client.refresh()).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let id = client.add_push_listener({
        let calls = calls.clone();
        move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        }
    });
    transport.push();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    client.remove_push_listener(id);
    server.lock().unwrap().add_mailbox("trash", "Trash");
    transport.push();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_jmap_client_query_rows() {
    let (_, _, client) = client();
    let spec = melib_jmap::query::EmailQuerySpec::new(None, vec![]);
    assert!(client.query_rows(&spec).unwrap().is_empty());
    assert_eq!(
        block_on(client.query(&spec, 10, None)).unwrap(),
        Status::Updated
    );
    assert_eq!(
        client
            .query_rows(&spec)
            .unwrap()
            .iter()
            .map(|i| i.id.to_string())
            .collect::<Vec<_>>(),
        vec!["e2", "e1"]
    );
}

#[test]
fn test_jmap_client_refresh_failed_query_window() {
    let (server, transport, client) = client();
    let spec = melib_jmap::query::EmailQuerySpec::new(None, vec![]);
    block_on(client.refresh()).unwrap();
    block_on(client.query(&spec, 10, None)).unwrap();
    server.lock().unwrap().add_email("e3", "t3", "inbox", 30);

    // The collections sync, but the query window cannot be revalidated.
    transport.fail_once("Email/queryChanges");
    let err = block_on(client.refresh()).unwrap_err();
    assert_eq!(
        err.kind,
        ErrorKind::Network(NetworkErrorKind::ConnectionFailed)
    );
    assert!(client.cache().get::<EmailObject>(&"e3".into()).is_some());
    assert!(client.query_rows(&spec).unwrap().is_empty());

    assert_eq!(block_on(client.refresh()).unwrap(), Status::Unchanged);
    assert_eq!(
        block_on(client.query(&spec, 10, None)).unwrap(),
        Status::Updated
    );
    assert_eq!(
        client
            .query_rows(&spec)
            .unwrap()
            .iter()
            .map(|i| i.id.to_string())
            .collect::<Vec<_>>(),
        vec!["e3", "e2", "e1"]
    );
}
