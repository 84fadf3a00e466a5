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

use futures::executor::block_on;
use melib_jmap::{
    mail::{EmailObject, IdentityObject, MailboxObject, ThreadObject},
    query::EmailQuerySpec,
    sync::{Status, SyncEvent},
};
use mock::{ids, Harness, MockServer};

fn server() -> MockServer {
    let mut server = MockServer::new(5);
    server.add_mailbox("mb-inbox", "Inbox");
    server.add_mailbox("mb-archive", "Archive");
    server.add_identity("id1", "user@example.com");
    server.add_email("e1", "t1", "mb-inbox", 10);
    server.add_email("e2", "t2", "mb-inbox", 20);
    server.add_email("e3", "t1", "mb-archive", 30);
    server
}

fn email_ids(h: &Harness) -> Vec<String> {
    ids(h.cache.snapshot::<EmailObject>(), |e| e.id.to_string())
        .into_iter()
        .collect()
}

fn assert_states_match(h: &Harness) {
    let state = h.cache.objects_state();
    let server = h.server();
    assert_eq!(
        state.mailbox.as_ref().map(|s| s.to_string()),
        Some(server.mailboxes.state())
    );
    assert_eq!(
        state.identity.as_ref().map(|s| s.to_string()),
        Some(server.identities.state())
    );
    assert_eq!(
        state.email.as_ref().map(|s| s.to_string()),
        Some(server.emails.state())
    );
    assert_eq!(
        state.thread.as_ref().map(|s| s.to_string()),
        Some(server.threads.state())
    );
}

#[test]
fn test_jmap_sync_bootstrap() {
    let h = Harness::new(server());
    assert_eq!(block_on(h.engine.refresh()).unwrap(), Status::Updated);
    assert_eq!(h.batch_count(), 1);
    assert_eq!(
        h.last_batch(),
        vec![
            "Mailbox/get",
            "Identity/get",
            "Email/query",
            "Email/get",
            "Thread/get"
        ]
    );
    assert_eq!(h.cache.snapshot::<MailboxObject>().len(), 2);
    assert_eq!(h.cache.snapshot::<IdentityObject>().len(), 1);
    assert_eq!(email_ids(&h), vec!["e1", "e2", "e3"]);
    assert_eq!(h.cache.snapshot::<ThreadObject>().len(), 2);
    assert_states_match(&h);
    assert!(matches!(
        h.take_events().as_slice(),
        [SyncEvent::Refreshed {
            status: Status::Updated,
            ..
        }]
    ));
}

#[test]
fn test_jmap_sync_noop_refresh() {
    let h = Harness::new(server());
    block_on(h.engine.refresh()).unwrap();
    let state = h.cache.objects_state();
    let emails = serde_json::to_value(h.cache.snapshot::<EmailObject>()).unwrap();
    let mailboxes = serde_json::to_value(h.cache.snapshot::<MailboxObject>()).unwrap();

    for _ in 0..2 {
        assert_eq!(block_on(h.engine.refresh()).unwrap(), Status::Unchanged);
        assert_eq!(
            h.last_batch(),
            vec![
                "Mailbox/changes",
                "Mailbox/get",
                "Mailbox/get",
                "Identity/changes",
                "Identity/get",
                "Identity/get",
                "Email/changes",
                "Email/get",
                "Email/get",
                "Thread/changes",
                "Thread/get",
                "Thread/get",
            ]
        );
        assert_eq!(h.cache.objects_state(), state);
        assert_eq!(
            serde_json::to_value(h.cache.snapshot::<EmailObject>()).unwrap(),
            emails
        );
        assert_eq!(
            serde_json::to_value(h.cache.snapshot::<MailboxObject>()).unwrap(),
            mailboxes
        );
    }
    assert_eq!(h.batch_count(), 3);
}

#[test]
fn test_jmap_sync_delta() {
    let h = Harness::new(server());
    block_on(h.engine.refresh()).unwrap();
    {
        let mut server = h.server();
        server.add_email("e4", "t2", "mb-inbox", 40);
        server.set_keyword("e1", "$seen");
        server.destroy_email("e3");
        server.add_mailbox("mb-trash", "Trash");
    }
    assert_eq!(block_on(h.engine.refresh()).unwrap(), Status::Updated);
    assert_states_match(&h);
    assert_eq!(email_ids(&h), vec!["e1", "e2", "e4"]);
    assert!(h.cache.get::<EmailObject>(&"e1".into()).unwrap().is_seen());
    assert!(!h.cache.get::<EmailObject>(&"e2".into()).unwrap().is_seen());
    let t1 = h.cache.get::<ThreadObject>(&"t1".into()).unwrap();
    assert_eq!(t1.email_ids, vec!["e1".into()]);
    let t2 = h.cache.get::<ThreadObject>(&"t2".into()).unwrap();
    assert_eq!(t2.email_ids, vec!["e2".into(), "e4".into()]);
    assert_eq!(
        h.cache
            .get::<MailboxObject>(&"mb-trash".into())
            .unwrap()
            .name,
        "Trash"
    );

    // Destroying the last email of a thread destroys the thread.
    h.server().destroy_email("e1");
    assert_eq!(block_on(h.engine.refresh()).unwrap(), Status::Updated);
    assert!(h.cache.get::<ThreadObject>(&"t1".into()).is_none());
    assert_eq!(email_ids(&h), vec!["e2", "e4"]);
    assert_states_match(&h);
}

#[test]
fn test_jmap_sync_has_more_changes() {
    let h = Harness::new(server());
    block_on(h.engine.refresh()).unwrap();
    for i in 0..7 {
        h.server()
            .add_mailbox(&format!("mb-{}", i), &format!("Folder {}", i));
    }
    // maxObjectsInGet is 5.
    assert_eq!(block_on(h.engine.refresh()).unwrap(), Status::HasMore);
    assert_eq!(h.cache.snapshot::<MailboxObject>().len(), 7);
    assert_eq!(block_on(h.engine.refresh()).unwrap(), Status::Updated);
    assert_eq!(h.cache.snapshot::<MailboxObject>().len(), 9);
    assert_eq!(block_on(h.engine.refresh()).unwrap(), Status::Unchanged);
    assert_states_match(&h);
}

fn inbox() -> EmailQuerySpec {
    EmailQuerySpec::new(
        Some(
            melib_jmap::mail::EmailFilterCondition::new()
                .in_mailbox(Some("mb-inbox".into()))
                .into(),
        ),
        vec![melib_jmap::comparator::Comparator::new("receivedAt")],
    )
}

#[test]
fn test_jmap_sync_email_invalidation() {
    let h = Harness::new(server());
    block_on(h.engine.refresh()).unwrap();
    block_on(h.queries.query(&inbox(), 10, None)).unwrap();
    assert!(h.queries.window(&inbox()).unwrap().is_some());
    let mailbox_state = h.cache.objects_state().mailbox;
    h.take_events();

    {
        let mut server = h.server();
        server.add_email("e5", "t3", "mb-inbox", 50);
        server.emails.expire_changes();
    }
    assert_eq!(block_on(h.engine.refresh()).unwrap(), Status::Updated);
    let events = h.take_events();
    assert!(
        events.iter().any(|e| matches!(
            e,
            SyncEvent::Invalidated { collections } if collections == &["Email", "Thread"]
        )),
        "{:?}",
        events
    );
    let state = h.cache.objects_state();
    assert_eq!(state.email, None);
    assert_eq!(state.thread, None);
    assert!(h.cache.snapshot::<EmailObject>().is_empty());
    assert!(h.cache.snapshot::<ThreadObject>().is_empty());
    assert!(h.queries.window(&inbox()).unwrap().is_none());
    // Mailboxes and identities are not derived from emails.
    assert_eq!(state.mailbox, mailbox_state);
    assert_eq!(h.cache.snapshot::<MailboxObject>().len(), 2);
    assert_eq!(h.cache.snapshot::<IdentityObject>().len(), 1);

    assert_eq!(block_on(h.engine.refresh()).unwrap(), Status::Updated);
    assert!(h.last_batch().contains(&"Email/query".to_string()));
    assert_eq!(email_ids(&h), vec!["e1", "e2", "e3", "e5"]);
    assert_states_match(&h);
}

#[test]
fn test_jmap_sync_mailbox_invalidation() {
    let h = Harness::new(server());
    block_on(h.engine.refresh()).unwrap();
    block_on(h.queries.query(&inbox(), 10, None)).unwrap();
    let email_state = h.cache.objects_state().email;
    h.take_events();

    {
        let mut server = h.server();
        server.add_mailbox("mb-trash", "Trash");
        server.mailboxes.expire_changes();
    }
    assert_eq!(block_on(h.engine.refresh()).unwrap(), Status::Updated);
    assert!(h.take_events().iter().any(|e| matches!(
        e,
        SyncEvent::Invalidated { collections } if collections == &["Mailbox"]
    )));
    let state = h.cache.objects_state();
    assert_eq!(state.mailbox, None);
    assert!(h.cache.snapshot::<MailboxObject>().is_empty());
    assert_eq!(state.email, email_state);
    assert_eq!(h.cache.snapshot::<EmailObject>().len(), 3);
    assert!(h.queries.window(&inbox()).unwrap().is_some());

    assert_eq!(block_on(h.engine.refresh()).unwrap(), Status::Updated);
    assert_eq!(h.cache.snapshot::<MailboxObject>().len(), 3);
    assert_states_match(&h);
}

#[test]
fn test_jmap_sync_push_state_change() {
    let h = Harness::new(server());
    block_on(h.engine.refresh()).unwrap();
    h.take_events();

    let change = h.server().state_change();
    assert!(h.engine.on_push(&change).is_empty());

    h.server().add_mailbox("mb-trash", "Trash");
    h.server().set_keyword("e2", "$flagged");
    let change = h.server().state_change();
    assert_eq!(h.engine.on_push(&change), vec!["Mailbox", "Email"]);
    assert!(matches!(
        h.take_events().as_slice(),
        [SyncEvent::PushStateChange { stale }] if stale == &["Mailbox", "Email"]
    ));

    assert_eq!(block_on(h.engine.refresh()).unwrap(), Status::Updated);
    let change = h.server().state_change();
    assert!(h.engine.on_push(&change).is_empty());
}
