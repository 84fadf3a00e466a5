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

use serde_json::json;

use crate::{
    comparator::Comparator,
    filters::Filter,
    mail::{email::EmailFilter, EmailFilterCondition, EmailObject},
    objects::Id,
    session::Session,
};

const RFC_SESSION: &str = r###"{
  "capabilities": {
    "urn:ietf:params:jmap:core": {
      "maxSizeUpload": 50000000,
      "maxConcurrentUpload": 8,
      "maxSizeRequest": 10000000,
      "maxConcurrentRequests": 8,
      "maxCallsInRequest": 32,
      "maxObjectsInGet": 256,
      "maxObjectsInSet": 128,
      "collationAlgorithms": [
        "i;ascii-numeric",
        "i;ascii-casemap",
        "i;unicode-casemap"
      ]
    },
    "urn:ietf:params:jmap:mail": {},
    "urn:ietf:params:jmap:websocket": {
      "url": "wss://jmap.example.com/ws/",
      "supportsPush": true
    },
    "https://example.com/apis/foobar": {
      "maxFoosFinangled": 42
    }
  },
  "accounts": {
    "A13824": {
      "name": "john@example.com",
      "isPersonal": true,
      "isReadOnly": false,
      "accountCapabilities": {
        "urn:ietf:params:jmap:mail": {
          "maxMailboxesPerEmail": null,
          "maxMailboxDepth": 10
        }
      }
    }
  },
  "primaryAccounts": {
    "urn:ietf:params:jmap:mail": "A13824"
  },
  "username": "john@example.com",
  "apiUrl": "https://jmap.example.com/api/",
  "downloadUrl": "https://jmap.example.com/download/{accountId}/{blobId}/{name}?accept={type}",
  "uploadUrl": "https://jmap.example.com/upload/{accountId}/",
  "eventSourceUrl": "https://jmap.example.com/eventsource/?types={types}&closeafter={closeafter}&ping={ping}",
  "state": "75128aab4b1b"
}"###;

#[test]
fn test_jmap_session_serde() {
    let session: Session = crate::deserialize_from_str(RFC_SESSION).unwrap();
    session.check_capabilities().unwrap();
    assert_eq!(session.mail_account_id().unwrap(), Id::from("A13824"));
    assert_eq!(session.state.as_str(), "75128aab4b1b");
    assert_eq!(session.api_url.as_str(), "https://jmap.example.com/api/");
    let core = session.core_capabilities();
    assert_eq!(core.max_objects_in_get, 256);
    assert_eq!(core.max_calls_in_request, 32);
    assert_eq!(core.collation_algorithms.len(), 3);
    let websocket = session.websocket().unwrap();
    assert_eq!(websocket.url.as_str(), "wss://jmap.example.com/ws/");
    assert!(websocket.supports_push);
    assert_eq!(
        session.capabilities["https://example.com/apis/foobar"].extra_properties
            ["maxFoosFinangled"],
        json!(42)
    );

    let err =
        crate::deserialize_from_str::<Session>(&RFC_SESSION.replace("\"apiUrl\"", "\"apiURL\""))
            .unwrap_err();
    assert_eq!(err.kind, crate::error::ErrorKind::ProtocolError);
}

#[test]
fn test_jmap_filter_composition() {
    let mut filter: EmailFilter = Filter::Condition(
        EmailFilterCondition::new()
            .in_mailbox(Some("inbox".into()))
            .into(),
    );
    let mut from: EmailFilter = EmailFilterCondition::new()
        .from(Some("Manos".into()))
        .into();
    from |= EmailFilterCondition::new()
        .subject(Some("foo".into()))
        .into();
    filter &= from;
    filter &= !EmailFilter::from(EmailFilterCondition::new().has_keyword(Some("$seen".into())));
    assert_eq!(
        serde_json::to_value(&filter).unwrap(),
        json!({
            "operator": "AND",
            "conditions": [
                {"inMailbox": "inbox"},
                {
                    "operator": "OR",
                    "conditions": [{"from": "Manos"}, {"subject": "foo"}],
                },
                {
                    "operator": "NOT",
                    "conditions": [{"hasKeyword": "$seen"}],
                },
            ],
        })
    );
}

#[test]
fn test_jmap_comparator() {
    let sort: Vec<Comparator<EmailObject>> = vec![
        Comparator::new("receivedAt"),
        Comparator::new("subject")
            .is_ascending(true)
            .collation(Some("i;unicode-casemap".into())),
    ];
    assert_eq!(
        serde_json::to_value(&sort).unwrap(),
        json!([
            {"property": "receivedAt", "isAscending": false},
            {"property": "subject", "isAscending": true, "collation": "i;unicode-casemap"},
        ])
    );
}
