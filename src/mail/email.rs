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

use indexmap::IndexMap;
use serde_json::Value;

use crate::{
    capabilities::{Capability, JmapMailCapability},
    filters::{Filter, FilterTrait},
    mail::{mailbox::MailboxObject, thread::ThreadObject},
    methods::{
        Changes, ChangesResponse, Get, GetResponse, Query, QueryChanges, QueryChangesResponse,
        QueryResponse, ResultField, Set, SetResponse,
    },
    objects::{BlobObject, Id, Object},
    protocol::{Method, UtcDate},
};

#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailAddress {
    #[serde(default)]
    pub name: Option<String>,
    pub email: String,
}

/// An email as far as synchronization is concerned: its ids, mailbox
/// membership, keywords and a few header values for listings.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailObject {
    #[serde(default)]
    pub id: Id<EmailObject>,
    #[serde(default)]
    pub blob_id: Id<BlobObject>,
    #[serde(default)]
    pub thread_id: Id<ThreadObject>,
    #[serde(default)]
    pub mailbox_ids: IndexMap<Id<MailboxObject>, bool>,
    #[serde(default)]
    pub keywords: IndexMap<String, bool>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub received_at: UtcDate,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub from: Option<Vec<EmailAddress>>,
    #[serde(default)]
    pub preview: Option<String>,
    #[serde(flatten)]
    pub extra_properties: IndexMap<String, Value>,
}

impl Object for EmailObject {
    const NAME: &'static str = "Email";
    const CAPABILITY: &'static str = JmapMailCapability::URI;
    const SERVER_SET_FIELDS: &'static [&'static str] =
        &["id", "blobId", "threadId", "size", "preview"];
}

impl EmailObject {
    _impl!(get keywords, keywords: IndexMap<String, bool>);
    _impl!(get mailbox_ids, mailbox_ids: IndexMap<Id<MailboxObject>, bool>);

    pub fn is_seen(&self) -> bool {
        self.keywords.get("$seen").copied().unwrap_or(false)
    }
}

/// `FilterCondition` of `Email/query`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailFilterCondition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_mailbox: Option<Id<MailboxObject>>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub in_mailbox_other_than: Vec<Id<MailboxObject>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<UtcDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<UtcDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_keyword: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_keyword: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl EmailFilterCondition {
    pub fn new() -> Self {
        Self::default()
    }

    _impl!(in_mailbox: Option<Id<MailboxObject>>);
    _impl!(in_mailbox_other_than: Vec<Id<MailboxObject>>);
    _impl!(before: Option<UtcDate>);
    _impl!(after: Option<UtcDate>);
    _impl!(min_size: Option<u64>);
    _impl!(max_size: Option<u64>);
    _impl!(has_keyword: Option<String>);
    _impl!(not_keyword: Option<String>);
    _impl!(text: Option<String>);
    _impl!(from: Option<String>);
    _impl!(to: Option<String>);
    _impl!(subject: Option<String>);
    _impl!(body: Option<String>);
}

impl FilterTrait<EmailObject> for EmailFilterCondition {}

pub type EmailFilter = Filter<EmailFilterCondition, EmailObject>;

crate::_impl_jmap_method! {
    EmailGet: Get<EmailObject>, EmailObject => "Email/get", response: GetResponse<EmailObject>
}

crate::_impl_jmap_method! {
    EmailChanges: Changes<EmailObject>, EmailObject => "Email/changes", response: ChangesResponse<EmailObject>
}

impl EmailChanges {
    pub const RESULT_FIELD_CREATED: ResultField<Self, EmailObject> = ResultField::new("/created");
    pub const RESULT_FIELD_UPDATED: ResultField<Self, EmailObject> = ResultField::new("/updated");
}

crate::_impl_jmap_method! {
    EmailSet: Set<EmailObject>, EmailObject => "Email/set", response: SetResponse<EmailObject>
}

/// `Email/query`, with the additional `collapseThreads` argument.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailQuery {
    #[serde(flatten)]
    pub query_call: Query<EmailFilter, EmailObject>,
    pub collapse_threads: bool,
}

impl Method<EmailObject> for EmailQuery {
    const NAME: &'static str = "Email/query";
    type Response = QueryResponse<EmailObject>;
}

impl EmailQuery {
    pub const RESULT_FIELD_IDS: ResultField<Self, EmailObject> = ResultField::new("/ids");

    pub fn new(query_call: Query<EmailFilter, EmailObject>) -> Self {
        Self {
            query_call,
            collapse_threads: false,
        }
    }

    _impl!(collapse_threads: bool);
}

/// `Email/queryChanges`, with the additional `collapseThreads` argument.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailQueryChanges {
    #[serde(flatten)]
    pub query_changes_call: QueryChanges<EmailFilter, EmailObject>,
    pub collapse_threads: bool,
}

impl Method<EmailObject> for EmailQueryChanges {
    const NAME: &'static str = "Email/queryChanges";
    type Response = QueryChangesResponse<EmailObject>;
}

impl EmailQueryChanges {
    pub const RESULT_FIELD_ADDED_IDS: ResultField<Self, EmailObject> =
        ResultField::new("/added/*/id");

    pub fn new(query_changes_call: QueryChanges<EmailFilter, EmailObject>) -> Self {
        Self {
            query_changes_call,
            collapse_threads: false,
        }
    }

    _impl!(collapse_threads: bool);
}
