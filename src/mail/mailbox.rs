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

use crate::{
    capabilities::{Capability, JmapMailCapability},
    methods::{Changes, ChangesResponse, Get, GetResponse},
    objects::{Id, Object},
};

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxObject {
    pub id: Id<MailboxObject>,
    #[serde(default)]
    pub is_subscribed: bool,
    #[serde(default)]
    pub my_rights: JmapRights,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<Id<MailboxObject>>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub sort_order: u64,
    #[serde(default)]
    pub total_emails: u64,
    #[serde(default)]
    pub total_threads: u64,
    #[serde(default)]
    pub unread_emails: u64,
    #[serde(default)]
    pub unread_threads: u64,
}

impl Object for MailboxObject {
    const NAME: &'static str = "Mailbox";
    const CAPABILITY: &'static str = JmapMailCapability::URI;
    const SERVER_SET_FIELDS: &'static [&'static str] = &[
        "id",
        "totalEmails",
        "unreadEmails",
        "unreadThreads",
        "totalThreads",
        "myRights",
    ];
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JmapRights {
    pub may_add_items: bool,
    pub may_create_child: bool,
    pub may_delete: bool,
    pub may_read_items: bool,
    pub may_remove_items: bool,
    pub may_rename: bool,
    pub may_set_keywords: bool,
    pub may_set_seen: bool,
    pub may_submit: bool,
}

impl Default for JmapRights {
    fn default() -> Self {
        Self {
            may_add_items: true,
            may_create_child: true,
            may_delete: true,
            may_read_items: true,
            may_remove_items: true,
            may_rename: true,
            may_set_keywords: true,
            may_set_seen: true,
            may_submit: true,
        }
    }
}

crate::_impl_jmap_method! {
    MailboxGet: Get<MailboxObject>, MailboxObject => "Mailbox/get", response: GetResponse<MailboxObject>
}

crate::_impl_jmap_method! {
    MailboxChanges: Changes<MailboxObject>, MailboxObject => "Mailbox/changes", response: ChangesResponse<MailboxObject>
}
