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
    mail::email::{EmailGet, EmailObject},
    methods::{Changes, ChangesResponse, Get, GetResponse, ResultField},
    objects::{Id, Object},
};

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadObject {
    #[serde(default)]
    pub id: Id<ThreadObject>,
    #[serde(default)]
    pub email_ids: Vec<Id<EmailObject>>,
}

impl Object for ThreadObject {
    const NAME: &'static str = "Thread";
    const CAPABILITY: &'static str = JmapMailCapability::URI;
}

impl ThreadObject {
    _impl!(get email_ids, email_ids: Vec<Id<EmailObject>>);
}

crate::_impl_jmap_method! {
    ThreadGet: Get<ThreadObject>, ThreadObject => "Thread/get", response: GetResponse<ThreadObject>
}

impl ThreadGet {
    pub const RESULT_FIELD_THREAD_IDS: ResultField<EmailGet, EmailObject> =
        ResultField::new("/list/*/threadId");
}

crate::_impl_jmap_method! {
    ThreadChanges: Changes<ThreadObject>, ThreadObject => "Thread/changes", response: ChangesResponse<ThreadObject>
}

impl ThreadChanges {
    pub const RESULT_FIELD_CREATED: ResultField<Self, ThreadObject> = ResultField::new("/created");
    pub const RESULT_FIELD_UPDATED: ResultField<Self, ThreadObject> = ResultField::new("/updated");
}
