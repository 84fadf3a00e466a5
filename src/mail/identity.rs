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
    capabilities::{Capability, JmapSubmissionCapability},
    mail::email::EmailAddress,
    methods::{Changes, ChangesResponse, Get, GetResponse},
    objects::{Id, Object},
};

/// A sender identity. Identities require the submission capability.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityObject {
    pub id: Id<IdentityObject>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub reply_to: Option<Vec<EmailAddress>>,
    #[serde(default)]
    pub bcc: Option<Vec<EmailAddress>>,
    #[serde(default)]
    pub text_signature: String,
    #[serde(default)]
    pub html_signature: String,
    #[serde(default)]
    pub may_delete: bool,
}

impl Object for IdentityObject {
    const NAME: &'static str = "Identity";
    const CAPABILITY: &'static str = JmapSubmissionCapability::URI;
    const SERVER_SET_FIELDS: &'static [&'static str] = &["id", "mayDelete"];
}

crate::_impl_jmap_method! {
    IdentityGet: Get<IdentityObject>, IdentityObject => "Identity/get", response: GetResponse<IdentityObject>
}

crate::_impl_jmap_method! {
    IdentityChanges: Changes<IdentityObject>, IdentityObject => "Identity/changes", response: ChangesResponse<IdentityObject>
}
