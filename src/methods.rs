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

//! Generic method shapes shared by every data type: `Foo/get`,
//! `Foo/changes`, `Foo/query`, `Foo/queryChanges` and `Foo/set`, and the
//! error objects the server returns for them.

use std::{marker::PhantomData, sync::Arc};

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde_json::Value;
use url::Url;

use crate::{
    argument::Argument,
    comparator::Comparator,
    error::{Error, ErrorKind, Result},
    filters,
    objects::{Account, BlobObject, Id, Object, PatchObject, State},
    protocol::Method,
};

pub fn u64_zero(num: &u64) -> bool {
    *num == 0
}

/// Serialize an [`Argument`] field: literal values under `key`, result
/// references under `#key`.
fn serialize_argument<S, T>(
    state: &mut S,
    key: &'static str,
    ref_key: &'static str,
    arg: &Argument<T>,
) -> std::result::Result<(), S::Error>
where
    S: SerializeStruct,
    T: Serialize + Clone + PartialEq + Eq + std::hash::Hash,
{
    match arg {
        Argument::Value(ref v) => state.serialize_field(key, v),
        Argument::ResultReference { .. } => state.serialize_field(ref_key, arg),
    }
}

/// `/get`
///
/// Objects of type `Foo` are fetched via a call to `Foo/get`.
#[derive(Clone, Debug)]
pub struct Get<OBJ>
where
    OBJ: Object + std::fmt::Debug + Serialize,
{
    /// `account_id`: `Id` The id of the account to use.
    pub account_id: Id<Account>,
    /// `ids`: `Id[]|null` The ids of the `Foo` objects to return. If `null`,
    /// then *all* records of the data type are returned, if this is
    /// supported for that data type and the number of records does not
    /// exceed the `maxObjectsInGet` limit.
    pub ids: Option<Argument<Vec<Id<OBJ>>>>,
    /// `properties`: `String[]|null` If supplied, only the properties listed in
    /// the array are returned for each `Foo` object. The `id` property of the
    /// object is *always* returned.
    pub properties: Option<Vec<String>>,
    _ph: PhantomData<fn() -> OBJ>,
}

impl<OBJ> Get<OBJ>
where
    OBJ: Object + std::fmt::Debug + Serialize,
{
    pub fn new() -> Self {
        Self {
            account_id: Id::default(),
            ids: None,
            properties: None,
            _ph: PhantomData,
        }
    }
    _impl!(
        /// `account_id`: `Id` The id of the account to use.
        account_id: Id<Account>
    );
    _impl!(
        /// `ids`: `Id[]|null` The ids of the `Foo` objects to return.
        ids: Option<Argument<Vec<Id<OBJ>>>>
    );
    _impl!(
        /// `properties`: `String[]|null` If supplied, only the properties
        /// listed in the array are returned for each `Foo` object.
        properties: Option<Vec<String>>
    );
}

impl<OBJ> Default for Get<OBJ>
where
    OBJ: Object + std::fmt::Debug + Serialize,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<OBJ: Object + Serialize + std::fmt::Debug> Serialize for Get<OBJ> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let fields_no = usize::from(!self.account_id.is_empty())
            + usize::from(self.ids.is_some())
            + usize::from(self.properties.is_some());

        let mut state = serializer.serialize_struct("Get", fields_no)?;
        if !self.account_id.is_empty() {
            state.serialize_field("accountId", &self.account_id)?;
        }
        if let Some(ref ids) = self.ids {
            serialize_argument(&mut state, "ids", "#ids", ids)?;
        }
        if let Some(ref properties) = self.properties {
            state.serialize_field("properties", properties)?;
        }
        state.end()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetResponse<OBJ: Object> {
    pub account_id: Id<Account>,
    #[serde(default = "State::default")]
    pub state: State<OBJ>,
    pub list: Vec<OBJ>,
    #[serde(default = "Vec::new")]
    pub not_found: Vec<Id<OBJ>>,
}

impl<OBJ: Object> GetResponse<OBJ> {
    _impl!(get_mut  account_id_mut, account_id: Id<Account>);
    _impl!(get_mut  state_mut, state: State<OBJ>);
    _impl!(get_mut  list_mut, list: Vec<OBJ>);
    _impl!(get_mut  not_found_mut, not_found: Vec<Id<OBJ>>);
}

/// `/changes`
///
/// Returns the ids of `Foo` records created, updated or destroyed since
/// `sinceState`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Changes<OBJ>
where
    OBJ: Object + std::fmt::Debug + Serialize,
{
    /// `accountId`: `Id` The id of the account to use.
    pub account_id: Id<Account>,
    /// `sinceState`: `String` The current state of the client, as returned in
    /// the `state` argument of a `Foo/get` response.
    pub since_state: State<OBJ>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// `maxChanges`: `UnsignedInt|null` The maximum number of ids to return.
    /// The server **MAY** return fewer but **MUST NOT** return more.
    pub max_changes: Option<u64>,
    #[serde(skip)]
    _ph: PhantomData<fn() -> OBJ>,
}

impl<OBJ> Changes<OBJ>
where
    OBJ: Object + std::fmt::Debug + Serialize,
{
    pub fn new() -> Self {
        Self {
            account_id: Id::default(),
            since_state: State::default(),
            max_changes: None,
            _ph: PhantomData,
        }
    }
    _impl!(account_id: Id<Account>);
    _impl!(since_state: State<OBJ>);
    _impl!(max_changes: Option<u64>);
}

impl<OBJ> Default for Changes<OBJ>
where
    OBJ: Object + std::fmt::Debug + Serialize,
{
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesResponse<OBJ: Object> {
    pub account_id: Id<Account>,
    pub old_state: State<OBJ>,
    pub new_state: State<OBJ>,
    pub has_more_changes: bool,
    #[serde(default = "Vec::new")]
    pub created: Vec<Id<OBJ>>,
    #[serde(default = "Vec::new")]
    pub updated: Vec<Id<OBJ>>,
    #[serde(default = "Vec::new")]
    pub destroyed: Vec<Id<OBJ>>,
    #[serde(skip)]
    pub _ph: PhantomData<fn() -> OBJ>,
}

impl<OBJ: Object> ChangesResponse<OBJ> {
    _impl!(get_mut  account_id_mut, account_id: Id<Account>);
    _impl!(get_mut  old_state_mut, old_state: State<OBJ>);
    _impl!(get_mut  new_state_mut, new_state: State<OBJ>);
    _impl!(get has_more_changes, has_more_changes: bool);
    _impl!(get_mut  created_mut, created: Vec<Id<OBJ>>);
    _impl!(get_mut  updated_mut, updated: Vec<Id<OBJ>>);
    _impl!(get_mut  destroyed_mut, destroyed: Vec<Id<OBJ>>);

    /// `true` if the server reports no change at all.
    pub fn is_unchanged(&self) -> bool {
        self.old_state == self.new_state
    }

    /// Reject internally inconsistent responses before they touch the cache:
    /// more changes can't remain when the state did not advance, and an id
    /// can't be reported in two of the created, updated and destroyed lists.
    pub fn validate(&self) -> Result<()> {
        if self.has_more_changes && self.is_unchanged() {
            return Err(Error::new(format!(
                "{}/changes response reports more changes but its state did not advance from \
                 `{}`",
                OBJ::NAME,
                self.old_state
            ))
            .set_kind(ErrorKind::ProtocolError));
        }
        let mut seen = std::collections::HashSet::with_capacity(
            self.created.len() + self.updated.len() + self.destroyed.len(),
        );
        for id in self
            .created
            .iter()
            .chain(self.updated.iter())
            .chain(self.destroyed.iter())
        {
            if !seen.insert(id) {
                return Err(Error::new(format!(
                    "{}/changes response lists id `{}` more than once",
                    OBJ::NAME,
                    id
                ))
                .set_kind(ErrorKind::ProtocolError));
            }
        }
        Ok(())
    }
}

/// `/query`
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Query<F: filters::FilterTrait<OBJ>, OBJ>
where
    OBJ: Object + std::fmt::Debug + Serialize,
{
    pub account_id: Id<Account>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<F>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<Vec<Comparator<OBJ>>>,
    #[serde(skip_serializing_if = "u64_zero")]
    pub position: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor: Option<Id<OBJ>>,
    #[serde(skip_serializing_if = "i64_zero")]
    pub anchor_offset: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    pub calculate_total: bool,
    #[serde(skip)]
    _ph: PhantomData<fn() -> OBJ>,
}

fn i64_zero(num: &i64) -> bool {
    *num == 0
}

impl<F: filters::FilterTrait<OBJ>, OBJ> Query<F, OBJ>
where
    OBJ: Object + std::fmt::Debug + Serialize,
{
    pub fn new() -> Self {
        Self {
            account_id: Id::default(),
            filter: None,
            sort: None,
            position: 0,
            anchor: None,
            anchor_offset: 0,
            limit: None,
            calculate_total: false,
            _ph: PhantomData,
        }
    }

    _impl!(account_id: Id<Account>);
    _impl!(filter: Option<F>);
    _impl!(sort: Option<Vec<Comparator<OBJ>>>);
    _impl!(position: u64);
    _impl!(anchor: Option<Id<OBJ>>);
    _impl!(anchor_offset: i64);
    _impl!(limit: Option<u64>);
    _impl!(calculate_total: bool);
}

impl<F: filters::FilterTrait<OBJ>, OBJ> Default for Query<F, OBJ>
where
    OBJ: Object + std::fmt::Debug + Serialize,
{
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse<OBJ: Object> {
    pub account_id: Id<Account>,
    pub query_state: String,
    pub can_calculate_changes: bool,
    pub position: u64,
    pub ids: Vec<Id<OBJ>>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(skip)]
    _ph: PhantomData<fn() -> OBJ>,
}

impl<OBJ: Object> QueryResponse<OBJ> {
    _impl!(get_mut  ids_mut, ids: Vec<Id<OBJ>>);
}

/// A JSON pointer into the response of method `M`, used to build result
/// references.
pub struct ResultField<M: Method<OBJ>, OBJ: Object> {
    pub field: &'static str,
    pub _ph: PhantomData<fn() -> (OBJ, M)>,
}

impl<M: Method<OBJ>, OBJ: Object> ResultField<M, OBJ> {
    pub const fn new(field: &'static str) -> Self {
        Self {
            field,
            _ph: PhantomData,
        }
    }
}

impl<M: Method<OBJ>, OBJ: Object> Clone for ResultField<M, OBJ> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: Method<OBJ>, OBJ: Object> Copy for ResultField<M, OBJ> {}

impl<M: Method<OBJ>, OBJ: Object> From<&'static str> for ResultField<M, OBJ> {
    fn from(field: &'static str) -> Self {
        Self::new(field)
    }
}

/// `/queryChanges`
///
/// Efficiently updates a cached query to match the new state on the
/// server.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryChanges<F: filters::FilterTrait<OBJ>, OBJ>
where
    OBJ: Object + std::fmt::Debug + Serialize,
{
    pub account_id: Id<Account>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<F>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<Vec<Comparator<OBJ>>>,
    /// `sinceQueryState`: `String` The `queryState` the client holds for
    /// this filter and sort.
    pub since_query_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_changes: Option<u64>,
    /// `upToId`: `Id|null` The last (highest-index) id the client currently
    /// has cached from the query results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub up_to_id: Option<Id<OBJ>>,
    pub calculate_total: bool,
    #[serde(skip)]
    _ph: PhantomData<fn() -> OBJ>,
}

impl<F: filters::FilterTrait<OBJ>, OBJ> QueryChanges<F, OBJ>
where
    OBJ: Object + std::fmt::Debug + Serialize,
{
    pub fn new(account_id: Id<Account>, since_query_state: String) -> Self {
        Self {
            account_id,
            filter: None,
            sort: None,
            since_query_state,
            max_changes: None,
            up_to_id: None,
            calculate_total: false,
            _ph: PhantomData,
        }
    }
    _impl!(filter: Option<F>);
    _impl!(sort: Option<Vec<Comparator<OBJ>>>);
    _impl!(max_changes: Option<u64>);
    _impl!(up_to_id: Option<Id<OBJ>>);
    _impl!(calculate_total: bool);
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryChangesResponse<OBJ: Object> {
    pub account_id: Id<Account>,
    pub old_query_state: String,
    pub new_query_state: String,
    #[serde(default)]
    pub total: Option<u64>,
    /// Ids that were in the old results and are not in the new ones, plus
    /// ids whose position may have moved.
    pub removed: Vec<Id<OBJ>>,
    /// Ids and new positions, sorted by index, to splice in after the
    /// `removed` ids have been spliced out.
    pub added: Vec<AddedItem<OBJ>>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddedItem<OBJ: Object> {
    pub id: Id<OBJ>,
    pub index: u64,
}

/// `/set`
///
/// Creates, updates and destroys `Foo` records. With `ifInState` set the
/// server aborts the whole call with `stateMismatch` if the client's state
/// is stale.
#[derive(Clone, Debug)]
pub struct Set<OBJ>
where
    OBJ: Object + std::fmt::Debug + Serialize,
{
    pub account_id: Id<Account>,
    pub if_in_state: Option<State<OBJ>>,
    /// Creation id to new object. Server-set properties are stripped when
    /// serialized.
    pub create: Option<IndexMap<Id<OBJ>, OBJ>>,
    /// Id (or creation reference) to [`PatchObject`].
    pub update: Option<IndexMap<Argument<Id<OBJ>>, PatchObject>>,
    pub destroy: Option<Vec<Argument<Id<OBJ>>>>,
}

impl<OBJ> Set<OBJ>
where
    OBJ: Object + std::fmt::Debug + Serialize,
{
    pub fn new(if_in_state: Option<State<OBJ>>) -> Self {
        Self {
            account_id: Id::default(),
            if_in_state,
            create: None,
            update: None,
            destroy: None,
        }
    }
    _impl!(account_id: Id<Account>);
    _impl!(if_in_state: Option<State<OBJ>>);
    _impl!(update: Option<IndexMap<Argument<Id<OBJ>>, PatchObject>>);
    _impl!(create: Option<IndexMap<Id<OBJ>, OBJ>>);
    _impl!(destroy: Option<Vec<Argument<Id<OBJ>>>>);
}

impl<OBJ> Default for Set<OBJ>
where
    OBJ: Object + std::fmt::Debug + Serialize,
{
    fn default() -> Self {
        Self::new(None)
    }
}

impl<OBJ: Object + Serialize + std::fmt::Debug> Serialize for Set<OBJ> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        fn key<OBJ>(arg: &Argument<Id<OBJ>>) -> String {
            match arg {
                Argument::Value(id) => id.to_string(),
                Argument::ResultReference { result_of, .. } => format!("#{}", result_of),
            }
        }

        let mut state = serializer.serialize_struct("Set", 5)?;
        state.serialize_field("accountId", &self.account_id)?;
        state.serialize_field("ifInState", &self.if_in_state)?;
        if let Some(ref m) = self.create {
            let map = m
                .iter()
                .map(|(k, v)| {
                    let mut v = serde_json::json!(v);
                    if let Some(ref mut obj) = v.as_object_mut() {
                        for f in <OBJ as Object>::SERVER_SET_FIELDS {
                            obj.remove(*f);
                        }
                    }
                    (k.to_string(), v)
                })
                .collect::<IndexMap<String, Value>>();
            state.serialize_field("create", &map)?;
        } else {
            state.serialize_field("create", &None::<()>)?;
        }
        state.serialize_field(
            "update",
            &self.update.as_ref().map(|m| {
                m.iter()
                    .map(|(k, v)| (key(k), v))
                    .collect::<IndexMap<String, &Value>>()
            }),
        )?;
        state.serialize_field(
            "destroy",
            &self
                .destroy
                .as_ref()
                .map(|v| v.iter().map(key).collect::<Vec<String>>()),
        )?;
        state.end()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetResponse<OBJ: Object> {
    /// `accountId`: `Id` The id of the account used for the call.
    pub account_id: Id<Account>,
    /// `oldState`: `String|null` The state before the changes, or null if the
    /// server doesn't know it.
    #[serde(default)]
    pub old_state: Option<State<OBJ>>,
    /// `newState`: `String` The state string that will now be returned by
    /// `Foo/get`.
    pub new_state: State<OBJ>,
    /// Creation id to the server-set properties of each created object.
    #[serde(default)]
    pub created: Option<IndexMap<Id<OBJ>, Value>>,
    /// Ids of all updated objects, with any property that changed in a way
    /// not requested by the patch.
    #[serde(default)]
    pub updated: Option<IndexMap<Id<OBJ>, Option<Value>>>,
    #[serde(default)]
    pub destroyed: Option<Vec<Id<OBJ>>>,
    #[serde(default)]
    pub not_created: Option<IndexMap<Id<OBJ>, SetError>>,
    #[serde(default)]
    pub not_updated: Option<IndexMap<Id<OBJ>, SetError>>,
    #[serde(default)]
    pub not_destroyed: Option<IndexMap<Id<OBJ>, SetError>>,
}

impl<OBJ: Object> SetResponse<OBJ> {
    /// Every per-record failure of this call.
    pub fn errors(&self) -> impl Iterator<Item = (&Id<OBJ>, &SetError)> {
        self.not_created
            .iter()
            .chain(self.not_updated.iter())
            .chain(self.not_destroyed.iter())
            .flat_map(|m| m.iter())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[serde(tag = "type")]
pub enum SetError {
    /// (create; update; destroy). The create/update/destroy would violate an
    /// ACL or other permissions policy.
    Forbidden { description: Option<String> },
    /// (create; update). The create would exceed a server-defined limit on
    /// the number or total size of objects of this type.
    OverQuota { description: Option<String> },
    /// (create; update). The object would exceed a server-defined size limit.
    TooLarge { description: Option<String> },
    /// (create). A server-defined rate limit has been reached.
    RateLimit { description: Option<String> },
    /// (update; destroy). The id given to update/destroy cannot be found.
    NotFound { description: Option<String> },
    /// (update). The [`PatchObject`] was not a valid patch.
    InvalidPatch { description: Option<String> },
    /// (update). The object is both updated and destroyed in the same call;
    /// the update was ignored.
    WillDestroy { description: Option<String> },
    /// (create; update). The record given is invalid in some way.
    InvalidProperties {
        description: Option<String>,
        #[serde(default)]
        properties: Vec<String>,
    },
    /// (create; destroy). This is a singleton type.
    Singleton { description: Option<String> },
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for SetError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        let (name, description) = match self {
            Self::Forbidden { description } => ("Forbidden", description),
            Self::OverQuota { description } => ("OverQuota", description),
            Self::TooLarge { description } => ("TooLarge", description),
            Self::RateLimit { description } => ("RateLimit", description),
            Self::NotFound { description } => ("NotFound", description),
            Self::InvalidPatch { description } => ("InvalidPatch", description),
            Self::WillDestroy { description } => ("WillDestroy", description),
            Self::InvalidProperties {
                description,
                properties,
            } => {
                write!(fmt, "InvalidProperties: {}", properties.join(","))?;
                if let Some(description) = description {
                    write!(fmt, ", {}", description)?;
                }
                return Ok(());
            }
            Self::Singleton { description } => ("Singleton", description),
            Self::Unknown => return write!(fmt, "Unknown"),
        };
        match description {
            Some(description) => write!(fmt, "{}: {}", name, description),
            None => write!(fmt, "{}", name),
        }
    }
}

/// Method-level error types of RFC 8620 section 3.6.2 and the per-method
/// errors of `/changes`, `/query`, `/queryChanges` and `/set`.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MethodErrorType {
    ServerUnavailable,
    ServerFail,
    ServerPartialFail,
    UnknownMethod,
    InvalidArguments,
    InvalidResultReference,
    Forbidden,
    AccountNotFound,
    AccountNotSupportedByMethod,
    AccountReadOnly,
    RequestTooLarge,
    CannotCalculateChanges,
    StateMismatch,
    AnchorNotFound,
    UnsupportedSort,
    UnsupportedFilter,
    TooManyChanges,
    #[default]
    #[serde(other)]
    Unknown,
}

impl MethodErrorType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ServerUnavailable => "serverUnavailable",
            Self::ServerFail => "serverFail",
            Self::ServerPartialFail => "serverPartialFail",
            Self::UnknownMethod => "unknownMethod",
            Self::InvalidArguments => "invalidArguments",
            Self::InvalidResultReference => "invalidResultReference",
            Self::Forbidden => "forbidden",
            Self::AccountNotFound => "accountNotFound",
            Self::AccountNotSupportedByMethod => "accountNotSupportedByMethod",
            Self::AccountReadOnly => "accountReadOnly",
            Self::RequestTooLarge => "requestTooLarge",
            Self::CannotCalculateChanges => "cannotCalculateChanges",
            Self::StateMismatch => "stateMismatch",
            Self::AnchorNotFound => "anchorNotFound",
            Self::UnsupportedSort => "unsupportedSort",
            Self::UnsupportedFilter => "unsupportedFilter",
            Self::TooManyChanges => "tooManyChanges",
            Self::Unknown => "unknown",
        }
    }
}

/// The arguments of an `["error", {..}, id]` method response.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodError {
    #[serde(rename = "type")]
    pub _type: MethodErrorType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra_properties: IndexMap<String, Value>,
}

impl MethodError {
    pub fn into_error(self, method: &str, call_id: &str) -> Error {
        let mut err = Error::new(format!(
            "{} ({}) failed with `{}`",
            method,
            call_id,
            self._type.as_str()
        ))
        .set_kind(ErrorKind::Method(self._type));
        if let Some(description) = self.description {
            err = err.set_details(description);
        }
        err
    }
}

/// Request-level error types of RFC 8620 section 3.6.1.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum RequestErrorType {
    UnknownCapability,
    NotJson,
    NotRequest,
    Limit,
    #[default]
    Unknown,
}

impl RequestErrorType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownCapability => "urn:ietf:params:jmap:error:unknownCapability",
            Self::NotJson => "urn:ietf:params:jmap:error:notJSON",
            Self::NotRequest => "urn:ietf:params:jmap:error:notRequest",
            Self::Limit => "urn:ietf:params:jmap:error:limit",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_uri(uri: &str) -> Self {
        match uri {
            "urn:ietf:params:jmap:error:unknownCapability" => Self::UnknownCapability,
            "urn:ietf:params:jmap:error:notJSON" => Self::NotJson,
            "urn:ietf:params:jmap:error:notRequest" => Self::NotRequest,
            "urn:ietf:params:jmap:error:limit" => Self::Limit,
            _ => Self::Unknown,
        }
    }
}

/// RFC 7807 problem details object returned when a whole request is
/// rejected.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestError {
    #[serde(rename = "type")]
    pub _type: String,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub limit: Option<String>,
}

impl From<RequestError> for Error {
    fn from(val: RequestError) -> Self {
        let kind = RequestErrorType::from_uri(&val._type);
        let mut err = Self::new(format!("Request rejected by server: {}", val._type))
            .set_kind(ErrorKind::Request(kind));
        if let Some(detail) = val.detail {
            err = err.set_details(detail);
        }
        if let Some(limit) = val.limit {
            err = err.set_details(format!("Limit exceeded: {}", limit));
        }
        err
    }
}

/// An RFC 6570 level 1 URL template as found in the session object
/// (`downloadUrl`, `uploadUrl`, `eventSourceUrl`).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RequestUrlTemplate {
    pub text: String,
}

impl Serialize for RequestUrlTemplate {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> ::serde::de::Deserialize<'de> for RequestUrlTemplate {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: ::serde::de::Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        Ok(Self { text })
    }
}

impl From<&str> for RequestUrlTemplate {
    fn from(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }
}

impl RequestUrlTemplate {
    /// Substitute every `{var}` with its value. Unknown variables are a
    /// protocol error.
    pub fn expand(&self, vars: &[(&str, &str)]) -> Result<Url> {
        let mut ret = String::with_capacity(self.text.len() + 64);
        let mut rest = self.text.as_str();
        while let Some(pos) = rest.find('{') {
            ret.push_str(&rest[..pos]);
            rest = &rest[pos..];
            let Some(end) = rest.find('}') else {
                break;
            };
            let var = &rest[1..end];
            match vars.iter().find(|(k, _)| *k == var) {
                Some((_, value)) => ret.push_str(value),
                None => {
                    log::error!("BUG: unknown parameter in URL template: {}", self.text);
                    return Err(Error::new(
                        "Could not instantiate URL from JMAP server's URL template value",
                    )
                    .set_details(format!(
                        "Template `{}` has unknown variable `{}`. Known variables: {}",
                        self.text,
                        var,
                        vars.iter()
                            .map(|(k, _)| *k)
                            .collect::<Vec<&str>>()
                            .join(", ")
                    ))
                    .set_kind(ErrorKind::ProtocolError));
                }
            }
            rest = &rest[end + 1..];
        }
        ret.push_str(rest);
        Url::parse(&ret).map_err(|err| {
            Error::new("Could not instantiate URL from JMAP server's URL template value")
                .set_details(format!("template: {}\nresult: {}", self.text, ret))
                .set_kind(ErrorKind::ProtocolError)
                .set_source(Some(Arc::new(err)))
        })
    }
}

pub fn download_request_format(
    download_url: &RequestUrlTemplate,
    account_id: &Id<Account>,
    blob_id: &Id<BlobObject>,
    name: Option<&str>,
    mime_type: Option<&str>,
) -> Result<Url> {
    download_url.expand(&[
        ("accountId", account_id.as_str()),
        ("blobId", blob_id.as_str()),
        ("name", name.unwrap_or("")),
        ("type", mime_type.unwrap_or("application/octet-stream")),
    ])
}

pub fn upload_request_format(
    upload_url: &RequestUrlTemplate,
    account_id: &Id<Account>,
) -> Result<Url> {
    upload_url.expand(&[("accountId", account_id.as_str())])
}

pub fn event_source_request_format(
    event_source_url: &RequestUrlTemplate,
    types: &str,
    ping: u64,
) -> Result<Url> {
    event_source_url.expand(&[
        ("types", types),
        ("closeafter", "no"),
        ("ping", &ping.to_string()),
    ])
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    /// `accountId`: `Id` The id of the account used for the call.
    pub account_id: Id<Account>,
    /// `blobId`: `Id` The id representing the binary data uploaded.
    pub blob_id: Id<BlobObject>,
    /// `type`: `String` The media type of the file as set in the
    /// Content-Type header of the upload HTTP request.
    #[serde(rename = "type")]
    pub _type: String,
    /// `size`: `UnsignedInt` The size of the file in octets.
    pub size: u64,
}
