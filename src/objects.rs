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

//! Typed identifiers and state tokens.
//!
//! Every JMAP data type implements [`Object`]. Identifiers and state tokens
//! are opaque server strings; they are tagged with the object type they
//! belong to so that an email id can't be passed where a mailbox id is
//! expected.

use std::{
    hash::{Hash, Hasher},
    marker::PhantomData,
};

use indexmap::IndexMap;
use serde_json::Value;

use crate::capabilities::{Capability, JmapCoreCapability};

pub type PatchObject = Value;

impl Object for PatchObject {
    const NAME: &'static str = "PatchObject";
}

pub trait Object: Send + Sync + 'static {
    const NAME: &'static str;
    /// Capability URI a request must declare in `using` to operate on this
    /// type.
    const CAPABILITY: &'static str = JmapCoreCapability::URI;
    const SERVER_SET_FIELDS: &'static [&'static str] = &["id"];
}

macro_rules! opaque_string {
    ($(#[$outer:meta])* $ident:ident) => {
        $(#[$outer])*
        #[derive(Deserialize, Serialize)]
        #[serde(transparent)]
        pub struct $ident<OBJ> {
            pub inner: String,
            #[serde(skip)]
            pub _ph: PhantomData<fn() -> OBJ>,
        }

        impl<OBJ> Clone for $ident<OBJ> {
            fn clone(&self) -> Self {
                Self {
                    inner: self.inner.clone(),
                    _ph: PhantomData,
                }
            }
        }

        impl<OBJ> std::fmt::Debug for $ident<OBJ> {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.debug_tuple(stringify!($ident)).field(&self.inner).finish()
            }
        }

        impl<OBJ> std::fmt::Display for $ident<OBJ> {
            fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.inner, fmt)
            }
        }

        impl<OBJ> Eq for $ident<OBJ> {}

        impl<OBJ> PartialEq for $ident<OBJ> {
            fn eq(&self, other: &Self) -> bool {
                self.inner == other.inner
            }
        }

        impl<OBJ> PartialOrd for $ident<OBJ> {
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }

        impl<OBJ> Ord for $ident<OBJ> {
            fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                self.inner.cmp(&other.inner)
            }
        }

        impl<OBJ> Hash for $ident<OBJ> {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.inner.hash(state);
            }
        }

        impl<OBJ> Default for $ident<OBJ> {
            fn default() -> Self {
                Self::from(String::new())
            }
        }

        impl<OBJ> From<String> for $ident<OBJ> {
            fn from(inner: String) -> Self {
                Self {
                    inner,
                    _ph: PhantomData,
                }
            }
        }

        impl<OBJ> From<&str> for $ident<OBJ> {
            fn from(inner: &str) -> Self {
                Self::from(inner.to_string())
            }
        }

        impl<OBJ> $ident<OBJ> {
            pub fn as_str(&self) -> &str {
                self.inner.as_str()
            }

            pub fn len(&self) -> usize {
                self.inner.len()
            }

            pub fn is_empty(&self) -> bool {
                self.inner.is_empty()
            }

            /// Re-tag the same string for another object type.
            pub fn cast<OTHER>(&self) -> $ident<OTHER> {
                $ident::from(self.inner.clone())
            }
        }
    };
}

opaque_string! {
    /// Server-assigned object identifier.
    Id
}

opaque_string! {
    /// Opaque server state token. Only equality is meaningful; tokens are
    /// never ordered or derived locally.
    State
}

impl<OBJ> Id<OBJ> {
    pub fn new_uuid_v4() -> Self {
        Self::from(uuid::Uuid::new_v4().hyphenated().to_string())
    }

    /// A creation id usable in `/set` `create` maps, referenced as `#{id}`
    /// by later calls in the same batch.
    pub fn creation_reference(&self) -> String {
        format!("#{}", self.inner)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub name: String,
    pub is_personal: bool,
    pub is_read_only: bool,
    pub account_capabilities: IndexMap<String, Value>,
    #[serde(flatten)]
    pub extra_properties: IndexMap<String, Value>,
}

impl Object for Account {
    const NAME: &'static str = "Account";
}

#[derive(Clone, Copy, Debug)]
pub struct BlobObject;

impl Object for BlobObject {
    const NAME: &'static str = "Blob";
}
