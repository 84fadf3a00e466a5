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

use std::hash::Hash;

use crate::{methods::ResultField, objects::Object, protocol::Method};

/// A method argument: either a literal value or a reference to the result
/// of an earlier call in the same batch.
///
/// References are never resolved locally. They are sent as
/// `{"resultOf", "name", "path"}` under the argument name prefixed with `#`,
/// and the server evaluates them after executing the referenced call.
#[derive(Deserialize, Serialize, Clone, PartialEq, Eq, Hash, Debug)]
#[serde(rename_all = "camelCase", untagged)]
pub enum Argument<T: Clone + PartialEq + Eq + Hash> {
    #[serde(rename_all = "camelCase")]
    ResultReference {
        result_of: String,
        name: String,
        path: String,
    },
    Value(T),
}

impl<T: Clone + PartialEq + Eq + Hash> Argument<T> {
    pub fn value(v: T) -> Self {
        Self::Value(v)
    }

    pub fn reference<M, OBJ>(result_of: &str, path: ResultField<M, OBJ>) -> Self
    where
        M: Method<OBJ>,
        OBJ: Object,
    {
        Self::ResultReference {
            result_of: result_of.to_string(),
            name: M::NAME.to_string(),
            path: path.field.to_string(),
        }
    }

    pub const fn is_reference(&self) -> bool {
        matches!(self, Self::ResultReference { .. })
    }
}

impl<T: Clone + PartialEq + Eq + Hash> From<T> for Argument<T> {
    fn from(v: T) -> Self {
        Self::Value(v)
    }
}
