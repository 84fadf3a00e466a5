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

use std::{
    marker::PhantomData,
    ops::{BitAndAssign, BitOrAssign, Not},
};

use crate::objects::Object;

pub trait FilterTrait<T>: Default + Send + Sync {}

/// A `FilterOperator` tree over conditions of type `F`.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[serde(untagged)]
pub enum Filter<F: FilterTrait<OBJ>, OBJ: Object> {
    Operator {
        operator: FilterOperator,
        conditions: Vec<Filter<F, OBJ>>,
        #[serde(skip)]
        _ph: PhantomData<fn() -> OBJ>,
    },
    Condition(F),
}

impl<F: FilterTrait<OBJ> + Clone, OBJ: Object> Clone for Filter<F, OBJ> {
    fn clone(&self) -> Self {
        match self {
            Self::Operator {
                operator,
                conditions,
                _ph,
            } => Self::Operator {
                operator: *operator,
                conditions: conditions.clone(),
                _ph: PhantomData,
            },
            Self::Condition(c) => Self::Condition(c.clone()),
        }
    }
}

impl<F: FilterTrait<OBJ>, OBJ: Object> FilterTrait<OBJ> for Filter<F, OBJ> {}

impl<F: FilterTrait<OBJ>, OBJ: Object> From<F> for Filter<F, OBJ> {
    fn from(condition: F) -> Self {
        Self::Condition(condition)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilterOperator {
    And,
    Or,
    Not,
}

impl<F: FilterTrait<OBJ>, OBJ: Object> Default for Filter<F, OBJ> {
    fn default() -> Self {
        Self::Condition(F::default())
    }
}

impl<F: FilterTrait<OBJ>, OBJ: Object> Filter<F, OBJ> {
    fn combine(&mut self, op: FilterOperator, rhs: Self) {
        match self {
            Self::Operator {
                operator,
                ref mut conditions,
                ..
            } if *operator == op => {
                conditions.push(rhs);
            }
            Self::Condition(_) | Self::Operator { .. } => {
                *self = Self::Operator {
                    operator: op,
                    conditions: vec![std::mem::take(self), rhs],
                    _ph: PhantomData,
                };
            }
        }
    }
}

impl<F: FilterTrait<OBJ>, OBJ: Object> BitAndAssign for Filter<F, OBJ> {
    fn bitand_assign(&mut self, rhs: Self) {
        self.combine(FilterOperator::And, rhs);
    }
}

impl<F: FilterTrait<OBJ>, OBJ: Object> BitOrAssign for Filter<F, OBJ> {
    fn bitor_assign(&mut self, rhs: Self) {
        self.combine(FilterOperator::Or, rhs);
    }
}

impl<F: FilterTrait<OBJ>, OBJ: Object> Not for Filter<F, OBJ> {
    type Output = Self;
    fn not(self) -> Self {
        match self {
            // NOT(NOT(a, b)) == OR(a, b)
            Self::Operator {
                operator: FilterOperator::Not,
                conditions,
                _ph: _,
            } => Self::Operator {
                operator: FilterOperator::Or,
                conditions,
                _ph: PhantomData,
            },
            Self::Condition(_) | Self::Operator { .. } => Self::Operator {
                operator: FilterOperator::Not,
                conditions: vec![self],
                _ph: PhantomData,
            },
        }
    }
}
