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

//! The mail data types the engine keeps in sync: mailboxes, emails,
//! threads and identities ([RFC 8621](https://www.rfc-editor.org/rfc/rfc8621)).
//!
//! Only the properties the engine and its callers need are modelled; every
//! other property a server returns is kept in `extra_properties` where the
//! type allows it.

pub mod email;
pub mod identity;
pub mod mailbox;
pub mod thread;

pub use email::{EmailAddress, EmailFilterCondition, EmailObject};
pub use identity::IdentityObject;
pub use mailbox::MailboxObject;
pub use thread::ThreadObject;
