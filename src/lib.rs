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

#![deny(
    rustdoc::redundant_explicit_links,
    unsafe_op_in_unsafe_fn,
    /* groups */
    clippy::correctness,
    clippy::suspicious,
    clippy::complexity,
    clippy::perf,
    clippy::cargo,
    clippy::nursery,
    clippy::style,
    /* restriction */
    clippy::dbg_macro,
    clippy::rc_buffer,
    clippy::as_underscore,
    clippy::assertions_on_result_states,
    /* rustdoc */
    rustdoc::broken_intra_doc_links,
    /* pedantic */
    clippy::doc_markdown,
    clippy::expect_fun_call,
    clippy::or_fun_call,
    clippy::large_futures,
    clippy::unused_enumerate_index,
    clippy::manual_hash_one,
)]
#![allow(
    clippy::option_if_let_else,
    clippy::missing_const_for_fn,
    clippy::significant_drop_tightening,
    clippy::multiple_crate_versions,
    clippy::significant_drop_in_scrutinee,
    clippy::cognitive_complexity
)]
//! A JMAP ([RFC 8620](https://www.rfc-editor.org/rfc/rfc8620) and
//! [RFC 8621](https://www.rfc-editor.org/rfc/rfc8621)) client synchronization
//! engine.
//!
//! ## Description
//!
//! The crate keeps a local cache consistent with one account on a remote JMAP
//! server without re-downloading the account on every refresh:
//!
//! - Batch several method calls into one [`Request`](protocol::Request), let
//!   later calls reference the results of earlier ones and receive one
//!   [`PendingResult`](protocol::PendingResult) per call. (see module
//!   [`protocol`])
//! - Deliver batches over HTTP, or over a persistent WebSocket connection, and
//!   receive push state changes over WebSocket or Server-Sent Events with
//!   reconnection and backoff. (see module [`transport`])
//! - Fetch and cache the server [`Session`](session::Session) and refetch it
//!   when any response signals it changed. (see module [`session`])
//! - Bring mailboxes, identities, emails and threads up to date from the
//!   cached state tokens. (see module [`sync`])
//! - Keep one materialized, paginated window per query. (see module
//!   [`query`])
//!
//! The cache itself is abstracted by the [`Cache`](cache::Cache) trait; an
//! in-memory implementation is provided in [`cache::ram_cache`].

#[macro_use]
pub mod dbg {

    #[allow(clippy::redundant_closure)]
    #[macro_export]
    macro_rules! debug {
        ($val:literal) => {
            {
                if cfg!(feature="debug-tracing") {
                    $crate::log::debug!($val);
                }
                $val
            }
        };
        ($val:expr) => {
            if cfg!(feature="debug-tracing") {
                let stringify = stringify!($val);
                // Use of `match` here is intentional because it affects the lifetimes
                // of temporaries - https://stackoverflow.com/a/48732525/1063961
                match $val {
                    tmp => {
                        $crate::log::debug!("{} = {:?}", stringify, tmp);
                        tmp
                    }
                }
            } else {
                $val
            }
        };
        ($fmt:literal, $($arg:tt)*) => {
            if cfg!(feature="debug-tracing") {
                $crate::log::debug!($fmt, $($arg)*);
            }
        };
    }
}

#[macro_export]
macro_rules! _impl {
        ($(#[$outer:meta])*$field:ident : $t:ty) => {
            $(#[$outer])*
            pub fn $field(mut self, new_val: $t) -> Self {
                self.$field = new_val;
                self
            }
        };
        (get_mut $(#[$outer:meta])*$method:ident, $field:ident : $t:ty) => {
            $(#[$outer])*
            pub fn $method(&mut self) -> &mut $t {
                &mut self.$field
            }
        };
        (get $(#[$outer:meta])*$method:ident, $field:ident : $t:ty) => {
            $(#[$outer])*
            pub fn $method(&self) -> &$t {
                &self.$field
            }
        }
    }

pub mod error;
pub use error::{Error, ErrorKind, Result};

#[macro_use]
pub mod utils;

pub mod conf;
pub use conf::{AccountSettings, JmapServerConf, PushChannel};

pub mod objects;
pub use objects::{Account, BlobObject, Id, Object, State};

pub mod capabilities;
pub mod argument;
pub mod comparator;
pub mod filters;
pub mod methods;
pub mod protocol;
pub mod session;

pub mod mail;
pub use mail::{email, identity, mailbox, thread};

pub mod push;
pub mod transport;

pub mod cache;
pub mod query;
pub mod sync;

pub mod blob;
pub mod client;
pub use client::JmapClient;

#[cfg(test)]
mod tests;

#[macro_use]
extern crate serde_derive;
pub extern crate futures;
pub extern crate log;
#[allow(unused_imports)]
#[macro_use]
pub extern crate indexmap;
pub extern crate serde_path_to_error;
pub extern crate smallvec;
pub extern crate smol;
pub extern crate uuid;

/// Deserialize a server reply, reporting the JSON path that failed to parse.
pub fn deserialize_from_str<'de, T: serde::de::Deserialize<'de>>(s: &'de str) -> Result<T> {
    let jd = &mut serde_json::Deserializer::from_str(s);
    match serde_path_to_error::deserialize(jd) {
        Ok(v) => Ok(v),
        Err(err) => Err(Error::new(format!(
            "Could not deserialize server JSON response properly.\nError {} at {}. Reply from \
             server: {}",
            err,
            err.path(),
            &s
        ))
        .set_source(Some(std::sync::Arc::new(err)))
        .set_kind(ErrorKind::ProtocolError)),
    }
}
