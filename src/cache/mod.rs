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

//! Local state of one account: objects per collection, the state token each
//! collection was last synchronized to, and one window per query.
//!
//! All mutation goes through [`SyncEngine`](crate::sync::SyncEngine) and
//! [`QueryCache`](crate::query::QueryCache), which serialize their writes on
//! [`CacheHandle`]. Other readers must use the snapshot accessors.

use std::sync::{Arc, Mutex};

use futures::lock::{Mutex as FutureMutex, MutexGuard as FutureMutexGuard};
use indexmap::IndexSet;
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    error::Result,
    mail::{EmailObject, IdentityObject, MailboxObject, ThreadObject},
    methods::ChangesResponse,
    objects::{Id, Object, State},
};

pub mod ram_cache;
pub use ram_cache::RamCache;

declare_u64_hash!(QueryHash);

/// The state tokens the cache holds. `None` for a collection that was
/// never synchronized or was invalidated.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ObjectsState {
    pub mailbox: Option<State<MailboxObject>>,
    pub identity: Option<State<IdentityObject>>,
    pub email: Option<State<EmailObject>>,
    pub thread: Option<State<ThreadObject>>,
}

/// The delta between two state tokens of one collection.
#[derive(Clone, Debug)]
pub struct Update<OBJ: Object> {
    pub old_state: State<OBJ>,
    pub new_state: State<OBJ>,
    pub created: IndexSet<Id<OBJ>>,
    pub updated: IndexSet<Id<OBJ>>,
    pub destroyed: IndexSet<Id<OBJ>>,
    /// The server has more changes past `new_state`.
    pub has_more: bool,
}

impl<OBJ: Object> From<ChangesResponse<OBJ>> for Update<OBJ> {
    fn from(val: ChangesResponse<OBJ>) -> Self {
        Self {
            old_state: val.old_state,
            new_state: val.new_state,
            created: val.created.into_iter().collect(),
            updated: val.updated.into_iter().collect(),
            destroyed: val.destroyed.into_iter().collect(),
            has_more: val.has_more_changes,
        }
    }
}

impl<OBJ: Object> Update<OBJ> {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.destroyed.is_empty()
    }
}

/// One row of a query window.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QueryItem {
    pub id: Id<EmailObject>,
    pub thread_id: Id<ThreadObject>,
}

/// A known gap of `count` unfetched items right before `anchor`, the first
/// item of the window.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MissingRange {
    pub anchor: Id<EmailObject>,
    pub count: u64,
}

/// The materialized, contiguous slice of a query's results, in server
/// order, starting at server position `position`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct QueryWindow {
    pub query_state: String,
    pub can_calculate_changes: bool,
    pub position: u64,
    pub items: Vec<QueryItem>,
    pub total: Option<u64>,
    pub missing: Option<MissingRange>,
}

impl QueryWindow {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn last_id(&self) -> Option<&Id<EmailObject>> {
        self.items.last().map(|i| &i.id)
    }

    pub fn index_of(&self, id: &Id<EmailObject>) -> Option<usize> {
        self.items.iter().position(|i| &i.id == id)
    }

    /// `true` if the window reaches the end of the results.
    pub fn is_complete(&self) -> bool {
        self.total
            .map(|total| self.position + self.items.len() as u64 >= total)
            .unwrap_or(false)
    }

    /// The first item of each thread, in server order.
    pub fn collapsed(&self) -> Vec<&QueryItem> {
        let mut seen = IndexSet::new();
        self.items
            .iter()
            .filter(|item| seen.insert(&item.thread_id))
            .collect()
    }
}

/// Storage for one collection.
pub trait CollectionCache<OBJ: CachedObject>: Send + std::fmt::Debug {
    fn state(&self) -> Option<State<OBJ>>;

    fn get(&self, id: &Id<OBJ>) -> Option<OBJ>;

    fn snapshot(&self) -> Vec<OBJ>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace every object and the state token.
    fn reset(&mut self, state: State<OBJ>, objects: Vec<OBJ>) -> Result<()>;

    /// Apply `update` atomically: remove destroyed ids, store `objects` (the
    /// current version of created and updated ids) and advance the state to
    /// `update.new_state`.
    ///
    /// Fails with [`ErrorKind::Invalidated`](crate::error::ErrorKind) without
    /// touching anything if the stored state is not `update.old_state`.
    fn apply(&mut self, update: &Update<OBJ>, objects: Vec<OBJ>) -> Result<()>;

    /// Forget every object and the state token.
    fn invalidate(&mut self) -> Result<()>;
}

pub trait Cache: Send + std::fmt::Debug {
    fn mailboxes(&self) -> &dyn CollectionCache<MailboxObject>;
    fn mailboxes_mut(&mut self) -> &mut dyn CollectionCache<MailboxObject>;
    fn identities(&self) -> &dyn CollectionCache<IdentityObject>;
    fn identities_mut(&mut self) -> &mut dyn CollectionCache<IdentityObject>;
    fn emails(&self) -> &dyn CollectionCache<EmailObject>;
    fn emails_mut(&mut self) -> &mut dyn CollectionCache<EmailObject>;
    fn threads(&self) -> &dyn CollectionCache<ThreadObject>;
    fn threads_mut(&mut self) -> &mut dyn CollectionCache<ThreadObject>;

    fn query_window(&self, hash: QueryHash) -> Option<QueryWindow>;
    fn set_query_window(&mut self, hash: QueryHash, window: QueryWindow) -> Result<()>;
    /// Returns `true` if a window was removed.
    fn invalidate_query(&mut self, hash: QueryHash) -> Result<bool>;
    fn invalidate_queries(&mut self) -> Result<()>;
    fn query_hashes(&self) -> Vec<QueryHash>;

    fn objects_state(&self) -> ObjectsState {
        ObjectsState {
            mailbox: self.mailboxes().state(),
            identity: self.identities().state(),
            email: self.emails().state(),
            thread: self.threads().state(),
        }
    }

    /// Emails and threads form one domain: every query window derives from
    /// them. Mailboxes and identities are left untouched.
    fn invalidate_emails_threads_and_queries(&mut self) -> Result<()> {
        self.emails_mut().invalidate()?;
        self.threads_mut().invalidate()?;
        self.invalidate_queries()
    }

    fn reset(&mut self) -> Result<()> {
        self.mailboxes_mut().invalidate()?;
        self.identities_mut().invalidate()?;
        self.invalidate_emails_threads_and_queries()
    }
}

/// An object type the cache stores.
pub trait CachedObject:
    Object + Clone + std::fmt::Debug + Serialize + DeserializeOwned
{
    fn id(&self) -> &Id<Self>;
    fn collection(cache: &dyn Cache) -> &dyn CollectionCache<Self>;
    fn collection_mut(cache: &mut dyn Cache) -> &mut dyn CollectionCache<Self>;
}

macro_rules! impl_cached_object {
    ($obj:ty, $get:ident, $get_mut:ident) => {
        impl CachedObject for $obj {
            fn id(&self) -> &Id<Self> {
                &self.id
            }

            fn collection(cache: &dyn Cache) -> &dyn CollectionCache<Self> {
                cache.$get()
            }

            fn collection_mut(cache: &mut dyn Cache) -> &mut dyn CollectionCache<Self> {
                cache.$get_mut()
            }
        }
    };
}

impl_cached_object!(MailboxObject, mailboxes, mailboxes_mut);
impl_cached_object!(IdentityObject, identities, identities_mut);
impl_cached_object!(EmailObject, emails, emails_mut);
impl_cached_object!(ThreadObject, threads, threads_mut);

/// Shared access to the cache of one account session.
///
/// The cache itself is behind a short lived lock; `writer` is held across a
/// whole synchronization round trip so that only one writer exists per
/// account.
#[derive(Clone, Debug)]
pub struct CacheHandle {
    inner: Arc<Mutex<Box<dyn Cache>>>,
    writer: Arc<FutureMutex<()>>,
}

impl CacheHandle {
    pub fn new(cache: impl Cache + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(cache))),
            writer: Arc::new(FutureMutex::new(())),
        }
    }

    /// Run `f` on a consistent view of the cache.
    pub fn read<T>(&self, f: impl FnOnce(&dyn Cache) -> T) -> T {
        let lck = self.inner.lock().unwrap();
        f(lck.as_ref())
    }

    pub(crate) fn write<T>(&self, f: impl FnOnce(&mut dyn Cache) -> T) -> T {
        let mut lck = self.inner.lock().unwrap();
        f(lck.as_mut())
    }

    pub(crate) async fn writer(&self) -> FutureMutexGuard<'_, ()> {
        self.writer.lock().await
    }

    pub fn objects_state(&self) -> ObjectsState {
        self.read(|c| c.objects_state())
    }

    pub fn snapshot<OBJ: CachedObject>(&self) -> Vec<OBJ> {
        self.read(|c| OBJ::collection(c).snapshot())
    }

    pub fn get<OBJ: CachedObject>(&self, id: &Id<OBJ>) -> Option<OBJ> {
        self.read(|c| OBJ::collection(c).get(id))
    }

    pub fn query_window(&self, hash: QueryHash) -> Option<QueryWindow> {
        self.read(|c| c.query_window(hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jmap_query_window_collapsed() {
        let item = |id: &str, thread_id: &str| QueryItem {
            id: id.into(),
            thread_id: thread_id.into(),
        };
        let window = QueryWindow {
            query_state: "q1".into(),
            can_calculate_changes: true,
            position: 0,
            items: vec![
                item("e5", "t2"),
                item("e4", "t1"),
                item("e3", "t2"),
                item("e2", "t3"),
                item("e1", "t1"),
            ],
            total: Some(5),
            missing: None,
        };
        assert!(window.is_complete());
        assert_eq!(window.last_id().map(Id::as_str), Some("e1"));
        assert_eq!(
            window
                .collapsed()
                .into_iter()
                .map(|i| i.id.as_str())
                .collect::<Vec<_>>(),
            vec!["e5", "e4", "e2"]
        );
    }
}
