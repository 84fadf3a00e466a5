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

use indexmap::IndexMap;

use super::{Cache, CachedObject, CollectionCache, QueryHash, QueryWindow, Update};
use crate::{
    error::{Error, ErrorKind, Result},
    mail::{EmailObject, IdentityObject, MailboxObject, ThreadObject},
    objects::{Id, State},
};

#[derive(Debug)]
pub struct RamCollection<OBJ: CachedObject> {
    state: Option<State<OBJ>>,
    objects: IndexMap<Id<OBJ>, OBJ>,
}

impl<OBJ: CachedObject> Default for RamCollection<OBJ> {
    fn default() -> Self {
        Self {
            state: None,
            objects: IndexMap::default(),
        }
    }
}

impl<OBJ: CachedObject> CollectionCache<OBJ> for RamCollection<OBJ> {
    fn state(&self) -> Option<State<OBJ>> {
        self.state.clone()
    }

    fn get(&self, id: &Id<OBJ>) -> Option<OBJ> {
        self.objects.get(id).cloned()
    }

    fn snapshot(&self) -> Vec<OBJ> {
        self.objects.values().cloned().collect()
    }

    fn len(&self) -> usize {
        self.objects.len()
    }

    fn reset(&mut self, state: State<OBJ>, objects: Vec<OBJ>) -> Result<()> {
        self.objects = objects
            .into_iter()
            .map(|obj| (obj.id().clone(), obj))
            .collect();
        self.state = Some(state);
        Ok(())
    }

    fn apply(&mut self, update: &Update<OBJ>, objects: Vec<OBJ>) -> Result<()> {
        if self.state.as_ref() != Some(&update.old_state) {
            return Err(Error::new(format!(
                "{} cache is at state {:?}, cannot apply changes since {}",
                OBJ::NAME,
                self.state,
                update.old_state
            ))
            .set_kind(ErrorKind::Invalidated));
        }
        for id in &update.destroyed {
            self.objects.shift_remove(id);
        }
        for obj in objects {
            self.objects.insert(obj.id().clone(), obj);
        }
        self.state = Some(update.new_state.clone());
        Ok(())
    }

    fn invalidate(&mut self) -> Result<()> {
        self.objects.clear();
        self.state = None;
        Ok(())
    }
}

/// Cache kept in memory only.
#[derive(Debug, Default)]
pub struct RamCache {
    mailboxes: RamCollection<MailboxObject>,
    identities: RamCollection<IdentityObject>,
    emails: RamCollection<EmailObject>,
    threads: RamCollection<ThreadObject>,
    queries: IndexMap<QueryHash, QueryWindow>,
}

impl RamCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Cache for RamCache {
    fn mailboxes(&self) -> &dyn CollectionCache<MailboxObject> {
        &self.mailboxes
    }

    fn mailboxes_mut(&mut self) -> &mut dyn CollectionCache<MailboxObject> {
        &mut self.mailboxes
    }

    fn identities(&self) -> &dyn CollectionCache<IdentityObject> {
        &self.identities
    }

    fn identities_mut(&mut self) -> &mut dyn CollectionCache<IdentityObject> {
        &mut self.identities
    }

    fn emails(&self) -> &dyn CollectionCache<EmailObject> {
        &self.emails
    }

    fn emails_mut(&mut self) -> &mut dyn CollectionCache<EmailObject> {
        &mut self.emails
    }

    fn threads(&self) -> &dyn CollectionCache<ThreadObject> {
        &self.threads
    }

    fn threads_mut(&mut self) -> &mut dyn CollectionCache<ThreadObject> {
        &mut self.threads
    }

    fn query_window(&self, hash: QueryHash) -> Option<QueryWindow> {
        self.queries.get(&hash).cloned()
    }

    fn set_query_window(&mut self, hash: QueryHash, window: QueryWindow) -> Result<()> {
        self.queries.insert(hash, window);
        Ok(())
    }

    fn invalidate_query(&mut self, hash: QueryHash) -> Result<bool> {
        Ok(self.queries.shift_remove(&hash).is_some())
    }

    fn invalidate_queries(&mut self) -> Result<()> {
        self.queries.clear();
        Ok(())
    }

    fn query_hashes(&self) -> Vec<QueryHash> {
        self.queries.keys().copied().collect()
    }
}
