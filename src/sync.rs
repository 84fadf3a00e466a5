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

//! Incremental synchronization of mailboxes, identities, emails and threads.
//!
//! [`SyncEngine::refresh`] issues exactly one batch:
//!
//! - for a collection with a known state token, `Foo/changes` followed by
//!   two `Foo/get` calls referencing its `/created` and `/updated` results;
//! - for a collection without one, a full fetch. Emails are bootstrapped
//!   with the newest `maxObjectsInGet` of them and threads with the
//!   threads of those emails.
//!
//! Results are applied in collection order, emails before threads.

use std::sync::Arc;

use futures::lock::Mutex as FutureMutex;
use smallvec::SmallVec;

use crate::{
    cache::{CacheHandle, CachedObject, ObjectsState, Update},
    capabilities::{Capability, JmapSubmissionCapability},
    comparator::Comparator,
    error::{Error, Result},
    mail::{
        email::{EmailChanges, EmailGet, EmailQuery},
        identity::{IdentityChanges, IdentityGet},
        mailbox::{MailboxChanges, MailboxGet},
        thread::{ThreadChanges, ThreadGet},
        EmailObject, IdentityObject, MailboxObject, ThreadObject,
    },
    methods::{Changes, ChangesResponse, Get, GetResponse, Query, ResultField},
    objects::{Account, Id, Object, State},
    protocol::{Method, PendingResult, Request},
    push::StateChange,
    session::SessionResolver,
    transport::{ConnectionState, Transport},
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    Unchanged,
    /// Something changed locally, including a forced invalidation.
    Updated,
    /// The server has more changes; call `refresh` again.
    HasMore,
}

impl Status {
    fn combine(self, other: Self) -> Self {
        match (self, other) {
            (Self::HasMore, _) | (_, Self::HasMore) => Self::HasMore,
            (Self::Updated, _) | (_, Self::Updated) => Self::Updated,
            _ => Self::Unchanged,
        }
    }
}

#[derive(Clone, Debug)]
pub enum SyncEvent {
    Refreshed {
        status: Status,
        state: ObjectsState,
    },
    /// Local state of these collections was dropped because the server could
    /// not calculate changes from it.
    Invalidated {
        collections: Vec<&'static str>,
    },
    /// A push notification reports newer states than the cache holds for
    /// these collections.
    PushStateChange {
        stale: Vec<&'static str>,
    },
    ConnectionState(ConnectionState),
    Failure(Error),
}

#[derive(Clone)]
pub struct EventConsumer(Arc<dyn Fn(SyncEvent) + Send + Sync>);

impl EventConsumer {
    pub fn new(f: Arc<dyn Fn(SyncEvent) + Send + Sync>) -> Self {
        Self(f)
    }
}

impl std::fmt::Debug for EventConsumer {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "EventConsumer")
    }
}

impl std::ops::Deref for EventConsumer {
    type Target = dyn Fn(SyncEvent) + Send + Sync;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

/// A collection that is synchronized with `Foo/changes` and `Foo/get`.
pub trait Synced: CachedObject {
    type GetMethod: Method<Self, Response = GetResponse<Self>> + 'static;
    type ChangesMethod: Method<Self, Response = ChangesResponse<Self>> + 'static;

    fn get_call(call: Get<Self>) -> Self::GetMethod;
    fn changes_call(call: Changes<Self>) -> Self::ChangesMethod;
}

macro_rules! impl_synced {
    ($obj:ty, $get:ty, $changes:ty) => {
        impl Synced for $obj {
            type GetMethod = $get;
            type ChangesMethod = $changes;

            fn get_call(call: Get<Self>) -> Self::GetMethod {
                <$get>::new(call)
            }

            fn changes_call(call: Changes<Self>) -> Self::ChangesMethod {
                <$changes>::new(call)
            }
        }
    };
}

impl_synced!(MailboxObject, MailboxGet, MailboxChanges);
impl_synced!(IdentityObject, IdentityGet, IdentityChanges);
impl_synced!(EmailObject, EmailGet, EmailChanges);
impl_synced!(ThreadObject, ThreadGet, ThreadChanges);

/// The calls of one collection in a refresh batch.
enum Calls<OBJ: Synced> {
    Delta {
        changes: PendingResult<OBJ::ChangesMethod, OBJ>,
        created: PendingResult<OBJ::GetMethod, OBJ>,
        updated: PendingResult<OBJ::GetMethod, OBJ>,
    },
    Full(PendingResult<OBJ::GetMethod, OBJ>),
}

/// What a collection's calls amount to.
enum Outcome<OBJ: Synced> {
    Unchanged,
    Delta(Update<OBJ>, Vec<OBJ>),
    Full(State<OBJ>, Vec<OBJ>),
    CannotCalculateChanges,
}

impl<OBJ: Synced> Calls<OBJ> {
    async fn add_delta(
        req: &mut Request,
        account_id: &Id<Account>,
        since_state: State<OBJ>,
        max_changes: u64,
    ) -> Result<Self> {
        let changes: PendingResult<OBJ::ChangesMethod, OBJ> = req
            .add_call(&OBJ::changes_call(
                Changes::new()
                    .account_id(account_id.clone())
                    .since_state(since_state)
                    .max_changes(Some(max_changes)),
            ))
            .await?;
        let created: PendingResult<OBJ::GetMethod, OBJ> = req
            .add_call(&OBJ::get_call(
                Get::new()
                    .account_id(account_id.clone())
                    .ids(Some(changes.reference(ResultField::new("/created")))),
            ))
            .await?;
        let updated: PendingResult<OBJ::GetMethod, OBJ> = req
            .add_call(&OBJ::get_call(
                Get::new()
                    .account_id(account_id.clone())
                    .ids(Some(changes.reference(ResultField::new("/updated")))),
            ))
            .await?;
        Ok(Self::Delta {
            changes,
            created,
            updated,
        })
    }

    async fn add_full(req: &mut Request, account_id: &Id<Account>) -> Result<Self> {
        let get: PendingResult<OBJ::GetMethod, OBJ> = req
            .add_call(&OBJ::get_call(Get::new().account_id(account_id.clone())))
            .await?;
        Ok(Self::Full(get))
    }

    async fn outcome(self) -> Result<Outcome<OBJ>> {
        match self {
            Self::Full(get) => {
                let GetResponse { state, list, .. } = get.response().await?;
                Ok(Outcome::Full(state, list))
            }
            Self::Delta {
                changes,
                created,
                updated,
            } => {
                let changes = match changes.response().await {
                    Ok(changes) => changes,
                    Err(err) if err.is_cannot_calculate_changes() => {
                        // The /get calls then fail with invalidResultReference.
                        return Ok(Outcome::CannotCalculateChanges);
                    }
                    Err(err) => return Err(err),
                };
                changes.validate()?;
                let update = Update::from(changes);
                if update.old_state == update.new_state && update.is_empty() {
                    return Ok(Outcome::Unchanged);
                }
                let mut objects = created.response().await?.list;
                objects.extend(updated.response().await?.list);
                Ok(Outcome::Delta(update, objects))
            }
        }
    }
}

enum MailCalls {
    Delta(Calls<EmailObject>, Calls<ThreadObject>),
    Bootstrap(Bootstrap),
}

/// Email and thread bootstrap: the newest emails and their threads.
struct Bootstrap {
    emails: PendingResult<EmailGet, EmailObject>,
    threads: PendingResult<ThreadGet, ThreadObject>,
}

impl Bootstrap {
    async fn add(req: &mut Request, account_id: &Id<Account>, limit: u64) -> Result<Self> {
        let query: PendingResult<EmailQuery, EmailObject> = req
            .add_call(&EmailQuery::new(
                Query::new()
                    .account_id(account_id.clone())
                    .sort(Some(vec![Comparator::new("receivedAt").is_ascending(false)]))
                    .limit(Some(limit)),
            ))
            .await?;
        let emails: PendingResult<EmailGet, EmailObject> = req
            .add_call(&EmailGet::new(
                Get::new()
                    .account_id(account_id.clone())
                    .ids(Some(query.reference(EmailQuery::RESULT_FIELD_IDS))),
            ))
            .await?;
        let threads: PendingResult<ThreadGet, ThreadObject> = req
            .add_call(&ThreadGet::new(
                Get::new()
                    .account_id(account_id.clone())
                    .ids(Some(emails.reference(ThreadGet::RESULT_FIELD_THREAD_IDS))),
            ))
            .await?;
        // The query result itself is only needed server side.
        drop(query);
        Ok(Self { emails, threads })
    }
}

#[derive(Debug)]
pub struct SyncEngine {
    transport: Arc<dyn Transport>,
    resolver: Arc<SessionResolver>,
    cache: CacheHandle,
    request_no: Arc<FutureMutex<usize>>,
    event_consumer: Option<EventConsumer>,
}

impl SyncEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        resolver: Arc<SessionResolver>,
        cache: CacheHandle,
        request_no: Arc<FutureMutex<usize>>,
        event_consumer: Option<EventConsumer>,
    ) -> Self {
        Self {
            transport,
            resolver,
            cache,
            request_no,
            event_consumer,
        }
    }

    pub fn cache(&self) -> &CacheHandle {
        &self.cache
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(consumer) = self.event_consumer.as_ref() {
            consumer(event);
        }
    }

    /// Bring the cache up to date from the state tokens it holds, in one
    /// round trip.
    ///
    /// A collection whose changes the server cannot calculate is
    /// invalidated, together with everything derived from it, and the
    /// refresh reports [`Status::Updated`]; the next refresh refetches it.
    pub async fn refresh(&self) -> Result<Status> {
        let _writer = self.cache.writer().await;
        let ret = self.refresh_inner().await;
        match ret {
            Ok(status) => self.emit(SyncEvent::Refreshed {
                status,
                state: self.cache.objects_state(),
            }),
            Err(ref err) => {
                log::error!("JMAP refresh failed: {}", err);
                self.emit(SyncEvent::Failure(err.clone()));
            }
        }
        ret
    }

    async fn refresh_inner(&self) -> Result<Status> {
        let session = self.resolver.get().await?;
        let account_id = session.mail_account_id()?;
        let max_objects = session.max_objects_in_get();
        let with_identities = session
            .capabilities
            .contains_key(JmapSubmissionCapability::URI);
        let state = self.cache.objects_state();
        crate::debug!("refresh from {:?}", &state);

        let mut req = Request::new(self.request_no.clone());
        let mailboxes: Calls<MailboxObject> = match state.mailbox {
            Some(s) => Calls::add_delta(&mut req, &account_id, s, max_objects).await?,
            None => Calls::add_full(&mut req, &account_id).await?,
        };
        let identities: Option<Calls<IdentityObject>> = match (with_identities, state.identity) {
            (false, _) => None,
            (true, Some(s)) => Some(Calls::add_delta(&mut req, &account_id, s, max_objects).await?),
            (true, None) => Some(Calls::add_full(&mut req, &account_id).await?),
        };
        let mail = match (state.email, state.thread) {
            (Some(email_state), Some(thread_state)) => MailCalls::Delta(
                Calls::add_delta(&mut req, &account_id, email_state, max_objects).await?,
                Calls::add_delta(&mut req, &account_id, thread_state, max_objects).await?,
            ),
            _ => MailCalls::Bootstrap(Bootstrap::add(&mut req, &account_id, max_objects).await?),
        };

        self.transport.submit(req.build())?.await?;

        let mut status = Status::Unchanged;
        let mut invalidated: SmallVec<[&'static str; 4]> = SmallVec::new();
        let mut first_error: Option<Error> = None;
        macro_rules! record {
            ($outcome:expr) => {
                match $outcome {
                    Ok(s) => status = status.combine(s),
                    Err(err) => {
                        log::error!("{}", err);
                        first_error.get_or_insert(err);
                    }
                }
            };
        }

        record!(self.apply(mailboxes.outcome().await, &mut invalidated));
        if let Some(identities) = identities {
            record!(self.apply(identities.outcome().await, &mut invalidated));
        }
        match mail {
            MailCalls::Delta(emails, threads) => {
                let emails = self.apply(emails.outcome().await, &mut invalidated);
                let emails_ok = emails.is_ok();
                record!(emails);
                if emails_ok && !invalidated.contains(&EmailObject::NAME) {
                    record!(self.apply(threads.outcome().await, &mut invalidated));
                }
            }
            MailCalls::Bootstrap(Bootstrap { emails, threads }) => {
                let bootstrap = async {
                    let emails = emails.response().await?;
                    let threads = threads.response().await?;
                    Ok::<_, Error>((emails, threads))
                };
                record!(bootstrap.await.and_then(|(emails, threads)| {
                    self.cache.write(|cache| {
                        cache.invalidate_queries()?;
                        cache.emails_mut().reset(emails.state, emails.list)?;
                        cache.threads_mut().reset(threads.state, threads.list)
                    })?;
                    Ok(Status::Updated)
                }));
            }
        }

        if !invalidated.is_empty() {
            log::warn!(
                "Server cannot calculate changes; invalidated local state of {:?}",
                invalidated
            );
            self.emit(SyncEvent::Invalidated {
                collections: invalidated.into_vec(),
            });
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(status),
        }
    }

    fn apply<OBJ: Synced>(
        &self,
        outcome: Result<Outcome<OBJ>>,
        invalidated: &mut SmallVec<[&'static str; 4]>,
    ) -> Result<Status> {
        match outcome? {
            Outcome::Unchanged => Ok(Status::Unchanged),
            Outcome::Full(state, list) => {
                self.cache
                    .write(|cache| OBJ::collection_mut(cache).reset(state, list))?;
                Ok(Status::Updated)
            }
            Outcome::Delta(update, objects) => {
                let has_more = update.has_more;
                self.cache
                    .write(|cache| OBJ::collection_mut(cache).apply(&update, objects))?;
                Ok(if has_more {
                    Status::HasMore
                } else {
                    Status::Updated
                })
            }
            Outcome::CannotCalculateChanges => {
                self.cache.write(|cache| {
                    if OBJ::NAME == EmailObject::NAME || OBJ::NAME == ThreadObject::NAME {
                        invalidated.extend([EmailObject::NAME, ThreadObject::NAME]);
                        cache.invalidate_emails_threads_and_queries()
                    } else {
                        invalidated.push(OBJ::NAME);
                        OBJ::collection_mut(cache).invalidate()
                    }
                })?;
                Ok(Status::Updated)
            }
        }
    }

    /// Invalidation hook of the push channel. Returns the collections whose
    /// cached state differs from the pushed one.
    pub fn on_push(&self, change: &StateChange) -> Vec<&'static str> {
        let account_id = self
            .resolver
            .current()
            .and_then(|session| session.mail_account_id().ok());
        let Some(changed) = account_id.and_then(|id| change.for_account(&id).cloned()) else {
            return vec![];
        };
        let state = self.cache.objects_state();
        let stale = stale_collections(&state, |name| changed.get(name).map(String::as_str));
        if !stale.is_empty() {
            crate::debug!("push: stale collections {:?}", &stale);
            self.emit(SyncEvent::PushStateChange {
                stale: stale.clone(),
            });
        }
        stale
    }

    pub fn on_connection_state(&self, state: ConnectionState) {
        self.emit(SyncEvent::ConnectionState(state));
    }
}

fn stale_collections<'a>(
    state: &ObjectsState,
    pushed: impl Fn(&str) -> Option<&'a str>,
) -> Vec<&'static str> {
    fn is_stale<OBJ>(cached: &Option<State<OBJ>>, pushed: Option<&str>) -> bool {
        match (cached, pushed) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(cached), Some(pushed)) => cached.as_str() != pushed,
        }
    }

    let mut ret = vec![];
    if is_stale(&state.mailbox, pushed(MailboxObject::NAME)) {
        ret.push(MailboxObject::NAME);
    }
    if is_stale(&state.identity, pushed(IdentityObject::NAME)) {
        ret.push(IdentityObject::NAME);
    }
    if is_stale(&state.email, pushed(EmailObject::NAME)) {
        ret.push(EmailObject::NAME);
    }
    if is_stale(&state.thread, pushed(ThreadObject::NAME)) {
        ret.push(ThreadObject::NAME);
    }
    ret
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;

    #[test]
    fn test_jmap_status_combine() {
        use Status::*;
        assert_eq!(Unchanged.combine(Unchanged), Unchanged);
        assert_eq!(Unchanged.combine(Updated), Updated);
        assert_eq!(HasMore.combine(Updated), HasMore);
        assert_eq!(Updated.combine(HasMore), HasMore);
    }

    #[test]
    fn test_jmap_stale_collections() {
        let state = ObjectsState {
            mailbox: Some("m1".into()),
            identity: None,
            email: Some("e1".into()),
            thread: Some("t1".into()),
        };
        let pushed: IndexMap<String, String> = [
            ("Mailbox", "m1"),
            ("Email", "e2"),
            ("Identity", "i1"),
            ("EmailDelivery", "d1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(
            stale_collections(&state, |name| pushed.get(name).map(String::as_str)),
            vec!["Identity", "Email"]
        );
    }
}
