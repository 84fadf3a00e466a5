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

//! One materialized result window per distinct email query.
//!
//! A window starts at server position 0 and is extended page by page with
//! anchored `Email/query` calls. `Email/queryChanges` keeps it current after
//! the underlying emails changed; when the server cannot calculate query
//! changes the window is dropped and rebuilt on next use.

use std::sync::{Arc, Mutex};

use futures::lock::Mutex as FutureMutex;
use indexmap::IndexMap;

use crate::{
    cache::{CacheHandle, MissingRange, QueryHash, QueryItem, QueryWindow},
    comparator::Comparator,
    error::{Error, ErrorKind, Result},
    mail::{
        email::{EmailFilter, EmailGet, EmailQuery, EmailQueryChanges},
        EmailObject, ThreadObject,
    },
    methods::{Get, Query, QueryChanges, QueryChangesResponse, QueryResponse},
    objects::{Account, Id},
    protocol::{PendingResult, Request},
    session::SessionResolver,
    sync::Status,
    transport::Transport,
};

/// Filter and sort of an email query. Thread collapsing is applied locally
/// and is not part of the query's identity.
#[derive(Clone, Debug, Default, Serialize)]
pub struct EmailQuerySpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<EmailFilter>,
    pub sort: Vec<Comparator<EmailObject>>,
    #[serde(skip)]
    pub collapse_threads: bool,
}

impl EmailQuerySpec {
    pub fn new(filter: Option<EmailFilter>, sort: Vec<Comparator<EmailObject>>) -> Self {
        Self {
            filter,
            sort,
            collapse_threads: false,
        }
    }

    _impl!(collapse_threads: bool);

    pub fn hash(&self) -> Result<QueryHash> {
        Ok(QueryHash::from_bytes(&serde_json::to_vec(self)?))
    }

    fn query_call(&self, account_id: &Id<Account>) -> Query<EmailFilter, EmailObject> {
        Query::new()
            .account_id(account_id.clone())
            .filter(self.filter.clone())
            .sort(if self.sort.is_empty() {
                None
            } else {
                Some(self.sort.clone())
            })
    }
}

struct Page {
    query: PendingResult<EmailQuery, EmailObject>,
    threads: PendingResult<EmailGet, EmailObject>,
}

impl Page {
    /// `Email/query` and the thread ids of the returned emails.
    async fn add(req: &mut Request, call: Query<EmailFilter, EmailObject>) -> Result<Self> {
        let account_id = call.account_id.clone();
        let query: PendingResult<EmailQuery, EmailObject> =
            req.add_call(&EmailQuery::new(call)).await?;
        let threads: PendingResult<EmailGet, EmailObject> = req
            .add_call(&EmailGet::new(
                Get::new()
                    .account_id(account_id)
                    .ids(Some(query.reference(EmailQuery::RESULT_FIELD_IDS)))
                    .properties(Some(vec!["threadId".to_string()])),
            ))
            .await?;
        Ok(Self { query, threads })
    }

    async fn response(self) -> Result<(QueryResponse<EmailObject>, Vec<QueryItem>)> {
        let query = self.query.response().await?;
        let thread_ids = thread_ids(self.threads).await?;
        let items = rows(&query.ids, &thread_ids);
        Ok((query, items))
    }
}

async fn thread_ids(
    get: PendingResult<EmailGet, EmailObject>,
) -> Result<IndexMap<Id<EmailObject>, Id<ThreadObject>>> {
    Ok(get
        .response()
        .await?
        .list
        .into_iter()
        .map(|e| (e.id, e.thread_id))
        .collect())
}

/// Pair ids with their thread, in server order. An email the server no
/// longer has is its own thread.
fn rows(
    ids: &[Id<EmailObject>],
    thread_ids: &IndexMap<Id<EmailObject>, Id<ThreadObject>>,
) -> Vec<QueryItem> {
    ids.iter()
        .map(|id| QueryItem {
            id: id.clone(),
            thread_id: thread_ids.get(id).cloned().unwrap_or_else(|| id.cast()),
        })
        .collect()
}

/// Splice a `/queryChanges` delta into the items of a window starting at
/// position 0.
fn splice(items: &mut Vec<QueryItem>, removed: &[Id<EmailObject>], added: Vec<(u64, QueryItem)>) {
    items.retain(|item| !removed.contains(&item.id));
    for (index, item) in added {
        let index = usize::try_from(index).unwrap_or(usize::MAX).min(items.len());
        items.insert(index, item);
    }
}

#[derive(Debug)]
pub struct QueryCache {
    transport: Arc<dyn Transport>,
    resolver: Arc<SessionResolver>,
    cache: CacheHandle,
    request_no: Arc<FutureMutex<usize>>,
    specs: Mutex<IndexMap<QueryHash, EmailQuerySpec>>,
}

impl QueryCache {
    pub fn new(
        transport: Arc<dyn Transport>,
        resolver: Arc<SessionResolver>,
        cache: CacheHandle,
        request_no: Arc<FutureMutex<usize>>,
    ) -> Self {
        Self {
            transport,
            resolver,
            cache,
            request_no,
            specs: Mutex::new(IndexMap::new()),
        }
    }

    pub fn window(&self, spec: &EmailQuerySpec) -> Result<Option<QueryWindow>> {
        Ok(self.cache.query_window(spec.hash()?))
    }

    /// The rows of the window, one per thread if `spec` collapses threads.
    pub fn rows(&self, spec: &EmailQuerySpec) -> Result<Vec<QueryItem>> {
        Ok(self
            .window(spec)?
            .map(|window| {
                if spec.collapse_threads {
                    window.collapsed().into_iter().cloned().collect()
                } else {
                    window.items
                }
            })
            .unwrap_or_default())
    }

    /// Fetch the first page of the query, or the page after `after_id`.
    ///
    /// Without `after_id` an existing complete window is kept as is. If the
    /// server no longer has `after_id` in the results, this query's window
    /// is dropped and an `anchorNotFound` error is returned.
    pub async fn query(
        &self,
        spec: &EmailQuerySpec,
        page_size: u64,
        after_id: Option<&Id<EmailObject>>,
    ) -> Result<Status> {
        let _writer = self.cache.writer().await;
        let hash = spec.hash()?;
        self.specs.lock().unwrap().insert(hash, spec.clone());
        let window = self.cache.query_window(hash);
        match after_id {
            None if window.as_ref().map_or(false, |w| w.missing.is_none()) => {
                Ok(Status::Unchanged)
            }
            None => self.first_page(spec, hash, page_size).await,
            Some(anchor) => self.next_page(spec, hash, window, page_size, anchor).await,
        }
    }

    async fn first_page(
        &self,
        spec: &EmailQuerySpec,
        hash: QueryHash,
        page_size: u64,
    ) -> Result<Status> {
        let session = self.resolver.get().await?;
        let account_id = session.mail_account_id()?;
        let mut req = Request::new(self.request_no.clone());
        let page = Page::add(
            &mut req,
            spec.query_call(&account_id)
                .limit(Some(page_size))
                .calculate_total(true),
        )
        .await?;
        self.transport.submit(req.build())?.await?;
        let (query, items) = page.response().await?;
        self.cache.write(|cache| {
            cache.set_query_window(
                hash,
                QueryWindow {
                    query_state: query.query_state,
                    can_calculate_changes: query.can_calculate_changes,
                    position: query.position,
                    items,
                    total: query.total,
                    missing: None,
                },
            )
        })?;
        Ok(Status::Updated)
    }

    async fn next_page(
        &self,
        spec: &EmailQuerySpec,
        hash: QueryHash,
        window: Option<QueryWindow>,
        page_size: u64,
        anchor: &Id<EmailObject>,
    ) -> Result<Status> {
        let session = self.resolver.get().await?;
        let account_id = session.mail_account_id()?;
        let mut req = Request::new(self.request_no.clone());
        let page = Page::add(
            &mut req,
            spec.query_call(&account_id)
                .anchor(Some(anchor.clone()))
                .anchor_offset(1)
                .limit(Some(page_size))
                .calculate_total(true),
        )
        .await?;
        self.transport.submit(req.build())?.await?;
        let (query, page_items) = match page.response().await {
            Ok(v) => v,
            Err(err) if err.is_anchor_not_found() => {
                log::warn!(
                    "Query {}: anchor {} no longer in the results, dropping its window",
                    hash,
                    anchor
                );
                self.cache.write(|cache| cache.invalidate_query(hash))?;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        let window = match window {
            Some(mut window) if window.query_state == query.query_state => {
                // Everything after the anchor is replaced by the new page.
                let Some(pos) = window.index_of(anchor) else {
                    return Err(Error::new(format!(
                        "Query {}: anchor {} is not part of the local window",
                        hash, anchor
                    ))
                    .set_kind(ErrorKind::NotFound));
                };
                window.items.truncate(pos + 1);
                window.items.extend(page_items);
                window.total = query.total.or(window.total);
                window
            }
            stale => {
                // The results moved since the window was fetched: keep only
                // the new page and remember what precedes it is unknown.
                if stale.is_some() {
                    crate::debug!("query {} state changed while paging", hash);
                }
                let missing = page_items.first().map(|item| MissingRange {
                    anchor: item.id.clone(),
                    count: query.position,
                });
                QueryWindow {
                    query_state: query.query_state,
                    can_calculate_changes: query.can_calculate_changes,
                    position: query.position,
                    items: page_items,
                    total: query.total,
                    missing: missing.filter(|m| m.count > 0),
                }
            }
        };
        self.cache
            .write(|cache| cache.set_query_window(hash, window))?;
        Ok(Status::Updated)
    }

    /// Bring the window of `spec` up to date with `Email/queryChanges`.
    ///
    /// If that fails the window is dropped before the error is returned, so
    /// the next [`QueryCache::query`] refetches it instead of serving rows of
    /// an outdated query state.
    pub async fn refresh(&self, spec: &EmailQuerySpec) -> Result<Status> {
        let _writer = self.cache.writer().await;
        self.refresh_window(spec).await
    }

    /// Refresh every window this query cache has served.
    pub async fn refresh_all(&self) -> Result<Status> {
        let _writer = self.cache.writer().await;
        let specs = self
            .specs
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect::<Vec<_>>();
        let mut status = Status::Unchanged;
        let mut first_error = None;
        for spec in specs {
            match self.refresh_window(&spec).await {
                Ok(Status::Unchanged) => {}
                Ok(_) => status = Status::Updated,
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(status),
        }
    }

    async fn refresh_window(&self, spec: &EmailQuerySpec) -> Result<Status> {
        let hash = spec.hash()?;
        match self.revalidate(spec, hash).await {
            Ok(status) => Ok(status),
            Err(err) => {
                log::warn!("Query {}: refresh failed, dropping its window: {}", hash, err);
                self.cache.write(|cache| cache.invalidate_query(hash))?;
                Err(err)
            }
        }
    }

    async fn revalidate(&self, spec: &EmailQuerySpec, hash: QueryHash) -> Result<Status> {
        let Some(mut window) = self.cache.query_window(hash) else {
            return Ok(Status::Unchanged);
        };
        if !window.can_calculate_changes || window.position != 0 || window.missing.is_some() {
            self.cache.write(|cache| cache.invalidate_query(hash))?;
            return Ok(Status::Updated);
        }
        let session = self.resolver.get().await?;
        let account_id = session.mail_account_id()?;
        let mut req = Request::new(self.request_no.clone());
        let call = QueryChanges::new(account_id.clone(), window.query_state.clone())
            .filter(spec.filter.clone())
            .sort(if spec.sort.is_empty() {
                None
            } else {
                Some(spec.sort.clone())
            })
            .up_to_id(window.last_id().cloned())
            .calculate_total(true);
        let changes: PendingResult<EmailQueryChanges, EmailObject> =
            req.add_call(&EmailQueryChanges::new(call)).await?;
        let threads: PendingResult<EmailGet, EmailObject> = req
            .add_call(&EmailGet::new(
                Get::new()
                    .account_id(account_id)
                    .ids(Some(changes.reference(EmailQueryChanges::RESULT_FIELD_ADDED_IDS)))
                    .properties(Some(vec!["threadId".to_string()])),
            ))
            .await?;
        self.transport.submit(req.build())?.await?;

        let QueryChangesResponse {
            old_query_state,
            new_query_state,
            total,
            removed,
            added,
            ..
        } = match changes.response().await {
            Ok(v) => v,
            Err(err)
                if err.is_cannot_calculate_changes()
                    || matches!(
                        err.kind,
                        ErrorKind::Method(crate::methods::MethodErrorType::TooManyChanges)
                    ) =>
            {
                log::warn!("Query {}: {}; dropping its window", hash, err);
                self.cache.write(|cache| cache.invalidate_query(hash))?;
                return Ok(Status::Updated);
            }
            Err(err) => return Err(err),
        };
        if old_query_state == new_query_state && removed.is_empty() && added.is_empty() {
            return Ok(Status::Unchanged);
        }
        let thread_ids = thread_ids(threads).await?;
        let added = added
            .into_iter()
            .map(|a| {
                let item = rows(std::slice::from_ref(&a.id), &thread_ids).remove(0);
                (a.index, item)
            })
            .collect();
        splice(&mut window.items, &removed, added);
        window.query_state = new_query_state;
        window.total = total.or(window.total);
        self.cache
            .write(|cache| cache.set_query_window(hash, window))?;
        Ok(Status::Updated)
    }
}
