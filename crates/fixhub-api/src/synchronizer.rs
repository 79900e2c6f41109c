//! Generic resource synchronizer.
//!
//! Holds the locally cached list of one resource kind and performs
//! create/update/delete against the hub. The cache is a read-through
//! projection: it is replaced wholesale by [`ResourceSynchronizer::refresh`]
//! after every successful mutation and never patched locally.
//!
//! Mutations on one instance are serialized by a non-blocking gate. A second
//! mutation while one is pending is rejected with
//! [`ApiError::MutationInFlight`] before any request is sent.

use crate::client::HubClient;
use crate::error::{ApiError, ApiResult};
use fixhub_core::{ActionOutcome, Confirm, Connection, Resource, Route};
use fixhub_telemetry::Metrics;
use parking_lot::RwLock;
use reqwest::Method;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub type ConnectionSynchronizer = ResourceSynchronizer<Connection>;
pub type RouteSynchronizer = ResourceSynchronizer<Route>;

/// Cached, mutable view of one server-owned collection.
pub struct ResourceSynchronizer<T: Resource> {
    client: HubClient,
    items: RwLock<Vec<T>>,
    /// Number of refreshes in flight.
    loading: AtomicUsize,
    pending_mutation: AtomicBool,
    last_error: RwLock<Option<String>>,
    torn_down: CancellationToken,
}

/// Holds the mutation gate; releases it on drop.
struct MutationGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for MutationGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Marks a fetch in flight for its lifetime.
pub(crate) struct LoadingGuard<'a> {
    count: &'a AtomicUsize,
}

impl<'a> LoadingGuard<'a> {
    pub(crate) fn new(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::AcqRel);
        Self { count }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<T: Resource> ResourceSynchronizer<T> {
    /// Create an empty synchronizer. Call [`refresh`](Self::refresh) to populate it.
    pub fn new(client: HubClient) -> Self {
        Self {
            client,
            items: RwLock::new(Vec::new()),
            loading: AtomicUsize::new(0),
            pending_mutation: AtomicBool::new(false),
            last_error: RwLock::new(None),
            torn_down: CancellationToken::new(),
        }
    }

    /// Current cached list, in server order.
    pub fn snapshot(&self) -> Vec<T> {
        self.items.read().clone()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire) > 0
    }

    pub fn is_mutation_pending(&self) -> bool {
        self.pending_mutation.load(Ordering::Acquire)
    }

    /// Message of the most recent failed refresh or mutation, cleared on success.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Stop applying responses. Requests already in flight complete but
    /// their results are discarded. Idempotent.
    pub fn teardown(&self) {
        if !self.torn_down.is_cancelled() {
            debug!(kind = T::KIND, "Synchronizer torn down");
            self.torn_down.cancel();
        }
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.is_cancelled()
    }

    /// Fetch the authoritative list and replace the cache.
    ///
    /// On failure the previous cache stays in place.
    pub async fn refresh(&self) -> ApiResult<Vec<T>> {
        self.ensure_live()?;
        let _loading = LoadingGuard::new(&self.loading);

        // The hub may answer `null` for an empty collection
        let result = self
            .client
            .get_json::<Option<Vec<T>>>(T::COLLECTION)
            .await
            .map(Option::unwrap_or_default);

        self.ensure_live()?;

        match result {
            Ok(items) => {
                debug!(kind = T::KIND, count = items.len(), "Refreshed");
                Metrics::fetch(T::KIND, true);
                *self.items.write() = items.clone();
                *self.last_error.write() = None;
                Ok(items)
            }
            Err(e) => {
                warn!(kind = T::KIND, error = %e, "Refresh failed, keeping previous list");
                Metrics::fetch(T::KIND, false);
                *self.last_error.write() = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Create a record. Validates locally, then refreshes on success.
    pub async fn create(&self, draft: &T) -> ApiResult<T> {
        draft.validate()?;
        self.ensure_live()?;
        let _gate = self.acquire_mutation()?;

        info!(kind = T::KIND, "Creating {}", T::NOUN);
        let result = self
            .client
            .send_json::<T, T>(Method::POST, T::COLLECTION, draft)
            .await
            .map_err(ApiError::into_mutation);

        self.complete_mutation("create", result).await
    }

    /// Replace the record addressed by `id`. Validates locally, then refreshes
    /// on success.
    pub async fn update(&self, id: &T::Id, draft: &T) -> ApiResult<T> {
        draft.validate()?;
        self.ensure_live()?;
        let _gate = self.acquire_mutation()?;

        let id = id.to_string();
        info!(kind = T::KIND, %id, "Updating {}", T::NOUN);
        let result = self
            .client
            .send_json::<T, T>(Method::PUT, &self.member_path(&id), draft)
            .await
            .map_err(ApiError::into_mutation);

        self.complete_mutation("update", result).await
    }

    /// Delete the record addressed by `id` once the operator confirms.
    pub async fn delete(&self, id: &T::Id, confirm: &dyn Confirm) -> ApiResult<ActionOutcome> {
        self.ensure_live()?;
        if self.is_mutation_pending() {
            return Err(ApiError::MutationInFlight { kind: T::KIND });
        }

        let id = id.to_string();
        if !confirm.confirm(&format!("Delete {} {id}?", T::NOUN)) {
            debug!(kind = T::KIND, %id, "Delete declined");
            return Ok(ActionOutcome::Declined);
        }

        let _gate = self.acquire_mutation()?;
        info!(kind = T::KIND, %id, "Deleting {}", T::NOUN);
        let result = self
            .client
            .delete(&self.member_path(&id))
            .await
            .map_err(ApiError::into_mutation);

        self.complete_mutation("delete", result)
            .await
            .map(|()| ActionOutcome::Completed)
    }

    fn member_path<'a>(&self, id: &'a str) -> Vec<&'a str> {
        let mut path: Vec<&str> = T::COLLECTION.to_vec();
        path.push(id);
        path
    }

    fn acquire_mutation(&self) -> ApiResult<MutationGuard<'_>> {
        self.pending_mutation
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| {
                debug!(kind = T::KIND, "Mutation rejected, another is pending");
                ApiError::MutationInFlight { kind: T::KIND }
            })?;
        Ok(MutationGuard {
            flag: &self.pending_mutation,
        })
    }

    /// Record the outcome and refresh after success. Runs while the caller
    /// still holds the mutation gate.
    async fn complete_mutation<R>(&self, op: &'static str, result: ApiResult<R>) -> ApiResult<R> {
        self.ensure_live()?;

        match result {
            Ok(value) => {
                Metrics::mutation(T::KIND, op, true);
                if let Err(e) = self.refresh().await {
                    // The mutation itself succeeded; the stale list stays visible
                    warn!(kind = T::KIND, op, error = %e, "Refresh after mutation failed");
                }
                Ok(value)
            }
            Err(e) => {
                warn!(kind = T::KIND, op, error = %e, "Mutation failed");
                Metrics::mutation(T::KIND, op, false);
                *self.last_error.write() = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn ensure_live(&self) -> ApiResult<()> {
        if self.is_torn_down() {
            return Err(ApiError::TornDown);
        }
        Ok(())
    }
}

impl ResourceSynchronizer<Route> {
    /// Re-derive the current index of `expected` from a fresh list.
    ///
    /// Route identity is positional, so an index read earlier may point at a
    /// different rule by now. Returns a mutation error if the rule is gone.
    pub async fn resolve_index(&self, expected: &Route) -> ApiResult<usize> {
        let routes = self.refresh().await?;
        routes
            .iter()
            .position(|r| r == expected)
            .ok_or_else(|| ApiError::Mutation {
                status: None,
                message: format!("route {} -> {} no longer exists", expected.from, expected.to),
            })
    }
}
