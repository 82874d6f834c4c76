//! Cross-kind lookups: which intents hang off a subscription, and which
//! subscriptions must hear about a change.

use airspace_core::{Identifier, OperationalIntentId, Subscription, SubscriptionId};
use rusqlite::OptionalExtension;

use crate::descriptor::Record;
use crate::error::{SqliteResultExt, StoreError};
use crate::filter::SearchFilter;
use crate::repository::Scope;

impl Scope<'_> {
    /// Ids of operational intents naming `subscription_id`, in id order.
    ///
    /// The link is weak: a missing subscription yields an empty list, and
    /// deleting a subscription leaves intents pointing at it untouched.
    pub fn dependents_of_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Vec<OperationalIntentId>, StoreError> {
        let op = || format!("dependents of subscription {subscription_id}");
        self.check(op)?;
        let mut stmt = self
            .tx()
            .prepare_cached("SELECT id FROM operational_intents WHERE subscription_id = ?1 ORDER BY id")
            .during(op)?;
        let ids = stmt
            .query_map([subscription_id.as_bytes().as_slice()], |row| row.get::<_, Vec<u8>>(0))
            .during(op)?
            .collect::<Result<Vec<_>, _>>()
            .during(op)?;
        ids.into_iter()
            .map(|bytes| {
                <[u8; 16]>::try_from(bytes)
                    .map(OperationalIntentId::from_bytes)
                    .map_err(|b| {
                        StoreError::ConsistencyFault(format!("operational intent id of {} bytes", b.len()))
                    })
            })
            .collect()
    }

    /// Subscriptions whose cells and time window overlap `entity`.
    pub fn subscriptions_overlapping<R: Record>(&self, entity: &R) -> Result<Vec<Subscription>, StoreError> {
        let (starts_at, ends_at) = entity.time_bounds();
        let filter = SearchFilter::cells(entity.cells().clone()).with_window(starts_at, ends_at);
        self.search::<Subscription>(&filter)
    }

    /// Bumps each subscription's notification index by one and returns the
    /// new values in input order. Update timestamps are left alone so
    /// subscribers' version tokens stay valid.
    pub fn increment_notification_indices(&mut self, ids: &[SubscriptionId]) -> Result<Vec<i32>, StoreError> {
        let op = || format!("increment notification indices of {} subscriptions", ids.len());
        self.require_write(op)?;
        self.check(op)?;
        let mut stmt = self
            .tx()
            .prepare_cached(
                "UPDATE subscriptions SET notification_index = notification_index + 1
                 WHERE id = ?1 RETURNING notification_index",
            )
            .during(op)?;
        let mut indices = Vec::with_capacity(ids.len());
        for id in ids {
            let index = stmt
                .query_row([id.as_bytes().as_slice()], |row| row.get::<_, i32>(0))
                .optional()
                .during(op)?
                .ok_or_else(|| StoreError::not_found(Subscription::TABLE.kind, id))?;
            indices.push(index);
        }
        tracing::debug!(count = ids.len(), "notification indices incremented");
        Ok(indices)
    }

    /// Increments every subscription overlapping `entity` and returns them
    /// with their new notification indices.
    pub fn notify_subscriptions_for<R: Record>(&mut self, entity: &R) -> Result<Vec<Subscription>, StoreError> {
        let mut affected = self.subscriptions_overlapping(entity)?;
        let ids: Vec<SubscriptionId> = affected.iter().map(|s| s.id).collect();
        let indices = self.increment_notification_indices(&ids)?;
        for (subscription, index) in affected.iter_mut().zip(indices) {
            subscription.notification_index = index;
        }
        Ok(affected)
    }
}
