use airspace_core::{Ovn, SubscriptionId};
use airspace_storage::{Cancel, Record, SearchFilter, Store, StoreConfig, StoreError};

/// One airspace participant with its own store handle.
pub struct TestManager {
    pub owner: String,
    pub store: Store,
    pub cancel: Cancel,
}

impl TestManager {
    pub fn new(owner: &str) -> Result<Self, StoreError> {
        Self::open(owner, StoreConfig::default())
    }

    pub fn open(owner: &str, config: StoreConfig) -> Result<Self, StoreError> {
        crate::init_tracing();
        Ok(Self {
            owner: owner.to_string(),
            store: Store::open(config)?,
            cancel: Cancel::new(),
        })
    }

    /// Create-or-replace without a version token.
    pub fn put<R: Record>(&mut self, entity: R) -> Result<R, StoreError> {
        self.store.upsert(&self.cancel, entity, None)
    }

    /// Update guarded by the caller's last-seen version token.
    pub fn update<R: Record>(&mut self, entity: R, token: &Ovn) -> Result<R, StoreError> {
        self.store.upsert(&self.cancel, entity, Some(token))
    }

    pub fn get<R: Record>(&mut self, id: R::Id) -> Result<R, StoreError> {
        self.store.get(&self.cancel, id)
    }

    pub fn delete<R: Record>(&mut self, id: R::Id) -> Result<(), StoreError> {
        self.store.delete::<R>(&self.cancel, id)
    }

    pub fn search<R: Record>(&mut self, filter: &SearchFilter) -> Result<Vec<R>, StoreError> {
        self.store.search(&self.cancel, filter)
    }

    pub fn indexed_cells<R: Record>(&mut self, id: R::Id) -> Result<airspace_core::CellUnion, StoreError> {
        self.store
            .read(&self.cancel, |scope| scope.indexed_cells::<R>(id))
    }

    pub fn notification_index(&mut self, id: SubscriptionId) -> Result<i32, StoreError> {
        let subscription: airspace_core::Subscription = self.get(id)?;
        Ok(subscription.notification_index)
    }
}
