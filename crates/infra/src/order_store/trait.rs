use async_trait::async_trait;
use thiserror::Error;

use orderstream_core::{CustomerId, DomainError, ExpectedVersion, Order, OrderId, OrderStatus};

/// Input for creating an order.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub total: f64,
}

impl NewOrder {
    /// New order with a freshly generated id.
    pub fn new(customer_id: CustomerId, total: f64) -> Self {
        Self {
            id: OrderId::generate(),
            customer_id,
            total,
        }
    }

    pub fn with_id(mut self, id: OrderId) -> Self {
        self.id = id;
        self
    }
}

/// Field changes applied by a plain update (status changes go through `set_status`).
#[derive(Debug, Clone, PartialEq)]
pub struct OrderUpdate {
    pub total: f64,
}

/// Result of a committed status change.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub old_status: OrderStatus,
    pub order: Order,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    /// Validation, not-found, and optimistic concurrency failures.
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("order store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Domain(DomainError::Conflict(_)))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::Domain(DomainError::NotFound))
    }
}

/// Transactional order store (collaborator of the order service).
///
/// Every successful write commits exactly one new version. Versions start at
/// 1 and increase by one per write; `ExpectedVersion::Exact` must match the
/// current version or the write fails with a conflict.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: NewOrder) -> Result<Order, StoreError>;

    async fn update(
        &self,
        id: &OrderId,
        update: OrderUpdate,
        expected: ExpectedVersion,
    ) -> Result<Order, StoreError>;

    /// Move the order to `status`; illegal transitions are rejected.
    async fn set_status(
        &self,
        id: &OrderId,
        status: OrderStatus,
        expected: ExpectedVersion,
    ) -> Result<StatusChange, StoreError>;

    async fn get(&self, id: &OrderId) -> Result<Option<Order>, StoreError>;
}

#[async_trait]
impl<S> OrderStore for std::sync::Arc<S>
where
    S: OrderStore + ?Sized,
{
    async fn insert(&self, order: NewOrder) -> Result<Order, StoreError> {
        (**self).insert(order).await
    }

    async fn update(
        &self,
        id: &OrderId,
        update: OrderUpdate,
        expected: ExpectedVersion,
    ) -> Result<Order, StoreError> {
        (**self).update(id, update, expected).await
    }

    async fn set_status(
        &self,
        id: &OrderId,
        status: OrderStatus,
        expected: ExpectedVersion,
    ) -> Result<StatusChange, StoreError> {
        (**self).set_status(id, status, expected).await
    }

    async fn get(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        (**self).get(id).await
    }
}
