use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use orderstream_core::{DomainError, ExpectedVersion, Order, OrderId, OrderStatus};

use super::r#trait::{NewOrder, OrderStore, OrderUpdate, StatusChange, StoreError};

/// In-memory order store.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<OrderId, Order>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.orders.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write<T>(
        &self,
        id: &OrderId,
        expected: ExpectedVersion,
        f: impl FnOnce(&Order) -> Result<(Order, T), StoreError>,
    ) -> Result<T, StoreError> {
        let mut orders = self
            .orders
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;
        let current = orders.get(id).ok_or(DomainError::NotFound)?;
        expected.check(current.version())?;

        let (next, out) = f(current)?;
        orders.insert(id.clone(), next);
        Ok(out)
    }
}

fn check_total(total: f64) -> Result<(), StoreError> {
    if !total.is_finite() || total < 0.0 {
        return Err(DomainError::validation(format!("total must be a non-negative number, got {total}")).into());
    }
    Ok(())
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: NewOrder) -> Result<Order, StoreError> {
        check_total(order.total)?;

        let mut orders = self
            .orders
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;
        if orders.contains_key(&order.id) {
            return Err(DomainError::conflict(format!("order {} already exists", order.id)).into());
        }

        let created = Order::new(order.id, order.customer_id, OrderStatus::Pending, order.total, 1);
        orders.insert(created.id().clone(), created.clone());
        Ok(created)
    }

    async fn update(
        &self,
        id: &OrderId,
        update: OrderUpdate,
        expected: ExpectedVersion,
    ) -> Result<Order, StoreError> {
        check_total(update.total)?;
        self.write(id, expected, |current| {
            let next = current.next_revision(current.status(), update.total);
            Ok((next.clone(), next))
        })
    }

    async fn set_status(
        &self,
        id: &OrderId,
        status: OrderStatus,
        expected: ExpectedVersion,
    ) -> Result<StatusChange, StoreError> {
        self.write(id, expected, |current| {
            let old_status = current.status();
            if !old_status.can_transition_to(status) {
                return Err(DomainError::invariant(format!(
                    "cannot move order from {old_status} to {status}"
                ))
                .into());
            }
            let next = current.next_revision(status, current.total());
            Ok((
                next.clone(),
                StatusChange {
                    old_status,
                    order: next,
                },
            ))
        })
    }

    async fn get(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        let orders = self
            .orders
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;
        Ok(orders.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderstream_core::CustomerId;

    fn customer() -> CustomerId {
        CustomerId::parse("customer-1").unwrap()
    }

    #[tokio::test]
    async fn versions_start_at_one_and_increase() {
        let store = InMemoryOrderStore::new();
        let created = store.insert(NewOrder::new(customer(), 10.0)).await.unwrap();
        assert_eq!(created.version(), 1);
        assert_eq!(created.status(), OrderStatus::Pending);

        let updated = store
            .update(created.id(), OrderUpdate { total: 12.5 }, ExpectedVersion::Exact(1))
            .await
            .unwrap();
        assert_eq!(updated.version(), 2);

        let change = store
            .set_status(created.id(), OrderStatus::Confirmed, ExpectedVersion::Any)
            .await
            .unwrap();
        assert_eq!(change.old_status, OrderStatus::Pending);
        assert_eq!(change.order.version(), 3);
        assert_eq!(change.order.total(), 12.5);

        let stored = store.get(created.id()).await.unwrap().unwrap();
        assert_eq!(stored, change.order);
    }

    #[tokio::test]
    async fn stale_version_conflicts() {
        let store = InMemoryOrderStore::new();
        let created = store.insert(NewOrder::new(customer(), 10.0)).await.unwrap();
        store
            .update(created.id(), OrderUpdate { total: 11.0 }, ExpectedVersion::Any)
            .await
            .unwrap();

        let err = store
            .update(created.id(), OrderUpdate { total: 12.0 }, ExpectedVersion::Exact(1))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected() {
        let store = InMemoryOrderStore::new();
        let created = store.insert(NewOrder::new(customer(), 10.0)).await.unwrap();

        let err = store
            .set_status(created.id(), OrderStatus::Delivered, ExpectedVersion::Any)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::InvariantViolation(_))));
        assert_eq!(store.get(created.id()).await.unwrap().unwrap().version(), 1);
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let store = InMemoryOrderStore::new();
        let err = store
            .update(&OrderId::generate(), OrderUpdate { total: 1.0 }, ExpectedVersion::Any)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn negative_total_is_invalid() {
        let store = InMemoryOrderStore::new();
        let err = store.insert(NewOrder::new(customer(), -1.0)).await.unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::Validation(_))));
        assert!(store.is_empty());
    }
}
