//! Order store boundary.
//!
//! The transactional store is a collaborator of the messaging core, not part
//! of it: the order service commits through this interface and only then
//! publishes.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryOrderStore;
pub use r#trait::{NewOrder, OrderStore, OrderUpdate, StatusChange, StoreError};
