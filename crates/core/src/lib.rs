//! `orderstream-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod error;
pub mod id;
pub mod order;

pub use aggregate::ExpectedVersion;
pub use error::{DomainError, DomainResult};
pub use id::{CustomerId, OrderId};
pub use order::{Order, OrderStatus};
