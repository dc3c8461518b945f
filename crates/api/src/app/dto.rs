use serde::Deserialize;

use orderstream_core::ExpectedVersion;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub customer_id: String,
    pub total: f64,
    /// Client-chosen id; generated when absent.
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderRequest {
    pub total: f64,
    pub expected_version: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeStatusRequest {
    pub status: String,
    pub expected_version: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// Comma-separated statuses, or `all`.
    pub status: Option<String>,
}

pub fn expected_version(raw: Option<u64>) -> ExpectedVersion {
    raw.map(ExpectedVersion::Exact).unwrap_or(ExpectedVersion::Any)
}
