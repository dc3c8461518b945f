//! Status filter attached to a streaming subscription.

use std::collections::BTreeSet;

use orderstream_core::{DomainError, OrderStatus};

use crate::envelope::OrderEvent;

/// Which envelopes a subscription wants, by effective status.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    All,
    Only(BTreeSet<OrderStatus>),
}

impl StatusFilter {
    pub fn all() -> Self {
        StatusFilter::All
    }

    /// Filter on a set of statuses. An empty set means "all".
    pub fn only(statuses: impl IntoIterator<Item = OrderStatus>) -> Self {
        let set: BTreeSet<OrderStatus> = statuses.into_iter().collect();
        if set.is_empty() {
            StatusFilter::All
        } else {
            StatusFilter::Only(set)
        }
    }

    /// Parse a comma-separated status list (e.g. `"shipped,delivered"`).
    ///
    /// Blank input and the token `all` select everything.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let mut statuses = BTreeSet::new();
        for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if token.eq_ignore_ascii_case("all") {
                return Ok(StatusFilter::All);
            }
            statuses.insert(token.parse::<OrderStatus>()?);
        }
        Ok(Self::only(statuses))
    }

    pub fn matches(&self, status: OrderStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Only(set) => set.contains(&status),
        }
    }

    /// Whether `event` should be delivered to a subscription with this filter.
    pub fn admits(&self, event: &OrderEvent) -> bool {
        self.matches(event.effective_status())
    }
}

impl core::fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            StatusFilter::All => f.write_str("all"),
            StatusFilter::Only(set) => {
                let parts: Vec<&str> = set.iter().map(|s| s.as_str()).collect();
                f.write_str(&parts.join(","))
            }
        }
    }
}
