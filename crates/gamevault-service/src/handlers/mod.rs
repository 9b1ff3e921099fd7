//! API handlers.

use serde::Deserialize;

pub mod admin;
pub mod economy;
pub mod health;
pub mod inventory;
pub mod liveops;
pub mod progression;
pub mod status;
pub mod webhooks;
pub mod ws;

/// Largest page any list endpoint returns.
const MAX_PAGE_SIZE: usize = 100;

/// Pagination query parameters.
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    /// Maximum number of records to return (default: 50).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

impl PageQuery {
    /// Requested limit, capped.
    #[must_use]
    pub fn capped_limit(&self) -> usize {
        self.limit.clamp(1, MAX_PAGE_SIZE)
    }
}

fn default_limit() -> usize {
    50
}

/// Split one over-fetched page into the page and a `has_more` flag.
fn paginate<T>(mut records: Vec<T>, limit: usize) -> (Vec<T>, bool) {
    let has_more = records.len() > limit;
    records.truncate(limit);
    (records, has_more)
}
