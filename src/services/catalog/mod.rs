//! Read-only view of the blog service's published content
//!
//! The recommendation core never writes posts; it only lists candidates,
//! counts the catalog, and asks which users have engaged with content.

use crate::{
    error::AppResult,
    models::{CandidateFilter, CandidatePost},
};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryCatalog;
pub use postgres::PgContentCatalog;

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ContentCatalog: Send + Sync {
    /// Published posts admitted by `filter`
    ///
    /// Implementations may cap the result; callers re-apply the filter and
    /// must not rely on any particular order.
    async fn list_published_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> AppResult<Vec<CandidatePost>>;

    async fn total_published_count(&self) -> AppResult<u64>;

    /// Users who saved or rated at least one post
    async fn engaged_user_ids(&self) -> AppResult<Vec<String>>;
}
