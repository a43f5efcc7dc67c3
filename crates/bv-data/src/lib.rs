//! Data source engine for the bioview toolkit.
//!
//! Owns the fetch protocol that keeps output widgets synchronized with
//! their logical datasets: request deduplication, the per-mode paging
//! strategies, response distribution and the page registry tying
//! sources to widgets.

pub mod dedup;
pub mod distribute;
pub mod download;
pub mod fetch;
pub mod page;
pub mod paging;
pub mod source;

#[cfg(test)]
pub(crate) mod testutil;

use thiserror::Error;

// Re-exports
pub use dedup::{fingerprint, RequestDeduplicator};
pub use download::{run_download, DownloadError, DownloadOptions, DownloadSummary};
pub use fetch::{FetchError, HttpSearchClient, SearchClient};
pub use page::{PageContext, PageSettings, PageShared};
pub use paging::{
    count_pager_display, move_page, pager_display, rows_per_page_change, rows_per_page_options,
    CompositeInfo, PagerContext, PagerDisplay,
};
pub use source::{DataSource, SourceStatus};

/// Errors that can occur in engine operations.
#[derive(Error, Debug)]
pub enum DataError {
    #[error(transparent)]
    Config(#[from] bv_core::config::ConfigError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Download(#[from] DownloadError),
}
