//! Core functionality for the bioview record-dataset toolkit
//!
//! This crate provides the shared currency the other crates exchange:
//! the wire protocol types for the search backend, the per-mode data
//! source configuration, the output-widget contract and the page event
//! bus.

pub mod config;
pub mod events;
pub mod protocol;
pub mod widget;

// Re-export commonly used types
pub use config::{
    CompositeAggConfig, ConfigError, DocsConfig, GeoHashConfig, GridSquareConfig, GridSquareSize,
    ModeConfig, RowFilterBinding, SourceConfig, SourceMode, SourceSnapshot, StaticClauseDef,
    TermAggConfig,
};
pub use events::{EventBus, EventKind, PageEvent, SubscriptionId};
pub use protocol::{
    find_and_set_value, find_value, find_value_mut, BoolClause, BoolQuery, Hit, Hits, PivotTable,
    QueryType, SearchRequest, SearchResponse, SortDirection, SortSpec, TotalHits, TotalRelation,
};
pub use widget::{
    FilterRowInput, MapViewport, OutputWidget, PopulateNeed, RowFilterValue, WidgetClass,
};
