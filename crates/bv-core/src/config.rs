//! Data source configuration.
//!
//! Each source mode gets its own config struct, validated once at
//! construction, instead of a settings bag mutated over the page
//! lifetime. The mode decides which pagination mechanism is active:
//! `from` offsets for document listing, an `after` cursor for composite
//! aggregations, nothing for plain term aggregations.

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::protocol::{BoolClause, BoolQuery, SortDirection};

/// Errors raised while constructing a data source configuration.
///
/// Fatal for the affected source only; sibling sources keep working.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("source '{0}': aggregation mode requires a unique field")]
    MissingUniqueField(String),

    #[error("source '{0}': mapping mode requires a linked map widget")]
    MissingLinkedMap(String),

    #[error("source '{0}': unknown widget '{1}' referenced")]
    UnknownWidget(String, String),

    #[error("source '{0}' is already registered")]
    DuplicateSource(String),
}

/// The request/paging strategy a data source runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceMode {
    Docs,
    TermAggregation,
    CompositeAggregation,
    MapGeoHash,
    MapGridSquare,
}

impl SourceMode {
    pub fn is_aggregation(&self) -> bool {
        !matches!(self, SourceMode::Docs)
    }

    pub fn is_map(&self) -> bool {
        matches!(self, SourceMode::MapGeoHash | SourceMode::MapGridSquare)
    }
}

/// Document-listing mode; pages with `from`/`size` offsets.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocsConfig {}

/// Term-aggregation mode: one bucket per unique field value, no paging.
#[derive(Debug, Clone, Deserialize)]
pub struct TermAggConfig {
    /// Field whose distinct values identify a result row.
    pub unique_field: String,
    /// Metric sub-aggregations requested in configuration, by name.
    #[serde(default)]
    pub aggregation: IndexMap<String, Value>,
    /// Cheaper stand-in aggregations used only for ordering, by the name
    /// of the aggregation they substitute for.
    #[serde(default)]
    pub sort_aggregation: IndexMap<String, Value>,
    /// Separate aggregation used to count rows for the pager.
    #[serde(default)]
    pub count_aggregation: Option<Value>,
}

/// Composite-aggregation mode: bucket pages fetched via `after` cursors.
#[derive(Debug, Clone, Deserialize)]
pub struct CompositeAggConfig {
    pub unique_field: String,
    /// Fields bucketed by the composite sources, in order.
    pub source_fields: Vec<String>,
    #[serde(default)]
    pub aggregation: IndexMap<String, Value>,
    #[serde(default)]
    pub count_aggregation: Option<Value>,
    /// Buckets per cursor page.
    #[serde(default = "default_composite_page_size")]
    pub page_size: u64,
}

fn default_composite_page_size() -> u64 {
    30
}

/// Geohash map mode: bucket precision follows the map zoom.
#[derive(Debug, Clone, Deserialize)]
pub struct GeoHashConfig {
    /// Aggregation template; its `precision` is rewritten per zoom.
    pub aggregation: Value,
}

/// Size of the grid squares used by [`SourceMode::MapGridSquare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GridSquareSize {
    /// Pick the square size from the current map zoom.
    Auto,
    /// Fixed square size in metres.
    Fixed(u64),
}

/// Grid-square map mode.
#[derive(Debug, Clone, Deserialize)]
pub struct GridSquareConfig {
    /// Aggregation template; `autoGridSquareField` markers are rewritten
    /// to the zoom-appropriate grid square field.
    pub aggregation: Value,
    #[serde(default = "default_grid_square_size")]
    pub grid_square_size: GridSquareSize,
    /// Zoom level at which squares are abandoned for raw documents.
    #[serde(default)]
    pub switch_to_geoms_at: Option<u8>,
}

fn default_grid_square_size() -> GridSquareSize {
    GridSquareSize::Auto
}

/// Mode-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum ModeConfig {
    Docs(DocsConfig),
    TermAggregation(TermAggConfig),
    CompositeAggregation(CompositeAggConfig),
    MapGeoHash(GeoHashConfig),
    MapGridSquare(GridSquareConfig),
}

impl ModeConfig {
    pub fn mode(&self) -> SourceMode {
        match self {
            ModeConfig::Docs(_) => SourceMode::Docs,
            ModeConfig::TermAggregation(_) => SourceMode::TermAggregation,
            ModeConfig::CompositeAggregation(_) => SourceMode::CompositeAggregation,
            ModeConfig::MapGeoHash(_) => SourceMode::MapGeoHash,
            ModeConfig::MapGridSquare(_) => SourceMode::MapGridSquare,
        }
    }

    /// The aggregation identity field, for modes that have one.
    pub fn unique_field(&self) -> Option<&str> {
        match self {
            ModeConfig::TermAggregation(cfg) => Some(&cfg.unique_field),
            ModeConfig::CompositeAggregation(cfg) => Some(&cfg.unique_field),
            _ => None,
        }
    }

    pub fn count_aggregation(&self) -> Option<&Value> {
        match self {
            ModeConfig::TermAggregation(cfg) => cfg.count_aggregation.as_ref(),
            ModeConfig::CompositeAggregation(cfg) => cfg.count_aggregation.as_ref(),
            _ => None,
        }
    }
}

/// Links a source's filter to the row currently selected in a grid:
/// when a row of `grid_id` is selected, the value of `source_field` in
/// its document becomes a term filter on `filter_field`.
#[derive(Debug, Clone, Deserialize)]
pub struct RowFilterBinding {
    pub grid_id: String,
    pub source_field: String,
    pub filter_field: String,
}

/// A statically configured boolean clause attached to a source.
#[derive(Debug, Clone, Deserialize)]
pub struct StaticClauseDef {
    #[serde(default)]
    pub query_type: Option<crate::protocol::QueryType>,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub nested: Option<String>,
}

impl StaticClauseDef {
    pub fn to_bool_query(&self, bool_clause: BoolClause) -> BoolQuery {
        BoolQuery {
            bool_clause,
            query_type: self.query_type,
            field: self.field.clone(),
            query: self.query.clone(),
            value: self.value.clone(),
            nested: self.nested.clone(),
        }
    }
}

/// Full configuration of one logical data source.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub id: String,
    pub mode: ModeConfig,
    /// Fields to retrieve for each document or bucket, in order.
    pub fields: Vec<String>,
    /// Sort fields in priority order. Only the first entry is honored
    /// outside document mode.
    pub sort: IndexMap<String, SortDirection>,
    pub size: Option<u64>,
    /// Statically configured boolean clauses, grouped by slot.
    pub filter_bool_clauses: IndexMap<BoolClause, Vec<StaticClauseDef>>,
    /// Row-selection filter bindings; when set and no row is selected,
    /// compilation is skipped entirely.
    pub row_filters: Vec<RowFilterBinding>,
    /// Map widget whose viewport bounds this source's results.
    pub filter_bounds_using_map: Option<String>,
    /// Pivot tables to build from the response: name -> (outer
    /// aggregation, comma-separated inner drill-down path).
    pub build_table_xy: IndexMap<String, (String, String)>,
    /// Response content filter passed through to the proxy.
    pub filter_path: Option<String>,
}

impl SourceConfig {
    pub fn new(id: impl Into<String>, mode: ModeConfig) -> Result<Self, ConfigError> {
        let id = id.into();
        if mode.mode().is_aggregation()
            && !mode.mode().is_map()
            && mode.unique_field().is_none_or(str::is_empty)
        {
            return Err(ConfigError::MissingUniqueField(id));
        }
        Ok(SourceConfig {
            id,
            mode,
            fields: Vec::new(),
            sort: IndexMap::new(),
            size: None,
            filter_bool_clauses: IndexMap::new(),
            row_filters: Vec::new(),
            filter_bounds_using_map: None,
            build_table_xy: IndexMap::new(),
            filter_path: None,
        })
    }

    pub fn with_fields(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sort(mut self, field: impl Into<String>, dir: SortDirection) -> Self {
        self.sort.insert(field.into(), dir);
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_row_filter(mut self, binding: RowFilterBinding) -> Self {
        self.row_filters.push(binding);
        self
    }

    pub fn with_static_clause(mut self, bool_clause: BoolClause, def: StaticClauseDef) -> Self {
        self.filter_bool_clauses.entry(bool_clause).or_default().push(def);
        self
    }

    pub fn with_table_xy(
        mut self,
        name: impl Into<String>,
        outer_agg: impl Into<String>,
        inner_path: impl Into<String>,
    ) -> Self {
        self.build_table_xy
            .insert(name.into(), (outer_agg.into(), inner_path.into()));
        self
    }

    pub fn mode(&self) -> SourceMode {
        self.mode.mode()
    }
}

/// The slice of a source's settings that consumers see when populated.
#[derive(Debug, Clone)]
pub struct SourceSnapshot {
    pub id: String,
    pub mode: SourceMode,
    pub size: Option<u64>,
    /// Bucket cap in aggregation modes.
    pub aggregation_size: Option<u64>,
    pub from: u64,
    /// Grid-square sources zoomed past their geom switch deliver raw
    /// documents instead of squares.
    pub geoms_too_close: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_term_mode_requires_unique_field() {
        let term = |unique_field: &str| {
            ModeConfig::TermAggregation(TermAggConfig {
                unique_field: unique_field.into(),
                aggregation: IndexMap::new(),
                sort_aggregation: IndexMap::new(),
                count_aggregation: None,
            })
        };
        assert!(SourceConfig::new("occ", term("taxon.accepted_name")).is_ok());
        assert!(matches!(
            SourceConfig::new("occ", term("")),
            Err(ConfigError::MissingUniqueField(_))
        ));
    }

    #[test]
    fn test_docs_mode_needs_no_unique_field() {
        assert!(SourceConfig::new("docs", ModeConfig::Docs(DocsConfig::default())).is_ok());
    }

    #[test]
    fn test_mode_flags() {
        assert!(SourceMode::MapGeoHash.is_map());
        assert!(SourceMode::MapGeoHash.is_aggregation());
        assert!(!SourceMode::Docs.is_aggregation());
        assert!(!SourceMode::CompositeAggregation.is_map());
    }
}
