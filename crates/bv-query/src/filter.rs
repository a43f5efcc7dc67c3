//! Request compilation.
//!
//! Gathers the scattered filter state a page holds — filter-row inputs,
//! URL parameters, the saved page filter, parameter controls, user and
//! permission filters, map viewport bounds, row-selection filters — and
//! compiles it into one well-formed backend request. Compilation never
//! aborts on bad input: unparseable filter text is reported back for
//! inline flagging and the clause is simply left out.

use ahash::AHashMap;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde_json::{json, Map, Value};

use bv_core::config::{ModeConfig, SourceConfig, SourceMode};
use bv_core::protocol::{BoolClause, BoolQuery, QueryType, SearchRequest};
use bv_core::widget::{FilterRowInput, MapViewport, RowFilterValue};

use crate::aggregation::{
    apply_geohash_zoom, apply_grid_square_zoom, grid_square_size_m, strip_term_order,
};
use crate::dates::date_filter;
use crate::fields::{parse_field, ParsedField};
use crate::fragments::{build_query_fragment, expand_sort, QueryFragment};

/// Token in parameter-control values replaced by the current user id.
pub const USER_ID_TOKEN: &str = "{{ user_id }}";

/// URL query parameters with this prefix feed the saved filter.
pub const URL_FILTER_PREFIX: &str = "filter-";

/// Document `size` requested when a grid-square source falls back to
/// raw geometries; the backend's hit cap.
const GEOMS_DOC_LIMIT: u64 = 10_000;

/// Backend mapping type for a plain field, deciding how filter-row
/// input routes into the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMappingType {
    Text,
    Keyword,
    Date,
    Numeric,
}

/// A user filter selected on the page. `needs_refresh` is set the
/// first time a filter is used in a session so the backend reloads its
/// cached definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserFilterSelection {
    pub id: String,
    pub needs_refresh: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupScope {
    My,
    All,
}

/// Parsed value of the permissions-scope selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionsSelection {
    /// `p-` prefix: a permission scope flag (own/all data).
    Scope(String),
    /// `f-` prefix: a saved user filter.
    Filter(UserFilterSelection),
    /// `g-my-`/`g-all-` prefix: group records, mine or everyone's.
    Group { scope: GroupScope, group_id: String },
}

impl PermissionsSelection {
    pub fn parse(value: &str) -> Option<Self> {
        if let Some(scope) = value.strip_prefix("p-") {
            return Some(PermissionsSelection::Scope(scope.to_string()));
        }
        if let Some(id) = value.strip_prefix("f-") {
            return Some(PermissionsSelection::Filter(UserFilterSelection {
                id: id.to_string(),
                needs_refresh: false,
            }));
        }
        if let Some(id) = value.strip_prefix("g-my-") {
            return Some(PermissionsSelection::Group {
                scope: GroupScope::My,
                group_id: id.to_string(),
            });
        }
        if let Some(id) = value.strip_prefix("g-all-") {
            return Some(PermissionsSelection::Group {
                scope: GroupScope::All,
                group_id: id.to_string(),
            });
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Input,
    Checkbox { checked: bool },
}

/// A free-form filter input tagged with backend clause metadata.
#[derive(Debug, Clone)]
pub struct ParameterControl {
    pub bool_clause: BoolClause,
    pub query_type: Option<QueryType>,
    pub field: Option<String>,
    pub query: Option<String>,
    pub nested: Option<String>,
    pub value: String,
    pub kind: ControlKind,
}

static EMPTY_FIELD_TYPES: Lazy<AHashMap<String, FieldMappingType>> = Lazy::new(AHashMap::new);

/// Page-level filter state gathered for one compile.
#[derive(Clone)]
pub struct QueryContext<'a> {
    pub filter_rows: Vec<FilterRowInput>,
    pub url_params: &'a [(String, String)],
    pub saved_filter: Option<&'a Map<String, Value>>,
    pub parameter_controls: &'a [ParameterControl],
    pub user_filters: &'a [UserFilterSelection],
    pub permissions: Option<&'a PermissionsSelection>,
    pub group_id: Option<&'a str>,
    pub user_id: Option<&'a str>,
    pub viewport: Option<MapViewport>,
    pub field_types: &'a AHashMap<String, FieldMappingType>,
}

impl QueryContext<'static> {
    pub fn empty() -> Self {
        QueryContext {
            filter_rows: Vec::new(),
            url_params: &[],
            saved_filter: None,
            parameter_controls: &[],
            user_filters: &[],
            permissions: None,
            group_id: None,
            user_id: None,
            viewport: None,
            field_types: &EMPTY_FIELD_TYPES,
        }
    }
}

/// The mutable slice of a source's state a compile reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceRuntime<'a> {
    pub from: u64,
    /// Document size override (rows-per-page changes).
    pub size: Option<u64>,
    /// Planned aggregation tree, for aggregating modes.
    pub aggregation: Option<&'a Value>,
    /// Active row-selection filter.
    pub row_filter: Option<&'a RowFilterValue>,
}

/// A filter input whose text could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidInput {
    pub widget_id: String,
    pub field: String,
    pub reason: String,
}

/// Result of compiling a source's state into a request.
///
/// `request` is `None` when no fetch should occur at all — a source
/// filtered by a grid selection with no row selected.
#[derive(Debug, Default)]
pub struct CompileOutcome {
    pub request: Option<SearchRequest>,
    pub invalid_inputs: Vec<InvalidInput>,
    /// Grid-square source zoomed past its geom switch; raw documents
    /// were requested instead of square buckets.
    pub geoms_too_close: bool,
}

/// Compiles the current filter/sort/paging state into a request body.
///
/// `for_count` builds a count-only variant: offsets, sorting and the
/// viewport clause are suppressed so an unchanged filter state always
/// produces an identical (deduplicatable) count request.
pub fn compile(
    cfg: &SourceConfig,
    rt: &SourceRuntime,
    ctx: &QueryContext,
    for_count: bool,
) -> CompileOutcome {
    let mut outcome = CompileOutcome::default();
    let mut request = SearchRequest::default();
    let mode = cfg.mode();

    let geoms_too_close = geom_switch_active(cfg, ctx);

    // Aggregating sources cap buckets, not documents.
    request.size = if rt.aggregation.is_some() && !geoms_too_close {
        Some(0)
    } else {
        rt.size.or(cfg.size)
    };
    if !for_count {
        if mode == SourceMode::Docs && rt.from > 0 {
            request.from = Some(rt.from);
        }
        // Aggregated results carry their ordering inside the
        // aggregation itself.
        if !cfg.sort.is_empty() && rt.aggregation.is_none() {
            request.sort = Some(expand_sort(&cfg.sort, true));
        }
    }

    for (bool_clause, defs) in &cfg.filter_bool_clauses {
        for def in defs {
            request.bool_queries.push(def.to_bool_query(*bool_clause));
        }
    }

    if let Some(row_filter) = rt.row_filter {
        // A selected row elsewhere on the page is the sole filter.
        request.bool_queries.push(BoolQuery::term(
            BoolClause::Must,
            row_filter.field.clone(),
            row_filter.value.clone(),
        ));
    } else if !cfg.row_filters.is_empty() {
        // Filtered from a grid selection but nothing is selected yet:
        // skip fetching entirely.
        tracing::debug!(source = %cfg.id, "row filter pending, compile skipped");
        return outcome;
    } else {
        apply_parameter_controls(&mut request, ctx);
        apply_filter_rows(&mut request, ctx, &mut outcome.invalid_inputs);
        apply_url_params(&mut request, ctx);
        apply_saved_filter(&mut request, ctx);
        if let Some(filter_def) = request.filter_def.as_mut() {
            reproject_search_area(filter_def);
        }
        for selection in ctx.user_filters {
            request.user_filters.push(selection.id.clone());
            request.refresh_user_filters |= selection.needs_refresh;
        }
        apply_permissions(&mut request, ctx);
        if let Some(group_id) = ctx.group_id {
            request.bool_queries.push(BoolQuery::query_string(
                BoolClause::Must,
                format!("metadata.group.id:{group_id}"),
            ));
        }
    }

    if !for_count && cfg.filter_bounds_using_map.is_some() {
        if let Some(viewport) = &ctx.viewport {
            request.bool_queries.push(bounding_box_clause(viewport));
        }
    }

    if geoms_too_close {
        // Too zoomed-in for squares: deliver raw documents instead,
        // bounded by the backend's hit cap, and keep imprecise records
        // out of the picture.
        request.size = Some(GEOMS_DOC_LIMIT);
        if let ModeConfig::MapGridSquare(grid_cfg) = &cfg.mode {
            if let Some(viewport) = &ctx.viewport {
                request.numeric_filters.insert(
                    "location.coordinate_uncertainty_in_meters".into(),
                    format!(
                        "0-{}",
                        grid_square_size_m(grid_cfg.grid_square_size, viewport.zoom)
                    ),
                );
            }
        }
        outcome.geoms_too_close = true;
    } else if for_count && cfg.mode.count_aggregation().is_some() {
        // A dedicated counting aggregation replaces the full plan.
        request.aggs = cfg.mode.count_aggregation().cloned();
    } else if let Some(aggs) = rt.aggregation {
        let mut aggs = aggs.clone();
        if for_count && mode == SourceMode::TermAggregation {
            strip_term_order(&mut aggs);
        }
        match &cfg.mode {
            ModeConfig::MapGridSquare(grid_cfg) => {
                if let Some(viewport) = &ctx.viewport {
                    apply_grid_square_zoom(&mut aggs, viewport.zoom);
                    request.numeric_filters.insert(
                        "location.coordinate_uncertainty_in_meters".into(),
                        format!(
                            "0-{}",
                            grid_square_size_m(grid_cfg.grid_square_size, viewport.zoom)
                        ),
                    );
                }
            }
            ModeConfig::MapGeoHash(_) => {
                if let Some(viewport) = &ctx.viewport {
                    apply_geohash_zoom(&mut aggs, viewport.zoom);
                }
            }
            _ => {}
        }
        request.aggs = Some(aggs);
    }

    outcome.request = Some(request);
    outcome
}

fn geom_switch_active(cfg: &SourceConfig, ctx: &QueryContext) -> bool {
    match (&cfg.mode, &ctx.viewport) {
        (ModeConfig::MapGridSquare(grid_cfg), Some(viewport)) => grid_cfg
            .switch_to_geoms_at
            .is_some_and(|threshold| viewport.zoom >= threshold),
        _ => false,
    }
}

/// Free-form inputs tagged with backend clause metadata each become
/// one boolean clause. Unchecked checkboxes contribute nothing.
fn apply_parameter_controls(request: &mut SearchRequest, ctx: &QueryContext) {
    for control in ctx.parameter_controls {
        if control.value.trim().is_empty() {
            continue;
        }
        if matches!(control.kind, ControlKind::Checkbox { checked: false }) {
            continue;
        }
        let value = control
            .value
            .trim()
            .replace(USER_ID_TOKEN, ctx.user_id.unwrap_or_default());
        request.bool_queries.push(BoolQuery {
            bool_clause: control.bool_clause,
            query_type: control.query_type,
            field: control.field.clone(),
            query: control.query.clone(),
            value: Some(Value::String(value)),
            nested: control.nested.clone(),
        });
    }
}

/// Routes filter-row inputs into the request by field type: special
/// fields through their fragment builders, plain text/keyword fields
/// into the text filter map, dates through the pattern table, anything
/// else into the numeric filter map.
fn apply_filter_rows(
    request: &mut SearchRequest,
    ctx: &QueryContext,
    invalid: &mut Vec<InvalidInput>,
) {
    for input in &ctx.filter_rows {
        let text = input.value.trim();
        if text.is_empty() {
            continue;
        }
        match parse_field(&input.field) {
            ParsedField::Special { field, params } => {
                match build_query_fragment(field, text, &params) {
                    Some(QueryFragment::QueryString(query)) => request
                        .bool_queries
                        .push(BoolQuery::query_string(BoolClause::Must, query)),
                    Some(QueryFragment::Clause(clause)) => request.bool_queries.push(clause),
                    None => invalid.push(InvalidInput {
                        widget_id: input.widget_id.clone(),
                        field: input.field.clone(),
                        reason: "Invalid search text".into(),
                    }),
                }
            }
            ParsedField::UnknownSpecial(name) => invalid.push(InvalidInput {
                widget_id: input.widget_id.clone(),
                field: input.field.clone(),
                reason: format!("Unknown special field '{name}'"),
            }),
            ParsedField::Path(field) => {
                match ctx.field_types.get(&field).copied().unwrap_or(FieldMappingType::Numeric) {
                    FieldMappingType::Text | FieldMappingType::Keyword => {
                        request.text_filters.insert(field, text.to_string());
                    }
                    FieldMappingType::Date => match date_filter(text, &field) {
                        Some(query) => request
                            .bool_queries
                            .push(BoolQuery::query_string(BoolClause::Must, query)),
                        None => invalid.push(InvalidInput {
                            widget_id: input.widget_id.clone(),
                            field: input.field.clone(),
                            reason: "Invalid search text".into(),
                        }),
                    },
                    FieldMappingType::Numeric => {
                        request.numeric_filters.insert(field, text.to_string());
                    }
                }
            }
        }
    }
}

/// `filter-*` URL parameters copy into the saved filter definition.
fn apply_url_params(request: &mut SearchRequest, ctx: &QueryContext) {
    for (key, value) in ctx.url_params {
        if let Some(name) = key.strip_prefix(URL_FILTER_PREFIX) {
            request
                .filter_def
                .get_or_insert_with(Map::new)
                .insert(name.to_string(), Value::String(value.clone()));
        }
    }
}

/// The page-level saved filter merges over anything the URL supplied.
fn apply_saved_filter(request: &mut SearchRequest, ctx: &QueryContext) {
    if let Some(saved) = ctx.saved_filter {
        let filter_def = request.filter_def.get_or_insert_with(Map::new);
        for (key, value) in saved {
            filter_def.insert(key.clone(), value.clone());
        }
    }
}

fn apply_permissions(request: &mut SearchRequest, ctx: &QueryContext) {
    match ctx.permissions {
        Some(PermissionsSelection::Scope(scope)) => {
            request.permissions_filter = Some(scope.clone());
        }
        Some(PermissionsSelection::Filter(selection)) => {
            request.user_filters.push(selection.id.clone());
            request.refresh_user_filters |= selection.needs_refresh;
        }
        Some(PermissionsSelection::Group { scope, group_id }) => {
            request.permissions_filter = Some(
                match scope {
                    GroupScope::My => "my",
                    GroupScope::All => "all",
                }
                .to_string(),
            );
            request.bool_queries.push(BoolQuery::query_string(
                BoolClause::Must,
                format!("metadata.group.id:{group_id}"),
            ));
        }
        None => {}
    }
}

/// Bounding-box clause for the current map viewport, clamped to valid
/// geographic ranges.
fn bounding_box_clause(viewport: &MapViewport) -> BoolQuery {
    let lat = |v: f64| v.clamp(-90.0, 90.0);
    let lon = |v: f64| v.clamp(-180.0, 180.0);
    BoolQuery {
        bool_clause: BoolClause::Must,
        query_type: Some(QueryType::GeoBoundingBox),
        field: None,
        query: None,
        value: Some(json!({
            "ignore_unmapped": true,
            "location.point": {
                "top_left": {"lat": lat(viewport.north), "lon": lon(viewport.west)},
                "bottom_right": {"lat": lat(viewport.south), "lon": lon(viewport.east)}
            }
        })),
        nested: None,
    }
}

/// The saved filter's search area arrives in the map projection; the
/// backend wants geographic coordinates.
fn reproject_search_area(filter_def: &mut Map<String, Value>) {
    let Some(Value::String(wkt)) = filter_def.get("searchArea") else {
        return;
    };
    let transformed = reproject_wkt(wkt);
    filter_def.insert("searchArea".into(), Value::String(transformed));
}

/// Rewrites every coordinate pair in a WKT string from Web Mercator
/// (EPSG:3857) to WGS84 longitude/latitude.
fn reproject_wkt(wkt: &str) -> String {
    static COORD_PAIR: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(-?\d+(?:\.\d+)?) (-?\d+(?:\.\d+)?)").unwrap());
    let mut output = String::with_capacity(wkt.len());
    let mut last_end = 0;
    for caps in COORD_PAIR.captures_iter(wkt) {
        let whole = caps.get(0).unwrap();
        let x: f64 = caps[1].parse().unwrap_or(0.0);
        let y: f64 = caps[2].parse().unwrap_or(0.0);
        let (lon, lat) = web_mercator_to_wgs84(x, y);
        output.push_str(&wkt[last_end..whole.start()]);
        output.push_str(&format!("{} {}", format_coord(lon), format_coord(lat)));
        last_end = whole.end();
    }
    output.push_str(&wkt[last_end..]);
    output
}

fn web_mercator_to_wgs84(x: f64, y: f64) -> (f64, f64) {
    const EARTH_RADIUS: f64 = 6_378_137.0;
    let lon = (x / EARTH_RADIUS).to_degrees();
    let lat = ((y / EARTH_RADIUS).exp().atan() * 2.0 - std::f64::consts::FRAC_PI_2).to_degrees();
    (lon, lat)
}

fn format_coord(value: f64) -> String {
    let text = format!("{value:.7}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bv_core::config::{DocsConfig, GridSquareConfig, RowFilterBinding};
    use bv_core::protocol::SortSpec;

    fn docs_cfg() -> SourceConfig {
        SourceConfig::new("records", ModeConfig::Docs(DocsConfig::default()))
            .unwrap()
            .with_fields(["id", "taxon.accepted_name"])
            .with_size(30)
    }

    fn input(field: &str, value: &str) -> FilterRowInput {
        FilterRowInput {
            widget_id: "grid-1".into(),
            field: field.into(),
            value: value.into(),
        }
    }

    #[test]
    fn test_row_filter_pending_short_circuits() {
        let cfg = docs_cfg().with_row_filter(RowFilterBinding {
            grid_id: "grid-1".into(),
            source_field: "taxon.accepted_name".into(),
            filter_field: "taxon.accepted_name".into(),
        });
        let outcome = compile(&cfg, &SourceRuntime::default(), &QueryContext::empty(), false);
        assert!(outcome.request.is_none());
    }

    #[test]
    fn test_row_filter_is_sole_filter() {
        let cfg = docs_cfg().with_row_filter(RowFilterBinding {
            grid_id: "grid-1".into(),
            source_field: "taxon.accepted_name".into(),
            filter_field: "taxon.accepted_name".into(),
        });
        let row_filter = RowFilterValue {
            field: "taxon.accepted_name".into(),
            value: "Apis mellifera".into(),
        };
        let rt = SourceRuntime {
            row_filter: Some(&row_filter),
            ..Default::default()
        };
        let mut ctx = QueryContext::empty();
        // Page-level inputs must be ignored while a row filter applies.
        ctx.filter_rows = vec![input("taxon.genus", "Apis")];
        let request = compile(&cfg, &rt, &ctx, false).request.unwrap();
        assert_eq!(request.bool_queries.len(), 1);
        assert_eq!(request.bool_queries[0].query_type, Some(QueryType::Term));
        assert!(request.text_filters.is_empty());
    }

    #[test]
    fn test_filter_row_routing_by_field_type() {
        let mut field_types = AHashMap::new();
        field_types.insert("taxon.genus".to_string(), FieldMappingType::Text);
        field_types.insert("event.date_start".to_string(), FieldMappingType::Date);
        field_types.insert("id".to_string(), FieldMappingType::Numeric);
        let mut ctx = QueryContext::empty();
        ctx.field_types = &field_types;
        ctx.filter_rows = vec![
            input("taxon.genus", "Apis"),
            input("event.date_start", "2020"),
            input("id", "100-200"),
        ];
        let outcome = compile(&docs_cfg(), &SourceRuntime::default(), &ctx, false);
        let request = outcome.request.unwrap();
        assert_eq!(request.text_filters.get("taxon.genus"), Some(&"Apis".to_string()));
        assert_eq!(request.numeric_filters.get("id"), Some(&"100-200".to_string()));
        assert_eq!(
            request.bool_queries[0].value,
            Some(Value::String(
                "event.date_start:[2020-01-01 TO 2020-12-31]".into()
            ))
        );
        assert!(outcome.invalid_inputs.is_empty());
    }

    #[test]
    fn test_invalid_date_reported_not_fatal() {
        let mut field_types = AHashMap::new();
        field_types.insert("event.date_start".to_string(), FieldMappingType::Date);
        let mut ctx = QueryContext::empty();
        ctx.field_types = &field_types;
        ctx.filter_rows = vec![input("event.date_start", "whenever")];
        let outcome = compile(&docs_cfg(), &SourceRuntime::default(), &ctx, false);
        assert!(outcome.request.is_some());
        assert_eq!(outcome.invalid_inputs.len(), 1);
        assert_eq!(outcome.invalid_inputs[0].field, "event.date_start");
    }

    #[test]
    fn test_parameter_controls_checkbox_and_token() {
        let controls = vec![
            ParameterControl {
                bool_clause: BoolClause::Must,
                query_type: Some(QueryType::QueryString),
                field: None,
                query: None,
                nested: None,
                value: "metadata.created_by_id:{{ user_id }}".into(),
                kind: ControlKind::Input,
            },
            ParameterControl {
                bool_clause: BoolClause::MustNot,
                query_type: Some(QueryType::QueryString),
                field: None,
                query: None,
                nested: None,
                value: "metadata.confidential:true".into(),
                kind: ControlKind::Checkbox { checked: false },
            },
        ];
        let mut ctx = QueryContext::empty();
        ctx.parameter_controls = &controls;
        ctx.user_id = Some("27");
        let request = compile(&docs_cfg(), &SourceRuntime::default(), &ctx, false)
            .request
            .unwrap();
        assert_eq!(request.bool_queries.len(), 1);
        assert_eq!(
            request.bool_queries[0].value,
            Some(Value::String("metadata.created_by_id:27".into()))
        );
    }

    #[test]
    fn test_url_params_then_saved_filter_merge() {
        let url_params = vec![
            ("filter-taxon_group_list".to_string(), "12".to_string()),
            ("page".to_string(), "2".to_string()),
        ];
        let mut saved = Map::new();
        saved.insert("quality".into(), Value::String("V".into()));
        saved.insert("taxon_group_list".into(), Value::String("9".into()));
        let mut ctx = QueryContext::empty();
        ctx.url_params = &url_params;
        ctx.saved_filter = Some(&saved);
        let request = compile(&docs_cfg(), &SourceRuntime::default(), &ctx, false)
            .request
            .unwrap();
        let filter_def = request.filter_def.unwrap();
        // Saved filter wins over the URL value for the same key.
        assert_eq!(filter_def.get("taxon_group_list"), Some(&Value::String("9".into())));
        assert_eq!(filter_def.get("quality"), Some(&Value::String("V".into())));
        assert!(filter_def.get("page").is_none());
    }

    #[test]
    fn test_search_area_reprojected() {
        let mut saved = Map::new();
        saved.insert(
            "searchArea".into(),
            Value::String("POLYGON((0 0,111319.49079327357 0))".into()),
        );
        let mut ctx = QueryContext::empty();
        ctx.saved_filter = Some(&saved);
        let request = compile(&docs_cfg(), &SourceRuntime::default(), &ctx, false)
            .request
            .unwrap();
        let area = request.filter_def.unwrap()["searchArea"]
            .as_str()
            .unwrap()
            .to_string();
        assert_eq!(area, "POLYGON((0 0,1 0))");
    }

    #[test]
    fn test_permissions_group_selection() {
        let permissions = PermissionsSelection::parse("g-my-42").unwrap();
        let mut ctx = QueryContext::empty();
        ctx.permissions = Some(&permissions);
        let request = compile(&docs_cfg(), &SourceRuntime::default(), &ctx, false)
            .request
            .unwrap();
        assert_eq!(request.permissions_filter.as_deref(), Some("my"));
        assert_eq!(
            request.bool_queries[0].value,
            Some(Value::String("metadata.group.id:42".into()))
        );
    }

    #[test]
    fn test_permissions_parse_variants() {
        assert_eq!(
            PermissionsSelection::parse("p-all"),
            Some(PermissionsSelection::Scope("all".into()))
        );
        assert!(matches!(
            PermissionsSelection::parse("f-17"),
            Some(PermissionsSelection::Filter(_))
        ));
        assert_eq!(
            PermissionsSelection::parse("g-all-8"),
            Some(PermissionsSelection::Group {
                scope: GroupScope::All,
                group_id: "8".into()
            })
        );
        assert_eq!(PermissionsSelection::parse("everything"), None);
    }

    #[test]
    fn test_viewport_clause_clamped_and_suppressed_for_count() {
        let mut cfg = docs_cfg();
        cfg.filter_bounds_using_map = Some("map-1".into());
        let mut ctx = QueryContext::empty();
        ctx.viewport = Some(MapViewport {
            north: 95.0,
            south: 50.0,
            east: 181.0,
            west: -1.0,
            zoom: 6,
        });
        let request = compile(&cfg, &SourceRuntime::default(), &ctx, false)
            .request
            .unwrap();
        let bounds = request.bool_queries[0].value.as_ref().unwrap();
        assert_eq!(bounds["location.point"]["top_left"]["lat"], json!(90.0));
        assert_eq!(bounds["location.point"]["bottom_right"]["lon"], json!(180.0));

        let count_request = compile(&cfg, &SourceRuntime::default(), &ctx, true)
            .request
            .unwrap();
        assert!(count_request.bool_queries.is_empty());
    }

    #[test]
    fn test_count_compile_suppresses_paging_and_sort() {
        let cfg = docs_cfg().with_sort("event.date_start", bv_core::protocol::SortDirection::Desc);
        let rt = SourceRuntime {
            from: 60,
            ..Default::default()
        };
        let full = compile(&cfg, &rt, &QueryContext::empty(), false).request.unwrap();
        assert_eq!(full.from, Some(60));
        assert!(matches!(full.sort, Some(SortSpec::Fields(_))));
        let count = compile(&cfg, &rt, &QueryContext::empty(), true).request.unwrap();
        assert!(count.from.is_none());
        assert!(count.sort.is_none());
    }

    #[test]
    fn test_geom_switch_requests_raw_documents() {
        let mut cfg = SourceConfig::new(
            "squares",
            ModeConfig::MapGridSquare(GridSquareConfig {
                aggregation: json!({"by_square": {"terms": {"field": "autoGridSquareField"}}}),
                grid_square_size: bv_core::config::GridSquareSize::Auto,
                switch_to_geoms_at: Some(14),
            }),
        )
        .unwrap();
        cfg.filter_bounds_using_map = Some("map-1".into());
        let aggs = json!({"by_square": {"terms": {"field": "autoGridSquareField"}}});
        let rt = SourceRuntime {
            aggregation: Some(&aggs),
            ..Default::default()
        };
        let mut ctx = QueryContext::empty();
        ctx.viewport = Some(MapViewport {
            north: 52.0,
            south: 51.0,
            east: 1.0,
            west: 0.0,
            zoom: 15,
        });
        let outcome = compile(&cfg, &rt, &ctx, false);
        assert!(outcome.geoms_too_close);
        let request = outcome.request.unwrap();
        assert_eq!(request.size, Some(10_000));
        assert!(request.aggs.is_none());
        assert_eq!(
            request.numeric_filters.get("location.coordinate_uncertainty_in_meters"),
            Some(&"0-1000".to_string())
        );
    }

    #[test]
    fn test_grid_square_zoom_rewrites_aggregation() {
        let mut cfg = SourceConfig::new(
            "squares",
            ModeConfig::MapGridSquare(GridSquareConfig {
                aggregation: json!({"by_square": {"terms": {"field": "autoGridSquareField"}}}),
                grid_square_size: bv_core::config::GridSquareSize::Auto,
                switch_to_geoms_at: None,
            }),
        )
        .unwrap();
        cfg.filter_bounds_using_map = Some("map-1".into());
        let aggs = json!({"by_square": {"terms": {"field": "autoGridSquareField"}}});
        let rt = SourceRuntime {
            aggregation: Some(&aggs),
            ..Default::default()
        };
        let mut ctx = QueryContext::empty();
        ctx.viewport = Some(MapViewport {
            north: 52.0,
            south: 51.0,
            east: 1.0,
            west: 0.0,
            zoom: 9,
        });
        let request = compile(&cfg, &rt, &ctx, false).request.unwrap();
        assert_eq!(request.size, Some(0));
        assert_eq!(
            request.aggs.unwrap()["by_square"]["terms"]["field"],
            json!("location.grid_square.2km.centre")
        );
        assert_eq!(
            request.numeric_filters.get("location.coordinate_uncertainty_in_meters"),
            Some(&"0-2000".to_string())
        );
    }
}
