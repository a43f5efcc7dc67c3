//! Aggregation planning.
//!
//! Builds the nested aggregation specification for each aggregating
//! source mode: terms bucketing over a unique field, cursor-paged
//! composite bucketing, and the two zoom-driven map bucketings.

use bv_core::config::{CompositeAggConfig, GridSquareSize, TermAggConfig};
use bv_core::protocol::{find_and_set_value, SortDirection};
use indexmap::IndexMap;
use serde_json::{json, Map, Value};

use crate::fields::{composite_key_name, field_with_keyword_suffix};

/// Bucket cap applied when configuration does not limit an aggregation.
pub const DEFAULT_AGGREGATION_SIZE: u64 = 10_000;

/// Cursor page size used for chunked composite downloads.
pub const DOWNLOAD_COMPOSITE_PAGE_SIZE: u64 = 500;

/// Planned aggregation for a term-aggregation source.
#[derive(Debug, Clone)]
pub struct TermPlan {
    pub aggs: Value,
    /// Retrieved field list, with the unique field appended if missing.
    pub fields: Vec<String>,
    /// Bucket cap; the document `size` must be zero in this mode.
    pub aggregation_size: u64,
}

/// Builds the terms aggregation for a source.
///
/// The outer `idfield` bucket groups on the keyword-suffixed unique
/// field and always carries a size-1 `fieldlist` top-hits
/// sub-aggregation to retrieve representative field values. A separate
/// top-level cardinality supports row counting independent of the
/// bucket cap.
pub fn plan_term(
    cfg: &TermAggConfig,
    sort: &IndexMap<String, SortDirection>,
    requested_size: Option<u64>,
    fields: &[String],
) -> TermPlan {
    let aggregation_size = requested_size.unwrap_or(DEFAULT_AGGREGATION_SIZE);
    let unique_with_suffix = field_with_keyword_suffix(&cfg.unique_field);

    // Only a single sort entry is supported in this mode. doc_count is
    // a pseudo-field sorting on the bucket count.
    let (mut sort_field, sort_dir) = match sort.first() {
        Some((field, dir)) if field == "doc_count" => ("_count".to_string(), *dir),
        Some((field, dir)) => (field.clone(), *dir),
        None => (cfg.unique_field.clone(), SortDirection::Asc),
    };

    let mut fields_with_unique: Vec<String> = fields.to_vec();
    if !fields_with_unique.contains(&cfg.unique_field) {
        fields_with_unique.push(cfg.unique_field.clone());
    }

    let mut sub_aggs = Map::new();
    sub_aggs.insert(
        "fieldlist".into(),
        json!({
            "top_hits": {
                "size": 1,
                "_source": {"includes": fields_with_unique}
            }
        }),
    );
    for (name, agg) in &cfg.aggregation {
        sub_aggs.insert(name.clone(), agg.clone());
        if *name == sort_field {
            if let Some(order_agg) = cfg.sort_aggregation.get(name) {
                // A cheaper stand-in aggregation orders the buckets
                // where the real one is too costly to sort by.
                sort_field = format!("orderby_{name}");
                sub_aggs.insert(sort_field.clone(), order_agg.clone());
            }
        }
    }

    let sort_field_without_suffix = sort_field.trim_end_matches(".keyword");
    let order_by = if fields_with_unique.iter().any(|f| f == sort_field_without_suffix) {
        if sort_field_without_suffix == cfg.unique_field {
            "_key".to_string()
        } else {
            // Inject a scalar metric purely to sort buckets by.
            sub_aggs.insert("sortfield".into(), json!({"max": {"field": sort_field}}));
            "sortfield".to_string()
        }
    } else {
        // Sorting by a named aggregation.
        sort_field
    };

    let aggs = json!({
        "idfield": {
            "terms": {
                "size": aggregation_size,
                "field": unique_with_suffix,
                "order": {(order_by): sort_dir.as_str()}
            },
            "aggs": Value::Object(sub_aggs)
        },
        "count": {
            "cardinality": {"field": unique_with_suffix}
        }
    });
    TermPlan {
        aggs,
        fields: fields_with_unique,
        aggregation_size,
    }
}

/// Builds the cursor-paged composite aggregation for a source.
///
/// Composite source keys use hyphenated names so they cannot be
/// confused with document paths.
pub fn plan_composite(cfg: &CompositeAggConfig, fields: &[String], page_size: u64) -> Value {
    let sources: Vec<Value> = cfg
        .source_fields
        .iter()
        .map(|field| {
            json!({
                (composite_key_name(field)): {
                    "terms": {"field": field_with_keyword_suffix(field)}
                }
            })
        })
        .collect();

    let mut fields_with_unique: Vec<String> = fields.to_vec();
    if !fields_with_unique.contains(&cfg.unique_field) {
        fields_with_unique.push(cfg.unique_field.clone());
    }
    let mut sub_aggs = Map::new();
    sub_aggs.insert(
        "fieldlist".into(),
        json!({
            "top_hits": {
                "size": 1,
                "_source": {"includes": fields_with_unique}
            }
        }),
    );
    for (name, agg) in &cfg.aggregation {
        sub_aggs.insert(name.clone(), agg.clone());
    }

    json!({
        "rows": {
            "composite": {
                "size": page_size,
                "sources": sources
            },
            "aggs": Value::Object(sub_aggs)
        },
        "count": {
            "cardinality": {"field": field_with_keyword_suffix(&cfg.unique_field)}
        }
    })
}

/// Geohash bucket precision for a map zoom level.
pub fn geohash_precision(zoom: u8) -> u8 {
    (zoom as i16 - 3).clamp(4, 10) as u8
}

/// Grid square size recommended for a map zoom level, in km.
pub fn auto_square_kms(zoom: u8) -> u64 {
    if zoom > 10 {
        1
    } else if zoom > 8 {
        2
    } else {
        10
    }
}

/// Field holding grid square centres appropriate to the zoom level.
pub fn auto_square_field(zoom: u8) -> String {
    format!("location.grid_square.{}km.centre", auto_square_kms(zoom))
}

/// Grid square size in metres, honouring a fixed configuration.
pub fn grid_square_size_m(size: GridSquareSize, zoom: u8) -> u64 {
    match size {
        GridSquareSize::Auto => auto_square_kms(zoom) * 1000,
        GridSquareSize::Fixed(metres) => metres,
    }
}

/// Rewrites an aggregation template for the current map zoom: the
/// `autoGridSquareField` marker becomes the zoom-appropriate grid
/// square field, and geohash precision follows the zoom.
pub fn apply_grid_square_zoom(aggs: &mut Value, zoom: u8) {
    find_and_set_value(
        aggs,
        "field",
        Value::String(auto_square_field(zoom)),
        Some(&Value::String("autoGridSquareField".into())),
    );
}

pub fn apply_geohash_zoom(aggs: &mut Value, zoom: u8) {
    find_and_set_value(aggs, "precision", json!(geohash_precision(zoom)), None);
}

/// Strips the bucket ordering for a count-only request, where ordering
/// only costs time.
pub fn strip_term_order(aggs: &mut Value) {
    if let Some(terms) = aggs
        .get_mut("idfield")
        .and_then(|idfield| idfield.get_mut("terms"))
        .and_then(Value::as_object_mut)
    {
        terms.remove("order");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term_cfg() -> TermAggConfig {
        TermAggConfig {
            unique_field: "taxon.accepted_name".into(),
            aggregation: IndexMap::new(),
            sort_aggregation: IndexMap::new(),
            count_aggregation: None,
        }
    }

    fn sort_by(field: &str, dir: SortDirection) -> IndexMap<String, SortDirection> {
        let mut sort = IndexMap::new();
        sort.insert(field.to_string(), dir);
        sort
    }

    #[test]
    fn test_term_plan_shape() {
        let plan = plan_term(
            &term_cfg(),
            &sort_by("taxon.accepted_name", SortDirection::Asc),
            Some(50),
            &["taxon.accepted_name".to_string(), "#event_date#".to_string()],
        );
        let terms = &plan.aggs["idfield"]["terms"];
        assert_eq!(terms["field"], json!("taxon.accepted_name.keyword"));
        assert_eq!(terms["size"], json!(50));
        // Sorting by the unique field itself orders by bucket key.
        assert_eq!(terms["order"], json!({"_key": "asc"}));
        assert_eq!(
            plan.aggs["idfield"]["aggs"]["fieldlist"]["top_hits"]["size"],
            json!(1)
        );
        assert_eq!(
            plan.aggs["count"]["cardinality"]["field"],
            json!("taxon.accepted_name.keyword")
        );
    }

    #[test]
    fn test_term_plan_injects_sortfield_metric() {
        let plan = plan_term(
            &term_cfg(),
            &sort_by("event.date_start", SortDirection::Desc),
            None,
            &[
                "taxon.accepted_name".to_string(),
                "event.date_start".to_string(),
            ],
        );
        assert_eq!(
            plan.aggs["idfield"]["terms"]["order"],
            json!({"sortfield": "desc"})
        );
        assert_eq!(
            plan.aggs["idfield"]["aggs"]["sortfield"],
            json!({"max": {"field": "event.date_start"}})
        );
        assert_eq!(plan.aggregation_size, DEFAULT_AGGREGATION_SIZE);
    }

    #[test]
    fn test_term_plan_orderby_substitution() {
        let mut cfg = term_cfg();
        cfg.aggregation.insert(
            "records".into(),
            json!({"value_count": {"field": "id"}}),
        );
        cfg.sort_aggregation.insert(
            "records".into(),
            json!({"max": {"field": "id"}}),
        );
        let plan = plan_term(
            &cfg,
            &sort_by("records", SortDirection::Desc),
            None,
            &["taxon.accepted_name".to_string()],
        );
        assert_eq!(
            plan.aggs["idfield"]["terms"]["order"],
            json!({"orderby_records": "desc"})
        );
        assert_eq!(
            plan.aggs["idfield"]["aggs"]["orderby_records"],
            json!({"max": {"field": "id"}})
        );
        // The real aggregation is still requested.
        assert_eq!(
            plan.aggs["idfield"]["aggs"]["records"],
            json!({"value_count": {"field": "id"}})
        );
    }

    #[test]
    fn test_term_plan_doc_count_sort() {
        let plan = plan_term(
            &term_cfg(),
            &sort_by("doc_count", SortDirection::Desc),
            None,
            &["taxon.accepted_name".to_string()],
        );
        assert_eq!(
            plan.aggs["idfield"]["terms"]["order"],
            json!({"_count": "desc"})
        );
    }

    #[test]
    fn test_term_plan_appends_unique_field() {
        let plan = plan_term(
            &term_cfg(),
            &IndexMap::new(),
            None,
            &["#event_date#".to_string()],
        );
        assert!(plan.fields.iter().any(|f| f == "taxon.accepted_name"));
    }

    #[test]
    fn test_composite_plan_sources_and_size() {
        let cfg = CompositeAggConfig {
            unique_field: "taxon.accepted_name".into(),
            source_fields: vec!["taxon.accepted_name".into(), "event.date_start".into()],
            aggregation: IndexMap::new(),
            count_aggregation: None,
            page_size: 30,
        };
        let aggs = plan_composite(&cfg, &["taxon.accepted_name".to_string()], 30);
        assert_eq!(aggs["rows"]["composite"]["size"], json!(30));
        let sources = aggs["rows"]["composite"]["sources"].as_array().unwrap();
        assert_eq!(sources.len(), 2);
        assert!(sources[1].get("event-date_start").is_some());
    }

    #[test]
    fn test_geohash_precision_clamped() {
        assert_eq!(geohash_precision(2), 4);
        assert_eq!(geohash_precision(9), 6);
        assert_eq!(geohash_precision(18), 10);
    }

    #[test]
    fn test_auto_square_steps() {
        assert_eq!(auto_square_kms(12), 1);
        assert_eq!(auto_square_kms(9), 2);
        assert_eq!(auto_square_kms(5), 10);
        assert_eq!(auto_square_field(9), "location.grid_square.2km.centre");
    }

    #[test]
    fn test_grid_square_marker_rewrite() {
        let mut aggs = json!({
            "by_square": {"terms": {"field": "autoGridSquareField"}}
        });
        apply_grid_square_zoom(&mut aggs, 12);
        assert_eq!(
            aggs["by_square"]["terms"]["field"],
            json!("location.grid_square.1km.centre")
        );
    }

    #[test]
    fn test_strip_term_order() {
        let mut aggs = plan_term(
            &term_cfg(),
            &sort_by("doc_count", SortDirection::Desc),
            None,
            &[],
        )
        .aggs;
        strip_term_order(&mut aggs);
        assert!(aggs["idfield"]["terms"].get("order").is_none());
    }
}
