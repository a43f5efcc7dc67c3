//! Response distribution.
//!
//! Normalizes the backend response, pivots two-tier aggregations into
//! tables where configured, and pushes the result to every registered
//! consumer in class then registration order.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use bv_core::config::SourceSnapshot;
use bv_core::protocol::{PivotTable, SearchRequest, SearchResponse};
use bv_core::widget::{OutputWidget, WidgetClass};

/// Builds each configured pivot table from a two-tier aggregation: the
/// outer aggregation's buckets become columns, the inner aggregation's
/// buckets (reached via a comma-separated drill-down path) become rows,
/// and cells hold document counts. Rows are sparse; missing cells stay
/// at zero.
pub fn build_pivot_tables(
    tables_cfg: &IndexMap<String, (String, String)>,
    response: &mut SearchResponse,
) {
    let Some(aggregations) = response.aggregations.clone() else {
        return;
    };
    for (name, (outer_agg, inner_path)) in tables_cfg {
        let Some(outer_buckets) = aggregations
            .get(outer_agg)
            .and_then(|agg| agg.get("buckets"))
            .and_then(Value::as_array)
        else {
            continue;
        };
        let columns: Vec<String> = outer_buckets
            .iter()
            .map(|bucket| key_display(bucket.get("key")))
            .collect();
        let mut rows: IndexMap<String, IndexMap<String, u64>> = IndexMap::new();
        for bucket in outer_buckets {
            let column = key_display(bucket.get("key"));
            // Drill down the configured level of nesting.
            let mut inner = bucket;
            let mut found = true;
            for segment in inner_path.split(',') {
                match inner.get(segment) {
                    Some(next) => inner = next,
                    None => {
                        found = false;
                        break;
                    }
                }
            }
            if !found {
                continue;
            }
            let Some(inner_buckets) = inner.get("buckets").and_then(Value::as_array) else {
                continue;
            };
            for inner_bucket in inner_buckets {
                let row_key = key_display(inner_bucket.get("key"));
                let row = rows.entry(row_key).or_insert_with(|| {
                    columns.iter().map(|c| (c.clone(), 0)).collect()
                });
                let count = inner_bucket
                    .get("doc_count")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                row.insert(column.clone(), count);
            }
        }
        response
            .tables
            .insert(name.clone(), PivotTable { columns, rows });
    }
}

fn key_display(key: Option<&Value>) -> String {
    match key {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Pushes a response to every registered consumer, class by class in
/// the fixed distribution order, or only to the named widget. Returns
/// the widgets actually populated this round.
pub fn distribute(
    consumers: &[Arc<dyn OutputWidget>],
    snapshot: &SourceSnapshot,
    response: &SearchResponse,
    request: &SearchRequest,
    only_for: Option<&str>,
    excluded: &[String],
) -> Vec<Arc<dyn OutputWidget>> {
    let mut populated = Vec::new();
    for class in WidgetClass::ALL {
        for widget in consumers.iter().filter(|w| w.class() == class) {
            if only_for.is_some_and(|id| id != widget.id()) {
                continue;
            }
            if excluded.iter().any(|id| id == widget.id()) {
                continue;
            }
            widget.populate(snapshot, response, request);
            populated.push(Arc::clone(widget));
        }
    }
    populated
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pivot_table_from_two_tier_aggregation() {
        let mut response: SearchResponse = serde_json::from_value(json!({
            "hits": {"total": 0, "hits": []},
            "aggregations": {
                "by_year": {
                    "buckets": [
                        {
                            "key": "2020",
                            "doc_count": 12,
                            "nested": {
                                "by_group": {
                                    "buckets": [
                                        {"key": "insects", "doc_count": 8},
                                        {"key": "plants", "doc_count": 4}
                                    ]
                                }
                            }
                        },
                        {
                            "key": "2021",
                            "doc_count": 5,
                            "nested": {
                                "by_group": {
                                    "buckets": [
                                        {"key": "insects", "doc_count": 5}
                                    ]
                                }
                            }
                        }
                    ]
                }
            }
        }))
        .unwrap();
        let mut cfg = IndexMap::new();
        cfg.insert(
            "groupsByYear".to_string(),
            ("by_year".to_string(), "nested,by_group".to_string()),
        );
        build_pivot_tables(&cfg, &mut response);
        let table = response.tables.get("groupsByYear").unwrap();
        assert_eq!(table.columns, vec!["2020", "2021"]);
        assert_eq!(table.rows["insects"]["2020"], 8);
        assert_eq!(table.rows["insects"]["2021"], 5);
        // Sparse cell keeps its zero fill.
        assert_eq!(table.rows["plants"]["2021"], 0);
        assert_eq!(table.rows["plants"]["2020"], 4);
    }

    #[test]
    fn test_pivot_table_missing_aggregation_skipped() {
        let mut response = SearchResponse::default();
        let mut cfg = IndexMap::new();
        cfg.insert(
            "table".to_string(),
            ("absent".to_string(), "x".to_string()),
        );
        build_pivot_tables(&cfg, &mut response);
        assert!(response.tables.is_empty());
    }
}
