//! Extracting display rows from a response.
//!
//! Document-mode sources render hits directly; aggregation modes
//! render buckets, whose representative field values sit in the
//! `fieldlist` top-hits sub-aggregation and whose grouping values sit
//! in the bucket key.

use serde_json::Value;

use bv_core::config::SourceMode;
use bv_core::protocol::{find_value, SearchResponse};

/// One renderable row: the document (or bucket) to resolve fields
/// against, plus a display identity.
#[derive(Debug, Clone)]
pub struct DataRow {
    pub id: String,
    pub doc: Value,
}

/// Path from a bucket to its representative document, for use as a
/// column definition path in aggregation modes.
pub const FIELDLIST_DOC_PATH: &str = "fieldlist.hits.hits.0._source";

/// Rows to render for a response in the given source mode.
pub fn source_data_list(mode: SourceMode, response: &SearchResponse) -> Vec<DataRow> {
    if mode == SourceMode::Docs {
        return response
            .hits
            .hits
            .iter()
            .map(|hit| DataRow {
                id: hit.id.clone(),
                doc: hit.source.clone(),
            })
            .collect();
    }
    let Some(buckets) = response
        .aggregations
        .as_ref()
        .and_then(|aggs| find_value(aggs, "buckets"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };
    buckets
        .iter()
        .map(|bucket| DataRow {
            id: key_display(bucket.get("key")),
            doc: bucket.clone(),
        })
        .collect()
}

fn key_display(key: Option<&Value>) -> String {
    match key {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(map)) => map
            .values()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("|"),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_docs_rows_from_hits() {
        let response: SearchResponse = serde_json::from_value(json!({
            "hits": {"total": 2, "hits": [
                {"_id": "11", "_source": {"taxon": {"accepted_name": "Apis"}}},
                {"_id": "12", "_source": {"taxon": {"accepted_name": "Bombus"}}}
            ]}
        }))
        .unwrap();
        let rows = source_data_list(SourceMode::Docs, &response);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "11");
        assert_eq!(rows[1].doc["taxon"]["accepted_name"], json!("Bombus"));
    }

    #[test]
    fn test_aggregation_rows_from_buckets() {
        let response: SearchResponse = serde_json::from_value(json!({
            "hits": {"total": 0, "hits": []},
            "aggregations": {"idfield": {"buckets": [
                {"key": "Apis mellifera", "doc_count": 7},
                {"key": {"taxon-accepted_name": "Bombus", "event-date_start": "2020"}, "doc_count": 3}
            ]}}
        }))
        .unwrap();
        let rows = source_data_list(SourceMode::TermAggregation, &response);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "Apis mellifera");
        assert_eq!(rows[1].id, "Bombus|2020");
        assert_eq!(rows[1].doc["doc_count"], json!(3));
    }
}
