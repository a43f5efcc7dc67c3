//! Wire types for the search backend proxy.
//!
//! The request body mirrors what the proxy expects: shorthand text and
//! numeric filter maps, an ordered list of boolean clauses, and the raw
//! aggregation tree. The response covers both backend major versions;
//! the legacy bare-integer hit total is upgraded to the `{value,
//! relation}` shape during deserialization so no consumer ever sees it.

use ahash::AHashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sort direction for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// The boolean slot a query clause occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoolClause {
    Must,
    MustNot,
    Should,
}

/// Query types the proxy knows how to expand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    QueryString,
    Term,
    Match,
    Nested,
    GeoBoundingBox,
    GeoDistance,
}

/// One entry in the request's boolean clause list.
///
/// Every entry carries its `bool_clause`; the remaining fields depend on
/// the query type (a raw `query` JSON string for prebuilt fragments, or
/// `field`/`value` pairs for simple clauses).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoolQuery {
    pub bool_clause: BoolClause,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_type: Option<QueryType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested: Option<String>,
}

impl BoolQuery {
    /// A free-text `query_string` clause.
    pub fn query_string(bool_clause: BoolClause, value: impl Into<String>) -> Self {
        BoolQuery {
            bool_clause,
            query_type: Some(QueryType::QueryString),
            field: None,
            query: None,
            value: Some(Value::String(value.into())),
            nested: None,
        }
    }

    /// An exact term match on a single field.
    pub fn term(bool_clause: BoolClause, field: impl Into<String>, value: impl Into<String>) -> Self {
        BoolQuery {
            bool_clause,
            query_type: Some(QueryType::Term),
            field: Some(field.into()),
            query: None,
            value: Some(Value::String(value.into())),
            nested: None,
        }
    }

    /// A prebuilt query fragment, serialized as a JSON string.
    pub fn prebuilt(bool_clause: BoolClause, query: &Value) -> Self {
        BoolQuery {
            bool_clause,
            query_type: None,
            field: None,
            query: Some(query.to_string()),
            value: Some(Value::String(String::new())),
            nested: None,
        }
    }
}

/// Sort specification: either per-field directions (insertion order is
/// priority) or a literal sort object such as a geo-distance sort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SortSpec {
    Fields(IndexMap<String, SortDirection>),
    Literal(Value),
}

/// Body POSTed to the search proxy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(rename = "textFilters", default, skip_serializing_if = "IndexMap::is_empty")]
    pub text_filters: IndexMap<String, String>,
    #[serde(rename = "numericFilters", default, skip_serializing_if = "IndexMap::is_empty")]
    pub numeric_filters: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bool_queries: Vec<BoolQuery>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_filters: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub refresh_user_filters: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_def: Option<serde_json::Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggs: Option<Value>,
}

/// Whether a hit total is exact or a lower bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TotalRelation {
    Eq,
    Gte,
}

/// Normalized hit total. Older backend majors report a bare integer;
/// both shapes deserialize into this struct.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawTotal")]
pub struct TotalHits {
    pub value: u64,
    pub relation: TotalRelation,
}

impl TotalHits {
    pub fn exact(value: u64) -> Self {
        TotalHits {
            value,
            relation: TotalRelation::Eq,
        }
    }

    /// True when the reported count is only a lower bound.
    pub fn is_lower_bound(&self) -> bool {
        self.relation == TotalRelation::Gte
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTotal {
    Counted {
        value: u64,
        #[serde(default)]
        relation: Option<TotalRelation>,
    },
    Legacy(u64),
}

impl From<RawTotal> for TotalHits {
    fn from(raw: RawTotal) -> Self {
        match raw {
            RawTotal::Counted { value, relation } => TotalHits {
                value,
                relation: relation.unwrap_or(TotalRelation::Eq),
            },
            RawTotal::Legacy(value) => TotalHits::exact(value),
        }
    }
}

/// A single returned document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_source", default)]
    pub source: Value,
}

/// The hits section of a response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hits {
    #[serde(default)]
    pub total: Option<TotalHits>,
    #[serde(default)]
    pub hits: Vec<Hit>,
}

/// A 2-D table pivoted out of a two-tier aggregation: outer buckets are
/// columns, inner buckets are rows, cells hold document counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PivotTable {
    pub columns: Vec<String>,
    pub rows: IndexMap<String, IndexMap<String, u64>>,
}

/// Response from the search proxy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub hits: Hits,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregations: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_key: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    /// Pivot tables attached after the fact, keyed by configured name.
    #[serde(skip)]
    pub tables: AHashMap<String, PivotTable>,
}

impl SearchResponse {
    /// True when the proxy reported a failure payload.
    pub fn is_error(&self) -> bool {
        self.error.is_some() || self.code.is_some_and(|c| c != 200)
    }

    /// The composite cursor for the next page, wherever the backend put it.
    pub fn composite_after_key(&self) -> Option<&Value> {
        if let Some(key) = &self.after_key {
            return Some(key);
        }
        self.aggregations
            .as_ref()
            .and_then(|aggs| find_value(aggs, "after_key"))
    }
}

/// Searches a JSON tree for the first property with the given key,
/// depth first. Useful for finding the `buckets` of an aggregation.
pub fn find_value<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => {
            if let Some(found) = map.get(key) {
                return Some(found);
            }
            map.values().find_map(|v| find_value(v, key))
        }
        Value::Array(items) => items.iter().find_map(|v| find_value(v, key)),
        _ => None,
    }
}

/// Mutable variant of [`find_value`].
pub fn find_value_mut<'a>(value: &'a mut Value, key: &str) -> Option<&'a mut Value> {
    match value {
        Value::Object(map) => {
            if map.contains_key(key) {
                return map.get_mut(key);
            }
            map.values_mut().find_map(|v| find_value_mut(v, key))
        }
        Value::Array(items) => items.iter_mut().find_map(|v| find_value_mut(v, key)),
        _ => None,
    }
}

/// Searches a JSON tree for the first property with the given key and
/// replaces its value. When `only_if` is supplied the value is only
/// replaced where it currently equals that marker.
pub fn find_and_set_value(value: &mut Value, key: &str, update_to: Value, only_if: Option<&Value>) -> bool {
    match value {
        Value::Object(map) => {
            for (k, v) in map.iter_mut() {
                if k == key && only_if.is_none_or(|marker| *marker == *v) {
                    *v = update_to;
                    return true;
                }
                if find_and_set_value(v, key, update_to.clone(), only_if) {
                    return true;
                }
            }
            false
        }
        Value::Array(items) => {
            for v in items.iter_mut() {
                if find_and_set_value(v, key, update_to.clone(), only_if) {
                    return true;
                }
            }
            false
        }
        _ => false,
    }
}
