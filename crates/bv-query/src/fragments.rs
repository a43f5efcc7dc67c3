//! Filter fragments and sort expansion for special fields.
//!
//! Special fields are not directly searchable; each filterable one has
//! a builder that turns user input into either a query-string fragment
//! or a structured boolean clause. Builders return `None` when the
//! input text is not a valid filter, which the caller surfaces next to
//! the offending input.

use bv_core::protocol::{BoolClause, BoolQuery, SortDirection, SortSpec};
use indexmap::IndexMap;
use serde_json::{json, Value};

use crate::dates::date_filter;
use crate::fields::{field_with_keyword_suffix, parse_field, ParsedField, SpecialField};

/// A built filter fragment: free text for the query string, or a
/// structured clause for the boolean query list.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryFragment {
    QueryString(String),
    Clause(BoolQuery),
}

impl QueryFragment {
    /// Folds the fragment into a boolean clause either way.
    pub fn into_bool_query(self) -> BoolQuery {
        match self {
            QueryFragment::QueryString(text) => BoolQuery::query_string(BoolClause::Must, text),
            QueryFragment::Clause(clause) => clause,
        }
    }
}

/// Builds the filter fragment for a special field from user input.
///
/// Returns `None` when the text is not a valid filter for the field,
/// or when the field is not filterable at all.
pub fn build_query_fragment(
    field: SpecialField,
    text: &str,
    params: &[String],
) -> Option<QueryFragment> {
    let text = text.trim();
    match field {
        SpecialField::Associations => {
            let query = json!({
                "nested": {
                    "path": "occurrence.associations",
                    "query": {
                        "bool": {
                            "must": [
                                {"query_string": {"query": text}}
                            ]
                        }
                    }
                }
            });
            Some(QueryFragment::Clause(BoolQuery::prebuilt(BoolClause::Must, &query)))
        }
        SpecialField::AttrValue => {
            let entity = params.first()?;
            let attr_id = params.get(1)?;
            let query = json!({
                "nested": {
                    "path": format!("{entity}.attributes"),
                    "query": {
                        "bool": {
                            "must": [
                                {"match": {(format!("{entity}.attributes.id")): attr_id}},
                                {"match": {(format!("{entity}.attributes.value")): text}}
                            ]
                        }
                    }
                }
            });
            Some(QueryFragment::Clause(BoolQuery::prebuilt(BoolClause::Must, &query)))
        }
        SpecialField::DatasourceCode => datasource_code_fragment(text),
        SpecialField::EventDate => {
            date_filter(text, "event.date_start").map(QueryFragment::QueryString)
        }
        SpecialField::HigherGeography => {
            let place_type = params.first()?;
            let field_name = params.get(1)?;
            let query = json!({
                "nested": {
                    "path": "location.higher_geography",
                    "query": {
                        "bool": {
                            "must": [
                                {"match": {"location.higher_geography.type": place_type}},
                                {"match": {(format!("location.higher_geography.{field_name}")): text}}
                            ]
                        }
                    }
                }
            });
            Some(QueryFragment::Clause(BoolQuery::prebuilt(BoolClause::Must, &query)))
        }
        SpecialField::LatLon => lat_lon_fragment(text),
        // The remaining special fields have no searchable representation.
        SpecialField::StatusIcons
        | SpecialField::DataCleanerIcons
        | SpecialField::Locality
        | SpecialField::Lat
        | SpecialField::Lon
        | SpecialField::NullIfZero
        | SpecialField::OccurrenceMedia => None,
    }
}

/// `website_id [| survey_id]` filter.
fn datasource_code_fragment(text: &str) -> Option<QueryFragment> {
    let mut parts = text.splitn(2, '|');
    let website = parts.next()?.trim();
    if website.is_empty() || !website.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let mut query = format!("metadata.website.id:{website}");
    if let Some(survey) = parts.next() {
        let survey = survey.trim();
        if !survey.is_empty() {
            if !survey.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            query.push_str(&format!(" AND metadata.survey.id:{survey}"));
        }
    }
    Some(QueryFragment::QueryString(query))
}

/// Filter to records within 5 km of a lat/lon point. Accepts decimal
/// values with optional N/S/E/W suffixes.
fn lat_lon_fragment(text: &str) -> Option<QueryFragment> {
    let coords: Vec<&str> = text.split([',', ' ']).filter(|p| !p.is_empty()).collect();
    if coords.len() != 2 {
        return None;
    }
    let lat = parse_coordinate(coords[0], 'S')?;
    let lon = parse_coordinate(coords[1], 'W')?;
    let query = json!({
        "geo_distance": {
            "distance": "5km",
            "location.point": {"lat": lat, "lon": lon}
        }
    });
    Some(QueryFragment::Clause(BoolQuery::prebuilt(BoolClause::Must, &query)))
}

fn parse_coordinate(text: &str, negative_suffix: char) -> Option<f64> {
    let negate = text.ends_with(negative_suffix);
    let trimmed = text.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    let value: f64 = trimmed.parse().ok()?;
    Some(if negate { -value } else { value })
}

/// Filter hints shown beside special-field filter inputs.
pub fn filter_hint(field: SpecialField) -> Option<&'static str> {
    match field {
        SpecialField::LatLon => {
            Some("Enter a latitude and longitude value to filter to records in the vicinity.")
        }
        SpecialField::EventDate => Some(
            "Enter a date in dd/mm/yyyy or yyyy-mm-dd format. Filtering to a year or range of \
             years is possible using yyyy or yyyy-yyyy format.",
        ),
        _ => None,
    }
}

/// How a special field expands when used as a sort key.
enum SortExpansion {
    /// Underlying document fields to sort by instead.
    Fields(&'static [&'static str]),
    /// Literal sort specification replacing field sorts entirely.
    Literal(fn() -> Value),
}

fn sort_expansion(field: SpecialField) -> Option<SortExpansion> {
    match field {
        SpecialField::StatusIcons => Some(SortExpansion::Fields(&[
            "identification.verification_status",
            "identification.verification_substatus",
            "metadata.sensitive",
            "metadata.confidential",
            "occurrence.zero_abundance",
            "metadata.created_by_id",
        ])),
        SpecialField::DataCleanerIcons => {
            Some(SortExpansion::Fields(&["identification.auto_checks.result"]))
        }
        SpecialField::EventDate => Some(SortExpansion::Fields(&["event.date_start"])),
        SpecialField::DatasourceCode => Some(SortExpansion::Fields(&[
            "metadata.website.id",
            "metadata.survey.id",
        ])),
        // Distance sort from the North Pole.
        SpecialField::LatLon => Some(SortExpansion::Literal(|| {
            json!({
                "_geo_distance": {
                    "location.point": {"lat": 0, "lon": 0},
                    "order": "asc",
                    "unit": "km"
                }
            })
        })),
        _ => None,
    }
}

/// Expands configured sort fields into the actual sort specification.
///
/// Special fields map to one or more underlying fields, or to a literal
/// sort object that replaces the field sort entirely. `with_keyword`
/// appends keyword suffixes for a spec that is about to be sent to the
/// backend; without it, field names stay plain for comparison against
/// retrieved-field lists.
pub fn expand_sort(sort: &IndexMap<String, SortDirection>, with_keyword: bool) -> SortSpec {
    let mut fields: IndexMap<String, SortDirection> = IndexMap::new();
    for (field, dir) in sort {
        let parsed = parse_field(field);
        let special = match &parsed {
            ParsedField::Special { field, .. } => Some(*field),
            _ => None,
        };
        match special.and_then(sort_expansion) {
            Some(SortExpansion::Fields(underlying)) => {
                for name in underlying {
                    fields.insert((*name).to_string(), *dir);
                }
            }
            Some(SortExpansion::Literal(build)) => {
                // A literal spec replaces the field-based sort.
                return SortSpec::Literal(build());
            }
            None => {
                if with_keyword {
                    fields.insert(field_with_keyword_suffix(field), *dir);
                } else {
                    fields.insert(field.trim_end_matches(".keyword").to_string(), *dir);
                }
            }
        }
    }
    SortSpec::Fields(fields)
}

/// Builds the filter fragment for any field name, dispatching special
/// syntax to the registered builder. Plain paths get no fragment here;
/// they route through the text/numeric filter maps instead.
pub fn fragment_for_field(field: &str, text: &str) -> Option<QueryFragment> {
    match parse_field(field) {
        ParsedField::Special { field, params } => build_query_fragment(field, text, &params),
        _ => None,
    }
}
