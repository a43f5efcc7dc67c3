//! Field resolution against backend documents.
//!
//! A field name is either a dotted path into the document
//! (`taxon.accepted_name`) or a special name wrapped in `#` with
//! optional colon-separated parameters (`#attr_value:event:12#`).
//! Special names form a closed set so value extraction, filter
//! building and sort expansion all match exhaustively.

use serde_json::Value;

use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// The closed set of special field names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialField {
    Associations,
    AttrValue,
    StatusIcons,
    DataCleanerIcons,
    DatasourceCode,
    EventDate,
    HigherGeography,
    Locality,
    Lat,
    Lon,
    LatLon,
    NullIfZero,
    OccurrenceMedia,
}

impl SpecialField {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "associations" => SpecialField::Associations,
            "attr_value" => SpecialField::AttrValue,
            "status_icons" => SpecialField::StatusIcons,
            "data_cleaner_icons" => SpecialField::DataCleanerIcons,
            "datasource_code" => SpecialField::DatasourceCode,
            "event_date" => SpecialField::EventDate,
            "higher_geography" => SpecialField::HigherGeography,
            "locality" => SpecialField::Locality,
            "lat" => SpecialField::Lat,
            "lon" => SpecialField::Lon,
            "lat_lon" => SpecialField::LatLon,
            "null_if_zero" => SpecialField::NullIfZero,
            "occurrence_media" => SpecialField::OccurrenceMedia,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            SpecialField::Associations => "associations",
            SpecialField::AttrValue => "attr_value",
            SpecialField::StatusIcons => "status_icons",
            SpecialField::DataCleanerIcons => "data_cleaner_icons",
            SpecialField::DatasourceCode => "datasource_code",
            SpecialField::EventDate => "event_date",
            SpecialField::HigherGeography => "higher_geography",
            SpecialField::Locality => "locality",
            SpecialField::Lat => "lat",
            SpecialField::Lon => "lon",
            SpecialField::LatLon => "lat_lon",
            SpecialField::NullIfZero => "null_if_zero",
            SpecialField::OccurrenceMedia => "occurrence_media",
        }
    }
}

/// A field name split into its dispatchable form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedField {
    /// Plain dotted path into the document.
    Path(String),
    /// Recognized special field plus its parameters.
    Special {
        field: SpecialField,
        params: Vec<String>,
    },
    /// `#...#` syntax naming no registered special field.
    UnknownSpecial(String),
}

pub fn parse_field(name: &str) -> ParsedField {
    if !(name.starts_with('#') && name.ends_with('#') && name.len() > 1) {
        return ParsedField::Path(name.to_string());
    }
    let inner = name.trim_matches('#');
    let mut parts = inner.split(':');
    let simple = parts.next().unwrap_or_default();
    match SpecialField::from_name(simple) {
        Some(field) => ParsedField::Special {
            field,
            params: parts.map(str::to_string).collect(),
        },
        None => ParsedField::UnknownSpecial(simple.to_string()),
    }
}

/// Reduces `#fieldname:param1:param2#` to just `fieldname`.
pub fn simple_field_name(name: &str) -> &str {
    name.trim_matches('#')
        .split(':')
        .next()
        .unwrap_or_default()
}

/// Name usable as a composite aggregation key: separators that would be
/// confused with document paths become hyphens.
pub fn composite_key_name(name: &str) -> String {
    name.chars()
        .map(|c| if matches!(c, '.' | '#' | ':') { '-' } else { c })
        .collect()
}

/// Human readable caption for a field name.
pub fn readable_key_name(name: &str) -> String {
    let spaced: String = name
        .chars()
        .map(|c| {
            if matches!(c, '.' | '-' | '_' | ':' | '#') {
                ' '
            } else {
                c
            }
        })
        .collect();
    let trimmed = spaced.trim();
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Text fields that carry a `.keyword` sub-field for aggregation and
/// sorting; configuration does not need to care about the suffix.
pub const KEYWORD_FIELDS: &[&str] = &[
    "event.attributes.id",
    "event.attributes.value",
    "event.habitat",
    "event.recorded_by",
    "event.sampling_protocol",
    "identification.auto_checks.output.message",
    "identification.auto_checks.output.rule_type",
    "identification.identified_by",
    "identification.query",
    "identification.recorder_certainty",
    "identification.verifier.name",
    "indexed_location_ids",
    "location.name",
    "location.output_sref",
    "location.output_sref_system",
    "location.parent.name",
    "location.verbatim_locality",
    "message",
    "metadata.group.title",
    "metadata.licence_code",
    "metadata.survey.title",
    "metadata.website.title",
    "occurrence.associated_media",
    "occurrence.attributes.id",
    "occurrence.attributes.value",
    "occurrence.life_stage",
    "occurrence.media.caption",
    "occurrence.media.licence",
    "occurrence.media.path",
    "occurrence.media.path2",
    "occurrence.media.type",
    "occurrence.organism_quantity",
    "occurrence.sex",
    "output_sref",
    "tags",
    "taxon.accepted_name",
    "taxon.accepted_name_authorship",
    "taxon.class",
    "taxon.family",
    "taxon.genus",
    "taxon.group",
    "taxon.kingdom",
    "taxon.order",
    "taxon.phylum",
    "taxon.species",
    "taxon.subfamily",
    "taxon.taxon_name",
    "taxon.taxon_name_authorship",
    "taxon.taxon_rank",
    "taxon.vernacular_name",
    "warehouse",
];

/// Appends `.keyword` for fields that aggregate on a keyword sub-field.
pub fn field_with_keyword_suffix(field: &str) -> String {
    if KEYWORD_FIELDS.contains(&field) {
        format!("{field}.keyword")
    } else {
        field.to_string()
    }
}

/// Column definition supplied by an output widget.
#[derive(Debug, Clone, Default)]
pub struct ColumnDef {
    pub field: String,
    pub caption: Option<String>,
    /// Path to drill to before resolving the field, for values nested
    /// in aggregation responses.
    pub path: Option<String>,
}

/// Walks down a dotted path in a document.
///
/// A path segment of the form `[key=value]` selects, from an array at
/// that point, the first element whose `key` equals `value` (a bucket
/// filter for nested aggregation results). Missing segments resolve to
/// `None`.
pub fn iterate_down_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        if let Some(filter) = parse_bucket_filter(segment) {
            let items = current.as_array()?;
            current = items
                .iter()
                .find(|item| item.get(filter.0).is_some_and(|v| value_matches(v, filter.1)))?;
        } else {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
    }
    Some(current)
}

fn parse_bucket_filter(segment: &str) -> Option<(&str, &str)> {
    let inner = segment.strip_prefix('[')?.strip_suffix(']')?;
    inner.split_once('=')
}

fn value_matches(value: &Value, expected: &str) -> bool {
    match value {
        Value::String(s) => s == expected,
        other => other.to_string() == expected,
    }
}

/// Formats a JSON leaf for display. Aggregation-style objects prefer
/// their formatted value over the raw one.
fn leaf_display(value: &Value) -> String {
    if let Value::Object(map) = value {
        if let Some(formatted) = map.get("value_as_string") {
            return leaf_display(formatted);
        }
        if let Some(raw) = map.get("value") {
            return leaf_display(raw);
        }
    }
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn get_path_str(doc: &Value, path: &str) -> String {
    iterate_down_path(doc, path).map(leaf_display).unwrap_or_default()
}

fn flag_set(doc: &Value, path: &str) -> bool {
    match iterate_down_path(doc, path) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty() && s != "false",
        Some(Value::Null) | None => false,
        Some(_) => true,
    }
}

/// Readable label for a record status or flag code.
pub fn status_label(code: &str) -> Option<&'static str> {
    Some(match code {
        "V" => "Accepted",
        "V1" => "Accepted as correct",
        "V2" => "Accepted as considered correct",
        "C" => "Pending review",
        "C3" => "Plausible",
        "R" => "Not accepted",
        "R4" => "Not accepted as unable to verify",
        "R5" => "Not accepted as incorrect",
        "Q" => "Queried",
        "A" => "Answered",
        "Sensitive" => "Sensitive",
        "Confidential" => "Confidential",
        "ZeroAbundance" => "Absence record",
        "Anonymous" => "Entered by a user who was not logged in",
        _ => return None,
    })
}

/// Resolves field names to display values inside response documents.
pub struct FieldResolver {
    /// Display date format, `d`/`m`/`Y` placeholders.
    date_format: String,
}

impl FieldResolver {
    pub fn new(date_format: impl Into<String>) -> Self {
        FieldResolver {
            date_format: date_format.into(),
        }
    }

    /// Retrieves a display value for `field` from a document.
    ///
    /// `field` is either a dotted document path or a `#special#` name;
    /// a column definition may supply a path to drill to first. Missing
    /// values resolve to an empty string, never an error.
    pub fn resolve_value(&self, doc: &Value, field: &str, col_def: Option<&ColumnDef>) -> String {
        let root = match col_def.and_then(|c| c.path.as_deref()) {
            Some(path) => match iterate_down_path(doc, path) {
                Some(v) => v,
                None => return String::new(),
            },
            None => doc,
        };
        match parse_field(field) {
            ParsedField::Special { field, params } => self.extract(field, root, &params),
            ParsedField::Path(path) => self.resolve_path(root, &path),
            // Unrecognized special syntax falls back to a path walk,
            // which resolves to empty for the raw `#...#` text.
            ParsedField::UnknownSpecial(_) => self.resolve_path(root, field),
        }
    }

    fn resolve_path(&self, root: &Value, path: &str) -> String {
        let Some(value) = iterate_down_path(root, path) else {
            return String::new();
        };
        let mut display = leaf_display(value);
        // Metadata timestamps read better in the display date order.
        if path.ends_with("_on") {
            display = reformat_timestamp(&display);
        }
        display
    }

    /// Converts a backend (ISO or epoch-millis) date to display format.
    pub fn format_date(&self, value: &Value) -> String {
        let date = match value {
            Value::Number(n) => n
                .as_i64()
                .and_then(DateTime::from_timestamp_millis)
                .map(|dt| dt.date_naive()),
            Value::String(s) if !s.trim().is_empty() => parse_backend_date(s.trim()),
            _ => None,
        };
        let Some(date) = date else {
            return String::new();
        };
        self.date_format
            .replace('d', &date.format("%d").to_string())
            .replace('m', &date.format("%m").to_string())
            .replace('Y', &date.format("%Y").to_string())
    }

    fn extract(&self, field: SpecialField, doc: &Value, params: &[String]) -> String {
        match field {
            SpecialField::Associations => self.associations(doc),
            SpecialField::AttrValue => self.attr_value(doc, params),
            SpecialField::StatusIcons => self.status_flags(doc),
            SpecialField::DataCleanerIcons => self.data_cleaner_flags(doc),
            SpecialField::DatasourceCode => self.datasource_code(doc),
            SpecialField::EventDate => self.event_date(doc),
            SpecialField::HigherGeography => self.higher_geography(doc, params),
            SpecialField::Locality => self.locality(doc),
            SpecialField::Lat => self.lat(doc, params),
            SpecialField::Lon => self.lon(doc, params),
            SpecialField::LatLon => self.lat_lon(doc),
            SpecialField::NullIfZero => self.null_if_zero(doc, params),
            SpecialField::OccurrenceMedia => self.occurrence_media(doc),
        }
    }

    /// Summary of associated taxa.
    fn associations(&self, doc: &Value) -> String {
        let Some(associations) = iterate_down_path(doc, "occurrence.associations")
            .and_then(Value::as_array)
        else {
            return String::new();
        };
        let mut output = Vec::new();
        for assoc in associations {
            let accepted = get_path_str(assoc, "accepted_name");
            let vernacular = get_path_str(assoc, "vernacular_name");
            if vernacular.is_empty() {
                output.push(accepted);
            } else {
                output.push(format!("{vernacular} ({accepted})"));
            }
        }
        output.join("; ")
    }

    /// Custom attribute value. Two parameters: the entity (event/sample
    /// or occurrence) and the attribute id. Multiple values come back
    /// semicolon separated.
    fn attr_value(&self, doc: &Value, params: &[String]) -> String {
        let entity_param = if params.len() > 1 { params[0].as_str() } else { "" };
        let key = if entity_param == "parent_event" {
            "parent_attributes"
        } else {
            "attributes"
        };
        let entity = if matches!(entity_param, "sample" | "event" | "parent_event") {
            "event"
        } else {
            "occurrence"
        };
        let Some(attrs) = doc
            .get(entity)
            .and_then(|e| e.get(key))
            .and_then(Value::as_array)
        else {
            return String::new();
        };
        let wanted = params.get(1).map(String::as_str).unwrap_or_default();
        let mut output = Vec::new();
        for attr in attrs {
            if attr.get("id").is_some_and(|id| value_matches(id, wanted)) {
                output.push(get_path_str(attr, "value"));
            }
        }
        output.join("; ")
    }

    /// Record status and flags as readable labels.
    fn status_flags(&self, doc: &Value) -> String {
        let mut labels = Vec::new();
        let status = get_path_str(doc, "identification.verification_status");
        if !status.is_empty() {
            let substatus = get_path_str(doc, "identification.verification_substatus");
            let full = if substatus.is_empty() || substatus == "0" {
                status
            } else {
                format!("{status}{substatus}")
            };
            if let Some(label) = status_label(&full) {
                labels.push(label);
            }
        }
        let query = get_path_str(doc, "identification.query");
        if let Some(label) = status_label(&query) {
            labels.push(label);
        }
        if flag_set(doc, "metadata.sensitive") {
            labels.push(status_label("Sensitive").unwrap_or_default());
        }
        if flag_set(doc, "metadata.confidential") {
            labels.push(status_label("Confidential").unwrap_or_default());
        }
        if flag_set(doc, "occurrence.zero_abundance") {
            labels.push(status_label("ZeroAbundance").unwrap_or_default());
        }
        if get_path_str(doc, "metadata.created_by_id") == "1" {
            labels.push(status_label("Anonymous").unwrap_or_default());
        }
        labels.join("; ")
    }

    /// Outcome of the automatic verification rule checks.
    fn data_cleaner_flags(&self, doc: &Value) -> String {
        let enabled = get_path_str(doc, "identification.auto_checks.enabled");
        let result = get_path_str(doc, "identification.auto_checks.result");
        if enabled == "false" {
            return "Automatic rule checks will not be applied to records in this dataset".into();
        }
        match result.as_str() {
            "true" => "All automatic rule checks passed".into(),
            "false" => {
                let Some(output) = iterate_down_path(doc, "identification.auto_checks.output")
                    .and_then(Value::as_array)
                else {
                    return String::new();
                };
                let messages: Vec<String> = output
                    .iter()
                    .map(|rule| get_path_str(rule, "message"))
                    .filter(|m| !m.is_empty())
                    .collect();
                messages.join("; ")
            }
            _ => "Record not yet checked against rules".into(),
        }
    }

    /// Compact website|survey identifier pair.
    fn datasource_code(&self, doc: &Value) -> String {
        format!(
            "{}|{}",
            get_path_str(doc, "metadata.website.id"),
            get_path_str(doc, "metadata.survey.id")
        )
    }

    /// Event date or date range. Copes with the date fields being
    /// embedded in a composite aggregation key.
    fn event_date(&self, doc: &Value) -> String {
        let root = doc
            .get("event")
            .or_else(|| doc.get("key"))
            .unwrap_or(doc);
        let start_raw = root
            .get("date_start")
            .or_else(|| root.get("event-date_start"))
            .cloned()
            .unwrap_or(Value::Null);
        let end_raw = root
            .get("date_end")
            .or_else(|| root.get("event-date_end"))
            .cloned()
            .unwrap_or(Value::Null);
        let start = self.format_date(&start_raw);
        let end = self.format_date(&end_raw);
        match (start.is_empty(), end.is_empty()) {
            (true, true) => "Unknown".into(),
            (true, false) => format!("Before {end}"),
            (false, true) => format!("After {start}"),
            (false, false) if start != end => format!("{start} - {end}"),
            (false, false) => start,
        }
    }

    /// Higher geography values. Parameters: location type, field to
    /// return, optional `json` to emit the raw structure.
    fn higher_geography(&self, doc: &Value, params: &[String]) -> String {
        let mut output: Vec<Value> = Vec::new();
        if let Some(places) = iterate_down_path(doc, "location.higher_geography")
            .and_then(Value::as_array)
        {
            if params.first().is_none_or(|p| p.is_empty()) {
                output = places.clone();
            } else {
                for place in places {
                    // Skip combined geo-areas, indicated by + in the code.
                    let code = get_path_str(place, "code");
                    if get_path_str(place, "type") == params[0] && !code.contains('+') {
                        match params.get(1).filter(|f| !f.is_empty()) {
                            Some(field) => {
                                output.push(place.get(field.as_str()).cloned().unwrap_or(Value::Null))
                            }
                            None => output.push(place.clone()),
                        }
                    }
                }
            }
        }
        if params.get(2).is_some_and(|p| p == "json") {
            return serde_json::to_string(&output).unwrap_or_default();
        }
        let text: Vec<String> = output
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                Value::Object(map) => map
                    .values()
                    .map(leaf_display)
                    .collect::<Vec<_>>()
                    .join("; "),
                other => leaf_display(other),
            })
            .collect();
        text.join(" | ")
    }

    /// Locality summary: the verbatim locality plus higher geography.
    fn locality(&self, doc: &Value) -> String {
        let verbatim = get_path_str(doc, "location.verbatim_locality");
        if verbatim.is_empty() {
            return String::new();
        }
        let mut lines = vec![verbatim];
        if let Some(places) = iterate_down_path(doc, "location.higher_geography")
            .and_then(Value::as_array)
        {
            for place in places {
                lines.push(format!(
                    "{}: {}",
                    get_path_str(place, "type"),
                    get_path_str(place, "name")
                ));
            }
        }
        lines.join("\n")
    }

    fn point_coords(&self, doc: &Value) -> Option<(f64, f64)> {
        let point = iterate_down_path(doc, "location.point")
            .or_else(|| doc.get("point"))?
            .as_str()?;
        let (lat, lon) = point.split_once(',')?;
        Some((lat.trim().parse().ok()?, lon.trim().parse().ok()?))
    }

    fn lat(&self, doc: &Value, params: &[String]) -> String {
        let Some((lat, _)) = self.point_coords(doc) else {
            return String::new();
        };
        match params.first().map(String::as_str) {
            Some("decimal") => lat.to_string(),
            _ => format_latitude(lat),
        }
    }

    fn lon(&self, doc: &Value, params: &[String]) -> String {
        let Some((_, lon)) = self.point_coords(doc) else {
            return String::new();
        };
        match params.first().map(String::as_str) {
            Some("decimal") => lon.to_string(),
            _ => format_longitude(lon),
        }
    }

    fn lat_lon(&self, doc: &Value) -> String {
        let Some((lat, lon)) = self.point_coords(doc) else {
            return String::new();
        };
        format!("{} {}", format_latitude(lat), format_longitude(lon))
    }

    /// Field value, blanked when it is exactly `'0'`.
    fn null_if_zero(&self, doc: &Value, params: &[String]) -> String {
        if params.len() != 1 {
            return "Incorrect parameters for null_if_zero column configuration".into();
        }
        let value = self.resolve_value(doc, &params[0], None);
        if value == "0" {
            String::new()
        } else {
            value
        }
    }

    /// Media file summary: paths with captions where present.
    fn occurrence_media(&self, doc: &Value) -> String {
        let Some(media) = iterate_down_path(doc, "occurrence.media").and_then(Value::as_array)
        else {
            return String::new();
        };
        let items: Vec<String> = media
            .iter()
            .map(|file| {
                let path = get_path_str(file, "path");
                let caption = get_path_str(file, "caption");
                if caption.is_empty() {
                    path
                } else {
                    format!("{path} ({caption})")
                }
            })
            .collect();
        items.join("; ")
    }
}

fn format_latitude(lat: f64) -> String {
    format!("{:.3}{}", lat.abs(), if lat >= 0.0 { 'N' } else { 'S' })
}

fn format_longitude(lon: f64) -> String {
    format!("{:.3}{}", lon.abs(), if lon >= 0.0 { 'E' } else { 'W' })
}

fn parse_backend_date(text: &str) -> Option<NaiveDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.date_naive());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.date());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

/// Reorders `yyyy-mm-dd hh:mm:ss` timestamps to `dd/mm/yyyy hh:mm`.
fn reformat_timestamp(value: &str) -> String {
    use once_cell::sync::Lazy;
    use regex_lite::Regex;
    static TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^(\d{4})-(\d{2})-(\d{2}) (\d{2}):(\d{2}).*$").unwrap()
    });
    match TIMESTAMP.captures(value) {
        Some(caps) => format!("{}/{}/{} {}:{}", &caps[3], &caps[2], &caps[1], &caps[4], &caps[5]),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolver() -> FieldResolver {
        FieldResolver::new("d/m/Y")
    }

    fn sample_doc() -> Value {
        json!({
            "id": "1234",
            "event": {
                "date_start": "2021-05-03",
                "date_end": "2021-05-03",
                "attributes": [
                    {"id": "12", "value": "cloudy"},
                    {"id": "13", "value": "warm"}
                ]
            },
            "occurrence": {
                "zero_abundance": "false",
                "associations": [
                    {"accepted_name": "Quercus robur", "vernacular_name": "Oak"}
                ],
                "media": [
                    {"path": "p1.jpg", "caption": "adult"}
                ]
            },
            "identification": {
                "verification_status": "V",
                "verification_substatus": "1",
                "query": "",
                "auto_checks": {"enabled": "true", "result": "true", "output": []}
            },
            "metadata": {
                "sensitive": "false",
                "confidential": "false",
                "created_by_id": "27",
                "website": {"id": "3", "title": "iRecord"},
                "survey": {"id": "9", "title": "Moths"},
                "created_on": "2021-05-04 10:30:00"
            },
            "location": {
                "point": "51.507,-0.128",
                "verbatim_locality": "Hyde Park",
                "higher_geography": [
                    {"id": "77", "type": "Vice County", "name": "Surrey", "code": "17"},
                    {"id": "78", "type": "Country", "name": "England", "code": "GB+IE"}
                ]
            }
        })
    }

    #[test]
    fn test_plain_path_resolution() {
        let doc = sample_doc();
        assert_eq!(
            resolver().resolve_value(&doc, "metadata.website.title", None),
            "iRecord"
        );
        assert_eq!(resolver().resolve_value(&doc, "metadata.missing.title", None), "");
    }

    #[test]
    fn test_bucket_filter_path_segment() {
        let doc = json!({
            "attrs": [
                {"id": "1", "value": "first"},
                {"id": "2", "value": "second"}
            ]
        });
        assert_eq!(
            resolver().resolve_value(&doc, "attrs.[id=2].value", None),
            "second"
        );
        assert_eq!(resolver().resolve_value(&doc, "attrs.[id=9].value", None), "");
    }

    #[test]
    fn test_aggregation_leaf_prefers_formatted_value() {
        let doc = json!({"stats": {"first_date": {"value": 1620000000000i64, "value_as_string": "2021-05-03"}}});
        assert_eq!(
            resolver().resolve_value(&doc, "stats.first_date", None),
            "2021-05-03"
        );
    }

    #[test]
    fn test_created_on_reformat() {
        let doc = sample_doc();
        assert_eq!(
            resolver().resolve_value(&doc, "metadata.created_on", None),
            "04/05/2021 10:30"
        );
    }

    #[test]
    fn test_event_date_single_day() {
        let doc = sample_doc();
        assert_eq!(
            resolver().resolve_value(&doc, "#event_date#", None),
            "03/05/2021"
        );
    }

    #[test]
    fn test_event_date_open_ranges() {
        let r = resolver();
        assert_eq!(r.resolve_value(&json!({"event": {}}), "#event_date#", None), "Unknown");
        assert_eq!(
            r.resolve_value(&json!({"event": {"date_end": "2020-01-05"}}), "#event_date#", None),
            "Before 05/01/2020"
        );
        assert_eq!(
            r.resolve_value(&json!({"event": {"date_start": "2020-01-05"}}), "#event_date#", None),
            "After 05/01/2020"
        );
    }

    #[test]
    fn test_attr_value_collects_matches() {
        let doc = sample_doc();
        assert_eq!(
            resolver().resolve_value(&doc, "#attr_value:event:12#", None),
            "cloudy"
        );
        assert_eq!(resolver().resolve_value(&doc, "#attr_value:event:99#", None), "");
    }

    #[test]
    fn test_status_flags_labels() {
        let doc = sample_doc();
        assert_eq!(
            resolver().resolve_value(&doc, "#status_icons#", None),
            "Accepted as correct"
        );
    }

    #[test]
    fn test_higher_geography_filters_combined_areas() {
        let doc = sample_doc();
        assert_eq!(
            resolver().resolve_value(&doc, "#higher_geography:Vice County:name#", None),
            "Surrey"
        );
        // GB+IE is a combined area, so the Country row is skipped.
        assert_eq!(
            resolver().resolve_value(&doc, "#higher_geography:Country:name#", None),
            ""
        );
    }

    #[test]
    fn test_lat_lon_formatting() {
        let doc = sample_doc();
        assert_eq!(
            resolver().resolve_value(&doc, "#lat_lon#", None),
            "51.507N 0.128W"
        );
        assert_eq!(resolver().resolve_value(&doc, "#lat:decimal#", None), "51.507");
    }

    #[test]
    fn test_null_if_zero() {
        let doc = json!({"occurrence": {"organism_quantity": "0"}});
        assert_eq!(
            resolver().resolve_value(&doc, "#null_if_zero:occurrence.organism_quantity#", None),
            ""
        );
    }

    #[test]
    fn test_unknown_special_resolves_empty() {
        let doc = sample_doc();
        assert_eq!(resolver().resolve_value(&doc, "#no_such_field#", None), "");
    }

    #[test]
    fn test_column_def_path_drills_first() {
        let doc = json!({"key": {"taxon-group": "insects"}});
        let col = ColumnDef {
            field: "taxon-group".into(),
            caption: None,
            path: Some("key".into()),
        };
        assert_eq!(
            resolver().resolve_value(&doc, "taxon-group", Some(&col)),
            "insects"
        );
    }

    #[test]
    fn test_keyword_suffix_table() {
        assert_eq!(
            field_with_keyword_suffix("taxon.accepted_name"),
            "taxon.accepted_name.keyword"
        );
        assert_eq!(field_with_keyword_suffix("event.date_start"), "event.date_start");
    }

    #[test]
    fn test_name_conversions() {
        assert_eq!(simple_field_name("#attr_value:event:12#"), "attr_value");
        assert_eq!(composite_key_name("event.date_start"), "event-date_start");
        assert_eq!(readable_key_name("taxon.accepted_name"), "Taxon accepted name");
    }

    #[test]
    fn test_format_date_from_epoch_millis() {
        assert_eq!(
            resolver().format_date(&json!(1614556800000i64)),
            "01/03/2021"
        );
    }
}
