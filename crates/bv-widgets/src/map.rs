//! Map widget state.
//!
//! Tracks the viewport, the layers bound to data sources, and the
//! features extracted from geo aggregation buckets. Tile and marker
//! rendering belong to the embedding application; this state is what a
//! renderer reads.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex_lite::Regex;
use serde_json::Value;

use bv_core::config::{GridSquareSize, SourceSnapshot};
use bv_core::events::PageEvent;
use bv_core::protocol::{find_value, SearchRequest, SearchResponse};
use bv_core::widget::{MapViewport, OutputWidget, PopulateNeed, WidgetClass};
use bv_data::PageShared;
use bv_query::aggregation::{auto_square_field, grid_square_size_m};

/// A source-bound map layer that can be toggled off.
#[derive(Debug, Clone)]
pub struct MapLayer {
    pub source_id: String,
    pub enabled: bool,
}

/// One plottable feature from an aggregation bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct MapFeature {
    pub lat: f64,
    pub lon: f64,
    pub doc_count: u64,
    /// Bucket metric scaled against the page maximum, 0..=20000.
    pub metric: u64,
    pub key: String,
}

struct MapState {
    viewport: MapViewport,
    layers: Vec<MapLayer>,
    features: Vec<MapFeature>,
    loading: bool,
}

/// Map output widget.
pub struct MapView {
    id: String,
    shared: Arc<PageShared>,
    state: RwLock<MapState>,
}

impl MapView {
    pub fn new(
        id: impl Into<String>,
        shared: Arc<PageShared>,
        viewport: MapViewport,
        layers: Vec<MapLayer>,
    ) -> Self {
        MapView {
            id: id.into(),
            shared,
            state: RwLock::new(MapState {
                viewport,
                layers,
                features: Vec::new(),
                loading: false,
            }),
        }
    }

    /// Updates the viewport after a pan or zoom and announces the move
    /// so bounded sources refetch.
    pub fn set_viewport(&self, viewport: MapViewport) {
        self.state.write().viewport = viewport;
        self.shared.bus.publish(&PageEvent::MapMoved {
            map_id: self.id.clone(),
        });
    }

    pub fn set_layer_enabled(&self, source_id: &str, enabled: bool) {
        let mut state = self.state.write();
        for layer in state.layers.iter_mut() {
            if layer.source_id == source_id {
                layer.enabled = enabled;
            }
        }
    }

    pub fn features(&self) -> Vec<MapFeature> {
        self.state.read().features.clone()
    }

    /// Grid-square field appropriate to the current zoom.
    pub fn auto_square_field(&self) -> String {
        auto_square_field(self.state.read().viewport.zoom)
    }

    /// Grid-square size for the current zoom, in metres.
    pub fn auto_square_size_m(&self) -> u64 {
        grid_square_size_m(GridSquareSize::Auto, self.state.read().viewport.zoom)
    }
}

/// Coordinate-pair bucket keys look like `lon lat`.
static COORD_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(-?\d+\.\d+) (-?\d+\.\d+)$").unwrap());

/// Extracts plottable features from geo aggregation buckets, scaling
/// each bucket's metric against the page maximum.
fn extract_features(aggregations: &Value) -> Vec<MapFeature> {
    let Some(buckets) = find_value(aggregations, "buckets").and_then(Value::as_array) else {
        return Vec::new();
    };
    // Inner buckets where present (an outer filter aggregation wraps
    // the geo buckets), otherwise the buckets themselves.
    let candidates: Vec<&Value> = buckets
        .iter()
        .flat_map(|bucket| {
            match find_value(bucket, "buckets").and_then(Value::as_array) {
                Some(inner) => inner.iter().collect::<Vec<_>>(),
                None => vec![bucket],
            }
        })
        .collect();

    let max_metric = candidates
        .iter()
        .filter_map(|b| b.get("doc_count").and_then(Value::as_u64))
        .map(|count| (count as f64).sqrt())
        .fold(10.0_f64, f64::max);

    candidates
        .iter()
        .filter_map(|bucket| {
            let key = bucket.get("key")?.as_str()?;
            let caps = COORD_KEY.captures(key)?;
            let lon: f64 = caps[1].parse().ok()?;
            let lat: f64 = caps[2].parse().ok()?;
            let doc_count = bucket.get("doc_count").and_then(Value::as_u64).unwrap_or(0);
            let metric = ((doc_count as f64).sqrt() / max_metric * 20_000.0).round() as u64;
            Some(MapFeature {
                lat,
                lon,
                doc_count,
                metric,
                key: key.to_string(),
            })
        })
        .collect()
}

impl OutputWidget for MapView {
    fn id(&self) -> &str {
        &self.id
    }

    fn class(&self) -> WidgetClass {
        WidgetClass::MapView
    }

    fn source_bindings(&self) -> Vec<String> {
        self.state
            .read()
            .layers
            .iter()
            .map(|layer| layer.source_id.clone())
            .collect()
    }

    /// Maps repopulate from a source only while a bound layer is
    /// enabled.
    fn needs_population(&self, source: &SourceSnapshot) -> PopulateNeed {
        let state = self.state.read();
        let enabled = state
            .layers
            .iter()
            .any(|layer| layer.source_id == source.id && layer.enabled);
        if enabled {
            PopulateNeed::Yes
        } else {
            PopulateNeed::No
        }
    }

    fn populate(&self, _settings: &SourceSnapshot, response: &SearchResponse, _request: &SearchRequest) {
        let features = response
            .aggregations
            .as_ref()
            .map(extract_features)
            .unwrap_or_default();
        self.state.write().features = features;
    }

    fn set_loading(&self, loading: bool) {
        self.state.write().loading = loading;
    }

    fn viewport(&self) -> Option<MapViewport> {
        Some(self.state.read().viewport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_feature_extraction_scales_metric() {
        let aggregations = json!({
            "filtered": {
                "by_square": {
                    "buckets": [
                        {"key": "-1.50000 52.50000", "doc_count": 400},
                        {"key": "-1.60000 52.60000", "doc_count": 100},
                        {"key": "not-a-coordinate", "doc_count": 9}
                    ]
                }
            }
        });
        let features = extract_features(&aggregations);
        assert_eq!(features.len(), 2);
        assert_eq!(features[0].lon, -1.5);
        assert_eq!(features[0].lat, 52.5);
        // sqrt(400)=20 is the page max, so the first bucket gets the
        // full metric and the second half of it.
        assert_eq!(features[0].metric, 20_000);
        assert_eq!(features[1].metric, 10_000);
    }

    #[test]
    fn test_feature_extraction_handles_flat_buckets() {
        let aggregations = json!({
            "by_square": {
                "buckets": [
                    {"key": "0.10000 51.20000", "doc_count": 4}
                ]
            }
        });
        let features = extract_features(&aggregations);
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].doc_count, 4);
    }
}
