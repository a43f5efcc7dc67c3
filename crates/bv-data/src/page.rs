//! Page context: the constructed registry of sources and widgets.
//!
//! Replaces ambient page-global state with one object that owns the
//! event bus, the page-level filter inputs and the source/widget
//! registry, with an explicit initialization (hookup) and teardown
//! lifecycle. A configuration error during hookup disables only the
//! affected source; siblings keep working.

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tracing::warn;

use bv_core::config::{ConfigError, SourceConfig};
use bv_core::events::{EventBus, EventKind, PageEvent, SubscriptionId};
use bv_core::widget::{MapViewport, OutputWidget, RowFilterValue, WidgetClass};
use bv_query::filter::{
    FieldMappingType, ParameterControl, PermissionsSelection, QueryContext, UserFilterSelection,
};
use bv_query::FieldResolver;

use crate::fetch::SearchClient;
use crate::source::DataSource;

/// Static page configuration supplied at construction.
pub struct PageSettings {
    pub user_id: Option<String>,
    pub group_id: Option<String>,
    /// Query-string parameters of the page URL.
    pub url_params: Vec<(String, String)>,
    /// Display date format, `d`/`m`/`Y` placeholders.
    pub date_format: String,
    /// Backend mapping types, used to route filter-row input.
    pub field_types: AHashMap<String, FieldMappingType>,
}

impl Default for PageSettings {
    fn default() -> Self {
        PageSettings {
            user_id: None,
            group_id: None,
            url_params: Vec::new(),
            date_format: "d/m/Y".into(),
            field_types: AHashMap::new(),
        }
    }
}

/// State shared between the page context and its data sources.
pub struct PageShared {
    pub bus: EventBus,
    pub resolver: FieldResolver,
    user_id: Option<String>,
    group_id: Option<String>,
    url_params: Vec<(String, String)>,
    field_types: Arc<AHashMap<String, FieldMappingType>>,
    saved_filter: RwLock<Option<Map<String, Value>>>,
    parameter_controls: RwLock<Vec<ParameterControl>>,
    user_filter_ids: RwLock<Vec<String>>,
    permissions_selection: RwLock<Option<PermissionsSelection>>,
    /// User filters already sent this session; the backend refreshes
    /// its cached definition the first time each one is used.
    loaded_user_filters: Mutex<AHashSet<String>>,
    widgets: RwLock<Vec<Arc<dyn OutputWidget>>>,
}

impl PageShared {
    fn new(settings: PageSettings) -> Self {
        PageShared {
            bus: EventBus::new(),
            resolver: FieldResolver::new(settings.date_format),
            user_id: settings.user_id,
            group_id: settings.group_id,
            url_params: settings.url_params,
            field_types: Arc::new(settings.field_types),
            saved_filter: RwLock::new(None),
            parameter_controls: RwLock::new(Vec::new()),
            user_filter_ids: RwLock::new(Vec::new()),
            permissions_selection: RwLock::new(None),
            loaded_user_filters: Mutex::new(AHashSet::new()),
            widgets: RwLock::new(Vec::new()),
        }
    }

    pub fn set_saved_filter(&self, filter: Option<Map<String, Value>>) {
        *self.saved_filter.write() = filter;
    }

    pub fn set_parameter_controls(&self, controls: Vec<ParameterControl>) {
        *self.parameter_controls.write() = controls;
    }

    pub fn set_user_filter_ids(&self, ids: Vec<String>) {
        *self.user_filter_ids.write() = ids;
    }

    /// Parses and stores the permissions-scope selector value.
    pub fn set_permissions_selection(&self, raw: Option<&str>) {
        let parsed = raw.and_then(|value| {
            let parsed = PermissionsSelection::parse(value);
            if parsed.is_none() {
                warn!(%value, "unrecognized permissions selection ignored");
            }
            parsed
        });
        *self.permissions_selection.write() = parsed;
    }

    pub fn widget_by_id(&self, id: &str) -> Option<Arc<dyn OutputWidget>> {
        self.widgets.read().iter().find(|w| w.id() == id).cloned()
    }

    pub(crate) fn add_widget(&self, widget: Arc<dyn OutputWidget>) {
        self.widgets.write().push(widget);
    }

    pub(crate) fn widgets(&self) -> Vec<Arc<dyn OutputWidget>> {
        self.widgets.read().clone()
    }

    pub(crate) fn clear_widgets(&self) {
        self.widgets.write().clear();
    }

    /// Gathers the page-level filter state for one compile: the filter
    /// rows of the source's grids (plus grids that opted in), the
    /// page filters and the bounding map's viewport.
    pub(crate) fn gather(
        &self,
        cfg: &SourceConfig,
        consumers: &[Arc<dyn OutputWidget>],
        bounds_map: Option<&str>,
    ) -> GatheredContext {
        let mut filter_rows = Vec::new();
        let mut seen: AHashSet<String> = AHashSet::new();
        for widget in consumers {
            if widget.class() == WidgetClass::DataGrid && seen.insert(widget.id().to_string()) {
                filter_rows.extend(widget.filter_row_inputs());
            }
        }
        for widget in self.widgets.read().iter() {
            if widget.applies_filter_row_to(&cfg.id) && seen.insert(widget.id().to_string()) {
                filter_rows.extend(widget.filter_row_inputs());
            }
        }

        let viewport = bounds_map
            .and_then(|map_id| self.widget_by_id(map_id))
            .and_then(|widget| widget.viewport());

        let mut user_filters = Vec::new();
        {
            let mut loaded = self.loaded_user_filters.lock();
            for id in self.user_filter_ids.read().iter() {
                user_filters.push(UserFilterSelection {
                    id: id.clone(),
                    needs_refresh: loaded.insert(id.clone()),
                });
            }
        }
        let permissions = match self.permissions_selection.read().clone() {
            Some(PermissionsSelection::Filter(mut selection)) => {
                selection.needs_refresh = self
                    .loaded_user_filters
                    .lock()
                    .insert(selection.id.clone());
                Some(PermissionsSelection::Filter(selection))
            }
            other => other,
        };

        GatheredContext {
            filter_rows,
            url_params: self.url_params.clone(),
            saved_filter: self.saved_filter.read().clone(),
            parameter_controls: self.parameter_controls.read().clone(),
            user_filters,
            permissions,
            group_id: self.group_id.clone(),
            user_id: self.user_id.clone(),
            viewport,
            field_types: Arc::clone(&self.field_types),
        }
    }
}

/// Owned snapshot of the page filter state, borrowed by the compiler.
pub(crate) struct GatheredContext {
    filter_rows: Vec<bv_core::widget::FilterRowInput>,
    url_params: Vec<(String, String)>,
    saved_filter: Option<Map<String, Value>>,
    parameter_controls: Vec<ParameterControl>,
    user_filters: Vec<UserFilterSelection>,
    permissions: Option<PermissionsSelection>,
    group_id: Option<String>,
    user_id: Option<String>,
    viewport: Option<MapViewport>,
    field_types: Arc<AHashMap<String, FieldMappingType>>,
}

impl GatheredContext {
    pub(crate) fn as_query_context(&self) -> QueryContext<'_> {
        QueryContext {
            filter_rows: self.filter_rows.clone(),
            url_params: &self.url_params,
            saved_filter: self.saved_filter.as_ref(),
            parameter_controls: &self.parameter_controls,
            user_filters: &self.user_filters,
            permissions: self.permissions.as_ref(),
            group_id: self.group_id.as_deref(),
            user_id: self.user_id.as_deref(),
            viewport: self.viewport,
            field_types: &self.field_types,
        }
    }
}

/// The page's registry of data sources and output widgets.
pub struct PageContext {
    shared: Arc<PageShared>,
    client: Arc<dyn SearchClient>,
    sources: IndexMap<String, Arc<DataSource>>,
    subscriptions: Vec<SubscriptionId>,
}

impl PageContext {
    pub fn new(client: Arc<dyn SearchClient>, settings: PageSettings) -> Self {
        PageContext {
            shared: Arc::new(PageShared::new(settings)),
            client,
            sources: IndexMap::new(),
            subscriptions: Vec::new(),
        }
    }

    pub fn shared(&self) -> &Arc<PageShared> {
        &self.shared
    }

    pub fn bus(&self) -> &EventBus {
        &self.shared.bus
    }

    /// Creates a data source from validated configuration.
    pub fn add_source(&mut self, cfg: SourceConfig) -> Result<Arc<DataSource>, ConfigError> {
        if self.sources.contains_key(&cfg.id) {
            return Err(ConfigError::DuplicateSource(cfg.id));
        }
        let source = DataSource::new(cfg, Arc::clone(&self.client), Arc::clone(&self.shared));
        self.sources.insert(source.id().to_string(), Arc::clone(&source));
        Ok(source)
    }

    pub fn register_widget(&mut self, widget: Arc<dyn OutputWidget>) {
        self.shared.add_widget(widget);
    }

    pub fn source(&self, id: &str) -> Option<&Arc<DataSource>> {
        self.sources.get(id)
    }

    pub fn sources(&self) -> impl Iterator<Item = &Arc<DataSource>> {
        self.sources.values()
    }

    /// Hooks sources up to their widgets: resolves consumer lists,
    /// validates map-mode links, and wires row-selection, map-move and
    /// filter-change subscriptions. Returns the configuration errors
    /// encountered; each disables only its own source.
    pub fn init(&mut self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let widgets = self.shared.widgets();
        let sources: Vec<Arc<DataSource>> = self.sources.values().cloned().collect();
        for source in &sources {
            for widget in &widgets {
                if widget.source_bindings().iter().any(|b| b == source.id()) {
                    source.register_consumer(Arc::clone(widget));
                }
            }

            // Map-driven sources need a map to take their bounds from.
            if source.config().mode().is_map() && source.bounds_map().is_none() {
                let linked_map = source
                    .consumers()
                    .iter()
                    .find(|w| w.class() == WidgetClass::MapView)
                    .map(|w| w.id().to_string());
                match linked_map {
                    Some(map_id) => source.set_bounds_map(map_id),
                    None => {
                        source.set_disabled();
                        errors.push(ConfigError::MissingLinkedMap(source.id().to_string()));
                        continue;
                    }
                }
            }
            if let Some(map_id) = source.bounds_map() {
                if self.shared.widget_by_id(&map_id).is_none() {
                    source.set_disabled();
                    errors.push(ConfigError::UnknownWidget(source.id().to_string(), map_id));
                    continue;
                }
                self.wire_map_moves(source, map_id);
            }
            self.wire_row_filters(source);
            self.wire_filter_changes(source);
        }
        errors
    }

    fn wire_row_filters(&mut self, source: &Arc<DataSource>) {
        for binding in source.config().row_filters.clone() {
            let weak = Arc::downgrade(source);
            let shared = Arc::clone(&self.shared);
            let subscription = self.shared.bus.subscribe(EventKind::RowSelected, move |event| {
                let PageEvent::RowSelected { grid_id, doc } = event else {
                    return;
                };
                if *grid_id != binding.grid_id {
                    return;
                }
                // Deselection keeps the previous filter; only a selected
                // row updates it.
                let Some(doc) = doc else {
                    return;
                };
                let Some(source) = weak.upgrade() else {
                    return;
                };
                let value = shared.resolver.resolve_value(doc, &binding.source_field, None);
                source.set_row_filter(Some(RowFilterValue {
                    field: binding.filter_field.clone(),
                    value,
                }));
                source.populate(false, None);
            });
            self.subscriptions.push(subscription);
        }
    }

    fn wire_map_moves(&mut self, source: &Arc<DataSource>, map_id: String) {
        let weak = Arc::downgrade(source);
        let subscription = self.shared.bus.subscribe(EventKind::MapMoved, move |event| {
            let PageEvent::MapMoved { map_id: moved } = event else {
                return;
            };
            if *moved != map_id {
                return;
            }
            if let Some(source) = weak.upgrade() {
                source.populate(false, None);
            }
        });
        self.subscriptions.push(subscription);
    }

    fn wire_filter_changes(&mut self, source: &Arc<DataSource>) {
        let weak = Arc::downgrade(source);
        let subscription = self
            .shared
            .bus
            .subscribe(EventKind::FiltersChanged, move |_| {
                if let Some(source) = weak.upgrade() {
                    // Back to the first page for the new filter state.
                    source.set_from(0);
                    source.populate(false, None);
                }
            });
        self.subscriptions.push(subscription);
    }

    /// Initial population of every source.
    pub fn populate_all(&self) {
        for source in self.sources.values() {
            source.populate(false, None);
        }
    }

    /// Announces a page-level filter change; every source resets to
    /// its first page and repopulates.
    pub fn filters_changed(&self) {
        self.shared.bus.publish(&PageEvent::FiltersChanged);
    }

    /// Drops all subscriptions, sources and widgets.
    pub fn teardown(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            self.shared.bus.unsubscribe(subscription);
        }
        self.sources.clear();
        self.shared.clear_widgets();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use bv_core::config::{DocsConfig, GeoHashConfig, ModeConfig};
    use bv_core::widget::FilterRowInput;

    use crate::fetch::SearchClient;
    use crate::testutil::{settle, MockClient, TestGrid, TestMap};

    fn page_with_client() -> (PageContext, std::sync::Arc<MockClient>) {
        let client = MockClient::new();
        let page =
            PageContext::new(client.clone() as Arc<dyn SearchClient>, PageSettings::default());
        (page, client)
    }

    #[test]
    fn test_duplicate_source_rejected() {
        let (mut page, _client) = page_with_client();
        page.add_source(
            SourceConfig::new("records", ModeConfig::Docs(DocsConfig::default())).unwrap(),
        )
        .unwrap();
        assert!(matches!(
            page.add_source(
                SourceConfig::new("records", ModeConfig::Docs(DocsConfig::default())).unwrap()
            ),
            Err(ConfigError::DuplicateSource(_))
        ));
    }

    #[tokio::test]
    async fn test_map_mode_without_linked_map_disables_source_only() {
        let (mut page, client) = page_with_client();
        let grid = TestGrid::new("grid-1", &["hashes", "records"]);
        page.register_widget(grid.clone());
        let broken = page
            .add_source(
                SourceConfig::new(
                    "hashes",
                    ModeConfig::MapGeoHash(GeoHashConfig {
                        aggregation: json!({"cells": {"geohash_grid": {"field": "location.point", "precision": 4}}}),
                    }),
                )
                .unwrap(),
            )
            .unwrap();
        let sibling = page
            .add_source(
                SourceConfig::new("records", ModeConfig::Docs(DocsConfig::default())).unwrap(),
            )
            .unwrap();
        let errors = page.init();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ConfigError::MissingLinkedMap(_)));
        // The broken source stays quiet; the sibling keeps working.
        broken.populate(false, None);
        sibling.populate(false, None);
        settle().await;
        assert_eq!(client.request_count(), 1);
    }

    #[tokio::test]
    async fn test_opted_in_grid_contributes_filter_row() {
        let (mut page, _client) = page_with_client();
        let consumer = TestGrid::new("grid-1", &["records"]);
        let opted_in = TestGrid::new("grid-2", &["other"]);
        opted_in.optin_sources.write().push("records".into());
        opted_in.filter_rows.write().push(FilterRowInput {
            widget_id: "grid-2".into(),
            field: "taxon.genus".into(),
            value: "Bombus".into(),
        });
        page.register_widget(consumer.clone());
        page.register_widget(opted_in.clone());
        let source = page
            .add_source(
                SourceConfig::new("records", ModeConfig::Docs(DocsConfig::default())).unwrap(),
            )
            .unwrap();
        assert!(page.init().is_empty());
        let request = source.build_request(false).request.unwrap();
        // Without a mapping entry the input routes as a numeric filter.
        assert_eq!(
            request.numeric_filters.get("taxon.genus"),
            Some(&"Bombus".to_string())
        );
    }

    #[tokio::test]
    async fn test_bounding_map_viewport_reaches_compile() {
        let (mut page, client) = page_with_client();
        let map = TestMap::new(
            "map-1",
            &["records"],
            bv_core::widget::MapViewport {
                north: 53.0,
                south: 51.0,
                east: 1.0,
                west: -1.0,
                zoom: 8,
            },
        );
        page.register_widget(map.clone());
        let mut cfg =
            SourceConfig::new("records", ModeConfig::Docs(DocsConfig::default())).unwrap();
        cfg.filter_bounds_using_map = Some("map-1".into());
        let source = page.add_source(cfg).unwrap();
        assert!(page.init().is_empty());
        source.populate(false, None);
        settle().await;
        assert_eq!(client.request_count(), 1);
        let request = client.requests.lock()[0].clone();
        let bounds = request.bool_queries[0].value.as_ref().unwrap().clone();
        assert_eq!(bounds["location.point"]["top_left"]["lat"], json!(53.0));

        // A pan re-populates bounded sources.
        map.viewport.write().north = 54.0;
        page.bus().publish(&PageEvent::MapMoved {
            map_id: "map-1".into(),
        });
        settle().await;
        assert_eq!(client.request_count(), 2);
    }

    #[test]
    fn test_user_filter_refresh_marked_once() {
        let (mut page, _client) = page_with_client();
        let grid = TestGrid::new("grid-1", &["records"]);
        page.register_widget(grid.clone());
        let source = page
            .add_source(
                SourceConfig::new("records", ModeConfig::Docs(DocsConfig::default())).unwrap(),
            )
            .unwrap();
        assert!(page.init().is_empty());
        page.shared().set_user_filter_ids(vec!["17".into()]);
        let first = source.build_request(false).request.unwrap();
        assert!(first.refresh_user_filters);
        assert_eq!(first.user_filters, vec!["17".to_string()]);
        let second = source.build_request(false).request.unwrap();
        assert!(!second.refresh_user_filters);
    }
}
