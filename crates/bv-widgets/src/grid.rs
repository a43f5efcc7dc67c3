//! Data grid widget state.
//!
//! Holds everything a grid renderer needs — resolved cell values, the
//! filter row, row selection, pager state — without any rendering.
//! Grids always want fresh data when their source updates, unless they
//! sit on a hidden tab.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;

use bv_core::config::{SourceMode, SourceSnapshot};
use bv_core::events::PageEvent;
use bv_core::protocol::{SearchRequest, SearchResponse};
use bv_core::widget::{FilterRowInput, OutputWidget, PopulateNeed, WidgetClass};
use bv_data::paging::{count_pager_display, pager_display, PagerContext};
use bv_data::{DataSource, PageShared};
use bv_query::{readable_key_name, ColumnDef};

use crate::pager::PagerState;
use crate::rows::{source_data_list, DataRow};

/// One rendered grid row: resolved cell text plus the underlying
/// document, kept for selection-driven filters.
#[derive(Debug, Clone)]
pub struct GridRow {
    pub id: String,
    pub doc: Value,
    pub cells: Vec<String>,
}

struct GridState {
    filter_row: IndexMap<String, String>,
    invalid_inputs: Vec<(String, String)>,
    rows: Vec<GridRow>,
    selected: Option<usize>,
    pager: PagerState,
    loading: bool,
}

/// Tabular output widget.
pub struct DataGrid {
    id: String,
    bindings: Vec<String>,
    columns: Vec<ColumnDef>,
    /// Additional sources this grid's filter row applies to.
    apply_filter_row_to: Vec<String>,
    /// Tab containing this grid, when it is not always visible.
    hidden_tab: RwLock<Option<String>>,
    shared: Arc<PageShared>,
    state: RwLock<GridState>,
}

impl DataGrid {
    pub fn new(
        id: impl Into<String>,
        shared: Arc<PageShared>,
        bindings: impl IntoIterator<Item = impl Into<String>>,
        columns: Vec<ColumnDef>,
    ) -> Self {
        let columns = columns
            .into_iter()
            .map(|mut col| {
                if col.caption.is_none() {
                    col.caption = Some(readable_key_name(&col.field));
                }
                col
            })
            .collect();
        DataGrid {
            id: id.into(),
            bindings: bindings.into_iter().map(Into::into).collect(),
            columns,
            apply_filter_row_to: Vec::new(),
            hidden_tab: RwLock::new(None),
            shared,
            state: RwLock::new(GridState {
                filter_row: IndexMap::new(),
                invalid_inputs: Vec::new(),
                rows: Vec::new(),
                selected: None,
                pager: PagerState::default(),
                loading: false,
            }),
        }
    }

    /// Opts this grid's filter row into additional sources beyond its
    /// own bindings.
    pub fn with_filter_row_sources(
        mut self,
        sources: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.apply_filter_row_to = sources.into_iter().map(Into::into).collect();
        self
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Marks the grid as sitting inside the given tab.
    pub fn set_containing_tab(&self, tab_id: Option<String>) {
        *self.hidden_tab.write() = tab_id;
    }

    /// Sets one filter-row input value. Callers follow up with a page
    /// filter change to repopulate.
    pub fn set_filter_value(&self, field: impl Into<String>, value: impl Into<String>) {
        self.state.write().filter_row.insert(field.into(), value.into());
    }

    pub fn rows(&self) -> Vec<GridRow> {
        self.state.read().rows.clone()
    }

    pub fn selected_row(&self) -> Option<GridRow> {
        let state = self.state.read();
        state.selected.and_then(|idx| state.rows.get(idx).cloned())
    }

    pub fn showing_text(&self) -> String {
        self.state.read().pager.showing_text().to_string()
    }

    pub fn pager(&self) -> (bool, bool, bool) {
        let state = self.state.read();
        state
            .pager
            .display
            .as_ref()
            .map_or((false, false, false), |d| {
                (d.prev_enabled, d.next_enabled, d.buttons_visible)
            })
    }

    pub fn is_loading(&self) -> bool {
        self.state.read().loading
    }

    pub fn invalid_inputs(&self) -> Vec<(String, String)> {
        self.state.read().invalid_inputs.clone()
    }

    pub fn last_count(&self) -> Option<u64> {
        self.state.read().pager.last_count
    }

    /// Selects a row and announces it, feeding any sources filtered by
    /// this grid's selection.
    pub fn select_row(&self, index: usize) {
        let doc = {
            let mut state = self.state.write();
            let Some(row) = state.rows.get(index) else {
                return;
            };
            let doc = row.doc.clone();
            state.selected = Some(index);
            doc
        };
        self.shared.bus.publish(&PageEvent::RowSelected {
            grid_id: self.id.clone(),
            doc: Some(doc),
        });
    }

    pub fn page_next(&self, source: &Arc<DataSource>) {
        self.move_page(source, true);
    }

    pub fn page_previous(&self, source: &Arc<DataSource>) {
        self.move_page(source, false);
    }

    fn move_page(&self, source: &Arc<DataSource>, forward: bool) {
        let (mut composite, rendered) = {
            let state = self.state.read();
            (state.pager.composite.clone(), state.rows.len())
        };
        bv_data::paging::move_page(source, &mut composite, forward, rendered);
        let mut state = self.state.write();
        state.pager.composite.page = composite.page;
        state
            .pager
            .composite
            .page_after_keys
            .extend(composite.page_after_keys);
    }

    fn resolve_cells(&self, row: &DataRow) -> Vec<String> {
        self.columns
            .iter()
            .map(|col| {
                self.shared
                    .resolver
                    .resolve_value(&row.doc, &col.field, Some(col))
            })
            .collect()
    }
}

impl OutputWidget for DataGrid {
    fn id(&self) -> &str {
        &self.id
    }

    fn class(&self) -> WidgetClass {
        WidgetClass::DataGrid
    }

    fn source_bindings(&self) -> Vec<String> {
        self.bindings.clone()
    }

    /// Grids always repopulate when their source updates, deferring
    /// only while hidden inside an inactive tab.
    fn needs_population(&self, _source: &SourceSnapshot) -> PopulateNeed {
        match self.hidden_tab.read().clone() {
            Some(tab_id) => PopulateNeed::WhenVisible { tab_id },
            None => PopulateNeed::Yes,
        }
    }

    fn populate(&self, settings: &SourceSnapshot, response: &SearchResponse, request: &SearchRequest) {
        let after_key = response.composite_after_key().cloned();
        let mut state = self.state.write();
        if settings.mode == SourceMode::CompositeAggregation
            && after_key.is_none()
            && state.pager.composite.page > 0
        {
            // Moved past the last page; revert the attempt.
            state.pager.composite.revert_forward();
            if let Some(display) = state.pager.display.as_mut() {
                display.next_enabled = false;
            }
            return;
        }
        let data = source_data_list(settings.mode, response);
        state.rows = data
            .iter()
            .map(|row| GridRow {
                id: row.id.clone(),
                doc: row.doc.clone(),
                cells: self.resolve_cells(row),
            })
            .collect();
        state.selected = None;
        state.pager.composite.note_after_key(after_key);
        tracing::debug!(grid = %self.id, rows = state.rows.len(), "grid populated");
        let display = pager_display(&PagerContext {
            mode: settings.mode,
            request_from: request.from,
            rendered_items: state.rows.len(),
            response,
            composite_page: state.pager.composite.page,
            aggregation_size: settings.aggregation_size.unwrap_or(0),
            last_count: state.pager.last_count,
        });
        state.pager.apply(display);
    }

    fn set_loading(&self, loading: bool) {
        self.state.write().loading = loading;
    }

    fn filter_row_inputs(&self) -> Vec<FilterRowInput> {
        self.state
            .read()
            .filter_row
            .iter()
            .filter(|(_, value)| !value.trim().is_empty())
            .map(|(field, value)| FilterRowInput {
                widget_id: self.id.clone(),
                field: field.clone(),
                value: value.clone(),
            })
            .collect()
    }

    fn flag_invalid_input(&self, field: &str, reason: &str) {
        self.state
            .write()
            .invalid_inputs
            .push((field.to_string(), reason.to_string()));
    }

    fn clear_invalid_inputs(&self) {
        self.state.write().invalid_inputs.clear();
    }

    fn applies_filter_row_to(&self, source_id: &str) -> bool {
        self.apply_filter_row_to.iter().any(|s| s == source_id)
    }

    fn selected_row_doc(&self) -> Option<Value> {
        self.selected_row().map(|row| row.doc)
    }

    /// Pager update from the dedicated counting aggregation.
    fn update_count(&self, page_size: u64, count: Option<u64>) {
        let mut state = self.state.write();
        let total = count.or(state.pager.last_count);
        let Some(total) = total else {
            return;
        };
        let display = count_pager_display(state.pager.composite.page, page_size, total);
        state.pager.apply(display);
    }
}
