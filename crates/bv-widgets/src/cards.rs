//! Card gallery widget state.
//!
//! The gallery renders the same rows a grid would, one card per
//! document, with a configurable list of fields per card.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use bv_core::config::SourceSnapshot;
use bv_core::events::PageEvent;
use bv_core::protocol::{SearchRequest, SearchResponse};
use bv_core::widget::{OutputWidget, PopulateNeed, WidgetClass};
use bv_data::paging::{move_page, pager_display, PagerContext};
use bv_data::{DataSource, PageShared};
use bv_query::ColumnDef;

use crate::pager::PagerState;
use crate::rows::source_data_list;

/// One rendered card.
#[derive(Debug, Clone)]
pub struct Card {
    pub id: String,
    pub doc: Value,
    /// Resolved field values, in configured order.
    pub lines: Vec<String>,
}

struct GalleryState {
    cards: Vec<Card>,
    selected: Option<usize>,
    pager: PagerState,
    loading: bool,
}

/// Card gallery output widget.
pub struct CardGallery {
    id: String,
    bindings: Vec<String>,
    fields: Vec<ColumnDef>,
    shared: Arc<PageShared>,
    state: RwLock<GalleryState>,
}

impl CardGallery {
    pub fn new(
        id: impl Into<String>,
        shared: Arc<PageShared>,
        bindings: impl IntoIterator<Item = impl Into<String>>,
        fields: Vec<ColumnDef>,
    ) -> Self {
        CardGallery {
            id: id.into(),
            bindings: bindings.into_iter().map(Into::into).collect(),
            fields,
            shared,
            state: RwLock::new(GalleryState {
                cards: Vec::new(),
                selected: None,
                pager: PagerState::default(),
                loading: false,
            }),
        }
    }

    pub fn cards(&self) -> Vec<Card> {
        self.state.read().cards.clone()
    }

    pub fn showing_text(&self) -> String {
        self.state.read().pager.showing_text().to_string()
    }

    /// Selects a card and announces it like a grid row selection.
    pub fn select_card(&self, index: usize) {
        let doc = {
            let mut state = self.state.write();
            let Some(card) = state.cards.get(index) else {
                return;
            };
            let doc = card.doc.clone();
            state.selected = Some(index);
            doc
        };
        self.shared.bus.publish(&PageEvent::RowSelected {
            grid_id: self.id.clone(),
            doc: Some(doc),
        });
    }

    pub fn page_next(&self, source: &Arc<DataSource>) {
        self.turn_page(source, true);
    }

    pub fn page_previous(&self, source: &Arc<DataSource>) {
        self.turn_page(source, false);
    }

    fn turn_page(&self, source: &Arc<DataSource>, forward: bool) {
        let (mut composite, rendered) = {
            let state = self.state.read();
            (state.pager.composite.clone(), state.cards.len())
        };
        move_page(source, &mut composite, forward, rendered);
        let mut state = self.state.write();
        state.pager.composite.page = composite.page;
        state
            .pager
            .composite
            .page_after_keys
            .extend(composite.page_after_keys);
    }
}

impl OutputWidget for CardGallery {
    fn id(&self) -> &str {
        &self.id
    }

    fn class(&self) -> WidgetClass {
        WidgetClass::CardGallery
    }

    fn source_bindings(&self) -> Vec<String> {
        self.bindings.clone()
    }

    fn needs_population(&self, _source: &SourceSnapshot) -> PopulateNeed {
        PopulateNeed::Yes
    }

    fn populate(&self, settings: &SourceSnapshot, response: &SearchResponse, request: &SearchRequest) {
        let data = source_data_list(settings.mode, response);
        let mut state = self.state.write();
        state.cards = data
            .into_iter()
            .map(|row| {
                let lines = self
                    .fields
                    .iter()
                    .map(|col| {
                        self.shared
                            .resolver
                            .resolve_value(&row.doc, &col.field, Some(col))
                    })
                    .collect();
                Card {
                    id: row.id,
                    doc: row.doc,
                    lines,
                }
            })
            .collect();
        state.selected = None;
        state.pager.composite.note_after_key(response.composite_after_key().cloned());
        let display = pager_display(&PagerContext {
            mode: settings.mode,
            request_from: request.from,
            rendered_items: state.cards.len(),
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

    fn selected_row_doc(&self) -> Option<Value> {
        let state = self.state.read();
        state
            .selected
            .and_then(|idx| state.cards.get(idx))
            .map(|card| card.doc.clone())
    }
}
