//! The contract between data sources and the widgets they feed.
//!
//! Output widgets register against a data source once at page
//! initialization and are never removed during the session; a widget
//! that temporarily has nothing to show answers [`PopulateNeed::No`]
//! instead of unsubscribing.

use serde_json::Value;

use crate::config::SourceSnapshot;
use crate::protocol::{SearchRequest, SearchResponse};

/// The closed set of output widget classes a page can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WidgetClass {
    DataGrid,
    CardGallery,
    MapView,
    DownloadControl,
}

impl WidgetClass {
    /// All classes, in the order responses are distributed.
    pub const ALL: [WidgetClass; 4] = [
        WidgetClass::DataGrid,
        WidgetClass::CardGallery,
        WidgetClass::MapView,
        WidgetClass::DownloadControl,
    ];
}

/// A widget's answer to "do you need this source's next response?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopulateNeed {
    Yes,
    No,
    /// The widget sits on a hidden tab; populate once it activates.
    WhenVisible { tab_id: String },
}

/// One filter-row input value contributed by a widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRowInput {
    pub widget_id: String,
    /// Target field name; either a document path or a `#special#` name.
    pub field: String,
    pub value: String,
}

/// Current map viewport, in geographic coordinates plus zoom.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapViewport {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
    pub zoom: u8,
}

/// A resolved row-selection filter: field plus the value extracted from
/// the selected row's document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFilterValue {
    pub field: String,
    pub value: String,
}

/// Contract every output widget class implements.
///
/// `populate` renders the latest data; the remaining methods let the
/// engine gather the widget's contribution to the next request. The
/// provider methods default to "contributes nothing" so each class only
/// overrides what it actually supplies.
pub trait OutputWidget: Send + Sync {
    fn id(&self) -> &str;

    fn class(&self) -> WidgetClass;

    /// Identifiers of the data sources this widget consumes.
    fn source_bindings(&self) -> Vec<String>;

    /// Whether this widget currently requires a refresh.
    fn needs_population(&self, source: &SourceSnapshot) -> PopulateNeed;

    /// Render the latest response for one of this widget's sources.
    fn populate(&self, settings: &SourceSnapshot, response: &SearchResponse, request: &SearchRequest);

    /// Show or hide the widget's loading indicator.
    fn set_loading(&self, _loading: bool) {}

    /// Filter-row input values this widget currently holds.
    fn filter_row_inputs(&self) -> Vec<FilterRowInput> {
        Vec::new()
    }

    /// Mark one of this widget's filter inputs as unparseable.
    fn flag_invalid_input(&self, _field: &str, _reason: &str) {}

    /// Clear any invalid-input markers before a fresh compile.
    fn clear_invalid_inputs(&self) {}

    /// True when this widget opted in to applying its filter row to the
    /// given source beyond its own bindings.
    fn applies_filter_row_to(&self, _source_id: &str) -> bool {
        false
    }

    /// Document of the currently selected row, for grids.
    fn selected_row_doc(&self) -> Option<Value> {
        None
    }

    /// Current viewport, for maps.
    fn viewport(&self) -> Option<MapViewport> {
        None
    }

    /// Deliver a supplementary exact row count for the pager.
    /// `count` is `None` when the cached count is still valid and only
    /// the page location changed.
    fn update_count(&self, _page_size: u64, _count: Option<u64>) {}
}
