//! Test doubles for the engine tests: a scripted search client and
//! minimal consumer widgets.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::json;

use bv_core::config::SourceSnapshot;
use bv_core::protocol::{SearchRequest, SearchResponse};
use bv_core::widget::{
    FilterRowInput, MapViewport, OutputWidget, PopulateNeed, WidgetClass,
};

use crate::fetch::{FetchError, SearchClient};

pub enum ScriptedResponse {
    Ok(SearchResponse),
    Err(FetchError),
    /// Never completes; stands in for a slow request to abort.
    Hang,
}

/// Search client answering from a scripted queue; an empty queue
/// returns an empty successful response.
pub struct MockClient {
    pub requests: Mutex<Vec<SearchRequest>>,
    responses: Mutex<VecDeque<ScriptedResponse>>,
}

impl MockClient {
    pub fn new() -> Arc<Self> {
        Arc::new(MockClient {
            requests: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
        })
    }

    pub fn push_response(&self, response: ScriptedResponse) {
        self.responses.lock().push_back(response);
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn empty_response() -> SearchResponse {
        serde_json::from_value(json!({"hits": {"total": 0, "hits": []}})).unwrap()
    }
}

#[async_trait]
impl SearchClient for MockClient {
    async fn search(
        &self,
        request: &SearchRequest,
        _filter_path: Option<&str>,
    ) -> Result<SearchResponse, FetchError> {
        self.requests.lock().push(request.clone());
        let scripted = self.responses.lock().pop_front();
        match scripted {
            None => Ok(Self::empty_response()),
            Some(ScriptedResponse::Ok(response)) => Ok(response),
            Some(ScriptedResponse::Err(error)) => Err(error),
            Some(ScriptedResponse::Hang) => std::future::pending().await,
        }
    }
}

/// Grid stand-in recording everything the engine pushes at it.
pub struct TestGrid {
    id: String,
    bindings: Vec<String>,
    pub need: RwLock<PopulateNeed>,
    pub filter_rows: RwLock<Vec<FilterRowInput>>,
    pub optin_sources: RwLock<Vec<String>>,
    populate_count: AtomicUsize,
    pub last_response: Mutex<Option<SearchResponse>>,
    pub counts: Mutex<Vec<(u64, Option<u64>)>>,
    pub loading: RwLock<bool>,
    pub flagged: Mutex<Vec<(String, String)>>,
}

impl TestGrid {
    pub fn new(id: &str, bindings: &[&str]) -> Arc<Self> {
        Arc::new(TestGrid {
            id: id.to_string(),
            bindings: bindings.iter().map(|b| b.to_string()).collect(),
            need: RwLock::new(PopulateNeed::Yes),
            filter_rows: RwLock::new(Vec::new()),
            optin_sources: RwLock::new(Vec::new()),
            populate_count: AtomicUsize::new(0),
            last_response: Mutex::new(None),
            counts: Mutex::new(Vec::new()),
            loading: RwLock::new(false),
            flagged: Mutex::new(Vec::new()),
        })
    }

    pub fn populate_count(&self) -> usize {
        self.populate_count.load(Ordering::SeqCst)
    }
}

impl OutputWidget for TestGrid {
    fn id(&self) -> &str {
        &self.id
    }

    fn class(&self) -> WidgetClass {
        WidgetClass::DataGrid
    }

    fn source_bindings(&self) -> Vec<String> {
        self.bindings.clone()
    }

    fn needs_population(&self, _source: &SourceSnapshot) -> PopulateNeed {
        self.need.read().clone()
    }

    fn populate(
        &self,
        _settings: &SourceSnapshot,
        response: &SearchResponse,
        _request: &SearchRequest,
    ) {
        self.populate_count.fetch_add(1, Ordering::SeqCst);
        *self.last_response.lock() = Some(response.clone());
    }

    fn set_loading(&self, loading: bool) {
        *self.loading.write() = loading;
    }

    fn filter_row_inputs(&self) -> Vec<FilterRowInput> {
        self.filter_rows.read().clone()
    }

    fn flag_invalid_input(&self, field: &str, reason: &str) {
        self.flagged.lock().push((field.to_string(), reason.to_string()));
    }

    fn applies_filter_row_to(&self, source_id: &str) -> bool {
        self.optin_sources.read().iter().any(|s| s == source_id)
    }

    fn update_count(&self, page_size: u64, count: Option<u64>) {
        self.counts.lock().push((page_size, count));
    }
}

/// Map stand-in exposing a viewport.
pub struct TestMap {
    id: String,
    bindings: Vec<String>,
    pub viewport: RwLock<MapViewport>,
    pub layer_enabled: RwLock<bool>,
}

impl TestMap {
    pub fn new(id: &str, bindings: &[&str], viewport: MapViewport) -> Arc<Self> {
        Arc::new(TestMap {
            id: id.to_string(),
            bindings: bindings.iter().map(|b| b.to_string()).collect(),
            viewport: RwLock::new(viewport),
            layer_enabled: RwLock::new(true),
        })
    }
}

impl OutputWidget for TestMap {
    fn id(&self) -> &str {
        &self.id
    }

    fn class(&self) -> WidgetClass {
        WidgetClass::MapView
    }

    fn source_bindings(&self) -> Vec<String> {
        self.bindings.clone()
    }

    fn needs_population(&self, _source: &SourceSnapshot) -> PopulateNeed {
        if *self.layer_enabled.read() {
            PopulateNeed::Yes
        } else {
            PopulateNeed::No
        }
    }

    fn populate(
        &self,
        _settings: &SourceSnapshot,
        _response: &SearchResponse,
        _request: &SearchRequest,
    ) {
    }

    fn viewport(&self) -> Option<MapViewport> {
        Some(*self.viewport.read())
    }
}

/// Lets spawned fetch tasks run to completion on the test runtime.
pub async fn settle() {
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }
}
