//! Data sources.
//!
//! A [`DataSource`] owns one logical dataset: its mode configuration,
//! the consumers registered against it, the pagination cursor and the
//! fingerprint of the last issued request. `populate` runs the fetch
//! protocol: plan the aggregation, compile the request, deduplicate,
//! fetch, distribute, and optionally issue a supplementary count
//! request. A new fetch supersedes and aborts any still-in-flight one
//! for the same source, so a stale response can never overwrite a
//! fresher one.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use bv_core::config::{ModeConfig, SourceConfig, SourceMode, SourceSnapshot};
use bv_core::events::{EventKind, PageEvent, SubscriptionId};
use bv_core::protocol::{find_value, find_value_mut, SearchRequest, SearchResponse};
use bv_core::widget::{OutputWidget, PopulateNeed, RowFilterValue, WidgetClass};
use bv_query::filter::{compile, CompileOutcome, SourceRuntime};
use bv_query::{plan_composite, plan_term, DOWNLOAD_COMPOSITE_PAGE_SIZE};

use crate::dedup::{fingerprint, RequestDeduplicator};
use crate::distribute::{build_pivot_tables, distribute};
use crate::fetch::{FetchError, SearchClient};
use crate::page::PageShared;

/// Populate lifecycle of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Idle,
    AwaitingResponse,
    AwaitingCountResponse,
}

struct SourceState {
    status: SourceStatus,
    disabled: bool,
    from: u64,
    size: Option<u64>,
    aggregation_size: Option<u64>,
    planned_aggs: Option<Value>,
    after_key: Option<Value>,
    row_filter: Option<RowFilterValue>,
    dedup: RequestDeduplicator,
    count_dedup: RequestDeduplicator,
    geoms_too_close: bool,
    /// Map widget whose viewport bounds this source, resolved at hookup.
    bounds_map: Option<String>,
    /// Hidden tabs with a populate armed for their activation.
    armed_tabs: AHashMap<String, SubscriptionId>,
    /// Temporary mode override while a download runs.
    prepared_mode: Option<SourceMode>,
}

/// One logical dataset and its fetch state machine.
pub struct DataSource {
    cfg: SourceConfig,
    client: Arc<dyn SearchClient>,
    shared: Arc<PageShared>,
    consumers: RwLock<Vec<Arc<dyn OutputWidget>>>,
    state: RwLock<SourceState>,
    inflight: Mutex<Option<AbortHandle>>,
}

impl DataSource {
    pub fn new(
        cfg: SourceConfig,
        client: Arc<dyn SearchClient>,
        shared: Arc<PageShared>,
    ) -> Arc<Self> {
        let bounds_map = cfg.filter_bounds_using_map.clone();
        Arc::new(DataSource {
            cfg,
            client,
            shared,
            consumers: RwLock::new(Vec::new()),
            state: RwLock::new(SourceState {
                status: SourceStatus::Idle,
                disabled: false,
                from: 0,
                size: None,
                aggregation_size: None,
                planned_aggs: None,
                after_key: None,
                row_filter: None,
                dedup: RequestDeduplicator::new(),
                count_dedup: RequestDeduplicator::new(),
                geoms_too_close: false,
                bounds_map,
                armed_tabs: AHashMap::new(),
                prepared_mode: None,
            }),
            inflight: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.cfg.id
    }

    pub fn config(&self) -> &SourceConfig {
        &self.cfg
    }

    /// The mode requests are currently built in; downloads may prepare
    /// a temporary override.
    pub fn mode(&self) -> SourceMode {
        self.state
            .read()
            .prepared_mode
            .unwrap_or_else(|| self.cfg.mode())
    }

    pub fn status(&self) -> SourceStatus {
        self.state.read().status
    }

    pub fn from(&self) -> u64 {
        self.state.read().from
    }

    pub fn set_from(&self, from: u64) {
        self.state.write().from = from;
    }

    pub fn size(&self) -> Option<u64> {
        let state = self.state.read();
        state.size.or(self.cfg.size)
    }

    pub fn set_size(&self, size: u64) {
        self.state.write().size = Some(size);
    }

    pub fn aggregation_size(&self) -> Option<u64> {
        self.state.read().aggregation_size
    }

    pub fn set_aggregation_size(&self, size: u64) {
        self.state.write().aggregation_size = Some(size);
    }

    pub fn set_after_key(&self, after_key: Option<Value>) {
        self.state.write().after_key = after_key;
    }

    pub fn set_row_filter(&self, row_filter: Option<RowFilterValue>) {
        self.state.write().row_filter = row_filter;
    }

    pub(crate) fn set_bounds_map(&self, map_id: String) {
        self.state.write().bounds_map = Some(map_id);
    }

    pub(crate) fn bounds_map(&self) -> Option<String> {
        self.state.read().bounds_map.clone()
    }

    pub(crate) fn set_disabled(&self) {
        self.state.write().disabled = true;
    }

    /// Rebuilds the aggregation plan for a temporary mode switch; a
    /// download switches a term-aggregation source to composite paging.
    pub fn prepare(&self, mode: SourceMode) {
        self.state.write().prepared_mode = Some(mode);
    }

    pub fn clear_prepared_mode(&self) {
        self.state.write().prepared_mode = None;
    }

    pub(crate) fn client(&self) -> &Arc<dyn SearchClient> {
        &self.client
    }

    pub(crate) fn shared(&self) -> &Arc<PageShared> {
        &self.shared
    }

    /// Registers a consumer widget. Consumers are never removed during
    /// a page session.
    pub fn register_consumer(&self, widget: Arc<dyn OutputWidget>) {
        self.consumers.write().push(widget);
    }

    pub fn consumers(&self) -> Vec<Arc<dyn OutputWidget>> {
        self.consumers.read().clone()
    }

    /// The settings slice consumers receive with each population.
    pub fn snapshot(&self) -> SourceSnapshot {
        let state = self.state.read();
        SourceSnapshot {
            id: self.cfg.id.clone(),
            mode: state.prepared_mode.unwrap_or_else(|| self.cfg.mode()),
            size: state.size.or(self.cfg.size),
            aggregation_size: state.aggregation_size,
            from: state.from,
            geoms_too_close: state.geoms_too_close,
        }
    }

    /// Requests a repopulation from current parameters.
    ///
    /// Asks every registered consumer whether it needs data; consumers
    /// on hidden tabs defer until their tab activates. Skips the
    /// network fetch when the compiled request matches the last one
    /// issued, unless `force` is set. `only_for` limits distribution to
    /// a single widget.
    pub fn populate(self: &Arc<Self>, force: bool, only_for: Option<String>) {
        let consumers = self.consumers();
        if consumers.is_empty() || self.state.read().disabled {
            // Not hooked up yet, or configuration failed.
            return;
        }
        let snapshot = self.snapshot();
        let mut needs_population = false;
        for widget in &consumers {
            match widget.needs_population(&snapshot) {
                PopulateNeed::Yes => {
                    widget.set_loading(true);
                    needs_population = true;
                }
                PopulateNeed::No => {}
                PopulateNeed::WhenVisible { tab_id } => {
                    self.arm_tab(tab_id, force, only_for.clone());
                }
            }
        }
        if needs_population {
            self.do_population(force, only_for);
        }
    }

    /// Arms a one-shot populate for when a hidden tab becomes visible.
    fn arm_tab(self: &Arc<Self>, tab_id: String, force: bool, only_for: Option<String>) {
        let mut state = self.state.write();
        if state.armed_tabs.contains_key(&tab_id) {
            return;
        }
        let weak = Arc::downgrade(self);
        let armed_tab = tab_id.clone();
        let subscription = self.shared.bus.subscribe(EventKind::TabActivated, move |event| {
            let PageEvent::TabActivated { tab_id } = event else {
                return;
            };
            if *tab_id != armed_tab {
                return;
            }
            if let Some(source) = weak.upgrade() {
                if let Some(sub) = source.state.write().armed_tabs.remove(&armed_tab) {
                    source.shared.bus.unsubscribe(sub);
                }
                source.populate(force, only_for.clone());
            }
        });
        state.armed_tabs.insert(tab_id, subscription);
    }

    /// Compiles the request for the source's current state, planning
    /// the aggregation first.
    pub(crate) fn build_request(&self, for_count: bool) -> CompileOutcome {
        self.plan_aggregation();
        let consumers = self.consumers();
        let gathered = self
            .shared
            .gather(&self.cfg, &consumers, self.bounds_map().as_deref());
        let state = self.state.read();
        let rt = SourceRuntime {
            from: state.from,
            size: state.size,
            aggregation: state.planned_aggs.as_ref(),
            row_filter: state.row_filter.as_ref(),
        };
        compile(&self.cfg, &rt, &gathered.as_query_context(), for_count)
    }

    /// Rebuilds the aggregation spec for the current mode.
    fn plan_aggregation(&self) {
        let mode = self.mode();
        let mut state = self.state.write();
        let planned = match (&self.cfg.mode, mode) {
            (ModeConfig::TermAggregation(term_cfg), SourceMode::CompositeAggregation) => {
                // Download prepare: the term aggregation re-expressed as
                // a cursor-pageable composite over the unique field.
                let composite_cfg = bv_core::config::CompositeAggConfig {
                    unique_field: term_cfg.unique_field.clone(),
                    source_fields: vec![term_cfg.unique_field.clone()],
                    aggregation: term_cfg.aggregation.clone(),
                    count_aggregation: term_cfg.count_aggregation.clone(),
                    page_size: DOWNLOAD_COMPOSITE_PAGE_SIZE,
                };
                Some(plan_composite(
                    &composite_cfg,
                    &self.cfg.fields,
                    DOWNLOAD_COMPOSITE_PAGE_SIZE,
                ))
            }
            (ModeConfig::TermAggregation(term_cfg), _) => {
                let plan = plan_term(
                    term_cfg,
                    &self.cfg.sort,
                    state.aggregation_size.or(self.cfg.size),
                    &self.cfg.fields,
                );
                state.aggregation_size = Some(plan.aggregation_size);
                Some(plan.aggs)
            }
            (ModeConfig::CompositeAggregation(composite_cfg), _) => {
                let page_size = state.aggregation_size.unwrap_or(composite_cfg.page_size);
                state.aggregation_size = Some(page_size);
                Some(plan_composite(composite_cfg, &self.cfg.fields, page_size))
            }
            (ModeConfig::MapGeoHash(geo_cfg), _) => Some(geo_cfg.aggregation.clone()),
            (ModeConfig::MapGridSquare(grid_cfg), _) => Some(grid_cfg.aggregation.clone()),
            (ModeConfig::Docs(_), _) => None,
        };
        state.planned_aggs = planned;
    }

    /// Page size of the planned composite aggregation, for count-based
    /// pager updates.
    fn composite_page_size(&self) -> u64 {
        let state = self.state.read();
        state
            .planned_aggs
            .as_ref()
            .and_then(|aggs| find_value(aggs, "composite"))
            .and_then(|composite| composite.get("size"))
            .and_then(Value::as_u64)
            .or(state.aggregation_size)
            .unwrap_or(0)
    }

    fn do_population(self: &Arc<Self>, force: bool, only_for: Option<String>) {
        let outcome = self.build_request(false);
        let consumers = self.consumers();
        for widget in &consumers {
            widget.clear_invalid_inputs();
        }
        for invalid in &outcome.invalid_inputs {
            if let Some(widget) = consumers.iter().find(|w| w.id() == invalid.widget_id) {
                widget.flag_invalid_input(&invalid.field, &invalid.reason);
            }
        }
        let Some(mut request) = outcome.request else {
            self.hide_spinners();
            return;
        };
        self.state.write().geoms_too_close = outcome.geoms_too_close;

        // Pagination support for composite aggregations: inject the
        // cursor for the in-progress page just before fingerprinting.
        let after_key = self.state.read().after_key.clone();
        if let Some(after) = after_key {
            if let Some(aggs) = request.aggs.as_mut() {
                if let Some(composite) =
                    find_value_mut(aggs, "composite").and_then(Value::as_object_mut)
                {
                    composite.insert("after".into(), after);
                }
            }
        }

        let request_fingerprint = fingerprint(&request);
        if !self
            .state
            .write()
            .dedup
            .should_issue(&request_fingerprint, force)
        {
            // Exactly the same request as already loaded.
            debug!(source = %self.cfg.id, "request unchanged, fetch skipped");
            self.hide_spinners();
            self.state.write().status = SourceStatus::Idle;
            return;
        }
        self.state.write().status = SourceStatus::AwaitingResponse;

        let source = Arc::clone(self);
        let mut inflight = self.inflight.lock();
        // A newer request supersedes and cancels the in-flight one.
        if let Some(previous) = inflight.take() {
            previous.abort();
        }
        let handle = tokio::spawn(async move {
            let result = source
                .client
                .search(&request, source.cfg.filter_path.as_deref())
                .await;
            match result {
                Ok(response) => {
                    source
                        .handle_response(response, request, force, only_for)
                        .await
                }
                Err(error) => source.handle_failure(error),
            }
        });
        *inflight = Some(handle.abort_handle());
    }

    async fn handle_response(
        self: &Arc<Self>,
        mut response: SearchResponse,
        request: SearchRequest,
        force: bool,
        only_for: Option<String>,
    ) {
        self.state.write().status = SourceStatus::Idle;
        if response.is_error() {
            self.hide_spinners();
            self.shared.bus.publish(&PageEvent::BackendError {
                source_id: self.cfg.id.clone(),
                message: "search query failed".into(),
            });
            return;
        }
        build_pivot_tables(&self.cfg.build_table_xy, &mut response);
        let snapshot = self.snapshot();
        let consumers = self.consumers();
        let populated = distribute(
            &consumers,
            &snapshot,
            &response,
            &request,
            only_for.as_deref(),
            &[],
        );
        if self.cfg.mode.count_aggregation().is_some() {
            // Composite aggregations may not return a usable total;
            // a separate aggregation provides the count for pagers.
            let grids: Vec<Arc<dyn OutputWidget>> = populated
                .iter()
                .filter(|w| w.class() == WidgetClass::DataGrid)
                .cloned()
                .collect();
            if !grids.is_empty() {
                self.run_count_request(force, &grids).await;
            }
        }
        self.hide_spinners();
    }

    /// Issues the count-only companion request, reusing the cached
    /// count whenever the compiled count request is unchanged.
    async fn run_count_request(self: &Arc<Self>, force: bool, grids: &[Arc<dyn OutputWidget>]) {
        let Some(request) = self.build_request(true).request else {
            return;
        };
        let page_size = self.composite_page_size();
        let request_fingerprint = fingerprint(&request);
        if !self
            .state
            .write()
            .count_dedup
            .should_issue(&request_fingerprint, force)
        {
            // Old count, new page location.
            for grid in grids {
                grid.update_count(page_size, None);
            }
            return;
        }
        self.state.write().status = SourceStatus::AwaitingCountResponse;
        match self
            .client
            .search(&request, self.cfg.filter_path.as_deref())
            .await
        {
            Ok(response) => {
                let count = response
                    .aggregations
                    .as_ref()
                    .and_then(|aggs| find_value(aggs, "value"))
                    .and_then(Value::as_u64);
                for grid in grids {
                    grid.update_count(page_size, count);
                }
            }
            Err(error) => {
                warn!(source = %self.cfg.id, %error, "count request failed");
            }
        }
        self.state.write().status = SourceStatus::Idle;
    }

    fn handle_failure(self: &Arc<Self>, error: FetchError) {
        self.state.write().status = SourceStatus::Idle;
        self.hide_spinners();
        match error {
            FetchError::Interrupted(reason) => {
                // The page navigated away mid-request; nothing to report.
                warn!(source = %self.cfg.id, %reason, "fetch interrupted, ignored");
            }
            other => {
                self.shared.bus.publish(&PageEvent::BackendError {
                    source_id: self.cfg.id.clone(),
                    message: other.to_string(),
                });
            }
        }
    }

    /// Hides loading indicators for all outputs of this source.
    fn hide_spinners(&self) {
        for widget in self.consumers().iter() {
            widget.set_loading(false);
        }
    }
}
