//! Download control state.
//!
//! The control does nothing until explicitly actioned; it never asks
//! for population. When run, it drives the engine's chunked download
//! and mirrors the progress events for its renderer.

use std::sync::Arc;

use parking_lot::RwLock;

use bv_core::config::SourceSnapshot;
use bv_core::events::{EventKind, PageEvent};
use bv_core::protocol::{SearchRequest, SearchResponse};
use bv_core::widget::{OutputWidget, PopulateNeed, WidgetClass};
use bv_data::{
    run_download, DataSource, DownloadError, DownloadOptions, DownloadSummary, PageShared,
};

#[derive(Debug, Default, Clone)]
struct DownloadState {
    running: bool,
    done: bool,
    progress: Option<(u64, Option<u64>)>,
}

/// Download output widget.
pub struct DownloadControl {
    id: String,
    binding: String,
    shared: Arc<PageShared>,
    state: Arc<RwLock<DownloadState>>,
}

impl DownloadControl {
    pub fn new(id: impl Into<String>, shared: Arc<PageShared>, source_id: impl Into<String>) -> Self {
        DownloadControl {
            id: id.into(),
            binding: source_id.into(),
            shared,
            state: Arc::new(RwLock::new(DownloadState::default())),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.read().running
    }

    pub fn is_done(&self) -> bool {
        self.state.read().done
    }

    /// Rows downloaded so far and the known total, if any.
    pub fn progress(&self) -> Option<(u64, Option<u64>)> {
        self.state.read().progress
    }

    /// Runs the chunked download for the bound source, yielding each
    /// chunk to the caller.
    pub async fn run(
        &self,
        source: &Arc<DataSource>,
        options: &DownloadOptions,
        on_chunk: impl FnMut(&SearchResponse),
    ) -> Result<DownloadSummary, DownloadError> {
        {
            let mut state = self.state.write();
            state.running = true;
            state.done = false;
            state.progress = None;
        }
        let progress_state = Arc::clone(&self.state);
        let source_id = source.id().to_string();
        let subscription = self
            .shared
            .bus
            .subscribe(EventKind::DownloadProgress, move |event| {
                let PageEvent::DownloadProgress {
                    source_id: from,
                    done,
                    total,
                } = event
                else {
                    return;
                };
                if *from == source_id {
                    progress_state.write().progress = Some((*done, *total));
                }
            });
        let result = run_download(source, options, on_chunk).await;
        self.shared.bus.unsubscribe(subscription);
        let mut state = self.state.write();
        state.running = false;
        state.done = result.is_ok();
        result
    }
}

impl OutputWidget for DownloadControl {
    fn id(&self) -> &str {
        &self.id
    }

    fn class(&self) -> WidgetClass {
        WidgetClass::DownloadControl
    }

    fn source_bindings(&self) -> Vec<String> {
        vec![self.binding.clone()]
    }

    /// Downloads don't refresh until explicitly actioned.
    fn needs_population(&self, _source: &SourceSnapshot) -> PopulateNeed {
        PopulateNeed::No
    }

    fn populate(
        &self,
        _settings: &SourceSnapshot,
        _response: &SearchResponse,
        _request: &SearchRequest,
    ) {
        // Nothing to do until the user starts a download.
    }
}
