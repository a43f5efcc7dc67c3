//! Mode-specific pagination.
//!
//! Three mutually exclusive strategies: `from`/`size` offsets for
//! document listing, an `after_key` cursor with a page-to-cursor cache
//! for composite aggregations, and no paging at all for plain term
//! aggregations (one capped bucket list).

use std::sync::Arc;

use ahash::AHashMap;
use serde_json::Value;

use bv_core::config::SourceMode;
use bv_core::protocol::SearchResponse;

use crate::source::DataSource;

/// Cursor memory for a composite-aggregation consumer: the current
/// zero-based page and the cursor needed to fetch each page. Page 0
/// never has a cursor; page N+1's cursor is only learned from page N's
/// response.
#[derive(Debug, Clone, Default)]
pub struct CompositeInfo {
    pub page: usize,
    pub page_after_keys: AHashMap<usize, Value>,
}

impl CompositeInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the cursor for the next page from a response.
    pub fn note_after_key(&mut self, after_key: Option<Value>) {
        if let Some(key) = after_key {
            self.page_after_keys.insert(self.page + 1, key);
        }
    }

    /// Reverts a forward move that ran past the last page.
    pub fn revert_forward(&mut self) {
        self.page = self.page.saturating_sub(1);
    }
}

/// Next offset for document-mode paging. Forward moves advance by the
/// number of currently rendered rows, not the configured page size, so
/// rows removed between loads are not skipped; backward moves subtract
/// the page size and never go below zero.
pub fn next_offset(from: u64, forward: bool, rendered_items: usize, size: u64) -> u64 {
    if forward {
        from + rendered_items as u64
    } else {
        from.saturating_sub(size)
    }
}

/// Repopulates a source with the next or previous data page.
pub fn move_page(
    source: &Arc<DataSource>,
    composite: &mut CompositeInfo,
    forward: bool,
    rendered_items: usize,
) {
    match source.mode() {
        SourceMode::CompositeAggregation => {
            composite.page = if forward {
                composite.page + 1
            } else {
                composite.page.saturating_sub(1)
            };
            source.set_after_key(composite.page_after_keys.get(&composite.page).cloned());
        }
        SourceMode::Docs => {
            let size = source.size().unwrap_or(0);
            source.set_from(next_offset(source.from(), forward, rendered_items, size));
        }
        // Term aggregations and map modes do not page.
        _ => return,
    }
    source.populate(false, None);
}

/// Applies a rows-per-page change to the source and repopulates.
/// Aggregating sources resize their bucket cap; document sources their
/// hit count.
pub fn rows_per_page_change(source: &Arc<DataSource>, rows: u64) {
    match source.mode() {
        SourceMode::TermAggregation | SourceMode::CompositeAggregation => {
            source.set_aggregation_size(rows);
        }
        _ => source.set_size(rows),
    }
    source.populate(false, None);
}

/// Rows-per-page options derived from the configured size: half steps
/// above 40 rows, quadruple steps below.
pub fn rows_per_page_options(source_size: Option<u64>) -> Vec<u64> {
    let base = source_size.unwrap_or(30);
    let mut options = Vec::new();
    if base >= 40 {
        options.push(base.div_ceil(2));
    }
    options.push(base);
    options.push(base * 2);
    if base < 40 {
        options.push(base * 4);
    }
    options
}

/// Inputs for rendering a pager footer.
pub struct PagerContext<'a> {
    pub mode: SourceMode,
    /// `from` as sent in the request, for document mode.
    pub request_from: Option<u64>,
    /// Rows currently rendered by the consumer.
    pub rendered_items: usize,
    pub response: &'a SearchResponse,
    pub composite_page: usize,
    /// Bucket cap for aggregation modes.
    pub aggregation_size: u64,
    /// Count carried over from the last counting request.
    pub last_count: Option<u64>,
}

/// Rendered pager state.
#[derive(Debug, Clone, PartialEq)]
pub struct PagerDisplay {
    pub showing: String,
    pub prev_enabled: bool,
    pub next_enabled: bool,
    /// Whether paging buttons apply at all in this mode.
    pub buttons_visible: bool,
    /// Total to carry forward as the consumer's last known count.
    pub total: Option<u64>,
}

/// Computes the pager footer for a populated response.
pub fn pager_display(ctx: &PagerContext) -> PagerDisplay {
    let mut of_label = "";
    let total = match ctx.mode {
        SourceMode::Docs => ctx.response.hits.total.map(|t| {
            if t.is_lower_bound() {
                of_label = "at least ";
            }
            t.value
        }),
        _ => aggregation_count(ctx.response).or(ctx.last_count),
    };

    let (from_row, prev_enabled, next_enabled, buttons_visible) = match ctx.mode {
        SourceMode::CompositeAggregation => {
            let after_key = ctx.response.composite_after_key().is_some();
            (
                ctx.composite_page as u64 * ctx.aggregation_size + 1,
                ctx.composite_page > 0,
                after_key,
                true,
            )
        }
        SourceMode::Docs => {
            let from_row = ctx.request_from.unwrap_or(0) + 1;
            let past_end = total.is_some_and(|t| {
                from_row + ctx.response.hits.hits.len() as u64 >= t
            });
            (from_row, from_row > 1, !past_end, true)
        }
        // A standard terms aggregation cannot be paged through.
        _ => (1, false, false, false),
    };

    let showing = showing_text(from_row, ctx.rendered_items, total, of_label);
    PagerDisplay {
        showing,
        prev_enabled,
        next_enabled,
        buttons_visible,
        total,
    }
}

/// Pager update from a dedicated counting aggregation, reusing a cached
/// count when only the page location changed.
pub fn count_pager_display(composite_page: usize, page_size: u64, total: u64) -> PagerDisplay {
    let from_row = composite_page as u64 * page_size + 1;
    let rendered = page_size.min(total.saturating_sub(from_row - 1)) as usize;
    PagerDisplay {
        showing: showing_text(from_row, rendered, Some(total), ""),
        prev_enabled: composite_page > 0,
        next_enabled: from_row + page_size - 1 < total,
        buttons_visible: true,
        total: Some(total),
    }
}

/// Total row count for aggregation modes: the cardinality aggregation,
/// sanity-checked against the bucket count actually returned (the
/// cardinality field can be less unique than the composite selection).
fn aggregation_count(response: &SearchResponse) -> Option<u64> {
    let aggregations = response.aggregations.as_ref()?;
    let count = aggregations
        .get("count")
        .and_then(|c| c.get("value"))
        .and_then(Value::as_u64)?;
    let bucket_count = aggregations
        .get("rows")
        .and_then(|rows| rows.get("buckets"))
        .and_then(Value::as_array)
        .map(|buckets| buckets.len() as u64)
        .unwrap_or(0);
    Some(count.max(bucket_count))
}

fn showing_text(from_row: u64, rendered: usize, total: Option<u64>, of_label: &str) -> String {
    if rendered == 0 {
        return "No hits".into();
    }
    let total_text = total.map_or_else(|| "unknown".to_string(), |t| t.to_string());
    if from_row == 1 && total == Some(rendered as u64) {
        return format!("Showing all {total_text} hits");
    }
    let to_label = if from_row == 1 {
        "first ".to_string()
    } else {
        format!("{from_row} to ")
    };
    format!(
        "Showing {to_label}{} of {of_label}{total_text}",
        from_row + rendered as u64 - 1
    )
}
