//! Chunked downloads.
//!
//! Drives a whole-dataset export through the same compiled requests
//! the page uses: aggregating sources are re-prepared as cursor-paged
//! composites (scroll-free, larger pages), document sources page by
//! offset. Each fetched chunk is handed to the caller, which owns
//! persistence; progress is announced on the page bus.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use bv_core::config::SourceMode;
use bv_core::events::PageEvent;
use bv_core::protocol::{find_value, find_value_mut, SearchResponse};

use crate::fetch::FetchError;
use crate::source::DataSource;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("source compiled no request (row filter pending)")]
    NothingToFetch,

    #[error("backend reported an error payload")]
    Backend,

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

pub struct DownloadOptions {
    /// Cursor page size for composite chunks.
    pub composite_page_size: u64,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        DownloadOptions {
            composite_page_size: bv_query::DOWNLOAD_COMPOSITE_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DownloadSummary {
    pub chunks: u64,
    pub rows: u64,
}

/// Runs the chunked export loop, yielding each response to `on_chunk`.
/// Stops on an empty or short chunk, or when the cursor runs out.
pub async fn run_download(
    source: &Arc<DataSource>,
    options: &DownloadOptions,
    mut on_chunk: impl FnMut(&SearchResponse),
) -> Result<DownloadSummary, DownloadError> {
    let aggregating = matches!(
        source.config().mode(),
        SourceMode::TermAggregation | SourceMode::CompositeAggregation
    );
    if aggregating {
        // Composite paging scrolls the whole aggregation without a
        // server-side cursor context.
        source.prepare(SourceMode::CompositeAggregation);
    }
    let result = download_loop(source, options, aggregating, &mut on_chunk).await;
    source.clear_prepared_mode();
    result
}

async fn download_loop(
    source: &Arc<DataSource>,
    options: &DownloadOptions,
    aggregating: bool,
    on_chunk: &mut impl FnMut(&SearchResponse),
) -> Result<DownloadSummary, DownloadError> {
    let Some(mut request) = source.build_request(false).request else {
        return Err(DownloadError::NothingToFetch);
    };
    if aggregating {
        if let Some(composite) = request
            .aggs
            .as_mut()
            .and_then(|aggs| find_value_mut(aggs, "composite"))
            .and_then(Value::as_object_mut)
        {
            composite.insert("size".into(), options.composite_page_size.into());
            composite.remove("after");
        }
    } else {
        request.from = None;
    }

    let mut summary = DownloadSummary::default();
    let mut from: u64 = 0;
    loop {
        let response = source
            .client()
            .search(&request, source.config().filter_path.as_deref())
            .await?;
        if response.is_error() {
            return Err(DownloadError::Backend);
        }
        let chunk_rows = if aggregating {
            response
                .aggregations
                .as_ref()
                .and_then(|aggs| find_value(aggs, "buckets"))
                .and_then(Value::as_array)
                .map(|buckets| buckets.len())
                .unwrap_or(0)
        } else {
            response.hits.hits.len()
        };
        if chunk_rows == 0 {
            break;
        }
        on_chunk(&response);
        summary.chunks += 1;
        summary.rows += chunk_rows as u64;

        let total = if aggregating {
            response
                .aggregations
                .as_ref()
                .and_then(|aggs| aggs.get("count"))
                .and_then(|count| count.get("value"))
                .and_then(Value::as_u64)
        } else {
            response.hits.total.map(|t| t.value)
        };
        source.shared().bus.publish(&PageEvent::DownloadProgress {
            source_id: source.id().to_string(),
            done: summary.rows,
            total,
        });

        if aggregating {
            let Some(after) = response.composite_after_key().cloned() else {
                break;
            };
            if (chunk_rows as u64) < options.composite_page_size {
                break;
            }
            if let Some(composite) = request
                .aggs
                .as_mut()
                .and_then(|aggs| find_value_mut(aggs, "composite"))
                .and_then(Value::as_object_mut)
            {
                composite.insert("after".into(), after);
            }
        } else {
            from += chunk_rows as u64;
            if total.is_some_and(|t| from >= t) {
                break;
            }
            request.from = Some(from);
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use indexmap::IndexMap;
    use serde_json::json;

    use bv_core::config::{CompositeAggConfig, DocsConfig, ModeConfig, SourceConfig};
    use bv_core::events::EventKind;

    use crate::fetch::SearchClient;
    use crate::page::{PageContext, PageSettings};
    use crate::testutil::{MockClient, ScriptedResponse};

    fn composite_rows(count: usize, after: Option<&str>) -> SearchResponse {
        let buckets: Vec<serde_json::Value> =
            (0..count).map(|i| json!({"key": {"taxon": i}})).collect();
        let mut rows = json!({"buckets": buckets});
        if let Some(after) = after {
            rows["after_key"] = json!({"taxon": after});
        }
        serde_json::from_value(json!({
            "hits": {"total": 0, "hits": []},
            "aggregations": {"rows": rows, "count": {"value": 3}}
        }))
        .unwrap()
    }

    fn docs_hits(count: usize, total: u64) -> SearchResponse {
        let hits: Vec<serde_json::Value> = (0..count)
            .map(|i| json!({"_id": i.to_string(), "_source": {}}))
            .collect();
        serde_json::from_value(json!({"hits": {"total": total, "hits": hits}})).unwrap()
    }

    #[tokio::test]
    async fn test_composite_download_follows_cursor() {
        let client = MockClient::new();
        let mut page =
            PageContext::new(client.clone() as Arc<dyn SearchClient>, PageSettings::default());
        let source = page
            .add_source(
                SourceConfig::new(
                    "by-taxon",
                    ModeConfig::CompositeAggregation(CompositeAggConfig {
                        unique_field: "taxon.accepted_name".into(),
                        source_fields: vec!["taxon.accepted_name".into()],
                        aggregation: IndexMap::new(),
                        count_aggregation: None,
                        page_size: 30,
                    }),
                )
                .unwrap(),
            )
            .unwrap();
        client.push_response(ScriptedResponse::Ok(composite_rows(2, Some("Apis"))));
        client.push_response(ScriptedResponse::Ok(composite_rows(1, None)));
        let progress = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&progress);
        page.bus().subscribe(EventKind::DownloadProgress, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        let mut chunks = 0;
        let summary = run_download(
            &source,
            &DownloadOptions {
                composite_page_size: 2,
            },
            |_| chunks += 1,
        )
        .await
        .unwrap();
        assert_eq!(summary, DownloadSummary { chunks: 2, rows: 3 });
        assert_eq!(chunks, 2);
        assert_eq!(progress.load(Ordering::SeqCst), 2);
        let requests = client.requests.lock().clone();
        assert_eq!(requests.len(), 2);
        // Page size override and cursor threading.
        assert_eq!(requests[0].aggs.as_ref().unwrap()["rows"]["composite"]["size"], json!(2));
        assert!(requests[0].aggs.as_ref().unwrap()["rows"]["composite"].get("after").is_none());
        assert_eq!(
            requests[1].aggs.as_ref().unwrap()["rows"]["composite"]["after"],
            json!({"taxon": "Apis"})
        );
    }

    #[tokio::test]
    async fn test_docs_download_pages_by_offset() {
        let client = MockClient::new();
        let mut page =
            PageContext::new(client.clone() as Arc<dyn SearchClient>, PageSettings::default());
        let source = page
            .add_source(
                SourceConfig::new("records", ModeConfig::Docs(DocsConfig::default()))
                    .unwrap()
                    .with_size(2),
            )
            .unwrap();
        client.push_response(ScriptedResponse::Ok(docs_hits(2, 5)));
        client.push_response(ScriptedResponse::Ok(docs_hits(2, 5)));
        client.push_response(ScriptedResponse::Ok(docs_hits(1, 5)));
        let summary = run_download(&source, &DownloadOptions::default(), |_| {})
            .await
            .unwrap();
        assert_eq!(summary, DownloadSummary { chunks: 3, rows: 5 });
        let requests = client.requests.lock().clone();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].from, Some(2));
        assert_eq!(requests[2].from, Some(4));
    }
}
